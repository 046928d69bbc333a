use crate::blockstore::Blockstore;
use crate::dag::DagNode;
use crate::error::{Result, StoreError};
use market_types::{encode_frame, Cid, Codec, Selector};
use serde::{Deserialize, Serialize};

/// Content-addressable archive header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarHeader {
    pub version: u64,
    pub roots: Vec<Cid>,
}

/// Serialize the DAG under `root` into a single byte stream: a framed
/// header, then one record per block in traversal order. Each block record
/// is a u32 little-endian length followed by the 4-byte cid prefix and the
/// block data.
pub async fn write_car(bs: &dyn Blockstore, root: &Cid, selector: Selector) -> Result<Vec<u8>> {
    let header = CarHeader {
        version: 1,
        roots: vec![*root],
    };
    let mut out = encode_frame(&header).map_err(|e| StoreError::Codec(e.to_string()))?;

    let root_block = bs.get(root).await?.ok_or(StoreError::NotFound)?;
    append_block(&mut out, root, &root_block);

    if root.codec == Codec::Node {
        let node = DagNode::decode(&root_block)?;
        let take = selector.link_budget(node.links.len());
        for link in node.links.iter().take(take) {
            let leaf = bs.get(&link.cid).await?.ok_or(StoreError::NotFound)?;
            append_block(&mut out, &link.cid, &leaf);
        }
    }
    Ok(out)
}

/// Parse an archive back into its roots and blocks.
pub fn read_car(bytes: &[u8]) -> Result<(Vec<Cid>, Vec<(Cid, Vec<u8>)>)> {
    if bytes.len() < 4 {
        return Err(StoreError::Codec("car shorter than header".to_string()));
    }
    let header_len = read_u32(&bytes[..4]) as usize;
    if bytes.len() < 4 + header_len {
        return Err(StoreError::Codec("car header truncated".to_string()));
    }
    let header: CarHeader = market_types::decode_frame(&bytes[..4 + header_len])
        .map_err(|e| StoreError::Codec(e.to_string()))?;

    let mut blocks = Vec::new();
    let mut at = 4 + header_len;
    while at < bytes.len() {
        if bytes.len() < at + 4 {
            return Err(StoreError::Codec("car block length truncated".to_string()));
        }
        let record_len = read_u32(&bytes[at..at + 4]) as usize;
        at += 4;
        if record_len < 4 || bytes.len() < at + record_len {
            return Err(StoreError::Codec("car block truncated".to_string()));
        }
        let prefix = &bytes[at..at + 4];
        let data = bytes[at + 4..at + record_len].to_vec();
        let cid = Cid::from_prefix(prefix, &data).map_err(|e| StoreError::Codec(e.to_string()))?;
        blocks.push((cid, data));
        at += record_len;
    }
    Ok((header.roots, blocks))
}

/// Commitment to the storage-encoded form of a payload: the content
/// identifier of its full archive.
pub async fn piece_commitment(bs: &dyn Blockstore, root: &Cid) -> Result<Cid> {
    let car = write_car(bs, root, Selector::All).await?;
    Ok(Cid::of(Codec::Raw, &car))
}

fn append_block(out: &mut Vec<u8>, cid: &Cid, data: &[u8]) {
    out.extend_from_slice(&((4 + data.len()) as u32).to_le_bytes());
    out.extend_from_slice(&cid.prefix());
    out.extend_from_slice(data);
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}
