use crate::blockstore::Blockstore;
use crate::error::{Result, StoreError};
use market_types::{Cid, Codec, Selector};

/// Raw bytes per leaf block when chunking a payload.
pub const CHUNK_SIZE: usize = 1024;

/// Bytes per encoded link: 32-byte hash, u64 offset, u64 length.
const LINK_SIZE: usize = 48;

/// Link from an interior node to a raw leaf block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DagLink {
    pub cid: Cid,
    pub offset: u64,
    pub length: u64,
}

/// Interior node of a payload DAG: an ordered list of leaf links.
///
/// Canonical encoding: link count as u64 little-endian, then 48 bytes per
/// link (hash, offset, length). The encoding is the hashed content, so it
/// admits no variation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DagNode {
    pub links: Vec<DagLink>,
}

impl DagNode {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.links.len() * LINK_SIZE);
        out.extend_from_slice(&(self.links.len() as u64).to_le_bytes());
        for link in &self.links {
            out.extend_from_slice(link.cid.as_bytes());
            out.extend_from_slice(&link.offset.to_le_bytes());
            out.extend_from_slice(&link.length.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(StoreError::Codec("node shorter than header".to_string()));
        }
        let count = read_u64(&bytes[..8]) as usize;
        if bytes.len() != 8 + count * LINK_SIZE {
            return Err(StoreError::Codec(format!(
                "node length {} does not match {} links",
                bytes.len(),
                count
            )));
        }
        let mut links = Vec::with_capacity(count);
        for i in 0..count {
            let at = 8 + i * LINK_SIZE;
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&bytes[at..at + 32]);
            let offset = read_u64(&bytes[at + 32..at + 40]);
            let length = read_u64(&bytes[at + 40..at + 48]);
            links.push(DagLink {
                cid: Cid {
                    codec: Codec::Raw,
                    hash,
                },
                offset,
                length,
            });
        }
        Ok(Self { links })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Chunk a payload into the block store, returning its root identifier.
///
/// Payloads up to one chunk are stored as a single raw block; larger
/// payloads get 1024-byte leaves under one interior node.
pub async fn import_bytes(bs: &dyn Blockstore, data: &[u8]) -> Result<Cid> {
    if data.len() <= CHUNK_SIZE {
        let cid = Cid::of(Codec::Raw, data);
        bs.put(cid, data.to_vec()).await?;
        return Ok(cid);
    }

    let mut links = Vec::new();
    let mut offset = 0u64;
    for chunk in data.chunks(CHUNK_SIZE) {
        let cid = Cid::of(Codec::Raw, chunk);
        bs.put(cid, chunk.to_vec()).await?;
        links.push(DagLink {
            cid,
            offset,
            length: chunk.len() as u64,
        });
        offset += chunk.len() as u64;
    }
    let encoded = DagNode { links }.encode();
    let root = Cid::of(Codec::Node, &encoded);
    bs.put(root, encoded).await?;
    Ok(root)
}

/// Re-read a payload out of the block store, honoring the selector.
pub async fn assemble(bs: &dyn Blockstore, root: &Cid, selector: Selector) -> Result<Vec<u8>> {
    let root_block = bs.get(root).await?.ok_or(StoreError::NotFound)?;
    match root.codec {
        Codec::Raw => Ok(root_block),
        Codec::Node => {
            let node = DagNode::decode(&root_block)?;
            let take = selector.link_budget(node.links.len());
            let mut out = Vec::new();
            for link in node.links.iter().take(take) {
                let leaf = bs.get(&link.cid).await?.ok_or(StoreError::NotFound)?;
                out.extend_from_slice(&leaf);
            }
            Ok(out)
        }
    }
}
