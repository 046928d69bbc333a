//! Selector-driven block traversal: the provider reads blocks out of its
//! store in pre-order, the client verifies the same order on arrival.

use crate::error::{Result, RetrievalError};
use crate::types::Block;
use async_trait::async_trait;
use market_piecestore::{Blockstore, DagNode};
use market_types::{Cid, Codec, Selector};
use std::collections::VecDeque;

/// Source of raw block bytes; the unsealing loader implements this over a
/// block store that can fault blocks in from sectors.
#[async_trait]
pub trait BlockLoader: Send + Sync {
    async fn load(&self, cid: &Cid) -> Result<Vec<u8>>;
}

fn queue_links(
    pending: &mut VecDeque<Cid>,
    node: &DagNode,
    selector: Selector,
) {
    let take = selector.link_budget(node.links.len());
    for (position, link) in node.links.iter().take(take).enumerate() {
        pending.insert(position, link.cid);
    }
}

/// Provider-side reader: yields the blocks under a root in traversal
/// order, one per call.
pub struct SelectorBlockReader {
    pending: VecDeque<Cid>,
    selector: Selector,
}

impl SelectorBlockReader {
    pub fn new(root: Cid, selector: Selector) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back(root);
        Self { pending, selector }
    }

    pub async fn next_block(&mut self, loader: &dyn BlockLoader) -> Result<Option<Block>> {
        let cid = match self.pending.pop_front() {
            Some(cid) => cid,
            None => return Ok(None),
        };
        let data = loader.load(&cid).await?;
        if cid.codec == Codec::Node {
            let node = DagNode::decode(&data)
                .map_err(|e| RetrievalError::BlockVerification(e.to_string()))?;
            queue_links(&mut self.pending, &node, self.selector);
        }
        Ok(Some(Block {
            prefix: cid.prefix().to_vec(),
            data,
        }))
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Client-side verifier: checks each arriving block against the traversal
/// the selector implies, writes verified blocks to the local store, and
/// counts on-wire payload bytes.
pub struct TraversalVerifier {
    pending: VecDeque<Cid>,
    selector: Selector,
}

impl TraversalVerifier {
    pub fn new(root: Cid, selector: Selector) -> Self {
        let mut pending = VecDeque::new();
        pending.push_back(root);
        Self { pending, selector }
    }

    pub async fn ingest(&mut self, store: &dyn Blockstore, block: &Block) -> Result<u64> {
        let expected = self.pending.pop_front().ok_or_else(|| {
            RetrievalError::BlockVerification("received block after traversal end".to_string())
        })?;
        let cid = Cid::from_prefix(&block.prefix, &block.data)
            .map_err(|e| RetrievalError::BlockVerification(e.to_string()))?;
        if cid != expected {
            return Err(RetrievalError::BlockVerification(format!(
                "received block {} does not match expected {}",
                cid, expected
            )));
        }
        store
            .put(cid, block.data.clone())
            .await
            .map_err(|e| RetrievalError::BlockVerification(e.to_string()))?;
        if cid.codec == Codec::Node {
            let node = DagNode::decode(&block.data)
                .map_err(|e| RetrievalError::BlockVerification(e.to_string()))?;
            queue_links(&mut self.pending, &node, self.selector);
        }
        Ok(block.data.len() as u64)
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_piecestore::{import_bytes, MemoryBlockstore};
    use rand::RngCore;
    use std::sync::Arc;

    struct StoreLoader(Arc<MemoryBlockstore>);

    #[async_trait]
    impl BlockLoader for StoreLoader {
        async fn load(&self, cid: &Cid) -> Result<Vec<u8>> {
            self.0
                .get(cid)
                .await
                .map_err(|e| RetrievalError::Piece(e.to_string()))?
                .ok_or(RetrievalError::NotFound)
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        data
    }

    #[tokio::test]
    async fn test_reader_and_verifier_agree() {
        let source = Arc::new(MemoryBlockstore::new());
        let data = payload(19_000);
        let root = import_bytes(source.as_ref(), &data).await.unwrap();

        let loader = StoreLoader(source);
        let mut reader = SelectorBlockReader::new(root, Selector::All);
        let mut verifier = TraversalVerifier::new(root, Selector::All);
        let target = MemoryBlockstore::new();

        let mut total = 0u64;
        while let Some(block) = reader.next_block(&loader).await.unwrap() {
            total += verifier.ingest(&target, &block).await.unwrap();
        }
        assert!(reader.is_complete());
        assert!(verifier.is_complete());
        // Root node (920 bytes) plus the 19 000 payload bytes.
        assert_eq!(total, 19_920);

        let rebuilt = market_piecestore::assemble(&target, &root, Selector::All)
            .await
            .unwrap();
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn test_partial_selector_stops_after_first_leaf() {
        let source = Arc::new(MemoryBlockstore::new());
        let data = payload(19_000);
        let root = import_bytes(source.as_ref(), &data).await.unwrap();

        let loader = StoreLoader(source);
        let mut reader = SelectorBlockReader::new(root, Selector::First(1));
        let mut total = 0u64;
        let mut count = 0;
        while let Some(block) = reader.next_block(&loader).await.unwrap() {
            total += block.data.len() as u64;
            count += 1;
        }
        assert_eq!(count, 2);
        assert_eq!(total, 1_944);
    }

    #[tokio::test]
    async fn test_verifier_rejects_tampered_block() {
        let source = Arc::new(MemoryBlockstore::new());
        let data = payload(3_000);
        let root = import_bytes(source.as_ref(), &data).await.unwrap();

        let loader = StoreLoader(source);
        let mut reader = SelectorBlockReader::new(root, Selector::All);
        let mut block = reader.next_block(&loader).await.unwrap().unwrap();
        block.data[0] ^= 0xff;

        let mut verifier = TraversalVerifier::new(root, Selector::All);
        let target = MemoryBlockstore::new();
        let err = verifier.ingest(&target, &block).await.unwrap_err();
        assert!(matches!(err, RetrievalError::BlockVerification(_)));
    }

    #[tokio::test]
    async fn test_verifier_rejects_out_of_order_blocks() {
        let source = Arc::new(MemoryBlockstore::new());
        let data = payload(3_000);
        let root = import_bytes(source.as_ref(), &data).await.unwrap();

        let loader = StoreLoader(source);
        let mut reader = SelectorBlockReader::new(root, Selector::All);
        let _root_block = reader.next_block(&loader).await.unwrap().unwrap();
        let second = reader.next_block(&loader).await.unwrap().unwrap();

        let mut verifier = TraversalVerifier::new(root, Selector::All);
        let target = MemoryBlockstore::new();
        assert!(verifier.ingest(&target, &second).await.is_err());
    }
}
