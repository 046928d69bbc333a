//! Block loading with on-demand unsealing.
//!
//! The provider serves blocks from its local store; on a miss it locates
//! the piece containing the payload, asks the node to unseal the sector
//! range, splices every block of the resulting archive into the store, and
//! retries the read.

use crate::blockio::BlockLoader;
use crate::error::{Result, RetrievalError};
use crate::nodes::RetrievalProviderNode;
use async_trait::async_trait;
use market_piecestore::{find_piece, read_car, Blockstore, PieceStore, StoreError};
use market_types::Cid;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct UnsealingLoader {
    blockstore: Arc<dyn Blockstore>,
    piece_store: Arc<dyn PieceStore>,
    node: Arc<dyn RetrievalProviderNode>,
    payload_cid: Cid,
    piece_cid: Option<Cid>,
    // Serializes unseal-and-splice per piece.
    unseal_lock: Mutex<()>,
}

impl UnsealingLoader {
    pub fn new(
        blockstore: Arc<dyn Blockstore>,
        piece_store: Arc<dyn PieceStore>,
        node: Arc<dyn RetrievalProviderNode>,
        payload_cid: Cid,
        piece_cid: Option<Cid>,
    ) -> Self {
        Self {
            blockstore,
            piece_store,
            node,
            payload_cid,
            piece_cid,
            unseal_lock: Mutex::new(()),
        }
    }

    async fn unseal_into_store(&self) -> Result<()> {
        let piece = find_piece(
            self.piece_store.as_ref(),
            &self.payload_cid,
            self.piece_cid,
        )
        .await
        .map_err(|e| match e {
            StoreError::NotFound => RetrievalError::NotFound,
            other => RetrievalError::Piece(other.to_string()),
        })?;
        let deal = piece.deals.first().ok_or(RetrievalError::NotFound)?;

        let archive = self
            .node
            .unseal_sector(deal.sector_id, deal.offset, deal.length)
            .await?;
        let (_roots, blocks) =
            read_car(&archive).map_err(|e| RetrievalError::Piece(e.to_string()))?;
        for (cid, data) in blocks {
            self.blockstore
                .put(cid, data)
                .await
                .map_err(|e| RetrievalError::Piece(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl BlockLoader for UnsealingLoader {
    async fn load(&self, cid: &Cid) -> Result<Vec<u8>> {
        if let Some(data) = self
            .blockstore
            .get(cid)
            .await
            .map_err(|e| RetrievalError::Piece(e.to_string()))?
        {
            return Ok(data);
        }

        let _guard = self.unseal_lock.lock().await;
        // A concurrent load may have unsealed the piece while we waited.
        if let Some(data) = self
            .blockstore
            .get(cid)
            .await
            .map_err(|e| RetrievalError::Piece(e.to_string()))?
        {
            return Ok(data);
        }
        self.unseal_into_store().await?;
        self.blockstore
            .get(cid)
            .await
            .map_err(|e| RetrievalError::Piece(e.to_string()))?
            .ok_or_else(|| {
                RetrievalError::Piece(format!("block {} missing after unsealing", cid))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnodes::TestRetrievalProviderNode;
    use market_piecestore::{
        import_bytes, write_car, CidInfo, DealInfo, MemoryBlockstore, MemoryPieceStore,
        PieceBlockLocation, PieceInfo,
    };
    use market_types::{Address, Selector};
    use rand::RngCore;

    #[tokio::test]
    async fn test_loader_unseals_on_miss() {
        // Build the payload in a staging store, archive it, and hand the
        // archive to the fake node as the unseal result.
        let staging = MemoryBlockstore::new();
        let mut data = vec![0u8; 5_000];
        rand::thread_rng().fill_bytes(&mut data);
        let root = import_bytes(&staging, &data).await.unwrap();
        let archive = write_car(&staging, &root, Selector::All).await.unwrap();

        let sector_id = 100_000;
        let offset = 1_000;
        let length = archive.len() as u64;

        let piece_cid = Cid::dummy(42);
        let piece_store = Arc::new(MemoryPieceStore::new());
        piece_store
            .add_cid_info(CidInfo {
                payload_cid: root,
                piece_block_locations: vec![PieceBlockLocation {
                    piece_cid,
                    sector_id,
                    offset,
                    length,
                }],
            })
            .await;
        piece_store
            .add_piece_info(PieceInfo {
                piece_cid,
                deals: vec![DealInfo {
                    deal_id: 1,
                    sector_id,
                    offset,
                    length,
                }],
            })
            .await;

        let node = Arc::new(TestRetrievalProviderNode::new(Address::dummy(9)));
        node.expect_unseal(sector_id, offset, length, archive).await;

        let blockstore = Arc::new(MemoryBlockstore::new());
        let loader = UnsealingLoader::new(
            blockstore.clone(),
            piece_store,
            node,
            root,
            None,
        );

        // The store is empty: the first load must fault the piece in.
        let root_bytes = loader.load(&root).await.unwrap();
        assert_eq!(Cid::of(root.codec, &root_bytes), root);
        assert!(blockstore.len().await > 1);

        let rebuilt = market_piecestore::assemble(blockstore.as_ref(), &root, Selector::All)
            .await
            .unwrap();
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn test_loader_fails_when_piece_unknown() {
        let node = Arc::new(TestRetrievalProviderNode::new(Address::dummy(9)));
        let loader = UnsealingLoader::new(
            Arc::new(MemoryBlockstore::new()),
            Arc::new(MemoryPieceStore::new()),
            node,
            Cid::dummy(1),
            None,
        );
        let err = loader.load(&Cid::dummy(1)).await.unwrap_err();
        assert!(matches!(err, RetrievalError::NotFound));
    }
}
