use crate::error::{Result, StoreError};
use async_trait::async_trait;
use market_types::Cid;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Content-addressed block storage. Implementations must be safe for
/// concurrent reads; writers during unsealing are serialized per piece by
/// the caller.
#[async_trait]
pub trait Blockstore: Send + Sync {
    async fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>>;

    /// Store a block. The bytes must hash to the given identifier.
    async fn put(&self, cid: Cid, data: Vec<u8>) -> Result<()>;

    async fn has(&self, cid: &Cid) -> Result<bool>;
}

/// In-memory block store.
pub struct MemoryBlockstore {
    blocks: RwLock<HashMap<Cid, Vec<u8>>>,
}

impl MemoryBlockstore {
    pub fn new() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored blocks.
    pub async fn len(&self) -> usize {
        self.blocks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blocks.read().await.is_empty()
    }

    /// Drop every block. Used by tests that force retrieval through the
    /// unsealing path.
    pub async fn clear(&self) {
        self.blocks.write().await.clear();
    }
}

impl Default for MemoryBlockstore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Blockstore for MemoryBlockstore {
    async fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
        Ok(self.blocks.read().await.get(cid).cloned())
    }

    async fn put(&self, cid: Cid, data: Vec<u8>) -> Result<()> {
        if Cid::of(cid.codec, &data) != cid {
            return Err(StoreError::InvalidBlock(format!(
                "bytes do not hash to {}",
                cid
            )));
        }
        self.blocks.write().await.insert(cid, data);
        Ok(())
    }

    async fn has(&self, cid: &Cid) -> Result<bool> {
        Ok(self.blocks.read().await.contains_key(cid))
    }
}
