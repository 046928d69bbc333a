use crate::error::{FsmError, Result};
use crate::machine::DealSpec;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Durable mapping from deal identifier to encoded deal record.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Snapshot of every stored record, in key order.
    async fn list(&self) -> Result<Vec<Vec<u8>>>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Close the backing handle; all later operations fail.
    async fn close(&self) -> Result<()>;
}

/// In-memory record store.
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FsmError::Store("record store is closed".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.records.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Persisted layout: a versioned envelope carrying the status code and the
/// opaque record bytes. Unknown versions refuse to rehydrate.
#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    status: u64,
    record: Vec<u8>,
}

pub fn encode_record<S: DealSpec>(record: &S::Record) -> Result<Vec<u8>> {
    let body = serde_json::to_vec(record).map_err(|e| FsmError::Codec(e.to_string()))?;
    let envelope = Envelope {
        version: S::VERSION,
        status: S::status_code(record),
        record: body,
    };
    serde_json::to_vec(&envelope).map_err(|e| FsmError::Codec(e.to_string()))
}

pub fn decode_record<S: DealSpec>(bytes: &[u8]) -> Result<S::Record> {
    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|e| FsmError::Codec(e.to_string()))?;
    if envelope.version != S::VERSION {
        return Err(FsmError::UnsupportedVersion {
            found: envelope.version,
            expected: S::VERSION,
        });
    }
    serde_json::from_slice(&envelope.record).map_err(|e| FsmError::Codec(e.to_string()))
}

/// Write an envelope with an arbitrary version, bypassing `DealSpec`.
/// Exists so tests can simulate records written by a different release.
pub fn encode_versioned(version: u32, status: u64, record_body: Vec<u8>) -> Result<Vec<u8>> {
    serde_json::to_vec(&Envelope {
        version,
        status,
        record: record_body,
    })
    .map_err(|e| FsmError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryRecordStore::new();
        store.put("a", vec![1, 2, 3]).await.unwrap();
        store.put("b", vec![4]).await.unwrap();

        assert_eq!(store.get("a").await.unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(store.get("missing").await.unwrap(), None);
        assert_eq!(store.list().await.unwrap(), vec![vec![1, 2, 3], vec![4]]);

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_close_refuses_operations() {
        let store = MemoryRecordStore::new();
        store.put("a", vec![1]).await.unwrap();
        store.close().await.unwrap();
        assert!(store.get("a").await.is_err());
        assert!(store.put("b", vec![2]).await.is_err());
        assert!(store.list().await.is_err());
    }
}
