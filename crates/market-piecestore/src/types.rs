use crate::error::{Result, StoreError};
use async_trait::async_trait;
use market_types::Cid;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Where a block of a payload lives inside a piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceBlockLocation {
    pub piece_cid: Cid,
    pub sector_id: u64,
    pub offset: u64,
    pub length: u64,
}

/// Everything known about a payload root: the pieces that contain it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidInfo {
    pub payload_cid: Cid,
    pub piece_block_locations: Vec<PieceBlockLocation>,
}

/// One deal under which a piece is stored in a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealInfo {
    pub deal_id: u64,
    pub sector_id: u64,
    pub offset: u64,
    pub length: u64,
}

/// Everything known about a piece: the deals that keep it sealed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceInfo {
    pub piece_cid: Cid,
    pub deals: Vec<DealInfo>,
}

/// Mapping from payload roots and piece identifiers to sector locations.
#[async_trait]
pub trait PieceStore: Send + Sync {
    /// Look up the pieces containing a payload root. `NotFound` when the
    /// payload is unknown, any other error for lookup failures.
    async fn get_cid_info(&self, payload_cid: &Cid) -> Result<CidInfo>;

    async fn get_piece_info(&self, piece_cid: &Cid) -> Result<PieceInfo>;
}

/// First piece containing `payload_cid`, optionally constrained to a
/// specific piece identifier.
///
/// Absence in every form (unknown payload, no piece infos, or a constraint
/// nothing matches) is `NotFound`; real lookup failures carry the
/// underlying message.
pub async fn find_piece(
    store: &dyn PieceStore,
    payload_cid: &Cid,
    piece_cid: Option<Cid>,
) -> Result<PieceInfo> {
    let cid_info = match store.get_cid_info(payload_cid).await {
        Ok(info) => info,
        Err(StoreError::NotFound) => return Err(StoreError::NotFound),
        Err(other) => return Err(StoreError::Lookup(format!("get cid info: {}", other))),
    };

    let mut last_err = None;
    for location in &cid_info.piece_block_locations {
        match store.get_piece_info(&location.piece_cid).await {
            Ok(info) => {
                if piece_cid.map_or(true, |wanted| info.piece_cid == wanted) {
                    return Ok(info);
                }
            }
            Err(StoreError::NotFound) => {}
            Err(other) => last_err = Some(other),
        }
    }

    match last_err {
        Some(err) => Err(StoreError::Lookup(format!("could not locate piece: {}", err))),
        None => Err(StoreError::NotFound),
    }
}

/// In-memory piece store with error injection for tests and local setups.
pub struct MemoryPieceStore {
    cid_infos: RwLock<HashMap<Cid, CidInfo>>,
    piece_infos: RwLock<HashMap<Cid, PieceInfo>>,
    cid_failures: RwLock<HashMap<Cid, String>>,
}

impl MemoryPieceStore {
    pub fn new() -> Self {
        Self {
            cid_infos: RwLock::new(HashMap::new()),
            piece_infos: RwLock::new(HashMap::new()),
            cid_failures: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_cid_info(&self, info: CidInfo) {
        self.cid_infos.write().await.insert(info.payload_cid, info);
    }

    pub async fn add_piece_info(&self, info: PieceInfo) {
        self.piece_infos.write().await.insert(info.piece_cid, info);
    }

    /// Make lookups of this payload fail with the given message.
    pub async fn fail_cid_info(&self, payload_cid: Cid, message: &str) {
        self.cid_failures
            .write()
            .await
            .insert(payload_cid, message.to_string());
    }
}

impl Default for MemoryPieceStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PieceStore for MemoryPieceStore {
    async fn get_cid_info(&self, payload_cid: &Cid) -> Result<CidInfo> {
        if let Some(message) = self.cid_failures.read().await.get(payload_cid) {
            return Err(StoreError::Lookup(message.clone()));
        }
        self.cid_infos
            .read()
            .await
            .get(payload_cid)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn get_piece_info(&self, piece_cid: &Cid) -> Result<PieceInfo> {
        self.piece_infos
            .read()
            .await
            .get(piece_cid)
            .cloned()
            .ok_or(StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_piece(payload: Cid, piece: Cid) -> MemoryPieceStore {
        let store = MemoryPieceStore::new();
        store
            .add_cid_info(CidInfo {
                payload_cid: payload,
                piece_block_locations: vec![PieceBlockLocation {
                    piece_cid: piece,
                    sector_id: 1,
                    offset: 0,
                    length: 1024,
                }],
            })
            .await;
        store
            .add_piece_info(PieceInfo {
                piece_cid: piece,
                deals: vec![DealInfo {
                    deal_id: 42,
                    sector_id: 1,
                    offset: 0,
                    length: 1024,
                }],
            })
            .await;
        store
    }

    #[tokio::test]
    async fn test_find_piece_first_match() {
        let payload = Cid::dummy(1);
        let piece = Cid::dummy(2);
        let store = store_with_piece(payload, piece).await;

        let found = find_piece(&store, &payload, None).await.unwrap();
        assert_eq!(found.piece_cid, piece);
        assert_eq!(found.deals[0].length, 1024);
    }

    #[tokio::test]
    async fn test_find_piece_honors_constraint() {
        let payload = Cid::dummy(1);
        let piece = Cid::dummy(2);
        let store = store_with_piece(payload, piece).await;

        let found = find_piece(&store, &payload, Some(piece)).await.unwrap();
        assert_eq!(found.piece_cid, piece);

        let err = find_piece(&store, &payload, Some(Cid::dummy(9)))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_find_piece_unknown_payload() {
        let store = MemoryPieceStore::new();
        let err = find_piece(&store, &Cid::dummy(5), None).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_find_piece_wraps_lookup_failures() {
        let store = MemoryPieceStore::new();
        let payload = Cid::dummy(3);
        store.fail_cid_info(payload, "GetCIDInfo failed").await;

        let err = find_piece(&store, &payload, None).await.unwrap_err();
        assert_eq!(err.to_string(), "get cid info: GetCIDInfo failed");
    }
}
