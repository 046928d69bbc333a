//! Piece and block storage consumed by the deal protocols.
//!
//! The piece store maps payload roots to the on-sector pieces that contain
//! them; the block store holds the content-addressed blocks of a payload
//! DAG. Both are trait seams with in-memory implementations; the DAG layout
//! and CAR codec here define the byte-level shapes both markets move around.

pub mod blockstore;
pub mod car;
pub mod dag;
pub mod error;
pub mod types;

pub use blockstore::{Blockstore, MemoryBlockstore};
pub use car::{piece_commitment, read_car, write_car, CarHeader};
pub use dag::{assemble, import_bytes, DagLink, DagNode, CHUNK_SIZE};
pub use error::{Result, StoreError};
pub use types::{
    find_piece, CidInfo, DealInfo, MemoryPieceStore, PieceBlockLocation, PieceInfo, PieceStore,
};
