use crate::error::{MarketError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Multicodec identifier carried in a block prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Codec {
    /// Raw payload bytes (file chunk)
    Raw,
    /// Interior DAG node listing links to child blocks
    Node,
}

impl Codec {
    pub fn byte(&self) -> u8 {
        match self {
            Codec::Raw => 0x55,
            Codec::Node => 0x70,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0x55 => Ok(Codec::Raw),
            0x70 => Ok(Codec::Node),
            other => Err(MarketError::InvalidBlock(format!(
                "unknown codec byte: {:#04x}",
                other
            ))),
        }
    }
}

/// Content identifier: a blake3 hash of the block bytes plus the codec
/// describing how to interpret them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cid {
    pub codec: Codec,
    pub hash: [u8; 32],
}

/// Hash algorithm byte used in block prefixes (blake3)
const HASH_BLAKE3: u8 = 0x1e;
/// Hash digest length in bytes
const HASH_LEN: u8 = 32;
/// Prefix version byte
const PREFIX_VERSION: u8 = 0x01;

impl Cid {
    /// Content-address a block of bytes.
    pub fn of(codec: Codec, data: &[u8]) -> Self {
        Self {
            codec,
            hash: *blake3::hash(data).as_bytes(),
        }
    }

    /// Self-describing 4-byte prefix: version, codec, hash algorithm,
    /// digest length. Sent alongside block data on the wire.
    pub fn prefix(&self) -> [u8; 4] {
        [PREFIX_VERSION, self.codec.byte(), HASH_BLAKE3, HASH_LEN]
    }

    /// Reconstruct and verify a CID from a wire prefix and block data.
    pub fn from_prefix(prefix: &[u8], data: &[u8]) -> Result<Self> {
        if prefix.len() != 4 || prefix[0] != PREFIX_VERSION {
            return Err(MarketError::InvalidBlock(
                "malformed block prefix".to_string(),
            ));
        }
        if prefix[2] != HASH_BLAKE3 || prefix[3] != HASH_LEN {
            return Err(MarketError::InvalidBlock(
                "unsupported hash in block prefix".to_string(),
            ));
        }
        let codec = Codec::from_byte(prefix[1])?;
        Ok(Self::of(codec, data))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.hash
    }

    /// Deterministic identifier for tests and fixtures.
    pub fn dummy(seed: u64) -> Self {
        Self {
            codec: Codec::Raw,
            hash: *blake3::hash(&seed.to_le_bytes()).as_bytes(),
        }
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{}", self.codec.byte(), hex::encode(self.hash))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_of_is_deterministic() {
        let a = Cid::of(Codec::Raw, b"hello");
        let b = Cid::of(Codec::Raw, b"hello");
        assert_eq!(a, b);
        assert_ne!(a, Cid::of(Codec::Raw, b"world"));
        assert_ne!(a, Cid::of(Codec::Node, b"hello"));
    }

    #[test]
    fn test_prefix_round_trip() {
        let cid = Cid::of(Codec::Node, b"some node bytes");
        let recovered = Cid::from_prefix(&cid.prefix(), b"some node bytes").unwrap();
        assert_eq!(cid, recovered);
    }

    #[test]
    fn test_prefix_rejects_unknown_codec() {
        let err = Cid::from_prefix(&[0x01, 0x99, 0x1e, 0x20], b"data");
        assert!(err.is_err());
    }

    #[test]
    fn test_dummy_cids_distinct() {
        assert_ne!(Cid::dummy(1), Cid::dummy(2));
        assert_eq!(Cid::dummy(7), Cid::dummy(7));
    }
}
