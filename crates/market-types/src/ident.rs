use serde::{Deserialize, Serialize};
use std::fmt;

/// Peer identifier on the deal network.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId([u8; 32]);

impl PeerId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Deterministic identifier for tests and fixtures.
    pub fn dummy(seed: u64) -> Self {
        Self(*blake3::hash(&seed.to_le_bytes()).as_bytes())
    }
}

impl fmt::Display for PeerId {
    // first 8 bytes keep log lines readable
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

/// Account or actor address: wallets, miner workers, payment channels.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; 32]);

impl Address {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn dummy(seed: u64) -> Self {
        Self(*blake3::hash(&seed.to_le_bytes()).as_bytes())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

/// Opaque signature bytes. Verification is the chain node's concern; the
/// protocol core only moves these around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn dummy(seed: u64) -> Self {
        Self(blake3::hash(&seed.to_le_bytes()).as_bytes().to_vec())
    }
}

/// Opaque token identifying a chain tip, consulted for signature and
/// address lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainToken(pub Vec<u8>);

impl ChainToken {
    pub fn genesis() -> Self {
        Self(Vec::new())
    }
}

/// Exit code of an on-chain message execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitCode(pub u8);

impl ExitCode {
    pub const OK: ExitCode = ExitCode(0);

    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_display() {
        let peer = PeerId::from_bytes([0xab; 32]);
        assert_eq!(peer.to_string(), "abababababababab");
    }

    #[test]
    fn test_dummy_identifiers_distinct() {
        assert_ne!(PeerId::dummy(1), PeerId::dummy(2));
        assert_ne!(Address::dummy(1), Address::dummy(2));
    }

    #[test]
    fn test_exit_code() {
        assert!(ExitCode::OK.is_ok());
        assert!(!ExitCode(19).is_ok());
        assert_eq!(ExitCode(19).to_string(), "19");
    }
}
