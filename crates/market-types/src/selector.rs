use serde::{Deserialize, Serialize};

/// Declarative traversal over a content-addressed DAG describing which
/// blocks of a payload are of interest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Selector {
    /// Visit every block reachable from the root ("everything").
    All,
    /// Visit the root and only its first `n` links. Supports partial
    /// retrievals of the leading bytes of a payload.
    First(u64),
}

impl Selector {
    /// How many of a node's links the traversal descends into.
    pub fn link_budget(&self, total_links: usize) -> usize {
        match self {
            Selector::All => total_links,
            Selector::First(n) => (*n as usize).min(total_links),
        }
    }
}

impl Default for Selector {
    fn default() -> Self {
        Selector::All
    }
}
