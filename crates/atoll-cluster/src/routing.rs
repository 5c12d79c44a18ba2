//! Minimal routing table carried through cluster states.
//!
//! The coordination core never interprets routing content; it carries the
//! table across state transitions and exposes change detection to listeners.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Routing for a single index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRoutingTable {
    /// Index name.
    pub index: String,

    /// Number of shards the index routes to.
    pub shard_count: u32,
}

/// Versioned map of index name to routing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    version: u64,
    indices: BTreeMap<String, IndexRoutingTable>,
}

impl RoutingTable {
    /// Routing-table version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// All index routing entries, name-ordered.
    pub fn indices(&self) -> &BTreeMap<String, IndexRoutingTable> {
        &self.indices
    }

    /// Whether the table routes the given index.
    pub fn has_index(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Return a copy with the given index routed and the version bumped.
    pub fn with_index(&self, routing: IndexRoutingTable) -> Self {
        let mut indices = self.indices.clone();
        indices.insert(routing.index.clone(), routing);
        Self {
            version: self.version + 1,
            indices,
        }
    }

    /// Return a copy with the given index removed and the version bumped.
    pub fn without_index(&self, name: &str) -> Self {
        let mut indices = self.indices.clone();
        indices.remove(name);
        Self {
            version: self.version + 1,
            indices,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_and_without_index() {
        let table = RoutingTable::default();
        assert_eq!(table.version(), 0);

        let routed = table.with_index(IndexRoutingTable {
            index: "logs".to_string(),
            shard_count: 4,
        });
        assert_eq!(routed.version(), 1);
        assert!(routed.has_index("logs"));
        assert!(!table.has_index("logs"));

        let removed = routed.without_index("logs");
        assert_eq!(removed.version(), 2);
        assert!(!removed.has_index("logs"));
    }
}
