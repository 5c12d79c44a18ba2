//! Cluster-wide blocks gating operations.
//!
//! Blocks are installed into the cluster state to gate operations while the
//! node is not ready to serve them. The only block the core installs itself
//! is [`NO_RING_BLOCK`], present from startup until the storage ring signals
//! readiness; it disables metadata persistence while set.

/// A cluster-wide block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterBlock {
    /// Stable block identifier.
    pub id: u32,

    /// Human-readable reason for the block.
    pub description: &'static str,

    /// Whether operations hitting this block may be retried.
    pub retryable: bool,

    /// Whether this block disables cluster-state persistence.
    pub disable_state_persistence: bool,
}

/// Installed at startup; gates metadata persistence until the storage ring
/// is ready.
pub const NO_RING_BLOCK: ClusterBlock = ClusterBlock {
    id: 2,
    description: "ring not ready",
    retryable: true,
    disable_state_persistence: true,
};

/// The set of global blocks carried by a cluster state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterBlocks {
    global: Vec<ClusterBlock>,
}

impl ClusterBlocks {
    /// Start building a block set.
    pub fn builder() -> ClusterBlocksBuilder {
        ClusterBlocksBuilder::default()
    }

    /// All global blocks, in insertion order.
    pub fn global(&self) -> &[ClusterBlock] {
        &self.global
    }

    /// Whether a global block with the given id is set.
    pub fn has_global(&self, id: u32) -> bool {
        self.global.iter().any(|b| b.id == id)
    }

    /// True when any global block disables cluster-state persistence.
    pub fn disable_state_persistence(&self) -> bool {
        self.global.iter().any(|b| b.disable_state_persistence)
    }
}

/// Builder for [`ClusterBlocks`]; also used for the initial blocks fixed at
/// service start.
#[derive(Debug, Clone, Default)]
pub struct ClusterBlocksBuilder {
    global: Vec<ClusterBlock>,
}

impl ClusterBlocksBuilder {
    /// Seed the builder from an existing block set.
    pub fn from_blocks(blocks: &ClusterBlocks) -> Self {
        Self {
            global: blocks.global.clone(),
        }
    }

    /// Add a global block; adding the same id twice is a no-op.
    pub fn add_global_block(&mut self, block: ClusterBlock) -> &mut Self {
        if !self.global.iter().any(|b| b.id == block.id) {
            self.global.push(block);
        }
        self
    }

    /// Remove a global block by id.
    pub fn remove_global_block(&mut self, id: u32) -> &mut Self {
        self.global.retain(|b| b.id != id);
        self
    }

    /// Build the block set.
    pub fn build(&self) -> ClusterBlocks {
        ClusterBlocks {
            global: self.global.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BLOCK: ClusterBlock = ClusterBlock {
        id: 7,
        description: "test",
        retryable: false,
        disable_state_persistence: false,
    };

    #[test]
    fn test_empty_blocks_allow_persistence() {
        let blocks = ClusterBlocks::default();
        assert!(!blocks.disable_state_persistence());
        assert!(blocks.global().is_empty());
    }

    #[test]
    fn test_no_ring_block_disables_persistence() {
        let blocks = ClusterBlocks::builder()
            .add_global_block(NO_RING_BLOCK)
            .build();
        assert!(blocks.has_global(NO_RING_BLOCK.id));
        assert!(blocks.disable_state_persistence());
    }

    #[test]
    fn test_add_remove_global_block() {
        let mut builder = ClusterBlocks::builder();
        builder.add_global_block(NO_RING_BLOCK).add_global_block(TEST_BLOCK);

        // Duplicate add is a no-op
        builder.add_global_block(TEST_BLOCK);
        assert_eq!(builder.build().global().len(), 2);

        builder.remove_global_block(NO_RING_BLOCK.id);
        let blocks = builder.build();
        assert!(!blocks.has_global(NO_RING_BLOCK.id));
        assert!(blocks.has_global(TEST_BLOCK.id));
        assert!(!blocks.disable_state_persistence());
    }
}
