//! `Node`: one per NUMA node, created at boot and augmented by hot-add (§3).

use buddy_api::BuddyHandle;
use memmap_structs::NodeId;

pub struct Node {
    pub node_id: NodeId,
    pub total_pages: usize,
    pub total_low_pages: usize,
    pub reserved_low_pages: usize,
    pub free_pages: usize,
    pub free_low_pages: usize,
    pub kernel_pages: usize,
    pub buddy_low: Option<BuddyHandle>,
    pub buddy_high: Option<BuddyHandle>,
}

impl Node {
    pub fn new(node_id: NodeId) -> Self {
        Node {
            node_id,
            total_pages: 0,
            total_low_pages: 0,
            reserved_low_pages: 0,
            free_pages: 0,
            free_low_pages: 0,
            kernel_pages: 0,
            buddy_low: None,
            buddy_high: None,
        }
    }

    /// Derived, not stored: the number of free high-zone pages on this node
    /// (§4.5's `num_free_high_pages`, applied per-node).
    pub fn free_high_pages(&self) -> usize {
        self.free_pages.saturating_sub(self.free_low_pages)
    }

    /// I4: this node's low zone is reported "free" only once it holds more
    /// free low pages than its reserve.
    pub fn has_free_low(&self) -> bool {
        self.free_low_pages > self.reserved_low_pages
    }

    /// I5: this node's high zone is reported "free" once any high pages
    /// remain free.
    pub fn has_free_high(&self) -> bool {
        self.free_high_pages() > 0
    }

    /// B1: the reserve is a floor below which only `LowReserved` may draw,
    /// not an absolute prohibition; `zone = LowReserved` may still draw from
    /// a node whose free-low pool is above the reserve.
    pub fn low_reserve_defended(&self, num_pages: usize) -> bool {
        // Resolves the §9 Open Question in favor of aggregate accounting:
        // the check compares the node's free-low pool against its reserve
        // once, regardless of `num_pages`, rather than per individual page.
        let _ = num_pages;
        self.free_low_pages <= self.reserved_low_pages
    }
}
