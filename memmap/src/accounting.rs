//! C5 — Accounting & Reservation.
//!
//! Every free-page counter update happens while holding the MemMap's single
//! spinlock (§5). This module is the only place that mutates the live
//! counters named in §3, so the invariants I1–I6 stay enforceable in one
//! spot.

use crate::node::Node;
use crate::node_mask::NodeMask;
use memmap_structs::NodeId;

/// Mirrors §3's node-availability bitmasks and the system-wide live
/// counters they're derived alongside.
pub struct Counters {
    pub free_pages: usize,
    pub free_low_pages: usize,
    pub kernel_pages: usize,
    pub reserved_low_pages: usize,
    pub valid_nodes: NodeMask,
    pub free_low_nodes: NodeMask,
    pub free_high_nodes: NodeMask,
    pub free_reserved_nodes: NodeMask,
}

impl Counters {
    pub fn new() -> Self {
        Counters {
            free_pages: 0,
            free_low_pages: 0,
            kernel_pages: 0,
            reserved_low_pages: 0,
            valid_nodes: NodeMask::empty(),
            free_low_nodes: NodeMask::empty(),
            free_high_nodes: NodeMask::empty(),
            free_reserved_nodes: NodeMask::empty(),
        }
    }

    /// Decrements the free-page counters for an allocation of `n` pages on
    /// `node`, updating the system-wide, per-node, and (if `is_low`)
    /// low-zone counters, then recomputing that node's availability bits.
    /// Must be called while holding the MemMap spinlock.
    pub fn decrement(&mut self, node: &mut Node, n: usize, is_low: bool, is_kernel: bool) {
        self.free_pages -= n;
        node.free_pages -= n;
        if is_low {
            self.free_low_pages -= n;
            node.free_low_pages -= n;
        }
        if is_kernel {
            self.kernel_pages += n;
            node.kernel_pages += n;
        }
        self.refresh_node_bits(node);
    }

    /// The mirror of [`Counters::decrement`], used on every free path.
    pub fn increment(&mut self, node: &mut Node, n: usize, is_low: bool, is_kernel: bool) {
        self.free_pages += n;
        node.free_pages += n;
        if is_low {
            self.free_low_pages += n;
            node.free_low_pages += n;
        }
        if is_kernel {
            self.kernel_pages -= n;
            node.kernel_pages -= n;
        }
        self.refresh_node_bits(node);
    }

    /// Recomputes `free_low_nodes`/`free_high_nodes` for `node` from its
    /// current counters (I4, I5).
    fn refresh_node_bits(&mut self, node: &Node) {
        self.free_low_nodes.assign(node.node_id, node.has_free_low());
        self.free_high_nodes.assign(node.node_id, node.has_free_high());
    }

    /// `unused_pages() = max(0, free_pages - reserved_low_pages)` (§4.5).
    pub fn unused_pages(&self) -> usize {
        self.free_pages.saturating_sub(self.reserved_low_pages)
    }

    /// Derived, not stored: `num_free_high_pages = max(0, free_pages -
    /// free_low_pages)` (§4.5).
    pub fn num_free_high_pages(&self) -> usize {
        self.free_pages.saturating_sub(self.free_low_pages)
    }

    /// Partitions `reserved_low_pages` proportionally across nodes by their
    /// share of system-wide low pages (§4.5's "Reserve proportion"), and
    /// recomputes the free-low/free-reserved bitmasks. Run at boot once
    /// `init_free_pages` is known, and again after every hot-add.
    pub fn reproportion_reserve(&mut self, nodes: &mut [Node], init_free_pages: usize, reserve_pct: usize, has_high_memory: bool) {
        if !has_high_memory {
            self.reserved_low_pages = 0;
            for node in nodes.iter_mut() {
                node.reserved_low_pages = 0;
            }
        } else {
            self.reserved_low_pages = (init_free_pages * reserve_pct) / 100;
            let system_total_low: usize = nodes.iter().map(|n| n.total_low_pages).sum();
            for node in nodes.iter_mut() {
                node.reserved_low_pages = if system_total_low == 0 {
                    0
                } else {
                    (self.reserved_low_pages * node.total_low_pages) / system_total_low
                };
            }
        }

        for node in nodes.iter_mut() {
            self.refresh_node_bits(node);
        }
        self.free_reserved_nodes = self.free_low_nodes;
    }

    /// Finalizes `valid_nodes` from the set of nodes that ended up with any
    /// managed pages at all (run once per boot/hot-add after C3).
    pub fn mark_valid(&mut self, node: NodeId) {
        self.valid_nodes.set(node);
    }
}
