//! The NUMA topology library, consumed by the MemMap but owned elsewhere
//! (§1's "external collaborators", §6's "Inputs consumed from the NUMA
//! library"). This crate defines only the contract the MemMap depends on,
//! plus a trivial single-node implementation usable on UMA systems and in
//! tests, keeping architecture-specific collaborators behind a small trait
//! with a default/no-op implementation for configurations that don't need
//! the real thing.

#![no_std]

extern crate alloc;

use alloc::vec::Vec;
use memmap_structs::{Mpn, MpnRange, NodeId};

/// A BIOS-reported physical memory range, as handed to the MemMap by the
/// boot loader collaborator (§6).
#[derive(Debug, Clone, Copy)]
pub struct BiosMemoryRange {
    pub start_mpn: Mpn,
    pub end_mpn: Mpn,
}

impl BiosMemoryRange {
    pub fn as_mpn_range(&self) -> MpnRange {
        MpnRange::new(self.start_mpn, self.end_mpn)
    }
}

/// The NUMA topology contract range ingest (C1) is built against.
///
/// A UMA system satisfies this trait trivially by reporting one node whose
/// range covers all of physical memory (see [`UmaTopology`]).
pub trait NumaTopology {
    /// The number of NUMA nodes in the system.
    fn num_nodes(&self) -> usize;

    /// The node that owns the given MPN, if any NUMA range claims it.
    fn mpn_to_node(&self, mpn: Mpn) -> Option<NodeId>;

    /// Intersects `range` with the given node's NUMA-reported ranges,
    /// appending each non-empty intersection to `out`.
    fn mem_range_intersection(&self, node: NodeId, range: MpnRange, out: &mut Vec<MpnRange>);
}

/// A trivial single-node topology: every MPN belongs to node 0. Used for UMA
/// boot configurations and as a default in tests.
pub struct UmaTopology;

impl NumaTopology for UmaTopology {
    fn num_nodes(&self) -> usize {
        1
    }

    fn mpn_to_node(&self, _mpn: Mpn) -> Option<NodeId> {
        Some(NodeId(0))
    }

    fn mem_range_intersection(&self, node: NodeId, range: MpnRange, out: &mut Vec<MpnRange>) {
        if node.index() == 0 && !range.is_empty() {
            out.push(range);
        }
    }
}

/// A NUMA topology built from an explicit, sorted table of `(node, range)`
/// pairs, for multi-node test configurations and for systems whose SRAT has
/// already been parsed into a flat table by the boot-time collaborator.
pub struct TableTopology {
    num_nodes: usize,
    ranges: Vec<(NodeId, MpnRange)>,
}

impl TableTopology {
    pub fn new(num_nodes: usize, ranges: Vec<(NodeId, MpnRange)>) -> Self {
        TableTopology { num_nodes, ranges }
    }
}

impl NumaTopology for TableTopology {
    fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    fn mpn_to_node(&self, mpn: Mpn) -> Option<NodeId> {
        self.ranges
            .iter()
            .find(|(_, range)| range.contains(mpn))
            .map(|(node, _)| *node)
    }

    fn mem_range_intersection(&self, node: NodeId, range: MpnRange, out: &mut Vec<MpnRange>) {
        for (n, numa_range) in &self.ranges {
            if *n == node {
                if let Some(overlap) = range.intersection(numa_range) {
                    out.push(overlap);
                }
            }
        }
    }
}
