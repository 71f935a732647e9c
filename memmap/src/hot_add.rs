//! C8 — Hot-Add.
//!
//! Wraps C1 (range ingest) + C2 (critical reservation) + C3 (pool builder)
//! to fold a newly-presented physical range into an already-running
//! `MemMap`. Never unwound: an intermediate failure just leaves the new
//! range unmanaged rather than rolling back prior steps (§4.8).

extern crate alloc;

use alloc::vec::Vec;
use buddy_api::{BuddyMemspace, CriticalConsumer};
use memmap_structs::{MpnRange, NodeId};
use mtrr::CachabilityOracle;

use crate::accounting::Counters;
use crate::config::{FOUR_GB_MPN, RESERVE_LOWMEM_PCT};
use crate::error::MemMapError;
use crate::kernel_mapper::KernelMapper;
use crate::node::Node;
use crate::pool_builder;
use crate::range_ingest::{self, MemorySelfTest, NodeAvailRange};

/// Every previously-accepted range, used only to detect overlap with a
/// newly-presented hot-add range (§4.8 step 1).
#[derive(Default)]
pub struct ManagedRanges {
    ranges: Vec<MpnRange>,
}

impl ManagedRanges {
    pub fn new() -> Self {
        ManagedRanges { ranges: Vec::new() }
    }

    fn overlaps(&self, range: MpnRange) -> bool {
        self.ranges.iter().any(|existing| existing.intersection(&range).is_some())
    }

    fn record(&mut self, range: MpnRange) {
        self.ranges.push(range);
    }

    /// Seeds this map with the ranges `MemMap::initialize` accepted at boot,
    /// so a later hot-add can't claim to be adding memory that's already
    /// managed (§4.8 step 1 applies just as much to the boot-time map as to
    /// an earlier hot-add).
    pub(crate) fn record_initial(&mut self, range: MpnRange) {
        self.ranges.push(range);
    }
}

/// The ingest-stats deltas a hot-add produced (§3's `total_bios_pages`,
/// `discarded_pages`, `kernel_use_pages`, `managed_pages`), folded into the
/// `MemMap`'s running totals by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct HotAddStats {
    pub bios_pages: usize,
    pub discarded_pages: usize,
    pub kernel_use_pages: usize,
    pub managed_pages: usize,
}

/// Runs C8 against a single new `(start, end)` range that NUMA topology
/// has already placed on `node_id`. Must be called with `hot_mem_add_lock`
/// held across the whole call and `memmap_lock` held for at least step 4
/// (§5's lock rank).
pub fn hot_add_range(
    managed: &mut ManagedRanges,
    new_range: MpnRange,
    node_id: NodeId,
    mtrr: &dyn CachabilityOracle,
    self_test: &mut dyn MemorySelfTest,
    check_every_word: bool,
    consumers: &mut [&mut dyn CriticalConsumer],
    nodes: &mut [Node],
    counters: &mut Counters,
    buddy: &mut dyn BuddyMemspace,
    mapper: &mut dyn KernelMapper,
    num_colors: usize,
    init_free_pages: usize,
) -> Result<HotAddStats, MemMapError> {
    if managed.overlaps(new_range) {
        log::error!("Hot-Add: rejected {:?}, overlaps an existing managed range", new_range);
        return Err(MemMapError::BadParam);
    }
    managed.record(new_range);

    let bios_pages = new_range.size_in_pages();

    // Step 3: C1 against just this range, then C2 with is_hotadd=true.
    let mut avail = NodeAvailRange::new();
    let discarded_pages = range_ingest::ingest_single_range(&mut avail, new_range, mtrr, self_test, check_every_word);
    if avail.is_empty() {
        log::warn!("Hot-Add: {:?} yielded no usable pages after self-test/MTRR filtering", new_range);
        return Ok(HotAddStats { bios_pages, discarded_pages, kernel_use_pages: 0, managed_pages: 0 });
    }

    let mut per_node_slot: Vec<NodeAvailRange> = (0..nodes.len()).map(|_| NodeAvailRange::new()).collect();
    per_node_slot[node_id.index()] = avail;
    let mut consumer_refs: Vec<&mut dyn CriticalConsumer> = consumers.iter_mut().map(|c| &mut **c).collect();
    let kernel_use_pages = crate::critical_reservation::reserve_critical_consumers(&mut per_node_slot, &mut consumer_refs, true)?;

    // Step 4: attach the surviving pieces to the existing buddies and
    // update every counter they feed. `added_total`/`added_low` reflect
    // what C1+C2 actually left for C3, not the raw hot-add request size —
    // pages lost to the self-test or claimed by a critical consumer were
    // never handed to a buddy and must not inflate `total_pages`.
    let added_total = per_node_slot[node_id.index()].total_pages();
    let added_low = per_node_slot[node_id.index()].total_low_pages(FOUR_GB_MPN);

    let node = &mut nodes[node_id.index()];
    let before = (node.total_pages, node.total_low_pages, node.free_pages, node.free_low_pages, node.kernel_pages);

    let report = pool_builder::build_node_pools(node, &mut per_node_slot[node_id.index()], buddy, mapper, num_colors);
    pool_builder::apply_hot_add_report(node, report, added_total, added_low);

    counters.free_pages += node.free_pages.saturating_sub(before.2);
    counters.free_low_pages += node.free_low_pages.saturating_sub(before.3);
    counters.kernel_pages += node.kernel_pages.saturating_sub(before.4);
    counters.mark_valid(node_id);

    // Recomputed from the post-add totals, not the pre-add snapshot: a
    // hot-add that introduces the system's first high-zone pages must turn
    // the low-memory reserve on, not leave it pinned to whatever it was
    // before this range arrived.
    let system_total: usize = nodes.iter().map(|n| n.total_pages).sum();
    let system_total_low: usize = nodes.iter().map(|n| n.total_low_pages).sum();
    let has_high_memory = system_total > system_total_low;
    counters.reproportion_reserve(nodes, init_free_pages, RESERVE_LOWMEM_PCT, has_high_memory);

    log::debug!("Hot-Add: added {} pages ({} low) to node {}", added_total, added_low, node_id.index());
    Ok(HotAddStats { bios_pages, discarded_pages, kernel_use_pages, managed_pages: added_total })
}
