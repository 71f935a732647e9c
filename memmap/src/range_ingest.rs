//! C1 — Range Ingest.
//!
//! Reconciles the BIOS memory map with the NUMA affinity table, runs the
//! memory self-test, rejects uncachable/evil pages, and yields one
//! [`NodeAvailRange`] per node containing only valid, contiguous sub-ranges
//! (§4.1).

extern crate alloc;

use alloc::vec::Vec;
use memmap_structs::{Mpn, MpnRange, NodeId};
use mtrr::CachabilityOracle;
use numa_topology::{BiosMemoryRange, NumaTopology};

use crate::config::EVIL_MPN;
use crate::error::MemMapError;

/// A bounded list of contiguous sub-ranges accepted for one node, and their
/// cumulative page count (§3). Created by C1, mutated by C2 (pages removed
/// from the tail), consumed by C3, then logically dead.
#[derive(Debug, Default, Clone)]
pub struct NodeAvailRange {
    /// Sorted ascending by start MPN, non-overlapping.
    pub(crate) ranges: Vec<MpnRange>,
}

impl NodeAvailRange {
    pub fn new() -> Self {
        NodeAvailRange { ranges: Vec::new() }
    }

    /// Appends a range known to come after every range already present.
    fn push_back(&mut self, range: MpnRange) {
        if !range.is_empty() {
            debug_assert!(
                self.ranges.last().map_or(true, |last| range.start() > last.end()),
                "NodeAvailRange ranges must be appended in increasing order"
            );
            self.ranges.push(range);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.iter().all(MpnRange::is_empty) || self.ranges.is_empty()
    }

    pub fn total_pages(&self) -> usize {
        self.ranges.iter().map(MpnRange::size_in_pages).sum()
    }

    pub fn ranges(&self) -> &[MpnRange] {
        &self.ranges
    }

    /// Total pages strictly below `four_gb_mpn`, for sizing a node's
    /// `total_low_pages` before its ranges are handed to the pool builder.
    pub fn total_low_pages(&self, four_gb_mpn: usize) -> usize {
        let boundary = Mpn::new(four_gb_mpn);
        self.ranges
            .iter()
            .filter_map(|r| r.intersection(&MpnRange::new(Mpn::new(0), boundary.checked_sub(1).unwrap_or(Mpn::new(0)))))
            .map(MpnRange::size_in_pages)
            .sum()
    }

    pub(crate) fn ranges_mut(&mut self) -> &mut Vec<MpnRange> {
        &mut self.ranges
    }
}

/// Result of ingesting the BIOS/NUMA maps: one [`NodeAvailRange`] per node,
/// plus the running self-test statistics (§3's `total_bios_pages`,
/// `discarded_pages`).
pub struct IngestResult {
    pub per_node: Vec<NodeAvailRange>,
    pub total_bios_pages: usize,
    pub discarded_pages: usize,
}

/// The memory self-test collaborator (§4.1): touches physical memory via the
/// (out-of-scope, §1) kernel virtual-address mapper and returns the last
/// known-good MPN of a range. A rewrite that has no real hardware to test
/// (e.g. this crate's own test suite) uses [`TrustAllPages`].
pub trait MemorySelfTest {
    /// Tests `range`, writing and reading back a rotating pattern at every
    /// word of every page if `check_every_word` is set or the range is
    /// ≤ 1MB in size; otherwise probes one word per megabyte and narrows
    /// page-by-page once a failure is detected. Returns the last good MPN;
    /// anything beyond it in the range is unusable.
    fn test_range(&mut self, range: MpnRange, check_every_word: bool) -> Mpn;
}

/// A self-test stand-in that trusts every page in every range. Used when no
/// real memory-probing collaborator is wired up (UMA/test configurations).
pub struct TrustAllPages;

impl MemorySelfTest for TrustAllPages {
    fn test_range(&mut self, range: MpnRange, _check_every_word: bool) -> Mpn {
        range.end()
    }
}

/// Runs C1: for each node, intersects every BIOS range with that node's NUMA
/// ranges, memory-self-tests and MTRR/evil-page-filters what remains, and
/// coalesces the survivors into [`NodeAvailRange`]s.
///
/// Returns [`MemMapError::InvalidMemMap`] if an MPN was BIOS-reported but
/// claimed by no NUMA range (SRAT/e820 mismatch), or if any node ends up
/// with zero accepted pages.
pub fn ingest(
    bios_ranges: &[BiosMemoryRange],
    topology: &dyn NumaTopology,
    mtrr: &dyn CachabilityOracle,
    self_test: &mut dyn MemorySelfTest,
    check_every_word: bool,
) -> Result<IngestResult, MemMapError> {
    let num_nodes = topology.num_nodes();
    let mut per_node: Vec<NodeAvailRange> = (0..num_nodes).map(|_| NodeAvailRange::new()).collect();
    let mut total_bios_pages = 0usize;
    let mut discarded_pages = 0usize;

    for bios_range in bios_ranges {
        let range = bios_range.as_mpn_range();
        if range.is_empty() {
            continue;
        }
        total_bios_pages += range.size_in_pages();

        let mut claimed_anywhere = false;
        for node_idx in 0..num_nodes {
            let node = NodeId(node_idx);
            let mut intersections = Vec::new();
            topology.mem_range_intersection(node, range, &mut intersections);
            if intersections.is_empty() {
                continue;
            }
            claimed_anywhere = true;

            for intersection in intersections {
                test_and_coalesce(&mut per_node[node_idx], intersection, mtrr, self_test, check_every_word, &mut discarded_pages);
            }
        }

        if !claimed_anywhere {
            log::error!(
                "Range Ingest: BIOS range {:?} was not claimed by any NUMA node; SRAT/e820 mismatch",
                range
            );
            return Err(MemMapError::InvalidMemMap);
        }
    }

    for (node_idx, avail) in per_node.iter().enumerate() {
        if avail.total_pages() == 0 {
            log::error!("Range Ingest: node {} ended up with zero valid pages", node_idx);
            return Err(MemMapError::InvalidMemMap);
        }
    }

    let managed_pages: usize = per_node.iter().map(NodeAvailRange::total_pages).sum();
    debug_assert_eq!(total_bios_pages, discarded_pages + managed_pages);

    Ok(IngestResult { per_node, total_bios_pages, discarded_pages })
}

/// Memory-self-tests `intersection` and coalesces whatever survives into
/// `avail`. Shared by the boot-time [`ingest`] and hot-add's single-range
/// variant, [`ingest_single_range`].
fn test_and_coalesce(
    avail: &mut NodeAvailRange,
    intersection: MpnRange,
    mtrr: &dyn CachabilityOracle,
    self_test: &mut dyn MemorySelfTest,
    check_every_word: bool,
    discarded_pages: &mut usize,
) {
    let force_full_test = check_every_word || intersection.size_in_pages() * crate::config::PAGE_SIZE <= 1024 * 1024;
    let last_good = self_test.test_range(intersection, force_full_test);

    let tested = if last_good < intersection.start() {
        *discarded_pages += intersection.size_in_pages();
        return;
    } else if last_good < intersection.end() {
        let lost = intersection.end().number() - last_good.number();
        *discarded_pages += lost;
        MpnRange::new(intersection.start(), last_good)
    } else {
        intersection
    };

    coalesce_accepted(avail, tested, mtrr, discarded_pages);
}

/// Runs C1 against a single already-NUMA-intersected range, for hot-add
/// (§4.8 step 3), which only ever deals with one node's one new range
/// rather than the whole BIOS/NUMA map.
pub fn ingest_single_range(
    avail: &mut NodeAvailRange,
    range: MpnRange,
    mtrr: &dyn CachabilityOracle,
    self_test: &mut dyn MemorySelfTest,
    check_every_word: bool,
) -> usize {
    let mut discarded_pages = 0usize;
    test_and_coalesce(avail, range, mtrr, self_test, check_every_word, &mut discarded_pages);
    discarded_pages
}

/// Walks `accepted` (already self-test-passed) MPN by MPN, closing the
/// current coalesced sub-range whenever an MPN fails the MTRR/evil-page
/// check, and appends each surviving sub-range to `avail`.
fn coalesce_accepted(
    avail: &mut NodeAvailRange,
    accepted: MpnRange,
    mtrr: &dyn CachabilityOracle,
    discarded_pages: &mut usize,
) {
    let mut run_start: Option<Mpn> = None;
    let mut last_mpn = accepted.start();

    for mpn in accepted.into_iter() {
        last_mpn = mpn;
        let is_evil = mpn.number() == EVIL_MPN;
        let is_cachable = mtrr.is_wb_cached_mpn(mpn);

        if is_evil || !is_cachable {
            // Close whatever run we were building, just before this MPN.
            if let Some(start) = run_start.take() {
                let prev = Mpn::new(mpn.number() - 1);
                avail.push_back(MpnRange::new(start, prev));
            }
            if !is_evil {
                *discarded_pages += 1;
            }
            continue;
        }

        if run_start.is_none() {
            run_start = Some(mpn);
        }
    }
    if let Some(start) = run_start.take() {
        avail.push_back(MpnRange::new(start, last_mpn));
    }
}
