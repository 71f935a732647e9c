//! C3 — Pool Builder.
//!
//! For each node's surviving sub-ranges, splits at the 4GB boundary and
//! hands each piece to the appropriate per-`(node, zone)` buddy, reserving
//! the buddy's own metadata pages inside the range (§4.3).

use buddy_api::{BuddyMemspace, DynRangeInfo};
use memmap_structs::{Mpn, MpnRange, Zone};

use crate::config::{FOUR_GB_MPN, PAGE_SIZE, TWO_MB_IN_PAGES};
use crate::kernel_mapper::{KernelMapper, ScopedMapping};
use crate::node::Node;
use crate::range_ingest::NodeAvailRange;

/// How many overhead (metadata/unusable-remainder) pages `build_node_pools`
/// charged to `node.kernel_pages` during one call, split by zone. Boot uses
/// `finalize_node_counters` to derive `free_pages` from `node.kernel_pages`
/// directly, since the node starts at zero; hot-add instead needs this
/// report to add an incremental delta to a node that may already have
/// outstanding allocations (§4.8, see `finalize_node_counters`'s doc comment).
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolBuildReport {
    pub low_overhead_pages: usize,
    pub high_overhead_pages: usize,
}

/// Runs C3 for a single node: splits each of `avail`'s ranges at the 4GB
/// boundary, sizes and places each buddy's metadata, and calls
/// `buddy_create`/`buddy_hot_add` as appropriate. Ranges are drained out of
/// `avail`, which is logically dead once this returns.
pub fn build_node_pools(
    node: &mut Node,
    avail: &mut NodeAvailRange,
    buddy: &mut dyn BuddyMemspace,
    mapper: &mut dyn KernelMapper,
    num_colors: usize,
) -> PoolBuildReport {
    let ranges: alloc::vec::Vec<MpnRange> = avail.ranges_mut().drain(..).collect();
    let mut report = PoolBuildReport::default();

    for range in ranges {
        for (piece, is_low) in split_at_four_gb(range) {
            if piece.is_empty() {
                continue;
            }
            add_piece_to_buddy(node, piece, is_low, buddy, mapper, num_colors, &mut report);
        }
    }

    report
}

/// Splits `range` at the 4GB boundary into its low piece and high piece,
/// either of which may be empty if `range` lies wholly on one side.
fn split_at_four_gb(range: MpnRange) -> [(MpnRange, bool); 2] {
    let boundary = Mpn::new(FOUR_GB_MPN);
    if range.end().number() < boundary.number() {
        [(range, true), (MpnRange::empty(), false)]
    } else if range.start().number() >= boundary.number() {
        [(MpnRange::empty(), true), (range, false)]
    } else {
        let low = MpnRange::new(range.start(), Mpn::new(boundary.number() - 1));
        let high = MpnRange::new(boundary, range.end());
        [(low, true), (high, false)]
    }
}

fn add_piece_to_buddy(
    node: &mut Node,
    piece: MpnRange,
    is_low: bool,
    buddy: &mut dyn BuddyMemspace,
    mapper: &mut dyn KernelMapper,
    num_colors: usize,
    report: &mut PoolBuildReport,
) {
    let info = DynRangeInfo { range: piece, num_colors };
    let metadata_bytes = buddy.metadata_bytes_for_range(&info);
    let ovhd_pages = (metadata_bytes + PAGE_SIZE - 1) / PAGE_SIZE;

    if piece.size_in_pages() <= ovhd_pages {
        // The whole range is smaller than its own overhead: silently
        // skipped, counted entirely as overhead (§4.3).
        log::debug!(
            "Pool Builder: range {:?} ({} pages) is smaller than its own buddy overhead ({} pages); skipped",
            piece,
            piece.size_in_pages(),
            ovhd_pages
        );
        node.kernel_pages += piece.size_in_pages();
        if is_low {
            report.low_overhead_pages += piece.size_in_pages();
        } else {
            report.high_overhead_pages += piece.size_in_pages();
        }
        return;
    }

    // A buddy that needs no metadata at all (`ovhd_pages == 0`) has nothing
    // to place or map; hand it the whole piece directly rather than run it
    // through `place_metadata`, whose arithmetic assumes a non-empty
    // reservation.
    if ovhd_pages == 0 {
        attach_pieces(node, [piece, MpnRange::empty()], is_low, buddy, num_colors);
        return;
    }

    let metadata_range = place_metadata(piece, ovhd_pages);
    let (before, after) = piece.split_around(metadata_range.start(), metadata_range.end());

    let mapping = match ScopedMapping::new(mapper, metadata_range) {
        Ok(m) => m,
        Err(e) => {
            log::error!("Pool Builder: failed to map metadata for range {:?}: {}", piece, e);
            return;
        }
    };

    let attached_any = attach_pieces(node, [before, after], is_low, buddy, num_colors);

    if attached_any {
        mapping.keep();
        node.kernel_pages += ovhd_pages;
        if is_low {
            report.low_overhead_pages += ovhd_pages;
        } else {
            report.high_overhead_pages += ovhd_pages;
        }
    }
    // Else: both usable pieces were empty (the metadata consumed the whole
    // piece) or every attach attempt failed; the mapping guard unmaps on drop.
}

/// Hands each non-empty piece of `usable` to `node`'s buddy for `is_low`,
/// creating it on the first piece and hot-adding on any subsequent one.
/// Returns whether any piece was attached.
fn attach_pieces(node: &mut Node, usable: [MpnRange; 2], is_low: bool, buddy: &mut dyn BuddyMemspace, num_colors: usize) -> bool {
    let mut attached_any = false;
    let buddy_handle_slot = if is_low { &mut node.buddy_low } else { &mut node.buddy_high };
    for piece in usable {
        if piece.is_empty() {
            continue;
        }
        let info = DynRangeInfo { range: piece, num_colors };
        match buddy_handle_slot {
            None => {
                let handle = buddy.create(info, piece.start());
                *buddy_handle_slot = Some(handle);
            }
            Some(handle) => {
                if let Err(e) = buddy.hot_add_range(*handle, info, piece.start()) {
                    log::error!("Pool Builder: buddy_hot_add failed for range {:?}: {:?}", piece, e);
                    continue;
                }
            }
        }
        attached_any = true;
    }
    attached_any
}

/// Chooses where inside `piece` the buddy's `ovhd_pages` of metadata live:
/// on a 2MB boundary if the overhead is large enough to warrant it,
/// otherwise at the tail of the range (§4.3 step 2).
fn place_metadata(piece: MpnRange, ovhd_pages: usize) -> MpnRange {
    if ovhd_pages >= TWO_MB_IN_PAGES {
        let ideal = piece.end().number() + 1 - ovhd_pages;
        let rounded = (ideal / TWO_MB_IN_PAGES) * TWO_MB_IN_PAGES;
        if rounded >= piece.start().number() {
            return MpnRange::new(Mpn::new(rounded), Mpn::new(rounded + ovhd_pages - 1));
        }
    }
    let start = piece.end().number() + 1 - ovhd_pages;
    MpnRange::new(Mpn::new(start), piece.end())
}

/// Finalizes the per-node counters once every range has been added to its
/// buddies (§4.3's "Counter initialization"): totals, free counters, and
/// availability bitmasks.
///
/// Boot-only: this derives `free_pages`/`free_low_pages` by assuming
/// `node.kernel_pages` is the *entire* difference between `total` and what's
/// free, which only holds the first time a node is built, before any
/// allocation has touched it. Reusing it against a node that already has
/// outstanding allocations would silently "free" them in the counters
/// (P1). Hot-add uses [`apply_hot_add_report`] instead.
pub fn finalize_node_counters(node: &mut Node, total_low: usize, total: usize) {
    node.total_low_pages = total_low;
    node.total_pages = total;
    node.free_pages = total.saturating_sub(node.kernel_pages);
    node.free_low_pages = total_low.saturating_sub(core::cmp::min(node.kernel_pages, total_low));
}

/// Folds a hot-added range's totals into a node that may already be serving
/// allocations (§4.8 step 4). Unlike `finalize_node_counters`, this adds the
/// incremental free delta — `added_total`/`added_low` minus the overhead
/// `report` says this call actually consumed — instead of recomputing free
/// pages from the node's grand totals, so pages already allocated before the
/// hot-add stay allocated.
pub fn apply_hot_add_report(node: &mut Node, report: PoolBuildReport, added_total: usize, added_low: usize) {
    let total_overhead = report.low_overhead_pages + report.high_overhead_pages;
    node.total_pages += added_total;
    node.total_low_pages += added_low;
    node.free_pages += added_total.saturating_sub(total_overhead);
    node.free_low_pages += added_low.saturating_sub(report.low_overhead_pages);
}
