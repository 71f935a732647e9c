//! C7 — Early Allocator.
//!
//! Services single-page allocations in the window between range ingest
//! (C1) and buddy construction (C3), by peeling MPNs off the head of the
//! first `NodeAvailRange` that satisfies the zone constraint. Disabled for
//! good once the buddies exist (§4.7).

use memmap_structs::{Mpn, Zone};

use crate::config::FOUR_GB_MPN;
use crate::error::MemMapError;
use crate::range_ingest::NodeAvailRange;

/// Services early single-page allocations, tracking which MPNs it handed
/// out so that a later free attempt can be asserted against (freeing an
/// early-allocated page is a programming error per §4.7).
pub struct EarlyAllocator {
    disabled: bool,
}

impl EarlyAllocator {
    pub fn new() -> Self {
        EarlyAllocator { disabled: false }
    }

    /// Removes and returns the head MPN of the first non-empty range (over
    /// every node, in node order) whose MPN satisfies `zone`. Charges the
    /// page to `kernel_use_pages` via the returned MPN; the caller is
    /// responsible for folding that into `MemMap`'s ingest-stats counter.
    pub fn alloc_one_page(&mut self, per_node: &mut [NodeAvailRange], zone: Zone) -> Result<Mpn, MemMapError> {
        if self.disabled {
            return Err(MemMapError::BadParam);
        }

        for avail in per_node.iter_mut() {
            let ranges = avail.ranges_mut();
            for idx in 0..ranges.len() {
                let range = ranges[idx];
                if range.is_empty() {
                    continue;
                }
                let head = range.start();
                if matches!(zone, Zone::Low | Zone::LowReserved) && !head.is_low(FOUR_GB_MPN) {
                    continue;
                }
                let rest = memmap_structs::MpnRange::new(head + 1, range.end());
                if rest.is_empty() {
                    ranges.remove(idx);
                } else {
                    ranges[idx] = rest;
                }
                return Ok(head);
            }
        }

        log::warn!("Early Allocator: no page available for zone {:?}", zone);
        Err(MemMapError::OutOfMemory)
    }

    /// Called once C3 has built real buddies; every later call to
    /// `alloc_one_page` fails, and [`EarlyAllocator::assert_not_early`]
    /// becomes the contract for frees.
    pub fn disable(&mut self) {
        self.disabled = true;
    }

    /// Asserts the programming-error contract of §4.7: freeing a page
    /// allocated before the buddies existed is never valid once the early
    /// allocator has been disabled.
    pub fn assert_not_early(&self) {
        debug_assert!(self.disabled, "attempted to free a page while the early allocator is still active");
    }
}
