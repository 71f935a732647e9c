//! C2 — Critical Reservation.
//!
//! Before any buddy exists, lets each compile-time-registered
//! [`CriticalConsumer`] claim a contiguous run of MPNs proportional to total
//! managed RAM, carved from the tail of the highest node's ranges (§4.2).

use buddy_api::CriticalConsumer;
use memmap_structs::{Mpn, MpnRange};

use crate::config::TWO_MB_IN_PAGES;
use crate::error::MemMapError;
use crate::range_ingest::NodeAvailRange;

/// Runs C2 against every registered consumer, in registration order.
///
/// `is_hotadd` is forwarded to each consumer so it can distinguish an
/// initial-boot reservation from one triggered by hot-add growth (§4.8).
pub fn reserve_critical_consumers(
    per_node: &mut [NodeAvailRange],
    consumers: &mut [&mut dyn CriticalConsumer],
    is_hotadd: bool,
) -> Result<usize, MemMapError> {
    let (min_mpn, max_mpn) = bounds(per_node).ok_or(MemMapError::InvalidMemMap)?;
    let mut reserved_pages = 0usize;

    for consumer in consumers.iter_mut() {
        let pages_needed = consumer.compute_pages(min_mpn, max_mpn, is_hotadd) as usize;
        if pages_needed == 0 {
            continue;
        }

        let wants_alignment = pages_needed >= TWO_MB_IN_PAGES;
        let first_mpn = place_consumer(per_node, pages_needed, wants_alignment)
            .or_else(|| {
                if wants_alignment {
                    log::debug!(
                        "Critical Reservation: '{}' could not be 2MB-aligned, retrying without alignment",
                        consumer.name()
                    );
                    place_consumer(per_node, pages_needed, false)
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                log::error!(
                    "Critical Reservation: could not place {} pages for consumer '{}'",
                    pages_needed,
                    consumer.name()
                );
                MemMapError::InvalidMemMap
            })?;

        consumer
            .assign(min_mpn, max_mpn, is_hotadd, pages_needed as u32, first_mpn)
            .map_err(|e| {
                log::error!("Critical Reservation: consumer '{}' rejected its assignment: {}", consumer.name(), e);
                MemMapError::InvalidMemMap
            })?;
        reserved_pages += pages_needed;
    }

    Ok(reserved_pages)
}

fn bounds(per_node: &[NodeAvailRange]) -> Option<(Mpn, Mpn)> {
    let mut min_mpn: Option<Mpn> = None;
    let mut max_mpn: Option<Mpn> = None;
    for avail in per_node {
        for range in avail.ranges() {
            min_mpn = Some(min_mpn.map_or(range.start(), |m| core::cmp::min(m, range.start())));
            max_mpn = Some(max_mpn.map_or(range.end(), |m| core::cmp::max(m, range.end())));
        }
    }
    min_mpn.zip(max_mpn)
}

/// Searches nodes from highest to lowest index, and within each node's
/// ranges from last to first, preferring MPNs at the end of each range
/// (§4.2's placement policy). Returns the chosen first MPN, having already
/// removed the reserved pages from `per_node`.
fn place_consumer(per_node: &mut [NodeAvailRange], num_pages: usize, aligned: bool) -> Option<Mpn> {
    for node_idx in (0..per_node.len()).rev() {
        let avail = &mut per_node[node_idx];
        for range_idx in (0..avail.ranges().len()).rev() {
            let range = avail.ranges()[range_idx];
            if range.size_in_pages() < num_pages {
                continue;
            }

            let candidate_start = if aligned {
                let ideal = range.end().number() + 1 - num_pages;
                let rounded = round_down(ideal, TWO_MB_IN_PAGES);
                if rounded < range.start().number() {
                    continue;
                }
                Mpn::new(rounded)
            } else {
                Mpn::new(range.end().number() + 1 - num_pages)
            };
            let candidate_end = Mpn::new(candidate_start.number() + num_pages - 1);

            let (before, after) = range.split_around(candidate_start, candidate_end);
            let ranges = avail.ranges_mut();
            ranges.remove(range_idx);
            let mut insert_at = range_idx;
            if !before.is_empty() {
                ranges.insert(insert_at, before);
                insert_at += 1;
            }
            if !after.is_empty() {
                ranges.insert(insert_at, after);
            }

            let _ = MpnRange::new(candidate_start, candidate_end); // the reserved block itself
            return Some(candidate_start);
        }
    }
    None
}

fn round_down(value: usize, align: usize) -> usize {
    (value / align) * align
}
