//! C4 — Policy Engine, the heart of the allocator (§4.4).
//!
//! Given a request for `num_pages` of a given color/zone/node-affinity,
//! walks colors (in bit-reversed order, to diffuse successive allocations
//! across the cache) and, for each color, walks nodes (rotating from
//! `next_node`), trying each candidate node's buddies in turn. The outer
//! entry point retries the whole walk up to three times, relaxing first the
//! zone and then the affinity constraint.

use buddy_api::BuddyMemspace;
use memmap_structs::{Color, ColorRequest, Mpn, NodeId, Zone};

use crate::accounting::Counters;
use crate::config::{HIGH_WATERMARK_LOW_PAGES, MIN_FREE_HIGH_PAGES};
use crate::error::{MemMapError, PolicyOutcome};
use crate::node::Node;
use crate::node_mask::NodeMask;
use crate::scheduler_hooks::{AllowedColors, SchedulerHooks};
use crate::world::{Ppn, WorldId};

/// One allocation request, as described by §4.4's Inputs list.
#[derive(Debug, Clone, Copy)]
pub struct AllocRequest {
    /// `None` for kernel allocations; `Some` for VM physical pages and VM
    /// overhead.
    pub world: Option<WorldId>,
    /// Guest-physical page number; `None` (the "sentinel") for overhead.
    pub ppn: Option<Ppn>,
    pub num_pages: usize,
    pub node_mask: NodeMask,
    pub color: ColorRequest,
    pub zone: Zone,
    pub use_affinity: bool,
    /// True for `alloc_kernel_pages`-style requests; charges `kernel_pages`
    /// on success (§4.5's `decrement(.., is_kernel)`).
    pub is_kernel: bool,
}

/// What a successful allocation reports back to the caller (§4.4's Outputs
/// list).
#[derive(Debug, Clone, Copy)]
pub struct AllocOutcome {
    pub mpn: Mpn,
    pub node: NodeId,
    pub color: Color,
    pub zone: Zone,
    pub free_pages_snapshot: usize,
    pub lookups: u64,
}

/// The mutable state the policy engine needs on every call, borrowed for
/// the duration of one `allocate`/`allocate_wait` invocation.
pub struct PolicyState<'a> {
    pub nodes: &'a mut [Node],
    pub counters: &'a mut Counters,
    pub buddy: &'a mut dyn BuddyMemspace,
    pub scheduler: &'a dyn SchedulerHooks,
    pub next_node: &'a mut usize,
    pub next_kernel_color: &'a mut usize,
    pub num_colors: usize,
    pub log2_num_colors: u32,
    pub num_nodes: usize,
    /// Whether this system has more than one node; gates the third
    /// fallback step (affinity can't be "disabled" on a single-node
    /// system, there's nothing to disable).
    pub is_numa: bool,
}

/// External source of time for the waiting allocation variant (§4.4's
/// "Waiting variant", §5's "suspension points"). An external collaborator:
/// actual timekeeping and cooperative yielding are architecture/scheduler
/// concerns out of scope for this crate.
pub trait WaitClock {
    fn now_ms(&self) -> u64;
    fn sleep_1ms(&self);
}

/// Runs the bit-reversed color walk described in §4.4: starting from
/// `initial`, advances an XOR offset using the bit-reversed-increment step,
/// so that successive colors are maximally spread out rather than
/// sequential. Yields exactly `num_colors` colors, each exactly once, then
/// terminates.
struct ColorWalk {
    initial: usize,
    offset: usize,
    bits: u32,
    num_colors: usize,
    steps_done: usize,
}

impl ColorWalk {
    fn new(initial: Color, num_colors: usize, log2_num_colors: u32) -> Self {
        ColorWalk { initial: initial.0, offset: 0, bits: log2_num_colors, num_colors, steps_done: 0 }
    }
}

impl Iterator for ColorWalk {
    type Item = Color;

    fn next(&mut self) -> Option<Color> {
        if self.steps_done >= self.num_colors {
            return None;
        }
        let color = Color((self.initial ^ self.offset) % self.num_colors);
        self.steps_done += 1;
        if self.bits > 0 {
            self.offset = bit_reversed_increment(self.offset, self.bits);
        }
        Some(color)
    }
}

/// Starting at `b = 1 << (bits - 1)`, toggles bits from most significant to
/// least; the first toggle that turns a bit on terminates the step (§4.4).
/// After `2^bits` calls chained from an offset of zero, the sequence
/// returns to zero.
fn bit_reversed_increment(x: usize, bits: u32) -> usize {
    let mut mask = 1usize << (bits - 1);
    let mut x = x;
    while x & mask != 0 {
        x ^= mask;
        mask >>= 1;
        if mask == 0 {
            return x;
        }
    }
    x ^ mask
}

/// LowHighPolicy: recommends a zone when the caller asked for `Any`.
fn recommend_zone(counters: &Counters) -> Zone {
    if counters.free_low_pages > HIGH_WATERMARK_LOW_PAGES && counters.free_low_pages > counters.reserved_low_pages {
        Zone::Low
    } else if counters.num_free_high_pages() < MIN_FREE_HIGH_PAGES {
        Zone::Any
    } else {
        Zone::High
    }
}

/// Chooses the color to start the walk from, when the caller didn't name
/// one (§4.4's "Initial color").
fn initial_color(req: &AllocRequest, scheduler: &dyn SchedulerHooks, next_kernel_color: usize, num_colors: usize) -> Color {
    match req.color {
        ColorRequest::Specific(c) => c,
        ColorRequest::Any => match (req.world, req.ppn) {
            (Some(world), Some(ppn)) => {
                let candidate = Color(ppn.0.wrapping_add(world.0) % num_colors);
                match scheduler.allowed_colors(world) {
                    AllowedColors::All => candidate,
                    AllowedColors::List(list) if list.contains(&candidate) => candidate,
                    AllowedColors::List(list) => list.first().copied().unwrap_or(candidate),
                }
            }
            _ => Color(next_kernel_color % num_colors),
        },
    }
}

fn rec_mask_for_zone(zone: Zone, counters: &Counters) -> NodeMask {
    match zone {
        Zone::Any => counters.valid_nodes,
        Zone::High => counters.free_high_nodes,
        Zone::Low => counters.free_low_nodes,
        Zone::LowReserved => counters.free_reserved_nodes,
    }
}

/// Computes the affinity mask for this request (§4.4's `aff_mask`):
/// clamped to `valid_nodes`, or "all" if that clamp is empty or affinity is
/// disabled.
fn aff_mask(req: &AllocRequest, scheduler: &dyn SchedulerHooks, counters: &Counters, num_nodes: usize) -> NodeMask {
    if req.use_affinity {
        if let Some(world) = req.world {
            let clamped = scheduler.node_affinity_mask(world).intersect(counters.valid_nodes);
            if !clamped.is_empty() {
                return clamped;
            }
        }
    }
    NodeMask::all(num_nodes)
}

/// Reconciles the caller's `node_mask`, the computed affinity mask, and the
/// zone's recommended node mask into the set of nodes actually worth
/// searching (§4.4's "Node-mask reconciliation").
fn reconcile(req: &AllocRequest, zone: Zone, scheduler: &dyn SchedulerHooks, counters: &Counters, num_nodes: usize) -> Result<NodeMask, PolicyOutcome> {
    let with_affinity = aff_mask(req, scheduler, counters, num_nodes).intersect(req.node_mask);
    if with_affinity.is_empty() {
        return Err(PolicyOutcome::NodeMaskConflict);
    }
    let result = with_affinity.intersect(rec_mask_for_zone(zone, counters));
    if result.is_empty() {
        return Err(PolicyOutcome::NoPages);
    }
    Ok(result)
}

/// One node's worth of §4.4's "Per-node attempt": tries the high buddy
/// first if the zone allows it, then the low buddy (subject to the
/// reserve-defense check), returning the zone the page actually came from.
fn try_node(node: &mut Node, buddy: &mut dyn BuddyMemspace, rec_zone: Zone, num_pages: usize, color: Color) -> Result<(Mpn, Zone), PolicyOutcome> {
    if matches!(rec_zone, Zone::High | Zone::Any) {
        if let Some(handle) = node.buddy_high {
            if let Ok(mpn) = buddy.allocate_color(handle, num_pages, color) {
                return Ok((mpn, Zone::High));
            }
        }
    }

    if rec_zone != Zone::High {
        if let Some(handle) = node.buddy_low {
            if rec_zone != Zone::LowReserved && node.low_reserve_defended(num_pages) {
                return Err(PolicyOutcome::NoPages);
            }
            if let Ok(mpn) = buddy.allocate_color(handle, num_pages, color) {
                let actual = if rec_zone == Zone::Any { Zone::Low } else { rec_zone };
                return Ok((mpn, actual));
            }
        }
    }

    Err(PolicyOutcome::NoPages)
}

struct RawOutcome {
    mpn: Mpn,
    node: NodeId,
    color: Color,
    zone: Zone,
    free_pages_snapshot: usize,
    lookups: u64,
    new_next_node: usize,
    new_next_kernel_color: usize,
}

/// One full walk: reconciles the node mask, then for every color in the
/// bit-reversed walk, for every node in the rotated node walk, attempts the
/// allocation. Returns on the first success.
fn attempt(state: &mut PolicyState, req: &AllocRequest, zone: Zone) -> Result<RawOutcome, PolicyOutcome> {
    let search_mask = reconcile(req, zone, state.scheduler, state.counters, state.num_nodes)?;
    let is_vm_physical = req.world.is_some() && req.ppn.is_some();
    let initial = initial_color(req, state.scheduler, *state.next_kernel_color, state.num_colors);

    let mut lookups = 0u64;
    for color in ColorWalk::new(initial, state.num_colors, state.log2_num_colors) {
        for node_id in search_mask.iter_from(*state.next_node, state.num_nodes) {
            lookups += 1;
            let node = &mut state.nodes[node_id.index()];
            match try_node(node, state.buddy, zone, req.num_pages, color) {
                Ok((mpn, actual_zone)) => {
                    let new_next_kernel_color = if is_vm_physical {
                        *state.next_kernel_color
                    } else {
                        (*state.next_kernel_color + 1) % state.num_colors
                    };
                    let new_next_node = if is_vm_physical {
                        (node_id.index() + 1) % state.num_nodes
                    } else if new_next_kernel_color == 0 {
                        (*state.next_node + 1) % state.num_nodes
                    } else {
                        *state.next_node
                    };
                    return Ok(RawOutcome {
                        mpn,
                        node: node_id,
                        color,
                        zone: actual_zone,
                        free_pages_snapshot: state.counters.free_pages,
                        lookups,
                        new_next_node,
                        new_next_kernel_color,
                    });
                }
                Err(_) => continue,
            }
        }
    }
    Err(PolicyOutcome::NoPages)
}

/// Applies the success post-conditions of §4.4: decrements the free
/// counters, advances the round-robin cursors, and publishes the new
/// unused-page count to the scheduler.
fn finalize(state: &mut PolicyState, req: &AllocRequest, raw: RawOutcome) -> AllocOutcome {
    let is_low = matches!(raw.zone, Zone::Low | Zone::LowReserved);
    let node = &mut state.nodes[raw.node.index()];
    state.counters.decrement(node, req.num_pages, is_low, req.is_kernel);
    *state.next_node = raw.new_next_node;
    *state.next_kernel_color = raw.new_next_kernel_color;
    state.scheduler.on_free_pages_change(state.counters.unused_pages());

    AllocOutcome {
        mpn: raw.mpn,
        node: raw.node,
        color: raw.color,
        zone: raw.zone,
        free_pages_snapshot: raw.free_pages_snapshot,
        lookups: raw.lookups,
    }
}

/// Exposes the color walk to the test module without widening its public
/// API: the bit-reversed sequence is an implementation detail of `attempt`,
/// but its exact ordering is worth pinning down with a test.
#[cfg(test)]
pub(crate) mod test_support {
    use super::{Color, ColorWalk};

    pub fn walk_colors(initial: Color, num_colors: usize, log2_num_colors: u32) -> impl Iterator<Item = Color> {
        ColorWalk::new(initial, num_colors, log2_num_colors)
    }
}

/// Running counts of how often each fallback step was needed, threaded
/// through from `memmap::stats`.
pub struct RetryCounters {
    pub type_retry: u64,
    pub aff_retry: u64,
    pub total_good_allocs: u64,
    pub total_color_node_lookups: u64,
}

/// Runs the three-step fallback cascade of §4.4: the caller's zone (or the
/// recommendation, if `Any`) with affinity; then `zone = Any` with
/// affinity; then, on NUMA systems, affinity disabled. A `NodeMaskConflict`
/// never survives past this function because the final step disables
/// affinity outright.
pub fn allocate(state: &mut PolicyState, req: AllocRequest, retries: &mut RetryCounters) -> Result<AllocOutcome, MemMapError> {
    let first_zone = if matches!(req.zone, Zone::Any) { recommend_zone(state.counters) } else { req.zone };

    let mut try_req = req;
    try_req.zone = first_zone;
    try_req.use_affinity = true;
    if let Ok(raw) = attempt(state, &try_req, first_zone) {
        let outcome = finalize(state, &try_req, raw);
        retries.total_good_allocs += 1;
        retries.total_color_node_lookups += outcome.lookups;
        return Ok(outcome);
    }

    if !matches!(first_zone, Zone::Any) {
        retries.type_retry += 1;
        try_req.zone = Zone::Any;
        if let Ok(raw) = attempt(state, &try_req, Zone::Any) {
            let outcome = finalize(state, &try_req, raw);
            retries.total_good_allocs += 1;
            retries.total_color_node_lookups += outcome.lookups;
            return Ok(outcome);
        }
    }

    if state.is_numa {
        retries.aff_retry += 1;
        try_req.use_affinity = false;
        if let Ok(raw) = attempt(state, &try_req, try_req.zone) {
            let outcome = finalize(state, &try_req, raw);
            retries.total_good_allocs += 1;
            retries.total_color_node_lookups += outcome.lookups;
            return Ok(outcome);
        }
    }

    Err(MemMapError::OutOfMemory)
}

/// The waiting variant of [`allocate`] (§4.4's "Waiting variant", §5's
/// cancellation rule): retries the whole cascade every millisecond until
/// either it succeeds, `timeout_ms` elapses, or the scheduler reports the
/// caller's world has started a checkpoint or is dying.
pub fn allocate_wait(state: &mut PolicyState, req: AllocRequest, timeout_ms: u32, clock: &dyn WaitClock, retries: &mut RetryCounters) -> Result<AllocOutcome, MemMapError> {
    let start = clock.now_ms();
    loop {
        match allocate(state, req, retries) {
            Ok(outcome) => return Ok(outcome),
            Err(MemMapError::OutOfMemory) => {
                if timeout_ms == 0 {
                    return Err(MemMapError::OutOfMemory);
                }
                if let Some(world) = req.world {
                    if state.scheduler.should_abandon_wait(world) {
                        return Err(MemMapError::OutOfMemory);
                    }
                }
                if clock.now_ms().saturating_sub(start) >= timeout_ms as u64 {
                    return Err(MemMapError::OutOfMemory);
                }
                clock.sleep_1ms();
            }
            Err(e) => return Err(e),
        }
    }
}
