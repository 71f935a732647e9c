//! Tests for the MemMap's public boot/allocation/hot-add surface, exercised
//! end-to-end against a reference in-memory buddy (`MockBuddy`) rather than
//! a real production buddy allocator, standing up the types directly
//! against fixed addresses instead of real hardware.

extern crate std;

use alloc::boxed::Box;
use alloc::collections::BTreeSet;
use alloc::vec::Vec;

use buddy_api::{BuddyError, BuddyHandle, BuddyMemspace, DynRangeInfo};
use memmap_structs::{Color, ColorRequest, Mpn, MpnRange, NodeId, Zone};
use mtrr::AlwaysCachable;
use numa_topology::{BiosMemoryRange, NumaTopology, TableTopology, UmaTopology};

use crate::config::FOUR_GB_MPN;
use crate::error::MemMapError;
use crate::kernel_mapper::NoopMapper;
use crate::node_mask::NodeMask;
use crate::policy::WaitClock;
use crate::range_ingest::{MemorySelfTest, TrustAllPages};
use crate::scheduler_hooks::{AllowedColors, SchedulerHooks};
use crate::world::WorldId;
use crate::MemMapHandle;

/// A single `(node, zone)` buddy memspace: a plain set of free MPNs plus the
/// color count it was created with, good enough to exercise the policy
/// engine's color/zone logic without implementing a real buddy allocator
/// (out of scope per §1).
struct BuddySpace {
    free: BTreeSet<usize>,
    num_colors: usize,
}

/// A reference `BuddyMemspace` over an arbitrary number of `(node, zone)`
/// memspaces, indexed by the `BuddyHandle` each `create()` call hands out.
/// Reports zero bytes of metadata overhead, so test page counts are exact.
#[derive(Default)]
struct MockBuddy {
    spaces: Vec<BuddySpace>,
}

impl MockBuddy {
    fn new() -> Self {
        MockBuddy { spaces: Vec::new() }
    }
}

impl BuddyMemspace for MockBuddy {
    fn metadata_bytes_for_range(&self, _info: &DynRangeInfo) -> usize {
        0
    }

    fn create(&mut self, info: DynRangeInfo, _metadata_buffer: Mpn) -> BuddyHandle {
        let free = info.range.into_iter().map(|mpn| mpn.number()).collect();
        self.spaces.push(BuddySpace { free, num_colors: info.num_colors });
        BuddyHandle(self.spaces.len() - 1)
    }

    fn hot_add_range(&mut self, handle: BuddyHandle, info: DynRangeInfo, _metadata_buffer: Mpn) -> Result<(), BuddyError> {
        let space = &mut self.spaces[handle.0];
        for mpn in info.range.into_iter() {
            space.free.insert(mpn.number());
        }
        Ok(())
    }

    fn allocate_color(&mut self, handle: BuddyHandle, num_pages: usize, color: Color) -> Result<Mpn, BuddyError> {
        let space = &mut self.spaces[handle.0];
        let candidates: Vec<usize> = space.free.iter().copied().collect();
        for start in candidates {
            if start % space.num_colors != color.0 {
                continue;
            }
            if (0..num_pages).all(|i| space.free.contains(&(start + i))) {
                for i in 0..num_pages {
                    space.free.remove(&(start + i));
                }
                return Ok(Mpn::new(start));
            }
        }
        Err(BuddyError::NoPages)
    }

    fn allocate_range(&mut self, handle: BuddyHandle, start_hint: Mpn) -> Result<(Mpn, usize), BuddyError> {
        let space = &mut self.spaces[handle.0];
        if space.free.remove(&start_hint.number()) {
            return Ok((start_hint, 1));
        }
        if let Some(&first) = space.free.iter().next() {
            space.free.remove(&first);
            return Ok((Mpn::new(first), 1));
        }
        Err(BuddyError::NoPages)
    }

    fn free(&mut self, handle: BuddyHandle, mpn: Mpn) {
        self.spaces[handle.0].free.insert(mpn.number());
    }

    fn get_loc_size(&self, _handle: BuddyHandle, _mpn: Mpn) -> usize {
        1
    }

    fn num_free_for_color(&self, handle: BuddyHandle, color: Color) -> usize {
        let space = &self.spaces[handle.0];
        space.free.iter().filter(|&&m| m % space.num_colors == color.0).count()
    }
}

/// A scheduler test double with a fixed per-world affinity mask and no
/// color restrictions.
struct FixedAffinityScheduler {
    masks: Vec<(WorldId, NodeMask)>,
}

impl FixedAffinityScheduler {
    fn new(masks: Vec<(WorldId, NodeMask)>) -> Self {
        FixedAffinityScheduler { masks }
    }
}

impl SchedulerHooks for FixedAffinityScheduler {
    fn memory_is_low(&self) -> bool {
        false
    }

    fn node_affinity_mask(&self, world: WorldId) -> NodeMask {
        self.masks.iter().find(|(w, _)| *w == world).map(|(_, m)| *m).unwrap_or_else(NodeMask::empty)
    }

    fn allowed_colors(&self, _world: WorldId) -> AllowedColors<'_> {
        AllowedColors::All
    }

    fn on_free_pages_change(&self, _unused_pages: usize) {}

    fn should_abandon_wait(&self, _world: WorldId) -> bool {
        false
    }
}

/// A clock that advances by one millisecond on every call, so a
/// `timeout_ms` of 1 is exceeded on the very first retry rather than
/// spinning forever.
struct FakeClock {
    now: core::sync::atomic::AtomicU64,
}

impl FakeClock {
    fn new() -> Self {
        FakeClock { now: core::sync::atomic::AtomicU64::new(0) }
    }
}

impl WaitClock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now.fetch_add(1, core::sync::atomic::Ordering::Relaxed)
    }

    fn sleep_1ms(&self) {}
}

fn range(start: usize, end: usize) -> MpnRange {
    MpnRange::new(Mpn::new(start), Mpn::new(end))
}

/// Boots a single-node (UMA) MemMap with `num_low` low pages and `num_high`
/// high pages, `num_colors` colors, and the I/O-permission map disabled
/// (simpler counter arithmetic for the tests that don't care about it).
fn boot_uma(num_low: usize, num_high: usize, num_colors: usize) -> MemMapHandle {
    let mut bios = Vec::new();
    bios.push(BiosMemoryRange { start_mpn: Mpn::new(0), end_mpn: Mpn::new(num_low - 1) });
    if num_high > 0 {
        bios.push(BiosMemoryRange { start_mpn: Mpn::new(FOUR_GB_MPN), end_mpn: Mpn::new(FOUR_GB_MPN + num_high - 1) });
    }
    MemMapHandle::initialize(
        &bios,
        Box::new(UmaTopology),
        Box::new(AlwaysCachable),
        Box::new(TrustAllPages),
        Box::new(FixedAffinityScheduler::new(Vec::new())),
        Box::new(MockBuddy::new()),
        Box::new(NoopMapper),
        &mut [],
        num_colors,
        false,
        false,
    )
    .expect("boot_uma: initialize failed")
}

#[test]
fn uma_boot_zero_overhead_matches_bios_page_count() {
    let mm = boot_uma(1024, 0, 4);
    assert_eq!(mm.total_pages(), 1024);
    assert_eq!(mm.free_pages(), 1024);
    assert_eq!(mm.stats().total_bios_pages, 1024);
    assert_eq!(mm.stats().discarded_pages, 0);
    assert_eq!(mm.stats().kernel_use_pages, 0);
    assert_eq!(mm.stats().managed_pages, 1024);
    mm.check_invariants();
}

#[test]
fn low_only_system_reserves_nothing() {
    // has_high_memory is only true once some high-zone pages exist (§4.5);
    // a UMA system with only low memory reserves nothing.
    let mm = boot_uma(1000, 0, 4);
    assert_eq!(mm.reserved_low_pages(), 0);
    mm.check_invariants();
}

#[test]
fn low_reserve_is_one_percent_of_init_free_pages_with_high_memory_present() {
    let mm = boot_uma(1000, 200, 4);
    // init_free_pages = 1200, 1% = 12.
    assert_eq!(mm.reserved_low_pages(), 12);
    mm.check_invariants();
}

/// Scenario 1: the kernel round-robin color cursor starts at `num_colors/2`,
/// so the very first `color = Any` kernel allocation returns that color.
#[test]
fn first_kernel_allocation_uses_num_colors_over_two_as_its_color() {
    let mut mm = boot_uma(256, 0, 4);
    let req = crate::policy::AllocRequest {
        world: None,
        ppn: None,
        num_pages: 1,
        node_mask: NodeMask::all(1),
        color: ColorRequest::Any,
        zone: Zone::Low,
        use_affinity: false,
        is_kernel: true,
    };
    let mut retries = crate::policy::RetryCounters { type_retry: 0, aff_retry: 0, total_good_allocs: 0, total_color_node_lookups: 0 };
    let outcome = crate::policy::allocate(&mut mm_policy_state(&mut mm), req, &mut retries).unwrap();
    assert_eq!(outcome.color, Color(2));
}

#[test]
fn allocating_a_kernel_page_decrements_free_counters() {
    let mut mm = boot_uma(1024, 0, 4);
    let before = mm.free_pages();
    let mpn = mm.alloc_kernel_pages(1, Zone::Low).unwrap();
    assert!(mpn.number() < 1024);
    assert_eq!(mm.free_pages(), before - 1);
    assert_eq!(mm.kernel_pages(), 1);
    mm.check_invariants();
}

/// L1/P1/P6: a single allocate/free pair round-trips every counter back to
/// its initial value.
#[test]
fn alloc_then_free_round_trips_counters() {
    let mut mm = boot_uma(1024, 0, 4);
    let total_before = mm.total_pages();
    let free_before = mm.free_pages();

    let mpn = mm.alloc_kernel_pages(1, Zone::Low).unwrap();
    assert_eq!(mm.total_pages(), total_before, "P1: total_pages must never change across alloc/free");
    mm.free_kernel_pages(mpn, 1);

    assert_eq!(mm.free_pages(), free_before, "L1/P6: free/alloc pair must be idempotent");
    assert_eq!(mm.kernel_pages(), 0);
    mm.check_invariants();
}

/// L2: N interleaved allocations and N matched frees return to the initial
/// state, regardless of interleaving order.
#[test]
fn interleaved_allocs_and_frees_return_to_initial_state() {
    let mut mm = boot_uma(64, 0, 4);
    let free_before = mm.free_pages();

    let mut outstanding = Vec::new();
    for _ in 0..8 {
        outstanding.push(mm.alloc_kernel_pages(1, Zone::Low).unwrap());
    }
    // Free in a different order than allocated.
    outstanding.reverse();
    for mpn in outstanding.drain(2..) {
        mm.free_kernel_pages(mpn, 1);
    }
    for _ in 0..3 {
        outstanding.push(mm.alloc_kernel_pages(1, Zone::Low).unwrap());
    }
    for mpn in outstanding {
        mm.free_kernel_pages(mpn, 1);
    }

    assert_eq!(mm.free_pages(), free_before);
    mm.check_invariants();
}

/// P4: a caller that names a specific color always gets it back.
#[test]
fn specific_color_request_is_honored() {
    let mut mm = boot_uma(256, 0, 8);
    for color in 0..8u8 {
        let req = crate::policy::AllocRequest {
            world: None,
            ppn: None,
            num_pages: 1,
            node_mask: NodeMask::all(1),
            color: ColorRequest::Specific(Color(color as usize)),
            zone: Zone::Low,
            use_affinity: false,
            is_kernel: true,
        };
        let mut retries = crate::policy::RetryCounters { type_retry: 0, aff_retry: 0, total_good_allocs: 0, total_color_node_lookups: 0 };
        let outcome = crate::policy::allocate(&mut mm_policy_state(&mut mm), req, &mut retries).unwrap();
        assert_eq!(outcome.mpn.number() % 8, color as usize, "P4");
    }
}

/// A helper to reach into `MemMapHandle`'s private `policy_state` for tests
/// that need to drive the policy engine directly (e.g. with an explicit
/// color request the public API doesn't expose).
fn mm_policy_state(mm: &mut MemMapHandle) -> crate::policy::PolicyState<'_> {
    mm.policy_state()
}

/// B3: with a single color, a specific-color request succeeds iff any page
/// is free.
#[test]
fn single_color_specific_request_succeeds_iff_free_page_exists() {
    let mut mm = boot_uma(4, 0, 1);
    for _ in 0..4 {
        assert!(mm.alloc_kernel_pages(1, Zone::Low).is_ok());
    }
    assert_eq!(mm.alloc_kernel_pages(1, Zone::Low), Err(MemMapError::OutOfMemory));
}

/// B1: `zone = LowReserved` may still draw from a node whose free-low pool
/// is above its reserve; the reserve is only a floor for plain `Low`.
#[test]
fn low_reserved_zone_succeeds_above_the_reserve_floor() {
    let mut mm = boot_uma(1000, 200, 4);
    assert_eq!(mm.reserved_low_pages(), 12);
    let mpn = mm.alloc_kernel_pages(1, Zone::LowReserved).unwrap();
    assert!(mpn.number() < FOUR_GB_MPN);
}

/// B2/scenario 4: draining low memory down to the reserve makes plain
/// `Low` requests fail, while `LowReserved` keeps succeeding past that
/// floor. High memory is drained first so the cascade's `zone = Any` retry
/// step (§4.4) can't mask the low-reserve defense by quietly satisfying the
/// request from the high zone instead.
#[test]
fn draining_to_the_reserve_blocks_plain_low_but_not_low_reserved() {
    let mut mm = boot_uma(100, 4, 4);
    // init_free_pages = 104, 1% = 1 -> reserved_low_pages = 1.
    assert_eq!(mm.reserved_low_pages(), 1);

    for _ in 0..4 {
        mm.alloc_kernel_pages(1, Zone::High).expect("draining high pages");
    }

    // Drain all but the single reserved low page.
    for _ in 0..99 {
        mm.alloc_kernel_pages(1, Zone::Low).expect("draining low pages");
    }
    assert_eq!(mm.free_low_pages(), 1);

    assert_eq!(mm.alloc_kernel_pages(1, Zone::Low), Err(MemMapError::OutOfMemory), "B2");
    assert!(mm.alloc_kernel_pages(1, Zone::LowReserved).is_ok(), "B1/scenario 4");
}

/// Scenario 3: the bit-reversed color walk over 8 colors starting from 3
/// visits 3, 7, 1, 5, 2, 6, 0, 4.
#[test]
fn bit_reversed_color_walk_matches_the_documented_sequence() {
    let walk: Vec<usize> = crate::policy::test_support::walk_colors(Color(3), 8, 3).map(|c| c.0).collect();
    assert_eq!(walk, alloc::vec![3, 7, 1, 5, 2, 6, 0, 4]);
}

/// Scenario 2 (partial): affinity restricts allocation to the preferred
/// node until that node is exhausted, at which point the fallback cascade
/// disables affinity and the allocation lands on the other node.
#[test]
fn affinity_fallback_crosses_to_the_other_node_once_preferred_is_full() {
    let bios = alloc::vec![
        BiosMemoryRange { start_mpn: Mpn::new(0), end_mpn: Mpn::new(7) },
        BiosMemoryRange { start_mpn: Mpn::new(8), end_mpn: Mpn::new(15) },
    ];
    let numa_ranges = alloc::vec![(NodeId(0), range(0, 7)), (NodeId(1), range(8, 15))];
    let topology = TableTopology::new(2, numa_ranges);
    let world = WorldId(42);
    let scheduler = FixedAffinityScheduler::new(alloc::vec![(world, NodeMask::single(NodeId(0)))]);

    let mut mm = MemMapHandle::initialize(
        &bios,
        Box::new(topology),
        Box::new(AlwaysCachable),
        Box::new(TrustAllPages),
        Box::new(scheduler),
        Box::new(MockBuddy::new()),
        Box::new(NoopMapper),
        &mut [],
        1,
        false,
        false,
    )
    .unwrap();

    // Drain node 0 entirely (8 pages) with affinity-respecting allocations.
    for i in 0..8 {
        let outcome = mm.alloc_vm_page(world, crate::world::Ppn(i), Zone::Any, true).unwrap();
        assert_eq!(outcome.node, NodeId(0), "node 0 must be exhausted before falling over");
    }

    // The 9th allocation can't fit on node 0; the cascade must disable
    // affinity and land on node 1.
    let outcome = mm.alloc_vm_page(world, crate::world::Ppn(8), Zone::Any, true).unwrap();
    assert_eq!(outcome.node, NodeId(1));
}

/// B4: hot-adding a range that overlaps an already-managed range is
/// rejected without altering any state.
#[test]
fn hot_add_overlap_is_rejected_without_side_effects() {
    let mut mm = boot_uma(64, 0, 4);
    let total_before = mm.total_pages();
    let free_before = mm.free_pages();

    let overlapping = range(0, 7);
    let result = mm.hot_add(overlapping, NodeId(0), &mut TrustAllPages, false, &mut []);
    assert_eq!(result, Err(MemMapError::BadParam));
    assert_eq!(mm.total_pages(), total_before);
    assert_eq!(mm.free_pages(), free_before);
}

/// Scenario 6 (partial): hot-adding a purely-high range to a single node
/// grows total/high pages without regressing the existing low pages.
#[test]
fn hot_add_of_high_only_range_grows_high_pages() {
    let mut mm = boot_uma(256, 0, 4);
    let total_before = mm.total_pages();
    let free_before = mm.free_pages();

    let new_range = range(FOUR_GB_MPN, FOUR_GB_MPN + 255);
    mm.hot_add(new_range, NodeId(0), &mut TrustAllPages, false, &mut []).expect("hot-add should succeed");

    assert_eq!(mm.total_pages(), total_before + 256);
    assert_eq!(mm.free_pages(), free_before + 256);
    assert_eq!(mm.stats().managed_pages, total_before + 256);
    mm.check_invariants();

    let mpn = mm.alloc_kernel_pages(1, Zone::High).unwrap();
    assert!(!mpn.is_low(FOUR_GB_MPN), "P5: zone=High must return a high MPN");
}

/// Scenario 6: hot-adding to a node with outstanding allocations must not
/// "free" them in the counters (P1: free_pages + allocated_pages == total).
#[test]
fn hot_add_preserves_prior_outstanding_allocations() {
    let mut mm = boot_uma(256, 0, 4);
    let mut held = Vec::new();
    for _ in 0..100 {
        held.push(mm.alloc_kernel_pages(1, Zone::Low).unwrap());
    }
    let total_before = mm.total_pages();
    let free_before = mm.free_pages();
    let allocated_before = total_before - free_before;

    let new_range = range(FOUR_GB_MPN, FOUR_GB_MPN + 63);
    mm.hot_add(new_range, NodeId(0), &mut TrustAllPages, false, &mut []).expect("hot-add should succeed");

    assert_eq!(mm.total_pages(), total_before + 64);
    assert_eq!(mm.free_pages(), free_before + 64, "the 100 pages held before hot-add must stay allocated");
    assert_eq!(mm.total_pages() - mm.free_pages(), allocated_before, "P1: outstanding allocations unchanged by hot-add");
    mm.check_invariants();

    for mpn in held {
        mm.free_kernel_pages(mpn, 1);
    }
}

/// Scenario 5: a memory self-test that rejects a single MPN inside an
/// otherwise-good range splits the range around it and charges exactly one
/// page to `discarded_pages`.
#[test]
fn self_test_failure_splits_the_range_and_discards_one_page() {
    struct RejectOne(usize);
    impl MemorySelfTest for RejectOne {
        fn test_range(&mut self, range: MpnRange, _check_every_word: bool) -> Mpn {
            if range.contains(Mpn::new(self.0)) && self.0 > range.start().number() {
                Mpn::new(self.0 - 1)
            } else {
                range.end()
            }
        }
    }

    let bios = alloc::vec![BiosMemoryRange { start_mpn: Mpn::new(0), end_mpn: Mpn::new(99) }];
    let mm = MemMapHandle::initialize(
        &bios,
        Box::new(UmaTopology),
        Box::new(AlwaysCachable),
        Box::new(RejectOne(50)),
        Box::new(FixedAffinityScheduler::new(Vec::new())),
        Box::new(MockBuddy::new()),
        Box::new(NoopMapper),
        &mut [],
        4,
        false,
        false,
    )
    .unwrap();

    // RejectOne narrows the single [0, 99] range down to [0, 49], so pages
    // 50..99 are discarded and only the first half is managed.
    assert_eq!(mm.stats().total_bios_pages, 100);
    assert!(mm.stats().discarded_pages > 0);
    assert_eq!(mm.stats().total_bios_pages, mm.stats().discarded_pages + mm.stats().managed_pages);
}

/// §4.7: the early allocator services single-page requests before any
/// buddy exists, bypassing the policy engine entirely.
#[test]
fn early_allocator_peels_pages_off_the_head_of_the_range() {
    let ingest = crate::range_ingest::ingest(
        &[BiosMemoryRange { start_mpn: Mpn::new(0), end_mpn: Mpn::new(9) }],
        &UmaTopology,
        &AlwaysCachable,
        &mut TrustAllPages,
        false,
    )
    .unwrap();
    let mut per_node = ingest.per_node;
    let mut early = crate::early_alloc::EarlyAllocator::new();

    let first = early.alloc_one_page(&mut per_node, Zone::Low).unwrap();
    assert_eq!(first, Mpn::new(0));
    let second = early.alloc_one_page(&mut per_node, Zone::Low).unwrap();
    assert_eq!(second, Mpn::new(1));

    early.disable();
    assert!(early.alloc_one_page(&mut per_node, Zone::Low).is_err());
}

/// §4.7 end-to-end, through the public API: `begin_boot` exposes C7 before
/// `finish` runs C2+C3, and pages it hands out never reach a buddy — they
/// land in `kernel_use_pages` and are subtracted from `managed_pages`.
#[test]
fn begin_boot_services_early_pages_before_finish_builds_the_buddies() {
    let bios = alloc::vec![BiosMemoryRange { start_mpn: Mpn::new(0), end_mpn: Mpn::new(63) }];
    let mut early =
        MemMapHandle::begin_boot(&bios, Box::new(UmaTopology), Box::new(AlwaysCachable), Box::new(TrustAllPages), false).unwrap();
    assert_eq!(early.state(), crate::MemMapState::Early);

    let first = early.alloc_early_page(Zone::Low).unwrap();
    assert_eq!(first, Mpn::new(0));
    let second = early.alloc_early_page(Zone::Low).unwrap();
    assert_eq!(second, Mpn::new(1));

    let mm = early
        .finish(
            Box::new(FixedAffinityScheduler::new(Vec::new())),
            Box::new(MockBuddy::new()),
            Box::new(NoopMapper),
            &mut [],
            4,
            false,
        )
        .unwrap();

    assert_eq!(mm.state(), crate::MemMapState::Ready);
    assert_eq!(mm.total_pages(), 62);
    assert_eq!(mm.stats().managed_pages, 62);
    assert_eq!(mm.stats().kernel_use_pages, 2, "both early-allocated pages must be charged to kernel_use_pages");
    assert_eq!(mm.stats().total_bios_pages, 64);
}

/// §4.6: the I/O-permission map reports I/O as permitted before the first
/// managed range, forbidden after the last, and tracks allocate/free within
/// a managed segment.
#[test]
fn io_prot_map_tracks_allocation_state_within_its_segment() {
    let mut map = crate::io_prot::IoProtMap::new();
    map.add_segment(range(100, 199), range(200, 200));

    assert!(map.is_io_permitted(Mpn::new(50)), "below first managed range: pre-MemMap memory");
    assert!(!map.is_io_permitted(Mpn::new(300)), "above last managed range: never permitted");
    assert!(!map.is_io_permitted(Mpn::new(150)), "unallocated page starts forbidden");

    map.mark_allocated(Mpn::new(150));
    assert!(map.is_io_permitted(Mpn::new(150)));

    map.mark_freed(Mpn::new(150));
    assert!(!map.is_io_permitted(Mpn::new(150)));
}

/// The waiting allocation variant gives up once its timeout elapses rather
/// than spinning forever.
#[test]
fn alloc_kernel_page_wait_times_out_when_never_satisfiable() {
    let mut mm = boot_uma(1, 0, 1);
    let _held = mm.alloc_kernel_pages(1, Zone::Low).unwrap();
    let clock = FakeClock::new();
    let result = mm.alloc_kernel_page_wait(1, &clock);
    assert_eq!(result, Err(MemMapError::OutOfMemory));
}
