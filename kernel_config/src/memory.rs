//! Physical-memory layout constants assumed by the MemMap.

/// Page size is 4096 bytes, 4KiB pages.
pub const PAGE_SHIFT: usize = 12;
/// Page size in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// The zone boundary: MPNs below this are "low" (DMA-capable on legacy
/// devices), MPNs at or above it are "high".
pub const FOUR_GB: usize = 4 * 1024 * 1024 * 1024;
/// Value: `FOUR_GB / PAGE_SIZE`. The first MPN considered "high".
pub const FOUR_GB_MPN: usize = FOUR_GB / PAGE_SIZE;

/// The size, in bytes, of the alignment critical consumers request when they
/// need two megabytes or more.
pub const TWO_MB: usize = 2 * 1024 * 1024;
/// Value: `TWO_MB / PAGE_SIZE`. Number of pages in a 2MB-aligned block.
pub const TWO_MB_IN_PAGES: usize = TWO_MB / PAGE_SIZE;

/// The machine address of the single forbidden "evil" page that must never
/// be handed to a buddy or allocated, regardless of what the BIOS/NUMA maps
/// say about it.
pub const EVIL_PAGE_ADDR: usize = 1024 * 1024 * 1024;
/// Value: `EVIL_PAGE_ADDR / PAGE_SIZE`.
pub const EVIL_MPN: usize = EVIL_PAGE_ADDR / PAGE_SIZE;

/// Percent of the initial free-page count reserved for devices that can only
/// DMA below 4GB. See `RESERVE_LOWMEM_PCT` in the design document.
pub const RESERVE_LOWMEM_PCT: usize = 1;

/// Below this many free high-zone pages, a `zone = Any` request that would
/// have recommended `High` instead falls back to `Any` (i.e., gives up the
/// recommendation rather than risk exhausting high memory).
pub const MIN_FREE_HIGH_PAGES: usize = 128;

/// The watermark above which `zone = Any` recommends `Low`: the LowHighPolicy
/// prefers to spend low pages only while they are relatively abundant.
pub const HIGH_WATERMARK_LOW_PAGES: usize = 4096;

/// Minimum number of pages a single buddy memspace buffer may represent.
pub const MEMMAP_MIN_BUF_SIZE: usize = 1;
/// Maximum number of pages a single buddy memspace buffer may represent.
pub const MEMMAP_MAX_BUF_SIZE: usize = (64 * 1024 * 1024) / PAGE_SIZE;
/// Maximum number of bytes a single low-zone buddy may ever grow to.
pub const MEMMAP_MAX_LOW_LEN: usize = 4 * 1024 * 1024 * 1024;
/// Maximum number of bytes a single high-zone buddy may ever grow to.
pub const MEMMAP_MAX_HIGH_LEN: usize = 64 * 1024 * 1024 * 1024;
/// Minimum granularity, in bytes, of a single hot-add buddy block.
pub const MEMMAP_MIN_HOTADD_LEN: usize = 64 * 1024 * 1024;

/// Default upper bound on the number of cache colors the policy engine will
/// ever be configured with. The true bound is owned by the external scoped
/// virtual-mapping window (see `memmap::config::MAX_NUM_COLORS` for the
/// runtime-configurable value actually used); this constant is only a sane
/// compile-time ceiling used to size small fixed-capacity arrays.
pub const MAX_NUM_COLORS: usize = 256;

/// Upper bound on the number of NUMA nodes the MemMap will ever manage.
pub const MAX_NUM_NODES: usize = 64;

/// Maximum number of disjoint sub-ranges tracked per node during range
/// ingest (C1), matching the fixed-capacity early-boot arrays common to
/// this kind of allocator.
pub const MAX_RANGES_PER_NODE: usize = 32;

/// Maximum number of critical consumers that may be registered at compile
/// time (C2).
pub const MAX_CRITICAL_CONSUMERS: usize = 16;
