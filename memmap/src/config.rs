//! MemMap-specific configuration, re-exporting the shared layout constants
//! from `kernel_config` and adding the tunables that are specific to this
//! crate's policy engine and pool builder.

pub use kernel_config::memory::{
    FOUR_GB, FOUR_GB_MPN, HIGH_WATERMARK_LOW_PAGES, MAX_CRITICAL_CONSUMERS, MAX_NUM_NODES,
    MAX_RANGES_PER_NODE, MEMMAP_MAX_BUF_SIZE, MEMMAP_MAX_HIGH_LEN, MEMMAP_MAX_LOW_LEN,
    MEMMAP_MIN_BUF_SIZE, MEMMAP_MIN_HOTADD_LEN, MIN_FREE_HIGH_PAGES, PAGE_SIZE,
    RESERVE_LOWMEM_PCT, TWO_MB_IN_PAGES, EVIL_MPN,
};

/// Upper bound on the number of cache colors the policy engine may be
/// configured with. Per the "Color count bound" design-note resolution, the
/// true bound is owned by the external scoped virtual-mapping window (it
/// must not be guessed here): this is only the fixed-capacity ceiling used
/// to size small arrays, and `MemMap::initialize` additionally validates the
/// caller-supplied `num_colors` doesn't exceed whatever the mapper reports.
pub const MAX_NUM_COLORS: usize = kernel_config::memory::MAX_NUM_COLORS;
