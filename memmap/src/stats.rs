//! Read-only counter snapshots (§6 supplement): the ingest and
//! policy-engine statistics a `/proc`-style dump would read, without
//! implementing the dump itself (still out of scope per §1). Mirrors the
//! teacher's `dump_frame_allocator_state` existing as a separately-gated
//! debug entry point rather than being woven into the hot path.

/// A point-in-time snapshot of the counters named in §3 and §4.4.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemMapStats {
    pub total_bios_pages: usize,
    pub discarded_pages: usize,
    pub kernel_use_pages: usize,
    pub managed_pages: usize,
    pub total_good_allocs: u64,
    pub total_color_node_lookups: u64,
    pub type_retry: u64,
    pub aff_retry: u64,
}
