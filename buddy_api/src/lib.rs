//! The buddy-allocator interface: a small, deliberately narrow contract a
//! per-`(node, zone)` buddy memspace must satisfy so the MemMap's pool
//! builder (C3) and policy engine (C4) can drive it. Per §1, the buddy
//! algorithm itself is an external collaborator and out of scope for this
//! crate; only the boundary is defined here, plus the bookkeeping types
//! (`BuddyHandle`, `BuddyError`) the MemMap threads through its own state.

#![no_std]

use memmap_structs::{Color, MpnRange, Mpn};

/// An opaque reference to a buddy memspace, handed out by a `create()` call
/// and threaded through later `hot_add_range`/`allocate_color`/`free` calls.
///
/// Deliberately index-like and back-pointer-free (see the "Cyclic
/// references" design note): the policy engine holds one of these per
/// `(node, zone)` and never reaches back from the buddy into the MemMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuddyHandle(pub usize);

/// Failure modes a buddy memspace can report back to the MemMap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuddyError {
    /// No free block of the requested size/color exists in this memspace.
    NoPages,
    /// The requested starting address was not free, or outside this
    /// memspace's managed range.
    AddressNotFree,
    /// `num_pages` was not a supported block size (e.g. not a power of two).
    BadParam,
}

/// Information the pool builder (C3) and hot-add (C8) need to describe a
/// contiguous range being handed to a buddy, and that a buddy needs in order
/// to report how much metadata it requires for that range.
#[derive(Debug, Clone, Copy)]
pub struct DynRangeInfo {
    pub range: MpnRange,
    pub num_colors: usize,
}

/// The contract a `(node, zone)` buddy memspace must implement.
///
/// Mirrors the outputs listed in §6 ("Outputs delivered to the buddy
/// library"): `create`, `hot_add_range`, `allocate_color`, `allocate_range`,
/// `free`, `get_loc_size`, and `num_free_for_color`.
pub trait BuddyMemspace {
    /// Returns the number of bytes of metadata this buddy would need to
    /// manage the given range, so the pool builder (C3) can reserve whole
    /// pages for it before calling `create`/`hot_add_range`.
    fn metadata_bytes_for_range(&self, info: &DynRangeInfo) -> usize;

    /// Creates a new buddy memspace covering `info.range`, using
    /// `metadata_buffer` (mapped kernel VA, at least
    /// `metadata_bytes_for_range(info)` bytes, per §4.3 step 3) to store its
    /// own bookkeeping. Returns a handle used for all subsequent calls.
    fn create(&mut self, info: DynRangeInfo, metadata_buffer: Mpn) -> BuddyHandle;

    /// Incorporates an additional range into an already-`create`d buddy
    /// memspace (subsequent ranges of the same `(node, zone)`, or hot-add).
    fn hot_add_range(
        &mut self,
        handle: BuddyHandle,
        info: DynRangeInfo,
        metadata_buffer: Mpn,
    ) -> Result<(), BuddyError>;

    /// Allocates `num_pages` contiguous pages of the given color from the
    /// named buddy memspace.
    fn allocate_color(
        &mut self,
        handle: BuddyHandle,
        num_pages: usize,
        color: Color,
    ) -> Result<Mpn, BuddyError>;

    /// Allocates whatever contiguous block the buddy can serve starting at
    /// or near `start_hint`, for diagnostic/bulk use (§6,
    /// `alloc_page_range`). Returns the actual start MPN and the number of
    /// pages allocated (which may differ from any size hint).
    fn allocate_range(&mut self, handle: BuddyHandle, start_hint: Mpn) -> Result<(Mpn, usize), BuddyError>;

    /// Frees the single page at `mpn`, previously allocated from this
    /// memspace.
    fn free(&mut self, handle: BuddyHandle, mpn: Mpn);

    /// Returns the size, in pages, of the allocation that contains `mpn`
    /// (used for diagnostic frees of a range by starting address only).
    fn get_loc_size(&self, handle: BuddyHandle, mpn: Mpn) -> usize;

    /// Returns the number of free pages of the given color remaining in
    /// this memspace.
    fn num_free_for_color(&self, handle: BuddyHandle, color: Color) -> usize;
}

/// A critical consumer descriptor (§3, §4.2): a subsystem whose metadata
/// must be sized proportionally to total managed RAM and is therefore
/// reserved, contiguously, before any buddy exists.
pub trait CriticalConsumer {
    /// A human-readable name, used only for logging.
    fn name(&self) -> &'static str;

    /// Reports how many contiguous pages this consumer needs, given the
    /// range of MPNs under consideration and whether this call is occurring
    /// during a hot-add (as opposed to initial boot).
    fn compute_pages(&self, min_mpn: Mpn, max_mpn: Mpn, is_hotadd: bool) -> u32;

    /// Accepts the contiguous block of `size` pages starting at `first_mpn`
    /// that critical reservation (C2) chose for this consumer.
    fn assign(
        &mut self,
        min_mpn: Mpn,
        max_mpn: Mpn,
        is_hotadd: bool,
        size: u32,
        first_mpn: Mpn,
    ) -> Result<(), &'static str>;
}
