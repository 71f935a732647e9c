//! The kernel virtual-address mapper, an external collaborator (§1, §5)
//! used to touch metadata pages (the buddies' own bookkeeping, the MemMap's
//! own I/O-permission bitmap). Out of scope to implement for real — no
//! actual page tables exist here — but its contract and the
//! scoped-acquisition discipline around it (§5: "All mapping/unmapping is
//! wrapped in a scoped acquisition that guarantees release on every exit
//! path") are part of this crate's surface.

use memmap_structs::MpnRange;

use crate::error::MemMapError;

/// The mapper contract. Two real backends exist before and after the
/// scoped-virtual-mapping subsystem is initialized (§5); both satisfy this
/// same trait, so the pool builder (C3) and I/O-permission map (C6) don't
/// need to know which is in effect.
pub trait KernelMapper {
    /// Maps `range` into kernel virtual address space for scratch/metadata
    /// use.
    fn map_metadata(&mut self, range: MpnRange) -> Result<(), MemMapError>;

    /// Reverses a prior `map_metadata` call for the same range.
    fn unmap_metadata(&mut self, range: MpnRange);
}

/// A scoped mapping: maps on construction, unmaps on drop unless explicitly
/// [`ScopedMapping::keep`]-ed. Used so that a failure partway through
/// constructing a buddy (C3) or an I/O-permission segment (C6) can't leak a
/// mapping, while a successful construction can still keep the metadata
/// mapped for the lifetime of the subsystem it backs.
pub struct ScopedMapping<'a> {
    mapper: &'a mut dyn KernelMapper,
    range: MpnRange,
    keep: bool,
}

impl<'a> ScopedMapping<'a> {
    pub fn new(mapper: &'a mut dyn KernelMapper, range: MpnRange) -> Result<Self, MemMapError> {
        mapper.map_metadata(range)?;
        Ok(ScopedMapping { mapper, range, keep: false })
    }

    /// Call once the mapping has been successfully handed off to its
    /// long-lived owner (a buddy memspace, an I/O-permission segment); the
    /// mapping then outlives this guard.
    pub fn keep(mut self) {
        self.keep = true;
        // Dropping `self` still runs `Drop::drop`, which checks `self.keep`.
    }
}

impl<'a> Drop for ScopedMapping<'a> {
    fn drop(&mut self) {
        if !self.keep {
            self.mapper.unmap_metadata(self.range);
        }
    }
}

/// A mapper stand-in that performs no real mapping, for UMA/test
/// configurations where no address space exists to map into.
pub struct NoopMapper;

impl KernelMapper for NoopMapper {
    fn map_metadata(&mut self, _range: MpnRange) -> Result<(), MemMapError> {
        Ok(())
    }

    fn unmap_metadata(&mut self, _range: MpnRange) {}
}
