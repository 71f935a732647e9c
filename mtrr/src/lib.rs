//! The MTRR cachability oracle, an external collaborator (§1, §6) the
//! MemMap consults to reject any MPN that isn't write-back cachable before
//! handing it to a buddy.

#![no_std]

use memmap_structs::Mpn;

/// The contract range ingest (C1) and the policy engine's invariant checks
/// (P3) are built against.
pub trait CachabilityOracle {
    /// Returns `true` if the given MPN is backed by write-back cachable
    /// memory according to the current MTRR configuration.
    fn is_wb_cached_mpn(&self, mpn: Mpn) -> bool;
}

/// A trivial oracle that reports every MPN as write-back cachable. Useful
/// for UMA test configurations and for platforms where the MTRR table has
/// already been collapsed into "everything is cachable" by the boot
/// collaborator.
pub struct AlwaysCachable;

impl CachabilityOracle for AlwaysCachable {
    fn is_wb_cached_mpn(&self, _mpn: Mpn) -> bool {
        true
    }
}
