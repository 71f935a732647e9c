//! The error taxonomy of §7, as a closed sum type (per the "Tagged
//! variants" design note) instead of a family of `&'static str` return codes.

use core::fmt;

/// Errors returned by the MemMap's public allocation and initialization API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemMapError {
    /// The policy cascade exhausted all nodes, colors, zones, and affinity
    /// fallbacks (§7).
    OutOfMemory,
    /// Intermediate-only: the requested node mask and the zone's recommended
    /// node mask did not intersect. Never surfaces past the policy engine's
    /// internal retries (§4.4), because the final cascade step disables
    /// affinity and searches the full mask.
    NodeMaskConflict,
    /// Fatal boot-time error: a BIOS/NUMA mismatch, a node with zero pages,
    /// or no low-memory node at all.
    InvalidMemMap,
    /// A BIOS range failed the memory self-test in full; the range was
    /// discarded and boot continues.
    BadAddrRange,
    /// A malformed argument: `num_pages` not a power of two, an empty or
    /// otherwise impossible `node_mask`, an overlapping hot-add range, etc.
    BadParam,
}

impl fmt::Display for MemMapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            MemMapError::OutOfMemory => "out of memory",
            MemMapError::NodeMaskConflict => "node mask conflict",
            MemMapError::InvalidMemMap => "invalid memory map",
            MemMapError::BadAddrRange => "bad address range",
            MemMapError::BadParam => "bad parameter",
        };
        f.write_str(msg)
    }
}

/// Outcome of a single policy-engine attempt (§4.4, §9's `PolicyReturnCode`).
/// Distinct from [`MemMapError`] because `ColorConflict`/`TypeConflict`
/// never escape the policy engine's internal node/color walk; they only
/// explain, for logging purposes, why a particular candidate was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PolicyOutcome {
    Ok,
    ColorConflict,
    NodeMaskConflict,
    TypeConflict,
    NoPages,
}
