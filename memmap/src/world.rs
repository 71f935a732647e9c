//! Identifiers for the VM/user-mode callers the policy engine allocates on
//! behalf of. `World` and guest-physical addressing are owned by the
//! scheduler/monitor collaborators (§1's non-goals list "guest
//! physical-to-machine translation" as a peer, not a MemMap concern); the
//! MemMap only needs an opaque identity for affinity and round-robin color
//! bookkeeping.

/// Identifies a VM or user-mode world making an allocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorldId(pub usize);

/// A guest-physical page number, used only to derive an initial color for
/// VM physical-page allocations (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ppn(pub usize);
