//! The scheduler, an external collaborator (§1, §6): owns VM/world
//! lifecycle, per-VM color lists, and the system-wide "memory is low"
//! signal. The policy engine (C4) only ever calls into it through this
//! trait; it never reaches back into scheduler internals.

use memmap_structs::Color;

use crate::node_mask::NodeMask;
use crate::world::WorldId;

/// A world's allowed-color list, or "any color is fine" (§6,
/// `allowed_colors`).
#[derive(Debug, Clone, Copy)]
pub enum AllowedColors<'a> {
    All,
    List(&'a [Color]),
}

impl<'a> AllowedColors<'a> {
    pub fn contains(&self, color: Color) -> bool {
        match self {
            AllowedColors::All => true,
            AllowedColors::List(list) => list.contains(&color),
        }
    }
}

/// Hooks into the scheduler/monitor, satisfied by a real scheduler in
/// production and by a fixed stand-in in tests.
pub trait SchedulerHooks {
    /// True when the scheduler considers memory tight enough that new
    /// allocations should favor giving pages back over holding them.
    fn memory_is_low(&self) -> bool;

    /// The NUMA nodes `world` prefers to allocate from.
    fn node_affinity_mask(&self, world: WorldId) -> NodeMask;

    /// The colors `world` is permitted to allocate, or "all".
    fn allowed_colors(&self, world: WorldId) -> AllowedColors<'_>;

    /// Called under `memmap_lock` after every counter update on the
    /// allocation and free paths (§6).
    fn on_free_pages_change(&self, unused_pages: usize);

    /// True once a checkpoint has begun for `world`, or the world has been
    /// marked dying — either terminates the waiting allocation variant
    /// early (§4.4, §5).
    fn should_abandon_wait(&self, world: WorldId) -> bool;
}

/// A scheduler stand-in with no affinity preference, no color
/// restrictions, and memory never reported low. Used for UMA/test
/// configurations and the kernel-only allocation paths that pass no world.
pub struct NoAffinityScheduler;

impl SchedulerHooks for NoAffinityScheduler {
    fn memory_is_low(&self) -> bool {
        false
    }

    fn node_affinity_mask(&self, _world: WorldId) -> NodeMask {
        NodeMask::empty()
    }

    fn allowed_colors(&self, _world: WorldId) -> AllowedColors<'_> {
        AllowedColors::All
    }

    fn on_free_pages_change(&self, _unused_pages: usize) {}

    fn should_abandon_wait(&self, _world: WorldId) -> bool {
        false
    }
}
