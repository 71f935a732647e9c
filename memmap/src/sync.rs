//! §5's lock hierarchy: `hot_mem_add_lock` (a plain spinlock) ranks above
//! `memmap_lock` (an IRQ-saving spinlock); each buddy's own internal lock
//! (external, out of scope) ranks below both. Modeled the way the rest of
//! the pack's kernels wrap `spin::Mutex` with an interrupt-disabling guard
//! rather than inventing a new primitive.

use spin::{Mutex, MutexGuard};

/// Disables/re-enables interrupts around a critical section. An external
/// collaborator: actual interrupt control is architecture-specific and out
/// of scope for this crate (§1).
pub trait InterruptGuard {
    /// Disables interrupts if not already disabled, returning whether they
    /// were enabled beforehand (so the matching `restore` call knows
    /// whether to re-enable them).
    fn disable(&self) -> bool;
    fn restore(&self, were_enabled: bool);
}

/// An `InterruptGuard` that never touches real interrupt state, for
/// UMA/test configurations with no interrupt controller to model.
pub struct NoopInterruptGuard;

impl InterruptGuard for NoopInterruptGuard {
    fn disable(&self) -> bool {
        false
    }
    fn restore(&self, _were_enabled: bool) {}
}

/// `memmap_lock`: a spinlock that disables interrupts for its duration, so
/// an allocation invoked from an interrupt-disabled context can't deadlock
/// against itself (§5).
pub struct IrqSafeMutex<'g, T> {
    inner: Mutex<T>,
    guard: &'g dyn InterruptGuard,
}

impl<'g, T> IrqSafeMutex<'g, T> {
    pub const fn new(value: T, guard: &'g dyn InterruptGuard) -> Self {
        IrqSafeMutex { inner: Mutex::new(value), guard }
    }

    pub fn lock(&self) -> IrqSafeGuard<'_, 'g, T> {
        let were_enabled = self.guard.disable();
        IrqSafeGuard { inner: Some(self.inner.lock()), guard: self.guard, were_enabled }
    }
}

/// The guard returned by [`IrqSafeMutex::lock`]; restores the prior
/// interrupt state on drop, after the inner spinlock guard has released.
pub struct IrqSafeGuard<'a, 'g, T> {
    inner: Option<MutexGuard<'a, T>>,
    guard: &'g dyn InterruptGuard,
    were_enabled: bool,
}

impl<'a, 'g, T> core::ops::Deref for IrqSafeGuard<'a, 'g, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.inner.as_ref().expect("IrqSafeGuard used after drop")
    }
}

impl<'a, 'g, T> core::ops::DerefMut for IrqSafeGuard<'a, 'g, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner.as_mut().expect("IrqSafeGuard used after drop")
    }
}

impl<'a, 'g, T> Drop for IrqSafeGuard<'a, 'g, T> {
    fn drop(&mut self) {
        // Release the spinlock before restoring interrupts, so the window
        // with interrupts disabled is exactly the lock's hold time.
        self.inner.take();
        self.guard.restore(self.were_enabled);
    }
}
