//! Configuration values and settings used by the MemMap physical page
//! allocator: page size, the low/high zone boundary, cache-color bounds,
//! and the tunable percentages and watermarks from the allocation policy.

#![no_std]

pub mod memory;
