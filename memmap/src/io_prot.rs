//! C6 — I/O Permission Map (debug builds only).
//!
//! Tracks, one bit per managed MPN, whether a device is currently permitted
//! to DMA into that page: on while allocated, off while free. Allocated as
//! a critical consumer (§4.2) of its own metadata pages, so its storage
//! grows only at boot/hot-add time, never during steady-state allocation.

extern crate alloc;

use alloc::vec::Vec;
use memmap_structs::{Mpn, MpnRange};

use buddy_api::CriticalConsumer;

use crate::config::PAGE_SIZE;

/// One contiguous chunk of managed memory this map covers, and the MPNs
/// backing its bitmap storage (§3).
#[derive(Debug, Clone)]
pub struct IoProtSegment {
    pub mem_range: MpnRange,
    pub metadata_range: MpnRange,
}

/// Bits per byte of metadata; one bit tracks one MPN.
const BITS_PER_BYTE: usize = 8;

/// The append-only segment array and its in-memory bit storage.
///
/// A real kernel stores each segment's bits inside its own `metadata_range`
/// (mapped kernel VA); this rewrite keeps the bits alongside the segment
/// descriptor directly, since the mapper itself is an out-of-scope external
/// collaborator (§1) and there is no page table to place real bits behind.
#[derive(Debug, Default)]
pub struct IoProtMap {
    segments: Vec<(IoProtSegment, Vec<u8>)>,
}

impl IoProtMap {
    pub fn new() -> Self {
        IoProtMap { segments: Vec::new() }
    }

    /// Registers a new managed range. Called once per piece C3 hands to a
    /// buddy, in ascending MPN order (segments are append-only and the
    /// lookup below relies on that ordering).
    pub fn add_segment(&mut self, mem_range: MpnRange, metadata_range: MpnRange) {
        let num_bits = mem_range.size_in_pages();
        let num_bytes = (num_bits + BITS_PER_BYTE - 1) / BITS_PER_BYTE;
        self.segments.push((IoProtSegment { mem_range, metadata_range }, alloc::vec![0u8; num_bytes]));
    }

    /// Bytes of metadata a segment of `num_pages` pages requires; used by
    /// the critical-consumer sizing this map is registered under.
    pub fn metadata_bytes_for(num_pages: usize) -> usize {
        let num_bytes = (num_pages + BITS_PER_BYTE - 1) / BITS_PER_BYTE;
        (num_bytes + PAGE_SIZE - 1) / PAGE_SIZE * PAGE_SIZE
    }

    fn find_segment_mut(&mut self, mpn: Mpn) -> Option<&mut (IoProtSegment, Vec<u8>)> {
        self.segments.iter_mut().find(|(seg, _)| seg.mem_range.contains(mpn))
    }

    /// Marks `mpn` as I/O-permitted (an allocation just succeeded there).
    pub fn mark_allocated(&mut self, mpn: Mpn) {
        self.set_bit(mpn, true);
    }

    /// Marks `mpn` as I/O-forbidden (the page was just freed).
    pub fn mark_freed(&mut self, mpn: Mpn) {
        self.set_bit(mpn, false);
    }

    fn set_bit(&mut self, mpn: Mpn, value: bool) {
        if let Some((seg, bits)) = self.find_segment_mut(mpn) {
            let index = mpn.number() - seg.mem_range.start().number();
            let (byte, bit) = (index / BITS_PER_BYTE, index % BITS_PER_BYTE);
            if value {
                bits[byte] |= 1 << bit;
            } else {
                bits[byte] &= !(1 << bit);
            }
        }
    }

    /// True if device I/O is currently permitted into `mpn`. MPNs below the
    /// first managed range are pre-MemMap memory and always permitted; MPNs
    /// above the last managed range are never permitted (§4.6).
    pub fn is_io_permitted(&self, mpn: Mpn) -> bool {
        if let Some(first) = self.segments.first() {
            if mpn.number() < first.0.mem_range.start().number() {
                return true;
            }
        } else {
            return true;
        }
        if let Some((seg, bits)) = self.segments.iter().find(|(seg, _)| seg.mem_range.contains(mpn)) {
            let index = mpn.number() - seg.mem_range.start().number();
            let (byte, bit) = (index / BITS_PER_BYTE, index % BITS_PER_BYTE);
            (bits[byte] & (1 << bit)) != 0
        } else {
            false
        }
    }
}

/// Registers the I/O permission map's own metadata as a critical consumer
/// (§4.2, §4.6): it needs `1 bit per MPN under consideration`, rounded up
/// to whole pages, reserved contiguously before any buddy exists.
pub struct IoProtReservation<'a> {
    map: &'a mut IoProtMap,
}

impl<'a> IoProtReservation<'a> {
    pub fn new(map: &'a mut IoProtMap) -> Self {
        IoProtReservation { map }
    }
}

impl<'a> CriticalConsumer for IoProtReservation<'a> {
    fn name(&self) -> &'static str {
        "io_prot"
    }

    fn compute_pages(&self, min_mpn: Mpn, max_mpn: Mpn, _is_hotadd: bool) -> u32 {
        let num_pages = max_mpn.number() + 1 - min_mpn.number();
        let bytes = IoProtMap::metadata_bytes_for(num_pages);
        (bytes / PAGE_SIZE) as u32
    }

    fn assign(&mut self, min_mpn: Mpn, max_mpn: Mpn, _is_hotadd: bool, size: u32, first_mpn: Mpn) -> Result<(), &'static str> {
        let covered = MpnRange::new(min_mpn, max_mpn);
        let metadata = MpnRange::new(first_mpn, Mpn::new(first_mpn.number() + size as usize - 1));
        self.map.add_segment(covered, metadata);
        Ok(())
    }
}
