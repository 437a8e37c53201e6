//! Low-memory staging
//!
//! The measured environment picks up its boot parameters through a 32-bit
//! pointer, so they have to be staged in a page below 1 MiB. This module
//! owns the request for that page and a small first-fit allocator over the
//! firmware memory map that satisfies it.

use core::ops::Range;

use arrayvec::ArrayVec;
use x86_64::PhysAddr;

use crate::config::PAGE_SIZE;
use crate::error::{Result, SlaunchError};

/// E820 Memory Map Entry Structure
#[derive(Debug, Clone, Copy)]
#[repr(C, packed)]
pub struct E820Entry {
    pub base_addr: u64,
    pub length: u64,
    pub type_: u32,
    pub acpi_attrs: u32,
}

/// Memory Types for E820
pub const E820_TYPE_USABLE: u32 = 1;
pub const E820_TYPE_RESERVED: u32 = 2;

/// Real-mode IVT and BIOS data area share the first page
pub const IVT_BDA_END: u64 = 0x1000;
/// Extended BIOS data area up to the end of conventional memory
pub const EBDA_BASE: u64 = 0x9_FC00;
pub const CONVENTIONAL_END: u64 = 0xA_0000;

/// Maximum number of free regions tracked
pub const MAX_REGIONS: usize = 32;

/// Which end of a window an allocation is taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preference {
    Low,
    High,
}

/// Placement request handed to the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRequest {
    pub size: usize,
    pub align: usize,
    /// Lowest acceptable start address
    pub min_addr: u64,
    /// The allocation must end at or below this address
    pub max_addr: u64,
    pub preference: Preference,
}

impl AllocRequest {
    /// One page-aligned page inside `window`, lowest address first
    pub fn page_in(window: Range<u64>) -> Self {
        Self {
            size: PAGE_SIZE,
            align: PAGE_SIZE,
            min_addr: window.start,
            max_addr: window.end,
            preference: Preference::Low,
        }
    }

    /// Check an allocator's answer against this request
    pub fn satisfied_by(&self, addr: u64) -> bool {
        let align = self.align.max(1) as u64;
        addr >= self.min_addr
            && addr % align == 0
            && addr
                .checked_add(self.size as u64)
                .is_some_and(|end| end <= self.max_addr)
    }
}

/// Physical range allocator
///
/// Allocations are permanent for the rest of the boot attempt; there is no
/// free operation.
pub trait LowMemAllocator {
    fn allocate(&mut self, request: &AllocRequest) -> Result<PhysAddr>;
}

/// Half-open physical range `[base, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub base: u64,
    pub end: u64,
}

impl Region {
    pub fn len(&self) -> u64 {
        self.end - self.base
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.base
    }
}

/// First-fit allocator over usable physical regions
#[derive(Debug, Clone)]
pub struct LowMemoryMap {
    free: ArrayVec<Region, MAX_REGIONS>,
}

impl LowMemoryMap {
    pub const fn new() -> Self {
        Self {
            free: ArrayVec::new_const(),
        }
    }

    /// Build from a firmware memory map, keeping usable entries only
    pub fn from_e820(entries: &[E820Entry]) -> Self {
        let mut map = Self::new();
        for entry in entries {
            let (base, length, type_) = (entry.base_addr, entry.length, entry.type_);
            if type_ == E820_TYPE_USABLE && !map.add_usable(base, length) {
                log::warn!("low_mem: dropping usable region {:#x}+{:#x}, map full", base, length);
            }
        }
        map
    }

    /// Add a usable range; returns false when the map is full
    pub fn add_usable(&mut self, base: u64, length: u64) -> bool {
        let region = Region {
            base,
            end: base.saturating_add(length),
        };
        if region.is_empty() {
            return true;
        }
        let pos = self.free.iter().position(|r| r.base > base).unwrap_or(self.free.len());
        self.free.try_insert(pos, region).is_ok()
    }

    /// Remove `[base, base + length)` from every free region
    pub fn reserve(&mut self, base: u64, length: u64) {
        let hole = Region {
            base,
            end: base.saturating_add(length),
        };
        let mut i = 0;
        while i < self.free.len() {
            let r = self.free[i];
            if hole.end <= r.base || hole.base >= r.end {
                i += 1;
                continue;
            }

            let head = Region { base: r.base, end: hole.base.max(r.base) };
            let tail = Region { base: hole.end.min(r.end), end: r.end };
            self.free.remove(i);

            for piece in [head, tail] {
                if piece.is_empty() {
                    continue;
                }
                if self.free.try_insert(i, piece).is_ok() {
                    i += 1;
                } else {
                    log::warn!("low_mem: map full, leaking {:#x}..{:#x}", piece.base, piece.end);
                }
            }
        }
    }

    /// Keep the IVT, BIOS data area and EBDA out of reach
    pub fn reserve_legacy_fixtures(&mut self) {
        self.reserve(0, IVT_BDA_END);
        self.reserve(EBDA_BASE, 0x10_0000 - EBDA_BASE);
    }

    pub fn free_regions(&self) -> &[Region] {
        &self.free
    }

    fn find(&self, request: &AllocRequest) -> Option<u64> {
        let size = request.size as u64;
        let align = request.align.max(1) as u64;
        debug_assert!(align.is_power_of_two());

        let fit = |r: &Region| -> Option<u64> {
            let lo = r.base.max(request.min_addr);
            let hi = r.end.min(request.max_addr);
            if hi < lo || hi - lo < size {
                return None;
            }
            match request.preference {
                Preference::Low => {
                    let start = lo.checked_add(align - 1)? & !(align - 1);
                    (start.checked_add(size)? <= hi).then_some(start)
                }
                Preference::High => {
                    let start = (hi - size) & !(align - 1);
                    (start >= lo).then_some(start)
                }
            }
        };

        match request.preference {
            Preference::Low => self.free.iter().find_map(fit),
            Preference::High => self.free.iter().rev().find_map(fit),
        }
    }
}

impl Default for LowMemoryMap {
    fn default() -> Self {
        Self::new()
    }
}

impl LowMemAllocator for LowMemoryMap {
    fn allocate(&mut self, request: &AllocRequest) -> Result<PhysAddr> {
        let start = self.find(request).ok_or(SlaunchError::OutOfMemory)?;
        self.reserve(start, request.size as u64);
        Ok(PhysAddr::new(start))
    }
}

/// Page reserved for the boot parameters
///
/// Never released: after SKINIT the measured environment reads it.
#[derive(Debug)]
pub struct StagedPage {
    addr: PhysAddr,
}

impl StagedPage {
    pub fn addr(&self) -> PhysAddr {
        self.addr
    }

    pub fn capacity(&self) -> usize {
        PAGE_SIZE
    }
}

/// Reserve one page in `window` for staging
pub fn stage_page(allocator: &mut dyn LowMemAllocator, window: Range<u64>) -> Result<StagedPage> {
    let request = AllocRequest::page_in(window);
    let addr = allocator.allocate(&request)?;

    if !request.satisfied_by(addr.as_u64()) {
        log::error!(
            "low_mem: allocator returned {:#x}, outside [{:#x}, {:#x}) or misaligned",
            addr.as_u64(),
            request.min_addr,
            request.max_addr
        );
        return Err(SlaunchError::OutOfMemory);
    }

    log::debug!("low_mem: staged page at {:#x}", addr.as_u64());
    Ok(StagedPage { addr })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LOW_MEM_MAX, LOW_MEM_MIN};

    fn conventional_memory() -> LowMemoryMap {
        let mut map = LowMemoryMap::new();
        map.add_usable(0, 0x9_FC00);
        map.add_usable(0x10_0000, 0x7FF0_0000);
        map.reserve_legacy_fixtures();
        map
    }

    #[test]
    fn test_stage_page_prefers_lowest_page() {
        let mut map = conventional_memory();
        let page = stage_page(&mut map, LOW_MEM_MIN..LOW_MEM_MAX).unwrap();
        assert_eq!(page.addr().as_u64(), 0x1000);
        assert_eq!(page.capacity(), 4096);
    }

    #[test]
    fn test_pages_are_never_handed_out_twice() {
        let mut map = conventional_memory();
        let a = stage_page(&mut map, LOW_MEM_MIN..LOW_MEM_MAX).unwrap();
        let b = stage_page(&mut map, LOW_MEM_MIN..LOW_MEM_MAX).unwrap();
        assert_eq!(b.addr().as_u64(), a.addr().as_u64() + 0x1000);
    }

    #[test]
    fn test_unaligned_region_is_rounded_up() {
        let mut map = LowMemoryMap::new();
        map.add_usable(0x1234, 0x3000);
        let page = stage_page(&mut map, LOW_MEM_MIN..LOW_MEM_MAX).unwrap();
        assert_eq!(page.addr().as_u64(), 0x2000);
    }

    #[test]
    fn test_out_of_memory_when_window_is_reserved() {
        let mut map = LowMemoryMap::new();
        map.add_usable(0x10_0000, 0x10_0000);
        let err = stage_page(&mut map, LOW_MEM_MIN..LOW_MEM_MAX).unwrap_err();
        assert_eq!(err, SlaunchError::OutOfMemory);
    }

    #[test]
    fn test_region_too_small_for_a_page() {
        let mut map = LowMemoryMap::new();
        map.add_usable(0x1800, 0x1000);
        assert!(stage_page(&mut map, LOW_MEM_MIN..LOW_MEM_MAX).is_err());
    }

    #[test]
    fn test_high_preference_takes_top_of_window() {
        let mut map = conventional_memory();
        let request = AllocRequest {
            preference: Preference::High,
            ..AllocRequest::page_in(LOW_MEM_MIN..LOW_MEM_MAX)
        };
        let addr = map.allocate(&request).unwrap();
        assert_eq!(addr.as_u64(), LOW_MEM_MAX - 0x1000);
    }

    #[test]
    fn test_reserve_splits_region() {
        let mut map = LowMemoryMap::new();
        map.add_usable(0x0, 0x10000);
        map.reserve(0x4000, 0x1000);
        assert_eq!(
            map.free_regions(),
            &[
                Region { base: 0x0, end: 0x4000 },
                Region { base: 0x5000, end: 0x10000 },
            ]
        );
    }

    #[test]
    fn test_legacy_fixtures_reserved() {
        let map = conventional_memory();
        assert_eq!(map.free_regions()[0], Region { base: 0x1000, end: EBDA_BASE });
        assert!(map.free_regions().iter().all(|r| r.base >= 0x1000));
    }

    #[test]
    fn test_from_e820_keeps_usable_only() {
        let entry = |base_addr: u64, length: u64, type_: u32| E820Entry {
            base_addr,
            length,
            type_,
            acpi_attrs: 0,
        };
        let entries = [
            entry(0, 0x9_FC00, E820_TYPE_USABLE),
            entry(0x9_FC00, 0x400, E820_TYPE_RESERVED),
            entry(0x10_0000, 0x100_0000, E820_TYPE_USABLE),
        ];
        let map = LowMemoryMap::from_e820(&entries);
        assert_eq!(map.free_regions().len(), 2);
        assert_eq!(map.free_regions()[1].base, 0x10_0000);
    }

    struct RogueAllocator;

    impl LowMemAllocator for RogueAllocator {
        fn allocate(&mut self, _request: &AllocRequest) -> Result<PhysAddr> {
            Ok(PhysAddr::new(0x9_0800))
        }
    }

    #[test]
    fn test_out_of_window_answer_rejected() {
        let err = stage_page(&mut RogueAllocator, LOW_MEM_MIN..LOW_MEM_MAX).unwrap_err();
        assert_eq!(err, SlaunchError::OutOfMemory);
    }
}
