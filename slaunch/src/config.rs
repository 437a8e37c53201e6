//! Secure-launch configuration
//!
//! Physical layout constants for the SKINIT path and the runtime
//! configuration built on top of them.

use core::ops::Range;

use static_assertions::const_assert;
use x86_64::PhysAddr;

use crate::drivers::tpm::Locality;

/// Staging granularity (4 KiB)
pub const PAGE_SIZE: usize = 4096;

/// Physical base of the Secure Loader Block
///
/// The secure-loader module is relocated to 32 MiB by the module loader.
/// SKINIT requires the SLB to be 64 KiB aligned (AMD64 APM vol. 2, "SKINIT").
pub const SLB_BASE: u64 = 0x0200_0000;

/// SKINIT protects at most 64 KiB starting at the SLB base
pub const SLB_MAX_SIZE: usize = 0x1_0000;

/// Offset of the 32-bit boot-parameter pointer in the SLB header
pub const SLB_PARAMS_OFFSET: usize = 0x18;

/// Lowest address the parameter page may use (above the real-mode IVT)
pub const LOW_MEM_MIN: u64 = 0x1000;

/// End of the parameter window (below the EBDA and legacy video memory)
pub const LOW_MEM_MAX: u64 = 0x9_0000;

/// COM1, used by the trampoline for its pre/post SKINIT markers
pub const DIAG_SERIAL_PORT: u16 = 0x3F8;
pub const PRE_SKINIT_MARKER: u8 = b'S';
pub const POST_SKINIT_MARKER: u8 = b'X';

const_assert!(SLB_BASE % (SLB_MAX_SIZE as u64) == 0);
const_assert!(SLB_BASE <= u32::MAX as u64);
const_assert!(SLB_PARAMS_OFFSET % 4 == 0);
const_assert!(SLB_PARAMS_OFFSET + 4 <= SLB_MAX_SIZE);
const_assert!(LOW_MEM_MIN % (PAGE_SIZE as u64) == 0);
const_assert!(LOW_MEM_MAX % (PAGE_SIZE as u64) == 0);
const_assert!(LOW_MEM_MAX <= 0xA_0000);

/// Where the measured environment finds the boot parameters
///
/// `InPlace` is the default: the SLB gets a pointer to the structure the
/// Linux loader built. `Staged` copies it into the low-memory window first,
/// for loaders that build the structure above 4 GiB or in memory the
/// measured environment does not keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamPlacement {
    /// Copy into a page in the low-memory window and pass that page
    Staged,
    /// Pass the existing physical address of the caller's structure
    InPlace,
}

/// SKINIT launch configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkinitConfig {
    pub slb_base: PhysAddr,
    pub slb_params_offset: usize,
    pub low_min: u64,
    pub low_max: u64,
    pub placement: ParamPlacement,
    pub locality: Locality,
    pub serial_port: u16,
    pub pre_marker: u8,
    pub post_marker: u8,
}

impl SkinitConfig {
    /// Platform defaults
    pub const fn new() -> Self {
        Self {
            slb_base: PhysAddr::new(SLB_BASE),
            slb_params_offset: SLB_PARAMS_OFFSET,
            low_min: LOW_MEM_MIN,
            low_max: LOW_MEM_MAX,
            placement: ParamPlacement::InPlace,
            locality: Locality::DRTM,
            serial_port: DIAG_SERIAL_PORT,
            pre_marker: PRE_SKINIT_MARKER,
            post_marker: POST_SKINIT_MARKER,
        }
    }

    pub fn with_placement(mut self, placement: ParamPlacement) -> Self {
        self.placement = placement;
        self
    }

    pub fn with_slb_base(mut self, base: u64) -> Self {
        self.slb_base = PhysAddr::new(base);
        self
    }

    pub fn with_low_window(mut self, min: u64, max: u64) -> Self {
        self.low_min = min;
        self.low_max = max;
        self
    }

    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = locality;
        self
    }

    pub fn with_markers(mut self, port: u16, pre: u8, post: u8) -> Self {
        self.serial_port = port;
        self.pre_marker = pre;
        self.post_marker = post;
        self
    }

    /// Physical window staged pages must come from
    pub fn low_window(&self) -> Range<u64> {
        self.low_min..self.low_max
    }

    /// Assert the layout invariants SKINIT depends on
    ///
    /// Called once before a launch; a violation is a build or board
    /// configuration bug, not something to recover from.
    pub fn validate(&self) {
        assert!(
            self.slb_base.is_aligned(SLB_MAX_SIZE as u64),
            "SLB base {:#x} not 64 KiB aligned",
            self.slb_base.as_u64()
        );
        assert!(
            self.slb_base.as_u64() + SLB_MAX_SIZE as u64 <= u32::MAX as u64 + 1,
            "SLB must lie below 4 GiB"
        );
        assert!(
            self.slb_params_offset % 4 == 0 && self.slb_params_offset + 4 <= SLB_MAX_SIZE,
            "SLB parameter field out of bounds"
        );
        assert!(
            self.low_min % PAGE_SIZE as u64 == 0 && self.low_max % PAGE_SIZE as u64 == 0,
            "low-memory window must be page aligned"
        );
        assert!(
            self.low_min >= LOW_MEM_MIN
                && self.low_max <= LOW_MEM_MAX
                && self.low_min < self.low_max,
            "low-memory window outside [{:#x}, {:#x})",
            LOW_MEM_MIN,
            LOW_MEM_MAX
        );
    }
}

impl Default for SkinitConfig {
    fn default() -> Self {
        Self::new()
    }
}
