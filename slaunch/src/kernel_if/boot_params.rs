//! Boot parameter marshalling
//!
//! The kernel's boot parameters (the "zero page") are opaque here. They are
//! either copied byte for byte into the staged low-memory page or left where
//! the Linux loader built them; in both cases the SLB ends up holding a
//! 32-bit pointer to them.

use core::{mem, slice};

use x86_64::PhysAddr;

use crate::config::{PAGE_SIZE, ParamPlacement};
use crate::error::{Result, SlaunchError};
use crate::memory::low_mem::StagedPage;
use crate::memory::phys::PhysMemory;

/// Borrowed view of the caller's boot parameters
///
/// The borrow keeps the structure alive and unmoved until the launch path
/// returns (or never returns).
#[derive(Debug, Clone, Copy)]
pub struct BootParameters<'a> {
    bytes: &'a [u8],
    phys: PhysAddr,
}

impl<'a> BootParameters<'a> {
    /// Wrap raw parameter bytes that live at physical address `phys`
    pub fn new(bytes: &'a [u8], phys: PhysAddr) -> Result<Self> {
        if bytes.len() > PAGE_SIZE {
            return Err(SlaunchError::ParamsTooLarge {
                size: bytes.len(),
                capacity: PAGE_SIZE,
            });
        }
        Ok(Self { bytes, phys })
    }

    /// View an identity-mapped structure as boot parameters
    ///
    /// # Safety
    ///
    /// - `T` must not contain padding bytes (they would be read uninitialized)
    /// - `params` must live at its virtual address in physical memory too
    pub unsafe fn from_identity_mapped<T>(params: &'a T) -> Result<Self> {
        let ptr = params as *const T as *const u8;
        // SAFETY: `T` is padding-free per the caller, the slice covers
        // exactly the referent and shares its lifetime.
        let bytes = unsafe { slice::from_raw_parts(ptr, mem::size_of::<T>()) };
        Self::new(bytes, PhysAddr::new(ptr as u64))
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn phys_addr(&self) -> PhysAddr {
        self.phys
    }
}

/// Copy the parameters verbatim into `page`, returning the page address
pub fn marshal(
    params: &BootParameters<'_>,
    page: &StagedPage,
    mem: &mut dyn PhysMemory,
) -> PhysAddr {
    debug_assert!(params.len() <= page.capacity());

    log::debug!(
        "boot_params: memmove({:#x}, {:#x}, {:#x})",
        page.addr().as_u64(),
        params.phys_addr().as_u64(),
        params.len()
    );
    mem.write_bytes(page.addr(), params.as_bytes());
    page.addr()
}

/// Value to store in the SLB parameter field
///
/// Fails when the address cannot be expressed in 32 bits.
pub fn slb_pointer(addr: PhysAddr) -> Result<u32> {
    u32::try_from(addr.as_u64()).map_err(|_| SlaunchError::AddressOutOfRange(addr.as_u64()))
}

/// Check, before anything irreversible, that `placement` can be honoured
pub fn check_placement(params: &BootParameters<'_>, placement: ParamPlacement) -> Result {
    match placement {
        // The staged page is below 1 MiB by construction.
        ParamPlacement::Staged => Ok(()),
        ParamPlacement::InPlace => slb_pointer(params.phys_addr()).map(|_| ()),
    }
}
