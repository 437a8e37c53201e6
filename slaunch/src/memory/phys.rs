//! Physical memory access
//!
//! The launch path writes to fixed physical addresses (the SLB, the staged
//! parameter page, TPM registers). All of it goes through [`PhysMemory`] so
//! the same code runs against identity-mapped RAM at boot and against a
//! fake in tests.

use core::ptr::{self, read_volatile, write_volatile};

use x86_64::PhysAddr;

/// Byte-level access to physical memory
pub trait PhysMemory {
    /// Copy `bytes` to `addr`
    fn write_bytes(&mut self, addr: PhysAddr, bytes: &[u8]);

    /// Fill `buf` from `addr`
    fn read_bytes(&self, addr: PhysAddr, buf: &mut [u8]);

    fn read_u8(&self, addr: PhysAddr) -> u8 {
        let mut byte = [0u8; 1];
        self.read_bytes(addr, &mut byte);
        byte[0]
    }

    fn write_u8(&mut self, addr: PhysAddr, value: u8) {
        self.write_bytes(addr, &[value]);
    }

    fn read_u32(&self, addr: PhysAddr) -> u32 {
        let mut raw = [0u8; 4];
        self.read_bytes(addr, &mut raw);
        u32::from_le_bytes(raw)
    }

    /// Little-endian 32-bit store
    fn write_u32(&mut self, addr: PhysAddr, value: u32) {
        self.write_bytes(addr, &value.to_le_bytes());
    }
}

/// Physical memory accessed through the loader's identity mapping
///
/// Scalar accesses are volatile so they are safe to use on MMIO.
pub struct IdentityMapped {
    _private: (),
}

impl IdentityMapped {
    /// # Safety
    ///
    /// - Every physical address passed to this accessor must be mapped 1:1
    /// - The caller owns the memory it writes (no aliasing Rust references)
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl PhysMemory for IdentityMapped {
    fn write_bytes(&mut self, addr: PhysAddr, bytes: &[u8]) {
        // SAFETY: identity mapping and ownership guaranteed by `new`'s contract.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), addr.as_u64() as *mut u8, bytes.len());
        }
    }

    fn read_bytes(&self, addr: PhysAddr, buf: &mut [u8]) {
        // SAFETY: identity mapping per `new`; `buf` is a distinct Rust borrow.
        unsafe {
            ptr::copy_nonoverlapping(addr.as_u64() as *const u8, buf.as_mut_ptr(), buf.len());
        }
    }

    fn read_u8(&self, addr: PhysAddr) -> u8 {
        // SAFETY: identity mapping per `new`; byte access has no alignment needs.
        unsafe { read_volatile(addr.as_u64() as *const u8) }
    }

    fn write_u8(&mut self, addr: PhysAddr, value: u8) {
        // SAFETY: identity mapping and ownership per `new`.
        unsafe { write_volatile(addr.as_u64() as *mut u8, value) }
    }

    fn read_u32(&self, addr: PhysAddr) -> u32 {
        // SAFETY: identity mapping per `new`; SLB and TIS fields are 4-byte aligned.
        unsafe { read_volatile(addr.as_u64() as *const u32) }
    }

    fn write_u32(&mut self, addr: PhysAddr, value: u32) {
        // SAFETY: identity mapping and ownership per `new`; callers pass
        // 4-byte aligned fields.
        unsafe { write_volatile(addr.as_u64() as *mut u32, value) }
    }
}
