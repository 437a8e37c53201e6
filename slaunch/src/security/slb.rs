//! Secure Loader Block
//!
//! SKINIT takes the SLB's physical address in EAX. The first two 16-bit words
//! of the block are its entry offset and length (AMD64 APM vol. 2, "Secure Loader Block");
//! the secure loader keeps a 32-bit pointer to the boot parameters further
//! into its header. That pointer is the only thing the loader writes here.

use x86_64::PhysAddr;

use crate::config::SLB_MAX_SIZE;
use crate::memory::phys::PhysMemory;

/// Architectural SLB header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlbHeader {
    pub entry_offset: u16,
    pub length: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureLoaderBlock {
    base: PhysAddr,
    params_offset: usize,
}

impl SecureLoaderBlock {
    pub fn new(base: PhysAddr, params_offset: usize) -> Self {
        assert!(base.is_aligned(SLB_MAX_SIZE as u64), "SLB base not 64 KiB aligned");
        assert!(base.as_u64() <= u32::MAX as u64, "SLB base above 4 GiB");
        assert!(params_offset + 4 <= SLB_MAX_SIZE, "SLB parameter field out of bounds");
        Self { base, params_offset }
    }

    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// SKINIT operand; the base is checked to fit at construction
    pub fn base_u32(&self) -> u32 {
        self.base.as_u64() as u32
    }

    /// Physical address of the boot-parameter pointer
    pub fn params_field(&self) -> PhysAddr {
        self.base + self.params_offset as u64
    }

    pub fn read_header(&self, mem: &dyn PhysMemory) -> SlbHeader {
        let raw = mem.read_u32(self.base);
        SlbHeader {
            entry_offset: raw as u16,
            length: (raw >> 16) as u16,
        }
    }

    /// Log the header and flag a block too short to hold the pointer
    pub fn log_header(&self, mem: &dyn PhysMemory) {
        let header = self.read_header(mem);
        log::debug!(
            "slb: base {:#x}, entry {:#x}, length {:#x}",
            self.base.as_u64(),
            header.entry_offset,
            header.length
        );
        if (header.length as usize) < self.params_offset + 4 {
            log::warn!("slb: length {:#x} does not cover the parameter field", header.length);
        }
    }

    /// Store `params` in the SLB header; no other byte is touched
    pub fn patch_params_pointer(&self, mem: &mut dyn PhysMemory, params: u32) {
        log::debug!("slb: [{:#x}] <- {:#x}", self.params_field().as_u64(), params);
        mem.write_u32(self.params_field(), params);
    }

    pub fn params_pointer(&self, mem: &dyn PhysMemory) -> u32 {
        mem.read_u32(self.params_field())
    }
}
