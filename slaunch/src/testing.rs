//! Test doubles shared by the unit tests

use std::collections::BTreeMap;
use std::vec::Vec;

use x86_64::PhysAddr;

use crate::memory::phys::PhysMemory;

/// Sparse physical memory; unwritten bytes read as zero
#[derive(Default)]
pub struct FakeMemory {
    bytes: BTreeMap<u64, u8>,
    writes: Vec<(u64, usize)>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load `bytes` without recording a write
    pub fn preload(&mut self, addr: u64, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.bytes.insert(addr + i as u64, *b);
        }
    }

    /// Every `(address, length)` written since construction
    pub fn writes(&self) -> &[(u64, usize)] {
        &self.writes
    }

    /// Addresses of all bytes that were preloaded or written
    pub fn touched(&self) -> Vec<u64> {
        self.bytes.keys().copied().collect()
    }

    pub fn dump(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.read_bytes(PhysAddr::new(addr), &mut buf);
        buf
    }
}

impl PhysMemory for FakeMemory {
    fn write_bytes(&mut self, addr: PhysAddr, bytes: &[u8]) {
        self.writes.push((addr.as_u64(), bytes.len()));
        self.preload(addr.as_u64(), bytes);
    }

    fn read_bytes(&self, addr: PhysAddr, buf: &mut [u8]) {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.bytes.get(&(addr.as_u64() + i as u64)).copied().unwrap_or(0);
        }
    }
}
