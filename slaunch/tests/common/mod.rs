// Shared harness for the launch-path integration tests
//
// Every collaborator appends to one event log so tests can check the order
// in which the launch path touches them.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::rc::Rc;

use nos_slaunch::arch::x86_64::skinit::{CPUID_ECX_SKINIT, CPUID_ECX_SVM, SkinitSupport};
use nos_slaunch::memory::AllocRequest;
use nos_slaunch::{
    BootParameters, BootTransition, Collaborators, CpuHandoffState, Locality, LowMemAllocator,
    LowMemoryMap, ModuleList, PhysMemory, Result, SlaunchError, SlaunchModule, SlaunchParams,
    TpmTransport,
};
use x86_64::PhysAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TpmInit,
    Locality(u8),
    Allocate,
    Write { addr: u64, len: usize },
    Boot(CpuHandoffState),
}

pub type EventLog = Rc<RefCell<Vec<Event>>>;

/// Sparse physical memory; unwritten bytes read as zero
pub struct Memory {
    bytes: BTreeMap<u64, u8>,
    log: EventLog,
}

impl Memory {
    pub fn new(log: EventLog) -> Self {
        Self {
            bytes: BTreeMap::new(),
            log,
        }
    }

    pub fn preload(&mut self, addr: u64, bytes: &[u8]) {
        for (i, b) in bytes.iter().enumerate() {
            self.bytes.insert(addr + i as u64, *b);
        }
    }

    pub fn dump(&self, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.read_bytes(PhysAddr::new(addr), &mut buf);
        buf
    }
}

impl PhysMemory for Memory {
    fn write_bytes(&mut self, addr: PhysAddr, bytes: &[u8]) {
        self.log.borrow_mut().push(Event::Write {
            addr: addr.as_u64(),
            len: bytes.len(),
        });
        self.preload(addr.as_u64(), bytes);
    }

    fn read_bytes(&self, addr: PhysAddr, buf: &mut [u8]) {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.bytes.get(&(addr.as_u64() + i as u64)).copied().unwrap_or(0);
        }
    }
}

pub struct Tpm {
    log: EventLog,
    pub fail_init: Option<SlaunchError>,
}

impl TpmTransport for Tpm {
    fn init(&mut self) -> Result {
        self.log.borrow_mut().push(Event::TpmInit);
        match self.fail_init {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn request_locality(&mut self, locality: Locality) -> Result {
        self.log.borrow_mut().push(Event::Locality(locality.raw()));
        Ok(())
    }
}

/// Records the hand-off state instead of leaving the loader
pub struct Handoff {
    log: EventLog,
}

impl BootTransition for Handoff {
    fn boot(&mut self, state: &CpuHandoffState) -> Result<Infallible> {
        self.log.borrow_mut().push(Event::Boot(*state));
        Err(SlaunchError::TransitionFailed("recorded"))
    }
}

/// CPUID Fn8000_0001 ECX and VM_CR as the launch path sees them
pub struct Cpu {
    pub ecx: u32,
    pub vm_cr: u64,
}

impl Cpu {
    pub fn capable() -> Self {
        Self {
            ecx: CPUID_ECX_SVM | CPUID_ECX_SKINIT,
            vm_cr: 0,
        }
    }
}

impl SkinitSupport for Cpu {
    fn ext_features(&self) -> u32 {
        self.ecx
    }

    fn vm_cr(&self) -> u64 {
        self.vm_cr
    }
}

pub struct Allocator {
    pub map: LowMemoryMap,
    log: EventLog,
}

impl LowMemAllocator for Allocator {
    fn allocate(&mut self, request: &AllocRequest) -> Result<PhysAddr> {
        self.log.borrow_mut().push(Event::Allocate);
        self.map.allocate(request)
    }
}

pub struct Harness {
    pub log: EventLog,
    pub allocator: Allocator,
    pub modules: ModuleList,
    pub cpu: Cpu,
    pub tpm: Tpm,
    pub memory: Memory,
    pub handoff: Handoff,
}

impl Harness {
    /// Conventional memory, no secure loader module
    pub fn new() -> Self {
        let log = EventLog::default();
        Self {
            allocator: Allocator {
                map: conventional_memory(),
                log: log.clone(),
            },
            modules: ModuleList::new(),
            cpu: Cpu::capable(),
            tpm: Tpm {
                log: log.clone(),
                fail_init: None,
            },
            memory: Memory::new(log.clone()),
            handoff: Handoff { log: log.clone() },
            log,
        }
    }

    pub fn with_secure_loader(mut self) -> Self {
        self.modules.push(secure_loader()).unwrap();
        self
    }

    pub fn collaborators(&mut self) -> Collaborators<'_> {
        Collaborators {
            allocator: &mut self.allocator,
            modules: &self.modules,
            cpu: &self.cpu,
            tpm: &mut self.tpm,
            memory: &mut self.memory,
            transition: &mut self.handoff,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.borrow().clone()
    }
}

/// 639 KiB of conventional memory with the BIOS areas held back
pub fn conventional_memory() -> LowMemoryMap {
    let mut map = LowMemoryMap::new();
    map.add_usable(0, 0x9_FC00);
    map.add_usable(0x10_0000, 0x3FF0_0000);
    map.reserve_legacy_fixtures();
    map
}

pub fn secure_loader() -> SlaunchModule {
    SlaunchModule {
        addr: PhysAddr::new(0x0400_0000),
        target: PhysAddr::new(0x0200_0000),
        size: 0x1_0000,
    }
}

/// Loader-built parameters at 1 MiB, real-mode target 0x9000
pub fn slaunch_params(raw: &[u8]) -> SlaunchParams<'_> {
    SlaunchParams {
        params: BootParameters::new(raw, PhysAddr::new(0x0010_0000)).unwrap(),
        real_mode_target: 0x9000,
        prot_mode_target: 0x0010_0000,
    }
}
