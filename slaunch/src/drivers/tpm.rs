//! TPM locality coordination
//!
//! SKINIT runs the secure loader at TPM locality 4, which only the CPU can
//! assert. Before the instruction fires, the loader has to bring the TPM
//! transport up and give up every software locality it holds so that the
//! measured environment gets the TPM to itself.
//!
//! [`TisTpm`] drives the memory-mapped TIS interface; anything else that
//! implements [`TpmTransport`] can stand in for it.

use bitflags::bitflags;
use x86_64::PhysAddr;

use crate::error::{Result, SlaunchError};
use crate::memory::phys::PhysMemory;

/// TPM base address (typically 0xFED40000)
pub const TPM_BASE: u64 = 0xFED4_0000;

/// Each locality owns a 4 KiB register page
pub const TIS_LOCALITY_STRIDE: u64 = 0x1000;

/// Register offsets within a locality page
pub const TIS_ACCESS: u64 = 0x00;
pub const TIS_DID_VID: u64 = 0xF00;

/// Access-register polls before giving up on a locality request
pub const TIS_POLL_LIMIT: u32 = 1_000_000;

bitflags! {
    /// TPM_ACCESS_x register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u8 {
        const ESTABLISHMENT = 0x01;
        const REQUEST_USE = 0x02;
        const PENDING_REQUEST = 0x04;
        const SEIZE = 0x08;
        const BEEN_SEIZED = 0x10;
        const ACTIVE_LOCALITY = 0x20;
        const REG_VALID_STS = 0x80;
    }
}

/// TPM locality
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Locality(u8);

impl Locality {
    pub const ZERO: Locality = Locality(0);
    pub const ONE: Locality = Locality(1);
    pub const TWO: Locality = Locality(2);
    pub const THREE: Locality = Locality(3);
    /// Hardware locality, asserted by the CPU during SKINIT only
    pub const FOUR: Locality = Locality(4);
    /// Request made before a dynamic launch: hold no software locality
    pub const DRTM: Locality = Locality(0xFF);

    pub const fn new(raw: u8) -> Self {
        Locality(raw)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Localities 0-3 can be requested by software
    pub const fn is_software(self) -> bool {
        self.0 <= 3
    }
}

/// TPM command transport as seen by the launch path
pub trait TpmTransport {
    /// Bring the transport up; idempotent
    fn init(&mut self) -> Result;

    /// Move the TPM to `locality`
    fn request_locality(&mut self, locality: Locality) -> Result;
}

/// TPM Interface Specification (TIS) MMIO driver
pub struct TisTpm<M: PhysMemory> {
    mem: M,
    base: PhysAddr,
    ready: bool,
    active: Option<Locality>,
    poll_limit: u32,
}

impl<M: PhysMemory> TisTpm<M> {
    /// Driver for the TPM at the standard base address
    pub fn new(mem: M) -> Self {
        Self::with_base(mem, PhysAddr::new(TPM_BASE))
    }

    pub fn with_base(mem: M, base: PhysAddr) -> Self {
        Self {
            mem,
            base,
            ready: false,
            active: None,
            poll_limit: TIS_POLL_LIMIT,
        }
    }

    pub fn with_poll_limit(mut self, limit: u32) -> Self {
        self.poll_limit = limit;
        self
    }

    /// Locality currently held by software, if any
    pub fn active_locality(&self) -> Option<Locality> {
        self.active
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn memory(&self) -> &M {
        &self.mem
    }

    fn reg(&self, locality: u8, offset: u64) -> PhysAddr {
        self.base + (locality as u64 * TIS_LOCALITY_STRIDE + offset)
    }

    fn access(&self, locality: u8) -> AccessFlags {
        AccessFlags::from_bits_retain(self.mem.read_u8(self.reg(locality, TIS_ACCESS)))
    }

    fn write_access(&mut self, locality: u8, flags: AccessFlags) {
        let reg = self.reg(locality, TIS_ACCESS);
        self.mem.write_u8(reg, flags.bits());
    }

    fn relinquish_all(&mut self) {
        let held = AccessFlags::REG_VALID_STS | AccessFlags::ACTIVE_LOCALITY;
        for locality in 0..=Locality::THREE.raw() {
            if self.access(locality).contains(held) {
                log::debug!("tpm: relinquishing locality {}", locality);
                self.write_access(locality, AccessFlags::ACTIVE_LOCALITY);
            }
        }
        self.active = None;
    }
}

impl<M: PhysMemory> TpmTransport for TisTpm<M> {
    fn init(&mut self) -> Result {
        if self.ready {
            return Ok(());
        }

        let raw = self.mem.read_u8(self.reg(0, TIS_ACCESS));
        // A floating bus reads all ones.
        if raw == 0xFF || !AccessFlags::from_bits_retain(raw).contains(AccessFlags::REG_VALID_STS) {
            log::warn!("tpm: no TIS interface at {:#x}", self.base.as_u64());
            return Err(SlaunchError::TpmNotPresent);
        }

        let did_vid = self.mem.read_u32(self.reg(0, TIS_DID_VID));
        log::debug!(
            "tpm: TIS at {:#x}, vendor {:#06x}, device {:#06x}",
            self.base.as_u64(),
            did_vid & 0xFFFF,
            did_vid >> 16
        );
        self.ready = true;
        Ok(())
    }

    fn request_locality(&mut self, locality: Locality) -> Result {
        if !self.ready {
            return Err(SlaunchError::TpmNotInitialized);
        }
        if !locality.is_software() && locality != Locality::DRTM {
            return Err(SlaunchError::InvalidLocality(locality.raw()));
        }

        self.relinquish_all();
        if locality == Locality::DRTM {
            log::debug!("tpm: software localities released for dynamic launch");
            return Ok(());
        }

        let l = locality.raw();
        self.write_access(l, AccessFlags::REQUEST_USE);
        let granted = AccessFlags::REG_VALID_STS | AccessFlags::ACTIVE_LOCALITY;
        for _ in 0..self.poll_limit {
            if self.access(l).contains(granted) {
                log::debug!("tpm: locality {} active", l);
                self.active = Some(locality);
                return Ok(());
            }
            core::hint::spin_loop();
        }

        log::error!("tpm: locality {} not granted", l);
        Err(SlaunchError::TpmTimeout(l))
    }
}
