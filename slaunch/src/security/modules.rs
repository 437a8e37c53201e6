//! Secure loader modules
//!
//! The `slaunch_module` command loads the secure loader (the SLB image) and
//! records it here. SKINIT is only attempted when at least one module is
//! present; otherwise the loader falls back to a normal boot.

use arrayvec::ArrayVec;
use spin::Mutex;
use x86_64::PhysAddr;

use crate::error::{Result, SlaunchError};

/// Maximum number of secure loader modules
pub const MAX_SLAUNCH_MODULES: usize = 8;

/// A loaded secure loader module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaunchModule {
    /// Where the image was read to
    pub addr: PhysAddr,
    /// Where it is relocated for launch
    pub target: PhysAddr,
    pub size: usize,
}

/// Presence query used by the launch gate
pub trait ModuleRegistry {
    fn has_secure_loader_module(&self) -> bool;

    /// Relocation target of the first loaded module
    fn secure_loader_target(&self) -> Option<PhysAddr>;
}

/// Fixed-capacity list of loaded modules
#[derive(Debug, Clone, Default)]
pub struct ModuleList {
    modules: ArrayVec<SlaunchModule, MAX_SLAUNCH_MODULES>,
}

impl ModuleList {
    pub const fn new() -> Self {
        Self {
            modules: ArrayVec::new_const(),
        }
    }

    pub fn push(&mut self, module: SlaunchModule) -> Result {
        self.modules
            .try_push(module)
            .map_err(|_| SlaunchError::ModuleListFull)
    }

    pub fn first(&self) -> Option<&SlaunchModule> {
        self.modules.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlaunchModule> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn clear(&mut self) {
        self.modules.clear();
    }
}

impl ModuleRegistry for ModuleList {
    fn has_secure_loader_module(&self) -> bool {
        !self.is_empty()
    }

    fn secure_loader_target(&self) -> Option<PhysAddr> {
        self.first().map(|module| module.target)
    }
}

static MODULES: Mutex<ModuleList> = Mutex::new(ModuleList::new());

/// Record a loaded secure loader module
pub fn register_module(module: SlaunchModule) -> Result {
    log::debug!(
        "slaunch_module: {:#x} -> {:#x} ({:#x} bytes)",
        module.addr.as_u64(),
        module.target.as_u64(),
        module.size
    );
    MODULES.lock().push(module)
}

/// Forget every registered module (`slaunch` reset or loader unload)
pub fn clear_modules() {
    MODULES.lock().clear();
}

/// Snapshot of the registered modules
pub fn modules() -> ModuleList {
    MODULES.lock().clone()
}

/// Handle onto the loader-wide module list
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalModules;

impl ModuleRegistry for GlobalModules {
    fn has_secure_loader_module(&self) -> bool {
        MODULES.lock().has_secure_loader_module()
    }

    fn secure_loader_target(&self) -> Option<PhysAddr> {
        MODULES.lock().secure_loader_target()
    }
}

/// Outcome of the presence gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    Skip,
}

/// Decide whether the secure path is taken
pub fn check_gate(registry: &dyn ModuleRegistry) -> Gate {
    if registry.has_secure_loader_module() {
        Gate::Proceed
    } else {
        log::warn!("Secure Loader module not loaded, run slaunch_module");
        Gate::Skip
    }
}

/// Warn when the loaded module was not relocated to the SLB base
///
/// Returns false on a mismatch; an empty registry has nothing to compare.
pub fn check_target(registry: &dyn ModuleRegistry, slb_base: PhysAddr) -> bool {
    match registry.secure_loader_target() {
        Some(target) if target != slb_base => {
            log::warn!(
                "slaunch_module: target {:#x} differs from SLB base {:#x}",
                target.as_u64(),
                slb_base.as_u64()
            );
            false
        }
        _ => true,
    }
}
