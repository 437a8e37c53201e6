//! SKINIT secure launch
//!
//! Entry point used by the Linux loader once a kernel, its boot parameters
//! and a secure loader module are in memory. The sequence is fixed:
//!
//! 1. module gate (the only branch; skipping is not an error)
//! 2. CPU support check, TPM init and locality request
//! 3. boot parameters staged in low memory (or referenced in place)
//! 4. trampoline placed, SLB parameter pointer patched
//! 5. boot transition into the trampoline, which executes SKINIT
//!
//! On success step 5 does not return.

use spin::Mutex;

use crate::arch::x86_64::skinit::{
    BootTransition, CpuHandoffState, SkinitSupport, TRAMPOLINE_LEN, check_support, trampoline_code,
};
use crate::config::{ParamPlacement, SkinitConfig};
use crate::drivers::tpm::TpmTransport;
use crate::error::Result;
use crate::kernel_if::boot_params::{BootParameters, check_placement, marshal, slb_pointer};
use crate::memory::low_mem::{AllocRequest, LowMemAllocator, Preference, stage_page};
use crate::memory::phys::PhysMemory;
use crate::security::modules::{Gate, ModuleRegistry, check_gate, check_target};
use crate::security::slb::SecureLoaderBlock;

/// Secure-launch parameters handed over by the Linux loader
#[derive(Debug, Clone, Copy)]
pub struct SlaunchParams<'a> {
    pub params: BootParameters<'a>,
    pub real_mode_target: u32,
    pub prot_mode_target: u32,
}

/// Why the secure path was not taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoSecureLoader,
}

/// Secure launch was skipped; the loader continues with a normal boot
///
/// A performed launch never returns, so this is the only success value.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Skipped {
    pub reason: SkipReason,
}

/// Services the launch path borrows from the loader
pub struct Collaborators<'a> {
    pub allocator: &'a mut dyn LowMemAllocator,
    pub modules: &'a dyn ModuleRegistry,
    pub cpu: &'a dyn SkinitSupport,
    pub tpm: &'a mut dyn TpmTransport,
    pub memory: &'a mut dyn PhysMemory,
    pub transition: &'a mut dyn BootTransition,
}

/// Launch the secure loader with SKINIT
pub fn boot_skinit(
    config: &SkinitConfig,
    sl: &SlaunchParams<'_>,
    env: Collaborators<'_>,
) -> Result<Skipped> {
    let Collaborators {
        allocator,
        modules,
        cpu,
        tpm,
        memory,
        transition,
    } = env;

    config.validate();
    let slb = SecureLoaderBlock::new(config.slb_base, config.slb_params_offset);

    log::debug!("skinit: real_mode_target: {:#x}", sl.real_mode_target);
    log::debug!("skinit: prot_mode_target: {:#x}", sl.prot_mode_target);
    log::debug!(
        "skinit: params: {:#x} ({:#x} bytes)",
        sl.params.phys_addr().as_u64(),
        sl.params.len()
    );

    if check_gate(modules) == Gate::Skip {
        return Ok(Skipped {
            reason: SkipReason::NoSecureLoader,
        });
    }
    check_target(modules, config.slb_base);
    check_support(cpu)?;
    check_placement(&sl.params, config.placement)?;

    tpm.init()?;
    tpm.request_locality(config.locality)?;

    let params_addr = match config.placement {
        ParamPlacement::Staged => {
            let page = stage_page(&mut *allocator, config.low_window())?;
            marshal(&sl.params, &page, &mut *memory)
        }
        ParamPlacement::InPlace => sl.params.phys_addr(),
    };
    let params_ptr = slb_pointer(params_addr)?;
    log::debug!("skinit: zero page at {:#x}", params_ptr);

    let trampoline = place_trampoline(config, &mut *allocator, &mut *memory)?;

    slb.log_header(&*memory);
    slb.patch_params_pointer(&mut *memory, params_ptr);

    let state = CpuHandoffState::for_skinit(slb.base_u32(), sl.real_mode_target, trampoline);
    log::info!("skinit: entering SLB at {:#x} via {:#x}", state.eax, state.eip);

    match transition.boot(&state) {
        Ok(never) => match never {},
        Err(err) => {
            log::error!("skinit: boot transition failed: {}", err);
            Err(err)
        }
    }
}

/// Copy the SKINIT trampoline into the low-memory window
fn place_trampoline(
    config: &SkinitConfig,
    allocator: &mut dyn LowMemAllocator,
    memory: &mut dyn PhysMemory,
) -> Result<u32> {
    let request = AllocRequest {
        size: TRAMPOLINE_LEN,
        align: 16,
        min_addr: config.low_min,
        max_addr: config.low_max,
        preference: Preference::Low,
    };
    let addr = allocator.allocate(&request)?;
    if !request.satisfied_by(addr.as_u64()) {
        return Err(crate::error::SlaunchError::OutOfMemory);
    }

    let code = trampoline_code(config.serial_port, config.pre_marker, config.post_marker);
    memory.write_bytes(addr, &code);
    log::debug!("skinit: trampoline at {:#x}", addr.as_u64());
    slb_pointer(addr)
}

/// Secure-launch implementation selected by the `slaunch` command
pub type Launcher = fn(&SlaunchParams<'_>, Collaborators<'_>) -> Result<Skipped>;

static LAUNCHER: Mutex<Option<Launcher>> = Mutex::new(None);

/// Select (or clear) the secure launch the Linux loader should perform
pub fn set_launcher(launcher: Option<Launcher>) {
    *LAUNCHER.lock() = launcher;
}

pub fn launcher_selected() -> bool {
    LAUNCHER.lock().is_some()
}

/// Run the selected secure launch; `None` when no launch was selected
pub fn run_launcher(sl: &SlaunchParams<'_>, env: Collaborators<'_>) -> Option<Result<Skipped>> {
    let launcher = *LAUNCHER.lock();
    launcher.map(|launch| launch(sl, env))
}

/// SKINIT launch with platform defaults
pub fn skinit_launcher(sl: &SlaunchParams<'_>, env: Collaborators<'_>) -> Result<Skipped> {
    boot_skinit(&SkinitConfig::default(), sl, env)
}
