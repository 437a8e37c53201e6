//! NOS Secure Launch - AMD SKINIT hand-off
//!
//! Prepares a dynamic root of trust launch from the Linux loader: gates on a
//! loaded secure loader module, coordinates TPM locality, stages the kernel
//! boot parameters in low memory, patches the Secure Loader Block and hands
//! the CPU to a trampoline that executes SKINIT.

#![cfg_attr(not(test), no_std)]

/// Error types for the launch path
pub mod error;

/// Physical layout constants and runtime configuration
pub mod config;

/// Memory - physical access and low-memory staging
pub mod memory;

/// Kernel interface - boot parameter marshalling
pub mod kernel_if;

/// Security - Secure Loader Block and module registry
pub mod security;

/// Device drivers - TPM TIS and serial diagnostics
pub mod drivers;

/// Architecture support - SKINIT trampoline and boot transition
pub mod arch;

/// Launch orchestration and launcher selection
pub mod launch;

#[cfg(test)]
mod testing;

pub use arch::x86_64::{BootTransition, CpuHandoffState, NativeCpu, SkinitSupport};
pub use config::{ParamPlacement, SkinitConfig};
pub use drivers::{Locality, TpmTransport, init_logger};
pub use error::{Result, SlaunchError};
pub use kernel_if::BootParameters;
pub use launch::{
    Collaborators, SkipReason, Skipped, SlaunchParams, boot_skinit, run_launcher, set_launcher,
    skinit_launcher,
};
pub use memory::{LowMemAllocator, LowMemoryMap, PhysMemory};
pub use security::{ModuleList, ModuleRegistry, SlaunchModule};
