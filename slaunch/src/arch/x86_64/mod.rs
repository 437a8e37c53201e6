//! x86_64 secure-launch support

pub mod skinit;

pub use skinit::{
    BootTransition, CpuHandoffState, NativeCpu, SkinitSupport, check_support, trampoline_code,
};

#[cfg(feature = "inline_skinit")]
pub use skinit::InlineSkinit;
