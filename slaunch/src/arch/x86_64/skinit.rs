//! SKINIT invocation
//!
//! The loader hands the CPU to a protected-mode boot transition with
//! [`CpuHandoffState`] loaded. EIP points at a tiny trampoline that sets
//! EFER.SVME, writes a marker byte to the serial port, executes SKINIT with
//! EAX = SLB base, and only if SKINIT somehow falls through writes a second
//! marker and halts.
//!
//! SKINIT raises #UD on a CPU without SVM or with SVM locked off, so
//! [`check_support`] runs while the loader can still fall back.
//!
//! `InlineSkinit` skips the mode switch and fires SKINIT from wherever the
//! loader is running. It was the first way this path worked (whole zero page
//! copied, no TPM handling) and stays around for bring-up.

use core::convert::Infallible;

use crate::error::{Result, SlaunchError};

/// `mov ebx, eax` .. `skinit` .. `hlt; jmp $-1`, see [`trampoline_code`]
pub const TRAMPOLINE_LEN: usize = 38;

/// CPUID Fn8000_0001 ECX feature bits
pub const CPUID_EXT_FEATURES: u32 = 0x8000_0001;
pub const CPUID_ECX_SVM: u32 = 1 << 2;
pub const CPUID_ECX_SKINIT: u32 = 1 << 12;

/// VM_CR MSR and its SVM-disable bit
pub const MSR_VM_CR: u32 = 0xC001_0114;
pub const VM_CR_SVMDIS: u64 = 1 << 4;

/// EFER MSR and its SVM-enable bit
pub const MSR_EFER: u32 = 0xC000_0080;
pub const EFER_SVME: u32 = 1 << 12;

/// Register file for the 32-bit protected-mode entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuHandoffState {
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub eip: u32,
}

impl CpuHandoffState {
    /// EAX carries the SLB (SKINIT's only operand), ESP the real-mode
    /// target, EIP the trampoline
    pub fn for_skinit(slb: u32, stack: u32, trampoline: u32) -> Self {
        Self {
            eax: slb,
            esp: stack,
            eip: trampoline,
            ..Self::default()
        }
    }
}

/// Protected-mode boot transition
pub trait BootTransition {
    /// Switch to 32-bit protected mode, load `state` and jump to `state.eip`
    ///
    /// Never returns once the switch has started; an `Err` means it was
    /// refused up front and the loader still owns the machine.
    fn boot(&mut self, state: &CpuHandoffState) -> Result<Infallible>;
}

/// CPU feature state SKINIT depends on
pub trait SkinitSupport {
    /// CPUID Fn8000_0001 ECX
    fn ext_features(&self) -> u32;

    /// VM_CR MSR; only read once CPUID reports SVM
    fn vm_cr(&self) -> u64;
}

/// Refuse a launch the CPU cannot execute
pub fn check_support(cpu: &dyn SkinitSupport) -> Result {
    check_cpuid_features(cpu.ext_features())?;
    check_vm_cr(cpu.vm_cr())
}

/// The CPU the loader is running on
///
/// Off bare metal no feature bits are reported, so every launch is refused.
pub struct NativeCpu {
    _private: (),
}

impl NativeCpu {
    /// # Safety
    ///
    /// The loader must run at CPL 0 (MSR reads fault otherwise).
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl SkinitSupport for NativeCpu {
    #[cfg(all(target_os = "none", target_arch = "x86_64"))]
    fn ext_features(&self) -> u32 {
        hw::ext_features()
    }

    #[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
    fn ext_features(&self) -> u32 {
        0
    }

    #[cfg(all(target_os = "none", target_arch = "x86_64"))]
    fn vm_cr(&self) -> u64 {
        // SAFETY: CPL 0 per `new`; VM_CR exists once CPUID reports SVM.
        unsafe { hw::read_vm_cr() }
    }

    #[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
    fn vm_cr(&self) -> u64 {
        VM_CR_SVMDIS
    }
}

/// Machine code for the SKINIT trampoline
///
/// The same bytes decode identically in 32-bit protected mode and in long
/// mode, and use no stack. EBX holds the SLB across RDMSR/WRMSR.
pub fn trampoline_code(port: u16, pre: u8, post: u8) -> [u8; TRAMPOLINE_LEN] {
    let [port_lo, port_hi] = port.to_le_bytes();
    let [efer_0, efer_1, efer_2, efer_3] = MSR_EFER.to_le_bytes();
    let [svme_0, svme_1, svme_2, svme_3] = EFER_SVME.to_le_bytes();
    [
        0x89, 0xC3, // mov ebx, eax
        0xB9, efer_0, efer_1, efer_2, efer_3, // mov ecx, MSR_EFER
        0x0F, 0x32, // rdmsr
        0x0D, svme_0, svme_1, svme_2, svme_3, // or eax, EFER_SVME
        0x0F, 0x30, // wrmsr
        0x66, 0xBA, port_lo, port_hi, // mov dx, port
        0xB0, pre, // mov al, pre
        0xEE, // out dx, al
        0x89, 0xD8, // mov eax, ebx
        0x0F, 0x01, 0xDE, // skinit
        0x66, 0xBA, port_lo, port_hi, // mov dx, port
        0xB0, post, // mov al, post
        0xEE, // out dx, al
        0xF4, // hlt
        0xEB, 0xFD, // jmp hlt
    ]
}

/// Check CPUID Fn8000_0001 ECX for SVM and SKINIT
pub fn check_cpuid_features(ecx: u32) -> Result {
    if ecx & CPUID_ECX_SVM == 0 || ecx & CPUID_ECX_SKINIT == 0 {
        return Err(SlaunchError::SkinitUnsupported);
    }
    Ok(())
}

/// Check VM_CR for firmware-disabled SVM
pub fn check_vm_cr(vm_cr: u64) -> Result {
    if vm_cr & VM_CR_SVMDIS != 0 {
        return Err(SlaunchError::SvmDisabled);
    }
    Ok(())
}

#[cfg(all(target_os = "none", target_arch = "x86_64"))]
mod hw {
    use core::arch::x86_64::__cpuid;

    use ::x86_64::registers::model_specific::Msr;

    use super::*;

    #[allow(unused_unsafe)]
    pub fn ext_features() -> u32 {
        // SAFETY: CPUID is available on every x86_64 CPU.
        unsafe { __cpuid(CPUID_EXT_FEATURES) }.ecx
    }

    /// # Safety
    ///
    /// CPL 0 on a CPU reporting SVM.
    pub unsafe fn read_vm_cr() -> u64 {
        unsafe { Msr::new(MSR_VM_CR).read() }
    }

    #[cfg(feature = "inline_skinit")]
    pub fn enable_svm() {
        use ::x86_64::registers::model_specific::{Efer, EferFlags};

        // SAFETY: setting SVME only makes SVM instructions legal.
        unsafe { Efer::update(|flags| flags.insert(EferFlags::SECURE_VIRTUAL_MACHINE_ENABLE)) }
    }

    /// # Safety
    ///
    /// `slb` must be a resident, patched Secure Loader Block.
    #[cfg(feature = "inline_skinit")]
    pub unsafe fn skinit(slb: u32, port: u16, pre: u8, post: u8) -> ! {
        use core::arch::asm;

        unsafe {
            asm!(
                "out dx, al",
                "mov eax, {slb:e}",
                ".byte 0x0f, 0x01, 0xde",
                "mov al, {post}",
                "out dx, al",
                "2:",
                "hlt",
                "jmp 2b",
                slb = in(reg) slb,
                post = in(reg_byte) post,
                in("dx") port,
                in("al") pre,
                options(noreturn, nostack),
            )
        }
    }
}

/// Fire SKINIT from the current CPU mode
///
/// CPU support is checked by the launch path before this runs.
#[cfg(feature = "inline_skinit")]
pub struct InlineSkinit {
    port: u16,
    pre: u8,
    post: u8,
}

#[cfg(feature = "inline_skinit")]
impl InlineSkinit {
    pub fn new(config: &crate::config::SkinitConfig) -> Self {
        Self {
            port: config.serial_port,
            pre: config.pre_marker,
            post: config.post_marker,
        }
    }
}

#[cfg(feature = "inline_skinit")]
impl BootTransition for InlineSkinit {
    #[cfg(all(target_os = "none", target_arch = "x86_64"))]
    fn boot(&mut self, state: &CpuHandoffState) -> Result<Infallible> {
        hw::enable_svm();
        log::debug!("Invoke SKINIT");
        // SAFETY: the launch path checked CPU support and patched the SLB at
        // `state.eax` before handing over the register state.
        unsafe { hw::skinit(state.eax, self.port, self.pre, self.post) }
    }

    #[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
    fn boot(&mut self, _state: &CpuHandoffState) -> Result<Infallible> {
        let _ = (self.port, self.pre, self.post);
        Err(SlaunchError::SkinitUnsupported)
    }
}
