//! Secure-launch error handling
//!
//! Every error here is raised before SKINIT executes. Once the instruction
//! fires there is nothing left to report: a bad SLB or a missing locality
//! shows up as a platform reset or a failed attestation, never as a value.

use core::fmt;

/// Secure-launch error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaunchError {
    /// No page in the low-memory window satisfies size and alignment
    OutOfMemory,

    /// Boot parameters do not fit the staged page
    ParamsTooLarge { size: usize, capacity: usize },

    /// Address does not fit the 32-bit SLB parameter field
    AddressOutOfRange(u64),

    /// TPM errors
    TpmNotPresent,
    TpmNotInitialized,
    TpmTimeout(u8),
    InvalidLocality(u8),

    /// Module registry is full
    ModuleListFull,

    /// CPU cannot execute SKINIT
    SkinitUnsupported,
    /// SVM disabled by firmware (VM_CR.SVMDIS)
    SvmDisabled,

    /// Boot transition refused to start
    TransitionFailed(&'static str),
}

impl SlaunchError {
    /// Convert to an error code suitable for passing back to the loader
    pub fn as_error_code(&self) -> u32 {
        match self {
            SlaunchError::OutOfMemory => 0x2002,
            SlaunchError::ParamsTooLarge { .. } => 0x2003,
            SlaunchError::AddressOutOfRange(_) => 0x2004,
            SlaunchError::TpmNotPresent => 0x6100,
            SlaunchError::TpmNotInitialized => 0x6101,
            SlaunchError::TpmTimeout(locality) => 0x6110 + (*locality as u32),
            SlaunchError::InvalidLocality(_) => 0x6102,
            SlaunchError::ModuleListFull => 0x9100,
            SlaunchError::SkinitUnsupported => 0xB100,
            SlaunchError::SvmDisabled => 0xB101,
            SlaunchError::TransitionFailed(_) => 0xF100,
        }
    }

    /// Get a human-readable description of the error
    pub fn description(&self) -> &'static str {
        match self {
            SlaunchError::OutOfMemory => "Couldn't allocate low memory for zeropage",
            SlaunchError::ParamsTooLarge { .. } => "Boot parameters larger than one page",
            SlaunchError::AddressOutOfRange(_) => "Address above 4 GiB cannot be passed in the SLB",
            SlaunchError::TpmNotPresent => "TPM not present",
            SlaunchError::TpmNotInitialized => "TPM transport not initialized",
            SlaunchError::TpmTimeout(_) => "Timed out waiting for TPM locality",
            SlaunchError::InvalidLocality(_) => "Invalid TPM locality",
            SlaunchError::ModuleListFull => "Secure loader module list full",
            SlaunchError::SkinitUnsupported => "CPU does not support SKINIT",
            SlaunchError::SvmDisabled => "SVM disabled by firmware",
            SlaunchError::TransitionFailed(msg) => msg,
        }
    }

    /// Check if the loader can continue on the conventional boot path
    ///
    /// Always true: every error, a refused boot transition included, is
    /// raised while the loader still owns the machine. The SLB may already
    /// be patched; the next secure launch rewrites the pointer.
    pub fn is_recoverable(&self) -> bool {
        true
    }
}

impl fmt::Display for SlaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlaunchError::ParamsTooLarge { size, capacity } => write!(
                f,
                "SlaunchError: {} ({} > {}, code: {:#x})",
                self.description(),
                size,
                capacity,
                self.as_error_code()
            ),
            SlaunchError::AddressOutOfRange(addr) => write!(
                f,
                "SlaunchError: {} ({:#x}, code: {:#x})",
                self.description(),
                addr,
                self.as_error_code()
            ),
            _ => write!(
                f,
                "SlaunchError: {} (code: {:#x})",
                self.description(),
                self.as_error_code()
            ),
        }
    }
}

/// Result type for secure-launch operations
pub type Result<T = ()> = core::result::Result<T, SlaunchError>;
