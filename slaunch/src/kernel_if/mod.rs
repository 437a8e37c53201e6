//! Kernel interface - boot parameter hand-off to the measured environment

pub mod boot_params;

pub use boot_params::{BootParameters, marshal};
