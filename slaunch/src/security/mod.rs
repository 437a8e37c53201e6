//! Security - secure loader block and secure loader module registry

pub mod modules;
pub mod slb;

pub use modules::{GlobalModules, ModuleList, ModuleRegistry, SlaunchModule};
pub use slb::SecureLoaderBlock;
