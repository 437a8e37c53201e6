//! Memory - physical access and low-memory staging

pub mod low_mem;
pub mod phys;

pub use low_mem::{AllocRequest, LowMemAllocator, LowMemoryMap, StagedPage, stage_page};
pub use phys::{IdentityMapped, PhysMemory};
