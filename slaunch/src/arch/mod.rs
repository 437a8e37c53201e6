//! Architecture-specific launch code

pub mod x86_64;
