//! Device drivers - TPM locality control and serial diagnostics

pub mod serial;
pub mod tpm;

pub use serial::{SerialLogger, SerialPort, init_logger};
pub use tpm::{Locality, TisTpm, TpmTransport};
