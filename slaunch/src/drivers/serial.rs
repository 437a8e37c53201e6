//! Legacy serial diagnostics
//!
//! Progress lines from the launch path go to COM1 through the `log` facade.
//! The port is used raw (no 16550 setup): firmware or an earlier loader
//! stage has already programmed it.

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record};
use spin::{Mutex, Once};

use crate::config::DIAG_SERIAL_PORT;

/// Write-only legacy I/O serial port
pub struct SerialPort {
    port: u16,
}

impl SerialPort {
    pub const fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    #[cfg(all(target_os = "none", target_arch = "x86_64"))]
    pub fn write_byte(&mut self, byte: u8) {
        let mut data = x86_64::instructions::port::Port::<u8>::new(self.port);
        // SAFETY: a write to the UART data register has no memory side effects.
        unsafe { data.write(byte) }
    }

    #[cfg(not(all(target_os = "none", target_arch = "x86_64")))]
    pub fn write_byte(&mut self, _byte: u8) {}
}

impl Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// `log` backend writing `[LEVEL] target: message` lines to a serial port
pub struct SerialLogger {
    port: Mutex<SerialPort>,
}

impl SerialLogger {
    pub const fn new(port: u16) -> Self {
        Self {
            port: Mutex::new(SerialPort::new(port)),
        }
    }
}

impl Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut port = self.port.lock();
        let _ = writeln!(port, "[{}] {}: {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger::new(DIAG_SERIAL_PORT);
static LOGGER_INIT: Once<()> = Once::new();

/// Default level for the launch path
pub fn default_level() -> LevelFilter {
    if cfg!(feature = "verbose_logging") {
        LevelFilter::Trace
    } else if cfg!(feature = "debug") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Install the COM1 logger; later calls only adjust the level
pub fn init_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        // Another logger may already be installed by the surrounding loader.
        let _ = log::set_logger(&LOGGER);
    });
    log::set_max_level(level);
}
