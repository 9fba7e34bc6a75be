//! Serial transport adapters
//!
//! A [`Session`](crate::session::Session) never touches port hardware directly. It talks
//! to a [`SerialTransport`], which is produced by a [`TransportOpener`] from the
//! [`PortSettings`] derived from a parsed resource string.
//!
//! - [`serial_adapter`]: real RS-232/USB-serial ports via the `serialport` crate
//!   (feature `instrument_serial`, on by default)
//! - [`mock`]: scripted in-memory transport for tests

#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;
pub mod mock;

#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialPortOpener;
pub use mock::MockTransport;

use std::io;
use std::time::Duration;

use crate::resource::{DataBits, Parity, ResourceDescriptor, StopBits};

/// Everything needed to open a port for one resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSettings {
    /// Path to the serial device (e.g., "/dev/ttyUSB0", "COM3")
    pub path: String,
    /// Baud rate (9600, 115200, etc.)
    pub baud_rate: u32,
    /// Data bits
    pub data_bits: DataBits,
    /// Parity setting
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Timeout of a single port read or write
    pub timeout: Duration,
}

impl PortSettings {
    /// Derive port settings from a parsed resource.
    pub fn from_resource(resource: &ResourceDescriptor, timeout: Duration) -> Self {
        Self {
            path: resource.address().to_string(),
            baud_rate: resource.baud_rate(),
            data_bits: resource.data_bits(),
            parity: resource.parity(),
            stop_bits: resource.stop_bits(),
            timeout,
        }
    }
}

/// Byte-level access to an open serial line.
///
/// Reads may return `ErrorKind::TimedOut` when the port timeout elapses without data;
/// `Ok(0)` means end of stream.
pub trait SerialTransport: Send {
    /// Write some bytes, returning how many were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Read available bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// State of the Data Set Ready modem line.
    fn data_set_ready(&mut self) -> io::Result<bool>;

    /// Discard pending input and output.
    fn reset_buffers(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Release the port.
    fn close(self) -> io::Result<()>
    where
        Self: Sized,
    {
        drop(self);
        Ok(())
    }
}

/// Opens transports for a [`Session`](crate::session::Session).
pub trait TransportOpener {
    /// Transport produced by this opener
    type Transport: SerialTransport;

    /// Open the port described by `settings`.
    fn open(&self, settings: &PortSettings) -> io::Result<Self::Transport>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_resource() {
        let resource = ResourceDescriptor::parse("ASRL::/dev/ttyUSB0::115200::7O1::INSTR").unwrap();
        let settings = PortSettings::from_resource(&resource, Duration::from_millis(100));
        assert_eq!(settings.path, "/dev/ttyUSB0");
        assert_eq!(settings.baud_rate, 115200);
        assert_eq!(settings.data_bits, DataBits::Seven);
        assert_eq!(settings.parity, Parity::Odd);
        assert_eq!(settings.stop_bits, StopBits::One);
        assert_eq!(settings.timeout, Duration::from_millis(100));
    }
}
