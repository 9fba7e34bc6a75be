//! Serial adapter for RS-232 communication
//!
//! Wraps the `serialport` crate. Ports are opened with hardware flow control
//! disabled; DSR is polled explicitly by the session instead.

use std::io::{self, Read, Write};

use serialport::{ClearBuffer, FlowControl, SerialPort};
use tracing::debug;

use super::{PortSettings, SerialTransport, TransportOpener};
use crate::resource::{DataBits, Parity, StopBits};

/// Opens ports with the `serialport` crate.
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialPortOpener;

impl TransportOpener for SerialPortOpener {
    type Transport = Box<dyn SerialPort>;

    fn open(&self, settings: &PortSettings) -> io::Result<Self::Transport> {
        let port = serialport::new(&settings.path, settings.baud_rate)
            .data_bits(settings.data_bits.into())
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .flow_control(FlowControl::None)
            .timeout(settings.timeout)
            .open()?;

        debug!(
            "Serial port '{}' opened at {} baud",
            settings.path, settings.baud_rate
        );
        Ok(port)
    }
}

impl SerialTransport for Box<dyn SerialPort> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = Write::write(self, buf)?;
        Write::flush(self)?;
        Ok(written)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn data_set_ready(&mut self) -> io::Result<bool> {
        Ok(self.read_data_set_ready()?)
    }

    fn reset_buffers(&mut self) -> io::Result<()> {
        Ok(self.clear(ClearBuffer::All)?)
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(stop_bits: StopBits) -> Self {
        match stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}
