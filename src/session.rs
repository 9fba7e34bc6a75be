//! Instrument sessions: SCPI commands and queries over one serial line.
//!
//! A [`Session`] owns an open transport for the lifetime of the connection. Every
//! command is trimmed, terminated with the end-of-line byte and written in one go
//! after the readiness handshake; a query additionally blocks until the response
//! delimiter (`\n`) arrives.
//!
//! # Readiness handshake
//!
//! Many bench instruments drop DSR while they digest the previous command and are slow
//! to raise it again. With [`Handshake::DataSetReady`] (the default) each command first
//! polls DSR, sleeping the settling delay between polls, and sleeps one more settling
//! delay once DSR is seen. The wait is bounded by the readiness timeout.
//!
//! # Concurrency
//!
//! Sessions are blocking and perform no locking. Share one between threads behind a
//! `Mutex`, one session per physical port.
//!
//! # Example
//!
//! With the `instrument_serial` feature, `Session::open` talks to real hardware. Any
//! [`TransportOpener`] works through [`Session::open_with`]:
//!
//! ```
//! use std::time::Duration;
//! use rust_asrl::adapters::MockTransport;
//! use rust_asrl::{scpi_command, Session, SessionConfig};
//!
//! let port = MockTransport::new();
//! port.push_input(b"HEWLETT-PACKARD,E3631A,0,2.1-5.0-1.0\n");
//! let config = SessionConfig {
//!     settling_delay: Duration::ZERO,
//!     ..SessionConfig::default()
//! };
//!
//! let mut psu = Session::open_with("ASRL::/dev/ttyUSB0::9600::8N2::INSTR", &port, config)?;
//! let idn = psu.query("*IDN?")?;
//! println!("{}", idn.trim());
//! scpi_command!(psu, "APPL P6V,{},{}", 1.7, 1.3)?;
//! psu.command("OUTP ON")?;
//! psu.close()?;
//! # Ok::<(), rust_asrl::error::AsrlError>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, trace, warn};

use crate::adapters::{PortSettings, SerialTransport, TransportOpener};
use crate::config::{eol_byte, EofPolicy, Handshake, SessionConfig, StatusErrorPolicy};
use crate::error::{AppResult, AsrlError};
use crate::observer::{SessionObserver, TraceEvent};
use crate::resource::ResourceDescriptor;

/// Delimiter that ends every query response.
pub const RESPONSE_DELIMITER: u8 = b'\n';

/// An open connection to one serial instrument.
pub struct Session<T: SerialTransport> {
    transport: Option<T>,
    resource: ResourceDescriptor,
    eol: u8,
    settling_delay: Duration,
    readiness_timeout: Option<Duration>,
    handshake: Handshake,
    status_error_policy: StatusErrorPolicy,
    eof_policy: EofPolicy,
    response_timeout: Option<Duration>,
    reset_on_close: bool,
    observer: Option<Box<dyn SessionObserver>>,
}

#[cfg(feature = "instrument_serial")]
impl Session<Box<dyn serialport::SerialPort>> {
    /// Open a hardware serial port with default settings.
    ///
    /// # Errors
    /// - `Parse` if the resource string is invalid
    /// - `EmptyAddress` if it names no port
    /// - `TransportOpen` if the port cannot be opened
    pub fn open(resource: &str) -> AppResult<Self> {
        Self::open_with(
            resource,
            &crate::adapters::SerialPortOpener,
            SessionConfig::default(),
        )
    }
}

impl<T: SerialTransport> Session<T> {
    /// Open `resource` through `opener`, configured by `config`.
    ///
    /// # Errors
    /// Same as [`Session::open`], plus `InvalidConfig` if `config` fails validation.
    pub fn open_with<O>(resource: &str, opener: &O, config: SessionConfig) -> AppResult<Self>
    where
        O: TransportOpener<Transport = T>,
    {
        let resource = ResourceDescriptor::parse(resource)?;
        if resource.address().is_empty() {
            return Err(AsrlError::EmptyAddress);
        }
        let eol = config.eol()?;

        let settings = PortSettings::from_resource(&resource, config.port_timeout);
        let transport = opener
            .open(&settings)
            .map_err(|source| AsrlError::TransportOpen {
                address: resource.address().to_string(),
                source,
            })?;

        info!(
            address = resource.address(),
            baud = resource.baud_rate(),
            dataflow = %resource.dataflow(),
            "Instrument session opened"
        );

        Ok(Self {
            transport: Some(transport),
            resource,
            eol,
            settling_delay: config.settling_delay,
            readiness_timeout: config.readiness_timeout,
            handshake: config.handshake,
            status_error_policy: config.status_error_policy,
            eof_policy: config.eof_policy,
            response_timeout: config.response_timeout,
            reset_on_close: config.reset_on_close,
            observer: None,
        })
    }

    /// The parsed resource this session was opened with.
    pub fn resource(&self) -> &ResourceDescriptor {
        &self.resource
    }

    /// False once [`close`](Self::close) has been called.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// End-of-line byte appended to commands.
    pub fn eol(&self) -> u8 {
        self.eol
    }

    /// Set the end-of-line byte.
    pub fn set_eol(&mut self, eol: u8) {
        self.eol = eol;
    }

    /// Set the end-of-line marker from a string.
    ///
    /// # Errors
    /// Returns `InvalidConfig` unless `terminator` is exactly one byte.
    pub fn set_line_terminator(&mut self, terminator: &str) -> AppResult<()> {
        self.eol = eol_byte(terminator)?;
        Ok(())
    }

    /// Pause between DSR polls.
    pub fn settling_delay(&self) -> Duration {
        self.settling_delay
    }

    /// Set the pause between DSR polls.
    pub fn set_settling_delay(&mut self, delay: Duration) {
        self.settling_delay = delay;
    }

    /// Bound the readiness wait; `None` waits forever.
    pub fn set_readiness_timeout(&mut self, timeout: Option<Duration>) {
        self.readiness_timeout = timeout;
    }

    /// Choose whether commands wait for DSR.
    pub fn set_handshake(&mut self, handshake: Handshake) {
        self.handshake = handshake;
    }

    /// Choose how failed DSR queries are handled.
    pub fn set_status_error_policy(&mut self, policy: StatusErrorPolicy) {
        self.status_error_policy = policy;
    }

    /// Choose how end of stream during a query is reported.
    pub fn set_eof_policy(&mut self, policy: EofPolicy) {
        self.eof_policy = policy;
    }

    /// Bound the wait for a response delimiter; `None` waits forever.
    pub fn set_response_timeout(&mut self, timeout: Option<Duration>) {
        self.response_timeout = timeout;
    }

    /// Install an observer, replacing any previous one.
    pub fn set_observer(&mut self, observer: impl SessionObserver + 'static) {
        self.observer = Some(Box::new(observer));
    }

    /// Remove the observer.
    pub fn clear_observer(&mut self) {
        self.observer = None;
    }

    fn notify(&mut self, event: TraceEvent<'_>) {
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(&event);
        }
    }

    fn transport_mut(&mut self) -> AppResult<&mut T> {
        self.transport.as_mut().ok_or(AsrlError::NotConnected)
    }

    /// Write raw bytes, returning how many the transport accepted.
    ///
    /// # Errors
    /// `NotConnected` after close, `Io` on transport failure.
    pub fn write(&mut self, bytes: &[u8]) -> AppResult<usize> {
        self.transport_mut()?;
        self.notify(TraceEvent::BeforeWrite { bytes });
        let written = self.transport_mut()?.write(bytes)?;
        self.notify(TraceEvent::AfterWrite { written });
        trace!(written, "Serial write");
        Ok(written)
    }

    /// Write a string as raw bytes, without terminator or handshake.
    ///
    /// # Errors
    /// Same as [`write`](Self::write).
    pub fn write_str(&mut self, text: &str) -> AppResult<usize> {
        self.write(text.as_bytes())
    }

    /// Read whatever the transport has into `buf`.
    ///
    /// # Errors
    /// `NotConnected` after close, `Io` on transport failure.
    pub fn read(&mut self, buf: &mut [u8]) -> AppResult<usize> {
        self.transport_mut()?;
        self.notify(TraceEvent::BeforeRead);
        let count = self.transport_mut()?.read(buf)?;
        self.notify(TraceEvent::AfterRead { bytes: &buf[..count] });
        Ok(count)
    }

    /// Send one command line.
    ///
    /// Surrounding whitespace is trimmed and the end-of-line byte appended, so an empty
    /// command writes just the terminator.
    ///
    /// # Errors
    /// `NotConnected`, `ReadinessTimeout`, or `Io` from the handshake or the write. The
    /// session stays usable after a failure.
    pub fn command(&mut self, cmd: &str) -> AppResult<()> {
        let mut line = Vec::with_capacity(cmd.len() + 1);
        line.extend_from_slice(cmd.trim().as_bytes());
        line.push(self.eol);

        self.transport_mut()?;
        self.wait_until_ready()?;
        self.write_line(&line)?;
        debug!(command = cmd.trim(), "Sent command");
        Ok(())
    }

    /// Send a command built from format arguments; see [`scpi_command!`](crate::scpi_command).
    ///
    /// # Errors
    /// Same as [`command`](Self::command).
    pub fn command_fmt(&mut self, args: fmt::Arguments<'_>) -> AppResult<()> {
        match args.as_str() {
            Some(literal) => self.command(literal),
            None => self.command(&args.to_string()),
        }
    }

    /// Send a command from a template with named `{placeholders}`.
    ///
    /// ```
    /// # use std::collections::HashMap;
    /// # use rust_asrl::{adapters::MockTransport, Session, SessionConfig};
    /// # let port = MockTransport::new();
    /// # let config = SessionConfig { settling_delay: std::time::Duration::ZERO, ..Default::default() };
    /// # let mut psu = Session::open_with("ASRL::/dev/ttyUSB0::9600::8N2::INSTR", &port, config)?;
    /// let vars = HashMap::from([
    ///     ("volts".to_string(), "1.7".to_string()),
    ///     ("amps".to_string(), "1.3".to_string()),
    /// ]);
    /// psu.command_template("APPL P6V,{volts},{amps}", &vars)?;
    /// # assert_eq!(port.writes().last().map(Vec::as_slice), Some(&b"APPL P6V,1.7,1.3\n"[..]));
    /// # Ok::<(), rust_asrl::error::AsrlError>(())
    /// ```
    ///
    /// # Errors
    /// `Template` if a placeholder has no value or is malformed, otherwise same as
    /// [`command`](Self::command).
    pub fn command_template(
        &mut self,
        template: &str,
        vars: &HashMap<String, String>,
    ) -> AppResult<()> {
        let cmd = strfmt::strfmt(template, vars).map_err(|e| AsrlError::Template(e.to_string()))?;
        self.command(&cmd)
    }

    /// Send a command and return the response line, terminator included.
    ///
    /// # Errors
    /// Anything [`command`](Self::command) returns (then nothing is read), plus
    /// `UnexpectedEof`, `ResponseTimeout` or `Io` from the read.
    #[instrument(level = "debug", skip(self), fields(address = %self.resource.address()))]
    pub fn query(&mut self, cmd: &str) -> AppResult<String> {
        self.command(cmd)?;
        let response = self.read_until(RESPONSE_DELIMITER)?;
        let response = String::from_utf8_lossy(&response).into_owned();
        debug!(response = response.trim_end(), "Received response");
        Ok(response)
    }

    /// Release the port, resetting its buffers first if configured to.
    ///
    /// The port is released even if the reset fails.
    ///
    /// # Errors
    /// `NotConnected` if already closed, `Io` if the reset or close fails.
    pub fn close(&mut self) -> AppResult<()> {
        let mut transport = self.transport.take().ok_or(AsrlError::NotConnected)?;
        let reset = if self.reset_on_close {
            transport.reset_buffers()
        } else {
            Ok(())
        };
        let closed = transport.close();
        info!(address = self.resource.address(), "Instrument session closed");
        reset?;
        closed?;
        Ok(())
    }

    fn write_line(&mut self, line: &[u8]) -> AppResult<()> {
        let mut remaining = line;
        while !remaining.is_empty() {
            let written = self.write(remaining)?;
            if written == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "serial port accepted no bytes",
                )
                .into());
            }
            remaining = &remaining[written..];
        }
        Ok(())
    }

    fn wait_until_ready(&mut self) -> AppResult<()> {
        if self.handshake == Handshake::None {
            return Ok(());
        }

        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let status = self.transport_mut()?.data_set_ready();
            let ready = match status {
                Ok(ready) => {
                    self.notify(TraceEvent::Poll {
                        attempt,
                        ready: Some(ready),
                    });
                    ready
                }
                Err(err) => {
                    self.notify(TraceEvent::Poll {
                        attempt,
                        ready: None,
                    });
                    match self.status_error_policy {
                        StatusErrorPolicy::Fatal => return Err(err.into()),
                        StatusErrorPolicy::LogAndRetry => {
                            warn!(attempt, error = %err, "Failed to read DSR, polling again");
                            false
                        }
                    }
                }
            };
            trace!(attempt, ready, "DSR poll");
            if ready {
                break;
            }
            if let Some(limit) = self.readiness_timeout {
                if started.elapsed() >= limit {
                    warn!(address = self.resource.address(), ?limit, "DSR never asserted");
                    return Err(AsrlError::ReadinessTimeout(limit));
                }
            }
            thread::sleep(self.settling_delay);
        }

        thread::sleep(self.settling_delay);
        Ok(())
    }

    /// Read through `delimiter`. Observers get `AfterRead` with whatever arrived, even
    /// when the read fails.
    fn read_until(&mut self, delimiter: u8) -> AppResult<Vec<u8>> {
        self.notify(TraceEvent::BeforeRead);
        let mut response = Vec::new();
        let outcome = self.read_into(&mut response, delimiter);
        self.notify(TraceEvent::AfterRead { bytes: &response });
        outcome.map(|()| response)
    }

    fn read_into(&mut self, response: &mut Vec<u8>, delimiter: u8) -> AppResult<()> {
        let started = Instant::now();
        // One byte at a time so nothing past the delimiter is consumed.
        let mut byte = [0u8; 1];

        loop {
            if let Some(limit) = self.response_timeout {
                if started.elapsed() >= limit {
                    return Err(AsrlError::ResponseTimeout(limit));
                }
            }

            let result = self.transport_mut()?.read(&mut byte);
            match result {
                Ok(0) => return self.end_of_stream(response),
                Ok(_) => {
                    response.push(byte[0]);
                    if byte[0] == delimiter {
                        return Ok(());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return self.end_of_stream(response);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Apply the EOF policy: `Ok` means stop reading and return what we have.
    fn end_of_stream(&self, partial: &[u8]) -> AppResult<()> {
        match self.eof_policy {
            EofPolicy::Error => Err(AsrlError::UnexpectedEof {
                partial: partial.to_vec(),
            }),
            EofPolicy::Tolerate => {
                debug!(bytes = partial.len(), "End of stream accepted as response terminator");
                Ok(())
            }
        }
    }
}

impl<T: SerialTransport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("resource", &self.resource.to_string())
            .field("open", &self.is_open())
            .field("eol", &self.eol)
            .field("settling_delay", &self.settling_delay)
            .field("handshake", &self.handshake)
            .finish_non_exhaustive()
    }
}

/// Send a formatted command: `scpi_command!(session, "VOLT {}", 1.5)`.
#[macro_export]
macro_rules! scpi_command {
    ($session:expr, $($arg:tt)*) => {
        $session.command_fmt(::std::format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;

    fn quick_config() -> SessionConfig {
        SessionConfig {
            settling_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn open_mock() -> (Session<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        let session =
            Session::open_with("ASRL::/dev/ttyUSB0::9600::8N2::INSTR", &mock, quick_config())
                .unwrap();
        (session, mock)
    }

    #[test]
    fn test_command_trims_and_terminates() {
        let (mut session, mock) = open_mock();
        session.command("  *RST \r\n").unwrap();
        assert_eq!(mock.writes(), vec![b"*RST\n".to_vec()]);
    }

    #[test]
    fn test_empty_command_writes_terminator() {
        let (mut session, mock) = open_mock();
        session.command("").unwrap();
        assert_eq!(mock.writes(), vec![b"\n".to_vec()]);
    }

    #[test]
    fn test_custom_eol() {
        let (mut session, mock) = open_mock();
        session.set_eol(b'\r');
        session.command("OUTP ON").unwrap();
        assert_eq!(mock.writes(), vec![b"OUTP ON\r".to_vec()]);
        assert!(session.set_line_terminator("").is_err());
        assert_eq!(session.eol(), b'\r');
    }

    #[test]
    fn test_command_fmt_literal_and_args() {
        let (mut session, mock) = open_mock();
        session.command_fmt(format_args!("*CLS")).unwrap();
        scpi_command!(session, "APPL P6V,{},{}", 1.7, 1.3).unwrap();
        assert_eq!(
            mock.writes(),
            vec![b"*CLS\n".to_vec(), b"APPL P6V,1.7,1.3\n".to_vec()]
        );
    }

    #[test]
    fn test_readiness_polls_until_dsr() {
        let (mut session, mock) = open_mock();
        mock.script_dsr([Ok(false), Ok(false)]);
        session.command("*RST").unwrap();
        assert_eq!(mock.dsr_polls(), 3);
    }

    #[test]
    fn test_handshake_none_skips_polling() {
        let (mut session, mock) = open_mock();
        mock.set_dsr(false);
        session.set_handshake(Handshake::None);
        session.command("*RST").unwrap();
        assert_eq!(mock.dsr_polls(), 0);
        assert_eq!(mock.writes().len(), 1);
    }

    #[test]
    fn test_debug_hides_transport() {
        let (session, _mock) = open_mock();
        let debug = format!("{session:?}");
        assert!(debug.contains("ASRL::/dev/ttyUSB0::9600::8N2::INSTR"));
        assert!(debug.contains("open: true"));
    }
}
