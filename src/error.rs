//! Custom error types for the crate.
//!
//! Two layers of errors exist:
//!
//! - **`ParseError`**: failures of the resource-string parser. Each variant names the
//!   segment of the `ASRL::...::INSTR` grammar that was rejected.
//! - **`AsrlError`**: everything a [`Session`](crate::session::Session) can report. Parse
//!   failures are wrapped unchanged via `#[from]`, so `?` works across the boundary.
//!
//! I/O-kind failures (transport errors, a closed session, end of stream before the
//! response delimiter, readiness and response timeouts) can be recognised as a group
//! with [`AsrlError::is_io`].

use std::time::Duration;

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, AsrlError>;

/// A resource string did not match the `ASRL` serial grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("visa: interface type was not ASRL: '{0}'")]
    InvalidInterfaceType(String),

    #[error("visa: resource class was not INSTR: '{0}'")]
    InvalidResourceClass(String),

    #[error("visa: baud error: '{0}'")]
    InvalidBaudRate(String),

    #[error("visa: dataflow error: '{0}'")]
    InvalidDataflow(String),

    #[error("visa: address must not contain whitespace: '{0}'")]
    InvalidAddress(String),

    #[error("visa: expected 4 or 5 '::'-delimited segments, found {0}")]
    MalformedResource(usize),
}

/// Errors reported by an instrument session.
#[derive(Error, Debug)]
pub enum AsrlError {
    #[error("Resource string error: {0}")]
    Parse(#[from] ParseError),

    #[error("Resource string has an empty address")]
    EmptyAddress,

    #[error("Failed to open serial port '{address}': {source}")]
    TransportOpen {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial port not connected")]
    NotConnected,

    #[error("Unexpected EOF from serial port after {} bytes", .partial.len())]
    UnexpectedEof { partial: Vec<u8> },

    #[error("Instrument did not assert DSR within {0:?}")]
    ReadinessTimeout(Duration),

    #[error("No response delimiter received within {0:?}")]
    ResponseTimeout(Duration),

    #[error("Configuration validation error: {0}")]
    InvalidConfig(String),

    #[error("Command template error: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl AsrlError {
    /// Returns true for failures of the serial line itself rather than of the caller's input.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            AsrlError::Io(_)
                | AsrlError::NotConnected
                | AsrlError::UnexpectedEof { .. }
                | AsrlError::ReadinessTimeout(_)
                | AsrlError::ResponseTimeout(_)
        )
    }
}

impl From<figment::Error> for AsrlError {
    fn from(err: figment::Error) -> Self {
        AsrlError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AsrlError::from(ParseError::InvalidDataflow("9X3".to_string()));
        assert_eq!(
            err.to_string(),
            "Resource string error: visa: dataflow error: '9X3'"
        );
    }

    #[test]
    fn test_io_kind_grouping() {
        assert!(AsrlError::NotConnected.is_io());
        assert!(AsrlError::UnexpectedEof { partial: b"1.0".to_vec() }.is_io());
        assert!(AsrlError::ReadinessTimeout(Duration::from_secs(1)).is_io());
        assert!(!AsrlError::EmptyAddress.is_io());
        assert!(!AsrlError::from(ParseError::MalformedResource(2)).is_io());
    }

    #[test]
    fn test_eof_reports_partial_length() {
        let err = AsrlError::UnexpectedEof { partial: b"+1.5".to_vec() };
        assert!(err.to_string().contains("after 4 bytes"));
    }
}
