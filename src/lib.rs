//! SCPI instrument control over serial links.
//!
//! Instruments are addressed with VISA serial resource strings such as
//! `ASRL::/dev/ttyUSB0::9600::8N2::INSTR`. The [`resource`] module parses them into
//! port settings; a [`session::Session`] opens the port and exchanges line-terminated
//! SCPI commands and queries with the instrument.

pub mod adapters;
pub mod config;
pub mod error;
pub mod observer;
pub mod resource;
pub mod session;

pub use config::{EofPolicy, Handshake, SessionConfig, StatusErrorPolicy};
pub use error::{AppResult, AsrlError, ParseError};
pub use observer::{SessionObserver, TraceEvent};
pub use resource::{DataBits, Dataflow, Parity, ResourceDescriptor, StopBits};
pub use session::Session;
