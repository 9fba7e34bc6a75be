//! Session configuration using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults ([`SessionConfig::default`])
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `ASRL_`
//!
//! Durations are written in humantime notation (`70ms`, `5s`).
//!
//! ```toml
//! line_terminator = "\n"
//! settling_delay = "70ms"
//! readiness_timeout = "5s"     # or "none" to wait forever
//! response_timeout = "none"
//! handshake = "data_set_ready"
//! status_error_policy = "fatal"
//! eof_policy = "error"
//! port_timeout = "100ms"
//! reset_on_close = true
//! ```
//!
//! ```text
//! ASRL_SETTLING_DELAY=150ms
//! ASRL_HANDSHAKE=none
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{AppResult, AsrlError};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "ASRL_";

/// Whether to wait for the instrument's DSR line before each command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Handshake {
    /// Poll DSR until asserted, then settle once more before writing
    DataSetReady,
    /// Write immediately
    None,
}

/// What to do when reading the DSR line itself fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusErrorPolicy {
    /// Abort the command with the I/O error
    Fatal,
    /// Log a warning and keep polling
    LogAndRetry,
}

/// How end of stream before the response delimiter is reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EofPolicy {
    /// Fail the query with `UnexpectedEof`
    Error,
    /// Return whatever was read so far
    Tolerate,
}

/// Tunables for one instrument session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// End-of-line marker appended to every command; must be a single byte
    pub line_terminator: String,
    /// Pause between DSR polls, and once more after DSR is seen
    #[serde(with = "humantime_serde")]
    pub settling_delay: Duration,
    /// Give up waiting for DSR after this long (`None`, written `"none"`, waits forever)
    #[serde(with = "bound")]
    pub readiness_timeout: Option<Duration>,
    /// Flow-control handshake before writes
    pub handshake: Handshake,
    /// Reaction to a failed DSR query
    pub status_error_policy: StatusErrorPolicy,
    /// Reaction to end of stream while reading a response
    pub eof_policy: EofPolicy,
    /// Give up waiting for a response delimiter after this long (`None`, written `"none"`, waits forever)
    #[serde(with = "bound")]
    pub response_timeout: Option<Duration>,
    /// Timeout of each individual port read/write
    #[serde(with = "humantime_serde")]
    pub port_timeout: Duration,
    /// Discard pending input/output before closing the port
    pub reset_on_close: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            line_terminator: "\n".to_string(),
            settling_delay: Duration::from_millis(70),
            readiness_timeout: Some(Duration::from_secs(5)),
            handshake: Handshake::DataSetReady,
            status_error_policy: StatusErrorPolicy::Fatal,
            eof_policy: EofPolicy::Error,
            response_timeout: None,
            port_timeout: Duration::from_millis(100),
            reset_on_close: true,
        }
    }
}

impl SessionConfig {
    /// Load defaults, then `path` (if given), then `ASRL_*` environment variables.
    ///
    /// # Errors
    /// Returns `Config` if a source cannot be read or deserialized, and
    /// `InvalidConfig` if the merged result fails [`validate`](Self::validate).
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(SessionConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: SessionConfig = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints serde cannot express.
    ///
    /// # Errors
    /// Returns `InvalidConfig` unless the line terminator is exactly one byte.
    pub fn validate(&self) -> AppResult<()> {
        eol_byte(&self.line_terminator).map(|_| ())
    }

    /// The line terminator as a byte.
    ///
    /// # Errors
    /// Same as [`validate`](Self::validate).
    pub fn eol(&self) -> AppResult<u8> {
        eol_byte(&self.line_terminator)
    }
}

/// Optional time limits: a humantime duration, or `"none"` for no limit.
mod bound {
    use std::time::Duration;

    use humantime_serde::re::humantime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    const UNBOUNDED: &str = "none";

    pub fn serialize<S: Serializer>(bound: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match bound {
            Some(limit) => serializer.serialize_str(&humantime::format_duration(*limit).to_string()),
            None => serializer.serialize_str(UNBOUNDED),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(text) if text.trim().eq_ignore_ascii_case(UNBOUNDED) => Ok(None),
            Some(text) => humantime::parse_duration(text.trim())
                .map(Some)
                .map_err(de::Error::custom),
        }
    }
}

pub(crate) fn eol_byte(terminator: &str) -> AppResult<u8> {
    match terminator.as_bytes() {
        [byte] => Ok(*byte),
        [] => Err(AsrlError::InvalidConfig(
            "line terminator must not be empty".to_string(),
        )),
        _ => Err(AsrlError::InvalidConfig(format!(
            "line terminator must be a single byte, got {terminator:?}"
        ))),
    }
}
