//! Layered session configuration: defaults, TOML file, `ASRL_` environment

use std::io::Write;
use std::time::Duration;

use rust_asrl::adapters::MockTransport;
use rust_asrl::{AsrlError, EofPolicy, Handshake, Session, SessionConfig, StatusErrorPolicy};
use serial_test::serial;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> anyhow::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile()?;
    file.write_all(contents.as_bytes())?;
    file.flush()?;
    Ok(file)
}

#[test]
#[serial]
fn test_load_without_sources_gives_defaults() -> anyhow::Result<()> {
    let config = SessionConfig::load(None)?;
    assert_eq!(config, SessionConfig::default());
    Ok(())
}

#[test]
#[serial]
fn test_load_from_toml_file() -> anyhow::Result<()> {
    let file = write_config(
        r#"
line_terminator = "\r"
settling_delay = "150ms"
readiness_timeout = "2s"
handshake = "none"
status_error_policy = "log_and_retry"
eof_policy = "tolerate"
response_timeout = "1s"
reset_on_close = false
"#,
    )?;

    let config = SessionConfig::load(Some(file.path()))?;

    assert_eq!(config.eol()?, b'\r');
    assert_eq!(config.settling_delay, Duration::from_millis(150));
    assert_eq!(config.readiness_timeout, Some(Duration::from_secs(2)));
    assert_eq!(config.handshake, Handshake::None);
    assert_eq!(config.status_error_policy, StatusErrorPolicy::LogAndRetry);
    assert_eq!(config.eof_policy, EofPolicy::Tolerate);
    assert_eq!(config.response_timeout, Some(Duration::from_secs(1)));
    assert_eq!(config.port_timeout, Duration::from_millis(100));
    assert!(!config.reset_on_close);
    Ok(())
}

#[test]
#[serial]
fn test_environment_overrides_file() -> anyhow::Result<()> {
    let file = write_config("settling_delay = \"150ms\"\n")?;

    std::env::set_var("ASRL_SETTLING_DELAY", "5ms");
    std::env::set_var("ASRL_HANDSHAKE", "none");
    let config = SessionConfig::load(Some(file.path()));
    std::env::remove_var("ASRL_SETTLING_DELAY");
    std::env::remove_var("ASRL_HANDSHAKE");

    let config = config?;
    assert_eq!(config.settling_delay, Duration::from_millis(5));
    assert_eq!(config.handshake, Handshake::None);
    Ok(())
}

#[test]
#[serial]
fn test_timeouts_can_be_unbounded() -> anyhow::Result<()> {
    let file = write_config("readiness_timeout = \"none\"\nresponse_timeout = \"none\"\n")?;
    let config = SessionConfig::load(Some(file.path()))?;
    assert_eq!(config.readiness_timeout, None);
    assert_eq!(config.response_timeout, None);

    let file = write_config("readiness_timeout = \"250ms\"\nresponse_timeout = \"3s\"\n")?;
    std::env::set_var("ASRL_READINESS_TIMEOUT", "none");
    let config = SessionConfig::load(Some(file.path()));
    std::env::remove_var("ASRL_READINESS_TIMEOUT");

    let config = config?;
    assert_eq!(config.readiness_timeout, None);
    assert_eq!(config.response_timeout, Some(Duration::from_secs(3)));
    Ok(())
}

#[test]
#[serial]
fn test_invalid_terminator_rejected() -> anyhow::Result<()> {
    let file = write_config("line_terminator = \"\"\n")?;
    let err = SessionConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, AsrlError::InvalidConfig(_)));
    Ok(())
}

#[test]
#[serial]
fn test_malformed_duration_rejected() -> anyhow::Result<()> {
    let file = write_config("settling_delay = \"soon\"\n")?;
    let err = SessionConfig::load(Some(file.path())).unwrap_err();
    assert!(matches!(err, AsrlError::Config(_)));
    Ok(())
}

#[test]
#[serial]
fn test_loaded_config_drives_session() -> anyhow::Result<()> {
    let file = write_config("line_terminator = \"\\r\"\nsettling_delay = \"0s\"\n")?;
    let config = SessionConfig::load(Some(file.path()))?;

    let mock = MockTransport::new();
    let mut session = Session::open_with("ASRL::COM3::4800::7E2::INSTR", &mock, config)?;
    session.command("*RST")?;

    assert_eq!(mock.writes(), vec![b"*RST\r".to_vec()]);
    assert_eq!(mock.opened_with().map(|s| s.timeout), Some(Duration::from_millis(100)));
    Ok(())
}
