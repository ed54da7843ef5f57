//! Exercises `GatewayConfig::load`'s layering (defaults, then an on-disk
//! TOML file, then `GATEWAY_`-prefixed environment variables) against a real
//! file on disk, since `fme_foundation`'s own unit tests only cover
//! `load(None)`.

use fme_foundation::GatewayConfig;
use std::io::Write;

#[test]
fn toml_file_overrides_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "log_level = \"debug\"").unwrap();
    writeln!(file, "[fme]").unwrap();
    writeln!(file, "code_length = 6").unwrap();
    file.flush().unwrap();

    let cfg = GatewayConfig::load(Some(file.path())).unwrap();
    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.fme.code_length, 6);
    // Untouched fields keep their defaults.
    assert_eq!(cfg.audio.channel_count, 1);
    assert!(cfg.validate().is_ok());
}

#[test]
fn environment_variables_outrank_the_toml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[audio]").unwrap();
    writeln!(file, "channel_count = 2").unwrap();
    file.flush().unwrap();

    std::env::set_var("GATEWAY_AUDIO__CHANNEL_COUNT", "3");
    let cfg = GatewayConfig::load(Some(file.path()));
    std::env::remove_var("GATEWAY_AUDIO__CHANNEL_COUNT");

    assert_eq!(cfg.unwrap().audio.channel_count, 3);
}

#[test]
fn missing_file_path_is_an_error_not_a_silent_fallback() {
    let missing = std::path::Path::new("/nonexistent/gateway-config-that-does-not-exist.toml");
    assert!(GatewayConfig::load(Some(missing)).is_err());
}
