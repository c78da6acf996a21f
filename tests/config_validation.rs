//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use herald::config::{
    BroadcastPolicy, ConfigOverrides, HeraldConfig, LoggingConfig, ServerConfig, Settings,
    TlsSettings,
};
use herald::error::ProtocolError;
use std::collections::HashMap;
use std::time::Duration;
use tracing::Level;

fn with_secret() -> Settings {
    Settings {
        endpoint: HeraldConfig::new("herald", "127.0.0.1", 8765, false, "s3cret", "/")
            .expect("valid endpoint"),
        ..Settings::default()
    }
}

#[test]
fn test_configured_settings_validate() {
    let errors = with_secret().validate();
    assert!(
        errors.is_empty(),
        "Configured settings should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_default_settings_require_secret() {
    let errors = Settings::default().validate();
    assert!(errors.iter().any(|e| e.contains("secret cannot be empty")));
}

#[test]
fn test_secure_endpoint_requires_tls_section() {
    let mut settings = with_secret();
    settings.endpoint = settings
        .endpoint
        .copy(ConfigOverrides::default().secure(true))
        .unwrap();

    let errors = settings.validate();
    assert!(errors.iter().any(|e| e.contains("[tls]")));

    settings.tls = Some(TlsSettings {
        cert_path: "cert.pem".into(),
        key_path: "key.pem".into(),
    });
    assert!(settings.validate().is_empty());
}

#[test]
fn test_endpoint_rejects_colons() {
    assert!(HeraldConfig::new("a:b", "127.0.0.1", 1, false, "s", "/").is_err());
    assert!(HeraldConfig::new("a", "127.0.0.1", 1, false, "s:t", "/").is_err());
}

#[test]
fn test_endpoint_path_must_be_absolute() {
    let result = HeraldConfig::new("a", "127.0.0.1", 1, false, "s", "herald");
    assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
}

#[test]
fn test_copy_leaves_original_untouched() {
    let original = HeraldConfig::new("a", "127.0.0.1", 8765, false, "s", "/").unwrap();
    let copy = original
        .copy(ConfigOverrides::default().port(9000).path("/herald"))
        .unwrap();

    assert_eq!(original.port(), 8765);
    assert_eq!(original.path(), "/");
    assert_eq!(copy.port(), 9000);
    assert_eq!(copy.path(), "/herald");
    assert_eq!(copy.secret(), "s");
    assert_eq!(copy.url(), "ws://127.0.0.1:9000/herald");
}

#[test]
fn test_copy_validates_like_new() {
    let original = HeraldConfig::default();
    assert!(original
        .copy(ConfigOverrides::default().secret("bad:secret"))
        .is_err());
}

#[test]
fn test_debug_redacts_secret() {
    let config = HeraldConfig::new("a", "127.0.0.1", 1, false, "hunter2", "/").unwrap();
    assert!(!format!("{config:?}").contains("hunter2"));
}

#[test]
fn test_handshake_timeout_bounds() {
    let mut config = ServerConfig::default();
    config.handshake_timeout = Duration::from_millis(10);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Handshake timeout too short")));

    config.handshake_timeout = Duration::from_secs(600);
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Handshake timeout too long")));
}

#[test]
fn test_zero_limits_rejected() {
    let config = ServerConfig {
        max_pending_connections: 0,
        outbound_queue: 0,
        ..ServerConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Max pending connections must be greater than 0")));
    assert!(errors
        .iter()
        .any(|e| e.contains("Outbound queue must be greater than 0")));
}

#[test]
fn test_message_size_bounds() {
    let mut config = ServerConfig::default();
    config.max_message_size = 16;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max message size too small")));

    config.max_message_size = 128 * 1024 * 1024;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max message size too large")));
}

#[test]
fn test_logging_app_name_bounds() {
    let mut config = LoggingConfig::default();
    config.app_name = String::new();
    assert!(config.validate().iter().any(|e| e.contains("cannot be empty")));

    config.app_name = "x".repeat(65);
    assert!(config.validate().iter().any(|e| e.contains("too long")));
}

#[test]
fn test_validate_strict_collects_every_error() {
    let mut settings = Settings::default();
    settings.server.outbound_queue = 0;

    match settings.validate_strict() {
        Err(ProtocolError::ConfigError(message)) => {
            assert!(message.contains("Configuration validation failed"));
            assert!(message.contains("secret"));
            assert!(message.contains("Outbound queue"));
        }
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn test_toml_roundtrip_of_example() {
    let example = Settings::example_config();
    let parsed = Settings::from_toml(&example).expect("example config should parse");
    assert_eq!(parsed.endpoint, HeraldConfig::default());
    assert_eq!(parsed.server.handshake_timeout, ServerConfig::default().handshake_timeout);
}

#[test]
fn test_toml_partial_file() {
    let settings = Settings::from_toml(
        r#"
        [endpoint]
        port = 9100
        secret = "s3cret"
        path = "/herald"

        [server]
        handshake_timeout = 2500
        broadcast = "exclude_sender"

        [logging]
        log_level = "debug"
        json_format = true
        "#,
    )
    .expect("partial config should parse");

    assert_eq!(settings.endpoint.port(), 9100);
    assert_eq!(settings.endpoint.address(), "127.0.0.1");
    assert_eq!(settings.endpoint.path(), "/herald");
    assert_eq!(settings.server.handshake_timeout, Duration::from_millis(2500));
    assert_eq!(settings.server.broadcast, BroadcastPolicy::ExcludeSender);
    assert_eq!(settings.server.outbound_queue, ServerConfig::default().outbound_queue);
    assert_eq!(settings.logging.log_level, Level::DEBUG);
    assert!(settings.logging.json_format);
    assert!(settings.validate().is_empty());
}

#[test]
fn test_toml_invalid_endpoint_rejected() {
    let result = Settings::from_toml(
        r#"
        [endpoint]
        secret = "has:colon"
        "#,
    );
    assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
}

#[test]
fn test_overrides_from_lookup() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("HERALD_ADDRESS", "0.0.0.0"),
        ("HERALD_PORT", "9200"),
        ("HERALD_SECRET", "from-env"),
        ("HERALD_HANDSHAKE_TIMEOUT_MS", "750"),
        ("HERALD_LOG_LEVEL", "warn"),
    ]);

    let settings = Settings::default()
        .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
        .unwrap();

    assert_eq!(settings.endpoint.address(), "0.0.0.0");
    assert_eq!(settings.endpoint.port(), 9200);
    assert_eq!(settings.endpoint.secret(), "from-env");
    assert_eq!(settings.server.handshake_timeout, Duration::from_millis(750));
    assert_eq!(settings.logging.log_level, Level::WARN);
}

#[test]
fn test_invalid_override_values_rejected() {
    let port = Settings::default().apply_overrides(|key| {
        (key == "HERALD_PORT").then(|| "not-a-port".to_string())
    });
    assert!(matches!(port, Err(ProtocolError::ConfigError(_))));

    let level = Settings::default().apply_overrides(|key| {
        (key == "HERALD_LOG_LEVEL").then(|| "loud".to_string())
    });
    assert!(matches!(level, Err(ProtocolError::ConfigError(_))));
}

#[test]
fn test_settings_file_loading() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[endpoint]\nsecret = \"s3cret\"\nport = 9300").unwrap();

    let settings = Settings::from_file(file.path()).unwrap();
    assert_eq!(settings.endpoint.port(), 9300);

    let missing = Settings::from_file("/nonexistent/herald.toml");
    assert!(matches!(missing, Err(ProtocolError::ConfigError(_))));
}
