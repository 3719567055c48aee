//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that handle
//! log format parsing, level selection and filter construction.

use meshtastic_client_proxy::observability::logging::{
    build_filter, init_logging, level_from_verbosity, parse_level, LogFormat,
};
use tracing::Level;

#[test]
fn test_log_format_parse_known_formats() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("COMPACT"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Unknown formats fall back to JSON
    for input in ["invalid", "", "xml", "yaml", "123"] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input: {input:?}");
    }
}

#[test]
fn test_log_format_parse_whitespace() {
    assert_eq!(LogFormat::parse("  pretty  "), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("compact\n"), LogFormat::Compact);
    assert_eq!(LogFormat::parse("\tjson"), LogFormat::Json);
}

#[test]
fn test_level_parsing_defaults_to_info() {
    assert_eq!(parse_level("warn"), Level::WARN);
    assert_eq!(parse_level(" trace "), Level::TRACE);
    assert_eq!(parse_level("loud"), Level::INFO);
    assert_eq!(parse_level(""), Level::INFO);
}

#[test]
fn test_verbosity_levels() {
    assert_eq!(level_from_verbosity(0), None);
    assert_eq!(level_from_verbosity(1), Some(Level::DEBUG));
    assert_eq!(level_from_verbosity(3), Some(Level::TRACE));
}

#[test]
fn test_filter_quietens_dependencies() {
    let rendered = build_filter(Level::TRACE).to_string();
    assert!(rendered.contains("rumqttc=warn"));
    assert!(rendered.contains("tokio=warn"));
}

#[test]
fn test_init_logging_twice_does_not_panic() {
    init_logging(Level::INFO, LogFormat::Compact, false);
    init_logging(Level::DEBUG, LogFormat::Json, true);
    tracing::info!("logging initialized");
}

#[test]
fn test_span_macros_build_spans() {
    init_logging(Level::DEBUG, LogFormat::Compact, false);

    let setup = meshtastic_client_proxy::bridge_span!(side = "device", port = "/dev/ttyUSB0");
    let _entered = setup.enter();
    let forward = meshtastic_client_proxy::forward_span!(direction = "device_to_broker");
    let _inner = forward.enter();
    tracing::debug!("inside spans");
}
