// crates/conveyor-config/tests/env_config.rs
// ============================================================================
// Module: Config Tests
// Description: Tests for environment-keyed configuration parsing.
// Purpose: Validate defaults, strict booleans, and alias precedence.
// Dependencies: conveyor-config, conveyor-core
// ============================================================================
//! ## Overview
//! Ensures every key parses fail-closed, the cutover alias loses to the
//! canonical key, and derived policy objects reflect the parsed values.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use conveyor_config::ConfigError;
use conveyor_config::ConveyorConfig;
use conveyor_core::CutoverMode;
use conveyor_core::SchemaGateMode;
use conveyor_core::Timestamp;

fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(key, value)| ((*key).to_string(), (*value).to_string())).collect()
}

/// Verifies an empty environment yields the documented defaults.
#[test]
fn defaults_apply_when_unset() {
    let config = ConveyorConfig::from_overrides(&overrides(&[])).expect("config");
    assert_eq!(config.cutover_until_ms, 0);
    assert!(!config.cutover_alias_used);
    assert!(config.enable_tool_derivation);
    assert!(config.enable_reply_derivation);
    assert!(!config.tool_only_mode);
    assert_eq!(config.schema_gate_mode, SchemaGateMode::Warn);
    assert!(config.enable_ticket_schema_validation);
    assert!(!config.strict_mcp_init);
    assert!(!config.no_mcp);
    assert!(!config.memory_write_enabled);
    assert!(!config.allow_run_id_overwrite);
    assert_eq!(config.logs_dir, PathBuf::from("logs"));
    assert_eq!(config.orchestrator_port, 8787);
    assert!(config.probe_force_fail.is_none());
    assert!(config.ticket_log_path.is_none());
}

/// Verifies booleans accept only the literal strings true and false.
#[test]
fn booleans_are_strict_strings() {
    let config =
        ConveyorConfig::from_overrides(&overrides(&[("TOOL_ONLY_MODE", "true")])).expect("config");
    assert!(config.tool_only_mode);

    let err = ConveyorConfig::from_overrides(&overrides(&[("TOOL_ONLY_MODE", "1")]))
        .expect_err("invalid bool");
    assert!(matches!(err, ConfigError::InvalidBool { key: "TOOL_ONLY_MODE", .. }));

    let err = ConveyorConfig::from_overrides(&overrides(&[("NO_MCP", "TRUE")]))
        .expect_err("invalid bool");
    assert!(matches!(err, ConfigError::InvalidBool { key: "NO_MCP", .. }));
}

/// Verifies the canonical cutover key wins over the deprecated alias.
#[test]
fn cutover_canonical_key_wins() {
    let config = ConveyorConfig::from_overrides(&overrides(&[
        ("CUTOVER_UNTIL_MS", "5000"),
        ("DUALWRITE_UNTIL_MS", "9000"),
    ]))
    .expect("config");
    assert_eq!(config.cutover_until_ms, 5_000);
    assert!(!config.cutover_alias_used);
}

/// Verifies the deprecated alias is honored when it stands alone.
#[test]
fn cutover_alias_honored_alone() {
    let config =
        ConveyorConfig::from_overrides(&overrides(&[("DUALWRITE_UNTIL_MS", "9000")]))
            .expect("config");
    assert_eq!(config.cutover_until_ms, 9_000);
    assert!(config.cutover_alias_used);
}

/// Verifies an empty canonical value falls through to the alias.
#[test]
fn empty_canonical_value_falls_back() {
    let config = ConveyorConfig::from_overrides(&overrides(&[
        ("CUTOVER_UNTIL_MS", ""),
        ("DUALWRITE_UNTIL_MS", "9000"),
    ]))
    .expect("config");
    assert_eq!(config.cutover_until_ms, 9_000);
    assert!(config.cutover_alias_used);
}

/// Verifies numeric keys reject non-integer values.
#[test]
fn integers_fail_closed() {
    let err = ConveyorConfig::from_overrides(&overrides(&[("CUTOVER_UNTIL_MS", "soon")]))
        .expect_err("invalid int");
    assert!(matches!(err, ConfigError::InvalidInt { key: "CUTOVER_UNTIL_MS", .. }));

    let err = ConveyorConfig::from_overrides(&overrides(&[("ORCHESTRATOR_PORT", "99999")]))
        .expect_err("invalid port");
    assert!(matches!(err, ConfigError::InvalidPort { .. }));
}

/// Verifies the schema gate mode parses its three spellings only.
#[test]
fn schema_gate_mode_parses() {
    let config = ConveyorConfig::from_overrides(&overrides(&[("SCHEMA_GATE_MODE", "strict")]))
        .expect("config");
    assert_eq!(config.schema_gate_mode, SchemaGateMode::Strict);

    let err = ConveyorConfig::from_overrides(&overrides(&[("SCHEMA_GATE_MODE", "loose")]))
        .expect_err("invalid mode");
    assert!(matches!(err, ConfigError::InvalidMode { .. }));
}

/// Verifies derived policy objects reflect the parsed values.
#[test]
fn derived_policies_reflect_values() {
    let config = ConveyorConfig::from_overrides(&overrides(&[
        ("CUTOVER_UNTIL_MS", "5000"),
        ("ENABLE_REPLY_DERIVATION", "false"),
        ("TOOL_ONLY_MODE", "true"),
    ]))
    .expect("config");

    let derivation = config.derivation();
    assert!(derivation.enable_tool_derivation);
    assert!(!derivation.enable_reply_derivation);
    assert!(derivation.tool_only_mode);

    let policy = config.cutover_policy();
    assert_eq!(policy.mode(Timestamp::from_unix_millis(4_000)), CutoverMode::PreCutover);
    assert_eq!(policy.mode(Timestamp::from_unix_millis(6_000)), CutoverMode::PostCutover);
}

/// Verifies path-like keys ignore empty values.
#[test]
fn empty_paths_keep_defaults() {
    let config = ConveyorConfig::from_overrides(&overrides(&[
        ("LOGS_DIR", ""),
        ("TICKET_LOG_PATH", ""),
        ("PROBE_FORCE_FAIL", ""),
    ]))
    .expect("config");
    assert_eq!(config.logs_dir, PathBuf::from("logs"));
    assert!(config.ticket_log_path.is_none());
    assert!(config.probe_force_fail.is_none());
}
