// crates/conveyor-config/src/lib.rs
// ============================================================================
// Module: Conveyor Config Library
// Description: Canonical environment-keyed configuration model.
// Purpose: Single source of truth for orchestrator configuration semantics.
// Dependencies: conveyor-core, serde, thiserror
// ============================================================================

//! ## Overview
//! `conveyor-config` builds the typed [`ConveyorConfig`] once at startup from
//! environment-variable keys. Parsing is strict and fail-closed: boolean keys
//! accept only the strings `"true"` and `"false"`, numeric keys must parse
//! completely, and an invalid value names the offending key. Components
//! receive only the fields they use; nothing reads the environment after
//! startup. A deterministic override map supports tests without touching the
//! process environment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::path::PathBuf;

use conveyor_core::CutoverPolicy;
use conveyor_core::DerivationConfig;
use conveyor_core::SchemaGateMode;
use thiserror::Error;

// ============================================================================
// SECTION: Keys
// ============================================================================

/// Canonical cutover cutoff key (epoch milliseconds).
pub const KEY_CUTOVER_UNTIL_MS: &str = "CUTOVER_UNTIL_MS";
/// Deprecated alias for the cutover cutoff; loses to the canonical key.
pub const KEY_DUALWRITE_UNTIL_MS: &str = "DUALWRITE_UNTIL_MS";
/// Enables TRIAGE→TOOL derivation.
pub const KEY_ENABLE_TOOL_DERIVATION: &str = "ENABLE_TOOL_DERIVATION";
/// Enables TOOL→REPLY derivation.
pub const KEY_ENABLE_REPLY_DERIVATION: &str = "ENABLE_REPLY_DERIVATION";
/// Blocks REPLY creation even when other gates pass.
pub const KEY_TOOL_ONLY_MODE: &str = "TOOL_ONLY_MODE";
/// Schema gate mode: `off`, `warn`, or `strict`.
pub const KEY_SCHEMA_GATE_MODE: &str = "SCHEMA_GATE_MODE";
/// Master switch for ticket schema validation.
pub const KEY_ENABLE_TICKET_SCHEMA_VALIDATION: &str = "ENABLE_TICKET_SCHEMA_VALIDATION";
/// Exit at startup when required dependencies are unready.
pub const KEY_STRICT_MCP_INIT: &str = "STRICT_MCP_INIT";
/// Select the degraded no-MCP provider.
pub const KEY_NO_MCP: &str = "NO_MCP";
/// Allow memory-server write tools.
pub const KEY_MEMORY_WRITE_ENABLED: &str = "MEMORY_WRITE_ENABLED";
/// Permit evidence run-directory overwrite (last writer wins).
pub const KEY_ALLOW_RUN_ID_OVERWRITE: &str = "ALLOW_RUN_ID_OVERWRITE";
/// Evidence base directory.
pub const KEY_LOGS_DIR: &str = "LOGS_DIR";
/// HTTP port for the orchestrator.
pub const KEY_ORCHESTRATOR_PORT: &str = "ORCHESTRATOR_PORT";
/// Force one named probe to fail deterministically.
pub const KEY_PROBE_FORCE_FAIL: &str = "PROBE_FORCE_FAIL";
/// Durable ticket log path; in-memory when unset.
pub const KEY_TICKET_LOG_PATH: &str = "TICKET_LOG_PATH";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Boolean key carries something other than `"true"` or `"false"`.
    #[error("config key {key} must be \"true\" or \"false\", got {value:?}")]
    InvalidBool {
        /// Offending key.
        key: &'static str,
        /// Observed value.
        value: String,
    },
    /// Integer key failed to parse.
    #[error("config key {key} must be an integer, got {value:?}")]
    InvalidInt {
        /// Offending key.
        key: &'static str,
        /// Observed value.
        value: String,
    },
    /// Schema gate mode is not `off`, `warn`, or `strict`.
    #[error("config key {key} must be off, warn, or strict, got {value:?}")]
    InvalidMode {
        /// Offending key.
        key: &'static str,
        /// Observed value.
        value: String,
    },
    /// Port is out of range.
    #[error("config key {key} must be a port number, got {value:?}")]
    InvalidPort {
        /// Offending key.
        key: &'static str,
        /// Observed value.
        value: String,
    },
}

// ============================================================================
// SECTION: Config Model
// ============================================================================

/// Typed orchestrator configuration built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConveyorConfig {
    /// Epoch milliseconds up to which pre-cutover mode applies.
    pub cutover_until_ms: i64,
    /// Whether the cutoff came from the deprecated alias key.
    pub cutover_alias_used: bool,
    /// Whether legacy reads are permitted while pre-cutover.
    pub legacy_reads_pre_cutover: bool,
    /// Enables TRIAGE→TOOL derivation.
    pub enable_tool_derivation: bool,
    /// Enables TOOL→REPLY derivation.
    pub enable_reply_derivation: bool,
    /// Blocks REPLY creation even when other gates pass.
    pub tool_only_mode: bool,
    /// Schema gate operating mode.
    pub schema_gate_mode: SchemaGateMode,
    /// Master switch for ticket schema validation.
    pub enable_ticket_schema_validation: bool,
    /// Exit at startup when required dependencies are unready.
    pub strict_mcp_init: bool,
    /// Run with the degraded no-MCP provider.
    pub no_mcp: bool,
    /// Allow memory-server write tools in the allowlist.
    pub memory_write_enabled: bool,
    /// Permit evidence run-directory overwrite.
    pub allow_run_id_overwrite: bool,
    /// Evidence base directory.
    pub logs_dir: PathBuf,
    /// HTTP port for the orchestrator.
    pub orchestrator_port: u16,
    /// Probe name forced to fail at startup, when set.
    pub probe_force_fail: Option<String>,
    /// Durable ticket log path; in-memory when unset.
    pub ticket_log_path: Option<PathBuf>,
}

impl Default for ConveyorConfig {
    fn default() -> Self {
        Self {
            cutover_until_ms: 0,
            cutover_alias_used: false,
            legacy_reads_pre_cutover: true,
            enable_tool_derivation: true,
            enable_reply_derivation: true,
            tool_only_mode: false,
            schema_gate_mode: SchemaGateMode::Warn,
            enable_ticket_schema_validation: true,
            strict_mcp_init: false,
            no_mcp: false,
            memory_write_enabled: false,
            allow_run_id_overwrite: false,
            logs_dir: PathBuf::from("logs"),
            orchestrator_port: 8787,
            probe_force_fail: None,
            ticket_log_path: None,
        }
    }
}

impl ConveyorConfig {
    /// Builds the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first invalid key.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&EnvSource::process())
    }

    /// Builds the configuration from a deterministic override map.
    ///
    /// Keys absent from the map take their defaults; the process environment
    /// is never consulted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] naming the first invalid key.
    pub fn from_overrides(overrides: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_source(&EnvSource::overrides(overrides.clone()))
    }

    /// Shared builder over an environment source.
    fn from_source(source: &EnvSource) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let canonical = source.get(KEY_CUTOVER_UNTIL_MS).filter(|value| !value.is_empty());
        let alias = source.get(KEY_DUALWRITE_UNTIL_MS).filter(|value| !value.is_empty());
        match (canonical, alias) {
            (Some(value), _) => {
                config.cutover_until_ms = parse_int(KEY_CUTOVER_UNTIL_MS, &value)?;
            }
            (None, Some(value)) => {
                config.cutover_until_ms = parse_int(KEY_DUALWRITE_UNTIL_MS, &value)?;
                config.cutover_alias_used = true;
            }
            (None, None) => {}
        }

        if let Some(value) = source.get(KEY_ENABLE_TOOL_DERIVATION) {
            config.enable_tool_derivation = parse_bool(KEY_ENABLE_TOOL_DERIVATION, &value)?;
        }
        if let Some(value) = source.get(KEY_ENABLE_REPLY_DERIVATION) {
            config.enable_reply_derivation = parse_bool(KEY_ENABLE_REPLY_DERIVATION, &value)?;
        }
        if let Some(value) = source.get(KEY_TOOL_ONLY_MODE) {
            config.tool_only_mode = parse_bool(KEY_TOOL_ONLY_MODE, &value)?;
        }
        if let Some(value) = source.get(KEY_SCHEMA_GATE_MODE) {
            config.schema_gate_mode =
                SchemaGateMode::from_wire(&value).ok_or_else(|| ConfigError::InvalidMode {
                    key: KEY_SCHEMA_GATE_MODE,
                    value: value.clone(),
                })?;
        }
        if let Some(value) = source.get(KEY_ENABLE_TICKET_SCHEMA_VALIDATION) {
            config.enable_ticket_schema_validation =
                parse_bool(KEY_ENABLE_TICKET_SCHEMA_VALIDATION, &value)?;
        }
        if let Some(value) = source.get(KEY_STRICT_MCP_INIT) {
            config.strict_mcp_init = parse_bool(KEY_STRICT_MCP_INIT, &value)?;
        }
        if let Some(value) = source.get(KEY_NO_MCP) {
            config.no_mcp = parse_bool(KEY_NO_MCP, &value)?;
        }
        if let Some(value) = source.get(KEY_MEMORY_WRITE_ENABLED) {
            config.memory_write_enabled = parse_bool(KEY_MEMORY_WRITE_ENABLED, &value)?;
        }
        if let Some(value) = source.get(KEY_ALLOW_RUN_ID_OVERWRITE) {
            config.allow_run_id_overwrite = parse_bool(KEY_ALLOW_RUN_ID_OVERWRITE, &value)?;
        }
        if let Some(value) = source.get(KEY_LOGS_DIR)
            && !value.is_empty()
        {
            config.logs_dir = PathBuf::from(value);
        }
        if let Some(value) = source.get(KEY_ORCHESTRATOR_PORT) {
            config.orchestrator_port =
                value.parse::<u16>().map_err(|_| ConfigError::InvalidPort {
                    key: KEY_ORCHESTRATOR_PORT,
                    value,
                })?;
        }
        if let Some(value) = source.get(KEY_PROBE_FORCE_FAIL)
            && !value.is_empty()
        {
            config.probe_force_fail = Some(value);
        }
        if let Some(value) = source.get(KEY_TICKET_LOG_PATH)
            && !value.is_empty()
        {
            config.ticket_log_path = Some(PathBuf::from(value));
        }

        Ok(config)
    }

    /// Returns the derivation feature gates.
    #[must_use]
    pub const fn derivation(&self) -> DerivationConfig {
        DerivationConfig {
            enable_tool_derivation: self.enable_tool_derivation,
            enable_reply_derivation: self.enable_reply_derivation,
            tool_only_mode: self.tool_only_mode,
        }
    }

    /// Returns the cutover policy.
    #[must_use]
    pub const fn cutover_policy(&self) -> CutoverPolicy {
        CutoverPolicy::new(self.cutover_until_ms, self.legacy_reads_pre_cutover)
    }
}

// ============================================================================
// SECTION: Environment Source
// ============================================================================

/// Environment access with deterministic test overrides.
///
/// # Invariants
/// - Override mode never consults the process environment.
struct EnvSource {
    /// Override map used for deterministic lookups.
    overrides: Option<BTreeMap<String, String>>,
}

impl EnvSource {
    /// Source backed by the process environment.
    const fn process() -> Self {
        Self {
            overrides: None,
        }
    }

    /// Source backed entirely by an override map.
    const fn overrides(map: BTreeMap<String, String>) -> Self {
        Self {
            overrides: Some(map),
        }
    }

    /// Looks up one key.
    fn get(&self, key: &str) -> Option<String> {
        match &self.overrides {
            Some(map) => map.get(key).cloned(),
            None => std::env::var(key).ok(),
        }
    }
}

// ============================================================================
// SECTION: Parsers
// ============================================================================

/// Parses a strict string boolean.
fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(ConfigError::InvalidBool {
            key,
            value: other.to_string(),
        }),
    }
}

/// Parses a signed integer.
fn parse_int(key: &'static str, value: &str) -> Result<i64, ConfigError> {
    value.parse::<i64>().map_err(|_| ConfigError::InvalidInt {
        key,
        value: value.to_string(),
    })
}
