// crates/conveyor-core/src/core/codes.rs
// ============================================================================
// Module: Conveyor Stable Codes
// Description: Closed taxonomy of stable, low-cardinality error codes.
// Purpose: Provide the only source of error-code strings used at boundaries.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Every error surfaced at an HTTP boundary, in a run report, or in an audit
//! record draws from this closed taxonomy. Codes are never generated at
//! runtime; upstream error objects are mapped onto these variants at exactly
//! one site per component. The string forms are part of the external
//! contract and must not change.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Stable Codes
// ============================================================================

/// Stable error code taxonomy for lease, readiness, tool, schema, and probe
/// failures.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
/// - The set is closed; no code is minted outside this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StableCode {
    /// Concurrent lease attempt lost the race for a pending ticket.
    #[serde(rename = "lease_conflict")]
    LeaseConflict,
    /// Fill or release presented a stale or foreign lease.
    #[serde(rename = "lease_owner_mismatch")]
    LeaseOwnerMismatch,
    /// One or more required dependencies are unavailable.
    #[serde(rename = "MCP_REQUIRED_UNAVAILABLE")]
    McpRequiredUnavailable,
    /// A fill was rejected because required dependencies were not ready.
    #[serde(rename = "readiness_blocked")]
    ReadinessBlocked,
    /// Tool name is not in the runner allowlist (step-level form).
    #[serde(rename = "UNKNOWN_TOOL")]
    UnknownTool,
    /// Tool name is not in the allowlist (ticket finalization form).
    #[serde(rename = "unknown_tool")]
    UnknownToolTicket,
    /// Tool arguments fall outside the per-tool key allowlist.
    #[serde(rename = "INVALID_TOOL_ARGS")]
    InvalidToolArgs,
    /// Run budget carries unknown keys.
    #[serde(rename = "INVALID_BUDGET")]
    InvalidBudget,
    /// Tool step shape is malformed (for example empty tool name).
    #[serde(rename = "INVALID_TOOL_STEP")]
    InvalidToolStep,
    /// Evidence candidate carries forbidden blob-ish fields.
    #[serde(rename = "INVALID_EVIDENCE_CANDIDATE")]
    InvalidEvidenceCandidate,
    /// Gateway reported a timeout for a tool call.
    #[serde(rename = "TOOL_TIMEOUT")]
    ToolTimeout,
    /// Gateway reported the tool as unavailable.
    #[serde(rename = "TOOL_UNAVAILABLE")]
    ToolUnavailable,
    /// Gateway reported any other execution failure.
    #[serde(rename = "TOOL_EXEC_FAILED")]
    ToolExecFailed,
    /// Run wall-time budget was exhausted before the step ran.
    #[serde(rename = "RUN_TIMEOUT")]
    RunTimeout,
    /// Run step budget was exhausted before the step ran.
    #[serde(rename = "BUDGET_EXCEEDED")]
    BudgetExceeded,
    /// Schema gate rejected a payload in strict mode.
    #[serde(rename = "SCHEMA_VALIDATION_FAILED")]
    SchemaValidationFailed,
    /// Probe observed an access denial.
    #[serde(rename = "PROBE_ACCESS_DENIED")]
    ProbeAccessDenied,
    /// Probe observed a forbidden response.
    #[serde(rename = "PROBE_FORBIDDEN")]
    ProbeForbidden,
    /// Probe target was not found.
    #[serde(rename = "PROBE_NOT_FOUND")]
    ProbeNotFound,
    /// Probe timed out.
    #[serde(rename = "PROBE_TIMEOUT")]
    ProbeTimeout,
    /// Probe failure was forced by operator override.
    #[serde(rename = "PROBE_FORCED_FAIL")]
    ProbeForcedFail,
    /// Provider is absent because the process runs in no-MCP mode.
    #[serde(rename = "PROVIDER_UNAVAILABLE_NO_MCP")]
    ProviderUnavailableNoMcp,
    /// Provider does not implement the probed capability.
    #[serde(rename = "PROVIDER_NOT_IMPLEMENTED")]
    ProviderNotImplemented,
    /// Provider call failed outright.
    #[serde(rename = "PROVIDER_CALL_FAILED")]
    ProviderCallFailed,
    /// Tool-execute request omitted the tool name.
    #[serde(rename = "missing_tool")]
    MissingTool,
}

impl StableCode {
    /// Returns the stable string form of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LeaseConflict => "lease_conflict",
            Self::LeaseOwnerMismatch => "lease_owner_mismatch",
            Self::McpRequiredUnavailable => "MCP_REQUIRED_UNAVAILABLE",
            Self::ReadinessBlocked => "readiness_blocked",
            Self::UnknownTool => "UNKNOWN_TOOL",
            Self::UnknownToolTicket => "unknown_tool",
            Self::InvalidToolArgs => "INVALID_TOOL_ARGS",
            Self::InvalidBudget => "INVALID_BUDGET",
            Self::InvalidToolStep => "INVALID_TOOL_STEP",
            Self::InvalidEvidenceCandidate => "INVALID_EVIDENCE_CANDIDATE",
            Self::ToolTimeout => "TOOL_TIMEOUT",
            Self::ToolUnavailable => "TOOL_UNAVAILABLE",
            Self::ToolExecFailed => "TOOL_EXEC_FAILED",
            Self::RunTimeout => "RUN_TIMEOUT",
            Self::BudgetExceeded => "BUDGET_EXCEEDED",
            Self::SchemaValidationFailed => "SCHEMA_VALIDATION_FAILED",
            Self::ProbeAccessDenied => "PROBE_ACCESS_DENIED",
            Self::ProbeForbidden => "PROBE_FORBIDDEN",
            Self::ProbeNotFound => "PROBE_NOT_FOUND",
            Self::ProbeTimeout => "PROBE_TIMEOUT",
            Self::ProbeForcedFail => "PROBE_FORCED_FAIL",
            Self::ProviderUnavailableNoMcp => "PROVIDER_UNAVAILABLE_NO_MCP",
            Self::ProviderNotImplemented => "PROVIDER_NOT_IMPLEMENTED",
            Self::ProviderCallFailed => "PROVIDER_CALL_FAILED",
            Self::MissingTool => "missing_tool",
        }
    }
}

impl fmt::Display for StableCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gateway error codes declared retryable for future retry policies.
///
/// Retries are not performed in v1 (`max_attempts` is fixed at 1); the set
/// is declared so retry policy revisions do not change the taxonomy.
pub const RETRYABLE_CODES: &[StableCode] = &[StableCode::ToolTimeout, StableCode::ToolUnavailable];

// ============================================================================
// SECTION: Dependency Codes
// ============================================================================

/// Closed readiness code taxonomy for dependency states.
///
/// # Invariants
/// - Variants are stable for readiness snapshots and audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepCode {
    /// Dependency is ready.
    #[serde(rename = "OK")]
    Ok,
    /// Dependency is present but currently unavailable.
    #[serde(rename = "DEP_UNAVAILABLE")]
    DepUnavailable,
    /// Dependency failed to initialize at startup.
    #[serde(rename = "DEP_INIT_FAILED")]
    DepInitFailed,
    /// Dependency timed out during a health exchange.
    #[serde(rename = "DEP_TIMEOUT")]
    DepTimeout,
    /// Dependency violated its protocol contract.
    #[serde(rename = "DEP_PROTOCOL_ERROR")]
    DepProtocolError,
}

impl DepCode {
    /// Returns the stable string form of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::DepUnavailable => "DEP_UNAVAILABLE",
            Self::DepInitFailed => "DEP_INIT_FAILED",
            Self::DepTimeout => "DEP_TIMEOUT",
            Self::DepProtocolError => "DEP_PROTOCOL_ERROR",
        }
    }
}

impl fmt::Display for DepCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Schema Warn Codes
// ============================================================================

/// Classification of schema-gate validation errors.
///
/// # Invariants
/// - Variants are stable for audit records and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnCode {
    /// A required field is absent.
    Missing,
    /// A field is present with the wrong type.
    TypeMismatch,
    /// A field is present that the schema does not declare.
    UnknownField,
    /// The schema itself failed to compile or the payload is not an object.
    SchemaInvalid,
}

impl WarnCode {
    /// Returns the stable string form of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::TypeMismatch => "type_mismatch",
            Self::UnknownField => "unknown_field",
            Self::SchemaInvalid => "schema_invalid",
        }
    }
}

impl fmt::Display for WarnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
