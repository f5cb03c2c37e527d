// crates/conveyor-core/src/core/report.rs
// ============================================================================
// Module: Conveyor Run Report Model
// Description: Versioned RunReport v1 artifact for tool-execution runs.
// Purpose: Provide the deterministic run record emitted per TOOL run.
// Dependencies: crate::core::{codes, identifiers, time}, serde
// ============================================================================

//! ## Overview
//! A `RunReport` describes a single tool-execution run: its step reports,
//! attempt events, budgets, and worst-of terminal aggregation. The report is
//! an artifact written to the evidence directory, never ticket state.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::codes::StableCode;
use crate::core::identifiers::RunId;
use crate::core::identifiers::TicketId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Report schema version emitted by this runner.
pub const RUN_REPORT_VERSION: &str = "v1";
/// Retry policy identifier for the v1 runner (no retries).
pub const RETRY_POLICY_V1: &str = "v1_default";
/// Maximum attempts under the v1 retry policy.
pub const MAX_ATTEMPTS_V1: u32 = 1;

// ============================================================================
// SECTION: Step Status
// ============================================================================

/// Outcome of a single tool step.
///
/// # Invariants
/// - Severity ordering is `ok < failed < blocked`; terminal aggregation takes
///   the worst-of across steps with first-seen tie-breaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step executed successfully.
    Ok,
    /// Step executed and failed, or was failed by a run timeout.
    Failed,
    /// Step was prevented from executing by a gate or budget.
    Blocked,
}

impl StepStatus {
    /// Returns the stable string form of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    /// Returns the severity rank used for worst-of aggregation.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Failed => 1,
            Self::Blocked => 2,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Side Effects
// ============================================================================

/// Coarse side-effect classification of a tool server.
///
/// The classification table is the single source of truth; the runner never
/// overrides it per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    /// Tool only reads external state.
    Read,
    /// Tool may mutate external state.
    Write,
    /// Tool is not in the classification table.
    Unknown,
}

impl SideEffect {
    /// Returns the stable string form of the classification.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Unknown => "unknown",
        }
    }
}

/// Returns the fixed side-effect classification for a tool server.
///
/// `filesystem` is classified `write` even for read-only calls; the
/// conservative entry is intentional and not configurable.
#[must_use]
pub fn side_effect_for_server(server: &str) -> SideEffect {
    match server {
        "web_search" => SideEffect::Read,
        "memory" | "filesystem" => SideEffect::Write,
        _ => SideEffect::Unknown,
    }
}

// ============================================================================
// SECTION: Attempt Events
// ============================================================================

/// Attempt event type recorded in the run trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptEventType {
    /// The run started.
    #[serde(rename = "RUN_START")]
    RunStart,
    /// The run ended.
    #[serde(rename = "RUN_END")]
    RunEnd,
    /// A step started.
    #[serde(rename = "STEP_START")]
    StepStart,
    /// A step ended.
    #[serde(rename = "STEP_END")]
    StepEnd,
}

/// Attempt event recorded while executing a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptEvent {
    /// Event type.
    #[serde(rename = "type")]
    pub event_type: AttemptEventType,
    /// Event timestamp.
    pub at: Timestamp,
    /// Step index for step-scoped events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    /// Step status carried by `STEP_END` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StepStatus>,
    /// Step code carried by `STEP_END` events when the step did not pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<StableCode>,
}

// ============================================================================
// SECTION: Step Reports
// ============================================================================

/// Evidence item attached to a step after candidate validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceItem {
    /// Evidence kind label supplied by the gateway.
    pub kind: String,
    /// Reference to the evidence source (URI, node id, path).
    pub reference: String,
    /// Short human-readable summary.
    #[serde(default)]
    pub summary: String,
}

/// Report for a single tool step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Zero-based step index.
    pub step_index: usize,
    /// Tool name the step targeted.
    pub tool_name: String,
    /// Side-effect classification of the step's server.
    pub side_effect: SideEffect,
    /// Step outcome.
    pub status: StepStatus,
    /// Stable code when the step did not pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<StableCode>,
    /// Step start timestamp.
    pub started_at: Timestamp,
    /// Step end timestamp.
    pub ended_at: Timestamp,
    /// Step duration in milliseconds.
    pub duration_ms: i64,
    /// Short summary of the gateway result.
    #[serde(default)]
    pub result_summary: String,
    /// Validated evidence items attached by the gateway.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence_items: Vec<EvidenceItem>,
}

// ============================================================================
// SECTION: Run Report
// ============================================================================

/// Snapshot of operating modes recorded into a run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeSnapshot {
    /// Whether the process runs without MCP providers.
    pub no_mcp: bool,
    /// Active cutover mode label.
    pub cutover_mode: String,
    /// Active schema-gate mode label.
    pub schema_gate_mode: String,
}

/// Versioned run report emitted per TOOL run.
///
/// # Invariants
/// - `terminal_status` equals the worst-of across `step_reports`.
/// - `primary_failure_code` is the first step code contributing to the
///   terminal status, or null for clean runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Report schema version.
    pub version: String,
    /// Run identifier; names the evidence directory.
    pub run_id: RunId,
    /// RFC 3339 generation time.
    pub as_of: String,
    /// Ticket the run executed for.
    pub ticket_id: TicketId,
    /// Retry policy identifier.
    pub retry_policy_id: String,
    /// Maximum attempts under the retry policy.
    pub max_attempts: u32,
    /// Worst-of terminal status.
    pub terminal_status: StepStatus,
    /// First code contributing to the terminal status, if any.
    pub primary_failure_code: Option<StableCode>,
    /// Run start timestamp.
    pub started_at: Timestamp,
    /// Run end timestamp.
    pub ended_at: Timestamp,
    /// Run duration in milliseconds.
    pub duration_ms: i64,
    /// Per-step reports in execution order.
    pub step_reports: Vec<StepReport>,
    /// Attempt events in emission order.
    pub attempt_events: Vec<AttemptEvent>,
    /// Operating-mode snapshot when the host supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_snapshot: Option<ModeSnapshot>,
}

impl RunReport {
    /// Computes worst-of terminal aggregation over step outcomes.
    ///
    /// Returns the terminal status and the first step code contributing to
    /// it. Ties resolve to the first-seen step.
    #[must_use]
    pub fn aggregate(steps: &[StepReport]) -> (StepStatus, Option<StableCode>) {
        let mut worst = StepStatus::Ok;
        let mut code = None;
        for step in steps {
            if step.status.severity() > worst.severity() {
                worst = step.status;
                code = step.code;
            }
        }
        (worst, code)
    }
}

/// Debug artifact payload recorded alongside guard rejections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardRejectionDebug {
    /// Stable rejection code.
    pub reason_code: StableCode,
    /// Ticket the rejection applies to.
    pub ticket_id: TicketId,
    /// Tool name that triggered the rejection, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Missing dependency keys, when applicable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_required: Vec<String>,
    /// Free-form context for operators.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}
