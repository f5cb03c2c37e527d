// crates/conveyor-core/src/runtime/runner.rs
// ============================================================================
// Module: Conveyor Tool-Run Engine
// Description: Validated, budgeted execution of ticket tool steps.
// Purpose: Produce deterministic RunReport v1 records per TOOL run.
// Dependencies: crate::core, crate::interfaces, crate::runtime::readiness
// ============================================================================

//! ## Overview
//! The runner executes a ticket's tool steps through an injected gateway.
//! Every step passes shape validation, the dependency gate, and budget checks
//! before the gateway is invoked; upstream error codes are mapped onto the
//! stable taxonomy at exactly one site. The terminal status is the worst-of
//! across step statuses under `ok < failed < blocked`, with first-seen
//! tie-breaking, and the terminal code is the first step code contributing to
//! that status. The v1 policy performs no retries.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;

use crate::core::AttemptEvent;
use crate::core::AttemptEventType;
use crate::core::EvidenceItem;
use crate::core::MAX_ATTEMPTS_V1;
use crate::core::ModeSnapshot;
use crate::core::RETRY_POLICY_V1;
use crate::core::RUN_REPORT_VERSION;
use crate::core::RunId;
use crate::core::RunReport;
use crate::core::StableCode;
use crate::core::StepReport;
use crate::core::StepStatus;
use crate::core::TicketId;
use crate::core::Timestamp;
use crate::core::ToolStep;
use crate::core::side_effect_for_server;
use crate::interfaces::Clock;
use crate::interfaces::EvidenceCandidate;
use crate::interfaces::ToolCall;
use crate::interfaces::ToolGateway;
use crate::runtime::readiness::ReadinessRegistry;

// ============================================================================
// SECTION: Budget
// ============================================================================

/// Default maximum steps per run.
pub const DEFAULT_MAX_STEPS: usize = 8;
/// Default wall-time budget per run in milliseconds.
pub const DEFAULT_MAX_WALL_MS: i64 = 30_000;

/// Parsed run budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBudget {
    /// Maximum number of steps allowed to execute.
    pub max_steps: usize,
    /// Wall-time budget in milliseconds.
    pub max_wall_ms: i64,
}

impl Default for RunBudget {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_wall_ms: DEFAULT_MAX_WALL_MS,
        }
    }
}

impl RunBudget {
    /// Parses a raw budget object, rejecting unknown keys.
    ///
    /// # Errors
    ///
    /// Returns the offending key when the budget carries a key outside
    /// `{max_steps, max_wall_ms}` or a non-integer value.
    pub fn parse(raw: &Value) -> Result<Self, String> {
        let Value::Object(map) = raw else {
            return Err("budget is not an object".to_string());
        };
        let mut budget = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "max_steps" => {
                    let steps = value
                        .as_u64()
                        .ok_or_else(|| format!("budget key {key} is not an unsigned integer"))?;
                    budget.max_steps = usize::try_from(steps)
                        .map_err(|_| format!("budget key {key} is out of range"))?;
                }
                "max_wall_ms" => {
                    budget.max_wall_ms = value
                        .as_i64()
                        .ok_or_else(|| format!("budget key {key} is not an integer"))?;
                }
                other => return Err(format!("unknown budget key {other}")),
            }
        }
        Ok(budget)
    }
}

// ============================================================================
// SECTION: Tool Allowlist
// ============================================================================

/// Per-tool argument-key allowlist.
///
/// # Invariants
/// - A tool absent from the table is unknown; the runner blocks it.
/// - Memory-server write tools appear only when memory writes are enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolAllowlist {
    /// Allowed argument keys per tool name.
    tools: BTreeMap<String, BTreeSet<String>>,
}

impl ToolAllowlist {
    /// Builds the standard allowlist for this deployment.
    #[must_use]
    pub fn standard(memory_write_enabled: bool) -> Self {
        let mut tools: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut insert = |tool: &str, keys: &[&str]| {
            tools.insert(tool.to_string(), keys.iter().map(|key| (*key).to_string()).collect());
        };
        insert("search_nodes", &["query"]);
        insert("open_nodes", &["name"]);
        insert("web_search", &["query", "max_results"]);
        insert("notebooklm_query", &["notebook", "query"]);
        if memory_write_enabled {
            insert("create_entities", &["name", "entity_type", "observation"]);
            insert("add_observations", &["name", "observation"]);
        }
        Self {
            tools,
        }
    }

    /// Returns true when the tool is known.
    #[must_use]
    pub fn contains(&self, tool: &str) -> bool {
        self.tools.contains_key(tool)
    }

    /// Returns the allowed argument keys for a tool.
    #[must_use]
    pub fn allowed_args(&self, tool: &str) -> Option<&BTreeSet<String>> {
        self.tools.get(tool)
    }
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Per-step outcome produced by validation or execution.
struct StepOutcome {
    /// Step status.
    status: StepStatus,
    /// Stable code when the step did not pass.
    code: Option<StableCode>,
    /// Result summary for the report.
    summary: String,
    /// Validated evidence items.
    evidence: Vec<EvidenceItem>,
}

impl StepOutcome {
    /// Builds a non-passing outcome with a stable code.
    fn gated(status: StepStatus, code: StableCode, summary: impl Into<String>) -> Self {
        Self {
            status,
            code: Some(code),
            summary: summary.into(),
            evidence: Vec::new(),
        }
    }
}

/// Tool-run engine executing validated steps through a gateway.
pub struct RunnerCore {
    /// Per-tool argument allowlist.
    allowlist: ToolAllowlist,
    /// Readiness registry for the dependency gate.
    readiness: Arc<ReadinessRegistry>,
    /// Injected time source for wall-clock budgeting.
    clock: Arc<dyn Clock>,
}

impl RunnerCore {
    /// Creates a runner with the given allowlist and readiness registry.
    #[must_use]
    pub fn new(
        allowlist: ToolAllowlist,
        readiness: Arc<ReadinessRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            allowlist,
            readiness,
            clock,
        }
    }

    /// Returns the runner's tool allowlist.
    #[must_use]
    pub const fn allowlist(&self) -> &ToolAllowlist {
        &self.allowlist
    }

    /// Executes a run over the given steps and returns its report.
    #[must_use]
    pub fn execute(
        &self,
        ticket_id: &TicketId,
        steps: &[ToolStep],
        budget_raw: Option<&Value>,
        gateway: &dyn ToolGateway,
        mode_snapshot: Option<ModeSnapshot>,
    ) -> RunReport {
        let run_id = RunId::generate();
        let started_at = self.clock.now();
        let mut events = vec![run_event(AttemptEventType::RunStart, started_at)];
        let mut step_reports = Vec::with_capacity(steps.len());

        let budget = budget_raw.map(RunBudget::parse);
        let (budget, budget_error) = match budget {
            None => (RunBudget::default(), None),
            Some(Ok(parsed)) => (parsed, None),
            Some(Err(detail)) => (RunBudget::default(), Some(detail)),
        };

        let mut timed_out = false;
        for (step_index, step) in steps.iter().enumerate() {
            let step_started = self.clock.now();
            events.push(step_event(AttemptEventType::StepStart, step_started, step_index, None));

            let outcome = if timed_out {
                StepOutcome::gated(
                    StepStatus::Failed,
                    StableCode::RunTimeout,
                    "wall-time budget exhausted before step",
                )
            } else {
                let outcome = self.run_step(
                    step,
                    step_index,
                    &budget,
                    budget_error.as_deref(),
                    started_at,
                    step_started,
                    gateway,
                );
                if outcome.code == Some(StableCode::RunTimeout) {
                    timed_out = true;
                }
                outcome
            };

            let step_ended = self.clock.now();
            events.push(step_event(
                AttemptEventType::StepEnd,
                step_ended,
                step_index,
                Some((outcome.status, outcome.code)),
            ));
            step_reports.push(StepReport {
                step_index,
                tool_name: step.tool.clone(),
                side_effect: side_effect_for_server(&step.server),
                status: outcome.status,
                code: outcome.code,
                started_at: step_started,
                ended_at: step_ended,
                duration_ms: step_ended.millis_since(step_started),
                result_summary: outcome.summary,
                evidence_items: outcome.evidence,
            });
        }

        let ended_at = self.clock.now();
        events.push(run_event(AttemptEventType::RunEnd, ended_at));
        let (terminal_status, primary_failure_code) = RunReport::aggregate(&step_reports);
        RunReport {
            version: RUN_REPORT_VERSION.to_string(),
            run_id,
            as_of: ended_at.to_rfc3339(),
            ticket_id: ticket_id.clone(),
            retry_policy_id: RETRY_POLICY_V1.to_string(),
            max_attempts: MAX_ATTEMPTS_V1,
            terminal_status,
            primary_failure_code,
            started_at,
            ended_at,
            duration_ms: ended_at.millis_since(started_at),
            step_reports,
            attempt_events: events,
            mode_snapshot,
        }
    }

    /// Validates and executes one step.
    #[allow(clippy::too_many_arguments, reason = "Step context is explicit by design.")]
    fn run_step(
        &self,
        step: &ToolStep,
        step_index: usize,
        budget: &RunBudget,
        budget_error: Option<&str>,
        run_started: Timestamp,
        step_started: Timestamp,
        gateway: &dyn ToolGateway,
    ) -> StepOutcome {
        // Shape validation.
        if step.tool.trim().is_empty() {
            return StepOutcome::gated(
                StepStatus::Blocked,
                StableCode::InvalidToolStep,
                "tool name is empty",
            );
        }
        if let Some(detail) = budget_error {
            return StepOutcome::gated(StepStatus::Blocked, StableCode::InvalidBudget, detail);
        }
        if !self.allowlist.contains(&step.tool) {
            return StepOutcome::gated(
                StepStatus::Blocked,
                StableCode::UnknownTool,
                format!("tool {} is not in the allowlist", step.tool),
            );
        }
        if let Some(detail) = invalid_args(step, &self.allowlist) {
            return StepOutcome::gated(StepStatus::Blocked, StableCode::InvalidToolArgs, detail);
        }

        // Dependency gate; unknown tools already fell back to the
        // conservative union inside the registry.
        let deps: Vec<_> = self.readiness.deps_for_tool(&step.tool).into_iter().collect();
        if let Err(missing) = self.readiness.require_deps(&deps) {
            return StepOutcome::gated(
                StepStatus::Blocked,
                StableCode::McpRequiredUnavailable,
                missing.to_string(),
            );
        }

        // Budget checks.
        if step_index >= budget.max_steps {
            return StepOutcome::gated(
                StepStatus::Blocked,
                StableCode::BudgetExceeded,
                format!("step budget of {} exhausted", budget.max_steps),
            );
        }
        if step_started.millis_since(run_started) > budget.max_wall_ms {
            return StepOutcome::gated(
                StepStatus::Failed,
                StableCode::RunTimeout,
                format!("wall-time budget of {}ms exhausted", budget.max_wall_ms),
            );
        }

        // Gateway invocation; upstream codes map to the stable taxonomy here
        // and nowhere else.
        let call = ToolCall {
            tool_name: step.tool.clone(),
            args: step.args.clone(),
        };
        match gateway.execute(&call) {
            Ok(response) => match validate_candidates(&response.evidence_candidates) {
                Ok(evidence) => StepOutcome {
                    status: StepStatus::Ok,
                    code: None,
                    summary: summarize(&response.result),
                    evidence,
                },
                Err(detail) => StepOutcome::gated(
                    StepStatus::Blocked,
                    StableCode::InvalidEvidenceCandidate,
                    detail,
                ),
            },
            Err(error) => {
                let code = match error.code.as_str() {
                    "timeout" => StableCode::ToolTimeout,
                    "unavailable" => StableCode::ToolUnavailable,
                    _ => StableCode::ToolExecFailed,
                };
                StepOutcome::gated(StepStatus::Failed, code, error.message)
            }
        }
    }
}

// ============================================================================
// SECTION: Validation Helpers
// ============================================================================

/// Evidence candidate keys that indicate an inline payload blob.
const BLOB_KEYS: [&str; 3] = ["bytes", "body", "content"];

/// Checks step arguments against the per-tool allowlist.
fn invalid_args(step: &ToolStep, allowlist: &ToolAllowlist) -> Option<String> {
    let allowed = allowlist.allowed_args(&step.tool)?;
    for (key, value) in &step.args {
        if !allowed.contains(key) {
            return Some(format!("argument {key} is not allowed for tool {}", step.tool));
        }
        if !is_scalar(value) {
            return Some(format!("argument {key} is not a scalar"));
        }
    }
    None
}

/// Returns true for JSON scalars.
const fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))
}

/// Validates evidence candidates, converting them into attachable items.
///
/// A candidate carrying any blob-ish field invalidates the whole step; the
/// attach path must not run.
fn validate_candidates(candidates: &[EvidenceCandidate]) -> Result<Vec<EvidenceItem>, String> {
    for candidate in candidates {
        for key in BLOB_KEYS {
            if candidate.extra.contains_key(key) {
                return Err(format!("evidence candidate carries blob field {key}"));
            }
        }
    }
    Ok(candidates
        .iter()
        .map(|candidate| EvidenceItem {
            kind: candidate.kind.clone(),
            reference: candidate.reference.clone(),
            summary: candidate.summary.clone(),
        })
        .collect())
}

/// Builds a short, blob-free summary of a gateway result.
fn summarize(result: &Value) -> String {
    match result {
        Value::Null => "null".to_string(),
        Value::Bool(value) => value.to_string(),
        Value::Number(value) => value.to_string(),
        Value::String(value) => {
            let mut summary: String = value.chars().take(80).collect();
            if value.chars().count() > 80 {
                summary.push('…');
            }
            summary
        }
        Value::Array(items) => format!("array with {} items", items.len()),
        Value::Object(map) => format!("object with {} fields", map.len()),
    }
}

/// Builds a run-scoped attempt event.
const fn run_event(event_type: AttemptEventType, at: Timestamp) -> AttemptEvent {
    AttemptEvent {
        event_type,
        at,
        step_index: None,
        status: None,
        code: None,
    }
}

/// Builds a step-scoped attempt event.
fn step_event(
    event_type: AttemptEventType,
    at: Timestamp,
    step_index: usize,
    end: Option<(StepStatus, Option<StableCode>)>,
) -> AttemptEvent {
    let (status, code) = end.map_or((None, None), |(status, code)| (Some(status), code));
    AttemptEvent {
        event_type,
        at,
        step_index: Some(step_index),
        status,
        code,
    }
}
