// crates/conveyor-core/src/runtime/pipeline.rs
// ============================================================================
// Module: Conveyor Fill Pipeline
// Description: Fill orchestration across gates, store, evidence, derivation.
// Purpose: Apply the fill state machine exactly once per worker submission.
// Dependencies: crate::core, crate::interfaces, crate::runtime
// ============================================================================

//! ## Overview
//! The fill pipeline drives a worker submission through the full sequence:
//! idempotent terminal no-op, lease verification, the complete-boundary
//! schema gate, the tool-validation and readiness guards (with rejection
//! evidence), outputs projection, finalization, and inline derivation. A
//! caller that finalized must not also release the lease; release of a
//! terminal ticket is a store-level no-op.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use serde_json::json;

use crate::core::AttemptEvent;
use crate::core::AttemptEventType;
use crate::core::FillOutputs;
use crate::core::GuardRejectionDebug;
use crate::core::LeaseOwner;
use crate::core::LeaseToken;
use crate::core::MAX_ATTEMPTS_V1;
use crate::core::ModeSnapshot;
use crate::core::RETRY_POLICY_V1;
use crate::core::RUN_REPORT_VERSION;
use crate::core::RunId;
use crate::core::RunReport;
use crate::core::StableCode;
use crate::core::StepReport;
use crate::core::StepStatus;
use crate::core::Ticket;
use crate::core::TicketId;
use crate::core::TicketKind;
use crate::core::TicketOutputs;
use crate::core::TicketStatus;
use crate::core::Timestamp;
use crate::core::ToolVerdict;
use crate::core::side_effect_for_server;
use crate::interfaces::Clock;
use crate::interfaces::ToolGateway;
use crate::runtime::audit::AuditEvent;
use crate::runtime::audit::AuditSink;
use crate::runtime::cutover::CutoverMode;
use crate::runtime::derivation::DerivationEngine;
use crate::runtime::derivation::DerivationOutcome;
use crate::runtime::evidence::DEP_SNAPSHOT_FILE;
use crate::runtime::evidence::EvidenceBundle;
use crate::runtime::evidence::EvidenceError;
use crate::runtime::evidence::EvidenceWriter;
use crate::runtime::evidence::ManifestCheck;
use crate::runtime::evidence::READINESS_DEBUG_FILE;
use crate::runtime::evidence::TOOL_DEBUG_FILE;
use crate::runtime::readiness::ReadinessRegistry;
use crate::runtime::runner::RunnerCore;
use crate::runtime::schema_gate::GateDirection;
use crate::runtime::schema_gate::GateReport;
use crate::runtime::schema_gate::SchemaBoundary;
use crate::runtime::schema_gate::SchemaGate;
use crate::runtime::store::StoreError;
use crate::runtime::store::TicketStore;

// ============================================================================
// SECTION: Requests and Errors
// ============================================================================

/// Worker fill submission.
#[derive(Debug, Clone)]
pub struct FillRequest {
    /// Parsed fill payload.
    pub outputs: FillOutputs,
    /// Raw payload as received, for the ingress schema gate.
    pub raw: Value,
    /// Worker identity label.
    pub by: Option<String>,
    /// Lease owner presented by the worker.
    pub lease_owner: Option<LeaseOwner>,
    /// Lease token presented by the worker.
    pub lease_token: Option<LeaseToken>,
}

/// Fill pipeline response.
#[derive(Debug, Clone)]
pub struct FillResponse {
    /// Post-fill ticket snapshot (including derivation back-references).
    pub ticket: Ticket,
    /// Derivation outcome when derivation ran.
    pub derivation: Option<DerivationOutcome>,
    /// True when the fill was an idempotent no-op on a terminal ticket.
    pub idempotent: bool,
}

/// Fill pipeline errors mapped to the endpoint contract.
#[derive(Debug)]
pub enum FillError {
    /// Ticket does not exist.
    NotFound(TicketId),
    /// Presented lease does not match the active lease.
    LeaseOwnerMismatch(TicketId),
    /// Strict ingress schema rejection.
    SchemaRejected(GateReport),
    /// Tool-validation guard finalized the ticket as failed.
    UnknownTool {
        /// Run id of the rejection evidence bundle.
        evidence_run_id: RunId,
    },
    /// Readiness guard finalized the ticket as failed.
    ReadinessBlocked {
        /// Run id of the rejection evidence bundle.
        evidence_run_id: RunId,
        /// Missing required dependency keys.
        missing_required: Vec<String>,
    },
    /// Store-level failure.
    Store(StoreError),
}

impl From<StoreError> for FillError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => Self::NotFound(id),
            StoreError::LeaseOwnerMismatch(id) => Self::LeaseOwnerMismatch(id),
            StoreError::SchemaRejected(report) => Self::SchemaRejected(report),
            other => Self::Store(other),
        }
    }
}

// ============================================================================
// SECTION: Pipeline
// ============================================================================

/// Fill pipeline wiring gates, guards, store, evidence, and derivation.
pub struct FillPipeline {
    /// Backing ticket store.
    store: Arc<TicketStore>,
    /// Derivation engine invoked inline after finalization.
    derivation: Arc<DerivationEngine>,
    /// Schema gate for the complete boundary.
    gate: Arc<SchemaGate>,
    /// Readiness registry for the readiness guard.
    readiness: Arc<ReadinessRegistry>,
    /// Runner providing the tool allowlist and run execution.
    runner: Arc<RunnerCore>,
    /// Evidence writer for guard rejections and tool runs.
    evidence: Arc<EvidenceWriter>,
    /// Audit sink.
    audit: Arc<dyn AuditSink>,
    /// Injected time source.
    clock: Arc<dyn Clock>,
    /// Whether the tool-validation guard is active.
    tool_validation_gate: bool,
    /// Whether the readiness guard is active.
    readiness_gate: bool,
    /// Whether the process runs without MCP providers.
    no_mcp: bool,
    /// Active cutover mode supplier for mode snapshots.
    cutover_mode: CutoverMode,
}

impl FillPipeline {
    /// Creates a fill pipeline.
    #[allow(clippy::too_many_arguments, reason = "Startup wiring is explicit by design.")]
    #[must_use]
    pub fn new(
        store: Arc<TicketStore>,
        derivation: Arc<DerivationEngine>,
        gate: Arc<SchemaGate>,
        readiness: Arc<ReadinessRegistry>,
        runner: Arc<RunnerCore>,
        evidence: Arc<EvidenceWriter>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
        tool_validation_gate: bool,
        readiness_gate: bool,
        no_mcp: bool,
        cutover_mode: CutoverMode,
    ) -> Self {
        Self {
            store,
            derivation,
            gate,
            readiness,
            runner,
            evidence,
            audit,
            clock,
            tool_validation_gate,
            readiness_gate,
            no_mcp,
            cutover_mode,
        }
    }

    /// Builds the operating-mode snapshot recorded into run reports.
    #[must_use]
    pub fn mode_snapshot(&self) -> ModeSnapshot {
        ModeSnapshot {
            no_mcp: self.no_mcp,
            cutover_mode: self.cutover_mode.as_str().to_string(),
            schema_gate_mode: self.gate.mode().as_str().to_string(),
        }
    }

    /// Applies a worker fill to a ticket.
    ///
    /// # Errors
    ///
    /// Returns [`FillError`] per the endpoint contract: lease mismatches and
    /// guard finalizations map to 409, strict schema rejections to 400.
    pub fn fill(&self, id: &TicketId, request: &FillRequest) -> Result<FillResponse, FillError> {
        let ticket = self.store.get(id).ok_or_else(|| FillError::NotFound(id.clone()))?;

        // Terminal tickets absorb repeated fills without mutation.
        if ticket.is_terminal() {
            return Ok(FillResponse {
                ticket,
                derivation: None,
                idempotent: true,
            });
        }

        let (Some(owner), Some(token)) = (&request.lease_owner, &request.lease_token) else {
            return Err(FillError::LeaseOwnerMismatch(id.clone()));
        };
        if !ticket.lease_matches(owner, token) {
            return Err(FillError::LeaseOwnerMismatch(id.clone()));
        }

        let now = self.clock.now();
        let report =
            self.gate.check(SchemaBoundary::TicketComplete, GateDirection::Ingress, &request.raw, now);
        if !report.ok {
            return Err(FillError::SchemaRejected(report));
        }

        if ticket.kind == TicketKind::Tool {
            if self.tool_validation_gate
                && let Some(offender) = self.first_unknown_tool(&ticket)
            {
                let run_id = self.emit_unknown_tool_evidence(&ticket, &offender);
                let mut annotations = self.fill_annotations(request)?;
                annotations.insert(
                    "error_code".to_string(),
                    Value::String(StableCode::UnknownToolTicket.as_str().to_string()),
                );
                annotations
                    .insert("evidence_run_id".to_string(), Value::String(run_id.as_str().into()));
                self.store.finalize(
                    id,
                    TicketStatus::Failed,
                    TicketOutputs::default(),
                    annotations,
                )?;
                return Err(FillError::UnknownTool {
                    evidence_run_id: run_id,
                });
            }
            if self.readiness_gate
                && let Err(missing) = self.check_tool_readiness(&ticket)
            {
                let run_id = self.emit_readiness_evidence(&ticket, &missing);
                let mut annotations = self.fill_annotations(request)?;
                annotations.insert(
                    "error_code".to_string(),
                    Value::String(StableCode::ReadinessBlocked.as_str().to_string()),
                );
                annotations
                    .insert("evidence_run_id".to_string(), Value::String(run_id.as_str().into()));
                self.store.finalize(
                    id,
                    TicketStatus::Failed,
                    TicketOutputs::default(),
                    annotations,
                )?;
                return Err(FillError::ReadinessBlocked {
                    evidence_run_id: run_id,
                    missing_required: missing,
                });
            }
        }

        let projection = project_outputs(&ticket, &request.outputs);
        let annotations = self.fill_annotations(request)?;
        let finalized = self.store.finalize(id, TicketStatus::Done, projection, annotations)?;
        let derivation = self.derivation.derive_from(&finalized);

        // Re-read so the response reflects any back-reference just written.
        let ticket = self.store.get(id).unwrap_or(finalized);
        Ok(FillResponse {
            ticket,
            derivation: Some(derivation),
            idempotent: false,
        })
    }

    /// Nacks a leased ticket back to pending.
    ///
    /// # Errors
    ///
    /// Returns [`FillError::LeaseOwnerMismatch`] when the lease is stale.
    pub fn nack(
        &self,
        id: &TicketId,
        owner: &LeaseOwner,
        token: &LeaseToken,
    ) -> Result<Ticket, FillError> {
        Ok(self.store.nack(id, owner, token)?)
    }

    /// Fails a ticket with a stable reason code.
    ///
    /// # Errors
    ///
    /// Returns [`FillError::Store`] when finalization fails.
    pub fn fail(&self, id: &TicketId, reason: StableCode) -> Result<Ticket, FillError> {
        let annotations = [(
            "error_code".to_string(),
            Value::String(reason.as_str().to_string()),
        )]
        .into_iter()
        .collect();
        Ok(self.store.finalize(id, TicketStatus::Failed, TicketOutputs::default(), annotations)?)
    }

    /// Executes a leased TOOL ticket's steps and writes run evidence.
    ///
    /// # Errors
    ///
    /// Returns [`EvidenceError`] when the evidence bundle cannot be written.
    pub fn execute_tool_run(
        &self,
        ticket: &Ticket,
        gateway: &dyn ToolGateway,
    ) -> Result<(RunReport, EvidenceBundle), EvidenceError> {
        let report = self.runner.execute(
            &ticket.id,
            &ticket.metadata.tool_input.tool_steps,
            ticket.metadata.tool_input.budget.as_ref(),
            gateway,
            Some(self.mode_snapshot()),
        );
        let bundle = self.evidence.write_run(&report, &[], Vec::new(), self.clock.now())?;
        Ok((report, bundle))
    }

    /// Finds the first tool step outside the allowlist.
    fn first_unknown_tool(&self, ticket: &Ticket) -> Option<String> {
        ticket
            .metadata
            .tool_input
            .tool_steps
            .iter()
            .find(|step| !self.runner.allowlist().contains(&step.tool))
            .map(|step| step.tool.clone())
    }

    /// Checks readiness for every tool step; returns missing keys on failure.
    fn check_tool_readiness(&self, ticket: &Ticket) -> Result<(), Vec<String>> {
        let mut deps = std::collections::BTreeSet::new();
        for step in &ticket.metadata.tool_input.tool_steps {
            deps.extend(self.readiness.deps_for_tool(&step.tool));
        }
        let deps: Vec<_> = deps.into_iter().collect();
        match self.readiness.require_deps(&deps) {
            Ok(()) => Ok(()),
            Err(crate::runtime::readiness::ReadinessError::RequiredUnavailable {
                missing_required,
            }) => Err(missing_required),
        }
    }

    /// Serializes the fill payload into `final_outputs` annotations.
    fn fill_annotations(
        &self,
        request: &FillRequest,
    ) -> Result<BTreeMap<String, Value>, FillError> {
        let mut annotations = request
            .outputs
            .to_raw_map()
            .map_err(|err| FillError::Store(StoreError::Serialization(err.to_string())))?;
        if let Some(by) = &request.by {
            annotations.insert("filled_by".to_string(), Value::String(by.clone()));
        }
        Ok(annotations)
    }

    /// Writes guard-rejection evidence for an unknown tool.
    fn emit_unknown_tool_evidence(&self, ticket: &Ticket, tool: &str) -> RunId {
        let now = self.clock.now();
        let report = self.rejection_report(
            ticket,
            StableCode::UnknownTool,
            format!("tool {tool} is not in the allowlist"),
            now,
        );
        let debug = GuardRejectionDebug {
            reason_code: StableCode::UnknownToolTicket,
            ticket_id: ticket.id.clone(),
            tool_name: Some(tool.to_string()),
            missing_required: Vec::new(),
            detail: Value::Null,
        };
        let run_id = report.run_id.clone();
        let debug_value = serde_json::to_value(&debug).unwrap_or(Value::Null);
        let checks = vec![ManifestCheck::system_rejection(
            vec![StableCode::UnknownToolTicket],
            TOOL_DEBUG_FILE,
        )];
        if let Err(err) = self.evidence.write_run(
            &report,
            &[(TOOL_DEBUG_FILE.to_string(), debug_value)],
            checks,
            now,
        ) {
            self.audit_evidence_failure(&run_id, &err, now);
        }
        run_id
    }

    /// Writes guard-rejection evidence for missing readiness.
    fn emit_readiness_evidence(&self, ticket: &Ticket, missing: &[String]) -> RunId {
        let now = self.clock.now();
        let report = self.rejection_report(
            ticket,
            StableCode::McpRequiredUnavailable,
            format!("missing required dependencies: {}", missing.join(", ")),
            now,
        );
        let debug = GuardRejectionDebug {
            reason_code: StableCode::ReadinessBlocked,
            ticket_id: ticket.id.clone(),
            tool_name: None,
            missing_required: missing.to_vec(),
            detail: Value::Null,
        };
        let run_id = report.run_id.clone();
        let debug_value = serde_json::to_value(&debug).unwrap_or(Value::Null);
        let snapshot_value =
            serde_json::to_value(self.readiness.snapshot(now)).unwrap_or(Value::Null);
        let checks = vec![ManifestCheck::system_rejection(
            vec![StableCode::ReadinessBlocked],
            READINESS_DEBUG_FILE,
        )];
        if let Err(err) = self.evidence.write_run(
            &report,
            &[
                (READINESS_DEBUG_FILE.to_string(), debug_value),
                (DEP_SNAPSHOT_FILE.to_string(), snapshot_value),
            ],
            checks,
            now,
        ) {
            self.audit_evidence_failure(&run_id, &err, now);
        }
        run_id
    }

    /// Builds the synthetic run report recorded for a guard rejection.
    ///
    /// Every step is reported blocked with the guard's step-level code so the
    /// worst-of invariant holds over the rejection report as well.
    fn rejection_report(
        &self,
        ticket: &Ticket,
        step_code: StableCode,
        summary: String,
        now: Timestamp,
    ) -> RunReport {
        let steps = &ticket.metadata.tool_input.tool_steps;
        let mut attempt_events = vec![AttemptEvent {
            event_type: AttemptEventType::RunStart,
            at: now,
            step_index: None,
            status: None,
            code: None,
        }];
        let mut step_reports = Vec::with_capacity(steps.len());
        for (step_index, step) in steps.iter().enumerate() {
            attempt_events.push(AttemptEvent {
                event_type: AttemptEventType::StepStart,
                at: now,
                step_index: Some(step_index),
                status: None,
                code: None,
            });
            attempt_events.push(AttemptEvent {
                event_type: AttemptEventType::StepEnd,
                at: now,
                step_index: Some(step_index),
                status: Some(StepStatus::Blocked),
                code: Some(step_code),
            });
            step_reports.push(StepReport {
                step_index,
                tool_name: step.tool.clone(),
                side_effect: side_effect_for_server(&step.server),
                status: StepStatus::Blocked,
                code: Some(step_code),
                started_at: now,
                ended_at: now,
                duration_ms: 0,
                result_summary: summary.clone(),
                evidence_items: Vec::new(),
            });
        }
        attempt_events.push(AttemptEvent {
            event_type: AttemptEventType::RunEnd,
            at: now,
            step_index: None,
            status: None,
            code: None,
        });
        let (terminal_status, primary_failure_code) = RunReport::aggregate(&step_reports);
        RunReport {
            version: RUN_REPORT_VERSION.to_string(),
            run_id: RunId::generate(),
            as_of: now.to_rfc3339(),
            ticket_id: ticket.id.clone(),
            retry_policy_id: RETRY_POLICY_V1.to_string(),
            max_attempts: MAX_ATTEMPTS_V1,
            terminal_status,
            primary_failure_code,
            started_at: now,
            ended_at: now,
            duration_ms: 0,
            step_reports,
            attempt_events,
            mode_snapshot: Some(self.mode_snapshot()),
        }
    }

    /// Audits an evidence-write failure without failing the guard path.
    fn audit_evidence_failure(&self, run_id: &RunId, err: &EvidenceError, now: Timestamp) {
        self.audit.record(&AuditEvent::new(
            "guard_rejection",
            now,
            format!("[evidence] write failed run={run_id}"),
            json!({ "run_id": run_id.as_str(), "error": err.to_string() }),
        ));
    }
}

// ============================================================================
// SECTION: Projection
// ============================================================================

/// Projects a fill payload onto the canonical outputs for the ticket kind.
///
/// TOOL verdict precedence: the fill payload's `tool_verdict` wins over
/// `metadata.final_outputs.tool_verdict`; when both are absent the store
/// stamps `UNKNOWN` at finalization. The legacy location is never read.
fn project_outputs(ticket: &Ticket, outputs: &FillOutputs) -> TicketOutputs {
    let mut projection = TicketOutputs {
        reply_strategy: outputs.reply_strategy.clone(),
        target_prompt_id: outputs.target_prompt_id.clone(),
        ..TicketOutputs::default()
    };
    match ticket.kind {
        TicketKind::Triage => {
            projection.decision = outputs.decision;
        }
        TicketKind::Tool => {
            projection.tool_verdict = outputs.tool_verdict.or_else(|| {
                ticket.metadata.final_outputs.get("tool_verdict").and_then(ToolVerdict::from_value)
            });
        }
        TicketKind::Reply => {
            projection.reply_text.clone_from(&outputs.reply_text);
        }
    }
    projection
}
