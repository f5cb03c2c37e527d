// crates/conveyor-core/src/runtime/derivation.rs
// ============================================================================
// Module: Conveyor Derivation Engine
// Description: Deterministic, idempotent child-ticket creation.
// Purpose: Drive TRIAGE→TOOL and TOOL→REPLY derivation under gates.
// Dependencies: crate::core, crate::runtime::{audit, cutover, schema_gate,
//               store}
// ============================================================================

//! ## Overview
//! Derivation creates downstream tickets when gates pass, at most once per
//! direction per parent. Failures never mutate the parent and never escape
//! into the caller's transaction: every non-success path returns a skip
//! reason and leaves the parent byte-identical. Orphan recovery adopts an
//! existing child when the back-reference was lost. Legacy deployments with
//! tool derivation disabled spawn the reply directly from triage.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde_json::json;

use crate::core::FLOW_REPLY;
use crate::core::FLOW_TOOL_EXECUTION;
use crate::core::PROMPT_REPLY_STANDARD;
use crate::core::PromptId;
use crate::core::Ticket;
use crate::core::TicketId;
use crate::core::TicketKind;
use crate::core::ToolStep;
use crate::core::ToolVerdict;
use crate::core::TriageDecision;
use crate::core::truncate_chars;
use crate::interfaces::Clock;
use crate::runtime::audit::AuditEvent;
use crate::runtime::audit::AuditSink;
use crate::runtime::cutover::CutoverMetrics;
use crate::runtime::cutover::CutoverPolicy;
use crate::runtime::cutover::read_derived;
use crate::runtime::schema_gate::GateDirection;
use crate::runtime::schema_gate::SchemaBoundary;
use crate::runtime::schema_gate::SchemaGate;
use crate::runtime::store::TicketFilter;
use crate::runtime::store::TicketStore;

// ============================================================================
// SECTION: Configuration and Outcomes
// ============================================================================

/// Derivation feature gates from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivationConfig {
    /// Enables TRIAGE→TOOL derivation.
    pub enable_tool_derivation: bool,
    /// Enables TOOL→REPLY derivation.
    pub enable_reply_derivation: bool,
    /// Blocks REPLY creation even when other gates pass.
    pub tool_only_mode: bool,
}

/// Reason a derivation attempt produced no new child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationSkip {
    /// The ticket kind has no derivation direction.
    NotEligibleKind,
    /// The triage decision is absent or not APPROVE.
    DecisionNotApprove,
    /// TRIAGE→TOOL derivation is disabled.
    ToolDerivationDisabled,
    /// TOOL→REPLY derivation is disabled.
    ReplyDerivationDisabled,
    /// Tool-only mode blocks reply creation.
    ToolOnlyMode,
    /// The TOOL ticket has no verdict in either accepted location.
    MissingToolVerdict,
    /// The TOOL verdict is present but not PROCEED.
    GateToolVerdictNotProceed,
    /// The strict internal schema gate rejected the candidate child.
    SchemaRejected,
    /// The store refused the child insert.
    StoreRejected,
}

impl DerivationSkip {
    /// Returns the stable reason label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotEligibleKind => "not_eligible_kind",
            Self::DecisionNotApprove => "decision_not_approve",
            Self::ToolDerivationDisabled => "tool_derivation_disabled",
            Self::ReplyDerivationDisabled => "reply_derivation_disabled",
            Self::ToolOnlyMode => "tool_only_mode",
            Self::MissingToolVerdict => "missing_tool_verdict",
            Self::GateToolVerdictNotProceed => "gate_tool_verdict_not_proceed",
            Self::SchemaRejected => "schema_rejected",
            Self::StoreRejected => "store_rejected",
        }
    }
}

/// Outcome of one derivation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DerivationOutcome {
    /// A new child was created and back-referenced.
    Created {
        /// Child ticket identifier.
        child_id: TicketId,
    },
    /// The back-reference already pointed at a child; nothing changed.
    Existing {
        /// Existing child ticket identifier.
        child_id: TicketId,
    },
    /// An orphaned child was adopted and back-referenced.
    Recovered {
        /// Recovered child ticket identifier.
        child_id: TicketId,
    },
    /// No child was produced; the parent is untouched.
    Skipped {
        /// Skip reason.
        reason: DerivationSkip,
    },
}

impl DerivationOutcome {
    /// Returns the child id for success-like outcomes.
    #[must_use]
    pub const fn child_id(&self) -> Option<&TicketId> {
        match self {
            Self::Created {
                child_id,
            }
            | Self::Existing {
                child_id,
            }
            | Self::Recovered {
                child_id,
            } => Some(child_id),
            Self::Skipped {
                ..
            } => None,
        }
    }
}

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Derivation engine over the ticket store.
pub struct DerivationEngine {
    /// Backing ticket store.
    store: Arc<TicketStore>,
    /// Schema gate for the internal derive boundary.
    gate: Arc<SchemaGate>,
    /// Feature gates.
    config: DerivationConfig,
    /// Cutover policy for legacy back-reference reads.
    cutover: CutoverPolicy,
    /// Cutover metrics for legacy-access accounting.
    cutover_metrics: Arc<CutoverMetrics>,
    /// Audit sink for derivation lines.
    audit: Arc<dyn AuditSink>,
    /// Injected time source.
    clock: Arc<dyn Clock>,
}

impl DerivationEngine {
    /// Creates a derivation engine.
    #[must_use]
    pub fn new(
        store: Arc<TicketStore>,
        gate: Arc<SchemaGate>,
        config: DerivationConfig,
        cutover: CutoverPolicy,
        cutover_metrics: Arc<CutoverMetrics>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gate,
            config,
            cutover,
            cutover_metrics,
            audit,
            clock,
        }
    }

    /// Attempts derivation from a just-finalized ticket.
    #[must_use]
    pub fn derive_from(&self, parent: &Ticket) -> DerivationOutcome {
        match parent.kind {
            TicketKind::Triage => {
                if self.config.enable_tool_derivation {
                    self.derive_tool(parent)
                } else {
                    self.derive_reply_legacy(parent)
                }
            }
            TicketKind::Tool => self.derive_reply(parent),
            TicketKind::Reply => DerivationOutcome::Skipped {
                reason: DerivationSkip::NotEligibleKind,
            },
        }
    }

    /// TRIAGE→TOOL derivation.
    fn derive_tool(&self, triage: &Ticket) -> DerivationOutcome {
        if triage.outputs.decision != Some(TriageDecision::Approve) {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::DecisionNotApprove,
            };
        }
        let now = self.clock.now();
        let derived =
            read_derived(triage, &self.cutover, &self.cutover_metrics, "derive_tool", now);
        if let Some(child_id) = derived.tool_ticket_id {
            return DerivationOutcome::Existing {
                child_id,
            };
        }

        let mut child =
            Ticket::new(TicketKind::Tool, FLOW_TOOL_EXECUTION.into(), triage.event.clone(), now);
        child.metadata.parent_ticket_id = Some(triage.id.clone());
        child.metadata.candidate_id.clone_from(&triage.metadata.candidate_id);
        child.metadata.triage_reference_id = Some(
            triage.metadata.triage_reference_id.clone().unwrap_or_else(|| triage.id.clone()),
        );
        child.metadata.tool_input.tool_steps = vec![seed_tool_step(triage)];

        if !self.gate_derive(&child, now) {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::SchemaRejected,
            };
        }
        let Ok(created) = self.store.create_derived(child) else {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::StoreRejected,
            };
        };
        if self.store.set_derived_tool(&triage.id, &created.id).is_err() {
            // A concurrent derivation won; surface its child.
            let refreshed = self.store.get(&triage.id);
            if let Some(child_id) =
                refreshed.as_ref().and_then(|ticket| ticket.derived.tool_ticket_id.clone())
            {
                return DerivationOutcome::Existing {
                    child_id,
                };
            }
        }
        self.audit.record(&AuditEvent::new(
            "derive",
            now,
            format!("[derive] TRIAGE -> TOOL ticket={}", created.id),
            json!({ "parent_ticket_id": triage.id.as_str(), "child_ticket_id": created.id.as_str() }),
        ));
        DerivationOutcome::Created {
            child_id: created.id,
        }
    }

    /// TOOL→REPLY derivation.
    fn derive_reply(&self, tool: &Ticket) -> DerivationOutcome {
        if !self.config.enable_reply_derivation {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::ReplyDerivationDisabled,
            };
        }
        if self.config.tool_only_mode {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::ToolOnlyMode,
            };
        }
        let Some(verdict) = effective_verdict(tool) else {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::MissingToolVerdict,
            };
        };
        if verdict != ToolVerdict::Proceed {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::GateToolVerdictNotProceed,
            };
        }

        let now = self.clock.now();
        let derived = read_derived(tool, &self.cutover, &self.cutover_metrics, "derive_reply", now);
        if let Some(child_id) = derived.reply_ticket_id {
            return DerivationOutcome::Existing {
                child_id,
            };
        }

        // Orphan recovery: a reply may exist without a back-reference.
        let orphans = self.store.list(&TicketFilter {
            kind: Some(TicketKind::Reply),
            parent_ticket_id: Some(tool.id.clone()),
            ..TicketFilter::default()
        });
        if let Some(orphan) = orphans.first() {
            let _ = self.store.mark_recovered(&orphan.id);
            let _ = self.store.set_derived_reply(&tool.id, &orphan.id);
            self.audit.record(&AuditEvent::new(
                "derive",
                now,
                format!("[derive] TOOL -> REPLY ticket={} (recovered)", orphan.id),
                json!({
                    "parent_ticket_id": tool.id.as_str(),
                    "child_ticket_id": orphan.id.as_str(),
                    "recovered": true,
                }),
            ));
            return DerivationOutcome::Recovered {
                child_id: orphan.id.clone(),
            };
        }

        let triage_id = tool
            .metadata
            .triage_reference_id
            .clone()
            .or_else(|| tool.metadata.parent_ticket_id.clone());
        let event = triage_id
            .as_ref()
            .and_then(|id| self.store.get(id))
            .map_or_else(|| tool.event.clone(), |triage| triage.event);

        let mut child = Ticket::new(TicketKind::Reply, FLOW_REPLY.into(), event, now);
        child.metadata.parent_ticket_id = Some(tool.id.clone());
        child.metadata.triage_reference_id = triage_id;
        child.metadata.candidate_id.clone_from(&tool.metadata.candidate_id);
        child.metadata.prompt_id = Some(
            tool.outputs
                .target_prompt_id
                .clone()
                .unwrap_or_else(|| PromptId::new(PROMPT_REPLY_STANDARD)),
        );
        child.metadata.reply_input.strategy.clone_from(&tool.outputs.reply_strategy);
        child.metadata.reply_input.context_notes = fetched_context(tool);

        if !self.gate_derive(&child, now) {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::SchemaRejected,
            };
        }
        let Ok(created) = self.store.create_derived(child) else {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::StoreRejected,
            };
        };
        if self.store.set_derived_reply(&tool.id, &created.id).is_err() {
            let refreshed = self.store.get(&tool.id);
            if let Some(child_id) =
                refreshed.as_ref().and_then(|ticket| ticket.derived.reply_ticket_id.clone())
            {
                return DerivationOutcome::Existing {
                    child_id,
                };
            }
        }
        self.audit.record(&AuditEvent::new(
            "derive",
            now,
            format!("[derive] TOOL -> REPLY ticket={}", created.id),
            json!({ "parent_ticket_id": tool.id.as_str(), "child_ticket_id": created.id.as_str() }),
        ));
        DerivationOutcome::Created {
            child_id: created.id,
        }
    }

    /// Legacy direct TRIAGE→REPLY derivation (tool derivation disabled).
    ///
    /// The produced reply carries a superset of the canonical reply metadata
    /// keys, including `triage_reference_id`, but intentionally no
    /// `parent_ticket_id`; consumers requiring a parent must branch on
    /// `kind == REPLY && parent_ticket_id.is_none()`.
    fn derive_reply_legacy(&self, triage: &Ticket) -> DerivationOutcome {
        if triage.outputs.decision != Some(TriageDecision::Approve) {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::DecisionNotApprove,
            };
        }
        if !self.config.enable_reply_derivation {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::ReplyDerivationDisabled,
            };
        }
        if self.config.tool_only_mode {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::ToolOnlyMode,
            };
        }
        let now = self.clock.now();
        let derived =
            read_derived(triage, &self.cutover, &self.cutover_metrics, "derive_reply_legacy", now);
        if let Some(child_id) = derived.reply_ticket_id {
            return DerivationOutcome::Existing {
                child_id,
            };
        }

        let mut child = Ticket::new(TicketKind::Reply, FLOW_REPLY.into(), triage.event.clone(), now);
        child.metadata.triage_reference_id = Some(triage.id.clone());
        child.metadata.candidate_id.clone_from(&triage.metadata.candidate_id);
        child.metadata.prompt_id = Some(
            triage
                .outputs
                .target_prompt_id
                .clone()
                .unwrap_or_else(|| PromptId::new(PROMPT_REPLY_STANDARD)),
        );
        child.metadata.reply_input.strategy.clone_from(&triage.outputs.reply_strategy);
        child.metadata.reply_input.context_notes = fetched_context(triage);

        if !self.gate_derive(&child, now) {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::SchemaRejected,
            };
        }
        let Ok(created) = self.store.create_derived(child) else {
            return DerivationOutcome::Skipped {
                reason: DerivationSkip::StoreRejected,
            };
        };
        let _ = self.store.set_derived_reply(&triage.id, &created.id);
        self.audit.record(&AuditEvent::new(
            "derive",
            now,
            format!("[derive] TRIAGE -> REPLY ticket={} (legacy)", created.id),
            json!({ "parent_ticket_id": triage.id.as_str(), "child_ticket_id": created.id.as_str() }),
        ));
        DerivationOutcome::Created {
            child_id: created.id,
        }
    }

    /// Runs the internal derive-boundary schema gate over a candidate child.
    fn gate_derive(&self, child: &Ticket, now: crate::core::Timestamp) -> bool {
        let Ok(payload) = serde_json::to_value(child) else {
            return false;
        };
        self.gate
            .check(SchemaBoundary::TicketDerive, GateDirection::Internal, &payload, now)
            .ok
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Seeds the initial memory search step for a derived TOOL ticket.
fn seed_tool_step(triage: &Ticket) -> ToolStep {
    let content = triage.event.content.trim();
    let query = if content.is_empty() {
        let candidate = triage
            .metadata
            .candidate_id
            .as_ref()
            .map_or_else(|| triage.id.as_str().to_string(), |id| id.as_str().to_string());
        format!("triage:{candidate}")
    } else {
        truncate_chars(content, 120)
    };
    ToolStep {
        server: "memory".to_string(),
        tool: "search_nodes".to_string(),
        args: [("query".to_string(), serde_json::Value::String(query))].into_iter().collect(),
    }
}

/// Resolves the effective tool verdict with canonical-first precedence.
///
/// `outputs.tool_verdict` wins over `metadata.final_outputs.tool_verdict`;
/// the legacy location is never consulted.
fn effective_verdict(tool: &Ticket) -> Option<ToolVerdict> {
    if let Some(verdict) = tool.outputs.tool_verdict {
        return Some(verdict);
    }
    tool.metadata.final_outputs.get("tool_verdict").and_then(ToolVerdict::from_value)
}

/// Extracts fetched context notes recorded by the tool fill.
fn fetched_context(ticket: &Ticket) -> String {
    ticket
        .metadata
        .final_outputs
        .get("context_notes")
        .and_then(|value| value.as_str())
        .unwrap_or_default()
        .to_string()
}
