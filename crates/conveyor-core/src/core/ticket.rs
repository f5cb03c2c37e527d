// crates/conveyor-core/src/core/ticket.rs
// ============================================================================
// Module: Conveyor Ticket Model
// Description: Canonical ticket record, statuses, verdicts, and metadata.
// Purpose: Provide the central domain entity shared by store and pipeline.
// Dependencies: crate::core::{event, identifiers, time}, serde, serde_json
// ============================================================================

//! ## Overview
//! A ticket is a persistent unit of work with a state machine. Readers accept
//! legacy status spellings and the legacy `metadata.derived` mirror; writers
//! emit canonical fields only. The canonical location for derivation
//! back-references is the root-level `derived` object, and the canonical
//! location for tool verdicts is `outputs.tool_verdict`, written exclusively
//! by the ticket store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde_json::Value;

use crate::core::event::IngressEvent;
use crate::core::identifiers::CandidateId;
use crate::core::identifiers::FlowId;
use crate::core::identifiers::LeaseOwner;
use crate::core::identifiers::LeaseToken;
use crate::core::identifiers::PromptId;
use crate::core::identifiers::TicketId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Flow identifier for the triage pipeline.
pub const FLOW_TRIAGE: &str = "triage_v1";
/// Flow identifier for the tool-execution pipeline.
pub const FLOW_TOOL_EXECUTION: &str = "tool_execution_v1";
/// Flow identifier for the reply pipeline (opaque; not a language dimension).
pub const FLOW_REPLY: &str = "reply_zh_hant_v1";
/// Default prompt identifier for reply tickets.
pub const PROMPT_REPLY_STANDARD: &str = "reply.standard";
/// Trace event label recorded when a lease expires and is reclaimed.
pub const TRACE_LEASE_EXPIRED: &str = "LEASE_EXPIRED";

// ============================================================================
// SECTION: Kind and Status
// ============================================================================

/// Role of a ticket in the pipeline.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TicketKind {
    /// Triage stage: decide whether an event is worth acting on.
    #[serde(rename = "TRIAGE")]
    Triage,
    /// Tool stage: gather context through tool execution.
    #[serde(rename = "TOOL")]
    Tool,
    /// Reply stage: produce the final reply text.
    #[serde(rename = "REPLY")]
    Reply,
}

impl TicketKind {
    /// Returns the stable string form of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Triage => "TRIAGE",
            Self::Tool => "TOOL",
            Self::Reply => "REPLY",
        }
    }

    /// Parses a kind from its wire form.
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "TRIAGE" => Some(Self::Triage),
            "TOOL" => Some(Self::Tool),
            "REPLY" => Some(Self::Reply),
            _ => None,
        }
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket status in the canonical state machine.
///
/// Writers always emit canonical spellings. Readers additionally accept the
/// legacy spellings `completed`, `leased`, `drafted`, `approved`, and
/// `in_progress`, projecting them onto canonical variants.
///
/// # Invariants
/// - `pending → running → {done, failed, blocked}`; terminal states are
///   immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Waiting to be leased.
    Pending,
    /// Leased by a worker.
    Running,
    /// Finished successfully.
    Done,
    /// Finished unsuccessfully.
    Failed,
    /// Finished blocked on an unavailable dependency.
    Blocked,
}

impl TicketStatus {
    /// Canonical and legacy spellings accepted by readers.
    const ACCEPTED: &'static [&'static str] = &[
        "pending",
        "running",
        "done",
        "failed",
        "blocked",
        "completed",
        "leased",
        "drafted",
        "approved",
        "in_progress",
    ];

    /// Returns the canonical string form of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    /// Parses a status from canonical or legacy wire forms.
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "pending" | "drafted" => Some(Self::Pending),
            "running" | "leased" | "in_progress" => Some(Self::Running),
            "done" | "completed" | "approved" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Returns true when the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Blocked)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TicketStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::from_wire(&raw)
            .ok_or_else(|| serde::de::Error::unknown_variant(&raw, Self::ACCEPTED))
    }
}

// ============================================================================
// SECTION: Decisions and Verdicts
// ============================================================================

/// Triage decision recorded when a TRIAGE ticket is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriageDecision {
    /// Event approved for downstream work.
    #[serde(rename = "APPROVE")]
    Approve,
    /// Event rejected; the pipeline stops here.
    #[serde(rename = "REJECT")]
    Reject,
}

impl TriageDecision {
    /// Returns the stable string form of the decision.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "APPROVE",
            Self::Reject => "REJECT",
        }
    }
}

/// Canonical tool verdict recorded when a TOOL ticket reaches a terminal
/// status.
///
/// # Invariants
/// - Written only by the ticket store.
/// - Present iff the ticket kind is TOOL and the status is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolVerdict {
    /// Tool run succeeded; proceed to reply.
    #[serde(rename = "PROCEED")]
    Proceed,
    /// Tool run suggests deferring the reply.
    #[serde(rename = "DEFER")]
    Defer,
    /// Tool run blocks the reply.
    #[serde(rename = "BLOCK")]
    Block,
    /// Tool run was skipped.
    #[serde(rename = "SKIP")]
    Skip,
    /// No verdict was supplied by the worker.
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl ToolVerdict {
    /// Returns the stable string form of the verdict.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proceed => "PROCEED",
            Self::Defer => "DEFER",
            Self::Block => "BLOCK",
            Self::Skip => "SKIP",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parses a verdict from a JSON value when it carries a known spelling.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value.as_str() {
            Some("PROCEED") => Some(Self::Proceed),
            Some("DEFER") => Some(Self::Defer),
            Some("BLOCK") => Some(Self::Block),
            Some("SKIP") => Some(Self::Skip),
            Some("UNKNOWN") => Some(Self::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for ToolVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Tool Input
// ============================================================================

/// A single tool invocation request inside a TOOL ticket.
///
/// # Invariants
/// - `tool` is non-empty after runner validation.
/// - `args` values are scalars; the runner rejects nested structures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolStep {
    /// Tool server the step targets (for example `memory`).
    pub server: String,
    /// Tool name within the server.
    pub tool: String,
    /// Scalar arguments for the call.
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

/// Tool input bag seeded by derivation and consumed by the runner.
///
/// `tool_steps` is the source of truth for the step list; no sibling field
/// mirrors it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ToolInput {
    /// Ordered tool steps to execute.
    #[serde(default)]
    pub tool_steps: Vec<ToolStep>,
    /// Raw run budget; validated by the runner against the known key set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Value>,
}

impl ToolInput {
    /// Returns true when the input carries neither steps nor a budget.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tool_steps.is_empty() && self.budget.is_none()
    }
}

/// Reply input bag seeded by derivation for REPLY tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReplyInput {
    /// Reply strategy chosen at tool-fill time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    /// Context notes gathered for the reply driver.
    #[serde(default)]
    pub context_notes: String,
}

impl ReplyInput {
    /// Returns true when the input is entirely defaulted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategy.is_none() && self.context_notes.is_empty()
    }
}

// ============================================================================
// SECTION: Derived Back-References
// ============================================================================

/// Derivation back-references from a parent ticket to its children.
///
/// # Invariants
/// - Each field is set at most once per ticket (derivation idempotency).
/// - The canonical location is the ticket root; the `metadata.derived`
///   mirror is legacy and read-only pre-cutover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DerivedRefs {
    /// Identifier of the TOOL ticket derived from this TRIAGE ticket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_ticket_id: Option<TicketId>,
    /// Identifier of the REPLY ticket derived from this TOOL ticket.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_ticket_id: Option<TicketId>,
}

impl DerivedRefs {
    /// Returns true when no back-reference has been written.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.tool_ticket_id.is_none() && self.reply_ticket_id.is_none()
    }
}

// ============================================================================
// SECTION: Metadata
// ============================================================================

/// Structured metadata bag attached to every ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketMetadata {
    /// Creation timestamp.
    pub created_at: Timestamp,
    /// Last mutation timestamp.
    pub updated_at: Timestamp,
    /// Kind mirror for log consumers that only read metadata.
    pub kind: TicketKind,
    /// Candidate identifier carried from triage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<CandidateId>,
    /// Parent ticket in the pipeline, absent on roots and legacy replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ticket_id: Option<TicketId>,
    /// Original TRIAGE ancestor for TOOL and REPLY tickets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_reference_id: Option<TicketId>,
    /// Prompt family for REPLY tickets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<PromptId>,
    /// Tool input seeded by derivation (TOOL tickets).
    #[serde(default, skip_serializing_if = "ToolInput::is_empty")]
    pub tool_input: ToolInput,
    /// Reply input seeded by derivation (REPLY tickets).
    #[serde(default, skip_serializing_if = "ReplyInput::is_empty")]
    pub reply_input: ReplyInput,
    /// Raw worker fill payload preserved for audit.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub final_outputs: BTreeMap<String, Value>,
    /// Lease owner; present iff status is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_owner: Option<LeaseOwner>,
    /// Lease token; present iff status is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_token: Option<LeaseToken>,
    /// Lease expiry; present iff status is running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires: Option<Timestamp>,
    /// Set when the ticket was adopted through orphan recovery.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub recovered: bool,
    /// Legacy derived mirror; read-only pre-cutover, never written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<DerivedRefs>,
}

impl TicketMetadata {
    /// Creates metadata for a freshly created ticket.
    #[must_use]
    pub fn new(kind: TicketKind, now: Timestamp) -> Self {
        Self {
            created_at: now,
            updated_at: now,
            kind,
            candidate_id: None,
            parent_ticket_id: None,
            triage_reference_id: None,
            prompt_id: None,
            tool_input: ToolInput::default(),
            reply_input: ReplyInput::default(),
            final_outputs: BTreeMap::new(),
            lease_owner: None,
            lease_token: None,
            lease_expires: None,
            recovered: false,
            derived: None,
        }
    }
}

// ============================================================================
// SECTION: Outputs
// ============================================================================

/// Canonical outputs projection written only by the ticket store.
///
/// The fields are optional because the projection is kind-dependent; store
/// setters enforce the kind/terminal invariants at the API boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TicketOutputs {
    /// Triage decision (TRIAGE tickets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<TriageDecision>,
    /// Canonical tool verdict (TOOL tickets, terminal only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_verdict: Option<ToolVerdict>,
    /// Final reply text (REPLY tickets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_text: Option<String>,
    /// Reply strategy chosen by the tool stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_strategy: Option<String>,
    /// Prompt the reply stage should use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_prompt_id: Option<PromptId>,
}

impl TicketOutputs {
    /// Returns true when no projection has been written.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.decision.is_none()
            && self.tool_verdict.is_none()
            && self.reply_text.is_none()
            && self.reply_strategy.is_none()
            && self.target_prompt_id.is_none()
    }
}

/// Worker fill payload submitted through the fill endpoint.
///
/// Unknown keys are preserved in `extra` so the raw payload can be recorded
/// into `metadata.final_outputs` for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FillOutputs {
    /// Triage decision (TRIAGE fills).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<TriageDecision>,
    /// Tool verdict (TOOL fills).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_verdict: Option<ToolVerdict>,
    /// Reply text (REPLY fills).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_text: Option<String>,
    /// Reply strategy selected by the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_strategy: Option<String>,
    /// Target prompt for the derived reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_prompt_id: Option<PromptId>,
    /// Context notes fetched during the tool stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_notes: Option<String>,
    /// Remaining payload fields preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl FillOutputs {
    /// Returns the payload as a raw map for `metadata.final_outputs`.
    ///
    /// # Errors
    ///
    /// Returns a serialization error when the payload cannot round-trip
    /// through JSON, which only happens for non-string map keys.
    pub fn to_raw_map(&self) -> Result<BTreeMap<String, Value>, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        match value {
            Value::Object(map) => Ok(map.into_iter().collect()),
            _ => Ok(BTreeMap::new()),
        }
    }
}

// ============================================================================
// SECTION: Ticket
// ============================================================================

/// Trace event appended to a ticket's append-only trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTraceEvent {
    /// Stable event label (for example `LEASE_EXPIRED`).
    pub event: String,
    /// Event timestamp.
    pub at: Timestamp,
}

/// A persistent unit of work with a state machine.
///
/// # Invariants
/// - `id == ticket_id` (the second field is a legacy mirror).
/// - Lease fields are present iff `status == running`.
/// - Terminal tickets are never mutated again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket identifier.
    pub id: TicketId,
    /// Legacy identifier mirror; always equals `id`.
    pub ticket_id: TicketId,
    /// Pipeline role.
    pub kind: TicketKind,
    /// Current state-machine status.
    pub status: TicketStatus,
    /// Pipeline flow identifier.
    pub flow_id: FlowId,
    /// Originating event payload.
    pub event: IngressEvent,
    /// Structured metadata bag.
    pub metadata: TicketMetadata,
    /// Canonical derivation back-references.
    #[serde(default, skip_serializing_if = "DerivedRefs::is_empty")]
    pub derived: DerivedRefs,
    /// Canonical outputs projection.
    #[serde(default, skip_serializing_if = "TicketOutputs::is_empty")]
    pub outputs: TicketOutputs,
    /// Count of nacks observed for this ticket.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempts: u32,
    /// Append-only trace of lifecycle events.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TicketTraceEvent>,
}

/// Serde helper: skip zero attempt counters.
#[allow(clippy::trivially_copy_pass_by_ref, reason = "serde skip_serializing_if signature")]
const fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl Ticket {
    /// Creates a pending ticket of the given kind.
    #[must_use]
    pub fn new(kind: TicketKind, flow_id: FlowId, event: IngressEvent, now: Timestamp) -> Self {
        let id = TicketId::generate();
        Self {
            ticket_id: id.clone(),
            id,
            kind,
            status: TicketStatus::Pending,
            flow_id,
            event,
            metadata: TicketMetadata::new(kind, now),
            derived: DerivedRefs::default(),
            outputs: TicketOutputs::default(),
            attempts: 0,
            trace: Vec::new(),
        }
    }

    /// Returns true when the ticket is in a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Returns true when all lease fields are populated.
    #[must_use]
    pub const fn has_lease(&self) -> bool {
        self.metadata.lease_owner.is_some()
            && self.metadata.lease_token.is_some()
            && self.metadata.lease_expires.is_some()
    }

    /// Returns true when the provided owner and token match the active lease.
    #[must_use]
    pub fn lease_matches(&self, owner: &LeaseOwner, token: &LeaseToken) -> bool {
        self.metadata.lease_owner.as_ref() == Some(owner)
            && self.metadata.lease_token.as_ref() == Some(token)
    }

    /// Returns the canonical tool verdict when the store has written one.
    #[must_use]
    pub const fn tool_verdict(&self) -> Option<ToolVerdict> {
        self.outputs.tool_verdict
    }
}

/// Truncates content to at most `max_chars` characters on a char boundary.
#[must_use]
pub fn truncate_chars(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}
