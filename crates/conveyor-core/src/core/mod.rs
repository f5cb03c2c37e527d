// crates/conveyor-core/src/core/mod.rs
// ============================================================================
// Module: Conveyor Core Model
// Description: Canonical domain model for tickets, events, and run reports.
// Purpose: Group the pure data types shared by runtime components.
// Dependencies: serde, serde_json, sha2, time, uuid
// ============================================================================

//! ## Overview
//! The core model is backend-free: plain serializable types with stable wire
//! forms, plus hashing helpers. Runtime behavior (stores, gates, runners)
//! lives under [`crate::runtime`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod codes;
pub mod event;
pub mod hashing;
pub mod identifiers;
pub mod report;
pub mod ticket;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use codes::DepCode;
pub use codes::RETRYABLE_CODES;
pub use codes::StableCode;
pub use codes::WarnCode;
pub use event::Engagement;
pub use event::EventFeatures;
pub use event::IngressEvent;
pub use hashing::sha256_hex;
pub use identifiers::CandidateId;
pub use identifiers::DepKey;
pub use identifiers::FlowId;
pub use identifiers::LeaseOwner;
pub use identifiers::LeaseToken;
pub use identifiers::PromptId;
pub use identifiers::RunId;
pub use identifiers::TicketId;
pub use report::AttemptEvent;
pub use report::AttemptEventType;
pub use report::EvidenceItem;
pub use report::GuardRejectionDebug;
pub use report::MAX_ATTEMPTS_V1;
pub use report::ModeSnapshot;
pub use report::RETRY_POLICY_V1;
pub use report::RUN_REPORT_VERSION;
pub use report::RunReport;
pub use report::SideEffect;
pub use report::StepReport;
pub use report::StepStatus;
pub use report::side_effect_for_server;
pub use ticket::DerivedRefs;
pub use ticket::FLOW_REPLY;
pub use ticket::FLOW_TOOL_EXECUTION;
pub use ticket::FLOW_TRIAGE;
pub use ticket::FillOutputs;
pub use ticket::PROMPT_REPLY_STANDARD;
pub use ticket::ReplyInput;
pub use ticket::TRACE_LEASE_EXPIRED;
pub use ticket::Ticket;
pub use ticket::TicketKind;
pub use ticket::TicketMetadata;
pub use ticket::TicketOutputs;
pub use ticket::TicketStatus;
pub use ticket::TicketTraceEvent;
pub use ticket::ToolInput;
pub use ticket::ToolStep;
pub use ticket::ToolVerdict;
pub use ticket::TriageDecision;
pub use ticket::truncate_chars;
pub use time::Timestamp;
