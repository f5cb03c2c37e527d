// crates/conveyor-core/src/lib.rs
// ============================================================================
// Module: Conveyor Core Library
// Description: Public API surface for the Ticket Conveyor core.
// Purpose: Expose core types, interfaces, and runtime components.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Conveyor core provides the ticket state machine, lease scheduling,
//! derivation, readiness and cutover policy, schema gating, tool-run
//! execution, and evidence emission for the orchestrator. It is
//! transport-agnostic and integrates through explicit interfaces rather than
//! embedding into host frameworks.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::Clock;
pub use interfaces::EvidenceCandidate;
pub use interfaces::GatewayError;
pub use interfaces::GatewayResponse;
pub use interfaces::ManualClock;
pub use interfaces::ProbeKind;
pub use interfaces::ProbeProvider;
pub use interfaces::ProviderFailure;
pub use interfaces::SystemClock;
pub use interfaces::TicketLogError;
pub use interfaces::TicketLogSink;
pub use interfaces::ToolCall;
pub use interfaces::ToolGateway;
pub use runtime::AuditEvent;
pub use runtime::AuditSink;
pub use runtime::CutoverMetrics;
pub use runtime::CutoverMetricsSnapshot;
pub use runtime::CutoverMode;
pub use runtime::CutoverPolicy;
pub use runtime::DerivationConfig;
pub use runtime::DerivationEngine;
pub use runtime::DerivationOutcome;
pub use runtime::DerivationSkip;
pub use runtime::EvidenceWriter;
pub use runtime::FileAuditSink;
pub use runtime::FileTicketLog;
pub use runtime::FillError;
pub use runtime::FillPipeline;
pub use runtime::FillRequest;
pub use runtime::FillResponse;
pub use runtime::LeaseRequest;
pub use runtime::LeaseScheduler;
pub use runtime::LeaseStrategy;
pub use runtime::MemoryTicketLog;
pub use runtime::NoopAuditSink;
pub use runtime::ProbeReport;
pub use runtime::ProbeRunner;
pub use runtime::ReadinessRegistry;
pub use runtime::ReadinessSnapshot;
pub use runtime::RunnerCore;
pub use runtime::SchemaGate;
pub use runtime::SchemaGateMode;
pub use runtime::StderrAuditSink;
pub use runtime::StoreError;
pub use runtime::TicketFilter;
pub use runtime::TicketStore;
pub use runtime::ToolAllowlist;
pub use runtime::can_enable_strict;
