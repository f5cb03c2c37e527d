// crates/conveyor-core/src/runtime/mod.rs
// ============================================================================
// Module: Conveyor Runtime
// Description: Stores, gates, schedulers, runners, and pipelines.
// Purpose: Group the behavioral components over the core model.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! Runtime components are process-lifecycle services constructed once at
//! startup and passed explicitly; none of them keeps ambient module state.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod cutover;
pub mod derivation;
pub mod evidence;
pub mod lease;
pub mod pipeline;
pub mod probes;
pub mod readiness;
pub mod runner;
pub mod schema_gate;
pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditEvent;
pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::StderrAuditSink;
pub use cutover::CutoverCounterRow;
pub use cutover::CutoverEventType;
pub use cutover::CutoverMetrics;
pub use cutover::CutoverMetricsSnapshot;
pub use cutover::CutoverMode;
pub use cutover::CutoverPolicy;
pub use cutover::StrictGateDecision;
pub use cutover::StrictGateReason;
pub use cutover::can_enable_strict;
pub use cutover::read_derived;
pub use derivation::DerivationConfig;
pub use derivation::DerivationEngine;
pub use derivation::DerivationOutcome;
pub use derivation::DerivationSkip;
pub use evidence::DEP_SNAPSHOT_FILE;
pub use evidence::EVIDENCE_MANIFEST_FILE;
pub use evidence::EvidenceBundle;
pub use evidence::EvidenceError;
pub use evidence::EvidenceManifest;
pub use evidence::EvidenceWriter;
pub use evidence::MANIFEST_SELF_HASH_FILE;
pub use evidence::ManifestArtifact;
pub use evidence::ManifestCheck;
pub use evidence::ManifestSelfHash;
pub use evidence::READINESS_DEBUG_FILE;
pub use evidence::RUN_REPORT_FILE;
pub use evidence::SYSTEM_REJECTION_CHECK;
pub use evidence::TOOL_DEBUG_FILE;
pub use lease::LeaseRequest;
pub use lease::LeaseScheduler;
pub use lease::LeaseStrategy;
pub use pipeline::FillError;
pub use pipeline::FillPipeline;
pub use pipeline::FillRequest;
pub use pipeline::FillResponse;
pub use probes::EVIDENCE_MAX_ITEMS_PER_REPORT;
pub use probes::ProbeEvidence;
pub use probes::ProbeReport;
pub use probes::ProbeResult;
pub use probes::ProbeRunner;
pub use readiness::DepState;
pub use readiness::READINESS_SNAPSHOT_PREFIX;
pub use readiness::ReadinessError;
pub use readiness::ReadinessRegistry;
pub use readiness::ReadinessRow;
pub use readiness::ReadinessSnapshot;
pub use runner::DEFAULT_MAX_STEPS;
pub use runner::DEFAULT_MAX_WALL_MS;
pub use runner::RunBudget;
pub use runner::RunnerCore;
pub use runner::ToolAllowlist;
pub use schema_gate::GateDirection;
pub use schema_gate::GateReport;
pub use schema_gate::SchemaBoundary;
pub use schema_gate::SchemaGate;
pub use schema_gate::SchemaGateCounterRow;
pub use schema_gate::SchemaGateError;
pub use schema_gate::SchemaGateMode;
pub use schema_gate::SchemaGateSnapshot;
pub use store::FileTicketLog;
pub use store::MemoryTicketLog;
pub use store::StoreError;
pub use store::TicketFilter;
pub use store::TicketStore;
