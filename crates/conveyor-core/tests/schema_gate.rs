// crates/conveyor-core/tests/schema_gate.rs
// ============================================================================
// Module: Schema Gate Tests
// Description: Tests for boundary validation modes and classification.
// Purpose: Validate warn/strict contracts and violation accounting.
// Dependencies: conveyor-core
// ============================================================================
//! ## Overview
//! Ensures the gate classifies violations onto the closed warn-code set,
//! always allows in warn mode, rejects with the required audit fields in
//! strict mode, and keeps counters sorted.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

use std::sync::Arc;

use conveyor_core::NoopAuditSink;
use conveyor_core::SchemaGate;
use conveyor_core::SchemaGateMode;
use conveyor_core::StableCode;
use conveyor_core::Timestamp;
use conveyor_core::WarnCode;
use conveyor_core::runtime::GateDirection;
use conveyor_core::runtime::SchemaBoundary;
use serde_json::json;

fn gate(mode: SchemaGateMode) -> SchemaGate {
    SchemaGate::new(mode, true, Arc::new(NoopAuditSink)).expect("schema gate")
}

fn now() -> Timestamp {
    Timestamp::from_unix_millis(1_000)
}

fn valid_fill_payload() -> serde_json::Value {
    json!({
        "outputs": { "decision": "APPROVE" },
        "by": "worker-a",
    })
}

/// Verifies off mode performs no validation at all.
#[test]
fn off_mode_allows_everything() {
    let gate = SchemaGate::new(SchemaGateMode::Off, true, Arc::new(NoopAuditSink)).expect("gate");
    let report = gate.check(
        SchemaBoundary::TicketComplete,
        GateDirection::Ingress,
        &json!({ "bogus": true }),
        now(),
    );
    assert!(report.ok);
    assert_eq!(report.warn_count, 0);
}

/// Verifies the master switch folds any mode to off.
#[test]
fn master_switch_disables_gate() {
    let gate =
        SchemaGate::new(SchemaGateMode::Strict, false, Arc::new(NoopAuditSink)).expect("gate");
    assert_eq!(gate.mode(), SchemaGateMode::Off);
    let report = gate.check(
        SchemaBoundary::TicketComplete,
        GateDirection::Ingress,
        &json!({ "bogus": true }),
        now(),
    );
    assert!(report.ok);
}

/// Verifies a valid payload passes cleanly in strict mode.
#[test]
fn valid_payload_passes_strict() {
    let gate = gate(SchemaGateMode::Strict);
    let report = gate.check(
        SchemaBoundary::TicketComplete,
        GateDirection::Ingress,
        &valid_fill_payload(),
        now(),
    );
    assert!(report.ok);
    assert!(report.warn_codes.is_empty());
}

/// Verifies warn mode allows violations while recording them.
#[test]
fn warn_mode_allows_with_warnings() {
    let gate = gate(SchemaGateMode::Warn);
    let report = gate.check(
        SchemaBoundary::TicketComplete,
        GateDirection::Ingress,
        &json!({ "by": "worker-a" }),
        now(),
    );
    assert!(report.ok);
    assert!(report.warn_count > 0);
    assert_eq!(report.warn_codes, vec![WarnCode::Missing]);
    assert!(report.code.is_none());
}

/// Verifies strict rejections carry the required audit fields.
#[test]
fn strict_rejection_carries_audit_fields() {
    let gate = gate(SchemaGateMode::Strict);
    let report = gate.check(
        SchemaBoundary::TicketComplete,
        GateDirection::Ingress,
        &json!({ "by": "worker-a", "surprise": 1 }),
        now(),
    );
    assert!(!report.ok);
    assert_eq!(report.code, Some(StableCode::SchemaValidationFailed));
    assert!(report.warn_count > 0);
    assert!(!report.warn_codes.is_empty());
    assert!(!report.errors.is_empty());
}

/// Verifies missing, type-mismatch, and unknown-field classification.
#[test]
fn violations_classify_onto_closed_set() {
    let gate = gate(SchemaGateMode::Warn);

    let missing = gate.check(
        SchemaBoundary::TicketComplete,
        GateDirection::Ingress,
        &json!({}),
        now(),
    );
    assert_eq!(missing.warn_codes, vec![WarnCode::Missing]);

    let mismatch = gate.check(
        SchemaBoundary::TicketComplete,
        GateDirection::Ingress,
        &json!({ "outputs": "not an object" }),
        now(),
    );
    assert_eq!(mismatch.warn_codes, vec![WarnCode::TypeMismatch]);

    let unknown = gate.check(
        SchemaBoundary::TicketComplete,
        GateDirection::Ingress,
        &json!({ "outputs": {}, "mystery": 1 }),
        now(),
    );
    assert_eq!(unknown.warn_codes, vec![WarnCode::UnknownField]);

    let invalid = gate.check(
        SchemaBoundary::TicketComplete,
        GateDirection::Ingress,
        &json!("not an object"),
        now(),
    );
    assert_eq!(invalid.warn_codes, vec![WarnCode::SchemaInvalid]);
}

/// Verifies counters accumulate per (boundary, direction, code) and the
/// snapshot is sorted by the full key.
#[test]
fn counters_snapshot_is_sorted() {
    let gate = gate(SchemaGateMode::Warn);
    let _ = gate.check(
        SchemaBoundary::TicketComplete,
        GateDirection::Internal,
        &json!({}),
        now(),
    );
    let _ = gate.check(
        SchemaBoundary::TicketComplete,
        GateDirection::Ingress,
        &json!({}),
        now(),
    );
    let _ = gate.check(
        SchemaBoundary::TicketCreate,
        GateDirection::Ingress,
        &json!({}),
        now(),
    );

    let snapshot = gate.snapshot(now());
    assert!(!snapshot.counters.is_empty());
    let keys: Vec<_> = snapshot
        .counters
        .iter()
        .map(|row| (row.boundary, row.direction, row.code))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
}

/// Verifies the derive boundary rejects a non-pending child in strict mode.
#[test]
fn derive_boundary_requires_pending_child() {
    let gate = gate(SchemaGateMode::Strict);
    let child = json!({
        "id": "c1",
        "ticket_id": "c1",
        "kind": "TOOL",
        "status": "running",
        "flow_id": "tool_execution_v1",
        "event": { "type": "thread_post" },
        "metadata": { "created_at": 1, "updated_at": 1, "kind": "TOOL" },
    });
    let report =
        gate.check(SchemaBoundary::TicketDerive, GateDirection::Internal, &child, now());
    assert!(!report.ok);
}
