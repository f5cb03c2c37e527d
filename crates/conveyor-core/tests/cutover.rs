// crates/conveyor-core/tests/cutover.rs
// ============================================================================
// Module: Cutover Policy and Metrics Tests
// Description: Tests for mode derivation, counters, and the strict gate.
// Purpose: Validate the single source of truth for the cutover migration.
// Dependencies: conveyor-core
// ============================================================================
//! ## Overview
//! Ensures the cutoff comparison is inclusive, snapshots are sorted and
//! unique per key, and the strict-gate decision matches the observed
//! counters for both modes.

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

use conveyor_core::CutoverMetrics;
use conveyor_core::CutoverMode;
use conveyor_core::CutoverPolicy;
use conveyor_core::IngressEvent;
use conveyor_core::Ticket;
use conveyor_core::TicketKind;
use conveyor_core::Timestamp;
use conveyor_core::can_enable_strict;
use conveyor_core::runtime::CutoverEventType;
use conveyor_core::runtime::StrictGateReason;
use conveyor_core::runtime::read_derived;

fn at(ms: i64) -> Timestamp {
    Timestamp::from_unix_millis(ms)
}

fn sample_ticket() -> Ticket {
    let event: IngressEvent = serde_json::from_value(serde_json::json!({
        "type": "thread_post",
        "content": "hello",
    }))
    .expect("event");
    Ticket::new(TicketKind::Triage, "triage_v1".into(), event, at(0))
}

/// Verifies the cutoff instant itself is still pre-cutover.
#[test]
fn mode_boundary_is_inclusive() {
    let policy = CutoverPolicy::new(1_000, true);
    assert_eq!(policy.mode(at(999)), CutoverMode::PreCutover);
    assert_eq!(policy.mode(at(1_000)), CutoverMode::PreCutover);
    assert_eq!(policy.mode(at(1_001)), CutoverMode::PostCutover);
}

/// Verifies snapshots are sorted by the full key with one row per key.
#[test]
fn snapshot_rows_are_sorted_and_unique() {
    let metrics = CutoverMetrics::new();
    metrics.record(CutoverEventType::LegacyRead, "derived", Some("b"));
    metrics.record(CutoverEventType::CanonicalMissing, "derived", Some("a"));
    metrics.record(CutoverEventType::LegacyRead, "derived", Some("a"));
    metrics.record(CutoverEventType::LegacyRead, "derived", Some("a"));

    let snapshot = metrics.snapshot(at(1_000));
    assert_eq!(snapshot.counters.len(), 3);
    let keys: Vec<_> = snapshot
        .counters
        .iter()
        .map(|row| (row.event_type, row.field.clone(), row.source.clone()))
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(keys, sorted);
    let repeated = snapshot
        .counters
        .iter()
        .find(|row| row.event_type == CutoverEventType::LegacyRead && row.source.as_deref() == Some("a"))
        .expect("row");
    assert_eq!(repeated.count, 2);
}

/// Verifies the strict gate refuses on post-cutover legacy reads and admits
/// the same counters pre-cutover.
#[test]
fn strict_gate_depends_on_mode() {
    let metrics = CutoverMetrics::new();
    metrics.record(CutoverEventType::LegacyRead, "derived", Some("derive_reply"));
    metrics.record(CutoverEventType::LegacyRead, "derived", Some("derive_reply"));
    let snapshot = metrics.snapshot(at(1_000));

    let post = can_enable_strict(&snapshot, CutoverMode::PostCutover);
    assert!(!post.ok);
    assert_eq!(post.reasons, vec![StrictGateReason::LegacyReadPostCutoverNonzero]);

    let pre = can_enable_strict(&snapshot, CutoverMode::PreCutover);
    assert!(pre.ok);
    assert!(pre.reasons.is_empty());
}

/// Verifies violations and canonical gaps each refuse the strict gate.
#[test]
fn strict_gate_lists_each_reason() {
    let metrics = CutoverMetrics::new();
    metrics.record(CutoverEventType::CanonicalMissing, "derived", None);
    metrics.record(CutoverEventType::CutoverViolation, "derived", None);
    let snapshot = metrics.snapshot(at(1_000));

    let decision = can_enable_strict(&snapshot, CutoverMode::PreCutover);
    assert!(!decision.ok);
    assert_eq!(
        decision.reasons,
        vec![
            StrictGateReason::CanonicalMissingNonzero,
            StrictGateReason::CutoverViolationNonzero,
        ]
    );
}

/// Verifies the legacy mirror is served pre-cutover and counted.
#[test]
fn legacy_mirror_read_pre_cutover() {
    let policy = CutoverPolicy::new(10_000, true);
    let metrics = CutoverMetrics::new();
    let mut ticket = sample_ticket();
    ticket.metadata.derived = Some(conveyor_core::DerivedRefs {
        tool_ticket_id: Some("legacy-tool".into()),
        reply_ticket_id: None,
    });

    let view = read_derived(&ticket, &policy, &metrics, "test", at(1_000));
    assert_eq!(view.tool_ticket_id, Some("legacy-tool".into()));

    let snapshot = metrics.snapshot(at(1_000));
    assert_eq!(snapshot.total(CutoverEventType::LegacyRead), 1);
    assert_eq!(snapshot.total(CutoverEventType::CanonicalMissing), 1);
    assert_eq!(snapshot.total(CutoverEventType::CutoverViolation), 0);
}

/// Verifies the legacy mirror is refused post-cutover and the refusal is
/// counted as a violation.
#[test]
fn legacy_mirror_refused_post_cutover() {
    let policy = CutoverPolicy::new(0, true);
    let metrics = CutoverMetrics::new();
    let mut ticket = sample_ticket();
    ticket.metadata.derived = Some(conveyor_core::DerivedRefs {
        tool_ticket_id: Some("legacy-tool".into()),
        reply_ticket_id: None,
    });

    let view = read_derived(&ticket, &policy, &metrics, "test", at(5_000));
    assert!(view.tool_ticket_id.is_none());

    let snapshot = metrics.snapshot(at(5_000));
    assert_eq!(snapshot.total(CutoverEventType::CutoverViolation), 1);
    assert_eq!(snapshot.total(CutoverEventType::LegacyRead), 0);
}

/// Verifies the canonical root always wins over the mirror.
#[test]
fn canonical_root_wins_over_mirror() {
    let policy = CutoverPolicy::new(10_000, true);
    let metrics = CutoverMetrics::new();
    let mut ticket = sample_ticket();
    ticket.derived.tool_ticket_id = Some("canonical-tool".into());
    ticket.metadata.derived = Some(conveyor_core::DerivedRefs {
        tool_ticket_id: Some("legacy-tool".into()),
        reply_ticket_id: None,
    });

    let view = read_derived(&ticket, &policy, &metrics, "test", at(1_000));
    assert_eq!(view.tool_ticket_id, Some("canonical-tool".into()));
    let snapshot = metrics.snapshot(at(1_000));
    assert!(snapshot.counters.is_empty());
}
