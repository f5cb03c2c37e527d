// crates/conveyor-core/tests/probes.rs
// ============================================================================
// Module: Probe Runner Tests
// Description: Tests for ordered startup probes and their interpretation.
// Purpose: Validate graceful degradation, inversion, forcing, and truncation.
// Dependencies: conveyor-core
// ============================================================================
//! ## Overview
//! Ensures the probe order is fixed, degraded providers pass gracefully, the
//! security probe passes only on denial, forced failures are stamped, and
//! evidence is truncated keep-first-N.

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

use conveyor_core::Clock;
use conveyor_core::ManualClock;
use conveyor_core::NoopAuditSink;
use conveyor_core::ProbeKind;
use conveyor_core::ProbeProvider;
use conveyor_core::ProbeRunner;
use conveyor_core::ProviderFailure;
use conveyor_core::StableCode;
use conveyor_core::runtime::EVIDENCE_MAX_ITEMS_PER_REPORT;
use serde_json::Value;
use serde_json::json;

/// Provider scripting one outcome per probe.
struct ScriptedProvider {
    /// Security probe outcome.
    security: Result<Value, ProviderFailure>,
    /// Outcome for every other probe.
    others: Result<Value, ProviderFailure>,
}

impl ProbeProvider for ScriptedProvider {
    fn probe(&self, probe: ProbeKind) -> Result<Value, ProviderFailure> {
        match probe {
            ProbeKind::Security => self.security.clone(),
            _ => self.others.clone(),
        }
    }
}

fn denied() -> Result<Value, ProviderFailure> {
    Err(ProviderFailure {
        code: StableCode::ProbeAccessDenied,
        message: "denied".to_string(),
    })
}

fn runner(provider: ScriptedProvider, force_fail: Option<&str>) -> ProbeRunner {
    let clock = Arc::new(ManualClock::new(1_000));
    ProbeRunner::new(
        Arc::new(provider),
        force_fail.map(str::to_string),
        Arc::new(NoopAuditSink),
        clock as Arc<dyn Clock>,
    )
}

/// Verifies probes run in the fixed order.
#[test]
fn probes_run_in_fixed_order() {
    let report = runner(
        ScriptedProvider {
            security: denied(),
            others: Ok(json!({})),
        },
        None,
    )
    .run();
    let order: Vec<&str> = report.results.iter().map(|result| result.probe.as_str()).collect();
    assert_eq!(order, vec!["security", "access", "search", "memory"]);
    assert!(report.ok);
}

/// Verifies degraded provider codes pass gracefully and mark the report.
#[test]
fn degraded_provider_passes_gracefully() {
    let report = runner(
        ScriptedProvider {
            security: denied(),
            others: Err(ProviderFailure {
                code: StableCode::ProviderUnavailableNoMcp,
                message: "no provider".to_string(),
            }),
        },
        None,
    )
    .run();
    assert!(report.ok);
    assert!(report.degraded);
    let access = &report.results[1];
    assert!(access.ok);
    assert!(access.degraded);
    assert_eq!(access.code, Some(StableCode::ProviderUnavailableNoMcp));
}

/// Verifies the security probe fails when access is granted.
#[test]
fn security_probe_fails_on_granted_access() {
    let report = runner(
        ScriptedProvider {
            security: Ok(json!({ "granted": true })),
            others: Ok(json!({})),
        },
        None,
    )
    .run();
    assert!(!report.ok);
    let security = &report.results[0];
    assert!(!security.ok);
    assert_eq!(security.code, Some(StableCode::ProbeForbidden));
}

/// Verifies a hard provider failure fails its probe with the observed code.
#[test]
fn provider_call_failure_fails_probe() {
    let report = runner(
        ScriptedProvider {
            security: denied(),
            others: Err(ProviderFailure {
                code: StableCode::ProviderCallFailed,
                message: "exploded".to_string(),
            }),
        },
        None,
    )
    .run();
    assert!(!report.ok);
    assert_eq!(report.results[1].code, Some(StableCode::ProviderCallFailed));
}

/// Verifies the force-fail override stamps the forced result.
#[test]
fn force_fail_stamps_forced_result() {
    let report = runner(
        ScriptedProvider {
            security: denied(),
            others: Ok(json!({})),
        },
        Some("search"),
    )
    .run();
    assert!(!report.ok);
    let search = report.results.iter().find(|result| result.probe == ProbeKind::Search).expect("probe");
    assert!(search.forced);
    assert_eq!(search.code, Some(StableCode::ProbeForcedFail));
}

/// Verifies evidence is truncated keep-first-N with markers.
#[test]
fn evidence_is_truncated_keep_first() {
    let items: Vec<Value> = (0..30).map(|index| json!(format!("item-{index}"))).collect();
    let report = runner(
        ScriptedProvider {
            security: denied(),
            others: Ok(json!({ "evidence": items })),
        },
        None,
    )
    .run();
    assert_eq!(report.evidence.len(), EVIDENCE_MAX_ITEMS_PER_REPORT);
    assert!(report.evidence_truncated);
    assert!(report.evidence_dropped_count > 0);
    assert_eq!(report.evidence[1].detail, "item-0");
}
