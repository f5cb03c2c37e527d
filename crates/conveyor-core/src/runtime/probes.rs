// crates/conveyor-core/src/runtime/probes.rs
// ============================================================================
// Module: Conveyor Probe Runner
// Description: Ordered startup probes against a provider abstraction.
// Purpose: Detect unusable deployments before the orchestrator serves work.
// Dependencies: crate::core, crate::interfaces, crate::runtime::audit
// ============================================================================

//! ## Overview
//! The probe runner executes a fixed, ordered set of startup checks. Degraded
//! providers (`PROVIDER_UNAVAILABLE_NO_MCP`, `PROVIDER_NOT_IMPLEMENTED`) pass
//! gracefully; the `security` probe is inverted and passes only when access
//! is denied. An operator override can force a single probe to fail
//! deterministically. Report evidence is truncated keep-first-N with explicit
//! truncation markers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;

use crate::core::StableCode;
use crate::interfaces::Clock;
use crate::interfaces::ProbeKind;
use crate::interfaces::ProbeProvider;
use crate::runtime::audit::AuditEvent;
use crate::runtime::audit::AuditSink;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum evidence items kept per probe report (keep-first-N).
pub const EVIDENCE_MAX_ITEMS_PER_REPORT: usize = 20;

// ============================================================================
// SECTION: Report Types
// ============================================================================

/// Result of one startup probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Probe name.
    pub probe: ProbeKind,
    /// Whether the probe passed.
    pub ok: bool,
    /// Whether the pass was a graceful degraded pass.
    pub degraded: bool,
    /// Whether the failure was forced by operator override.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub forced: bool,
    /// Stable code describing the observed outcome, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<StableCode>,
    /// Short detail for operators.
    pub detail: String,
}

/// Evidence entry recorded while probing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeEvidence {
    /// Probe the evidence belongs to.
    pub probe: ProbeKind,
    /// Evidence kind label.
    pub kind: String,
    /// Evidence payload reference or summary.
    pub detail: String,
}

/// Full probe report for one startup run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// RFC 3339 report time.
    pub as_of: String,
    /// Whether every probe passed.
    pub ok: bool,
    /// Whether any probe passed only in degraded mode.
    pub degraded: bool,
    /// Per-probe results in execution order.
    pub results: Vec<ProbeResult>,
    /// Evidence entries, truncated keep-first-N.
    pub evidence: Vec<ProbeEvidence>,
    /// Whether evidence was truncated.
    pub evidence_truncated: bool,
    /// Count of evidence entries dropped by truncation.
    pub evidence_dropped_count: usize,
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Startup probe runner.
pub struct ProbeRunner {
    /// Provider under probe.
    provider: Arc<dyn ProbeProvider>,
    /// Probe name forced to fail, from operator override.
    force_fail: Option<String>,
    /// Audit sink for the report line.
    audit: Arc<dyn AuditSink>,
    /// Injected time source.
    clock: Arc<dyn Clock>,
}

impl ProbeRunner {
    /// Creates a probe runner.
    #[must_use]
    pub fn new(
        provider: Arc<dyn ProbeProvider>,
        force_fail: Option<String>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            provider,
            force_fail,
            audit,
            clock,
        }
    }

    /// Runs all probes in their fixed order and returns the report.
    #[must_use]
    pub fn run(&self) -> ProbeReport {
        let mut results = Vec::new();
        let mut evidence = Vec::new();
        for probe in ProbeKind::ordered() {
            let result = self.run_probe(probe, &mut evidence);
            results.push(result);
        }

        let total = evidence.len();
        let kept = total.min(EVIDENCE_MAX_ITEMS_PER_REPORT);
        evidence.truncate(kept);
        let dropped = total - kept;

        let now = self.clock.now();
        let report = ProbeReport {
            as_of: now.to_rfc3339(),
            ok: results.iter().all(|result| result.ok),
            degraded: results.iter().any(|result| result.degraded),
            results,
            evidence,
            evidence_truncated: dropped > 0,
            evidence_dropped_count: dropped,
        };
        self.audit.record(&AuditEvent::new(
            "probe_report",
            now,
            format!("[probes] ok={} degraded={}", report.ok, report.degraded),
            json!({ "ok": report.ok, "degraded": report.degraded }),
        ));
        report
    }

    /// Runs a single probe, appending its evidence entries.
    fn run_probe(&self, probe: ProbeKind, evidence: &mut Vec<ProbeEvidence>) -> ProbeResult {
        if self.force_fail.as_deref() == Some(probe.as_str()) {
            evidence.push(ProbeEvidence {
                probe,
                kind: "forced_failure".to_string(),
                detail: "operator override forced this probe to fail".to_string(),
            });
            return ProbeResult {
                probe,
                ok: false,
                degraded: false,
                forced: true,
                code: Some(StableCode::ProbeForcedFail),
                detail: "forced by operator override".to_string(),
            };
        }

        match self.provider.probe(probe) {
            Ok(value) => {
                collect_value_evidence(probe, &value, evidence);
                if probe == ProbeKind::Security {
                    // Inverted probe: a successful exchange means access was
                    // granted, which is the failure condition.
                    return ProbeResult {
                        probe,
                        ok: false,
                        degraded: false,
                        forced: false,
                        code: Some(StableCode::ProbeForbidden),
                        detail: "access granted; denial required".to_string(),
                    };
                }
                ProbeResult {
                    probe,
                    ok: true,
                    degraded: false,
                    forced: false,
                    code: None,
                    detail: "provider exchange succeeded".to_string(),
                }
            }
            Err(failure) => {
                evidence.push(ProbeEvidence {
                    probe,
                    kind: "provider_failure".to_string(),
                    detail: failure.to_string(),
                });
                match failure.code {
                    StableCode::ProviderUnavailableNoMcp | StableCode::ProviderNotImplemented => {
                        ProbeResult {
                            probe,
                            ok: true,
                            degraded: true,
                            forced: false,
                            code: Some(failure.code),
                            detail: "graceful pass in degraded mode".to_string(),
                        }
                    }
                    StableCode::ProbeAccessDenied | StableCode::ProbeForbidden
                        if probe == ProbeKind::Security =>
                    {
                        ProbeResult {
                            probe,
                            ok: true,
                            degraded: false,
                            forced: false,
                            code: Some(failure.code),
                            detail: "access denied as required".to_string(),
                        }
                    }
                    code => ProbeResult {
                        probe,
                        ok: false,
                        degraded: false,
                        forced: false,
                        code: Some(code),
                        detail: failure.message,
                    },
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Collects evidence entries from a provider response value.
fn collect_value_evidence(probe: ProbeKind, value: &Value, evidence: &mut Vec<ProbeEvidence>) {
    if let Some(items) = value.get("evidence").and_then(Value::as_array) {
        for item in items {
            evidence.push(ProbeEvidence {
                probe,
                kind: "provider_evidence".to_string(),
                detail: item
                    .as_str()
                    .map_or_else(|| item.to_string(), str::to_string),
            });
        }
        return;
    }
    evidence.push(ProbeEvidence {
        probe,
        kind: "provider_response".to_string(),
        detail: summarize_value(value),
    });
}

/// Builds a short summary of a provider response.
fn summarize_value(value: &Value) -> String {
    match value {
        Value::Object(map) => format!("object with {} fields", map.len()),
        Value::Array(items) => format!("array with {} items", items.len()),
        other => other.to_string(),
    }
}
