// crates/conveyor-core/src/runtime/cutover.rs
// ============================================================================
// Module: Conveyor Cutover Policy and Metrics
// Description: Legacy-to-canonical migration policy and observability.
// Purpose: Single source of truth for cutover mode and compat counters.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! The cutover policy is the only interpreter of the cutover cutoff. Legacy
//! writes are forbidden in every mode; legacy reads are permitted only
//! pre-cutover, and only when configured. The metrics table is the decision
//! surface for enabling strict mode: low-cardinality, deterministic rows
//! keyed by `(event_type, field, source)`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;

use crate::core::DerivedRefs;
use crate::core::Ticket;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Mode
// ============================================================================

/// Cutover mode derived from the configured cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutoverMode {
    /// Before the cutoff: legacy layouts may still be read.
    PreCutover,
    /// After the cutoff: canonical layout only.
    PostCutover,
}

impl CutoverMode {
    /// Returns the stable string form of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PreCutover => "pre_cutover",
            Self::PostCutover => "post_cutover",
        }
    }
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Single source of truth for the cutover cutoff.
///
/// # Invariants
/// - Every legacy-vs-canonical branch routes through this policy.
/// - Legacy writes are forbidden regardless of mode.
#[derive(Debug, Clone, Copy)]
pub struct CutoverPolicy {
    /// Epoch milliseconds up to (and including) which pre-cutover applies.
    cutover_until_ms: i64,
    /// Whether legacy reads are permitted while pre-cutover.
    legacy_reads_pre_cutover: bool,
}

impl CutoverPolicy {
    /// Creates a policy from the configured cutoff.
    #[must_use]
    pub const fn new(cutover_until_ms: i64, legacy_reads_pre_cutover: bool) -> Self {
        Self {
            cutover_until_ms,
            legacy_reads_pre_cutover,
        }
    }

    /// Returns the mode in effect at the given instant.
    #[must_use]
    pub const fn mode(&self, now: Timestamp) -> CutoverMode {
        if now.as_unix_millis() <= self.cutover_until_ms {
            CutoverMode::PreCutover
        } else {
            CutoverMode::PostCutover
        }
    }

    /// Returns true when a legacy read is permitted at the given instant.
    #[must_use]
    pub const fn legacy_read_allowed(&self, now: Timestamp) -> bool {
        matches!(self.mode(now), CutoverMode::PreCutover) && self.legacy_reads_pre_cutover
    }
}

// ============================================================================
// SECTION: Metrics
// ============================================================================

/// Compatibility event classification for cutover metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutoverEventType {
    /// A permitted read served from a legacy layout.
    LegacyRead,
    /// A forbidden legacy access was attempted.
    CutoverViolation,
    /// The canonical layout was missing where the legacy layout had data.
    CanonicalMissing,
}

impl CutoverEventType {
    /// Returns the stable string form of the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LegacyRead => "legacy_read",
            Self::CutoverViolation => "cutover_violation",
            Self::CanonicalMissing => "canonical_missing",
        }
    }
}

/// One counter row of a cutover metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutoverCounterRow {
    /// Event classification.
    pub event_type: CutoverEventType,
    /// Field the event applies to (for example `derived`).
    pub field: String,
    /// Optional access-site label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Event count.
    pub count: u64,
}

/// Point-in-time cutover metrics snapshot with stable ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutoverMetricsSnapshot {
    /// RFC 3339 snapshot time.
    pub as_of: String,
    /// Counter rows sorted by `(event_type, field, source)`, unique per key.
    pub counters: Vec<CutoverCounterRow>,
}

impl CutoverMetricsSnapshot {
    /// Sums counts for one event type across all fields and sources.
    #[must_use]
    pub fn total(&self, event_type: CutoverEventType) -> u64 {
        self.counters
            .iter()
            .filter(|row| row.event_type == event_type)
            .map(|row| row.count)
            .sum()
    }
}

/// Low-cardinality counter table for compatibility observability.
pub struct CutoverMetrics {
    /// Counter table keyed by `(event_type, field, source)`.
    counters: Mutex<BTreeMap<(CutoverEventType, String, Option<String>), u64>>,
}

impl Default for CutoverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CutoverMetrics {
    /// Creates an empty counter table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(BTreeMap::new()),
        }
    }

    /// Increments the counter for one event key.
    pub fn record(&self, event_type: CutoverEventType, field: &str, source: Option<&str>) {
        if let Ok(mut guard) = self.counters.lock() {
            let key = (event_type, field.to_string(), source.map(str::to_string));
            *guard.entry(key).or_insert(0) += 1;
        }
    }

    /// Builds a point-in-time snapshot sorted by the full counter key.
    #[must_use]
    pub fn snapshot(&self, now: Timestamp) -> CutoverMetricsSnapshot {
        let counters = self.counters.lock().map_or_else(
            |_| Vec::new(),
            |guard| {
                guard
                    .iter()
                    .map(|((event_type, field, source), count)| CutoverCounterRow {
                        event_type: *event_type,
                        field: field.clone(),
                        source: source.clone(),
                        count: *count,
                    })
                    .collect()
            },
        );
        CutoverMetricsSnapshot {
            as_of: now.to_rfc3339(),
            counters,
        }
    }
}

// ============================================================================
// SECTION: Strict Gate
// ============================================================================

/// Reason labels for refusing to enable strict cutover mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrictGateReason {
    /// Canonical-missing events were observed.
    CanonicalMissingNonzero,
    /// Cutover violations were observed.
    CutoverViolationNonzero,
    /// Legacy reads were observed while post-cutover.
    LegacyReadPostCutoverNonzero,
}

impl StrictGateReason {
    /// Returns the stable string form of the reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CanonicalMissingNonzero => "canonical_missing_nonzero",
            Self::CutoverViolationNonzero => "cutover_violation_nonzero",
            Self::LegacyReadPostCutoverNonzero => "legacy_read_post_cutover_nonzero",
        }
    }
}

/// Decision surface for enabling strict cutover mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrictGateDecision {
    /// Whether strict mode is safe to enable.
    pub ok: bool,
    /// Deterministic, low-cardinality refusal reasons.
    pub reasons: Vec<StrictGateReason>,
}

/// Decides whether strict cutover mode is safe to enable.
///
/// `ok` iff no canonical-missing events, no cutover violations, and (when
/// post-cutover) no legacy reads.
#[must_use]
pub fn can_enable_strict(
    snapshot: &CutoverMetricsSnapshot,
    mode: CutoverMode,
) -> StrictGateDecision {
    let mut reasons = Vec::new();
    if snapshot.total(CutoverEventType::CanonicalMissing) > 0 {
        reasons.push(StrictGateReason::CanonicalMissingNonzero);
    }
    if snapshot.total(CutoverEventType::CutoverViolation) > 0 {
        reasons.push(StrictGateReason::CutoverViolationNonzero);
    }
    if mode == CutoverMode::PostCutover && snapshot.total(CutoverEventType::LegacyRead) > 0 {
        reasons.push(StrictGateReason::LegacyReadPostCutoverNonzero);
    }
    StrictGateDecision {
        ok: reasons.is_empty(),
        reasons,
    }
}

// ============================================================================
// SECTION: Compat Accessor
// ============================================================================

/// Reads a ticket's derivation back-references through the cutover policy.
///
/// The canonical root-level `derived` object always wins. When a field is
/// absent there and the legacy `metadata.derived` mirror has it, the mirror
/// is consulted only when the policy permits legacy reads; the access is
/// counted either way (`legacy_read` when served, `cutover_violation` when
/// refused, plus `canonical_missing` whenever the mirror holds data the
/// canonical location lacks).
#[must_use]
pub fn read_derived(
    ticket: &Ticket,
    policy: &CutoverPolicy,
    metrics: &CutoverMetrics,
    source: &str,
    now: Timestamp,
) -> DerivedRefs {
    let mut view = ticket.derived.clone();
    let Some(legacy) = ticket.metadata.derived.as_ref() else {
        return view;
    };

    let tool_gap = view.tool_ticket_id.is_none() && legacy.tool_ticket_id.is_some();
    let reply_gap = view.reply_ticket_id.is_none() && legacy.reply_ticket_id.is_some();
    if !tool_gap && !reply_gap {
        return view;
    }

    metrics.record(CutoverEventType::CanonicalMissing, "derived", Some(source));
    if policy.legacy_read_allowed(now) {
        metrics.record(CutoverEventType::LegacyRead, "derived", Some(source));
        if tool_gap {
            view.tool_ticket_id.clone_from(&legacy.tool_ticket_id);
        }
        if reply_gap {
            view.reply_ticket_id.clone_from(&legacy.reply_ticket_id);
        }
    } else {
        metrics.record(CutoverEventType::CutoverViolation, "derived", Some(source));
    }
    view
}
