// crates/conveyor-core/src/core/event.rs
// ============================================================================
// Module: Conveyor Ingress Events
// Description: Originating social-media event payloads carried by tickets.
// Purpose: Provide the canonical event model shared across ticket kinds.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! An ingress event is the originating payload a TRIAGE ticket is created
//! from. Downstream TOOL and REPLY tickets inherit the event unchanged so
//! every stage can see the thread context. Event features are an open bag;
//! only the engagement counters have a fixed shape.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Event Model
// ============================================================================

/// Originating social-media event carried by every ticket in a pipeline.
///
/// # Invariants
/// - `event_type` is non-empty after ingress schema validation.
/// - The event is cloned, never mutated, as it moves through derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressEvent {
    /// Event type label (for example `thread_post`).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Upstream event identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Thread identifier the event belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Raw textual content of the event.
    #[serde(default)]
    pub content: String,
    /// Actor handle that produced the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Event timestamp supplied by the upstream platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    /// Feature bag attached by ingress enrichment.
    #[serde(default, skip_serializing_if = "EventFeatures::is_empty")]
    pub features: EventFeatures,
}

/// Feature bag attached to ingress events.
///
/// # Invariants
/// - `engagement` has a fixed shape; everything else is pass-through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EventFeatures {
    /// Engagement counters when the platform provides them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement: Option<Engagement>,
    /// Additional enrichment values preserved verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl EventFeatures {
    /// Returns true when no features are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.engagement.is_none() && self.extra.is_empty()
    }
}

/// Engagement counters for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Engagement {
    /// Like count at ingress time.
    #[serde(default)]
    pub likes: u64,
    /// Comment count at ingress time.
    #[serde(default)]
    pub comments: u64,
}
