// crates/conveyor-core/src/runtime/schema_gate.rs
// ============================================================================
// Module: Conveyor Schema Gate
// Description: Boundary validation for ticket payloads in warn/strict modes.
// Purpose: Reject or flag malformed payloads before they reach the store.
// Dependencies: crate::core, crate::runtime::audit, jsonschema, serde_json
// ============================================================================

//! ## Overview
//! The schema gate validates JSON payloads at named boundaries. In `warn`
//! mode every payload is allowed and violations are audited and counted; in
//! `strict` mode ingress violations become structured rejections and internal
//! violations tell the caller to skip the child-create. The gate never
//! panics and never mutates the payload it inspects; validators are compiled
//! once at construction and fail closed when a schema is unusable.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use jsonschema::Draft;
use jsonschema::Validator;
use jsonschema::error::ValidationErrorKind;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::StableCode;
use crate::core::Timestamp;
use crate::core::WarnCode;
use crate::runtime::audit::AuditEvent;
use crate::runtime::audit::AuditSink;

// ============================================================================
// SECTION: Boundaries and Modes
// ============================================================================

/// Named validation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SchemaBoundary {
    /// A ticket is being created.
    #[serde(rename = "TICKET_CREATE")]
    TicketCreate,
    /// A ticket fill is being applied.
    #[serde(rename = "TICKET_COMPLETE")]
    TicketComplete,
    /// A child ticket is being derived.
    #[serde(rename = "TICKET_DERIVE")]
    TicketDerive,
}

impl SchemaBoundary {
    /// Returns the stable string form of the boundary.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TicketCreate => "TICKET_CREATE",
            Self::TicketComplete => "TICKET_COMPLETE",
            Self::TicketDerive => "TICKET_DERIVE",
        }
    }
}

/// Direction a payload crosses the boundary from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDirection {
    /// Payload arrived from outside the process.
    Ingress,
    /// Payload was produced by an internal component.
    Internal,
}

impl GateDirection {
    /// Returns the stable string form of the direction.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ingress => "ingress",
            Self::Internal => "internal",
        }
    }
}

/// Gate operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchemaGateMode {
    /// Validation disabled.
    Off,
    /// Validate, audit, and count, but always allow.
    #[default]
    Warn,
    /// Validate and reject violations.
    Strict,
}

impl SchemaGateMode {
    /// Returns the stable string form of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Warn => "warn",
            Self::Strict => "strict",
        }
    }

    /// Parses a mode from its wire form.
    #[must_use]
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw {
            "off" => Some(Self::Off),
            "warn" => Some(Self::Warn),
            "strict" => Some(Self::Strict),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Reports
// ============================================================================

/// Outcome of one gate check.
///
/// # Invariants
/// - Rejections carry `warn_count > 0`, non-empty `warn_codes`, and
///   non-empty `errors`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    /// Whether the payload may proceed.
    pub ok: bool,
    /// Stable rejection code when the payload is rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<StableCode>,
    /// Count of validation violations observed.
    pub warn_count: usize,
    /// Sorted, deduplicated violation classifications.
    pub warn_codes: Vec<WarnCode>,
    /// Per-violation messages for audit.
    pub errors: Vec<String>,
}

impl GateReport {
    /// Report for a payload that passed cleanly or with the gate off.
    #[must_use]
    pub const fn allowed() -> Self {
        Self {
            ok: true,
            code: None,
            warn_count: 0,
            warn_codes: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// One counter row of a schema-gate metrics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaGateCounterRow {
    /// Boundary the violations occurred at.
    pub boundary: SchemaBoundary,
    /// Direction of the offending payloads.
    pub direction: GateDirection,
    /// Violation classification.
    pub code: WarnCode,
    /// Violation count.
    pub count: u64,
}

/// Point-in-time schema-gate metrics snapshot with stable ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaGateSnapshot {
    /// RFC 3339 snapshot time.
    pub as_of: String,
    /// Active gate mode label.
    pub mode: SchemaGateMode,
    /// Counter rows sorted by `(boundary, direction, code)`.
    pub counters: Vec<SchemaGateCounterRow>,
}

/// Schema gate construction errors.
#[derive(Debug, Error)]
pub enum SchemaGateError {
    /// A boundary schema failed to compile.
    #[error("schema for {boundary} failed to compile: {detail}")]
    Compile {
        /// Boundary whose schema failed.
        boundary: &'static str,
        /// Compiler failure detail.
        detail: String,
    },
}

// ============================================================================
// SECTION: Gate
// ============================================================================

/// Boundary validator with warn/strict modes, audit, and counters.
pub struct SchemaGate {
    /// Active operating mode (already folded with the master switch).
    mode: SchemaGateMode,
    /// Compiled validator per boundary.
    validators: BTreeMap<SchemaBoundary, Validator>,
    /// Audit sink for per-error records.
    audit: Arc<dyn AuditSink>,
    /// Violation counters keyed by `(boundary, direction, code)`.
    counters: Mutex<BTreeMap<(SchemaBoundary, GateDirection, WarnCode), u64>>,
}

impl SchemaGate {
    /// Builds a gate with compiled boundary validators.
    ///
    /// When `enabled` is false the mode folds to `off` regardless of the
    /// requested mode.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaGateError`] when a boundary schema fails to compile.
    pub fn new(
        mode: SchemaGateMode,
        enabled: bool,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, SchemaGateError> {
        let mode = if enabled { mode } else { SchemaGateMode::Off };
        let mut validators = BTreeMap::new();
        for (boundary, schema) in [
            (SchemaBoundary::TicketCreate, ticket_create_schema()),
            (SchemaBoundary::TicketComplete, ticket_complete_schema()),
            (SchemaBoundary::TicketDerive, ticket_derive_schema()),
        ] {
            let validator = compile_schema(&schema).map_err(|detail| SchemaGateError::Compile {
                boundary: boundary.as_str(),
                detail,
            })?;
            validators.insert(boundary, validator);
        }
        Ok(Self {
            mode,
            validators,
            audit,
            counters: Mutex::new(BTreeMap::new()),
        })
    }

    /// Returns the active gate mode.
    #[must_use]
    pub const fn mode(&self) -> SchemaGateMode {
        self.mode
    }

    /// Validates a payload at a boundary and direction.
    ///
    /// Never panics and never mutates the payload. In `warn` mode the report
    /// is always `ok`; in `strict` mode violations reject with
    /// `SCHEMA_VALIDATION_FAILED`.
    #[must_use]
    pub fn check(
        &self,
        boundary: SchemaBoundary,
        direction: GateDirection,
        payload: &Value,
        now: Timestamp,
    ) -> GateReport {
        if self.mode == SchemaGateMode::Off {
            return GateReport::allowed();
        }

        let violations = self.collect_violations(boundary, payload);
        if violations.is_empty() {
            return GateReport::allowed();
        }

        let mut warn_codes: Vec<WarnCode> =
            violations.iter().map(|(code, _)| *code).collect();
        warn_codes.sort_unstable();
        warn_codes.dedup();
        let errors: Vec<String> = violations.iter().map(|(_, message)| message.clone()).collect();

        for (code, message) in &violations {
            self.bump(boundary, direction, *code);
            self.audit.record(&AuditEvent::new(
                "schema_gate",
                now,
                format!("[schema_gate] {} {} {}", boundary.as_str(), direction.as_str(), code),
                json!({
                    "boundary": boundary.as_str(),
                    "direction": direction.as_str(),
                    "code": code.as_str(),
                    "detail": message,
                    "mode": self.mode.as_str(),
                }),
            ));
        }

        let rejected = self.mode == SchemaGateMode::Strict;
        GateReport {
            ok: !rejected,
            code: rejected.then_some(StableCode::SchemaValidationFailed),
            warn_count: violations.len(),
            warn_codes,
            errors,
        }
    }

    /// Builds a point-in-time counter snapshot sorted by the full key.
    #[must_use]
    pub fn snapshot(&self, now: Timestamp) -> SchemaGateSnapshot {
        let counters = self.counters.lock().map_or_else(
            |_| Vec::new(),
            |guard| {
                guard
                    .iter()
                    .map(|((boundary, direction, code), count)| SchemaGateCounterRow {
                        boundary: *boundary,
                        direction: *direction,
                        code: *code,
                        count: *count,
                    })
                    .collect()
            },
        );
        SchemaGateSnapshot {
            as_of: now.to_rfc3339(),
            mode: self.mode,
            counters,
        }
    }

    /// Collects classified violations for a payload.
    fn collect_violations(
        &self,
        boundary: SchemaBoundary,
        payload: &Value,
    ) -> Vec<(WarnCode, String)> {
        if !payload.is_object() {
            return vec![(WarnCode::SchemaInvalid, "payload is not a json object".to_string())];
        }
        let Some(validator) = self.validators.get(&boundary) else {
            // A boundary without a validator fails closed.
            return vec![(
                WarnCode::SchemaInvalid,
                format!("no validator for boundary {}", boundary.as_str()),
            )];
        };
        validator
            .iter_errors(payload)
            .map(|error| (classify_error(&error.kind()), error.to_string()))
            .collect()
    }

    /// Increments one violation counter.
    fn bump(&self, boundary: SchemaBoundary, direction: GateDirection, code: WarnCode) {
        if let Ok(mut guard) = self.counters.lock() {
            *guard.entry((boundary, direction, code)).or_insert(0) += 1;
        }
    }
}

// ============================================================================
// SECTION: Schemas
// ============================================================================

/// Compiles a JSON schema for validation.
fn compile_schema(schema: &Value) -> Result<Validator, String> {
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .map_err(|err| err.to_string())
}

/// Classifies a validation error onto the closed warn-code set.
///
/// Compile failures and non-object payloads classify as `schema_invalid`
/// before validation runs; every shape mismatch that is neither a missing
/// required property nor an undeclared property classifies as
/// `type_mismatch`.
fn classify_error(kind: &ValidationErrorKind) -> WarnCode {
    match kind {
        ValidationErrorKind::Required {
            ..
        } => WarnCode::Missing,
        ValidationErrorKind::AdditionalProperties {
            ..
        }
        | ValidationErrorKind::FalseSchema => WarnCode::UnknownField,
        _ => WarnCode::TypeMismatch,
    }
}

/// Schema for ticket records entering the store.
fn ticket_create_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id", "ticket_id", "kind", "status", "flow_id", "event", "metadata"],
        "properties": {
            "id": { "type": "string", "minLength": 1 },
            "ticket_id": { "type": "string", "minLength": 1 },
            "kind": { "enum": ["TRIAGE", "TOOL", "REPLY"] },
            "status": { "enum": ["pending", "running", "done", "failed", "blocked"] },
            "flow_id": { "type": "string", "minLength": 1 },
            "event": {
                "type": "object",
                "required": ["type"],
                "properties": {
                    "type": { "type": "string", "minLength": 1 },
                    "event_id": { "type": "string" },
                    "thread_id": { "type": "string" },
                    "content": { "type": "string" },
                    "actor": { "type": "string" },
                    "timestamp": { "type": "integer" },
                    "features": { "type": "object" }
                },
                "additionalProperties": false
            },
            "metadata": {
                "type": "object",
                "required": ["created_at", "updated_at", "kind"],
                "properties": {
                    "created_at": { "type": "integer" },
                    "updated_at": { "type": "integer" },
                    "kind": { "enum": ["TRIAGE", "TOOL", "REPLY"] }
                }
            },
            "derived": { "type": "object" },
            "outputs": { "type": "object" },
            "attempts": { "type": "integer" },
            "trace": { "type": "array" }
        },
        "additionalProperties": false
    })
}

/// Schema for fill payloads completing a ticket.
fn ticket_complete_schema() -> Value {
    json!({
        "type": "object",
        "required": ["outputs"],
        "properties": {
            "outputs": { "type": "object" },
            "by": { "type": "string", "minLength": 1 },
            "lease_owner": { "type": "string" },
            "lease_token": { "type": "string" }
        },
        "additionalProperties": false
    })
}

/// Schema for derived child tickets before insertion.
fn ticket_derive_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id", "ticket_id", "kind", "status", "flow_id", "event", "metadata"],
        "properties": {
            "id": { "type": "string", "minLength": 1 },
            "ticket_id": { "type": "string", "minLength": 1 },
            "kind": { "enum": ["TOOL", "REPLY"] },
            "status": { "enum": ["pending"] },
            "flow_id": { "type": "string", "minLength": 1 },
            "event": { "type": "object", "required": ["type"] },
            "metadata": {
                "type": "object",
                "required": ["created_at", "updated_at", "kind"],
                "properties": {
                    "created_at": { "type": "integer" },
                    "updated_at": { "type": "integer" },
                    "kind": { "enum": ["TOOL", "REPLY"] },
                    "tool_input": {
                        "type": "object",
                        "properties": {
                            "tool_steps": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "required": ["server", "tool"],
                                    "properties": {
                                        "server": { "type": "string", "minLength": 1 },
                                        "tool": { "type": "string", "minLength": 1 },
                                        "args": { "type": "object" }
                                    },
                                    "additionalProperties": false
                                }
                            },
                            "budget": { "type": "object" }
                        },
                        "additionalProperties": false
                    }
                }
            },
            "derived": { "type": "object" },
            "outputs": { "type": "object" },
            "attempts": { "type": "integer" },
            "trace": { "type": "array" }
        },
        "additionalProperties": false
    })
}
