// crates/conveyor-core/src/runtime/audit.rs
// ============================================================================
// Module: Conveyor Audit Logging
// Description: Structured audit events for pipeline decisions.
// Purpose: Emit low-cardinality audit records without hard dependencies.
// Dependencies: crate::core, serde, serde_json
// ============================================================================

//! ## Overview
//! This module defines audit event payloads and sinks for pipeline logging.
//! It is intentionally lightweight so deployments can route events to their
//! preferred logging pipeline without redesign. Audit payloads carry labels
//! and identifiers, never raw event content.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;

use crate::core::Timestamp;

// ============================================================================
// SECTION: Events
// ============================================================================

/// Audit event payload for pipeline decisions.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Stable event label (for example `derive`, `schema_gate`).
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: i64,
    /// Human-readable single-line message.
    pub message: String,
    /// Structured context fields.
    #[serde(skip_serializing_if = "Value::is_null")]
    pub context: Value,
}

impl AuditEvent {
    /// Creates an audit event at the given instant.
    #[must_use]
    pub const fn new(event: &'static str, at: Timestamp, message: String, context: Value) -> Self {
        Self {
            event,
            timestamp_ms: at.as_unix_millis(),
            message,
            context,
        }
    }
}

// ============================================================================
// SECTION: Sink Trait
// ============================================================================

/// Audit sink for pipeline events.
pub trait AuditSink: Send + Sync {
    /// Records a single audit event.
    fn record(&self, event: &AuditEvent);
}

// ============================================================================
// SECTION: Sink Implementations
// ============================================================================

/// Audit sink that discards all events.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &AuditEvent) {}
}

/// Audit sink that writes JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &AuditEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{line}");
        }
    }
}

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    /// Open append handle guarded for concurrent writers.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens (or creates) the audit file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &AuditEvent) {
        let Ok(line) = serde_json::to_string(event) else {
            return;
        };
        if let Ok(mut guard) = self.file.lock() {
            let _ = writeln!(guard, "{line}");
        }
    }
}
