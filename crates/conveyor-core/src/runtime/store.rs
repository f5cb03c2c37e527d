// crates/conveyor-core/src/runtime/store.rs
// ============================================================================
// Module: Conveyor Ticket Store
// Description: Durable append-only ticket log with an in-memory index.
// Purpose: Sole writer of canonical ticket fields, including tool verdicts.
// Dependencies: crate::core, crate::interfaces, crate::runtime::{audit,
//               schema_gate}, serde_json
// ============================================================================

//! ## Overview
//! The ticket store owns every canonical ticket mutation. State lives in an
//! in-memory index rebuilt from a line-oriented append-only log; every write
//! serializes the post-mutation record and appends it inside the same short
//! critical section as the index update (lookup + mutate + append). Reads
//! clone point-in-time snapshots. Canonical `outputs.tool_verdict` is written
//! exclusively by [`TicketStore::finalize`]; a source-scan guard test rejects
//! any other write site.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::core::IngressEvent;
use crate::core::LeaseOwner;
use crate::core::LeaseToken;
use crate::core::StableCode;
use crate::core::TRACE_LEASE_EXPIRED;
use crate::core::Ticket;
use crate::core::TicketId;
use crate::core::TicketKind;
use crate::core::TicketOutputs;
use crate::core::TicketStatus;
use crate::core::TicketTraceEvent;
use crate::core::Timestamp;
use crate::core::ToolVerdict;
use crate::core::ticket::FLOW_TRIAGE;
use crate::interfaces::Clock;
use crate::interfaces::TicketLogError;
use crate::interfaces::TicketLogSink;
use crate::runtime::audit::AuditEvent;
use crate::runtime::audit::AuditSink;
use crate::runtime::schema_gate::GateDirection;
use crate::runtime::schema_gate::GateReport;
use crate::runtime::schema_gate::SchemaBoundary;
use crate::runtime::schema_gate::SchemaGate;

// ============================================================================
// SECTION: Log Sinks
// ============================================================================

/// File-backed append-only ticket log.
pub struct FileTicketLog {
    /// Log file path.
    path: PathBuf,
    /// Append handle guarded for concurrent writers.
    file: Mutex<std::fs::File>,
}

impl FileTicketLog {
    /// Opens (or creates) the log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns [`TicketLogError::Io`] when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, TicketLogError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(|err| TicketLogError::Io(err.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }
}

impl TicketLogSink for FileTicketLog {
    fn append(&self, line: &str) -> Result<(), TicketLogError> {
        let mut guard =
            self.file.lock().map_err(|_| TicketLogError::Io("log mutex poisoned".to_string()))?;
        writeln!(guard, "{line}").map_err(|err| TicketLogError::Io(err.to_string()))
    }

    fn load(&self) -> Result<Vec<String>, TicketLogError> {
        let mut contents = String::new();
        let mut file = std::fs::File::open(&self.path)
            .map_err(|err| TicketLogError::Io(err.to_string()))?;
        file.read_to_string(&mut contents).map_err(|err| TicketLogError::Io(err.to_string()))?;
        Ok(contents.lines().map(str::to_string).collect())
    }
}

/// In-memory ticket log for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryTicketLog {
    /// Appended lines in order.
    lines: Mutex<Vec<String>>,
}

impl MemoryTicketLog {
    /// Creates an empty in-memory log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TicketLogSink for MemoryTicketLog {
    fn append(&self, line: &str) -> Result<(), TicketLogError> {
        self.lines
            .lock()
            .map_err(|_| TicketLogError::Io("log mutex poisoned".to_string()))?
            .push(line.to_string());
        Ok(())
    }

    fn load(&self) -> Result<Vec<String>, TicketLogError> {
        Ok(self.lines.lock().map_or_else(|_| Vec::new(), |guard| guard.clone()))
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Ticket store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Ticket does not exist.
    #[error("ticket not found: {0}")]
    NotFound(TicketId),
    /// Ticket is not pending; a concurrent lease won the race.
    #[error("lease conflict on ticket {0}")]
    LeaseConflict(TicketId),
    /// Presented lease does not match the active lease.
    #[error("lease owner mismatch on ticket {0}")]
    LeaseOwnerMismatch(TicketId),
    /// Attempted mutation of a terminal ticket.
    #[error("ticket {id} is terminal ({status})")]
    TerminalImmutable {
        /// Ticket identifier.
        id: TicketId,
        /// Terminal status of the ticket.
        status: TicketStatus,
    },
    /// A derivation back-reference was already set to a different child.
    #[error("derived.{field} already set on ticket {id}")]
    DerivedAlreadySet {
        /// Parent ticket identifier.
        id: TicketId,
        /// Back-reference field name.
        field: &'static str,
    },
    /// Schema gate rejected the write.
    #[error("schema gate rejected write ({} violations)", .0.warn_count)]
    SchemaRejected(GateReport),
    /// Durable log failure.
    #[error(transparent)]
    Log(#[from] TicketLogError),
    /// Record serialization failure.
    #[error("ticket serialization failed: {0}")]
    Serialization(String),
    /// Store mutex poisoned by a panicking writer.
    #[error("ticket store mutex poisoned")]
    Poisoned,
}

impl StoreError {
    /// Returns the stable code for lease errors, when applicable.
    #[must_use]
    pub const fn stable_code(&self) -> Option<StableCode> {
        match self {
            Self::LeaseConflict(_) => Some(StableCode::LeaseConflict),
            Self::LeaseOwnerMismatch(_) => Some(StableCode::LeaseOwnerMismatch),
            Self::SchemaRejected(_) => Some(StableCode::SchemaValidationFailed),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Filters and Records
// ============================================================================

/// Filter for ticket listings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TicketFilter {
    /// Restrict to one kind.
    pub kind: Option<TicketKind>,
    /// Restrict to one status.
    pub status: Option<TicketStatus>,
    /// Restrict to children of one parent.
    pub parent_ticket_id: Option<TicketId>,
    /// Maximum number of rows to return.
    pub limit: Option<usize>,
}

/// One line of the durable ticket log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LogRecord {
    /// Record timestamp.
    at: Timestamp,
    /// Full post-mutation ticket snapshot.
    ticket: Ticket,
}

/// Index state guarded by the store mutex.
struct StoreInner {
    /// Tickets keyed by id.
    index: BTreeMap<String, Ticket>,
    /// Ticket ids in first-seen arrival order.
    arrival: Vec<TicketId>,
}

// ============================================================================
// SECTION: Ticket Store
// ============================================================================

/// Durable ticket store and sole writer of canonical ticket fields.
pub struct TicketStore {
    /// Index and arrival order under one short-critical-section mutex.
    inner: Mutex<StoreInner>,
    /// Durable append-only log.
    log: Arc<dyn TicketLogSink>,
    /// Schema gate applied to every write boundary.
    gate: Arc<SchemaGate>,
    /// Audit sink for lifecycle events.
    audit: Arc<dyn AuditSink>,
    /// Injected time source.
    clock: Arc<dyn Clock>,
}

impl TicketStore {
    /// Opens a store, replaying the durable log into the index.
    ///
    /// Replay is last-record-wins per ticket id; arrival order is first-seen
    /// order. Legacy status spellings are projected during deserialization.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Log`] when the log cannot be read or contains a
    /// corrupt line.
    pub fn open(
        log: Arc<dyn TicketLogSink>,
        gate: Arc<SchemaGate>,
        audit: Arc<dyn AuditSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let mut index: BTreeMap<String, Ticket> = BTreeMap::new();
        let mut arrival: Vec<TicketId> = Vec::new();
        for (line_no, line) in log.load()?.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: LogRecord =
                serde_json::from_str(line).map_err(|err| TicketLogError::Corrupt {
                    line: line_no + 1,
                    detail: err.to_string(),
                })?;
            let id = record.ticket.id.clone();
            if !index.contains_key(id.as_str()) {
                arrival.push(id.clone());
            }
            index.insert(id.as_str().to_string(), record.ticket);
        }
        Ok(Self {
            inner: Mutex::new(StoreInner {
                index,
                arrival,
            }),
            log,
            gate,
            audit,
            clock,
        })
    }

    /// Creates a TRIAGE ticket from an ingress event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SchemaRejected`] on a strict-ingress gate
    /// rejection and [`StoreError::Log`] on durable-log failure.
    pub fn create_ingress(&self, event: IngressEvent) -> Result<Ticket, StoreError> {
        self.create_ingress_checked(event, None)
    }

    /// Creates a TRIAGE ticket, gating the raw ingress payload when provided.
    ///
    /// Typed parsing drops undeclared event fields, so the ingress boundary
    /// validates the payload as received; in warn mode the undeclared fields
    /// are recorded and dropped, in strict mode the create is rejected.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SchemaRejected`] on a strict-ingress gate
    /// rejection and [`StoreError::Log`] on durable-log failure.
    pub fn create_ingress_checked(
        &self,
        event: IngressEvent,
        raw_event: Option<&Value>,
    ) -> Result<Ticket, StoreError> {
        let now = self.clock.now();
        let ticket = Ticket::new(TicketKind::Triage, FLOW_TRIAGE.into(), event, now);
        let mut payload = serde_json::to_value(&ticket)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        if let (Some(raw), Some(slot)) = (raw_event, payload.get_mut("event")) {
            *slot = raw.clone();
        }
        let report = self.gate.check(SchemaBoundary::TicketCreate, GateDirection::Ingress, &payload, now);
        if !report.ok {
            return Err(StoreError::SchemaRejected(report));
        }
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Self::commit(&*self.log, &mut guard, ticket.clone(), now)?;
        Ok(ticket)
    }

    /// Inserts a derivation-produced ticket.
    ///
    /// The derivation engine validates the candidate at `TICKET_DERIVE`
    /// before calling this; the store re-gates at `TICKET_CREATE` internal so
    /// no writer can bypass the boundary.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SchemaRejected`] on a strict gate rejection and
    /// [`StoreError::Log`] on durable-log failure.
    pub fn create_derived(&self, ticket: Ticket) -> Result<Ticket, StoreError> {
        self.insert_new(ticket, GateDirection::Internal)
    }

    /// Returns a point-in-time clone of one ticket.
    #[must_use]
    pub fn get(&self, id: &TicketId) -> Option<Ticket> {
        self.inner.lock().ok().and_then(|guard| guard.index.get(id.as_str()).cloned())
    }

    /// Lists tickets in arrival order, applying the filter.
    #[must_use]
    pub fn list(&self, filter: &TicketFilter) -> Vec<Ticket> {
        let Ok(guard) = self.inner.lock() else {
            return Vec::new();
        };
        let mut rows = Vec::new();
        for id in &guard.arrival {
            let Some(ticket) = guard.index.get(id.as_str()) else {
                continue;
            };
            if filter.kind.is_some_and(|kind| ticket.kind != kind) {
                continue;
            }
            if filter.status.is_some_and(|status| ticket.status != status) {
                continue;
            }
            if let Some(parent) = &filter.parent_ticket_id
                && ticket.metadata.parent_ticket_id.as_ref() != Some(parent)
            {
                continue;
            }
            rows.push(ticket.clone());
            if filter.limit.is_some_and(|limit| rows.len() >= limit) {
                break;
            }
        }
        rows
    }

    /// Leases one specific pending ticket for the given owner.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LeaseConflict`] when the ticket is not pending,
    /// so exactly one of any set of concurrent callers wins.
    pub fn lease_one(
        &self,
        id: &TicketId,
        owner: LeaseOwner,
        lease_sec: i64,
    ) -> Result<Ticket, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let ticket = guard.index.get(id.as_str()).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if ticket.status != TicketStatus::Pending {
            return Err(StoreError::LeaseConflict(id.clone()));
        }
        let mut leased = ticket.clone();
        stamp_lease(&mut leased, owner, lease_sec, now);
        Self::commit(&*self.log, &mut guard, leased.clone(), now)?;
        Ok(leased)
    }

    /// Atomically leases up to `limit` pending tickets of one kind.
    ///
    /// Selection is first-come with `created_at` ascending tie-breaking.
    /// When `capabilities` is present, TOOL tickets qualify only if every
    /// step's server is within the worker's capability set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Log`] when a selected ticket cannot be
    /// committed; earlier selections in the batch remain leased.
    pub fn lease_batch(
        &self,
        kind: TicketKind,
        limit: usize,
        lease_sec: i64,
        capabilities: Option<&BTreeSet<String>>,
    ) -> Result<Vec<Ticket>, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let mut candidates: Vec<(Timestamp, TicketId)> = Vec::new();
        for id in &guard.arrival {
            let Some(ticket) = guard.index.get(id.as_str()) else {
                continue;
            };
            if ticket.kind != kind || ticket.status != TicketStatus::Pending {
                continue;
            }
            if !capability_match(ticket, capabilities) {
                continue;
            }
            candidates.push((ticket.metadata.created_at, id.clone()));
        }
        // Arrival order is first-come; the stable sort lets created_at break
        // ties introduced by log replay.
        candidates.sort_by(|a, b| a.0.cmp(&b.0));

        let mut batch = Vec::new();
        for (_, id) in candidates.into_iter().take(limit) {
            let Some(ticket) = guard.index.get(id.as_str()) else {
                continue;
            };
            let mut leased = ticket.clone();
            stamp_lease(&mut leased, LeaseOwner::generate(), lease_sec, now);
            Self::commit(&*self.log, &mut guard, leased.clone(), now)?;
            batch.push(leased);
        }
        Ok(batch)
    }

    /// Applies a caller mutation to a ticket under an active lease.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LeaseOwnerMismatch`] when the lease does not
    /// match, [`StoreError::TerminalImmutable`] for terminal tickets, and
    /// [`StoreError::Log`] on durable-log failure.
    pub fn update_under_lease(
        &self,
        id: &TicketId,
        owner: &LeaseOwner,
        token: &LeaseToken,
        mutate: impl FnOnce(&mut Ticket),
    ) -> Result<Ticket, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let ticket = guard.index.get(id.as_str()).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if ticket.is_terminal() {
            return Err(StoreError::TerminalImmutable {
                id: id.clone(),
                status: ticket.status,
            });
        }
        if !ticket.lease_matches(owner, token) {
            return Err(StoreError::LeaseOwnerMismatch(id.clone()));
        }
        let mut updated = ticket.clone();
        mutate(&mut updated);
        // The mutation hook may not touch identity, kind, or canonical
        // outputs; restore them unconditionally.
        updated.id = ticket.id.clone();
        updated.ticket_id = ticket.ticket_id.clone();
        updated.kind = ticket.kind;
        updated.status = ticket.status;
        updated.outputs = ticket.outputs.clone();
        updated.derived = ticket.derived.clone();
        Self::commit(&*self.log, &mut guard, updated.clone(), now)?;
        Ok(updated)
    }

    /// Releases a lease, returning the ticket to pending.
    ///
    /// Terminal tickets release as an idempotent no-op so a runner that
    /// finalized cannot race its own cleanup.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LeaseOwnerMismatch`] when the lease does not
    /// match and [`StoreError::Log`] on durable-log failure.
    pub fn release(
        &self,
        id: &TicketId,
        owner: &LeaseOwner,
        token: &LeaseToken,
    ) -> Result<Ticket, StoreError> {
        self.unlease(id, owner, token, false)
    }

    /// Nacks a leased ticket back to pending and bumps its attempt counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::LeaseOwnerMismatch`] when the lease does not
    /// match and [`StoreError::Log`] on durable-log failure.
    pub fn nack(
        &self,
        id: &TicketId,
        owner: &LeaseOwner,
        token: &LeaseToken,
    ) -> Result<Ticket, StoreError> {
        self.unlease(id, owner, token, true)
    }

    /// Finalizes a ticket into a terminal status with its outputs projection.
    ///
    /// This is the only write site for `outputs.tool_verdict`: TOOL tickets
    /// without an explicit verdict are stamped `UNKNOWN`, and non-TOOL
    /// projections have any verdict stripped. Lease fields are cleared and
    /// `annotations` are merged into `metadata.final_outputs`. Finalizing an
    /// already-terminal ticket is an idempotent no-op returning the current
    /// record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SchemaRejected`] on a strict gate rejection and
    /// [`StoreError::Log`] on durable-log failure.
    pub fn finalize(
        &self,
        id: &TicketId,
        terminal: TicketStatus,
        mut projection: TicketOutputs,
        annotations: BTreeMap<String, Value>,
    ) -> Result<Ticket, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let ticket = guard.index.get(id.as_str()).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if ticket.is_terminal() {
            return Ok(ticket.clone());
        }
        if !terminal.is_terminal() {
            return Err(StoreError::TerminalImmutable {
                id: id.clone(),
                status: terminal,
            });
        }

        if ticket.kind == TicketKind::Tool {
            if projection.tool_verdict.is_none() {
                projection.tool_verdict = Some(ToolVerdict::Unknown);
            }
        } else {
            projection.tool_verdict = None;
        }

        let payload = json!({ "outputs": projection });
        let report =
            self.gate.check(SchemaBoundary::TicketComplete, GateDirection::Internal, &payload, now);
        if !report.ok {
            return Err(StoreError::SchemaRejected(report));
        }

        let mut updated = ticket.clone();
        updated.status = terminal;
        updated.outputs = projection;
        clear_lease(&mut updated);
        for (key, value) in annotations {
            updated.metadata.final_outputs.insert(key, value);
        }
        Self::commit(&*self.log, &mut guard, updated.clone(), now)?;
        Ok(updated)
    }

    /// Resets expired leases to pending and records a trace event per ticket.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Log`] when a reclaimed ticket cannot be
    /// committed; earlier reclamations stick.
    pub fn reclaim_expired(&self) -> Result<Vec<TicketId>, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let expired: Vec<TicketId> = guard
            .index
            .values()
            .filter(|ticket| {
                ticket.status == TicketStatus::Running
                    && ticket.metadata.lease_expires.is_some_and(|expires| expires < now)
            })
            .map(|ticket| ticket.id.clone())
            .collect();
        let mut reclaimed = Vec::new();
        for id in expired {
            let Some(ticket) = guard.index.get(id.as_str()) else {
                continue;
            };
            let mut updated = ticket.clone();
            updated.status = TicketStatus::Pending;
            clear_lease(&mut updated);
            updated.trace.push(TicketTraceEvent {
                event: TRACE_LEASE_EXPIRED.to_string(),
                at: now,
            });
            Self::commit(&*self.log, &mut guard, updated, now)?;
            self.audit.record(&AuditEvent::new(
                "lease_expired",
                now,
                format!("[lease] expired ticket={id}"),
                json!({ "ticket_id": id.as_str() }),
            ));
            reclaimed.push(id);
        }
        Ok(reclaimed)
    }

    /// Writes the TRIAGE→TOOL back-reference, at most once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DerivedAlreadySet`] when a different child is
    /// already referenced and [`StoreError::Log`] on durable-log failure.
    pub fn set_derived_tool(
        &self,
        parent: &TicketId,
        child: &TicketId,
    ) -> Result<Ticket, StoreError> {
        self.set_derived(parent, child, "tool_ticket_id")
    }

    /// Writes the TOOL→REPLY back-reference, at most once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DerivedAlreadySet`] when a different child is
    /// already referenced and [`StoreError::Log`] on durable-log failure.
    pub fn set_derived_reply(
        &self,
        parent: &TicketId,
        child: &TicketId,
    ) -> Result<Ticket, StoreError> {
        self.set_derived(parent, child, "reply_ticket_id")
    }

    /// Marks a ticket as adopted through orphan recovery.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown tickets and
    /// [`StoreError::Log`] on durable-log failure.
    pub fn mark_recovered(&self, id: &TicketId) -> Result<Ticket, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let ticket = guard.index.get(id.as_str()).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if ticket.metadata.recovered {
            return Ok(ticket.clone());
        }
        let mut updated = ticket.clone();
        updated.metadata.recovered = true;
        Self::commit(&*self.log, &mut guard, updated.clone(), now)?;
        Ok(updated)
    }

    /// Gate-checks and inserts a new ticket record.
    fn insert_new(&self, ticket: Ticket, direction: GateDirection) -> Result<Ticket, StoreError> {
        let now = self.clock.now();
        let payload = serde_json::to_value(&ticket)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        let report = self.gate.check(SchemaBoundary::TicketCreate, direction, &payload, now);
        if !report.ok {
            return Err(StoreError::SchemaRejected(report));
        }
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Self::commit(&*self.log, &mut guard, ticket.clone(), now)?;
        Ok(ticket)
    }

    /// Shared release/nack transition.
    fn unlease(
        &self,
        id: &TicketId,
        owner: &LeaseOwner,
        token: &LeaseToken,
        count_attempt: bool,
    ) -> Result<Ticket, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let ticket = guard.index.get(id.as_str()).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if ticket.is_terminal() {
            return Ok(ticket.clone());
        }
        if !ticket.lease_matches(owner, token) {
            return Err(StoreError::LeaseOwnerMismatch(id.clone()));
        }
        let mut updated = ticket.clone();
        updated.status = TicketStatus::Pending;
        clear_lease(&mut updated);
        if count_attempt {
            updated.attempts = updated.attempts.saturating_add(1);
        }
        Self::commit(&*self.log, &mut guard, updated.clone(), now)?;
        Ok(updated)
    }

    /// Shared at-most-once derived back-reference write.
    fn set_derived(
        &self,
        parent: &TicketId,
        child: &TicketId,
        field: &'static str,
    ) -> Result<Ticket, StoreError> {
        let now = self.clock.now();
        let mut guard = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        let ticket =
            guard.index.get(parent.as_str()).ok_or_else(|| StoreError::NotFound(parent.clone()))?;
        let slot = if field == "tool_ticket_id" {
            &ticket.derived.tool_ticket_id
        } else {
            &ticket.derived.reply_ticket_id
        };
        if let Some(existing) = slot {
            if existing == child {
                return Ok(ticket.clone());
            }
            return Err(StoreError::DerivedAlreadySet {
                id: parent.clone(),
                field,
            });
        }
        let mut updated = ticket.clone();
        if field == "tool_ticket_id" {
            updated.derived.tool_ticket_id = Some(child.clone());
        } else {
            updated.derived.reply_ticket_id = Some(child.clone());
        }
        Self::commit(&*self.log, &mut guard, updated.clone(), now)?;
        Ok(updated)
    }

    /// Serializes, appends, and indexes a post-mutation record.
    ///
    /// Runs inside the caller's critical section. Serialization and append
    /// happen before the index update so a durable-log failure leaves memory
    /// unchanged.
    fn commit(
        log: &dyn TicketLogSink,
        guard: &mut StoreInner,
        mut ticket: Ticket,
        now: Timestamp,
    ) -> Result<(), StoreError> {
        ticket.metadata.updated_at = now;
        let record = LogRecord {
            at: now,
            ticket,
        };
        let line = serde_json::to_string(&record)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        log.append(&line)?;
        let id = record.ticket.id.clone();
        if !guard.index.contains_key(id.as_str()) {
            guard.arrival.push(id.clone());
        }
        guard.index.insert(id.as_str().to_string(), record.ticket);
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Stamps fresh lease fields onto a ticket and marks it running.
fn stamp_lease(ticket: &mut Ticket, owner: LeaseOwner, lease_sec: i64, now: Timestamp) {
    ticket.status = TicketStatus::Running;
    ticket.metadata.lease_owner = Some(owner);
    ticket.metadata.lease_token = Some(LeaseToken::generate());
    ticket.metadata.lease_expires = Some(now.plus_seconds(lease_sec));
}

/// Clears all lease fields from a ticket.
fn clear_lease(ticket: &mut Ticket) {
    ticket.metadata.lease_owner = None;
    ticket.metadata.lease_token = None;
    ticket.metadata.lease_expires = None;
}

/// Returns true when a ticket matches a worker capability set.
fn capability_match(ticket: &Ticket, capabilities: Option<&BTreeSet<String>>) -> bool {
    let Some(capabilities) = capabilities else {
        return true;
    };
    if ticket.kind != TicketKind::Tool {
        return true;
    }
    ticket
        .metadata
        .tool_input
        .tool_steps
        .iter()
        .all(|step| capabilities.contains(&step.server))
}
