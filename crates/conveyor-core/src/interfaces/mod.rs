// crates/conveyor-core/src/interfaces/mod.rs
// ============================================================================
// Module: Conveyor Interfaces
// Description: Backend-agnostic interfaces for gateways, probes, and logs.
// Purpose: Define the contract surfaces used by the Conveyor runtime.
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Interfaces define how Conveyor integrates with external systems without
//! embedding backend-specific details. Implementations must be deterministic
//! and fail closed on missing or invalid data. The core never reads ambient
//! wall-clock time or spawns transports; hosts inject a [`Clock`], a
//! [`ToolGateway`], and a [`ProbeProvider`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::Timestamp;

// ============================================================================
// SECTION: Clock
// ============================================================================

/// Time source injected into runtime components.
pub trait Clock: Send + Sync {
    /// Returns the current timestamp.
    fn now(&self) -> Timestamp;
}

/// Wall-clock backed time source for production hosts.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX));
        Timestamp::from_unix_millis(millis)
    }
}

/// Manually advanced time source for tests and replay.
#[derive(Debug)]
pub struct ManualClock {
    /// Current time in unix milliseconds, guarded for shared advancement.
    now_ms: Mutex<i64>,
}

impl ManualClock {
    /// Creates a manual clock at the given unix-millisecond instant.
    #[must_use]
    pub const fn new(now_ms: i64) -> Self {
        Self {
            now_ms: Mutex::new(now_ms),
        }
    }

    /// Advances the clock by the given number of milliseconds.
    pub fn advance_millis(&self, delta_ms: i64) {
        if let Ok(mut guard) = self.now_ms.lock() {
            *guard = guard.saturating_add(delta_ms);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        let millis = self.now_ms.lock().map_or(0, |guard| *guard);
        Timestamp::from_unix_millis(millis)
    }
}

// ============================================================================
// SECTION: Tool Gateway
// ============================================================================

/// A single tool invocation handed to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name being invoked.
    pub tool_name: String,
    /// Scalar arguments for the call.
    pub args: BTreeMap<String, Value>,
}

/// Evidence candidate proposed by a gateway result.
///
/// # Invariants
/// - Candidates carry references, never payload blobs; the runner rejects
///   candidates with blob-ish fields before attaching them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceCandidate {
    /// Evidence kind label.
    pub kind: String,
    /// Reference to the evidence source (URI, node id, path).
    pub reference: String,
    /// Short human-readable summary.
    #[serde(default)]
    pub summary: String,
    /// Remaining candidate fields preserved for validation.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Successful gateway execution result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    /// Structured tool result.
    pub result: Value,
    /// Evidence candidates proposed for attachment.
    #[serde(default)]
    pub evidence_candidates: Vec<EvidenceCandidate>,
}

/// Gateway execution failure with the upstream error code.
///
/// The `code` is the raw upstream label (`timeout`, `unavailable`, or other);
/// mapping onto the stable taxonomy happens in the runner, at one site.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("gateway error {code}: {message}")]
pub struct GatewayError {
    /// Raw upstream error code.
    pub code: String,
    /// Upstream error message.
    pub message: String,
}

/// Backend-agnostic tool execution gateway.
pub trait ToolGateway: Send + Sync {
    /// Executes a tool call.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the downstream tool server fails.
    fn execute(&self, call: &ToolCall) -> Result<GatewayResponse, GatewayError>;
}

// ============================================================================
// SECTION: Probe Provider
// ============================================================================

/// Startup probe identifiers, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// Access to a protected resource must be denied.
    Security,
    /// Basic provider access exchange.
    Access,
    /// Search capability exchange.
    Search,
    /// Memory capability exchange.
    Memory,
}

impl ProbeKind {
    /// Returns the stable string form of the probe name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Access => "access",
            Self::Search => "search",
            Self::Memory => "memory",
        }
    }

    /// Fixed probe execution order.
    #[must_use]
    pub const fn ordered() -> [Self; 4] {
        [Self::Security, Self::Access, Self::Search, Self::Memory]
    }
}

/// Provider failure observed by a probe.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("provider failure {code}: {message}")]
pub struct ProviderFailure {
    /// Stable failure code.
    pub code: crate::core::StableCode,
    /// Provider-supplied detail message.
    pub message: String,
}

/// Provider abstraction probed at startup.
pub trait ProbeProvider: Send + Sync {
    /// Executes one probe exchange against the provider.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderFailure`] when the provider denies, lacks, or fails
    /// the probed capability. Probe interpretation (including the inverted
    /// `security` probe) is the probe runner's responsibility.
    fn probe(&self, probe: ProbeKind) -> Result<Value, ProviderFailure>;
}

// ============================================================================
// SECTION: Ticket Log Sink
// ============================================================================

/// Ticket log errors.
#[derive(Debug, Error)]
pub enum TicketLogError {
    /// Log I/O error.
    #[error("ticket log io error: {0}")]
    Io(String),
    /// Log contains a line that does not parse as a ticket record.
    #[error("ticket log corrupt line {line}: {detail}")]
    Corrupt {
        /// One-based line number of the corrupt record.
        line: usize,
        /// Parse failure detail.
        detail: String,
    },
}

/// Append-only sink for the durable ticket log.
pub trait TicketLogSink: Send + Sync {
    /// Appends one serialized ticket record line.
    ///
    /// # Errors
    ///
    /// Returns [`TicketLogError`] when the append fails.
    fn append(&self, line: &str) -> Result<(), TicketLogError>;

    /// Loads all previously appended lines in order.
    ///
    /// # Errors
    ///
    /// Returns [`TicketLogError`] when the log cannot be read.
    fn load(&self) -> Result<Vec<String>, TicketLogError>;
}
