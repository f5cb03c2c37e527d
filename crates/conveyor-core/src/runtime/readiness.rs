// crates/conveyor-core/src/runtime/readiness.rs
// ============================================================================
// Module: Conveyor Readiness Registry
// Description: Per-dependency readiness tracking and gating.
// Purpose: Prevent accepting work the process cannot honor.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! The readiness registry tracks one `{ready, code, detail}` row per external
//! dependency and gates dependency-sensitive entry points. Required keys are
//! always passed in by callers; no route hard-codes its dependency list. The
//! tool-to-dependency resolver falls back to the conservative union of all
//! required dependencies for unknown tools, so an unrecognized tool can never
//! slip past the gate.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::DepCode;
use crate::core::DepKey;
use crate::core::StableCode;
use crate::core::Timestamp;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Stable prefix for the single-line readiness snapshot emitted at startup.
pub const READINESS_SNAPSHOT_PREFIX: &str = "[readiness_snapshot]";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Readiness state for one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepState {
    /// Whether the dependency is usable.
    pub ready: bool,
    /// Stable readiness code.
    pub code: DepCode,
    /// Optional operator-facing detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DepState {
    /// Creates a ready state.
    #[must_use]
    pub const fn ready() -> Self {
        Self {
            ready: true,
            code: DepCode::Ok,
            detail: None,
        }
    }

    /// Creates an unready state with the given code and detail.
    #[must_use]
    pub const fn unready(code: DepCode, detail: Option<String>) -> Self {
        Self {
            ready: false,
            code,
            detail,
        }
    }
}

/// One row of a readiness snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessRow {
    /// Dependency key.
    pub dep: DepKey,
    /// Whether the dependency is usable.
    pub ready: bool,
    /// Stable readiness code.
    pub code: DepCode,
    /// Optional operator-facing detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Point-in-time readiness snapshot with stable row ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessSnapshot {
    /// RFC 3339 snapshot time.
    pub as_of: String,
    /// Whether every required dependency is ready.
    pub all_required_ready: bool,
    /// Required dependency keys, sorted.
    pub required: Vec<DepKey>,
    /// Dependency rows sorted by key.
    pub deps: Vec<ReadinessRow>,
}

/// Readiness gating errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    /// One or more required dependencies are unavailable.
    #[error("required dependencies unavailable: {}", missing_required.join(", "))]
    RequiredUnavailable {
        /// Missing required dependency keys, sorted.
        missing_required: Vec<String>,
    },
}

impl ReadinessError {
    /// Returns the stable code for this error.
    #[must_use]
    pub const fn code(&self) -> StableCode {
        match self {
            Self::RequiredUnavailable {
                ..
            } => StableCode::McpRequiredUnavailable,
        }
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Registry of per-dependency readiness states.
///
/// # Invariants
/// - `required` is non-empty; an empty configuration falls back to the full
///   dependency table so the unknown-tool resolver can never return an empty
///   set.
pub struct ReadinessRegistry {
    /// Required dependency keys for this deployment.
    required: BTreeSet<DepKey>,
    /// Per-dependency state rows.
    states: Mutex<BTreeMap<DepKey, DepState>>,
}

impl ReadinessRegistry {
    /// Dependency keys known to the fixed tool table.
    const KNOWN_DEPS: [&'static str; 3] = ["memory", "notebooklm", "web_search"];

    /// Creates a registry with the given required dependency keys.
    ///
    /// Every required key starts unready with `DEP_INIT_FAILED` until a
    /// startup probe or provider bootstrap marks it ready.
    #[must_use]
    pub fn new(required: BTreeSet<DepKey>) -> Self {
        let required = if required.is_empty() {
            Self::KNOWN_DEPS.iter().map(|key| DepKey::new(*key)).collect()
        } else {
            required
        };
        let states = required
            .iter()
            .map(|key| {
                (key.clone(), DepState::unready(DepCode::DepInitFailed, None))
            })
            .collect();
        Self {
            required,
            states: Mutex::new(states),
        }
    }

    /// Marks a dependency ready.
    pub fn set_ready(&self, dep: DepKey) {
        if let Ok(mut guard) = self.states.lock() {
            guard.insert(dep, DepState::ready());
        }
    }

    /// Marks a dependency unready with the given code and detail.
    pub fn set_unready(&self, dep: DepKey, code: DepCode, detail: Option<String>) {
        if let Ok(mut guard) = self.states.lock() {
            guard.insert(dep, DepState::unready(code, detail));
        }
    }

    /// Returns the state of one dependency, if tracked.
    #[must_use]
    pub fn get(&self, dep: &DepKey) -> Option<DepState> {
        self.states.lock().ok().and_then(|guard| guard.get(dep).cloned())
    }

    /// Returns the sorted required dependency keys.
    #[must_use]
    pub fn required(&self) -> Vec<DepKey> {
        self.required.iter().cloned().collect()
    }

    /// Fails when any of the given dependency keys is not ready.
    ///
    /// The key list is always a parameter; routes never hard-code their
    /// dependency sets here.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError::RequiredUnavailable`] listing the missing
    /// keys, sorted.
    pub fn require_deps(&self, deps: &[DepKey]) -> Result<(), ReadinessError> {
        let guard = match self.states.lock() {
            Ok(guard) => guard,
            Err(_) => {
                // Poisoned state gates closed: report everything missing.
                return Err(ReadinessError::RequiredUnavailable {
                    missing_required: deps.iter().map(|dep| dep.as_str().to_string()).collect(),
                });
            }
        };
        let mut missing: Vec<String> = deps
            .iter()
            .filter(|dep| !guard.get(*dep).is_some_and(|state| state.ready))
            .map(|dep| dep.as_str().to_string())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort_unstable();
        missing.dedup();
        Err(ReadinessError::RequiredUnavailable {
            missing_required: missing,
        })
    }

    /// Resolves the dependency keys a tool requires.
    ///
    /// Unknown tools resolve to the conservative union of all required
    /// dependencies; the result is never empty.
    #[must_use]
    pub fn deps_for_tool(&self, tool_name: &str) -> BTreeSet<DepKey> {
        match tool_name {
            "search_nodes" | "open_nodes" | "create_entities" | "add_observations"
            | "delete_entities" => [DepKey::new("memory")].into_iter().collect(),
            "web_search" | "web_fetch" => [DepKey::new("web_search")].into_iter().collect(),
            "notebooklm_query" | "notebooklm_list" => {
                [DepKey::new("notebooklm")].into_iter().collect()
            }
            _ => self.required.clone(),
        }
    }

    /// Builds a point-in-time snapshot with stable ordering.
    #[must_use]
    pub fn snapshot(&self, now: Timestamp) -> ReadinessSnapshot {
        let deps: Vec<ReadinessRow> = self.states.lock().map_or_else(
            |_| Vec::new(),
            |guard| {
                guard
                    .iter()
                    .map(|(dep, state)| ReadinessRow {
                        dep: dep.clone(),
                        ready: state.ready,
                        code: state.code,
                        detail: state.detail.clone(),
                    })
                    .collect()
            },
        );
        let all_required_ready = {
            let ready_keys: BTreeSet<&str> = deps
                .iter()
                .filter(|row| row.ready)
                .map(|row| row.dep.as_str())
                .collect();
            self.required.iter().all(|dep| ready_keys.contains(dep.as_str()))
        };
        ReadinessSnapshot {
            as_of: now.to_rfc3339(),
            all_required_ready,
            required: self.required(),
            deps,
        }
    }

    /// Renders the single-line snapshot emitted before a strict-init exit.
    #[must_use]
    pub fn snapshot_line(&self, now: Timestamp) -> String {
        let snapshot = self.snapshot(now);
        let body = serde_json::to_string(&snapshot)
            .unwrap_or_else(|_| "{\"error\":\"snapshot_unserializable\"}".to_string());
        format!("{READINESS_SNAPSHOT_PREFIX} {body}")
    }
}
