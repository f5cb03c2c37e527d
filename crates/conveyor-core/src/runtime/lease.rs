// crates/conveyor-core/src/runtime/lease.rs
// ============================================================================
// Module: Conveyor Lease Scheduler
// Description: Batch lease selection with per-kind strategies.
// Purpose: Hand pending tickets to workers with exclusive, expiring leases.
// Dependencies: crate::core, crate::runtime::store
// ============================================================================

//! ## Overview
//! The lease scheduler sits in front of the ticket store and decides which
//! kind a kindless lease request is served from. Strategies advance across
//! lease calls, never within one: a round-robin rotation moves one position
//! per call and weighted credits are spent one per call. Atomicity and
//! conflict semantics live in the store; the scheduler only plans.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;

use crate::core::Ticket;
use crate::core::TicketId;
use crate::core::TicketKind;
use crate::runtime::store::StoreError;
use crate::runtime::store::TicketStore;

// ============================================================================
// SECTION: Strategy
// ============================================================================

/// Kind-selection strategy for kindless lease requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LeaseStrategy {
    /// Serve TRIAGE work first, then TOOL, then REPLY.
    TriageFirst,
    /// Serve REPLY work first, then TOOL, then TRIAGE.
    ReplyFirst,
    /// Rotate through the listed kinds, one position per call.
    RoundRobin {
        /// Kinds in rotation order.
        kinds: Vec<TicketKind>,
    },
    /// Spend per-kind credits, one per call, replenishing when exhausted.
    Weighted {
        /// Credit weights per kind; zero-weight kinds are never selected.
        weights: BTreeMap<TicketKind, u32>,
    },
}

impl Default for LeaseStrategy {
    fn default() -> Self {
        Self::TriageFirst
    }
}

/// Lease request submitted by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRequest {
    /// Explicit kind; when absent the strategy selects one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TicketKind>,
    /// Maximum batch size.
    pub limit: usize,
    /// Lease duration in seconds.
    pub lease_sec: i64,
    /// Worker capability set (tool server names).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<BTreeSet<String>>,
}

/// Cross-call rotation state for strategies.
struct RotationState {
    /// Next round-robin position.
    next_index: usize,
    /// Remaining weighted credits per kind.
    credits: BTreeMap<TicketKind, u32>,
}

// ============================================================================
// SECTION: Scheduler
// ============================================================================

/// Lease scheduler applying a per-kind selection strategy across calls.
pub struct LeaseScheduler {
    /// Backing ticket store.
    store: Arc<TicketStore>,
    /// Configured selection strategy.
    strategy: LeaseStrategy,
    /// Strategy rotation state.
    rotation: Mutex<RotationState>,
}

impl LeaseScheduler {
    /// Creates a scheduler over the given store.
    #[must_use]
    pub fn new(store: Arc<TicketStore>, strategy: LeaseStrategy) -> Self {
        let credits = match &strategy {
            LeaseStrategy::Weighted {
                weights,
            } => weights.clone(),
            _ => BTreeMap::new(),
        };
        Self {
            store,
            strategy,
            rotation: Mutex::new(RotationState {
                next_index: 0,
                credits,
            }),
        }
    }

    /// Serves a lease request, selecting a kind when none is given.
    ///
    /// An empty batch is a normal outcome when no pending ticket matches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot commit the batch.
    pub fn lease(&self, request: &LeaseRequest) -> Result<Vec<Ticket>, StoreError> {
        let kinds = match request.kind {
            Some(kind) => vec![kind],
            None => self.plan_kinds(),
        };
        for kind in kinds {
            let batch = self.store.lease_batch(
                kind,
                request.limit,
                request.lease_sec,
                request.capabilities.as_ref(),
            )?;
            if !batch.is_empty() {
                return Ok(batch);
            }
        }
        Ok(Vec::new())
    }

    /// Reclaims expired leases through the store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when a reclaimed ticket cannot be committed.
    pub fn reclaim_expired(&self) -> Result<Vec<TicketId>, StoreError> {
        self.store.reclaim_expired()
    }

    /// Plans the kind preference order for one kindless call.
    fn plan_kinds(&self) -> Vec<TicketKind> {
        match &self.strategy {
            LeaseStrategy::TriageFirst => {
                vec![TicketKind::Triage, TicketKind::Tool, TicketKind::Reply]
            }
            LeaseStrategy::ReplyFirst => {
                vec![TicketKind::Reply, TicketKind::Tool, TicketKind::Triage]
            }
            LeaseStrategy::RoundRobin {
                kinds,
            } => {
                if kinds.is_empty() {
                    return vec![TicketKind::Triage, TicketKind::Tool, TicketKind::Reply];
                }
                let start = self.rotation.lock().map_or(0, |mut state| {
                    let index = state.next_index % kinds.len();
                    state.next_index = state.next_index.wrapping_add(1);
                    index
                });
                let mut order = Vec::with_capacity(kinds.len());
                for offset in 0..kinds.len() {
                    order.push(kinds[(start + offset) % kinds.len()]);
                }
                order
            }
            LeaseStrategy::Weighted {
                weights,
            } => self.plan_weighted(weights),
        }
    }

    /// Plans a weighted selection, spending one credit per call.
    fn plan_weighted(&self, weights: &BTreeMap<TicketKind, u32>) -> Vec<TicketKind> {
        let Ok(mut state) = self.rotation.lock() else {
            return vec![TicketKind::Triage, TicketKind::Tool, TicketKind::Reply];
        };
        if state.credits.values().all(|credit| *credit == 0) {
            state.credits = weights.clone();
        }
        let selected = state
            .credits
            .iter()
            .filter(|(_, credit)| **credit > 0)
            .max_by_key(|(_, credit)| **credit)
            .map(|(kind, _)| *kind);
        let Some(kind) = selected else {
            return vec![TicketKind::Triage, TicketKind::Tool, TicketKind::Reply];
        };
        if let Some(credit) = state.credits.get_mut(&kind) {
            *credit = credit.saturating_sub(1);
        }
        // Remaining kinds serve as fallbacks so a drained queue does not
        // starve the worker.
        let mut order = vec![kind];
        for fallback in [TicketKind::Triage, TicketKind::Tool, TicketKind::Reply] {
            if fallback != kind {
                order.push(fallback);
            }
        }
        order
    }
}
