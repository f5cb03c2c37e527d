// crates/conveyor-core/tests/lease.rs
// ============================================================================
// Module: Lease Scheduler Tests
// Description: Tests for lease strategies and lease exclusivity.
// Purpose: Validate cross-call strategy rotation and single-winner leasing.
// Dependencies: conveyor-core
// ============================================================================
//! ## Overview
//! Ensures strategies advance across calls, capability predicates filter TOOL
//! work, and concurrent lease attempts resolve with exactly one winner.

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

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use conveyor_core::Clock;
use conveyor_core::IngressEvent;
use conveyor_core::LeaseRequest;
use conveyor_core::LeaseScheduler;
use conveyor_core::LeaseStrategy;
use conveyor_core::ManualClock;
use conveyor_core::MemoryTicketLog;
use conveyor_core::NoopAuditSink;
use conveyor_core::SchemaGate;
use conveyor_core::SchemaGateMode;
use conveyor_core::StoreError;
use conveyor_core::Ticket;
use conveyor_core::TicketKind;
use conveyor_core::TicketStore;
use conveyor_core::ToolStep;

fn sample_event(content: &str) -> IngressEvent {
    serde_json::from_value(serde_json::json!({
        "type": "thread_post",
        "content": content,
    }))
    .expect("event")
}

fn open_store(clock: &Arc<ManualClock>) -> Arc<TicketStore> {
    let gate = Arc::new(
        SchemaGate::new(SchemaGateMode::Warn, true, Arc::new(NoopAuditSink)).expect("schema gate"),
    );
    let clock_dyn: Arc<dyn Clock> = Arc::clone(clock) as Arc<dyn Clock>;
    Arc::new(
        TicketStore::open(Arc::new(MemoryTicketLog::new()), gate, Arc::new(NoopAuditSink), clock_dyn)
            .expect("store"),
    )
}

fn seed_tool_ticket(store: &TicketStore, clock: &ManualClock, server: &str) -> Ticket {
    let mut ticket = Ticket::new(
        TicketKind::Tool,
        "tool_execution_v1".into(),
        sample_event("tool work"),
        clock.now(),
    );
    ticket.metadata.tool_input.tool_steps = vec![ToolStep {
        server: server.to_string(),
        tool: "search_nodes".to_string(),
        args: BTreeMap::new(),
    }];
    store.create_derived(ticket).expect("seed tool ticket")
}

fn request(kind: Option<TicketKind>) -> LeaseRequest {
    LeaseRequest {
        kind,
        limit: 1,
        lease_sec: 60,
        capabilities: None,
    }
}

/// Verifies triage-first preference serves TRIAGE before TOOL work.
#[test]
fn triage_first_prefers_triage() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = open_store(&clock);
    let _tool = seed_tool_ticket(&store, &clock, "memory");
    clock.advance_millis(5);
    let triage = store.create_ingress(sample_event("triage work")).expect("create");

    let scheduler = LeaseScheduler::new(Arc::clone(&store), LeaseStrategy::TriageFirst);
    let batch = scheduler.lease(&request(None)).expect("lease");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, triage.id);
}

/// Verifies reply-first falls back to other kinds when no reply is pending.
#[test]
fn reply_first_falls_back_when_empty() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = open_store(&clock);
    let tool = seed_tool_ticket(&store, &clock, "memory");

    let scheduler = LeaseScheduler::new(Arc::clone(&store), LeaseStrategy::ReplyFirst);
    let batch = scheduler.lease(&request(None)).expect("lease");
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, tool.id);
}

/// Verifies round-robin rotation advances one position per call.
#[test]
fn round_robin_rotates_across_calls() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = open_store(&clock);
    let _tool_a = seed_tool_ticket(&store, &clock, "memory");
    clock.advance_millis(5);
    let _tool_b = seed_tool_ticket(&store, &clock, "memory");
    clock.advance_millis(5);
    let triage = store.create_ingress(sample_event("triage work")).expect("create");

    let scheduler = LeaseScheduler::new(
        Arc::clone(&store),
        LeaseStrategy::RoundRobin {
            kinds: vec![TicketKind::Tool, TicketKind::Triage],
        },
    );
    let first = scheduler.lease(&request(None)).expect("lease");
    assert_eq!(first[0].kind, TicketKind::Tool);
    let second = scheduler.lease(&request(None)).expect("lease");
    assert_eq!(second[0].id, triage.id);
    let third = scheduler.lease(&request(None)).expect("lease");
    assert_eq!(third[0].kind, TicketKind::Tool);
}

/// Verifies weighted credits bias selection toward the heavier kind.
#[test]
fn weighted_spends_credits_per_call() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = open_store(&clock);
    let _tool = seed_tool_ticket(&store, &clock, "memory");
    clock.advance_millis(5);
    let _triage = store.create_ingress(sample_event("triage work")).expect("create");

    let weights: BTreeMap<TicketKind, u32> =
        [(TicketKind::Tool, 2), (TicketKind::Triage, 1)].into_iter().collect();
    let scheduler = LeaseScheduler::new(
        Arc::clone(&store),
        LeaseStrategy::Weighted {
            weights,
        },
    );
    let first = scheduler.lease(&request(None)).expect("lease");
    assert_eq!(first[0].kind, TicketKind::Tool);
}

/// Verifies capability predicates skip TOOL tickets the worker cannot serve.
#[test]
fn capabilities_filter_tool_tickets() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = open_store(&clock);
    let _notebook = seed_tool_ticket(&store, &clock, "notebooklm");
    clock.advance_millis(5);
    let memory = seed_tool_ticket(&store, &clock, "memory");

    let capabilities: BTreeSet<String> = ["memory".to_string()].into_iter().collect();
    let batch = store
        .lease_batch(TicketKind::Tool, 5, 60, Some(&capabilities))
        .expect("batch");
    let ids: Vec<_> = batch.iter().map(|ticket| ticket.id.clone()).collect();
    assert_eq!(ids, vec![memory.id]);
}

/// Verifies concurrent lease attempts on one ticket produce exactly one
/// winner; every loser observes a lease conflict.
#[test]
fn concurrent_lease_attempts_have_one_winner() {
    let clock = Arc::new(ManualClock::new(1_000));
    let store = open_store(&clock);
    let ticket = store.create_ingress(sample_event("contended")).expect("create");

    let mut handles = Vec::new();
    for worker in 0..3 {
        let store = Arc::clone(&store);
        let id = ticket.id.clone();
        handles.push(std::thread::spawn(move || {
            store.lease_one(&id, format!("worker-{worker}").into(), 60)
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.join().expect("join") {
            Ok(_) => wins += 1,
            Err(StoreError::LeaseConflict(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(conflicts, 2);

    let stored = store.get(&ticket.id).expect("get");
    assert!(stored.metadata.lease_owner.is_some());
}
