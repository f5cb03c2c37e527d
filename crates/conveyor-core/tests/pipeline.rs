// crates/conveyor-core/tests/pipeline.rs
// ============================================================================
// Module: Fill Pipeline Tests
// Description: End-to-end fill tests across gates, store, and derivation.
// Purpose: Validate the fill sequence, guard finalizations, and evidence.
// Dependencies: conveyor-core, tempfile
// ============================================================================
//! ## Overview
//! Drives the fill pipeline through the triage→tool→reply chain, idempotent
//! refills, guard rejections with evidence bundles, and lease verification.

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

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use conveyor_core::Clock;
use conveyor_core::CutoverMetrics;
use conveyor_core::CutoverMode;
use conveyor_core::CutoverPolicy;
use conveyor_core::DepCode;
use conveyor_core::DepKey;
use conveyor_core::DerivationConfig;
use conveyor_core::DerivationEngine;
use conveyor_core::EvidenceWriter;
use conveyor_core::FillError;
use conveyor_core::FillOutputs;
use conveyor_core::FillPipeline;
use conveyor_core::FillRequest;
use conveyor_core::IngressEvent;
use conveyor_core::LeaseOwner;
use conveyor_core::LeaseToken;
use conveyor_core::ManualClock;
use conveyor_core::MemoryTicketLog;
use conveyor_core::NoopAuditSink;
use conveyor_core::ReadinessRegistry;
use conveyor_core::RunnerCore;
use conveyor_core::SchemaGate;
use conveyor_core::SchemaGateMode;
use conveyor_core::Ticket;
use conveyor_core::TicketFilter;
use conveyor_core::TicketId;
use conveyor_core::TicketKind;
use conveyor_core::TicketStatus;
use conveyor_core::TicketStore;
use conveyor_core::ToolAllowlist;
use conveyor_core::runtime::DEP_SNAPSHOT_FILE;
use conveyor_core::runtime::EVIDENCE_MANIFEST_FILE;
use conveyor_core::runtime::EvidenceManifest;
use conveyor_core::runtime::MANIFEST_SELF_HASH_FILE;
use conveyor_core::runtime::READINESS_DEBUG_FILE;
use conveyor_core::runtime::RUN_REPORT_FILE;
use conveyor_core::runtime::SYSTEM_REJECTION_CHECK;
use conveyor_core::runtime::TOOL_DEBUG_FILE;
use serde_json::json;

struct Harness {
    clock: Arc<ManualClock>,
    store: Arc<TicketStore>,
    readiness: Arc<ReadinessRegistry>,
    pipeline: FillPipeline,
    logs_dir: tempfile::TempDir,
}

fn harness(config: DerivationConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(1_000));
    let clock_dyn: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
    let gate = Arc::new(
        SchemaGate::new(SchemaGateMode::Warn, true, Arc::new(NoopAuditSink)).expect("schema gate"),
    );
    let store = Arc::new(
        TicketStore::open(
            Arc::new(MemoryTicketLog::new()),
            Arc::clone(&gate),
            Arc::new(NoopAuditSink),
            Arc::clone(&clock_dyn),
        )
        .expect("store"),
    );
    let required: BTreeSet<DepKey> = [DepKey::new("memory")].into_iter().collect();
    let readiness = Arc::new(ReadinessRegistry::new(required));
    readiness.set_ready(DepKey::new("memory"));

    let cutover = CutoverPolicy::new(0, true);
    let derivation = Arc::new(DerivationEngine::new(
        Arc::clone(&store),
        Arc::clone(&gate),
        config,
        cutover,
        Arc::new(CutoverMetrics::new()),
        Arc::new(NoopAuditSink),
        Arc::clone(&clock_dyn),
    ));
    let runner = Arc::new(RunnerCore::new(
        ToolAllowlist::standard(false),
        Arc::clone(&readiness),
        Arc::clone(&clock_dyn),
    ));
    let logs_dir = tempfile::tempdir().expect("tempdir");
    let evidence = Arc::new(EvidenceWriter::new(logs_dir.path().to_path_buf(), false));
    let pipeline = FillPipeline::new(
        Arc::clone(&store),
        derivation,
        gate,
        Arc::clone(&readiness),
        runner,
        evidence,
        Arc::new(NoopAuditSink),
        clock_dyn,
        true,
        true,
        true,
        CutoverMode::PostCutover,
    );
    Harness {
        clock,
        store,
        readiness,
        pipeline,
        logs_dir,
    }
}

fn default_config() -> DerivationConfig {
    DerivationConfig {
        enable_tool_derivation: true,
        enable_reply_derivation: true,
        tool_only_mode: false,
    }
}

fn sample_event() -> IngressEvent {
    serde_json::from_value(json!({
        "type": "thread_post",
        "event_id": "e1",
        "content": "hello",
        "features": { "engagement": { "likes": 100, "comments": 50 } },
    }))
    .expect("event")
}

fn lease(harness: &Harness, id: &TicketId) -> (LeaseOwner, LeaseToken) {
    let leased = harness.store.lease_one(id, "worker-a".into(), 60).expect("lease");
    (
        leased.metadata.lease_owner.expect("owner"),
        leased.metadata.lease_token.expect("token"),
    )
}

fn fill_request(outputs: serde_json::Value, owner: &LeaseOwner, token: &LeaseToken) -> FillRequest {
    FillRequest {
        outputs: serde_json::from_value::<FillOutputs>(outputs.clone()).expect("outputs"),
        raw: json!({ "outputs": outputs, "by": "driver-1" }),
        by: Some("driver-1".to_string()),
        lease_owner: Some(owner.clone()),
        lease_token: Some(token.clone()),
    }
}

fn assert_rejection_bundle(run_dir: &Path, details_file: &str, reason: &str) {
    assert!(run_dir.join(RUN_REPORT_FILE).exists());
    assert!(run_dir.join(EVIDENCE_MANIFEST_FILE).exists());
    assert!(run_dir.join(MANIFEST_SELF_HASH_FILE).exists());
    assert!(run_dir.join(details_file).exists());

    let manifest: EvidenceManifest = serde_json::from_slice(
        &std::fs::read(run_dir.join(EVIDENCE_MANIFEST_FILE)).expect("manifest bytes"),
    )
    .expect("manifest json");
    let check = manifest
        .checks
        .iter()
        .find(|check| check.name == SYSTEM_REJECTION_CHECK)
        .expect("rejection check");
    let codes: Vec<String> = check
        .reason_codes
        .iter()
        .map(|code| code.as_str().to_string())
        .collect();
    assert_eq!(codes, vec![reason.to_string()]);
    assert_eq!(check.details_ref.as_deref(), Some(details_file));
}

/// Drives the full happy path: triage approval derives a tool ticket, a
/// PROCEED tool fill derives a reply with the triage back-reference.
#[test]
fn full_happy_path_derives_tool_then_reply() {
    let harness = harness(default_config());
    let triage = harness.store.create_ingress(sample_event()).expect("create");

    let (owner, token) = lease(&harness, &triage.id);
    let request = fill_request(
        json!({
            "decision": "APPROVE",
            "reply_strategy": "standard",
            "target_prompt_id": "reply.standard",
        }),
        &owner,
        &token,
    );
    let response = harness.pipeline.fill(&triage.id, &request).expect("fill triage");
    assert!(!response.idempotent);
    assert_eq!(response.ticket.status, TicketStatus::Done);
    let tool_id = response.ticket.derived.tool_ticket_id.clone().expect("tool id");

    let tools = harness.store.list(&TicketFilter {
        kind: Some(TicketKind::Tool),
        ..TicketFilter::default()
    });
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].metadata.parent_ticket_id, Some(triage.id.clone()));

    let (owner, token) = lease(&harness, &tool_id);
    let request = fill_request(json!({ "tool_verdict": "PROCEED" }), &owner, &token);
    let response = harness.pipeline.fill(&tool_id, &request).expect("fill tool");
    let reply_id = response.ticket.derived.reply_ticket_id.clone().expect("reply id");

    let reply = harness.store.get(&reply_id).expect("reply");
    assert_eq!(reply.kind, TicketKind::Reply);
    assert_eq!(reply.metadata.parent_ticket_id, Some(tool_id.clone()));
    assert_eq!(reply.metadata.triage_reference_id, Some(triage.id.clone()));

    let tool = harness.store.get(&tool_id).expect("tool");
    assert_eq!(tool.outputs.tool_verdict.map(|verdict| verdict.as_str()), Some("PROCEED"));
}

/// Verifies a repeated fill of a terminal ticket is an idempotent no-op and
/// the reply count stays one.
#[test]
fn second_fill_is_idempotent() {
    let harness = harness(default_config());
    let triage = harness.store.create_ingress(sample_event()).expect("create");
    let (owner, token) = lease(&harness, &triage.id);
    let _ = harness
        .pipeline
        .fill(&triage.id, &fill_request(json!({ "decision": "APPROVE" }), &owner, &token))
        .expect("fill triage");
    let tool_id = harness
        .store
        .get(&triage.id)
        .expect("triage")
        .derived
        .tool_ticket_id
        .expect("tool id");

    let (owner, token) = lease(&harness, &tool_id);
    let request = fill_request(json!({ "tool_verdict": "PROCEED" }), &owner, &token);
    let first = harness.pipeline.fill(&tool_id, &request).expect("first fill");
    let reply_id = first.ticket.derived.reply_ticket_id.clone().expect("reply id");

    let second = harness.pipeline.fill(&tool_id, &request).expect("second fill");
    assert!(second.idempotent);
    assert_eq!(second.ticket.derived.reply_ticket_id, Some(reply_id));

    let replies = harness.store.list(&TicketFilter {
        kind: Some(TicketKind::Reply),
        parent_ticket_id: Some(tool_id),
        ..TicketFilter::default()
    });
    assert_eq!(replies.len(), 1);
}

/// Verifies tool-only mode blocks reply creation after a PROCEED fill.
#[test]
fn tool_only_mode_blocks_reply_creation() {
    let config = DerivationConfig {
        tool_only_mode: true,
        ..default_config()
    };
    let harness = harness(config);
    let triage = harness.store.create_ingress(sample_event()).expect("create");
    let (owner, token) = lease(&harness, &triage.id);
    let _ = harness
        .pipeline
        .fill(&triage.id, &fill_request(json!({ "decision": "APPROVE" }), &owner, &token))
        .expect("fill triage");
    let tool_id = harness
        .store
        .get(&triage.id)
        .expect("triage")
        .derived
        .tool_ticket_id
        .expect("tool id");

    let (owner, token) = lease(&harness, &tool_id);
    let _ = harness
        .pipeline
        .fill(&tool_id, &fill_request(json!({ "tool_verdict": "PROCEED" }), &owner, &token))
        .expect("fill tool");

    let replies = harness.store.list(&TicketFilter {
        kind: Some(TicketKind::Reply),
        parent_ticket_id: Some(tool_id.clone()),
        ..TicketFilter::default()
    });
    assert!(replies.is_empty());
    let tool = harness.store.get(&tool_id).expect("tool");
    assert!(tool.derived.reply_ticket_id.is_none());
}

/// Verifies a fill with a stale lease is rejected.
#[test]
fn fill_rejects_stale_lease() {
    let harness = harness(default_config());
    let triage = harness.store.create_ingress(sample_event()).expect("create");
    let (_owner, token) = lease(&harness, &triage.id);

    let request = fill_request(json!({ "decision": "APPROVE" }), &"intruder".into(), &token);
    let result = harness.pipeline.fill(&triage.id, &request);
    assert!(matches!(result, Err(FillError::LeaseOwnerMismatch(_))));

    let untouched = harness.store.get(&triage.id).expect("ticket");
    assert_eq!(untouched.status, TicketStatus::Running);
}

/// Verifies an expired lease loses the right to fill after reclamation.
#[test]
fn expired_lease_cannot_fill() {
    let harness = harness(default_config());
    let triage = harness.store.create_ingress(sample_event()).expect("create");
    let leased = harness.store.lease_one(&triage.id, "worker-a".into(), 1).expect("lease");
    let owner = leased.metadata.lease_owner.expect("owner");
    let token = leased.metadata.lease_token.expect("token");

    harness.clock.advance_millis(2_000);
    let _ = harness.store.reclaim_expired().expect("reclaim");

    let request = fill_request(json!({ "decision": "APPROVE" }), &owner, &token);
    let result = harness.pipeline.fill(&triage.id, &request);
    assert!(matches!(result, Err(FillError::LeaseOwnerMismatch(_))));
}

fn seeded_tool_ticket(harness: &Harness, tool: &str) -> Ticket {
    let mut ticket = Ticket::new(
        TicketKind::Tool,
        "tool_execution_v1".into(),
        sample_event(),
        harness.clock.now(),
    );
    ticket.metadata.tool_input.tool_steps = vec![conveyor_core::ToolStep {
        server: "memory".to_string(),
        tool: tool.to_string(),
        args: std::collections::BTreeMap::new(),
    }];
    harness.store.create_derived(ticket).expect("tool ticket")
}

/// Verifies an out-of-allowlist tool finalizes the ticket failed with a
/// complete rejection evidence bundle.
#[test]
fn unknown_tool_finalizes_with_evidence() {
    let harness = harness(default_config());
    let ticket = seeded_tool_ticket(&harness, "forbidden_tool");
    let (owner, token) = lease(&harness, &ticket.id);

    let request = fill_request(json!({ "tool_verdict": "PROCEED" }), &owner, &token);
    let result = harness.pipeline.fill(&ticket.id, &request);
    let Err(FillError::UnknownTool {
        evidence_run_id,
    }) = result
    else {
        panic!("expected unknown tool rejection, got {result:?}");
    };

    let stored = harness.store.get(&ticket.id).expect("ticket");
    assert_eq!(stored.status, TicketStatus::Failed);
    assert_eq!(
        stored.metadata.final_outputs.get("error_code"),
        Some(&json!("unknown_tool"))
    );
    assert_eq!(
        stored.metadata.final_outputs.get("evidence_run_id"),
        Some(&json!(evidence_run_id.as_str()))
    );

    let run_dir = harness.logs_dir.path().join(evidence_run_id.as_str());
    assert_rejection_bundle(&run_dir, TOOL_DEBUG_FILE, "unknown_tool");
}

/// Verifies unready dependencies finalize the ticket failed with readiness
/// evidence including the dependency snapshot.
#[test]
fn readiness_gate_finalizes_with_evidence() {
    let harness = harness(default_config());
    harness.readiness.set_unready(DepKey::new("memory"), DepCode::DepUnavailable, None);
    let ticket = seeded_tool_ticket(&harness, "search_nodes");
    let (owner, token) = lease(&harness, &ticket.id);

    let request = fill_request(json!({ "tool_verdict": "PROCEED" }), &owner, &token);
    let result = harness.pipeline.fill(&ticket.id, &request);
    let Err(FillError::ReadinessBlocked {
        evidence_run_id,
        missing_required,
    }) = result
    else {
        panic!("expected readiness rejection, got {result:?}");
    };
    assert_eq!(missing_required, vec!["memory".to_string()]);

    let stored = harness.store.get(&ticket.id).expect("ticket");
    assert_eq!(stored.status, TicketStatus::Failed);
    assert_eq!(
        stored.metadata.final_outputs.get("error_code"),
        Some(&json!("readiness_blocked"))
    );

    let run_dir = harness.logs_dir.path().join(evidence_run_id.as_str());
    assert_rejection_bundle(&run_dir, READINESS_DEBUG_FILE, "readiness_blocked");
    assert!(run_dir.join(DEP_SNAPSHOT_FILE).exists());
}

/// Verifies a tool run through the pipeline writes a run evidence bundle.
#[test]
fn execute_tool_run_writes_evidence() {
    let harness = harness(default_config());
    let ticket = seeded_tool_ticket(&harness, "search_nodes");

    struct OkGateway;
    impl conveyor_core::ToolGateway for OkGateway {
        fn execute(
            &self,
            _call: &conveyor_core::ToolCall,
        ) -> Result<conveyor_core::GatewayResponse, conveyor_core::GatewayError> {
            Ok(conveyor_core::GatewayResponse {
                result: json!({ "nodes": 1 }),
                evidence_candidates: Vec::new(),
            })
        }
    }

    let (report, bundle) =
        harness.pipeline.execute_tool_run(&ticket, &OkGateway).expect("run");
    assert_eq!(report.terminal_status.as_str(), "ok");
    assert_eq!(report.mode_snapshot.as_ref().map(|mode| mode.no_mcp), Some(true));
    assert!(bundle.run_dir.join(RUN_REPORT_FILE).exists());
    assert!(bundle.run_dir.join(EVIDENCE_MANIFEST_FILE).exists());
}
