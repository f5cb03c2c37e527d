// crates/conveyor-core/tests/evidence.rs
// ============================================================================
// Module: Evidence Writer Tests
// Description: Tests for atomic evidence emission and manifest integrity.
// Purpose: Validate hashes, overwrite policy, and artifact formatting.
// Dependencies: conveyor-core, tempfile
// ============================================================================
//! ## Overview
//! Ensures the evidence bundle's on-disk hashes match the manifest, the
//! self-hash covers the manifest bytes, and the overwrite policy defaults to
//! rejection.

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

use conveyor_core::EvidenceWriter;
use conveyor_core::RunId;
use conveyor_core::RunReport;
use conveyor_core::StableCode;
use conveyor_core::StepStatus;
use conveyor_core::TicketId;
use conveyor_core::Timestamp;
use conveyor_core::runtime::EVIDENCE_MANIFEST_FILE;
use conveyor_core::runtime::EvidenceError;
use conveyor_core::runtime::MANIFEST_SELF_HASH_FILE;
use conveyor_core::runtime::ManifestCheck;
use conveyor_core::runtime::ManifestSelfHash;
use conveyor_core::runtime::RUN_REPORT_FILE;
use conveyor_core::runtime::TOOL_DEBUG_FILE;
use conveyor_core::sha256_hex;

fn sample_report(run_id: &str) -> RunReport {
    RunReport {
        version: "v1".to_string(),
        run_id: RunId::new(run_id),
        as_of: "2026-08-01T00:00:00Z".to_string(),
        ticket_id: TicketId::new("t1"),
        retry_policy_id: "v1_default".to_string(),
        max_attempts: 1,
        terminal_status: StepStatus::Ok,
        primary_failure_code: None,
        started_at: Timestamp::from_unix_millis(1_000),
        ended_at: Timestamp::from_unix_millis(2_000),
        duration_ms: 1_000,
        step_reports: Vec::new(),
        attempt_events: Vec::new(),
        mode_snapshot: None,
    }
}

/// Verifies the bundle writes all three artifacts with matching hashes.
#[test]
fn bundle_hashes_match_disk_bytes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = EvidenceWriter::new(dir.path().to_path_buf(), false);
    let report = sample_report("run-1");

    let bundle = writer
        .write_run(&report, &[], Vec::new(), Timestamp::from_unix_millis(2_000))
        .expect("bundle");

    for artifact in &bundle.manifest.artifacts {
        let bytes = std::fs::read(bundle.run_dir.join(&artifact.path)).expect("artifact bytes");
        assert_eq!(sha256_hex(&bytes), artifact.sha256);
        assert_eq!(bytes.len() as u64, artifact.bytes);
    }

    let manifest_bytes =
        std::fs::read(bundle.run_dir.join(EVIDENCE_MANIFEST_FILE)).expect("manifest bytes");
    let self_hash: ManifestSelfHash = serde_json::from_slice(
        &std::fs::read(bundle.run_dir.join(MANIFEST_SELF_HASH_FILE)).expect("self hash bytes"),
    )
    .expect("self hash json");
    assert_eq!(self_hash.value, sha256_hex(&manifest_bytes));
}

/// Verifies artifacts end with a trailing newline and 2-space indentation.
#[test]
fn artifacts_use_stable_formatting() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = EvidenceWriter::new(dir.path().to_path_buf(), false);
    let report = sample_report("run-1");

    let bundle = writer
        .write_run(&report, &[], Vec::new(), Timestamp::from_unix_millis(2_000))
        .expect("bundle");
    let text =
        std::fs::read_to_string(bundle.run_dir.join(RUN_REPORT_FILE)).expect("report text");
    assert!(text.ends_with('\n'));
    assert!(text.contains("\n  \"version\""));
}

/// Verifies a second writer is rejected by default and admitted with the
/// overwrite override.
#[test]
fn overwrite_policy_defaults_to_reject() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = EvidenceWriter::new(dir.path().to_path_buf(), false);
    let report = sample_report("run-1");
    let _ = writer
        .write_run(&report, &[], Vec::new(), Timestamp::from_unix_millis(2_000))
        .expect("first bundle");

    let second = writer.write_run(&report, &[], Vec::new(), Timestamp::from_unix_millis(3_000));
    assert!(matches!(second, Err(EvidenceError::TargetExists { .. })));

    let override_writer = EvidenceWriter::new(dir.path().to_path_buf(), true);
    let replay = override_writer
        .write_run(&report, &[], Vec::new(), Timestamp::from_unix_millis(3_000))
        .expect("override bundle");
    assert_eq!(replay.manifest.run_id, report.run_id);
}

/// Verifies debug artifacts are listed in the manifest alongside the check
/// row that references them.
#[test]
fn rejection_debug_artifacts_are_listed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = EvidenceWriter::new(dir.path().to_path_buf(), false);
    let report = sample_report("run-1");
    let debug = serde_json::json!({ "reason_code": "unknown_tool", "ticket_id": "t1" });

    let bundle = writer
        .write_run(
            &report,
            &[(TOOL_DEBUG_FILE.to_string(), debug)],
            vec![ManifestCheck::system_rejection(
                vec![StableCode::UnknownToolTicket],
                TOOL_DEBUG_FILE,
            )],
            Timestamp::from_unix_millis(2_000),
        )
        .expect("bundle");

    assert!(bundle.manifest.artifacts.iter().any(|artifact| artifact.path == TOOL_DEBUG_FILE));
    let check = bundle
        .manifest
        .checks
        .iter()
        .find(|check| check.name == "system_rejection_evidence_ok")
        .expect("rejection check");
    assert_eq!(check.reason_codes, vec![StableCode::UnknownToolTicket]);
    assert_eq!(check.details_ref.as_deref(), Some(TOOL_DEBUG_FILE));
}

/// Verifies no temp residue is left after a successful write.
#[test]
fn success_path_leaves_no_tmp_residue() {
    let dir = tempfile::tempdir().expect("tempdir");
    let writer = EvidenceWriter::new(dir.path().to_path_buf(), false);
    let report = sample_report("run-1");
    let bundle = writer
        .write_run(&report, &[], Vec::new(), Timestamp::from_unix_millis(2_000))
        .expect("bundle");

    let residue: Vec<_> = std::fs::read_dir(&bundle.run_dir)
        .expect("read dir")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.contains(".tmp."))
        .collect();
    assert!(residue.is_empty(), "tmp residue: {residue:?}");
}
