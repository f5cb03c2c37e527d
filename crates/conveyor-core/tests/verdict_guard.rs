// crates/conveyor-core/tests/verdict_guard.rs
// ============================================================================
// Module: Verdict Write Guard
// Description: Source-scan guard over the canonical verdict write invariant.
// Purpose: Reject tool-verdict writes outside the ticket store.
// Dependencies: conveyor-core (source tree)
// ============================================================================
//! ## Overview
//! Scans the crate's production sources and rejects any assignment to
//! `outputs.tool_verdict` outside the store module, plus any production read
//! of the legacy `final_outputs` verdict location outside the two accessor
//! sites (the derivation precedence helper and the fill projection).

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

use std::path::Path;
use std::path::PathBuf;

/// Collects every `.rs` file under a directory.
fn collect_sources(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.is_dir() {
            collect_sources(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

/// Verifies `outputs.tool_verdict` is assigned only inside the store module.
#[test]
fn tool_verdict_written_only_by_store() {
    let src = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut sources = Vec::new();
    collect_sources(&src, &mut sources);
    assert!(!sources.is_empty());

    let mut offenders = Vec::new();
    for path in &sources {
        let is_store = path.ends_with("runtime/store.rs");
        let text = std::fs::read_to_string(path).expect("source text");
        for (line_no, line) in text.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") {
                continue;
            }
            let writes_verdict = trimmed.contains(".outputs.tool_verdict =")
                || trimmed.contains("outputs.tool_verdict = Some");
            if writes_verdict && !is_store {
                offenders.push(format!("{}:{}", path.display(), line_no + 1));
            }
        }
    }
    assert!(offenders.is_empty(), "verdict writes outside the store: {offenders:?}");
}

/// Verifies production code never reads the legacy verdict location outside
/// the two sanctioned precedence sites.
#[test]
fn legacy_verdict_reads_are_confined() {
    let src = Path::new(env!("CARGO_MANIFEST_DIR")).join("src");
    let mut sources = Vec::new();
    collect_sources(&src, &mut sources);

    let sanctioned =
        ["runtime/derivation.rs", "runtime/pipeline.rs"];
    let mut offenders = Vec::new();
    for path in &sources {
        let allowed = sanctioned.iter().any(|suffix| path.ends_with(suffix));
        if allowed {
            continue;
        }
        let text = std::fs::read_to_string(path).expect("source text");
        for (line_no, line) in text.lines().enumerate() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") {
                continue;
            }
            if trimmed.contains("final_outputs.get(\"tool_verdict\")") {
                offenders.push(format!("{}:{}", path.display(), line_no + 1));
            }
        }
    }
    assert!(offenders.is_empty(), "legacy verdict reads outside accessors: {offenders:?}");
}
