// crates/conveyor-http/tests/common/mod.rs
// ============================================================================
// Module: HTTP Test Harness
// Description: Shared state builder for endpoint and scenario tests.
// Purpose: Wire a full orchestrator state from a configuration.
// Dependencies: conveyor-config, conveyor-core, conveyor-http,
//               conveyor-providers, tempfile
// ============================================================================
//! ## Overview
//! Builds the same wiring the CLI performs, but over a manual clock, an
//! in-memory ticket log, and a temporary evidence directory.

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
    dead_code,
    reason = "Test-only output, assertions, and partially used helpers."
)]

use std::collections::BTreeSet;
use std::sync::Arc;

use conveyor_config::ConveyorConfig;
use conveyor_core::Clock;
use conveyor_core::CutoverMetrics;
use conveyor_core::DepKey;
use conveyor_core::DerivationEngine;
use conveyor_core::EvidenceWriter;
use conveyor_core::FillPipeline;
use conveyor_core::LeaseScheduler;
use conveyor_core::LeaseStrategy;
use conveyor_core::ManualClock;
use conveyor_core::MemoryTicketLog;
use conveyor_core::NoopAuditSink;
use conveyor_core::ReadinessRegistry;
use conveyor_core::RunnerCore;
use conveyor_core::SchemaGate;
use conveyor_core::TicketStore;
use conveyor_core::ToolAllowlist;
use conveyor_http::AppState;
use conveyor_providers::NoMcpGateway;

/// Test environment holding the state and its supporting resources.
pub struct TestEnv {
    /// Shared application state.
    pub state: Arc<AppState>,
    /// Manual clock driving every component.
    pub clock: Arc<ManualClock>,
    /// Evidence directory kept alive for the test duration.
    pub logs_dir: tempfile::TempDir,
}

/// Builds a full orchestrator state from a configuration.
pub fn env_from_config(config: &ConveyorConfig) -> TestEnv {
    let clock = Arc::new(ManualClock::new(1_000));
    let clock_dyn: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;
    let audit = Arc::new(NoopAuditSink);

    let gate = Arc::new(
        SchemaGate::new(
            config.schema_gate_mode,
            config.enable_ticket_schema_validation,
            audit.clone(),
        )
        .expect("schema gate"),
    );
    let store = Arc::new(
        TicketStore::open(
            Arc::new(MemoryTicketLog::new()),
            Arc::clone(&gate),
            audit.clone(),
            Arc::clone(&clock_dyn),
        )
        .expect("store"),
    );

    let required: BTreeSet<DepKey> = [DepKey::new("memory")].into_iter().collect();
    let readiness = Arc::new(ReadinessRegistry::new(required));
    for dep in readiness.required() {
        readiness.set_ready(dep);
    }

    let cutover_policy = config.cutover_policy();
    let cutover_metrics = Arc::new(CutoverMetrics::new());
    let derivation = Arc::new(DerivationEngine::new(
        Arc::clone(&store),
        Arc::clone(&gate),
        config.derivation(),
        cutover_policy,
        Arc::clone(&cutover_metrics),
        audit.clone(),
        Arc::clone(&clock_dyn),
    ));
    let runner = Arc::new(RunnerCore::new(
        ToolAllowlist::standard(config.memory_write_enabled),
        Arc::clone(&readiness),
        Arc::clone(&clock_dyn),
    ));
    let logs_dir = tempfile::tempdir().expect("tempdir");
    let evidence =
        Arc::new(EvidenceWriter::new(logs_dir.path().to_path_buf(), config.allow_run_id_overwrite));
    let pipeline = Arc::new(FillPipeline::new(
        Arc::clone(&store),
        derivation,
        Arc::clone(&gate),
        Arc::clone(&readiness),
        runner,
        evidence,
        audit,
        Arc::clone(&clock_dyn),
        true,
        true,
        config.no_mcp,
        cutover_policy.mode(clock_dyn.now()),
    ));
    let scheduler = Arc::new(LeaseScheduler::new(Arc::clone(&store), LeaseStrategy::default()));

    let state = Arc::new(AppState {
        store,
        scheduler,
        pipeline,
        readiness,
        cutover_policy,
        cutover_metrics,
        schema_gate: gate,
        gateway: Arc::new(NoMcpGateway),
        clock: clock_dyn,
    });
    TestEnv {
        state,
        clock,
        logs_dir,
    }
}

/// Builds the default NO_MCP happy-path environment.
pub fn default_env() -> TestEnv {
    let overrides: std::collections::BTreeMap<String, String> = [
        ("NO_MCP".to_string(), "true".to_string()),
        ("ENABLE_TOOL_DERIVATION".to_string(), "true".to_string()),
        ("ENABLE_REPLY_DERIVATION".to_string(), "true".to_string()),
    ]
    .into_iter()
    .collect();
    let config = ConveyorConfig::from_overrides(&overrides).expect("config");
    env_from_config(&config)
}
