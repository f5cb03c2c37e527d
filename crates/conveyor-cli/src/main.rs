#![cfg_attr(
    test,
    allow(
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
    )
)]
// crates/conveyor-cli/src/main.rs
// ============================================================================
// Module: Conveyor CLI Entry Point
// Description: Command dispatcher for the Ticket Conveyor orchestrator.
// Purpose: Run startup probes and serve the HTTP surface.
// Dependencies: clap, conveyor-config, conveyor-core, conveyor-http,
//               conveyor-providers, tokio
// ============================================================================

//! ## Overview
//! The CLI builds the typed configuration once from the environment, runs the
//! startup probe suite, applies the strict-init gate, and serves the HTTP
//! surface. Failures surface as process exit codes; forced probe failures and
//! unready strict-init deployments exit with code 1.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use conveyor_config::ConveyorConfig;
use conveyor_core::AuditSink;
use conveyor_core::Clock;
use conveyor_core::CutoverMetrics;
use conveyor_core::DepCode;
use conveyor_core::DepKey;
use conveyor_core::DerivationEngine;
use conveyor_core::EvidenceWriter;
use conveyor_core::FileTicketLog;
use conveyor_core::FillPipeline;
use conveyor_core::LeaseScheduler;
use conveyor_core::LeaseStrategy;
use conveyor_core::MemoryTicketLog;
use conveyor_core::ProbeRunner;
use conveyor_core::ReadinessRegistry;
use conveyor_core::RunnerCore;
use conveyor_core::SchemaGate;
use conveyor_core::StderrAuditSink;
use conveyor_core::SystemClock;
use conveyor_core::TicketLogSink;
use conveyor_core::TicketStore;
use conveyor_core::ToolAllowlist;
use conveyor_http::AppState;
use conveyor_providers::NoMcpGateway;
use conveyor_providers::NoMcpProvider;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "conveyor", disable_help_subcommand = true, arg_required_else_help = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run startup probes and serve the orchestrator HTTP surface.
    Serve,
    /// Run the startup probe suite and print the report.
    Probes,
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match ConveyorConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            let _ = writeln!(std::io::stderr(), "conveyor: invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Probes => probes(&config),
    }
}

// ============================================================================
// SECTION: Probes Command
// ============================================================================

/// Runs the probe suite standalone and prints the JSON report.
fn probes(config: &ConveyorConfig) -> ExitCode {
    let audit: Arc<dyn AuditSink> = Arc::new(StderrAuditSink);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let runner = ProbeRunner::new(
        Arc::new(NoMcpProvider),
        config.probe_force_fail.clone(),
        audit,
        clock,
    );
    let report = runner.run();
    match serde_json::to_string_pretty(&report) {
        Ok(body) => {
            let _ = writeln!(std::io::stdout(), "{body}");
        }
        Err(err) => {
            let _ = writeln!(std::io::stderr(), "conveyor: probe report unserializable: {err}");
            return ExitCode::FAILURE;
        }
    }
    if report.ok { ExitCode::SUCCESS } else { ExitCode::from(1) }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Runs probes, applies the strict-init gate, and serves HTTP.
async fn serve(config: ConveyorConfig) -> ExitCode {
    let audit: Arc<dyn AuditSink> = Arc::new(StderrAuditSink);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    if config.no_mcp {
        let _ = writeln!(
            std::io::stderr(),
            "conveyor: WARNING: running in no-MCP degraded mode; tool execution is unavailable"
        );
    }

    let probe_runner = ProbeRunner::new(
        Arc::new(NoMcpProvider),
        config.probe_force_fail.clone(),
        Arc::clone(&audit),
        Arc::clone(&clock),
    );
    let report = probe_runner.run();
    if !report.ok {
        let _ = writeln!(std::io::stderr(), "conveyor: startup probes failed; refusing to serve");
        return ExitCode::from(1);
    }

    let readiness = Arc::new(ReadinessRegistry::new(required_deps()));
    bootstrap_readiness(&readiness, config.no_mcp);
    if config.strict_mcp_init {
        let required = readiness.required();
        if readiness.require_deps(&required).is_err() {
            let _ = writeln!(std::io::stderr(), "{}", readiness.snapshot_line(clock.now()));
            return ExitCode::from(1);
        }
    }

    let gate = match SchemaGate::new(
        config.schema_gate_mode,
        config.enable_ticket_schema_validation,
        Arc::clone(&audit),
    ) {
        Ok(gate) => Arc::new(gate),
        Err(err) => {
            let _ = writeln!(std::io::stderr(), "conveyor: schema gate init failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    let log: Arc<dyn TicketLogSink> = match &config.ticket_log_path {
        Some(path) => match FileTicketLog::open(path) {
            Ok(log) => Arc::new(log),
            Err(err) => {
                let _ = writeln!(std::io::stderr(), "conveyor: ticket log open failed: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => Arc::new(MemoryTicketLog::new()),
    };
    let store = match TicketStore::open(
        log,
        Arc::clone(&gate),
        Arc::clone(&audit),
        Arc::clone(&clock),
    ) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            let _ = writeln!(std::io::stderr(), "conveyor: ticket store open failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    let cutover_policy = config.cutover_policy();
    let cutover_metrics = Arc::new(CutoverMetrics::new());
    let runner = Arc::new(RunnerCore::new(
        ToolAllowlist::standard(config.memory_write_enabled),
        Arc::clone(&readiness),
        Arc::clone(&clock),
    ));
    let evidence =
        Arc::new(EvidenceWriter::new(config.logs_dir.clone(), config.allow_run_id_overwrite));
    let derivation = Arc::new(DerivationEngine::new(
        Arc::clone(&store),
        Arc::clone(&gate),
        config.derivation(),
        cutover_policy,
        Arc::clone(&cutover_metrics),
        Arc::clone(&audit),
        Arc::clone(&clock),
    ));
    let pipeline = Arc::new(FillPipeline::new(
        Arc::clone(&store),
        derivation,
        Arc::clone(&gate),
        Arc::clone(&readiness),
        runner,
        evidence,
        Arc::clone(&audit),
        Arc::clone(&clock),
        true,
        true,
        config.no_mcp,
        cutover_policy.mode(clock.now()),
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
        clock,
    });

    match conveyor_http::serve(state, config.orchestrator_port).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = writeln!(std::io::stderr(), "conveyor: server failed: {err}");
            ExitCode::FAILURE
        }
    }
}

// ============================================================================
// SECTION: Wiring Helpers
// ============================================================================

/// Required dependency keys for this deployment.
fn required_deps() -> BTreeSet<DepKey> {
    [DepKey::new("memory")].into_iter().collect()
}

/// Seeds readiness rows after the probe run.
///
/// A no-MCP deployment is self-sufficient in degraded mode: nothing the fill
/// path needs can be unavailable, so required keys are marked ready. With a
/// real provider transport absent, required keys stay unready and the strict
/// init gate decides whether that is fatal.
fn bootstrap_readiness(readiness: &ReadinessRegistry, no_mcp: bool) {
    for dep in readiness.required() {
        if no_mcp {
            readiness.set_ready(dep);
        } else {
            readiness.set_unready(
                dep,
                DepCode::DepUnavailable,
                Some("no provider transport configured".to_string()),
            );
        }
    }
}
