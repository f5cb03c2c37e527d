// crates/conveyor-providers/src/no_mcp.rs
// ============================================================================
// Module: No-MCP Provider and Gateway
// Description: Degraded-mode provider for deployments without tool servers.
// Purpose: Keep the orchestrator operable when no MCP backend is configured.
// Dependencies: conveyor-core, serde_json
// ============================================================================

//! ## Overview
//! The no-MCP pair answers every exchange with the degraded-mode codes the
//! probe runner and runner map to graceful passes and `TOOL_UNAVAILABLE`
//! failures. The security probe observes a denial, which is the required
//! outcome: with no provider, nothing can grant access.

// ============================================================================
// SECTION: Imports
// ============================================================================

use conveyor_core::GatewayError;
use conveyor_core::GatewayResponse;
use conveyor_core::ProbeKind;
use conveyor_core::ProbeProvider;
use conveyor_core::ProviderFailure;
use conveyor_core::StableCode;
use conveyor_core::ToolCall;
use conveyor_core::ToolGateway;
use serde_json::Value;

// ============================================================================
// SECTION: Probe Provider
// ============================================================================

/// Probe provider for deployments running without MCP backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMcpProvider;

impl ProbeProvider for NoMcpProvider {
    fn probe(&self, probe: ProbeKind) -> Result<Value, ProviderFailure> {
        match probe {
            ProbeKind::Security => Err(ProviderFailure {
                code: StableCode::ProbeAccessDenied,
                message: "no provider configured; access denied".to_string(),
            }),
            ProbeKind::Access | ProbeKind::Search | ProbeKind::Memory => Err(ProviderFailure {
                code: StableCode::ProviderUnavailableNoMcp,
                message: format!("no provider configured for {} probe", probe.as_str()),
            }),
        }
    }
}

// ============================================================================
// SECTION: Tool Gateway
// ============================================================================

/// Tool gateway for deployments running without MCP backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMcpGateway;

impl ToolGateway for NoMcpGateway {
    fn execute(&self, call: &ToolCall) -> Result<GatewayResponse, GatewayError> {
        Err(GatewayError {
            code: "unavailable".to_string(),
            message: format!("no tool server configured for {}", call.tool_name),
        })
    }
}
