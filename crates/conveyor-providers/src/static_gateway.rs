// crates/conveyor-providers/src/static_gateway.rs
// ============================================================================
// Module: Static Gateway
// Description: Canned per-tool gateway for drivers and test harnesses.
// Purpose: Serve deterministic tool responses with scripted failures.
// Dependencies: conveyor-core, serde_json
// ============================================================================

//! ## Overview
//! The static gateway maps tool names to canned responses and records every
//! call it receives. Unconfigured tools answer with an empty success so
//! harnesses only script what they assert on.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Mutex;

use conveyor_core::EvidenceCandidate;
use conveyor_core::GatewayError;
use conveyor_core::GatewayResponse;
use conveyor_core::ToolCall;
use conveyor_core::ToolGateway;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Responses
// ============================================================================

/// Scripted response for one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaticResponse {
    /// Succeed with the given result and evidence candidates.
    Ok {
        /// Structured tool result.
        result: Value,
        /// Evidence candidates returned with the result.
        evidence: Vec<EvidenceCandidate>,
    },
    /// Fail with the given upstream code and message.
    Fail {
        /// Raw upstream error code (for example `timeout`).
        code: String,
        /// Upstream error message.
        message: String,
    },
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Deterministic gateway serving canned per-tool responses.
pub struct StaticGateway {
    /// Scripted responses per tool name.
    responses: BTreeMap<String, StaticResponse>,
    /// Calls received, in order.
    calls: Mutex<Vec<ToolCall>>,
}

impl Default for StaticGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticGateway {
    /// Creates a gateway with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self {
            responses: BTreeMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Scripts a response for one tool.
    #[must_use]
    pub fn with_response(mut self, tool: &str, response: StaticResponse) -> Self {
        self.responses.insert(tool.to_string(), response);
        self
    }

    /// Returns the calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().map_or_else(|_| Vec::new(), |guard| guard.clone())
    }
}

impl ToolGateway for StaticGateway {
    fn execute(&self, call: &ToolCall) -> Result<GatewayResponse, GatewayError> {
        if let Ok(mut guard) = self.calls.lock() {
            guard.push(call.clone());
        }
        match self.responses.get(&call.tool_name) {
            Some(StaticResponse::Ok {
                result,
                evidence,
            }) => Ok(GatewayResponse {
                result: result.clone(),
                evidence_candidates: evidence.clone(),
            }),
            Some(StaticResponse::Fail {
                code,
                message,
            }) => Err(GatewayError {
                code: code.clone(),
                message: message.clone(),
            }),
            None => Ok(GatewayResponse {
                result: json!({ "ok": true }),
                evidence_candidates: Vec::new(),
            }),
        }
    }
}
