// crates/conveyor-http/src/server.rs
// ============================================================================
// Module: Conveyor HTTP Server
// Description: Endpoint operations, axum routing, and the lease reclaimer.
// Purpose: Map the pipeline contract onto HTTP statuses and bodies.
// Dependencies: axum, conveyor-core, serde_json, tokio
// ============================================================================

//! ## Overview
//! Every endpoint is implemented as a transport-free operation returning
//! `(StatusCode, Value)`; axum handlers only extract inputs and forward.
//! Failure bodies follow the uniform `{error_code, …context}` shape with
//! stable low-cardinality codes, and lease rejections always carry
//! `stable_code == error_code`. The server runs a periodic lease reclaimer
//! alongside the listener.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use conveyor_core::Clock;
use conveyor_core::CutoverMetrics;
use conveyor_core::CutoverPolicy;
use conveyor_core::FillError;
use conveyor_core::FillOutputs;
use conveyor_core::FillPipeline;
use conveyor_core::FillRequest;
use conveyor_core::IngressEvent;
use conveyor_core::LeaseRequest;
use conveyor_core::LeaseScheduler;
use conveyor_core::ReadinessRegistry;
use conveyor_core::SchemaGate;
use conveyor_core::StableCode;
use conveyor_core::StoreError;
use conveyor_core::TicketFilter;
use conveyor_core::TicketId;
use conveyor_core::TicketKind;
use conveyor_core::TicketStatus;
use conveyor_core::TicketStore;
use conveyor_core::ToolCall;
use conveyor_core::ToolGateway;
use conveyor_core::can_enable_strict;
use serde::Deserialize;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: State
// ============================================================================

/// Shared application state passed to every endpoint operation.
pub struct AppState {
    /// Ticket store for reads and ingress creation.
    pub store: Arc<TicketStore>,
    /// Lease scheduler for batch leases and reclamation.
    pub scheduler: Arc<LeaseScheduler>,
    /// Fill pipeline for worker submissions.
    pub pipeline: Arc<FillPipeline>,
    /// Readiness registry for gating and health.
    pub readiness: Arc<ReadinessRegistry>,
    /// Cutover policy for the metrics strict-gate decision.
    pub cutover_policy: CutoverPolicy,
    /// Cutover metrics table.
    pub cutover_metrics: Arc<CutoverMetrics>,
    /// Schema gate for metrics exposure.
    pub schema_gate: Arc<SchemaGate>,
    /// Tool gateway for direct tool execution.
    pub gateway: Arc<dyn ToolGateway>,
    /// Injected time source.
    pub clock: Arc<dyn Clock>,
}

// ============================================================================
// SECTION: Request Shapes
// ============================================================================

/// Body for single-ticket lease requests.
#[derive(Debug, Deserialize)]
pub struct LeaseOneBody {
    /// Lease duration in seconds.
    pub lease_sec: i64,
    /// Worker-chosen lease owner label.
    pub lease_owner: String,
}

/// Body for fill requests.
#[derive(Debug, Deserialize)]
pub struct FillBody {
    /// Worker outputs payload.
    pub outputs: Value,
    /// Worker identity label.
    #[serde(default)]
    pub by: Option<String>,
    /// Lease owner presented by the worker.
    #[serde(default)]
    pub lease_owner: Option<String>,
    /// Lease token presented by the worker.
    #[serde(default)]
    pub lease_token: Option<String>,
}

/// Query string for ticket listings.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    /// Status filter.
    #[serde(default)]
    pub status: Option<String>,
    /// Kind filter.
    #[serde(default)]
    pub kind: Option<String>,
    /// Row limit.
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Body for direct tool execution.
#[derive(Debug, Deserialize)]
pub struct ToolsExecuteBody {
    /// Tool server label.
    #[serde(default)]
    pub server: Option<String>,
    /// Tool name; absence rejects with `missing_tool`.
    #[serde(default)]
    pub tool: Option<String>,
    /// Scalar tool arguments.
    #[serde(default)]
    pub arguments: Value,
}

// ============================================================================
// SECTION: Operations
// ============================================================================

/// `POST /events`: creates a TRIAGE ticket from an ingress event.
#[must_use]
pub fn op_create_event(state: &AppState, body: &Value) -> (StatusCode, Value) {
    let event: IngressEvent = match serde_json::from_value(body.clone()) {
        Ok(event) => event,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                json!({
                    "error_code": StableCode::SchemaValidationFailed.as_str(),
                    "detail": err.to_string(),
                }),
            );
        }
    };
    match state.store.create_ingress_checked(event, Some(body)) {
        Ok(ticket) => (StatusCode::OK, json!({ "ticket_id": ticket.id.as_str() })),
        Err(StoreError::SchemaRejected(report)) => (
            StatusCode::BAD_REQUEST,
            json!({
                "error_code": StableCode::SchemaValidationFailed.as_str(),
                "warn_count": report.warn_count,
                "warn_codes": report.warn_codes,
                "errors": report.errors,
            }),
        ),
        Err(err) => internal_error(&err.to_string()),
    }
}

/// `POST /v1/tickets/lease`: leases a batch of pending tickets.
///
/// TOOL-kind requests are readiness-gated and return 503 with the missing
/// required dependency keys when the gate fails.
#[must_use]
pub fn op_lease_batch(state: &AppState, request: &LeaseRequest) -> (StatusCode, Value) {
    if request.kind == Some(TicketKind::Tool) {
        let required = state.readiness.required();
        if let Err(err) = state.readiness.require_deps(&required) {
            return readiness_gated_body(state, &err);
        }
    }
    match state.scheduler.lease(request) {
        Ok(tickets) => (StatusCode::OK, json!({ "tickets": tickets })),
        Err(err) => internal_error(&err.to_string()),
    }
}

/// `POST /v1/tickets/{id}/lease`: leases one specific ticket.
#[must_use]
pub fn op_lease_one(state: &AppState, id: &TicketId, body: &LeaseOneBody) -> (StatusCode, Value) {
    match state.store.lease_one(id, body.lease_owner.as_str().into(), body.lease_sec) {
        Ok(ticket) => (StatusCode::OK, json!({ "status": "leased", "ticket": ticket })),
        Err(StoreError::LeaseConflict(_)) => (
            StatusCode::CONFLICT,
            json!({
                "status": "rejected",
                "error_code": StableCode::LeaseConflict.as_str(),
                "stable_code": StableCode::LeaseConflict.as_str(),
            }),
        ),
        Err(StoreError::NotFound(_)) => not_found_body(),
        Err(err) => internal_error(&err.to_string()),
    }
}

/// `POST /v1/tickets/{id}/fill`: applies a worker fill.
#[must_use]
pub fn op_fill_ticket(state: &AppState, id: &TicketId, body: &FillBody) -> (StatusCode, Value) {
    let outputs: FillOutputs = match serde_json::from_value(body.outputs.clone()) {
        Ok(outputs) => outputs,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                json!({
                    "error_code": StableCode::SchemaValidationFailed.as_str(),
                    "detail": err.to_string(),
                }),
            );
        }
    };
    let raw = json!({
        "outputs": body.outputs,
        "by": body.by,
        "lease_owner": body.lease_owner,
        "lease_token": body.lease_token,
    });
    let request = FillRequest {
        outputs,
        raw: prune_nulls(raw),
        by: body.by.clone(),
        lease_owner: body.lease_owner.as_deref().map(Into::into),
        lease_token: body.lease_token.as_deref().map(Into::into),
    };
    match state.pipeline.fill(id, &request) {
        Ok(response) => match serde_json::to_value(&response.ticket) {
            Ok(ticket) => (StatusCode::OK, ticket),
            Err(err) => internal_error(&err.to_string()),
        },
        Err(FillError::NotFound(_)) => not_found_body(),
        Err(FillError::LeaseOwnerMismatch(_)) => (
            StatusCode::CONFLICT,
            json!({
                "error_code": StableCode::LeaseOwnerMismatch.as_str(),
                "stable_code": StableCode::LeaseOwnerMismatch.as_str(),
            }),
        ),
        Err(FillError::SchemaRejected(report)) => (
            StatusCode::BAD_REQUEST,
            json!({
                "error_code": StableCode::SchemaValidationFailed.as_str(),
                "warn_count": report.warn_count,
                "warn_codes": report.warn_codes,
                "errors": report.errors,
            }),
        ),
        Err(FillError::UnknownTool {
            evidence_run_id,
        }) => (
            StatusCode::CONFLICT,
            json!({
                "error_code": StableCode::UnknownToolTicket.as_str(),
                "stable_code": StableCode::UnknownToolTicket.as_str(),
                "evidence_run_id": evidence_run_id.as_str(),
            }),
        ),
        Err(FillError::ReadinessBlocked {
            evidence_run_id,
            missing_required,
        }) => (
            StatusCode::CONFLICT,
            json!({
                "error_code": StableCode::ReadinessBlocked.as_str(),
                "stable_code": StableCode::ReadinessBlocked.as_str(),
                "evidence_run_id": evidence_run_id.as_str(),
                "missing_required": missing_required,
            }),
        ),
        Err(FillError::Store(err)) => internal_error(&err.to_string()),
    }
}

/// `GET /v1/tickets/{id}`: returns one ticket.
#[must_use]
pub fn op_get_ticket(state: &AppState, id: &TicketId) -> (StatusCode, Value) {
    state.store.get(id).map_or_else(not_found_body, |ticket| {
        serde_json::to_value(&ticket)
            .map_or_else(|err| internal_error(&err.to_string()), |value| (StatusCode::OK, value))
    })
}

/// `GET /v1/tickets`: lists tickets with optional filters.
#[must_use]
pub fn op_list_tickets(state: &AppState, query: &ListQuery) -> (StatusCode, Value) {
    let status = match &query.status {
        Some(raw) => match TicketStatus::from_wire(raw) {
            Some(status) => Some(status),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    json!({
                        "error_code": StableCode::SchemaValidationFailed.as_str(),
                        "detail": format!("unknown status filter {raw:?}"),
                    }),
                );
            }
        },
        None => None,
    };
    let kind = match &query.kind {
        Some(raw) => match TicketKind::from_wire(raw) {
            Some(kind) => Some(kind),
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    json!({
                        "error_code": StableCode::SchemaValidationFailed.as_str(),
                        "detail": format!("unknown kind filter {raw:?}"),
                    }),
                );
            }
        },
        None => None,
    };
    let tickets = state.store.list(&TicketFilter {
        kind,
        status,
        parent_ticket_id: None,
        limit: query.limit,
    });
    (StatusCode::OK, json!(tickets))
}

/// `GET /health`: always returns the readiness snapshot with 200.
#[must_use]
pub fn op_health(state: &AppState) -> (StatusCode, Value) {
    let snapshot = state.readiness.snapshot(state.clock.now());
    (StatusCode::OK, serde_json::to_value(&snapshot).unwrap_or_else(|_| json!({})))
}

/// `GET /metrics`: readiness, cutover, and schema-gate observability.
#[must_use]
pub fn op_metrics(state: &AppState) -> (StatusCode, Value) {
    let now = state.clock.now();
    let readiness = state.readiness.snapshot(now);
    let cutover = state.cutover_metrics.snapshot(now);
    let mode = state.cutover_policy.mode(now);
    let strict_gate = can_enable_strict(&cutover, mode);
    let schema_gate = state.schema_gate.snapshot(now);
    (
        StatusCode::OK,
        json!({
            "readiness": readiness,
            "cutover": {
                "mode": mode.as_str(),
                "counters": cutover.counters,
                "strict_gate": strict_gate,
            },
            "schema_gate": schema_gate,
        }),
    )
}

/// `POST /v1/tools/execute`: readiness-gated direct tool execution.
#[must_use]
pub fn op_tools_execute(state: &AppState, body: &ToolsExecuteBody) -> (StatusCode, Value) {
    let Some(tool) = body.tool.as_deref().filter(|tool| !tool.trim().is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            json!({ "error_code": StableCode::MissingTool.as_str() }),
        );
    };
    let deps: Vec<_> = state.readiness.deps_for_tool(tool).into_iter().collect();
    if let Err(err) = state.readiness.require_deps(&deps) {
        return readiness_gated_body(state, &err);
    }

    let args = match &body.arguments {
        Value::Object(map) => map.clone().into_iter().collect(),
        Value::Null => std::collections::BTreeMap::new(),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                json!({
                    "error_code": StableCode::SchemaValidationFailed.as_str(),
                    "detail": "arguments must be an object",
                }),
            );
        }
    };
    let call = ToolCall {
        tool_name: tool.to_string(),
        args,
    };
    match state.gateway.execute(&call) {
        Ok(response) => (
            StatusCode::OK,
            json!({
                "ok": true,
                "server": body.server,
                "tool": tool,
                "result": response.result,
            }),
        ),
        Err(error) => {
            // The single upstream-to-stable mapping site for this surface.
            let code = match error.code.as_str() {
                "timeout" => StableCode::ToolTimeout,
                "unavailable" => StableCode::ToolUnavailable,
                _ => StableCode::ToolExecFailed,
            };
            (
                StatusCode::OK,
                json!({
                    "ok": false,
                    "tool": tool,
                    "error_code": code.as_str(),
                    "message": error.message,
                }),
            )
        }
    }
}

// ============================================================================
// SECTION: Body Helpers
// ============================================================================

/// Builds the readiness-gated 503 body.
fn readiness_gated_body(
    state: &AppState,
    err: &conveyor_core::runtime::ReadinessError,
) -> (StatusCode, Value) {
    let conveyor_core::runtime::ReadinessError::RequiredUnavailable {
        missing_required,
    } = err;
    (
        StatusCode::SERVICE_UNAVAILABLE,
        json!({
            "error_code": StableCode::McpRequiredUnavailable.as_str(),
            "missing_required": missing_required,
            "degraded": true,
            "as_of": state.clock.now().to_rfc3339(),
        }),
    )
}

/// Builds the uniform 404 body.
fn not_found_body() -> (StatusCode, Value) {
    (StatusCode::NOT_FOUND, json!({ "error_code": "not_found" }))
}

/// Builds the uniform internal-error body without leaking exception text to
/// clients beyond a stable label.
fn internal_error(detail: &str) -> (StatusCode, Value) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "error_code": "internal_error", "detail": detail }),
    )
}

/// Drops null members from an object payload before gating.
fn prune_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            Value::Object(map.into_iter().filter(|(_, member)| !member.is_null()).collect())
        }
        other => other,
    }
}

// ============================================================================
// SECTION: Axum Wiring
// ============================================================================

/// Wraps an operation result into an axum response.
fn respond(result: (StatusCode, Value)) -> Response {
    let (status, body) = result;
    (status, axum::Json(body)).into_response()
}

/// Builds the axum router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/events", post(handle_create_event))
        .route("/v1/tickets/lease", post(handle_lease_batch))
        .route("/v1/tickets/{id}/lease", post(handle_lease_one))
        .route("/v1/tickets/{id}/fill", post(handle_fill))
        .route("/v1/tickets/{id}", get(handle_get_ticket))
        .route("/v1/tickets", get(handle_list_tickets))
        .route("/v1/tools/execute", post(handle_tools_execute))
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .with_state(state)
}

/// Serves the router and runs the lease reclaimer until shutdown.
///
/// # Errors
///
/// Returns an I/O error when the listener cannot bind or the server fails.
pub async fn serve(state: Arc<AppState>, port: u16) -> Result<(), std::io::Error> {
    let reclaimer_state = Arc::clone(&state);
    let reclaimer = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            let _ = reclaimer_state.scheduler.reclaim_expired();
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let result = axum::serve(listener, router(state)).await;
    reclaimer.abort();
    result
}

/// Axum handler for `POST /events`.
async fn handle_create_event(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<Value>,
) -> Response {
    respond(op_create_event(&state, &body))
}

/// Axum handler for `POST /v1/tickets/lease`.
async fn handle_lease_batch(
    State(state): State<Arc<AppState>>,
    axum::Json(request): axum::Json<LeaseRequest>,
) -> Response {
    respond(op_lease_batch(&state, &request))
}

/// Axum handler for `POST /v1/tickets/{id}/lease`.
async fn handle_lease_one(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    axum::Json(body): axum::Json<LeaseOneBody>,
) -> Response {
    respond(op_lease_one(&state, &TicketId::new(id), &body))
}

/// Axum handler for `POST /v1/tickets/{id}/fill`.
async fn handle_fill(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    axum::Json(body): axum::Json<FillBody>,
) -> Response {
    respond(op_fill_ticket(&state, &TicketId::new(id), &body))
}

/// Axum handler for `GET /v1/tickets/{id}`.
async fn handle_get_ticket(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    respond(op_get_ticket(&state, &TicketId::new(id)))
}

/// Axum handler for `GET /v1/tickets`.
async fn handle_list_tickets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Response {
    respond(op_list_tickets(&state, &query))
}

/// Axum handler for `POST /v1/tools/execute`.
async fn handle_tools_execute(
    State(state): State<Arc<AppState>>,
    axum::Json(body): axum::Json<ToolsExecuteBody>,
) -> Response {
    respond(op_tools_execute(&state, &body))
}

/// Axum handler for `GET /health`.
async fn handle_health(State(state): State<Arc<AppState>>) -> Response {
    respond(op_health(&state))
}

/// Axum handler for `GET /metrics`.
async fn handle_metrics(State(state): State<Arc<AppState>>) -> Response {
    respond(op_metrics(&state))
}
