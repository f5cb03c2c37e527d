// crates/conveyor-http/src/lib.rs
// ============================================================================
// Module: Conveyor HTTP Library
// Description: HTTP surface for the Ticket Conveyor orchestrator.
// Purpose: Expose the endpoint contract over axum.
// Dependencies: axum, conveyor-core, tokio
// ============================================================================

//! ## Overview
//! The HTTP surface implements the orchestrator endpoint contract: event
//! ingress, ticket reads, lease and fill, tool execution, health, and
//! metrics. Handlers delegate to transport-free operation functions so the
//! contract is testable without sockets; the axum layer only extracts and
//! maps.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod server;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use server::AppState;
pub use server::FillBody;
pub use server::LeaseOneBody;
pub use server::ListQuery;
pub use server::ToolsExecuteBody;
pub use server::op_create_event;
pub use server::op_fill_ticket;
pub use server::op_get_ticket;
pub use server::op_health;
pub use server::op_lease_batch;
pub use server::op_lease_one;
pub use server::op_list_tickets;
pub use server::op_metrics;
pub use server::op_tools_execute;
pub use server::router;
pub use server::serve;
