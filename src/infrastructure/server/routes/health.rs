use super::super::dto::HealthResponse;
use super::super::state::ServerState;
use crate::infrastructure::model::ModelProvider;
use axum::Json;
use axum::extract::State;
use std::sync::Arc;
use tracing::debug;

/// Probes every configured server and reports per-namespace liveness.
#[utoipa::path(
    get,
    path = "/mcp/health",
    tag = "health",
    responses(
        (status = 200, description = "Per-server liveness report", body = HealthResponse)
    )
)]
pub async fn health_handler<P: ModelProvider + 'static>(
    State(state): State<Arc<ServerState<P>>>,
) -> Json<HealthResponse> {
    let manager = state.connect_manager().await;
    let report = manager.server_health().await;
    manager.close_all().await;
    let response = HealthResponse::from_report(report);
    debug!(ok = response.ok, servers = response.servers.len(), "Serving /mcp/health request");
    Json(response)
}
