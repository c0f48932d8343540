use super::super::dto::ToolListResponse;
use super::super::state::ServerState;
use crate::infrastructure::model::ModelProvider;
use axum::Json;
use axum::extract::State;
use std::sync::Arc;
use tracing::debug;

/// Connects to every configured server, merges their tool lists, and
/// reports the result together with any servers that failed to come up.
#[utoipa::path(
    get,
    path = "/mcp/tools",
    tag = "tools",
    responses(
        (status = 200, description = "Aggregated tool catalog", body = ToolListResponse)
    )
)]
pub async fn tools_handler<P: ModelProvider + 'static>(
    State(state): State<Arc<ServerState<P>>>,
) -> Json<ToolListResponse> {
    let manager = state.connect_manager().await;
    let catalog = manager.get_tools().await;
    let response = ToolListResponse::from_catalog(&catalog, manager.failures());
    manager.close_all().await;
    debug!(
        tools = response.tool_count(),
        failures = response.failures.len(),
        "Serving /mcp/tools request"
    );
    Json(response)
}
