mod dto;
mod error;
mod routes;
mod state;

use crate::application::chat::ChatOrchestrator;
use crate::config::ServerConfig;
use crate::infrastructure::model::ModelProvider;
use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use dto::{
    ConnectFailureEntry, ErrorResponse, HealthEntry, HealthResponse, ToolDescriptor,
    ToolListResponse,
};
use routes::{chat::chat_handler, health::health_handler, tools::tools_handler};
use state::ServerState;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind HTTP listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server error: {0}")]
    Serve(#[from] std::io::Error),
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::chat::chat_handler,
        routes::tools::tools_handler,
        routes::health::health_handler
    ),
    components(schemas(
        ErrorResponse,
        ToolDescriptor,
        ToolListResponse,
        ConnectFailureEntry,
        HealthEntry,
        HealthResponse
    )),
    tags(
        (name = "chat", description = "Streamed chat with tool calling"),
        (name = "tools", description = "Aggregated MCP tool catalog"),
        (name = "health", description = "Per-server liveness")
    )
)]
struct ApiDoc;

pub async fn serve<P>(
    orchestrator: Arc<ChatOrchestrator<P>>,
    servers: Vec<ServerConfig>,
    addr: SocketAddr,
) -> Result<(), ServerError>
where
    P: ModelProvider + 'static,
{
    let api = ApiDoc::openapi();
    info!(%addr, "Binding REST server");

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let state = Arc::new(ServerState::new(orchestrator, servers));
    let app = Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", api))
        .route("/chat", post(chat_handler::<P>))
        .route("/mcp/tools", get(tools_handler::<P>))
        .route("/mcp/health", get(health_handler::<P>))
        .layer(cors)
        .with_state(state);

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    info!(%addr, "REST server ready to accept connections");

    axum::serve(listener, app.into_make_service())
        .await
        .map_err(ServerError::Serve)
}
