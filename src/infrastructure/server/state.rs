use crate::application::chat::ChatOrchestrator;
use crate::application::tooling::ToolManager;
use crate::config::ServerConfig;
use crate::infrastructure::model::ModelProvider;
use std::sync::Arc;

/// Shared state for the REST server. Servers are connected per request, so
/// the state only carries the orchestrator and the normalized config.
pub(crate) struct ServerState<P: ModelProvider> {
    orchestrator: Arc<ChatOrchestrator<P>>,
    servers: Vec<ServerConfig>,
}

impl<P: ModelProvider + 'static> ServerState<P> {
    pub(crate) fn new(orchestrator: Arc<ChatOrchestrator<P>>, servers: Vec<ServerConfig>) -> Self {
        Self {
            orchestrator,
            servers,
        }
    }

    pub(crate) fn orchestrator(&self) -> Arc<ChatOrchestrator<P>> {
        Arc::clone(&self.orchestrator)
    }

    /// Open fresh sessions to every configured server.
    pub(crate) async fn connect_manager(&self) -> Arc<ToolManager> {
        Arc::new(ToolManager::connect(&self.servers).await)
    }
}
