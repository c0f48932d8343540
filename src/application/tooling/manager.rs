use super::catalog::{AggregateCatalog, fold_server_tools};
use crate::application::transport::{Session, ToolInvokeError, open_session};
use crate::config::ServerConfig;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// When set, per-namespace tool counts are logged at info level after every
/// merged listing.
pub const DEBUG_ENV: &str = "MCP_DEBUG";

/// A server that could not be connected. Recorded, never fatal: the
/// aggregate keeps serving whatever did come up.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectFailure {
    pub id: String,
    pub namespace: String,
    pub error: String,
}

/// Liveness report for one configured server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerHealth {
    pub namespace: String,
    pub ok: bool,
    pub tools: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Owns the open sessions for one aggregation lifetime. Built once per
/// request or CLI run, closed when the work that needed it finishes.
pub struct ToolManager {
    sessions: Mutex<Vec<Session>>,
    failures: Vec<ConnectFailure>,
    closed: AtomicBool,
}

impl ToolManager {
    /// Connect to every configured server in parallel. Each connection
    /// settles independently; failures are recorded and the rest proceed.
    pub async fn connect(servers: &[ServerConfig]) -> Self {
        let attempts = join_all(servers.iter().map(|config| async move {
            (config, open_session(config).await)
        }))
        .await;

        let mut sessions = Vec::new();
        let mut failures = Vec::new();
        for (config, attempt) in attempts {
            match attempt {
                Ok(session) => {
                    debug!(server = config.id(), namespace = config.namespace(), "Connected");
                    sessions.push(session);
                }
                Err(err) => {
                    warn!(server = config.id(), %err, "Server connection failed");
                    failures.push(ConnectFailure {
                        id: config.id().to_string(),
                        namespace: config.namespace().to_string(),
                        error: err.to_string(),
                    });
                }
            }
        }

        Self {
            sessions: Mutex::new(sessions),
            failures,
            closed: AtomicBool::new(false),
        }
    }

    pub fn failures(&self) -> &[ConnectFailure] {
        &self.failures
    }

    pub async fn connected_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether `close_all` has already run for this manager.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// List every connected server's tools in parallel and merge them into
    /// one catalog. A server whose listing fails contributes nothing; the
    /// failure is logged and the merge continues.
    pub async fn get_tools(&self) -> AggregateCatalog {
        let sessions = self.sessions.lock().await;
        let listings = join_all(sessions.iter().map(|session| async move {
            (session, session.list_tools().await)
        }))
        .await;

        let debug_counts = std::env::var(DEBUG_ENV).is_ok();
        let mut catalog = AggregateCatalog::new();
        for (session, listing) in listings {
            let namespace = session.namespace().to_string();
            match listing {
                Ok(tools) => {
                    let admitted = fold_server_tools(
                        &mut catalog,
                        &namespace,
                        tools.into_iter().map(|tool| {
                            let schema = Value::Object((*tool.input_schema).clone());
                            (
                                tool.name.to_string(),
                                tool.description.map(|d| d.to_string()),
                                schema,
                            )
                        }),
                        session.config().allow_tools(),
                        session.config().deny_tools(),
                    );
                    if debug_counts {
                        info!(namespace, tools = admitted, "Namespace tool count");
                    } else {
                        debug!(namespace, tools = admitted, "Namespace tool count");
                    }
                }
                Err(err) => {
                    warn!(namespace, %err, "Tool listing failed; namespace skipped");
                }
            }
        }
        catalog
    }

    /// Route one invocation to the server owning `namespace`, using the
    /// server-reported tool name.
    pub async fn call_tool(
        &self,
        namespace: &str,
        name: &str,
        arguments: Value,
    ) -> Result<Value, ToolInvokeError> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .iter()
            .find(|session| session.namespace() == namespace)
            .ok_or_else(|| ToolInvokeError::UnknownNamespace {
                namespace: namespace.to_string(),
            })?;
        session.call_tool(name, arguments).await
    }

    /// Probe every configured server: connected ones are listed live,
    /// servers that failed to connect report their stored error.
    pub async fn server_health(&self) -> Vec<ServerHealth> {
        let sessions = self.sessions.lock().await;
        let probes = join_all(sessions.iter().map(|session| async move {
            let namespace = session.namespace().to_string();
            match session.list_tools().await {
                Ok(tools) => ServerHealth {
                    namespace,
                    ok: true,
                    tools: tools.len(),
                    error: None,
                },
                Err(err) => ServerHealth {
                    namespace,
                    ok: false,
                    tools: 0,
                    error: Some(err.to_string()),
                },
            }
        }))
        .await;

        let mut report = probes;
        for failure in &self.failures {
            report.push(ServerHealth {
                namespace: failure.namespace.clone(),
                ok: false,
                tools: 0,
                error: Some(failure.error.clone()),
            });
        }
        report
    }

    /// Close every open session. Idempotent: the first caller drains the
    /// session list, later calls return immediately.
    pub async fn close_all(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sessions: Vec<Session> = {
            let mut guard = self.sessions.lock().await;
            std::mem::take(&mut *guard)
        };
        join_all(sessions.into_iter().map(Session::close)).await;
    }
}

impl Drop for ToolManager {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let sessions = std::mem::take(self.sessions.get_mut());
        if sessions.is_empty() {
            return;
        }
        // Dropped without an explicit close (e.g. the consumer of a stream
        // went away). Finish the close on the runtime if one is still there.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                join_all(sessions.into_iter().map(Session::close)).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, StdioServerConfig};
    use serde_json::json;

    fn broken_stdio(id: &str) -> ServerConfig {
        ServerConfig::Stdio(StdioServerConfig {
            id: id.to_string(),
            display_name: None,
            namespace: Some(format!("{id}-ns")),
            allow_tools: Vec::new(),
            deny_tools: Vec::new(),
            timeout_ms: Some(2_000),
            command: "/definitely/not/a/real/binary".to_string(),
            args: Vec::new(),
            cwd: None,
            env: Default::default(),
        })
    }

    #[tokio::test]
    async fn failed_connections_are_recorded_not_fatal() {
        let manager = ToolManager::connect(&[broken_stdio("a"), broken_stdio("b")]).await;

        assert_eq!(manager.connected_count().await, 0);
        assert_eq!(manager.failures().len(), 2);
        assert_eq!(manager.failures()[0].namespace, "a-ns");
        assert!(manager.get_tools().await.is_empty());

        let health = manager.server_health().await;
        assert_eq!(health.len(), 2);
        assert!(health.iter().all(|entry| !entry.ok));
        assert!(health.iter().all(|entry| entry.error.is_some()));
    }

    #[tokio::test]
    async fn unknown_namespace_is_rejected() {
        let manager = ToolManager::connect(&[]).await;
        let err = manager
            .call_tool("ghost", "anything", json!({}))
            .await
            .expect_err("no such namespace");
        assert!(matches!(err, ToolInvokeError::UnknownNamespace { .. }));
    }

    #[tokio::test]
    async fn close_all_is_idempotent() {
        let manager = ToolManager::connect(&[broken_stdio("a")]).await;
        assert!(!manager.is_closed());
        manager.close_all().await;
        assert!(manager.is_closed());
        manager.close_all().await;
        assert_eq!(manager.connected_count().await, 0);
    }
}
