use crate::application::tooling::{AggregateCatalog, ConnectFailure, ServerHealth};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

/// One aggregated tool as reported on /mcp/tools.
#[derive(Debug, Serialize, ToSchema)]
pub struct ToolDescriptor {
    /// The tool's name as its server reported it.
    pub name: String,
    /// The model-facing key (`namespace__name`, sanitized).
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Tools grouped by resolved server namespace.
#[derive(Debug, Serialize, ToSchema)]
pub struct ToolListResponse {
    pub servers: BTreeMap<String, Vec<ToolDescriptor>>,
    pub failures: Vec<ConnectFailureEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ConnectFailureEntry {
    pub id: String,
    pub namespace: String,
    pub error: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthEntry {
    pub namespace: String,
    pub ok: bool,
    pub tools: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub ok: bool,
    pub servers: Vec<HealthEntry>,
}

impl ToolListResponse {
    pub fn from_catalog(catalog: &AggregateCatalog, failures: &[ConnectFailure]) -> Self {
        let mut servers: BTreeMap<String, Vec<ToolDescriptor>> = BTreeMap::new();
        for (key, tool) in catalog {
            servers
                .entry(tool.namespace.clone())
                .or_default()
                .push(ToolDescriptor {
                    name: tool.original_name.clone(),
                    key: key.clone(),
                    description: tool.description.clone(),
                });
        }
        for tools in servers.values_mut() {
            tools.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Self {
            servers,
            failures: failures.iter().map(ConnectFailureEntry::from).collect(),
        }
    }

    pub fn tool_count(&self) -> usize {
        self.servers.values().map(Vec::len).sum()
    }
}

impl From<&ConnectFailure> for ConnectFailureEntry {
    fn from(value: &ConnectFailure) -> Self {
        Self {
            id: value.id.clone(),
            namespace: value.namespace.clone(),
            error: value.error.clone(),
        }
    }
}

impl From<ServerHealth> for HealthEntry {
    fn from(value: ServerHealth) -> Self {
        Self {
            namespace: value.namespace,
            ok: value.ok,
            tools: value.tools,
            error: value.error,
        }
    }
}

impl HealthResponse {
    pub fn from_report(report: Vec<ServerHealth>) -> Self {
        let ok = !report.is_empty() && report.iter().all(|entry| entry.ok);
        Self {
            ok,
            servers: report.into_iter().map(HealthEntry::from).collect(),
        }
    }
}
