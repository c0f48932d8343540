mod loader;

pub use loader::{CONFIG_PATH_ENV, CONFIG_URL_ENV, ConfigSource, DEFAULT_CONFIG_FILE, load_config};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;
use url::Url;
use utoipa::ToSchema;

pub const DEFAULT_HTTP_PATH: &str = "/mcp";
pub const DEFAULT_SSE_PATH: &str = "/sse";

/// Raw `env` keys that mark a definition as an HTTP server.
const HTTP_ENDPOINT_KEYS: [&str; 2] = ["API_URL", "HTTP_URL"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config from {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse MCP config: {source}")]
    Parse {
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid MCP config: {0}")]
    Validation(String),
    #[error("failed to fetch config from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Fields shared by the `http` and `sse` transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpServerConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Origin only; paths live in `http_path`/`sse_path`.
    pub url: String,
    #[serde(default = "default_http_path")]
    pub http_path: String,
    #[serde(default = "default_sse_path")]
    pub sse_path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StdioServerConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

/// One configured MCP server, discriminated by transport kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ServerConfig {
    Http(HttpServerConfig),
    Sse(HttpServerConfig),
    Stdio(StdioServerConfig),
}

impl ServerConfig {
    pub fn id(&self) -> &str {
        match self {
            ServerConfig::Http(cfg) | ServerConfig::Sse(cfg) => &cfg.id,
            ServerConfig::Stdio(cfg) => &cfg.id,
        }
    }

    /// The resolved namespace: the configured value when non-blank, else the id.
    pub fn namespace(&self) -> &str {
        let (namespace, id) = match self {
            ServerConfig::Http(cfg) | ServerConfig::Sse(cfg) => (&cfg.namespace, &cfg.id),
            ServerConfig::Stdio(cfg) => (&cfg.namespace, &cfg.id),
        };
        match namespace.as_deref().map(str::trim) {
            Some(trimmed) if !trimmed.is_empty() => trimmed,
            _ => id,
        }
    }

    pub fn allow_tools(&self) -> &[String] {
        match self {
            ServerConfig::Http(cfg) | ServerConfig::Sse(cfg) => &cfg.allow_tools,
            ServerConfig::Stdio(cfg) => &cfg.allow_tools,
        }
    }

    pub fn deny_tools(&self) -> &[String] {
        match self {
            ServerConfig::Http(cfg) | ServerConfig::Sse(cfg) => &cfg.deny_tools,
            ServerConfig::Stdio(cfg) => &cfg.deny_tools,
        }
    }

    pub fn timeout_ms(&self) -> Option<u64> {
        match self {
            ServerConfig::Http(cfg) | ServerConfig::Sse(cfg) => cfg.timeout_ms,
            ServerConfig::Stdio(cfg) => cfg.timeout_ms,
        }
    }
}

/// The validated configuration: an ordered, non-empty list of servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AggregateConfig {
    pub servers: Vec<ServerConfig>,
}

/// The pre-normalization input shape of one `mcpServers` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawServerDefinition {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub allow_tools: Vec<String>,
    #[serde(default)]
    pub deny_tools: Vec<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    // BTreeMap keeps entry order deterministic across loads.
    #[serde(rename = "mcpServers")]
    mcp_servers: BTreeMap<String, RawServerDefinition>,
}

/// Replace `${NAME}` tokens (`NAME` in `[A-Z0-9_]+`) with the value returned
/// by `lookup`. Unresolved variables interpolate to the empty string, never
/// an error. Runs on the raw text before JSON parsing.
pub fn interpolate_env(raw: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            let name_start = i + 2;
            let mut j = name_start;
            while j < bytes.len() && matches!(bytes[j], b'A'..=b'Z' | b'0'..=b'9' | b'_') {
                j += 1;
            }
            if j > name_start && j < bytes.len() && bytes[j] == b'}' {
                let name = &raw[name_start..j];
                if let Some(value) = lookup(name) {
                    out.push_str(&value);
                }
                i = j + 1;
                continue;
            }
        }
        // Not a token start; copy the full character.
        let ch = raw[i..].chars().next().unwrap_or('\u{fffd}');
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Parse and validate a raw configuration document into an [`AggregateConfig`].
pub fn normalize(
    raw_text: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<AggregateConfig, ConfigError> {
    let interpolated = interpolate_env(raw_text, lookup);
    let document: RawDocument =
        serde_json::from_str(&interpolated).map_err(|source| ConfigError::Parse { source })?;

    if document.mcp_servers.is_empty() {
        return Err(ConfigError::Validation(
            "mcpServers must have at least one entry".into(),
        ));
    }

    let mut servers = Vec::new();
    for (id, definition) in document.mcp_servers {
        match classify_definition(&id, definition)? {
            Some(server) => servers.push(server),
            None => debug!(server = %id, "Dropping definition with no recognized transport"),
        }
    }

    let config = AggregateConfig { servers };
    validate(&config)?;
    Ok(config)
}

/// Classify one raw definition. An HTTP endpoint in `env` wins over
/// `command`; a definition matching neither is silently dropped (`None`).
fn classify_definition(
    id: &str,
    definition: RawServerDefinition,
) -> Result<Option<ServerConfig>, ConfigError> {
    let endpoint = HTTP_ENDPOINT_KEYS
        .iter()
        .find_map(|key| definition.env.get(*key))
        .filter(|value| !value.trim().is_empty());

    if let Some(endpoint) = endpoint {
        let parsed = Url::parse(endpoint).map_err(|err| {
            ConfigError::Validation(format!(
                "server '{id}': '{endpoint}' is not a valid absolute URL: {err}"
            ))
        })?;
        let origin = parsed.origin().ascii_serialization();
        if origin == "null" {
            return Err(ConfigError::Validation(format!(
                "server '{id}': '{endpoint}' has no usable origin"
            )));
        }
        let http_path = match parsed.path() {
            "" | "/" => DEFAULT_HTTP_PATH.to_string(),
            path => path.to_string(),
        };
        return Ok(Some(ServerConfig::Http(HttpServerConfig {
            id: id.to_string(),
            display_name: definition.display_name,
            namespace: definition.namespace,
            allow_tools: definition.allow_tools,
            deny_tools: definition.deny_tools,
            timeout_ms: definition.timeout_ms,
            url: origin,
            http_path,
            sse_path: DEFAULT_SSE_PATH.to_string(),
            headers: HashMap::new(),
        })));
    }

    let Some(command) = definition
        .command
        .filter(|command| !command.trim().is_empty())
    else {
        return Ok(None);
    };

    Ok(Some(ServerConfig::Stdio(StdioServerConfig {
        id: id.to_string(),
        display_name: definition.display_name,
        namespace: definition.namespace,
        allow_tools: definition.allow_tools,
        deny_tools: definition.deny_tools,
        timeout_ms: definition.timeout_ms,
        command,
        args: definition.args,
        cwd: definition
            .cwd
            .map(|cwd| shellexpand::tilde(&cwd).into_owned()),
        env: definition.env,
    })))
}

/// Check the invariants every normalized configuration must satisfy.
pub fn validate(config: &AggregateConfig) -> Result<(), ConfigError> {
    if config.servers.is_empty() {
        return Err(ConfigError::Validation(
            "configuration produced no usable servers".into(),
        ));
    }
    for server in &config.servers {
        if server.id().trim().is_empty() {
            return Err(ConfigError::Validation("server id must be non-empty".into()));
        }
        if server.timeout_ms() == Some(0) {
            return Err(ConfigError::Validation(format!(
                "server '{}': timeoutMs must be positive",
                server.id()
            )));
        }
        match server {
            ServerConfig::Http(cfg) | ServerConfig::Sse(cfg) => {
                Url::parse(&cfg.url).map_err(|err| {
                    ConfigError::Validation(format!(
                        "server '{}': '{}' is not a valid absolute URL: {err}",
                        cfg.id, cfg.url
                    ))
                })?;
            }
            ServerConfig::Stdio(cfg) => {
                if cfg.command.trim().is_empty() {
                    return Err(ConfigError::Validation(format!(
                        "server '{}': command must be non-empty",
                        cfg.id
                    )));
                }
            }
        }
    }
    Ok(())
}

fn default_http_path() -> String {
    DEFAULT_HTTP_PATH.to_string()
}

fn default_sse_path() -> String {
    DEFAULT_SSE_PATH.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn interpolates_known_variables() {
        let lookup = |name: &str| (name == "SECRET").then(|| "s3cret".to_string());
        assert_eq!(
            interpolate_env("token-${SECRET}", lookup),
            "token-s3cret".to_string()
        );
    }

    #[test]
    fn unresolved_variable_becomes_empty_string() {
        assert_eq!(interpolate_env("token-${SECRET}", no_env), "token-");
    }

    #[test]
    fn malformed_tokens_pass_through_verbatim() {
        assert_eq!(interpolate_env("${lower} ${NO_CLOSE", no_env), "${lower} ${NO_CLOSE");
        assert_eq!(interpolate_env("${}", no_env), "${}");
    }

    #[test]
    fn stdio_definition_round_trips() {
        let config = normalize(
            r#"{"mcpServers": {"runner": {"command": "run", "args": ["x"]}}}"#,
            no_env,
        )
        .expect("normalize succeeds");

        assert_eq!(config.servers.len(), 1);
        match &config.servers[0] {
            ServerConfig::Stdio(cfg) => {
                assert_eq!(cfg.id, "runner");
                assert_eq!(cfg.command, "run");
                assert_eq!(cfg.args, vec!["x".to_string()]);
                assert!(cfg.env.is_empty());
            }
            other => panic!("expected stdio config, got {other:?}"),
        }
    }

    #[test]
    fn api_url_definition_becomes_http_with_split_paths() {
        let config = normalize(
            r#"{"mcpServers": {"remote": {"env": {"API_URL": "https://h/v1"}}}}"#,
            no_env,
        )
        .expect("normalize succeeds");

        match &config.servers[0] {
            ServerConfig::Http(cfg) => {
                assert_eq!(cfg.url, "https://h");
                assert_eq!(cfg.http_path, "/v1");
                assert_eq!(cfg.sse_path, "/sse");
            }
            other => panic!("expected http config, got {other:?}"),
        }
    }

    #[test]
    fn endpoint_without_path_defaults_to_mcp() {
        let config = normalize(
            r#"{"mcpServers": {"remote": {"env": {"HTTP_URL": "https://tools.example:9443"}}}}"#,
            no_env,
        )
        .expect("normalize succeeds");

        match &config.servers[0] {
            ServerConfig::Http(cfg) => {
                assert_eq!(cfg.url, "https://tools.example:9443");
                assert_eq!(cfg.http_path, "/mcp");
            }
            other => panic!("expected http config, got {other:?}"),
        }
    }

    #[test]
    fn definitions_matching_no_transport_are_dropped() {
        let config = normalize(
            r#"{"mcpServers": {
                "keep": {"command": "run"},
                "drop": {"displayName": "nothing to start"}
            }}"#,
            no_env,
        )
        .expect("normalize succeeds");

        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].id(), "keep");
    }

    #[test]
    fn empty_server_map_is_rejected() {
        let err = normalize(r#"{"mcpServers": {}}"#, no_env).expect_err("must fail");
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn all_entries_dropped_is_rejected() {
        let err = normalize(
            r#"{"mcpServers": {"empty": {"displayName": "no transport"}}}"#,
            no_env,
        )
        .expect_err("must fail");
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = normalize("{not json", no_env).expect_err("must fail");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn invalid_endpoint_url_is_rejected() {
        let err = normalize(
            r#"{"mcpServers": {"bad": {"env": {"API_URL": "not a url"}}}}"#,
            no_env,
        )
        .expect_err("must fail");
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn namespace_falls_back_to_id_when_blank() {
        let config = normalize(
            r#"{"mcpServers": {
                "alpha": {"command": "run", "namespace": "  "},
                "beta": {"command": "run", "namespace": "tools"}
            }}"#,
            no_env,
        )
        .expect("normalize succeeds");

        let namespaces: Vec<_> = config.servers.iter().map(ServerConfig::namespace).collect();
        assert_eq!(namespaces, vec!["alpha", "tools"]);
    }

    #[test]
    fn interpolation_feeds_classification() {
        let lookup = |name: &str| (name == "TOOLS_URL").then(|| "https://h/api".to_string());
        let config = normalize(
            r#"{"mcpServers": {"remote": {"env": {"API_URL": "${TOOLS_URL}"}}}}"#,
            lookup,
        )
        .expect("normalize succeeds");
        match &config.servers[0] {
            ServerConfig::Http(cfg) => assert_eq!(cfg.http_path, "/api"),
            other => panic!("expected http config, got {other:?}"),
        }
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = normalize(
            r#"{"mcpServers": {"slow": {"command": "run", "timeoutMs": 0}}}"#,
            no_env,
        )
        .expect_err("must fail");
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
