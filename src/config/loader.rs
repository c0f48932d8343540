use super::{AggregateConfig, ConfigError, normalize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "MCP_CONFIG";
/// Environment variable naming a base URL to fetch the default file from.
pub const CONFIG_URL_ENV: &str = "MCP_CONFIG_URL";
/// Conventional default location, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "mcp.config.json";

/// One place a configuration document may come from. Sources are tried in
/// order; the first that yields a document wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Explicit override path; read errors propagate.
    ExplicitFile(PathBuf),
    /// Path named by [`CONFIG_PATH_ENV`]; read errors propagate.
    EnvFile,
    /// The conventional file location; absence and errors are tolerated.
    DefaultFile(PathBuf),
    /// Network fetch of the default path from the [`CONFIG_URL_ENV`] base;
    /// absence and errors are tolerated.
    RemoteDefault,
}

impl ConfigSource {
    /// Try to produce the raw (un-interpolated) document text from this
    /// source. `Ok(None)` means the source is absent and the next one should
    /// be consulted.
    pub async fn read(
        &self,
        lookup: &(impl Fn(&str) -> Option<String> + Sync),
    ) -> Result<Option<String>, ConfigError> {
        match self {
            ConfigSource::ExplicitFile(path) => read_file(path).map(Some),
            ConfigSource::EnvFile => match lookup(CONFIG_PATH_ENV) {
                Some(path) if !path.trim().is_empty() => {
                    read_file(Path::new(path.trim())).map(Some)
                }
                _ => Ok(None),
            },
            ConfigSource::DefaultFile(path) => match std::fs::read_to_string(path) {
                Ok(text) => Ok(Some(text)),
                Err(err) => {
                    debug!(path = %path.display(), %err, "Default config file not usable");
                    Ok(None)
                }
            },
            ConfigSource::RemoteDefault => {
                let Some(base) = lookup(CONFIG_URL_ENV).filter(|base| !base.trim().is_empty())
                else {
                    return Ok(None);
                };
                let url = format!("{}/{DEFAULT_CONFIG_FILE}", base.trim_end_matches('/'));
                match fetch_remote(&url).await {
                    Ok(text) => Ok(Some(text)),
                    Err(err) => {
                        warn!(url, %err, "Failed to fetch remote config; trying next source");
                        Ok(None)
                    }
                }
            }
        }
    }
}

/// The ordered source list for one load attempt.
pub fn sources(explicit: Option<&Path>) -> Vec<ConfigSource> {
    let mut list = Vec::new();
    if let Some(path) = explicit {
        list.push(ConfigSource::ExplicitFile(path.to_path_buf()));
    }
    list.push(ConfigSource::EnvFile);
    list.push(ConfigSource::DefaultFile(PathBuf::from(DEFAULT_CONFIG_FILE)));
    list.push(ConfigSource::RemoteDefault);
    list
}

/// Load the configuration document from the first available source.
/// Absence of every source yields `Ok(None)`, not an error.
pub async fn load_config(explicit: Option<&Path>) -> Result<Option<AggregateConfig>, ConfigError> {
    load_config_with(explicit, |name| std::env::var(name).ok()).await
}

/// [`load_config`] with an injectable environment, used by tests.
pub async fn load_config_with(
    explicit: Option<&Path>,
    lookup: impl Fn(&str) -> Option<String> + Sync,
) -> Result<Option<AggregateConfig>, ConfigError> {
    for source in sources(explicit) {
        if let Some(raw) = source.read(&lookup).await? {
            debug!(?source, "Loaded MCP configuration document");
            return normalize(&raw, &lookup).map(Some);
        }
    }
    debug!("No MCP configuration source available");
    Ok(None)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

async fn fetch_remote(url: &str) -> Result<String, ConfigError> {
    let response = reqwest::get(url)
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|source| ConfigError::Fetch {
            url: url.to_string(),
            source,
        })?;
    response.text().await.map_err(|source| ConfigError::Fetch {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn lookup_in(map: HashMap<String, String>) -> impl Fn(&str) -> Option<String> + Sync {
        move |name| map.get(name).cloned()
    }

    #[test]
    fn source_order_is_explicit_env_file_remote() {
        let order = sources(Some(Path::new("override.json")));
        assert_eq!(
            order,
            vec![
                ConfigSource::ExplicitFile(PathBuf::from("override.json")),
                ConfigSource::EnvFile,
                ConfigSource::DefaultFile(PathBuf::from(DEFAULT_CONFIG_FILE)),
                ConfigSource::RemoteDefault,
            ]
        );
        assert_eq!(sources(None).len(), 3);
    }

    #[tokio::test]
    async fn explicit_path_wins_and_interpolates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("servers.json");
        let mut file = std::fs::File::create(&path).expect("create config");
        write!(
            file,
            r#"{{"mcpServers": {{"local": {{"command": "${{RUNNER}}"}}}}}}"#
        )
        .expect("write");

        let config = load_config_with(Some(&path), lookup_in(env(&[("RUNNER", "run-tools")])))
            .await
            .expect("load succeeds")
            .expect("config present");

        match &config.servers[0] {
            ServerConfig::Stdio(cfg) => assert_eq!(cfg.command, "run-tools"),
            other => panic!("expected stdio config, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn env_declared_path_is_used_when_no_explicit_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("from-env.json");
        std::fs::write(&path, r#"{"mcpServers": {"local": {"command": "run"}}}"#)
            .expect("write config");

        let vars = env(&[(CONFIG_PATH_ENV, path.to_str().expect("utf8 path"))]);
        let config = load_config_with(None, lookup_in(vars))
            .await
            .expect("load succeeds")
            .expect("config present");
        assert_eq!(config.servers[0].id(), "local");
    }

    #[tokio::test]
    async fn missing_explicit_path_is_an_error() {
        let err = load_config_with(Some(Path::new("/definitely/not/here.json")), |_| None)
            .await
            .expect_err("must fail");
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[tokio::test]
    async fn remote_source_fetches_default_path() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mcp.config.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"mcpServers": {"remote": {"command": "run"}}}"#),
            )
            .mount(&server)
            .await;

        let vars = env(&[(CONFIG_URL_ENV, server.uri().as_str())]);
        let raw = ConfigSource::RemoteDefault
            .read(&lookup_in(vars))
            .await
            .expect("read succeeds")
            .expect("document present");
        assert!(raw.contains("mcpServers"));
    }

    #[tokio::test]
    async fn absent_sources_yield_none() {
        // No explicit path, no env vars, and the default file is resolved
        // against a directory that does not contain one.
        let vars: HashMap<String, String> = HashMap::new();
        for source in [ConfigSource::EnvFile, ConfigSource::RemoteDefault] {
            let read = source.read(&lookup_in(vars.clone())).await.expect("no error");
            assert_eq!(read, None);
        }
        let missing = ConfigSource::DefaultFile(PathBuf::from("/nope/mcp.config.json"));
        assert_eq!(missing.read(&|_| None).await.expect("no error"), None);
    }
}
