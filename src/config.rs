use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub kernel: KernelConfig,
    pub bridge: BridgeConfig,
    pub llm: LlmConfig,
}

/// Where the execution kernel listens.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub bind: String,
    pub port: u16,
    /// A stalled request read closes the connection after this long
    pub read_timeout_ms: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            read_timeout_ms: 30_000,
        }
    }
}

/// Host-side callback bridge for `llm_query()`.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeConfig {
    pub bind: String,
    pub port: u16,
    /// Name under which the host is reachable from inside the container
    pub host_alias: String,
    /// Bound on every individual request read (408 when exceeded)
    pub read_timeout_ms: u64,
    /// Concurrent model calls
    pub max_workers: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8081,
            host_alias: "host.docker.internal".to_string(),
            read_timeout_ms: 5_000,
            max_workers: 8,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    /// `anthropic` or `ollama`
    pub provider: String,
    pub model: String,
    /// Supports ${ENV_VAR} substitution
    pub api_key: String,
    pub max_tokens_per_request: u32,
    /// Base URL override (Ollama host, or an Anthropic-compatible proxy)
    pub host: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: default_model(),
            api_key: String::new(),
            max_tokens_per_request: default_max_tokens(),
            host: None,
        }
    }
}

fn default_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        // Expand environment variables like ${ANTHROPIC_API_KEY}
        let expanded = shellexpand::env(&content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Like [`Config::load`], but falls back to defaults when no path is given.
    pub fn load_or_default(path: Option<&str>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.kernel.port, 8080);
        assert_eq!(config.bridge.port, 8081);
        assert_eq!(config.bridge.host_alias, "host.docker.internal");
        assert_eq!(config.bridge.read_timeout_ms, 5_000);
        assert_eq!(config.bridge.max_workers, 8);
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.llm.model, "claude-haiku-4-5-20251001");
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let file = write_config("");
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.kernel.bind, "0.0.0.0");
        assert_eq!(config.llm.max_tokens_per_request, 4096);
    }

    #[test]
    fn test_partial_sections() {
        let file = write_config(
            r#"
[bridge]
port = 9999
max_workers = 2

[llm]
provider = "ollama"
model = "llama3.2"
host = "http://gpu-box:11434"
"#,
        );
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.bridge.port, 9999);
        assert_eq!(config.bridge.max_workers, 2);
        assert_eq!(config.bridge.read_timeout_ms, 5_000);
        assert_eq!(config.kernel.port, 8080);
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.host.as_deref(), Some("http://gpu-box:11434"));
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("RLM_SANDBOX_TEST_KEY", "sk-from-env");
        let file = write_config("[llm]\napi_key = \"${RLM_SANDBOX_TEST_KEY}\"\n");
        let config = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.llm.api_key, "sk-from-env");
    }

    #[test]
    fn test_missing_env_var_is_an_error() {
        let file = write_config("[llm]\napi_key = \"${RLM_SANDBOX_SURELY_UNSET_VAR}\"\n");
        assert!(Config::load(file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(Config::load("/nonexistent/rlm-sandbox.toml").is_err());
        assert!(Config::load_or_default(None).is_ok());
    }
}
