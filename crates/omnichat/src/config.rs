//! Configuration loading for the omnichat CLI.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/omnichat/config.json`
//! 2. Environment variable: `OMNICHAT_CONFIG_CONTENT`
//! 3. An explicit `--config` path
//!
//! Supports JSONC (JSON with comments) and variable substitution:
//! - `{env:VAR_NAME}` - Substitute environment variable
//! - `{file:path}` - Substitute file contents

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use omnichat_provider::{ChatPlugin, Credentials, Provider};
use omnichat_sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Static regex for variable substitution, compiled once.
static VAR_REGEX: OnceLock<Option<regex::Regex>> = OnceLock::new();

fn var_regex() -> Option<&'static regex::Regex> {
    VAR_REGEX
        .get_or_init(|| regex::Regex::new(r"\{(env|file):([^}]+)\}").ok())
        .as_ref()
}

pub const CONTENT_ENV: &str = "OMNICHAT_CONFIG_CONTENT";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    #[error("environment variable not found: {name}")]
    EnvVarNotFound { name: String },

    #[error("file reference not found: {path}")]
    FileRefNotFound { path: String },

    #[error("no plugin with id '{id}' is configured")]
    UnknownPlugin { id: String },

    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Credentials and defaults for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model used when the command line names none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ProviderConfig {
    /// Fields set in `other` win.
    fn merge(self, other: Self) -> Self {
        Self {
            api_key: other.api_key.or(self.api_key),
            secret_key: other.secret_key.or(self.secret_key),
            app_id: other.app_id.or(self.app_id),
            base_url: other.base_url.or(self.base_url),
            model: other.model.or(self.model),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            api_key: self.api_key.clone(),
            secret_key: self.secret_key.clone(),
            app_id: self.app_id.clone(),
            base_url: self.base_url.clone(),
        }
    }
}

/// Top-level CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Per-provider sections keyed by provider id (`providers.OpenAI`, ...).
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxConfig>,

    /// Where generated images and uploads are cached.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Tools offered to the model during chat, run in the script sandbox.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<ChatPlugin>,
}

impl AppConfig {
    /// Load configuration from all sources.
    ///
    /// Loading order (later sources override earlier):
    /// 1. Global config from `~/.config/omnichat/`
    /// 2. `OMNICHAT_CONFIG_CONTENT` environment variable
    /// 3. `explicit`, when given
    pub async fn load(explicit: Option<&Path>) -> ConfigResult<(Self, Vec<PathBuf>)> {
        let mut config = AppConfig::default();
        let mut sources = Vec::new();

        if let Some(global_dir) = Self::global_config_dir() {
            for name in &["config.json", "config.jsonc"] {
                let path = global_dir.join(name);
                if path.exists() {
                    config = config.merge(Self::load_file(&path).await?);
                    sources.push(path);
                    break;
                }
            }
        }

        if let Ok(content) = std::env::var(CONTENT_ENV) {
            let content = Self::substitute_variables(&content, Path::new("."))?;
            config = config.merge(Self::parse_jsonc(&content, "<env>")?);
        }

        if let Some(path) = explicit {
            config = config.merge(Self::load_file(path).await?);
            sources.push(path.to_path_buf());
        }

        Ok((config, sources))
    }

    /// Get the global config directory.
    ///
    /// On Unix, `~/.config/omnichat` wins over the platform directory when it exists.
    pub fn global_config_dir() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            if let Some(home) = dirs::home_dir() {
                let xdg_config = home.join(".config").join("omnichat");
                if xdg_config.exists() {
                    return Some(xdg_config);
                }
            }
        }

        dirs::config_dir().map(|d| d.join("omnichat"))
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
        let content = Self::substitute_variables(&content, path)?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// The section for `provider`. Keys match case-insensitively and may use
    /// any alias the provider id parser accepts.
    pub fn provider(&self, provider: Provider) -> ProviderConfig {
        self.providers
            .iter()
            .filter(|(key, _)| key.parse::<Provider>().ok() == Some(provider))
            .fold(ProviderConfig::default(), |acc, (_, section)| {
                acc.merge(section.clone())
            })
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        for (key, section) in other.providers {
            let merged = match self.providers.remove(&key) {
                Some(existing) => existing.merge(section),
                None => section,
            };
            self.providers.insert(key, merged);
        }
        if other.sandbox.is_some() {
            self.sandbox = other.sandbox;
        }
        if other.cache_dir.is_some() {
            self.cache_dir = other.cache_dir;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        for plugin in other.plugins {
            match self.plugins.iter_mut().find(|p| p.id == plugin.id) {
                Some(existing) => *existing = plugin,
                None => self.plugins.push(plugin),
            }
        }
        self
    }

    /// Plugins to offer for one chat: the named ones, or all when `ids` is
    /// empty.
    pub fn select_plugins(&self, ids: &[String]) -> ConfigResult<Vec<ChatPlugin>> {
        if ids.is_empty() {
            return Ok(self.plugins.clone());
        }
        ids.iter()
            .map(|id| {
                self.plugins
                    .iter()
                    .find(|p| &p.id == id)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownPlugin { id: id.clone() })
            })
            .collect()
    }

    /// Parse JSONC (JSON with comments).
    fn parse_jsonc(content: &str, source: &str) -> ConfigResult<Self> {
        let stripped = strip_comments(content);
        serde_json::from_str(&stripped).map_err(|e| ConfigError::InvalidJson {
            path: source.to_string(),
            message: e.to_string(),
        })
    }

    /// Substitute `{env:..}` and `{file:..}` references. File paths are
    /// relative to the config file.
    fn substitute_variables(content: &str, config_path: &Path) -> ConfigResult<String> {
        let Some(re) = var_regex() else {
            return Ok(content.to_string());
        };
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        let mut result = content.to_string();

        for cap in re.captures_iter(content) {
            let (Some(full_match), Some(kind), Some(value)) = (cap.get(0), cap.get(1), cap.get(2))
            else {
                continue;
            };
            let value = value.as_str();

            let replacement = match kind.as_str() {
                "env" => std::env::var(value).map_err(|_| ConfigError::EnvVarNotFound {
                    name: value.to_string(),
                })?,
                "file" => {
                    let file_path = config_dir.join(value);
                    std::fs::read_to_string(&file_path)
                        .map(|v| v.trim().to_string())
                        .map_err(|_| ConfigError::FileRefNotFound {
                            path: file_path.display().to_string(),
                        })?
                }
                _ => continue,
            };

            result = result.replace(full_match.as_str(), &escape_json(&replacement));
        }

        Ok(result)
    }
}

/// Substituted values land inside JSON strings.
fn escape_json(value: &str) -> String {
    let quoted = serde_json::Value::String(value.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Strip `//` and `/* */` comments outside of strings.
fn strip_comments(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    let mut escape_next = false;

    while let Some(c) = chars.next() {
        if escape_next {
            result.push(c);
            escape_next = false;
            continue;
        }
        if in_string {
            match c {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            result.push(c);
            continue;
        }

        match (c, chars.peek()) {
            ('"', _) => {
                in_string = true;
                result.push(c);
            }
            ('/', Some(&'/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        result.push('\n');
                        break;
                    }
                }
            }
            ('/', Some(&'*')) => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    // Keep line numbers stable for parse errors.
                    if c == '\n' {
                        result.push('\n');
                    }
                    prev = c;
                }
            }
            _ => result.push(c),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments() {
        let input = r#"{
            // Line comment
            "key": "value", // trailing comment
            /* block comment */
            "key2": "val/*not a comment*/ue",
            "url": "https://api.example.com"
        }"#;

        let result = strip_comments(input);
        assert!(!result.contains("Line comment"));
        assert!(!result.contains("trailing comment"));
        assert!(!result.contains("block comment"));
        assert!(result.contains("val/*not a comment*/ue"));
        assert!(result.contains("https://api.example.com"));
    }

    #[test]
    fn test_parse_jsonc() {
        let input = r#"{
            // keys
            "providers": {
                "OpenAI": {"api_key": "sk-1", "model": "gpt-4o"},
                "Spark": {"app_id": "a", "api_key": "k", "secret_key": "s"}
            },
            "sandbox": {"interpreter": "deno"},
            "cache_dir": "/tmp/omnichat"
        }"#;

        let config = AppConfig::parse_jsonc(input, "test").unwrap();
        let openai = config.provider(Provider::OpenAI);
        assert_eq!(openai.api_key.as_deref(), Some("sk-1"));
        assert_eq!(openai.model.as_deref(), Some("gpt-4o"));
        assert_eq!(config.provider(Provider::Spark).app_id.as_deref(), Some("a"));

        let sandbox = config.sandbox.unwrap();
        assert_eq!(sandbox.interpreter, "deno");
        assert_eq!(sandbox.timeout_secs, SandboxConfig::default().timeout_secs);
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/omnichat")));
    }

    #[test]
    fn test_provider_keys_use_aliases() {
        let config = AppConfig::parse_jsonc(
            r#"{"providers": {"zhipu": {"api_key": "z"}, "erniebot": {"api_key": "e"}}}"#,
            "test",
        )
        .unwrap();
        assert_eq!(config.provider(Provider::ZhipuAI).api_key.as_deref(), Some("z"));
        assert_eq!(config.provider(Provider::Ernie).api_key.as_deref(), Some("e"));
        assert_eq!(config.provider(Provider::Gemini), ProviderConfig::default());
    }

    #[test]
    fn test_merge_config() {
        let base = AppConfig::parse_jsonc(
            r#"{"providers": {"OpenAI": {"api_key": "old", "base_url": "http://proxy"}}, "log_level": "info"}"#,
            "base",
        )
        .unwrap();
        let other = AppConfig::parse_jsonc(
            r#"{"providers": {"OpenAI": {"api_key": "new"}}, "cache_dir": "/c"}"#,
            "other",
        )
        .unwrap();

        let merged = base.merge(other);
        let openai = merged.provider(Provider::OpenAI);
        assert_eq!(openai.api_key.as_deref(), Some("new"));
        assert_eq!(openai.base_url.as_deref(), Some("http://proxy"));
        assert_eq!(merged.log_level.as_deref(), Some("info"));
        assert_eq!(merged.cache_dir, Some(PathBuf::from("/c")));
    }

    #[test]
    fn test_plugins_merge_by_id() {
        let base = AppConfig::parse_jsonc(
            r#"{
                // Tools available to every chat
                "plugins": [
                    {"id": "weather", "code": "'sunny'", "parameters": [{"name": "city", "type": "string"}]},
                    {"id": "clock", "code": "new Date().toISOString()"}
                ]
            }"#,
            "base",
        )
        .unwrap();
        let other = AppConfig::parse_jsonc(
            r#"{"plugins": [{"id": "weather", "code": "'rainy'"}, {"id": "dice", "code": "4"}]}"#,
            "other",
        )
        .unwrap();

        let merged = base.merge(other);
        let ids: Vec<&str> = merged.plugins.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["weather", "clock", "dice"]);
        assert_eq!(merged.plugins[0].code, "'rainy'");
        assert!(merged.plugins[0].parameters.is_empty());
    }

    #[test]
    fn test_select_plugins() {
        let config = AppConfig::parse_jsonc(
            r#"{"plugins": [{"id": "weather", "code": "1"}, {"id": "clock", "code": "2"}]}"#,
            "test",
        )
        .unwrap();

        assert_eq!(config.select_plugins(&[]).unwrap().len(), 2);
        let picked = config.select_plugins(&["clock".to_string()]).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, "clock");

        let err = config.select_plugins(&["stocks".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPlugin { id } if id == "stocks"));
    }

    #[test]
    fn test_credentials_from_section() {
        let section = ProviderConfig {
            api_key: Some("k".to_string()),
            base_url: Some("http://localhost:9".to_string()),
            ..Default::default()
        };
        let credentials = section.credentials();
        assert_eq!(credentials.api_key.as_deref(), Some("k"));
        assert_eq!(credentials.base_url.as_deref(), Some("http://localhost:9"));
        assert!(credentials.secret_key.is_none());
    }

    #[tokio::test]
    async fn test_load_file_with_file_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("key.txt"), "sk-from-file\n").unwrap();
        let path = dir.path().join("config.jsonc");
        std::fs::write(
            &path,
            r#"{
                // key lives next to the config
                "providers": {"DeepSeek": {"api_key": "{file:key.txt}"}}
            }"#,
        )
        .unwrap();

        let config = AppConfig::load_file(&path).await.unwrap();
        assert_eq!(
            config.provider(Provider::DeepSeek).api_key.as_deref(),
            Some("sk-from-file")
        );
    }

    #[tokio::test]
    async fn test_missing_file_reference() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"providers": {"Gemini": {"api_key": "{file:nope}"}}}"#).unwrap();

        let err = AppConfig::load_file(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::FileRefNotFound { .. }));
    }

    #[test]
    fn test_missing_env_variable() {
        let err = AppConfig::substitute_variables(
            r#"{"api_key": "{env:OMNICHAT_TEST_SURELY_UNSET_VAR}"}"#,
            Path::new("config.json"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::EnvVarNotFound { name } if name == "OMNICHAT_TEST_SURELY_UNSET_VAR"
        ));
    }

    #[test]
    fn test_substituted_values_are_escaped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("v"), "a\"b").unwrap();
        let content = AppConfig::substitute_variables(
            r#"{"log_level": "{file:v}"}"#,
            &dir.path().join("config.json"),
        )
        .unwrap();
        let config = AppConfig::parse_jsonc(&content, "test").unwrap();
        assert_eq!(config.log_level.as_deref(), Some("a\"b"));
    }

    #[tokio::test]
    async fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("explicit.json");
        std::fs::write(&path, r#"{"providers": {"Ollama": {"model": "qwen2"}}}"#).unwrap();

        let (config, sources) = AppConfig::load(Some(&path)).await.unwrap();
        assert!(sources.contains(&path));
        assert_eq!(config.provider(Provider::Ollama).model.as_deref(), Some("qwen2"));
    }

    #[tokio::test]
    async fn test_invalid_json_names_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = AppConfig::load_file(&path).await.unwrap_err();
        match err {
            ConfigError::InvalidJson { path: source, .. } => assert!(source.ends_with("bad.json")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
