use anyhow::{Context, Result, anyhow, bail};
use relaybot_core::{GenerationParams, OpenAiEndpoint};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Config written by `relaybot init` and used when no config file exists
pub const DEFAULT_CONFIG: &str = include_str!("../../../config/default.toml");

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_private_prefix")]
    pub private_prefix: char,
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("token", &mask_secret(&self.token))
            .field("private_prefix", &self.private_prefix)
            .finish()
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            private_prefix: default_private_prefix(),
        }
    }
}

fn default_private_prefix() -> char {
    relaybot_core::router::DEFAULT_PRIVATE_PREFIX
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub endpoint: OpenAiEndpoint,
    /// Candidate models in fallback order
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl std::fmt::Debug for OpenAiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiConfig")
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("endpoint", &self.endpoint)
            .field("models", &self.models)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_openai_base_url(),
            endpoint: OpenAiEndpoint::default(),
            models: default_models(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl OpenAiConfig {
    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            ..GenerationParams::default()
        }
    }
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_models() -> Vec<String> {
    vec!["gpt-3.5-turbo".to_string()]
}
fn default_max_tokens() -> u32 {
    GenerationParams::default().max_tokens
}
fn default_temperature() -> f64 {
    GenerationParams::default().temperature
}
fn default_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_bind")]
    pub bind: String,
    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl HealthConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.bind, self.port)
            .parse()
            .with_context(|| format!("Invalid health bind address {}:{}", self.bind, self.port))
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_health_bind(),
            port: default_health_port(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_health_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_health_port() -> u16 {
    8080
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".relaybot")
}

impl RelayConfig {
    /// Load from `custom_path`, or `~/.relaybot/config.toml`, falling back to
    /// the built-in defaults when the default path does not exist
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        let content = if path.exists() {
            check_permissions(&path)?;
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config at {}", path.display()))?
        } else if custom_path.is_some() {
            bail!("Config file {} does not exist", path.display());
        } else {
            info!(
                "No config at {}, using built-in defaults. Run `relaybot init` to create one.",
                path.display()
            );
            DEFAULT_CONFIG.to_string()
        };

        Self::parse(&content).with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Parse config text, expanding allowlisted `${VAR}` references from the environment
    pub fn parse(content: &str) -> Result<Self> {
        Self::parse_with(content, |name| std::env::var(name).ok())
    }

    fn parse_with(content: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        for field in hardcoded_secrets(content) {
            warn!(
                "{} is hardcoded in the config file. For security, use an environment variable reference like \"${{VAR}}\"",
                field
            );
        }

        let expanded = expand_env_vars(content, lookup);
        let config: Self = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Check settings that would make the bot unusable
    pub fn validate(&self) -> Result<()> {
        if self.openai.models.is_empty() {
            return Err(anyhow!("openai.models must list at least one model"));
        }
        if let Some(blank) = self.openai.models.iter().position(|m| m.trim().is_empty()) {
            bail!("openai.models[{}] is empty", blank);
        }
        if self.health.enabled {
            self.health.socket_addr()?;
        }
        Ok(())
    }

    /// Copy with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        config.discord.token = mask_secret(&config.discord.token);
        config.openai.api_key = mask_secret(&config.openai.api_key);
        config
    }
}

/// Refuse config files that group or others can read; they may contain secrets
fn check_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                return Err(anyhow!(
                    "Config file {:?} has overly permissive permissions ({:o}). \
                     It may contain secrets. Fix with: chmod 600 {:?}",
                    path,
                    mode & 0o777,
                    path
                ));
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Names of secret fields set to a literal value rather than an env var reference
fn hardcoded_secrets(content: &str) -> Vec<&'static str> {
    let Ok(raw) = toml::from_str::<toml::Value>(content) else {
        return Vec::new();
    };

    [("discord", "token", "Discord token"), ("openai", "api_key", "OpenAI API key")]
        .into_iter()
        .filter(|(section, key, _)| {
            raw.get(*section)
                .and_then(|s| s.get(*key))
                .and_then(|v| v.as_str())
                .is_some_and(|v| !v.is_empty() && !v.contains("${"))
        })
        .map(|(_, _, label)| label)
        .collect()
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &["DISCORD_TOKEN", "OPENAI_API_KEY", "HOME", "USER"];

fn expand_env_vars(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // Unterminated reference, keep the remainder verbatim
            result.push_str(&rest[start..]);
            return result;
        };

        let var_name = &after[..end];
        if ALLOWED_ENV_VARS.contains(&var_name) {
            result.push_str(&lookup(var_name).unwrap_or_default());
        } else {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            result.push_str(&rest[start..start + 2 + end + 1]);
        }
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(name: &str) -> Option<String> {
        match name {
            "DISCORD_TOKEN" => Some("discord-token-value".to_string()),
            "OPENAI_API_KEY" => Some("sk-test-1234567890".to_string()),
            "SECRET_THING" => Some("leaked".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_default_config_parses() {
        let config = RelayConfig::parse_with(DEFAULT_CONFIG, env).unwrap();
        assert_eq!(config.discord.token, "discord-token-value");
        assert_eq!(config.discord.private_prefix, '?');
        assert_eq!(config.openai.api_key, "sk-test-1234567890");
        assert_eq!(config.openai.endpoint, OpenAiEndpoint::Chat);
        assert_eq!(config.openai.models, vec!["gpt-3.5-turbo"]);
        assert_eq!(config.openai.generation_params(), GenerationParams::default());
        assert!(config.health.enabled);
        assert_eq!(config.health.port, 8080);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_env_expands_to_empty() {
        let config = RelayConfig::parse_with(DEFAULT_CONFIG, |_| None).unwrap();
        assert!(config.discord.token.is_empty());
        assert!(config.openai.api_key.is_empty());
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = RelayConfig::parse_with("", env).unwrap();
        assert_eq!(config.openai.base_url, "https://api.openai.com");
        assert_eq!(config.openai.max_tokens, 150);
        assert_eq!(config.openai.timeout_secs, 120);
        assert_eq!(config.health.bind, "0.0.0.0");
    }

    #[test]
    fn test_custom_values() {
        let content = r#"
            [discord]
            token = "${DISCORD_TOKEN}"
            private_prefix = "!"

            [openai]
            endpoint = "completions"
            models = ["gpt-4o-mini", "gpt-3.5-turbo"]
            max_tokens = 300
            temperature = 0.2

            [health]
            enabled = false
        "#;
        let config = RelayConfig::parse_with(content, env).unwrap();
        assert_eq!(config.discord.private_prefix, '!');
        assert_eq!(config.openai.endpoint, OpenAiEndpoint::Completions);
        assert_eq!(config.openai.models.len(), 2);
        let params = config.openai.generation_params();
        assert_eq!(params.max_tokens, 300);
        assert_eq!(params.n, 1);
        assert!(!config.health.enabled);
    }

    #[test]
    fn test_expand_env_vars_allowlist() {
        assert_eq!(
            expand_env_vars("a=${DISCORD_TOKEN};b=${SECRET_THING}", env),
            "a=discord-token-value;b=${SECRET_THING}"
        );
        assert_eq!(expand_env_vars("no refs here", env), "no refs here");
        assert_eq!(expand_env_vars("open ${DISCORD_TOKEN", env), "open ${DISCORD_TOKEN");
        assert_eq!(
            expand_env_vars("${OPENAI_API_KEY}${OPENAI_API_KEY}", env),
            "sk-test-1234567890sk-test-1234567890"
        );
    }

    #[test]
    fn test_hardcoded_secrets_detected() {
        let content = r#"
            [discord]
            token = "literal-token"

            [openai]
            api_key = "${OPENAI_API_KEY}"
        "#;
        assert_eq!(hardcoded_secrets(content), vec!["Discord token"]);
        assert!(hardcoded_secrets(DEFAULT_CONFIG).is_empty());
    }

    #[test]
    fn test_validate_rejects_empty_models() {
        let mut config = RelayConfig::default();
        config.openai.models.clear();
        assert!(config.validate().is_err());

        config.openai.models = vec!["gpt-3.5-turbo".to_string(), " ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_health_bind() {
        let mut config = RelayConfig::default();
        config.health.bind = "not an address".to_string();
        assert!(config.validate().is_err());

        config.health.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret(""), "(empty)");
        assert_eq!(mask_secret("short"), "***");
        assert_eq!(mask_secret("sk-abcdefgh1234"), "sk-...1234");
    }

    #[test]
    fn test_debug_and_redacted_hide_secrets() {
        let config = RelayConfig::parse_with(DEFAULT_CONFIG, env).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("discord-token-value"));
        assert!(!debug.contains("sk-test-1234567890"));

        let shown = toml::to_string_pretty(&config.redacted()).unwrap();
        assert!(!shown.contains("discord-token-value"));
        assert!(!shown.contains("sk-test-1234567890"));
        assert!(shown.contains("gpt-3.5-turbo"));
    }

    #[cfg(unix)]
    #[test]
    fn test_load_from_file() {
        use std::os::unix::fs::PermissionsExt;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[openai]\nmodels = [\"gpt-4o-mini\"]").unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600)).unwrap();

        let config = RelayConfig::load(&Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.openai.models, vec!["gpt-4o-mini"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_load_rejects_world_readable_file() {
        use std::os::unix::fs::PermissionsExt;

        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = RelayConfig::load(&Some(file.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("overly permissive"));
    }

    #[test]
    fn test_load_missing_custom_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(RelayConfig::load(&Some(path)).is_err());
    }
}
