//! Application configuration for regraph.
//!
//! User config lives at `~/.regraph/regraph.toml`.
//! CLI flags override config file values, which override defaults.
//!
//! Everything policy-shaped is configuration rather than code: classifier
//! rules, chunk sizing, retry/backoff parameters, and the embedding
//! provider/dimensionality all come from here.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RegraphError, Result};
use crate::types::Role;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "regraph.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".regraph";

// ---------------------------------------------------------------------------
// Config structs (matching regraph.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline parallelism knobs.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Chunk splitting policy.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Embedding backend selection and parameters.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Retry/backoff policy for external calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// URL classification rules, most-specific-first. Empty means the
    /// built-in default rule set.
    #[serde(default)]
    pub classifier: Vec<ClassifyRuleConfig>,

    /// Default graph database path.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            chunking: ChunkingConfig::default(),
            embedding: EmbeddingConfig::default(),
            retry: RetryConfig::default(),
            classifier: Vec::new(),
            db_path: default_db_path(),
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum resources processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Maximum in-flight embedding calls across all workers.
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            embed_concurrency: default_embed_concurrency(),
        }
    }
}

fn default_workers() -> u32 {
    4
}
fn default_embed_concurrency() -> u32 {
    8
}

/// `[chunking]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum characters per chunk.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Characters carried over between pieces of an oversized paragraph.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    2000
}
fn default_overlap_chars() -> usize {
    200
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend: "openai" (OpenAI-compatible HTTP endpoint) or "noop".
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Model identifier sent to the backend.
    #[serde(default = "default_embed_model")]
    pub model: String,

    /// Declared embedding dimensionality; responses are verified against it.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Base URL of the OpenAI-compatible endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the API key (never the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-call timeout in seconds.
    #[serde(default = "default_embed_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embed_model(),
            dimension: default_dimension(),
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_embed_timeout(),
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}
fn default_embed_model() -> String {
    "text-embedding-3-small".into()
}
fn default_dimension() -> usize {
    1536
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1".into()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_embed_timeout() -> u64 {
    30
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per external call before degrading.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds, doubled per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    250
}

/// `[[classifier]]` entry — one URL classification rule.
///
/// First matching rule wins; keep rules most-specific-first. A rule matches
/// when every present predicate matches (path regex and/or content-type
/// prefix).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyRuleConfig {
    /// Rule name for tracing.
    pub name: String,
    /// Role assigned on match.
    pub role: Role,
    /// Regex matched against the canonical URL string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    /// Content-type prefix (e.g. "text/html", "application/pdf").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

fn default_db_path() -> String {
    "~/.regraph/regraph.db".into()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.regraph/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| RegraphError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.regraph/regraph.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does
/// not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| RegraphError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| RegraphError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| RegraphError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| RegraphError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| RegraphError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Validate everything that must be right before the first resource is
/// processed. Failures here are fatal (error class d); nothing else is.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    if config.pipeline.workers == 0 {
        return Err(RegraphError::config("pipeline.workers must be at least 1"));
    }
    if config.chunking.max_chars == 0 {
        return Err(RegraphError::config("chunking.max_chars must be non-zero"));
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        return Err(RegraphError::config(
            "chunking.overlap_chars must be smaller than chunking.max_chars",
        ));
    }
    if config.embedding.dimension == 0 {
        return Err(RegraphError::config("embedding.dimension must be non-zero"));
    }
    if config.retry.max_attempts == 0 {
        return Err(RegraphError::config("retry.max_attempts must be at least 1"));
    }

    match config.embedding.provider.as_str() {
        "noop" => {}
        "openai" => {
            let var_name = &config.embedding.api_key_env;
            match std::env::var(var_name) {
                Ok(val) if !val.is_empty() => {}
                _ => {
                    return Err(RegraphError::config(format!(
                        "embedding API key not found. Set the {var_name} environment variable."
                    )));
                }
            }
        }
        other => {
            return Err(RegraphError::config(format!(
                "unknown embedding provider: {other} (expected \"openai\" or \"noop\")"
            )));
        }
    }

    // Rule patterns must compile before the first resource is processed.
    for rule in &config.classifier {
        if let Some(pattern) = &rule.url_pattern {
            regex::Regex::new(pattern).map_err(|e| {
                RegraphError::config(format!("classifier rule {}: invalid regex: {e}", rule.name))
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_chars"));
        assert!(toml_str.contains("OPENAI_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.workers, 4);
        assert_eq!(parsed.chunking.max_chars, 2000);
        assert_eq!(parsed.embedding.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn config_with_classifier_rules() {
        let toml_str = r#"
[embedding]
provider = "noop"

[[classifier]]
name = "pdf-attachments"
role = "attachment"
url_pattern = '(?i)\.pdf$'

[[classifier]]
name = "html-pages"
role = "document-page"
content_type = "text/html"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.classifier.len(), 2);
        assert_eq!(config.classifier[0].role, Role::Attachment);
        validate_config(&config).expect("valid");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.embedding.provider = "noop".into();
        config.chunking.overlap_chars = config.chunking.max_chars;
        assert!(validate_config(&config).is_err());

        let mut config = AppConfig::default();
        config.embedding.provider = "quantum".into();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown embedding provider"));
    }

    #[test]
    fn validation_rejects_invalid_rule_regex() {
        let mut config = AppConfig::default();
        config.embedding.provider = "noop".into();
        config.classifier.push(ClassifyRuleConfig {
            name: "broken".into(),
            role: Role::Irrelevant,
            url_pattern: Some("([unclosed".into()),
            content_type: None,
        });
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("invalid regex"));
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.embedding.api_key_env = "REGRAPH_TEST_NONEXISTENT_KEY_98765".into();
        let result = validate_config(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
