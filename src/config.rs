use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub advisor: AdvisorConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

/// Allowlisted repository roots. Indexing refuses any path that does not
/// resolve, after symlinks, to a descendant of one of these.
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    pub allowed_roots: Vec<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// HS256 signing secret. Overridden by `ECHODEX_JWT_SECRET` when set.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Accept unsigned tokens. Development only; never enable in production.
    #[serde(default)]
    pub allow_unverified: bool,
}

impl AuthConfig {
    /// Environment takes precedence over the config file so deployments can
    /// keep secrets out of checked-in TOML.
    pub fn resolve_secret(&self) -> Option<String> {
        std::env::var("ECHODEX_JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.jwt_secret.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chunk_chars(),
            overlap_lines: default_overlap_lines(),
        }
    }
}

fn default_max_chunk_chars() -> usize {
    1000
}
fn default_overlap_lines() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_supported_extensions")]
    pub supported_extensions: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default = "default_guided_patterns")]
    pub default_guided_patterns: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            supported_extensions: default_supported_extensions(),
            max_file_bytes: default_max_file_bytes(),
            default_guided_patterns: default_guided_patterns(),
        }
    }
}

fn default_supported_extensions() -> Vec<String> {
    [
        "py", "swift", "js", "ts", "tsx", "jsx", "go", "rs", "java", "kt", "cpp", "c", "h", "md",
        "txt", "json", "yaml", "yml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_guided_patterns() -> Vec<String> {
    vec![
        "**/*.py".to_string(),
        "**/*.swift".to_string(),
        "**/*.ts".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: i64,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: i64,
    /// Candidates fetched per requested result before the tenancy and
    /// soft-delete filters run.
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: i64,
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            overfetch_factor: default_overfetch_factor(),
            max_query_chars: default_max_query_chars(),
        }
    }
}

fn default_top_k() -> i64 {
    5
}
fn default_max_top_k() -> i64 {
    50
}
fn default_overfetch_factor() -> i64 {
    4
}
fn default_max_query_chars() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpeechConfig {
    /// `disabled` or `http` (an OpenAI-compatible transcription endpoint).
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_speech_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_speech_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            url: None,
            model: default_speech_model(),
            language: default_language(),
            timeout_secs: default_speech_timeout_secs(),
            max_duration_secs: default_max_duration_secs(),
            sample_rate: default_sample_rate(),
        }
    }
}

fn default_speech_model() -> String {
    "whisper-1".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_speech_timeout_secs() -> u64 {
    10
}
fn default_max_duration_secs() -> u64 {
    30
}
fn default_sample_rate() -> u32 {
    16000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdvisorConfig {
    /// `disabled` or `openai`. When disabled (or the call fails) the advisor
    /// falls back to the rule-based generator; it never fails the request.
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default = "default_advisor_model")]
    pub model: String,
    #[serde(default = "default_advisor_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_snippets")]
    pub max_snippets: usize,
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: default_advisor_model(),
            timeout_secs: default_advisor_timeout_secs(),
            max_snippets: default_max_snippets(),
            max_image_bytes: default_max_image_bytes(),
        }
    }
}

fn default_advisor_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_advisor_timeout_secs() -> u64 {
    8
}
fn default_max_snippets() -> usize {
    3
}
fn default_max_image_bytes() -> usize {
    5 * 1024 * 1024
}

/// Per-user request budgets, as requests per minute per rate class.
#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_index_per_min")]
    pub index_per_min: u32,
    #[serde(default = "default_search_per_min")]
    pub search_per_min: u32,
    #[serde(default = "default_transcribe_per_min")]
    pub transcribe_per_min: u32,
    #[serde(default = "default_advise_per_min")]
    pub advise_per_min: u32,
    #[serde(default = "default_screenshot_per_min")]
    pub screenshot_per_min: u32,
    #[serde(default = "default_repos_per_min")]
    pub repos_per_min: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            index_per_min: default_index_per_min(),
            search_per_min: default_search_per_min(),
            transcribe_per_min: default_transcribe_per_min(),
            advise_per_min: default_advise_per_min(),
            screenshot_per_min: default_screenshot_per_min(),
            repos_per_min: default_repos_per_min(),
        }
    }
}

fn default_index_per_min() -> u32 {
    10
}
fn default_search_per_min() -> u32 {
    60
}
fn default_transcribe_per_min() -> u32 {
    120
}
fn default_advise_per_min() -> u32 {
    30
}
fn default_screenshot_per_min() -> u32 {
    60
}
fn default_repos_per_min() -> u32 {
    60
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Fail closed: an empty allowlist means indexing could reach anywhere.
    if config.sandbox.allowed_roots.is_empty() {
        anyhow::bail!("sandbox.allowed_roots must list at least one repository root");
    }

    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    if config.retrieval.default_top_k < 1 || config.retrieval.max_top_k < 1 {
        anyhow::bail!("retrieval.default_top_k and retrieval.max_top_k must be >= 1");
    }
    if !(1..=20).contains(&config.retrieval.overfetch_factor) {
        anyhow::bail!("retrieval.overfetch_factor must be in [1, 20]");
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        match config.embedding.provider.as_str() {
            "openai" | "ollama" if config.embedding.dims.is_none() => {
                anyhow::bail!(
                    "embedding.dims must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            _ => {}
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    match config.speech.provider.as_str() {
        "disabled" => {}
        "http" if config.speech.url.is_none() => {
            anyhow::bail!("speech.url must be specified when provider is 'http'");
        }
        "http" => {}
        other => anyhow::bail!("Unknown speech provider: '{}'. Must be disabled or http.", other),
    }

    match config.advisor.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown advisor provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}

impl Config {
    /// Minimal configuration for tests and tooling that never touch disk
    /// outside a scratch directory.
    pub fn minimal(db_path: PathBuf, allowed_root: PathBuf) -> Self {
        Self {
            db: DbConfig { path: db_path },
            server: ServerConfig {
                bind: "127.0.0.1:7431".to_string(),
            },
            sandbox: SandboxConfig {
                allowed_roots: vec![allowed_root],
            },
            auth: AuthConfig::default(),
            chunking: ChunkingConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            speech: SpeechConfig::default(),
            advisor: AdvisorConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        r#"
[db]
path = "/tmp/echodex.sqlite"

[server]
bind = "127.0.0.1:7431"

[sandbox]
allowed_roots = ["/home/dev/repos"]
"#
        .to_string()
    }

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(&base_toml()).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.chunking.max_chars, 1000);
        assert_eq!(config.retrieval.overfetch_factor, 4);
        assert_eq!(config.limits.index_per_min, 10);
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_empty_sandbox_rejected() {
        let toml_str = base_toml().replace(r#"["/home/dev/repos"]"#, "[]");
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_openai_embedding_requires_model_and_dims() {
        let toml_str = format!("{}\n[embedding]\nprovider = \"openai\"\n", base_toml());
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());

        let toml_str = format!(
            "{}\n[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\ndims = 1536\n",
            base_toml()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        validate(&config).unwrap();
    }

    #[test]
    fn test_unknown_providers_rejected() {
        for section in [
            "[embedding]\nprovider = \"quantum\"",
            "[speech]\nprovider = \"quantum\"",
            "[advisor]\nprovider = \"quantum\"",
        ] {
            let toml_str = format!("{}\n{}\n", base_toml(), section);
            let config: Config = toml::from_str(&toml_str).unwrap();
            assert!(validate(&config).is_err(), "section {section} should fail");
        }
    }

    #[test]
    fn test_http_speech_requires_url() {
        let toml_str = format!("{}\n[speech]\nprovider = \"http\"\n", base_toml());
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }
}
