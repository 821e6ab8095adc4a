//! Application configuration for FeatureLens.
//!
//! User config lives at `~/.featurelens/featurelens.toml`.
//! CLI flags override config file values, which override defaults.
//! Once loaded, every section is treated as immutable and shared read-only
//! across research cycles.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FeatureLensError, Result};
use crate::types::Gap;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "featurelens.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".featurelens";

// ---------------------------------------------------------------------------
// Config structs (matching featurelens.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub scraping: ScrapingConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub research: ResearchConfig,
}

/// `[scraping]` section: fetch behavior, pacing, and domain rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapingConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for a single HTTP attempt.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Cap on total time spent per source, all attempts included.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First retry delay; doubles on each further attempt.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Concurrent primary-source fetches within one cycle.
    #[serde(default = "default_fan_out")]
    pub primary_fan_out: usize,

    /// Pacing for origins without an explicit rule.
    #[serde(default = "default_rps")]
    pub default_requests_per_second: f64,

    /// Host allow-list. An entry also matches its subdomains.
    #[serde(default = "default_allowed_domains")]
    pub allowed_domains: Vec<String>,

    /// Permit loopback/private hosts (local mirrors, test servers).
    #[serde(default)]
    pub allow_private_hosts: bool,

    /// Per-origin rules.
    #[serde(default)]
    pub origins: Vec<OriginRule>,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
            stage_timeout_secs: default_stage_timeout(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base(),
            primary_fan_out: default_fan_out(),
            default_requests_per_second: default_rps(),
            allowed_domains: default_allowed_domains(),
            allow_private_hosts: false,
            origins: Vec::new(),
        }
    }
}

impl ScrapingConfig {
    /// The most specific rule whose domain matches `host`.
    pub fn origin_rule(&self, host: &str) -> Option<&OriginRule> {
        self.origins
            .iter()
            .filter(|rule| host_matches(host, &rule.domain))
            .max_by_key(|rule| rule.domain.len())
    }
}

fn default_user_agent() -> String {
    concat!("FeatureLens/", env!("CARGO_PKG_VERSION")).into()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_stage_timeout() -> u64 {
    90
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base() -> u64 {
    500
}
fn default_fan_out() -> usize {
    4
}
fn default_rps() -> f64 {
    2.0
}
fn default_allowed_domains() -> Vec<String> {
    [
        "elastic.co",
        "github.com",
        "docs.github.com",
        "readthedocs.io",
        "stackoverflow.com",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// `[[scraping.origins]]` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OriginRule {
    /// Registrable domain the rule applies to (subdomains included).
    pub domain: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_second: Option<f64>,

    /// CSS selectors tried in order to find the main content region.
    #[serde(default)]
    pub content_selectors: Vec<String>,

    /// CSS selectors removed from the content region before text and links are read.
    #[serde(default)]
    pub strip_selectors: Vec<String>,

    /// Domain-authority weight in [0, 1] used by relevance scoring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<f32>,
}

/// `[discovery]` section: relevance scoring and link following.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_threshold")]
    pub relevance_threshold: f32,

    #[serde(default = "default_max_related")]
    pub max_related_sources: usize,

    /// Hops from a primary source. 1 = no expansion from related sources.
    #[serde(default = "default_follow_depth")]
    pub max_follow_depth: u32,

    /// Authority for any host without an explicit weight.
    #[serde(default = "default_authority")]
    pub default_authority: f32,

    /// Domain tag → path keywords indicating the same product area.
    #[serde(default)]
    pub domain_keywords: BTreeMap<String, Vec<String>>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: default_threshold(),
            max_related_sources: default_max_related(),
            max_follow_depth: default_follow_depth(),
            default_authority: default_authority(),
            domain_keywords: BTreeMap::new(),
        }
    }
}

fn default_threshold() -> f32 {
    0.45
}
fn default_max_related() -> usize {
    10
}
fn default_follow_depth() -> u32 {
    1
}
fn default_authority() -> f32 {
    0.5
}

/// Extraction backend, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionProvider {
    /// OpenRouter-compatible chat-completions endpoint.
    Openrouter,
    /// JSON-lines subprocess bridge.
    Bridge,
}

/// `[extraction]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_provider")]
    pub provider: ExtractionProvider,

    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_extraction_endpoint")]
    pub endpoint: String,

    /// Approximate token budget for the submitted source text.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    #[serde(default = "default_extraction_timeout")]
    pub timeout_secs: u64,

    /// Checklist items a second pass may try to fill.
    #[serde(default = "default_fillable_gaps")]
    pub fillable_gaps: Vec<Gap>,

    #[serde(default = "default_bridge_cmd")]
    pub bridge_cmd: String,

    #[serde(default)]
    pub bridge_args: Vec<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_extraction_provider(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            endpoint: default_extraction_endpoint(),
            token_budget: default_token_budget(),
            timeout_secs: default_extraction_timeout(),
            fillable_gaps: default_fillable_gaps(),
            bridge_cmd: default_bridge_cmd(),
            bridge_args: Vec::new(),
        }
    }
}

fn default_extraction_provider() -> ExtractionProvider {
    ExtractionProvider::Openrouter
}
fn default_model() -> String {
    "moonshotai/kimi-k2.5".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_extraction_endpoint() -> String {
    "https://openrouter.ai/api/v1/chat/completions".into()
}
fn default_token_budget() -> usize {
    12_000
}
fn default_extraction_timeout() -> u64 {
    120
}
fn default_fillable_gaps() -> Vec<Gap> {
    Gap::ALL.to_vec()
}
fn default_bridge_cmd() -> String {
    "bun".into()
}

/// Embedding backend, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingProvider {
    /// Remote sparse-embedding inference endpoint.
    Http,
    /// In-process weighted term frequencies.
    Local,
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: EmbeddingProvider,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model input limit; windows are truncated to fit.
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            endpoint: None,
            api_key_env: None,
            max_input_tokens: default_max_input_tokens(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

fn default_embedding_provider() -> EmbeddingProvider {
    EmbeddingProvider::Local
}
fn default_embedding_model() -> String {
    "local-term-frequency".into()
}
fn default_max_input_tokens() -> usize {
    512
}
fn default_embedding_timeout() -> u64 {
    30
}

/// `[research]` section: orchestration and cache policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// libSQL database file holding research documents.
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Directory of `<feature-id>.json` files for the file feature source.
    #[serde(default = "default_features_dir")]
    pub features_dir: String,

    /// Successful sources younger than this are reused on `force_refresh`.
    #[serde(default = "default_freshness")]
    pub source_freshness_hours: u64,

    /// Completed documents older than this are reset by `invalidate`.
    #[serde(default = "default_stale_after")]
    pub stale_after_hours: u64,

    /// Features researched at once by batch runs.
    #[serde(default = "default_concurrent_features")]
    pub concurrent_features: usize,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            features_dir: default_features_dir(),
            source_freshness_hours: default_freshness(),
            stale_after_hours: default_stale_after(),
            concurrent_features: default_concurrent_features(),
        }
    }
}

fn default_store_path() -> String {
    "~/.featurelens/research.db".into()
}
fn default_features_dir() -> String {
    "features".into()
}
fn default_freshness() -> u64 {
    24
}
fn default_stale_after() -> u64 {
    168
}
fn default_concurrent_features() -> usize {
    2
}

// ---------------------------------------------------------------------------
// Host matching
// ---------------------------------------------------------------------------

/// Whether `host` equals `domain` or is one of its subdomains.
///
/// Matching is case-insensitive and ignores a trailing dot.
pub fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain
        .trim()
        .trim_start_matches("*.")
        .trim_end_matches('.')
        .to_ascii_lowercase();
    if domain.is_empty() {
        return false;
    }
    host == domain
        || host
            .strip_suffix(&domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.featurelens/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| FeatureLensError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.featurelens/featurelens.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
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
    let content = std::fs::read_to_string(path).map_err(|e| FeatureLensError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        FeatureLensError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| FeatureLensError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| FeatureLensError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| FeatureLensError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// Check that the extraction API key env var is set when the provider needs one.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    if config.extraction.provider != ExtractionProvider::Openrouter {
        return Ok(());
    }
    let var_name = &config.extraction.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(FeatureLensError::config(format!(
            "extraction API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("allowed_domains"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.scraping.max_attempts, 3);
        assert_eq!(parsed.discovery.max_related_sources, 10);
        assert_eq!(parsed.research.source_freshness_hours, 24);
        assert_eq!(parsed.extraction.fillable_gaps.len(), Gap::ALL.len());
    }

    #[test]
    fn config_with_origin_rules() {
        let toml_str = r##"
[scraping]
allowed_domains = ["elastic.co"]

[[scraping.origins]]
domain = "elastic.co"
requests_per_second = 1.0
content_selectors = ["#content"]
strip_selectors = [".feedback"]
authority = 0.9

[[scraping.origins]]
domain = "discuss.elastic.co"
authority = 0.3

[discovery]
relevance_threshold = 0.5

[discovery.domain_keywords]
security = ["security", "siem", "detection"]
"##;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.scraping.origins.len(), 2);
        assert_eq!(config.discovery.relevance_threshold, 0.5);

        let rule = config.scraping.origin_rule("www.elastic.co").expect("rule");
        assert_eq!(rule.authority, Some(0.9));
        let rule = config.scraping.origin_rule("discuss.elastic.co").expect("rule");
        assert_eq!(rule.authority, Some(0.3));
        assert!(config.scraping.origin_rule("example.com").is_none());
        assert_eq!(config.discovery.domain_keywords["security"].len(), 3);
    }

    #[test]
    fn host_matching_includes_subdomains() {
        assert!(host_matches("elastic.co", "elastic.co"));
        assert!(host_matches("www.elastic.co", "elastic.co"));
        assert!(host_matches("WWW.Elastic.Co.", "elastic.co"));
        assert!(!host_matches("notelastic.co", "elastic.co"));
        assert!(!host_matches("elastic.co.evil.com", "elastic.co"));
        assert!(!host_matches("elastic.co", ""));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.extraction.api_key_env = "FL_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));

        config.extraction.provider = ExtractionProvider::Bridge;
        assert!(validate_api_key(&config).is_ok());
    }
}
