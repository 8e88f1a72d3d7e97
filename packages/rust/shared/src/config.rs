//! Application configuration for Postforge.
//!
//! User config lives at `~/.postforge/postforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PostforgeError, Result};
use crate::types::{PublishStatus, StructureConstraints};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "postforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".postforge";

// ---------------------------------------------------------------------------
// Config structs (matching postforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Generation bridge and structural constraints.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Publishing site.
    #[serde(default)]
    pub site: SiteConfig,

    /// Link injection tuning.
    #[serde(default)]
    pub linking: LinkingConfig,

    /// Automated quality validation thresholds.
    #[serde(default)]
    pub quality: QualityConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory for the database and saved run states.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Status given to newly published posts.
    #[serde(default)]
    pub publish_status: PublishStatus,

    /// Build everything but skip the remote publish call.
    #[serde(default)]
    pub dry_run: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            publish_status: PublishStatus::default(),
            dry_run: false,
        }
    }
}

fn default_data_dir() -> String {
    "~/.postforge/data".into()
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Command used to run the provider bridge (e.g. "bun").
    #[serde(default = "default_bridge_cmd")]
    pub bridge_cmd: String,

    /// Bridge script passed to the command.
    #[serde(default = "default_bridge_script")]
    pub bridge_script: String,

    /// Working directory for the bridge subprocess (empty = current dir).
    #[serde(default)]
    pub working_dir: String,

    /// Name of the env var holding the provider API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier forwarded to the bridge.
    #[serde(default = "default_model")]
    pub model: String,

    /// Upper bound for a single bridge task, in seconds.
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,

    /// Structural constraints for generated articles.
    #[serde(default)]
    pub structure: StructureConstraints,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            bridge_cmd: default_bridge_cmd(),
            bridge_script: default_bridge_script(),
            working_dir: String::new(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            task_timeout_secs: default_task_timeout(),
            structure: StructureConstraints::default(),
        }
    }
}

fn default_bridge_cmd() -> String {
    "bun".into()
}
fn default_bridge_script() -> String {
    "bridge/src/bridge.ts".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_task_timeout() -> u64 {
    55
}

/// `[site]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Base URL of the WordPress site (e.g. `https://blog.example.com`).
    #[serde(default)]
    pub base_url: String,

    /// Account used for publishing.
    #[serde(default)]
    pub username: String,

    /// Name of the env var holding the application password.
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Category IDs attached to published posts.
    #[serde(default)]
    pub category_ids: Vec<u64>,

    /// Tag IDs attached to published posts.
    #[serde(default)]
    pub tag_ids: Vec<u64>,

    /// How many published posts to fetch as link targets.
    #[serde(default = "default_discovery_limit")]
    pub discovery_limit: u32,

    /// How many prior articles to give the generator as context.
    #[serde(default = "default_prior_limit")]
    pub prior_limit: u32,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password_env: default_password_env(),
            category_ids: Vec::new(),
            tag_ids: Vec::new(),
            discovery_limit: default_discovery_limit(),
            prior_limit: default_prior_limit(),
        }
    }
}

fn default_password_env() -> String {
    "POSTFORGE_WP_APP_PASSWORD".into()
}
fn default_discovery_limit() -> u32 {
    50
}
fn default_prior_limit() -> u32 {
    10
}

/// `[linking]` section: bounds for the link injection service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkingConfig {
    /// Fewer placements than this is reported as a shortfall.
    #[serde(default = "default_min_links")]
    pub min_links: usize,

    /// Hard cap on placements.
    #[serde(default = "default_max_links")]
    pub max_links: usize,

    /// Shortest accepted anchor, in words.
    #[serde(default = "default_min_anchor_words")]
    pub min_anchor_words: usize,

    /// Longest accepted anchor, in words.
    #[serde(default = "default_max_anchor_words")]
    pub max_anchor_words: usize,

    /// Candidates scoring below this composite are discarded.
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f64,

    /// Minimum distance, in characters, between two inserted links in the
    /// final body.
    #[serde(default = "default_min_distance")]
    pub min_distance_between_links: usize,

    /// Fail the link stage when fewer than `min_links` could be placed.
    #[serde(default)]
    pub enforce_min_links: bool,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            min_links: default_min_links(),
            max_links: default_max_links(),
            min_anchor_words: default_min_anchor_words(),
            max_anchor_words: default_max_anchor_words(),
            min_relevance: default_min_relevance(),
            min_distance_between_links: default_min_distance(),
            enforce_min_links: false,
        }
    }
}

fn default_min_links() -> usize {
    1
}
fn default_max_links() -> usize {
    3
}
fn default_min_anchor_words() -> usize {
    2
}
fn default_max_anchor_words() -> usize {
    8
}
fn default_min_relevance() -> f64 {
    50.0
}
fn default_min_distance() -> usize {
    200
}

impl LinkingConfig {
    /// Check the bounds are internally consistent.
    pub fn validate(&self) -> Result<()> {
        if self.min_links > self.max_links {
            return Err(PostforgeError::config(format!(
                "linking.min_links ({}) exceeds linking.max_links ({})",
                self.min_links, self.max_links
            )));
        }
        if self.min_anchor_words == 0 || self.min_anchor_words > self.max_anchor_words {
            return Err(PostforgeError::config(format!(
                "invalid anchor word bounds [{}, {}]",
                self.min_anchor_words, self.max_anchor_words
            )));
        }
        if !(0.0..=100.0).contains(&self.min_relevance) {
            return Err(PostforgeError::config(format!(
                "linking.min_relevance must be within 0..=100, got {}",
                self.min_relevance
            )));
        }
        Ok(())
    }
}

/// `[quality]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Articles shorter than this fail the word-count rule.
    #[serde(default = "default_min_word_count")]
    pub min_word_count: usize,

    /// Minimum number of `<h2>` sections.
    #[serde(default = "default_min_sections")]
    pub min_sections: usize,

    /// Minimum number of internal links.
    #[serde(default = "default_min_internal_links")]
    pub min_internal_links: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_word_count: default_min_word_count(),
            min_sections: default_min_sections(),
            min_internal_links: default_min_internal_links(),
        }
    }
}

fn default_min_word_count() -> usize {
    600
}
fn default_min_sections() -> usize {
    3
}
fn default_min_internal_links() -> usize {
    1
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.postforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PostforgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.postforge/postforge.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| PostforgeError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        PostforgeError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PostforgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PostforgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PostforgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Read a secret from the env var named by `var_name`.
pub fn read_secret(var_name: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(PostforgeError::config(format!(
            "secret not found. Set the {var_name} environment variable."
        ))),
    }
}
