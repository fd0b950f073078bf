//! Configuration module for the libris vector database.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.libris/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `LIBRIS_` and use double underscores
//! to separate nested levels:
//! - `LIBRIS_INDEX__IVF_PARTITIONS=32` sets `index.ivf_partitions`
//! - `LIBRIS_SEARCH__MAX_LIMIT=50` sets `search.max_limit`
//! - `LIBRIS_LOGGING__LEVEL=debug` sets `logging.level`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::chunking::ChunkingConfig;
use crate::error::{LibrisError, LibrisResult};
use crate::vector::{DEFAULT_CLUSTERS, DEFAULT_MAX_ITERS, DEFAULT_MODEL, IvfConfig};

/// Name of the per-workspace configuration directory.
pub const CONFIG_DIR: &str = ".libris";

const ENV_PREFIX: &str = "LIBRIS_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Directory holding the library/document/chunk snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Workspace root directory (where .libris is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    #[serde(default)]
    pub index: IndexSettings,

    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub embedding: EmbeddingSettings,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexSettings {
    /// Directory for persisted index snapshots
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Number of IVF partitions (k-means clusters)
    #[serde(default = "default_ivf_partitions")]
    pub ivf_partitions: usize,

    #[serde(default = "default_ivf_max_iters")]
    pub ivf_max_iters: usize,

    /// k-means restarts per build; the lowest-inertia run wins
    #[serde(default = "default_ivf_n_init")]
    pub ivf_n_init: usize,

    /// Fixed seed for reproducible IVF builds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ivf_seed: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchSettings {
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Upper bound accepted for a request's `limit`
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// Chunk hits fetched per requested document
    #[serde(default = "default_overfetch_factor")]
    pub overfetch_factor: usize,

    /// Apply the metadata filters to result documents as well as chunks
    #[serde(default = "default_true")]
    pub post_filter_documents: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingSettings {
    /// Model to use for embeddings
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Texts embedded per model call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Where downloaded model files are cached
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingSettings {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".libris/data")
}

fn default_storage_path() -> PathBuf {
    PathBuf::from(".libris/index")
}

fn default_ivf_partitions() -> usize {
    DEFAULT_CLUSTERS
}

fn default_ivf_max_iters() -> usize {
    DEFAULT_MAX_ITERS
}

fn default_ivf_n_init() -> usize {
    1
}

fn default_limit() -> usize {
    5
}

fn default_max_limit() -> usize {
    100
}

fn default_overfetch_factor() -> usize {
    3
}

fn default_embedding_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("libris").join("models"))
        .unwrap_or_else(|| PathBuf::from(".libris/models"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            data_dir: default_data_dir(),
            workspace_root: None,
            index: IndexSettings::default(),
            search: SearchSettings::default(),
            embedding: EmbeddingSettings::default(),
            chunking: ChunkingConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            ivf_partitions: default_ivf_partitions(),
            ivf_max_iters: default_ivf_max_iters(),
            ivf_n_init: default_ivf_n_init(),
            ivf_seed: None,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            overfetch_factor: default_overfetch_factor(),
            post_filter_documents: true,
        }
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            batch_size: default_batch_size(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl IndexSettings {
    /// IVF build parameters for new indexes.
    pub fn ivf_config(&self) -> IvfConfig {
        IvfConfig {
            n_partitions: self.ivf_partitions,
            max_iters: self.ivf_max_iters,
            n_init: self.ivf_n_init,
            seed: self.ivf_seed,
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .libris directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join("settings.toml"));

        Self::load_from(config_path).map(|mut settings| {
            if settings.workspace_root.is_none() {
                settings.workspace_root = Self::workspace_root();
            }
            settings
        })
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            // Double underscore (__) separates nested levels,
            // single underscore (_) remains as is within field names
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the workspace config by looking for a .libris directory
    /// from the current directory up to the root
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join("settings.toml"))
    }

    /// Get the workspace root directory (where .libris is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// Resolve a configured path against the workspace root.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn data_path(&self) -> PathBuf {
        self.resolve(&self.data_dir)
    }

    pub fn index_path(&self) -> PathBuf {
        self.resolve(&self.index.storage_path)
    }

    /// Reject settings that would make indexing or search impossible.
    pub fn validate(&self) -> LibrisResult<()> {
        let mut problems = Vec::new();
        if self.index.ivf_partitions == 0 {
            problems.push("index.ivf_partitions must be at least 1");
        }
        if self.index.ivf_max_iters == 0 {
            problems.push("index.ivf_max_iters must be at least 1");
        }
        if self.search.max_limit == 0 {
            problems.push("search.max_limit must be at least 1");
        }
        if self.search.default_limit == 0 || self.search.default_limit > self.search.max_limit {
            problems.push("search.default_limit must be between 1 and search.max_limit");
        }
        if self.search.overfetch_factor == 0 {
            problems.push("search.overfetch_factor must be at least 1");
        }
        if self.embedding.batch_size == 0 {
            problems.push("embedding.batch_size must be at least 1");
        }
        if self.chunking.chunk_size == 0 {
            problems.push("chunking.chunk_size must be at least 1");
        }
        if self.chunking.overlap_size >= self.chunking.chunk_size {
            problems.push("chunking.overlap_size must be smaller than chunking.chunk_size");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(LibrisError::Config {
                reason: problems.join("; "),
            })
        }
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join("settings.toml");

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# Libris Configuration File

# Version of the configuration schema
version = 1

# Library, document and chunk snapshot (relative to workspace root)
data_dir = ".libris/data"

[index]
# Persisted index snapshots (relative to workspace root)
storage_path = ".libris/index"

# IVF partitions; fewer chunks than this caps the partition count
ivf_partitions = {DEFAULT_CLUSTERS}

# k-means iterations per build
ivf_max_iters = {DEFAULT_MAX_ITERS}

# k-means restarts per build
ivf_n_init = 1

# Fixed seed for reproducible IVF builds
# ivf_seed = 42

[search]
# Documents returned when a request gives no limit
default_limit = 5

# Largest limit a request may ask for
max_limit = 100

# Chunk hits fetched per requested document
overfetch_factor = 3

# Apply metadata filters to result documents too
post_filter_documents = true

[embedding]
# Model to use for embeddings
model = "{DEFAULT_MODEL}"

# Texts per embedding call
batch_size = 32

# Model download cache
cache_dir = "{}"

[chunking]
# Target chunk size in characters
chunk_size = 500

# Characters shared by consecutive chunks
overlap_size = 50

# Texts this short are never split
min_chunk_size = 100

[logging]
# Used when RUST_LOG is unset
level = "info"
"#,
            default_cache_dir().display()
        );

        std::fs::write(&config_path, template)?;

        Ok(config_path)
    }
}
