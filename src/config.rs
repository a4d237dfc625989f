use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bound parameters SQLite accepts in one statement.
const SQLITE_MAX_VARIABLES: usize = 32_766;

/// Columns bound per row by the widest derived-index INSERT.
const WIDEST_INSERT_COLUMNS: usize = 14;

/// Largest `insert_batch_size` every derived-index INSERT can bind.
pub const MAX_INSERT_BATCH_SIZE: usize = SQLITE_MAX_VARIABLES / WIDEST_INSERT_COLUMNS;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data: DataConfig,
    pub indexing: IndexingConfig,
}

/// Data directory configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Override the default data directory.
    pub data_dir: Option<PathBuf>,
}

/// Tunables for the rules indexing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub cleaner: CleanerConfig,
    pub chunk: ChunkConfig,
    /// Rows per multi-row INSERT statement, at most [`MAX_INSERT_BATCH_SIZE`].
    pub insert_batch_size: usize,
    /// Upper bound on the body text kept for a section.
    pub section_body_max_chars: usize,
    /// Seconds after which an `indexing` lease is considered abandoned.
    pub stale_lease_secs: u64,
}

/// Repeated header/footer detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Non-blank lines inspected at the top and bottom of each page.
    pub edge_lines: usize,
    /// Fraction of pages a line must appear on to count as repeated.
    pub repeat_ratio: f64,
    /// Repeated lines at or above this length are never stripped.
    pub max_repeat_len: usize,
    /// Header/footer stripping is skipped below this page count.
    pub min_pages: usize,
}

/// Chunk sizing, in characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub target_size: usize,
    pub min_size: usize,
    pub max_size: usize,
    pub overlap: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            cleaner: CleanerConfig::default(),
            chunk: ChunkConfig::default(),
            insert_batch_size: 100,
            section_body_max_chars: 4000,
            stale_lease_secs: 30 * 60,
        }
    }
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            edge_lines: 5,
            repeat_ratio: 0.6,
            max_repeat_len: 100,
            min_pages: 3,
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_size: 1800,
            min_size: 500,
            max_size: 2500,
            overlap: 200,
        }
    }
}

impl IndexingConfig {
    /// Reject settings an index run cannot honour.
    pub fn validate(&self) -> Result<(), String> {
        self.chunk.validate()?;
        if !(1..=MAX_INSERT_BATCH_SIZE).contains(&self.insert_batch_size) {
            return Err(format!(
                "insert_batch_size ({}) must be between 1 and {MAX_INSERT_BATCH_SIZE}",
                self.insert_batch_size
            ));
        }
        Ok(())
    }
}

impl ChunkConfig {
    /// Reject size combinations the chunker cannot honour.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_size == 0 {
            return Err("chunk min_size must be positive".to_string());
        }
        if self.min_size > self.target_size {
            return Err(format!(
                "chunk min_size ({}) exceeds target_size ({})",
                self.min_size, self.target_size
            ));
        }
        if self.target_size > self.max_size {
            return Err(format!(
                "chunk target_size ({}) exceeds max_size ({})",
                self.target_size, self.max_size
            ));
        }
        if self.overlap >= self.min_size {
            return Err(format!(
                "chunk overlap ({}) must be smaller than min_size ({})",
                self.overlap, self.min_size
            ));
        }
        if self.max_unit_size() == 0 {
            return Err("chunk max_size leaves no room for content after min_size and overlap".to_string());
        }
        Ok(())
    }

    /// Largest piece a paragraph is split into before assembly.
    ///
    /// Keeping every unit at or below `max - min - overlap - separator` is what
    /// bounds assembled chunks by `max_size`.
    pub fn max_unit_size(&self) -> usize {
        self.max_size
            .saturating_sub(self.min_size)
            .saturating_sub(self.overlap)
            .saturating_sub(2)
    }
}

/// Errors raised when a config file is requested explicitly.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl AppConfig {
    /// Load configuration from `~/.config/rulebook-index/config.toml`.
    ///
    /// Falls back to `Default` when the file is missing or broken. Nothing is
    /// logged here since this runs before logging is set up; a broken file is
    /// handed back so the caller can report it.
    pub fn load() -> (Self, Option<ConfigError>) {
        match Self::load_optional(&Self::config_path()) {
            Ok(config) => (config.unwrap_or_default(), None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    /// Load configuration from `path` if the file exists.
    pub fn load_optional(path: &Path) -> Result<Option<Self>, ConfigError> {
        match Self::load_from(path) {
            Ok(config) => Ok(Some(config)),
            Err(ConfigError::Read { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Load configuration from an explicit path, failing loudly.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Resolved data directory (override or XDG default).
    pub fn data_dir(&self) -> PathBuf {
        self.data.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|d| d.join("rulebook-index"))
                .unwrap_or_else(|| PathBuf::from("data"))
        })
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("rulebook-index").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }
}
