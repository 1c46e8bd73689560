//! Configuration and logging setup for CSM.
//!
//! A [`CsmConfig`] is read from TOML. Every section and field has a default,
//! so an empty document is a valid configuration.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use csm_index::IndexOptions;
use csm_storage::{
    Compression, DiskRepository, DiskRepositoryOptions, MemoryRepository, Repository,
    StorageError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

const TRACE_TARGET: &str = "csm.config";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CsmConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Either a simple level (`info`, `debug`, ...) or an `EnvFilter`
    /// directive string such as `csm.index=trace,info`.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Write logs to stderr. With this disabled the subscriber has no sink.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    /// Maps level aliases (`WARNING`, `none`, ...) to `EnvFilter` syntax.
    /// Anything else is passed through as a directive string.
    pub(crate) fn level_directives(level: &str) -> String {
        let level = level.trim();
        match level.to_ascii_lowercase().as_str() {
            "" => Self::default_level(),
            "warning" => "warn".to_owned(),
            "none" => "off".to_owned(),
            lower @ ("trace" | "debug" | "info" | "warn" | "error" | "off") => lower.to_owned(),
            _ => level.to_owned(),
        }
    }

    /// Filter for the configured level. A non-empty `RUST_LOG` is appended,
    /// so its directives take precedence for the targets they name. An
    /// unparsable result falls back to the default level.
    pub fn env_filter(&self) -> EnvFilter {
        let mut directives = Self::level_directives(&self.level);
        if let Ok(env) = std::env::var("RUST_LOG") {
            let env = env.trim();
            if !env.is_empty() {
                directives = format!("{directives},{env}");
            }
        }
        EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(Self::default_level()))
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Emit a `trace` event for every reference the store rejects.
    #[serde(default)]
    pub trace_rejected_references: bool,
}

impl IndexConfig {
    pub fn options(&self) -> IndexOptions {
        IndexOptions {
            trace_rejected_references: self.trace_rejected_references,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    None,
    Zstd,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Repository directory. When unset objects live in memory only.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default)]
    pub compression: CompressionKind,

    /// zstd level; `0` selects the library default. Ignored without zstd.
    #[serde(default)]
    pub zstd_level: i32,

    /// Re-read every blob after writing it.
    #[serde(default)]
    pub validate_after_write: bool,
}

impl StorageConfig {
    pub fn compression(&self) -> Compression {
        match self.compression {
            CompressionKind::None => Compression::None,
            CompressionKind::Zstd => Compression::Zstd {
                level: self.zstd_level,
            },
        }
    }

    pub fn open_repository(&self) -> Result<Arc<dyn Repository>, StorageError> {
        let Some(dir) = &self.dir else {
            tracing::debug!(target: TRACE_TARGET, "using in-memory repository");
            return Ok(Arc::new(MemoryRepository::new()));
        };

        let options = DiskRepositoryOptions {
            compression: self.compression(),
            validate_after_write: self.validate_after_write,
        };
        let repository = DiskRepository::open(dir, options)?;
        Ok(Arc::new(repository))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` quotes the offending source line, which may hold
        // private paths. Keep the message and position only.
        let message = err.message().to_owned();
        match err.span() {
            Some(span) => Self::Toml(format!("{message} (at byte {})", span.start)),
            None => Self::Toml(message),
        }
    }
}

impl CsmConfig {
    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::load_from_str(&text)?;
        tracing::debug!(
            target: TRACE_TARGET,
            path = %path.display(),
            storage_dir = ?config.storage.dir,
            "loaded config"
        );
        Ok(config)
    }
}

static TRACING_INIT: Once = Once::new();

/// Installs the global `tracing` subscriber.
///
/// Safe to call more than once; only the first call has any effect, and a
/// subscriber installed elsewhere is left in place.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let layer: Option<Box<dyn tracing_subscriber::Layer<_> + Send + Sync>> = if config.stderr
        {
            // `TestWriter` goes through `eprint!`, which `cargo test` captures.
            let writer = || -> Box<dyn std::io::Write> {
                if cfg!(debug_assertions) {
                    Box::new(tracing_subscriber::fmt::writer::TestWriter::with_stderr())
                } else {
                    Box::new(std::io::stderr())
                }
            };
            if config.json {
                Some(Box::new(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_ansi(false),
                ))
            } else {
                Some(Box::new(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                ))
            }
        } else {
            None
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            tracing::debug!(
                target: TRACE_TARGET,
                level = %config.level,
                json = config.json,
                "tracing initialized"
            );
        }
    });
}
