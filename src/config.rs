//! Working copy configuration (`.folio/config.toml`).
//!
//! Every field has a default, and a missing file means all defaults. Unknown
//! keys are rejected so typos surface instead of being silently ignored.

use std::path::{Path, PathBuf};
use std::time::Duration;

use folio_git::Signature;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Directory under the working copy that holds folio's own state.
pub const STATE_DIR: &str = ".folio";

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FolioConfig {
    /// Worker tuning.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Index cache location.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Default commit author for the CLI.
    #[serde(default)]
    pub author: Option<AuthorConfig>,
}

// ---------------------------------------------------------------------------
// WorkerConfig
// ---------------------------------------------------------------------------

/// Tuning knobs for [`Worker`](crate::Worker).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// How long a mutating operation waits for the working copy lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Operations allowed to queue on one working copy before new ones are
    /// refused.
    #[serde(default = "default_max_waiters")]
    pub max_waiters: usize,

    /// Minimum spacing between index status broadcasts.
    #[serde(default = "default_status_throttle_ms")]
    pub status_throttle_ms: u64,

    /// Objects read and written per index write transaction.
    #[serde(default = "default_fill_batch_size")]
    pub fill_batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            max_waiters: default_max_waiters(),
            status_throttle_ms: default_status_throttle_ms(),
            fill_batch_size: default_fill_batch_size(),
        }
    }
}

impl WorkerConfig {
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    #[must_use]
    pub const fn status_throttle(&self) -> Duration {
        Duration::from_millis(self.status_throttle_ms)
    }
}

const fn default_lock_timeout_ms() -> u64 {
    30_000
}

const fn default_max_waiters() -> usize {
    16
}

const fn default_status_throttle_ms() -> u64 {
    100
}

const fn default_fill_batch_size() -> usize {
    256
}

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

/// Where index files live.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache root. Relative paths resolve against the working copy. Unset
    /// means `.folio/cache`.
    #[serde(default)]
    pub root: Option<PathBuf>,
}

impl CacheConfig {
    /// Resolve the cache root for a working copy.
    #[must_use]
    pub fn resolve(&self, work_dir: &Path) -> PathBuf {
        match &self.root {
            Some(root) if root.is_absolute() => root.clone(),
            Some(root) => work_dir.join(root),
            None => work_dir.join(STATE_DIR).join("cache"),
        }
    }

    /// Cache directory of one dataset. `dataset_dir` is in bare form
    /// (`data/items`, or empty for the working copy root).
    #[must_use]
    pub fn dataset_root(&self, work_dir: &Path, dataset_dir: &str) -> PathBuf {
        let name = if dataset_dir.is_empty() {
            "@root".to_owned()
        } else {
            dataset_dir.replace('/', "@")
        };
        self.resolve(work_dir).join("datasets").join(name)
    }
}

// ---------------------------------------------------------------------------
// AuthorConfig
// ---------------------------------------------------------------------------

/// Commit identity.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthorConfig {
    pub name: String,
    pub email: String,
}

impl From<&AuthorConfig> for Signature {
    fn from(author: &AuthorConfig) -> Self {
        Self::new(&author.name, &author.email)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl FolioConfig {
    /// Path of the config file for a working copy.
    #[must_use]
    pub fn path_for(work_dir: &Path) -> PathBuf {
        work_dir.join(STATE_DIR).join("config.toml")
    }

    /// Load the config for a working copy. A missing file yields defaults.
    ///
    /// # Errors
    /// Returns [`Error::Config`] on read failures other than not-found, on
    /// invalid TOML and on unknown keys.
    pub fn load(work_dir: &Path) -> Result<Self> {
        let path = Self::path_for(work_dir);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(Error::Config {
                    path,
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|message| Error::Config { path, message })
    }

    /// Parse config text. The error is a message with a line number when the
    /// parser reports a span.
    ///
    /// # Errors
    /// Returns the message on invalid TOML or unknown keys.
    pub fn parse(toml_str: &str) -> Result<Self, String> {
        toml::from_str(toml_str).map_err(|e| {
            let message = e.message().to_owned();
            match e.span() {
                Some(span) => {
                    let line = toml_str
                        .get(..span.start)
                        .unwrap_or_default()
                        .chars()
                        .filter(|&c| c == '\n')
                        .count()
                        + 1;
                    format!("line {line}: {message}")
                }
                None => message,
            }
        })
    }
}
