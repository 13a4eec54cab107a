//! Runtime configuration.
//!
//! Loaded from TOML (a string, a file, or the file named by the
//! `EFFWEAVE_CONFIG` environment variable) and installed process-wide.

use std::ffi::OsString;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable naming a TOML file read by [`RuntimeConfig::from_env`].
pub const CONFIG_ENV_VAR: &str = "EFFWEAVE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DebugLevel {
    #[default]
    Off,
    /// Log every dispatch and scope installation.
    Dispatch,
    /// Additionally log nested evaluations and snapshot/restore traffic.
    Trace,
}

impl DebugLevel {
    fn as_u8(self) -> u8 {
        match self {
            DebugLevel::Off => 0,
            DebugLevel::Dispatch => 1,
            DebugLevel::Trace => 2,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugConfig {
    #[serde(default)]
    pub level: DebugLevel,
}

impl DebugConfig {
    pub fn trace() -> Self {
        DebugConfig {
            level: DebugLevel::Trace,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.level != DebugLevel::Off
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Prefix of the native thread name given to spawned tasks.
    #[serde(default = "default_task_name_prefix")]
    pub task_name_prefix: String,

    /// Stack size for task threads; the platform default when unset.
    #[serde(default)]
    pub task_stack_size: Option<usize>,

    #[serde(default)]
    pub debug: DebugConfig,
}

fn default_task_name_prefix() -> String {
    "effweave-task".to_string()
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            task_name_prefix: default_task_name_prefix(),
            task_stack_size: None,
            debug: DebugConfig::default(),
        }
    }
}

static CURRENT: OnceLock<RwLock<Arc<RuntimeConfig>>> = OnceLock::new();
static DEBUG_LEVEL: AtomicU8 = AtomicU8::new(0);

fn current_cell() -> &'static RwLock<Arc<RuntimeConfig>> {
    CURRENT.get_or_init(|| RwLock::new(Arc::new(RuntimeConfig::default())))
}

impl RuntimeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Load the file named by `EFFWEAVE_CONFIG`, or the defaults when the
    /// variable is unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_optional_path(std::env::var_os(CONFIG_ENV_VAR))
    }

    fn from_optional_path(path: Option<OsString>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Make this the process-wide configuration.
    pub fn install(self) {
        DEBUG_LEVEL.store(self.debug.level.as_u8(), Ordering::Relaxed);
        log::debug!(
            "installing runtime config: task prefix {:?}, debug {:?}",
            self.task_name_prefix,
            self.debug.level
        );
        *current_cell().write() = Arc::new(self);
    }

    pub fn current() -> Arc<RuntimeConfig> {
        Arc::clone(&current_cell().read())
    }
}

/// Cheap check used on the dispatch path.
pub(crate) fn debug_enabled(level: DebugLevel) -> bool {
    DEBUG_LEVEL.load(Ordering::Relaxed) >= level.as_u8()
}
