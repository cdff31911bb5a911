//! User preferences consumed by the service

use carwatch_shared::defaults::MINIMUM_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("preferences I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed preferences in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot encode preferences: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("minimum threshold {0} is outside 0..=100")]
    InvalidThreshold(i32),
}

/// Read side of the preferences, as the service sees it.
///
/// Implementations never fail: anything unreadable degrades to defaults.
pub trait PreferenceStore: Send + Sync {
    /// Estimate at or below which the car is reported open
    fn minimum_threshold(&self) -> i32;

    /// Device to connect to when none is named at startup
    fn default_address(&self) -> Option<String>;
}

/// On-disk shape of the preferences file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub default_address: Option<String>,
    pub minimum_threshold: i32,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            default_address: None,
            minimum_threshold: MINIMUM_THRESHOLD,
        }
    }
}

/// Preferences kept in a TOML file
#[derive(Debug, Clone)]
pub struct FilePreferences {
    path: PathBuf,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file; a missing file is the defaults
    pub fn load(&self) -> Result<Preferences, PreferencesError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Preferences::default()),
            Err(source) => {
                return Err(PreferencesError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        toml::from_str(&content).map_err(|source| PreferencesError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, prefs: &Preferences) -> Result<(), PreferencesError> {
        let io_err = |source| PreferencesError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let content = toml::to_string_pretty(prefs)?;
        std::fs::write(&self.path, content).map_err(io_err)
    }

    /// Remember `address` as the startup device, keeping the threshold
    pub fn save_default_address(&self, address: Option<&str>) -> Result<(), PreferencesError> {
        let mut prefs = self.load_or_default();
        prefs.default_address = address.filter(|a| !a.is_empty()).map(str::to_string);
        self.save(&prefs)
    }

    /// Store a new alarm threshold, keeping the default address
    pub fn save_minimum_threshold(&self, threshold: i32) -> Result<(), PreferencesError> {
        if !(0..=100).contains(&threshold) {
            return Err(PreferencesError::InvalidThreshold(threshold));
        }
        let mut prefs = self.load_or_default();
        prefs.minimum_threshold = threshold;
        self.save(&prefs)
    }

    fn load_or_default(&self) -> Preferences {
        self.load().unwrap_or_else(|e| {
            warn!("[Prefs] {}, using defaults", e);
            Preferences::default()
        })
    }
}

impl PreferenceStore for FilePreferences {
    fn minimum_threshold(&self) -> i32 {
        self.load_or_default().minimum_threshold
    }

    fn default_address(&self) -> Option<String> {
        self.load_or_default().default_address
    }
}

/// Fixed preferences, for tests and for running without a data directory
#[derive(Debug, Clone, Default)]
pub struct StaticPreferences(pub Preferences);

impl PreferenceStore for StaticPreferences {
    fn minimum_threshold(&self) -> i32 {
        self.0.minimum_threshold
    }

    fn default_address(&self) -> Option<String> {
        self.0.default_address.clone()
    }
}
