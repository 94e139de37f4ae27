//! Process configuration, read once at start.
//!
//! Sources, later wins: built-in defaults, an optional `clubbook.json`, environment
//! (`CLUBBOOK_DATA_DIR`, `CLUBBOOK_PERIOD_MONTHS`). Changing any value after data exists
//! does not renumber or reclassify existing records.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::schema::SchemaRules;

pub const CONFIG_FILE_NAME: &str = "clubbook.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Relative paths are resolved against the executable's directory.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_data_file_name")]
    pub data_file_name: String,
    #[serde(default = "default_backup_dir_name")]
    pub backup_dir_name: String,
    #[serde(default = "default_invoice_dir_name")]
    pub invoice_dir_name: String,
    /// Starting value for both counters; keeps new numbers clear of legacy records.
    #[serde(default = "default_initial_number")]
    pub initial_number: u32,
    #[serde(default = "default_period_length_months")]
    pub period_length_months: u8,
    #[serde(default = "default_min_track_number")]
    pub min_track_number: u32,
    #[serde(default = "default_max_track_number")]
    pub max_track_number: u32,
    #[serde(default = "default_due_days")]
    pub default_due_days: u32,
    /// TrueType font embedded in invoice PDFs; relative paths are resolved against the
    /// data directory. Without one, the built-in Helvetica is used and letters outside
    /// its encoding are folded to plain ones.
    #[serde(default)]
    pub invoice_font_path: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_data_file_name() -> String {
    "customers.json".to_string()
}

fn default_backup_dir_name() -> String {
    "backups".to_string()
}

fn default_invoice_dir_name() -> String {
    "invoices".to_string()
}

fn default_initial_number() -> u32 {
    3000
}

fn default_period_length_months() -> u8 {
    6
}

fn default_min_track_number() -> u32 {
    1
}

fn default_max_track_number() -> u32 {
    99
}

fn default_due_days() -> u32 {
    14
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            data_file_name: default_data_file_name(),
            backup_dir_name: default_backup_dir_name(),
            invoice_dir_name: default_invoice_dir_name(),
            initial_number: default_initial_number(),
            period_length_months: default_period_length_months(),
            min_track_number: default_min_track_number(),
            max_track_number: default_max_track_number(),
            default_due_days: default_due_days(),
            invoice_font_path: None,
        }
    }
}

/// Where the repository reads and writes. All absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub data_dir: PathBuf,
    pub data_file: PathBuf,
    pub backup_dir: PathBuf,
    pub invoice_dir: PathBuf,
}

impl StorePaths {
    pub fn in_dir(data_dir: impl Into<PathBuf>, config: &Config) -> Self {
        let data_dir = data_dir.into();
        Self {
            data_file: data_dir.join(&config.data_file_name),
            backup_dir: data_dir.join(&config.backup_dir_name),
            invoice_dir: data_dir.join(&config.invoice_dir_name),
            data_dir,
        }
    }
}

impl Config {
    /// Load from an explicit file, or from `clubbook.json` next to the executable when
    /// present, then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, StoreError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match exe_dir().map(|d| d.join(CONFIG_FILE_NAME)) {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Config::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, StoreError> {
        let bytes = std::fs::read(path).map_err(|e| StoreError::io(path, e))?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("CLUBBOOK_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir.trim());
        }
        if let Some(raw) = lookup("CLUBBOOK_PERIOD_MONTHS") {
            match raw.trim().parse::<u8>() {
                Ok(v) => self.period_length_months = v,
                Err(_) => log::warn!("[config] ignoring CLUBBOOK_PERIOD_MONTHS={raw:?}"),
            }
        }
    }

    pub fn schema_rules(&self) -> SchemaRules {
        SchemaRules {
            track_range: self.min_track_number..=self.max_track_number,
        }
    }

    /// Resolve the data directory: absolute paths as given, relative ones against the
    /// executable's directory, falling back to the working directory.
    pub fn resolve_paths(&self) -> Result<StorePaths, StoreError> {
        if self.data_dir.is_absolute() {
            return Ok(StorePaths::in_dir(&self.data_dir, self));
        }

        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(dir) = exe_dir() {
            candidates.push(dir.join(&self.data_dir));
        }
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(&self.data_dir));
        }

        candidates
            .into_iter()
            .next()
            .map(|dir| StorePaths::in_dir(dir, self))
            .ok_or_else(|| StoreError::DataDir {
                path: self.data_dir.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "unable to resolve data directory",
                ),
            })
    }
}

fn exe_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}
