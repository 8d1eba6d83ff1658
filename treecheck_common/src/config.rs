use crate::TreeCheckError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "treecheck.toml";

/// Default width of the comparison worker pool
pub const DEFAULT_WORKERS: usize = 10;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// File with one exclusion rule per line. A missing file excludes nothing.
    #[serde(default = "default_exclusion_file")]
    pub exclusion_file: PathBuf,

    /// Inline exclusion rules, appended to those read from `exclusion_file`
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Number of comparison workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Where reports are written
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    /// Scratch space for extracted reference archives
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_exclusion_file() -> PathBuf {
    PathBuf::from("ignore.conf")
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("temp")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            exclusion_file: default_exclusion_file(),
            exclude: Vec::new(),
            workers: default_workers(),
            report_dir: default_report_dir(),
            work_dir: default_work_dir(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub exists: bool,
}

/// Load configuration from `explicit` if given, otherwise from the per-user
/// config directory. Only an explicit path is required to exist.
pub fn load_config(explicit: Option<&Path>) -> Result<LoadedConfig, TreeCheckError> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(TreeCheckError::Config(format!(
                    "Config file does not exist: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => default_config_path()?,
    };
    let exists = path.exists();

    let config = if exists {
        let data = fs::read_to_string(&path)?;
        toml::from_str(&data).map_err(|e| TreeCheckError::Serialization(e.to_string()))?
    } else {
        AppConfig::default()
    };

    if config.workers == 0 {
        return Err(TreeCheckError::Config("workers must be at least 1".to_string()));
    }

    Ok(LoadedConfig {
        config,
        path,
        exists,
    })
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<(), TreeCheckError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = toml::to_string_pretty(config)
        .map_err(|e| TreeCheckError::Serialization(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

pub fn default_config_path() -> Result<PathBuf, TreeCheckError> {
    let dirs = ProjectDirs::from("", "", "treecheck")
        .ok_or_else(|| TreeCheckError::Config("Unable to determine config directory".to_string()))?;
    Ok(dirs.config_dir().join(CONFIG_FILE_NAME))
}
