// ABOUTME: Standardized paths for config and data storage
// ABOUTME: Config lives in ~/.config/jarvis; logs go under the XDG data dir for the application

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Application identifier for XDG directories
const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "jarvis";
const APPLICATION: &str = "jarvis";

/// XDG-compliant directories for the application
pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// ~/.config/jarvis/ on every platform, or ./config without a home directory
pub fn config_dir() -> PathBuf {
    BaseDirs::new()
        .map(|d| d.home_dir().join(".config").join("jarvis"))
        .unwrap_or_else(|| PathBuf::from("./config"))
}

/// ~/.config/jarvis/config.toml
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Data directory (e.g. ~/.local/share/jarvis/).
/// Falls back to ./data if XDG directories are unavailable
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}
