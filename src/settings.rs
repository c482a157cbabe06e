//! Settings infrastructure for jalsa.
//!
//! Settings live in a `jalsa.toml` file, discovered from the workspace root
//! or the user's configuration directory. Every field has a default, so a
//! missing or partial file is never an error.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::check::{DEFAULT_ENDPOINT, DEFAULT_MODEL};

/// File name searched for during discovery.
pub const SETTINGS_FILE: &str = "jalsa.toml";

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Root settings structure loaded from jalsa.toml.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Grammar oracle configuration.
    pub oracle: OracleSettings,
    /// Result cache configuration.
    pub cache: CacheSettings,
    /// Oracle call throttling.
    pub rate: RateSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OracleSettings {
    /// OpenAI API key. Falls back to `$OPENAI_API_KEY`.
    pub api_key: Option<String>,
    pub model: String,
    /// Base URL of the chat-completions API.
    pub endpoint: String,
    /// Per-request timeout.
    pub timeout_secs: u64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 60,
        }
    }
}

impl OracleSettings {
    /// The configured API key, or the environment fallback.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Path of the SQLite cache database.
    /// Relative paths are resolved against the directory holding jalsa.toml.
    pub path: Option<PathBuf>,
}

impl CacheSettings {
    pub fn resolved_path(&self, settings_dir: &Path) -> PathBuf {
        match &self.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => settings_dir.join(path),
            None => default_cache_path(),
        }
    }
}

/// `<cache dir>/jalsa/cache.db`, or the temp directory if there is no cache dir.
fn default_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("jalsa")
        .join("cache.db")
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    /// Oracle calls admitted back to back before throttling starts.
    pub burst: u32,
    /// Seconds to earn one more call. Zero disables throttling.
    pub refill_interval_secs: u64,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            burst: 200,
            refill_interval_secs: 60,
        }
    }
}

/// Load settings from a jalsa.toml file.
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(path: &Path) -> Settings {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse settings");
                Settings::default()
            }
        },
        Err(_) => Settings::default(),
    }
}

/// Find jalsa.toml by searching up the directory tree, then direct children.
///
/// Search order:
/// 1. Walk up from `start_dir` to filesystem root
/// 2. If not found, check immediate child directories of `start_dir`
pub fn find_settings_file(start_dir: &Path) -> Option<PathBuf> {
    // Phase 1: Walk up from start_dir
    let mut current = Some(start_dir);
    while let Some(dir) = current {
        let candidate = dir.join(SETTINGS_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        current = dir.parent();
    }

    // Phase 2: Check immediate child directories
    if let Ok(entries) = std::fs::read_dir(start_dir) {
        for entry in entries.flatten() {
            if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
                let candidate = entry.path().join(SETTINGS_FILE);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }

    None
}

/// `<config dir>/jalsa/jalsa.toml`, if a config directory exists.
pub fn user_settings_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("jalsa").join(SETTINGS_FILE))
}

/// Discover and load settings for a workspace.
///
/// Falls back to the user's settings file when the workspace has none.
/// Returns `(settings, settings_dir)` where `settings_dir` is the directory
/// containing the file that was loaded (used for resolving relative paths).
/// If nothing is found, returns `(Settings::default(), start_dir)`.
pub fn discover_settings(start_dir: &Path) -> (Settings, PathBuf) {
    let found = find_settings_file(start_dir)
        .or_else(|| user_settings_file().filter(|path| path.is_file()));

    match found {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading settings");
            let dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| start_dir.to_path_buf());
            (load_settings(&path), dir)
        }
        None => (Settings::default(), start_dir.to_path_buf()),
    }
}
