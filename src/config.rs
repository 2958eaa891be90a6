//! # Configuration Module
//!
//! Data directory setup and runtime settings for Kindred.
//!
//! ## Data Storage
//!
//! The feature store lives in the platform-standard data directory:
//! - Linux: `~/.local/share/kindred/features.db`
//! - macOS: `~/Library/Application Support/kindred/features.db`
//! - Windows: `%APPDATA%\kindred\features.db`
//!
//! ## Settings
//!
//! [`Settings`] are read from `<config dir>/kindred/config.json` when that
//! file exists, then overlaid with `KINDRED_*` environment variables. Every
//! field has a default, so an empty or missing file is fine.

use crate::builder::{MAX_WORKERS, MIN_WORKERS};
use crate::error::{Error, Result};
use crate::recommend::RunOptions;
use crate::retry::RetryPolicy;
use crate::{lastfm, spotify};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const APP_DIR: &str = "kindred";
const DB_FILE: &str = "features.db";
const CONFIG_FILE: &str = "config.json";

/// Returns the Kindred data directory, creating it if needed.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The kindred subdirectory cannot be created
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        Error::Config("could not determine the system data directory".to_string())
    })?;

    let kindred_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&kindred_dir).map_err(|e| {
        Error::Config(format!(
            "failed to create data directory at {}: {e}",
            kindred_dir.display()
        ))
    })?;
    Ok(kindred_dir)
}

/// Returns the default feature store path.
///
/// # Errors
///
/// See [`get_data_dir`].
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE))
}

/// Location of the optional settings file.
#[must_use]
pub fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Feature store location; the platform default when unset
    pub db_path: Option<PathBuf>,
    pub spotify_token: Option<String>,
    pub spotify_api: String,
    pub lastfm_api_key: Option<String>,
    pub lastfm_api: String,
    /// Last.fm user whose scrobbles weight the seed lottery
    pub lastfm_user: Option<String>,
    /// yt-dlp executable
    pub ytdlp: String,
    /// Feature extractor executable, called with the audio file path
    pub extractor: String,
    pub workers: usize,
    pub candidate_limit: usize,
    pub seed_attempts: usize,
    pub retry_attempts: u32,
    pub retry_base_secs: u64,
    pub fallback_depth: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: None,
            spotify_token: None,
            spotify_api: spotify::DEFAULT_API_BASE.to_string(),
            lastfm_api_key: None,
            lastfm_api: lastfm::DEFAULT_API_BASE.to_string(),
            lastfm_user: None,
            ytdlp: "yt-dlp".to_string(),
            extractor: "kindred-extract".to_string(),
            workers: 4,
            candidate_limit: 20,
            seed_attempts: 5,
            retry_attempts: 3,
            retry_base_secs: 1,
            fallback_depth: 2,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} has an invalid value: {value:?}")))
}

impl Settings {
    /// Settings file (if any) plus environment overrides.
    pub fn load() -> Result<Self> {
        let mut settings = match get_config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!("Reading settings from {}", path.display());
        let text = fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid settings file {}: {e}", path.display())))
    }

    /// Overlay `KINDRED_*` variables as returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("KINDRED_DB_PATH") {
            self.db_path = Some(PathBuf::from(path));
        }
        if let Some(token) = lookup("KINDRED_SPOTIFY_TOKEN") {
            self.spotify_token = Some(token);
        }
        if let Some(api) = lookup("KINDRED_SPOTIFY_API") {
            self.spotify_api = api;
        }
        if let Some(key) = lookup("KINDRED_LASTFM_API_KEY") {
            self.lastfm_api_key = Some(key);
        }
        if let Some(user) = lookup("KINDRED_LASTFM_USER") {
            self.lastfm_user = Some(user);
        }
        if let Some(ytdlp) = lookup("KINDRED_YTDLP") {
            self.ytdlp = ytdlp;
        }
        if let Some(extractor) = lookup("KINDRED_EXTRACTOR") {
            self.extractor = extractor;
        }
        if let Some(workers) = lookup("KINDRED_WORKERS") {
            self.workers = parse_var("KINDRED_WORKERS", &workers)?;
        }
        Ok(())
    }

    /// Explicit path, else the configured one, else the platform default.
    pub fn db_path(&self) -> Result<PathBuf> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => get_db_path(),
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] when no token is configured.
    pub fn spotify_token(&self) -> Result<&str> {
        self.spotify_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "no Spotify token; set KINDRED_SPOTIFY_TOKEN or spotify_token in config.json"
                        .to_string(),
                )
            })
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.clamp(MIN_WORKERS, MAX_WORKERS)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            base_delay: Duration::from_secs(self.retry_base_secs),
            ..RetryPolicy::default()
        }
    }

    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            seed_attempts: self.seed_attempts,
            candidate_limit: self.candidate_limit,
            fallback_depth: self.fallback_depth,
        }
    }
}
