//! Tunables and persisted engine settings.
//!
//! Settings are read from `<config_dir>/mediasort/settings.json`. A missing or broken file is
//! never fatal: every field has a default and the loader falls back to it.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::StoreError;
use crate::media::kind::MediaFilter;

/// How many leading bytes the media validator looks at.
pub const HEADER_PROBE_LEN: usize = 64;
/// Upper bound on ranked sort destinations (ranks 0..=9).
pub const MAX_SORT_DESTINATIONS: usize = 10;
/// Allowed gap between a BMP's declared size and the real file size.
pub const BMP_SIZE_TOLERANCE_BYTES: u64 = 1024;

pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;
/// Some NAS boxes take a long time to spin up disks, hence the generous default.
pub const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 200;
pub const DEFAULT_MAX_VIDEO_SIZE_MB: u64 = 100;
pub const DEFAULT_MAX_RESULTS: usize = 5_000;

const APP_DIR_NAME: &str = "mediasort";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// SMB protocol dialects, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Smb202,
    Smb210,
    Smb300,
    Smb302,
    Smb311,
}

/// Inclusive dialect window offered during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialectRange {
    pub min: Dialect,
    pub max: Dialect,
}

impl DialectRange {
    /// The widest window: SMB 2.0.2 through 3.1.1.
    pub const WIDEST: DialectRange = DialectRange {
        min: Dialect::Smb202,
        max: Dialect::Smb311,
    };

    /// Returns the range with `min <= max`, swapping the bounds if a settings file had them reversed.
    pub fn normalized(self) -> Self {
        if self.min <= self.max {
            self
        } else {
            Self {
                min: self.max,
                max: self.min,
            }
        }
    }

    pub fn contains(&self, dialect: Dialect) -> bool {
        (self.min..=self.max).contains(&dialect)
    }
}

impl Default for DialectRange {
    fn default() -> Self {
        Self::WIDEST
    }
}

/// Engine settings, matching the keys the settings screen writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreSettings {
    pub include_video: bool,
    pub max_video_size_mb: u64,
    pub max_results: usize,
    /// Entries stat-ed per batch during large local scans. Smaller is more responsive, larger is faster.
    pub scan_batch_size: usize,
    pub connect_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub min_dialect: Dialect,
    pub max_dialect: Dialect,
    pub validate_before_display: bool,
    pub preload_next: bool,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            include_video: true,
            max_video_size_mb: DEFAULT_MAX_VIDEO_SIZE_MB,
            max_results: DEFAULT_MAX_RESULTS,
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            operation_timeout_ms: DEFAULT_OPERATION_TIMEOUT_MS,
            min_dialect: DialectRange::WIDEST.min,
            max_dialect: DialectRange::WIDEST.max,
            validate_before_display: true,
            preload_next: true,
        }
    }
}

impl CoreSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn dialects(&self) -> DialectRange {
        DialectRange {
            min: self.min_dialect,
            max: self.max_dialect,
        }
        .normalized()
    }

    pub fn media_filter(&self) -> MediaFilter {
        MediaFilter {
            include_video: self.include_video,
            max_video_size_mb: self.max_video_size_mb,
        }
    }

    /// Batch size with a floor of one, so a zero in the settings file can't stall a scan.
    pub fn effective_batch_size(&self) -> usize {
        self.scan_batch_size.max(1)
    }
}

/// Returns the engine's config directory, like `~/.config/mediasort`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME))
}

/// Loads settings from the default location, falling back to defaults.
pub fn load_settings() -> CoreSettings {
    match config_dir() {
        Some(dir) => load_settings_from(&dir.join(SETTINGS_FILE_NAME)),
        None => {
            warn!("No config directory on this platform, using default settings");
            CoreSettings::default()
        }
    }
}

/// Loads settings from `path`. Returns defaults if the file doesn't exist or can't be parsed.
pub fn load_settings_from(path: &Path) -> CoreSettings {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!("No settings at {} ({}), using defaults", path.display(), e);
            return CoreSettings::default();
        }
    };

    match serde_json::from_str(&contents) {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Couldn't parse settings at {}: {}, using defaults", path.display(), e);
            CoreSettings::default()
        }
    }
}

/// Writes settings to `path`, creating the parent directory if needed.
pub fn save_settings_to(path: &Path, settings: &CoreSettings) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(settings)?;
    fs::write(path, contents)?;
    Ok(())
}
