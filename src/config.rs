//! Runtime configuration.

use crate::error::{TetherError, TetherResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_poll_interval() -> Duration {
    Duration::from_millis(10)
}

fn default_shutter_settle() -> Duration {
    Duration::from_millis(400)
}

fn default_download_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Configuration for the session core.
///
/// Durations accept humantime strings in TOML (`"10ms"`, `"1s"`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TetherConfig {
    /// Interval between event-pump ticks while any session is open.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Mechanical settling time between shutter press and release. Tunable
    /// per device body; some need none at all.
    #[serde(with = "humantime_serde")]
    pub shutter_settle: Duration,

    /// Directory downloaded images are written into, under their
    /// device-reported file names.
    pub download_dir: PathBuf,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            shutter_settle: default_shutter_settle(),
            download_dir: default_download_dir(),
        }
    }
}

impl TetherConfig {
    /// Load from a TOML file. Missing fields take defaults.
    pub fn from_file(path: &Path) -> TetherResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| TetherError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation, run after parsing.
    pub fn validate(&self) -> TetherResult<()> {
        if self.poll_interval.is_zero() {
            return Err(TetherError::Config(
                "poll_interval must be non-zero".into(),
            ));
        }
        if self.download_dir.as_os_str().is_empty() {
            return Err(TetherError::Config("download_dir must be set".into()));
        }
        Ok(())
    }
}
