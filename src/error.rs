//! Error types for the capture core.
//!
//! One consolidated enum, [`TetherError`], built with `thiserror`. The
//! variants follow the failure taxonomy of the session core:
//!
//! - **`Initialization`** — global SDK init failed. Fatal; surfaced
//!   immediately, no retry.
//! - **`Enumeration`** / **`DeviceNotFound`** — recoverable; the caller may
//!   re-list devices and retry.
//! - **`Session`** — a native open/close/property/command call reported
//!   failure. Carries the raw result code. A failed open sequence leaves the
//!   session's partial state (retained handle, possibly some registrations)
//!   as-is rather than rolled back; do not reuse the identity without an
//!   explicit close attempt.
//! - **`Download`** — isolated to a single transfer; never affects the
//!   polling loop, other sessions or other in-flight transfers.
//! - **`NotOpen`** — precondition violation on operations that require an
//!   open session.
//! - **`Config`** / **`Io`** — configuration and filesystem plumbing.

use crate::sdk::SdkError;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type TetherResult<T> = std::result::Result<T, TetherError>;

/// Pipeline stage at which a download failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStage {
    ItemInfo,
    CreateStream,
    Transfer,
}

impl std::fmt::Display for DownloadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DownloadStage::ItemInfo => "fetching item metadata",
            DownloadStage::CreateStream => "creating file stream",
            DownloadStage::Transfer => "transferring bytes",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for the capture core.
#[derive(Error, Debug)]
pub enum TetherError {
    /// Global SDK initialization failed. No other call will succeed.
    #[error("SDK initialization failed: {0}")]
    Initialization(SdkError),

    /// Device enumeration (list/count/child/info) reported failure.
    #[error("device enumeration failed: {0}")]
    Enumeration(SdkError),

    /// No connected device matched the requested port name.
    #[error("no camera found at port '{port}'")]
    DeviceNotFound { port: String },

    /// A native session call (open/close/property/command) reported failure.
    #[error("session call failed on port '{port}': {code}")]
    Session { port: String, code: SdkError },

    /// A single image transfer failed. Other transfers are unaffected.
    #[error("download failed while {stage}: {code}")]
    Download { stage: DownloadStage, code: SdkError },

    /// Operation requires an open session for this identity.
    #[error("no open session for port '{port}'")]
    NotOpen { port: String },

    /// Configuration parse or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem plumbing (config file reads, download directory checks).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TetherError {
    pub(crate) fn session(port: &str, code: SdkError) -> Self {
        TetherError::Session {
            port: port.to_string(),
            code,
        }
    }

    pub(crate) fn not_open(port: &str) -> Self {
        TetherError::NotOpen {
            port: port.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_native_code() {
        let err = TetherError::session("usb:1", SdkError::new(0x8D));
        assert_eq!(
            err.to_string(),
            "session call failed on port 'usb:1': native call returned result code 0x0000008d"
        );
    }

    #[test]
    fn download_stage_labels() {
        let err = TetherError::Download {
            stage: DownloadStage::CreateStream,
            code: SdkError::new(2),
        };
        assert!(err.to_string().contains("creating file stream"));
    }
}
