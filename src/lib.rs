//! Tethered camera capture core.
//!
//! Sits between a vendor-proprietary native camera SDK and application code:
//!
//! - **Session Manager** ([`manager::SessionManager`]): public device API;
//!   at most one session per port, owns the event-pump scheduler.
//! - **Camera Session** ([`session::CameraSession`]): per-device lifecycle
//!   around one retained native handle; capture sequencing against the
//!   body's mechanical timing.
//! - **Event Dispatcher** ([`events::EventDispatcher`]): demultiplexes the
//!   three classes of asynchronous device callback during a pump tick.
//! - **Image Download Pipeline** ([`download::DownloadPipeline`]): pulls a
//!   transfer-ready item to local storage and publishes the result.
//! - **Listener Registry** ([`listeners::ListenerRegistry`]): per-session
//!   pub/sub of downloaded images.
//!
//! The native boundary is the [`sdk::CameraSdk`] trait; the `mock` feature
//! (default) ships an in-memory SDK double so everything above it can run
//! and be tested without vendor libraries installed.

pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod listeners;
pub mod manager;
pub mod sdk;
pub mod session;

pub use config::TetherConfig;
pub use error::{TetherError, TetherResult};
pub use listeners::{DownloadedImage, ImageListener, ListenerRegistry, Subscription};
pub use manager::SessionManager;
pub use sdk::{CameraSdk, SdkError};
pub use session::{CameraIdentity, SessionState};
