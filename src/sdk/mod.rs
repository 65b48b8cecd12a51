//! Native camera SDK binding contract.
//!
//! The vendor SDK is consumed through the [`CameraSdk`] trait so the session
//! core never touches the raw calling convention directly. Every call reports
//! success or a non-zero native result code ([`SdkError`]); nothing here
//! throws. The real binding lives behind a vendor-specific implementation;
//! [`mock::MockSdk`] provides an in-memory double for tests and the CLI.

pub mod handle;
#[cfg(feature = "mock")]
pub mod mock;

pub use handle::{NativeHandle, Retained};

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// A native call that reported a non-success result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("native call returned result code {code:#010x}")]
pub struct SdkError {
    /// Raw result code as reported by the SDK.
    pub code: u32,
}

impl SdkError {
    pub fn new(code: u32) -> Self {
        Self { code }
    }
}

pub type SdkResult<T> = Result<T, SdkError>;

/// SDK constants: event codes, property ids, commands and stream flags.
///
/// Values match the vendor header so logs line up with the vendor's own
/// diagnostics.
pub mod consts {
    /// Mask selecting every property event.
    pub const PROPERTY_EVENT_ALL: u32 = 0x0000_0100;
    /// Mask selecting every object event.
    pub const OBJECT_EVENT_ALL: u32 = 0x0000_0200;
    /// Mask selecting every state event.
    pub const STATE_EVENT_ALL: u32 = 0x0000_0300;

    /// A captured directory item is ready to be pulled from the device.
    pub const OBJECT_EVENT_DIR_ITEM_REQUEST_TRANSFER: u32 = 0x0000_0208;

    /// Property selecting where captures are stored.
    pub const PROP_SAVE_TO: u32 = 0x0000_000B;
    /// `PROP_SAVE_TO` value: deliver captures to the host, no card required.
    pub const SAVE_TO_HOST: u32 = 2;

    /// Drive mode property.
    pub const PROP_DRIVE_MODE: u32 = 0x0000_0401;
    /// Continuous drive.
    pub const DRIVE_MODE_CONTINUOUS: u32 = 1;

    /// Shutter button command.
    pub const CMD_PRESS_SHUTTER_BUTTON: u32 = 0x0000_0004;
    /// Shutter button fully pressed.
    pub const SHUTTER_BUTTON_COMPLETELY: i32 = 3;
    /// Shutter button released.
    pub const SHUTTER_BUTTON_OFF: i32 = 0;

    /// File stream disposition: always create, truncating any existing file.
    pub const FILE_CREATE_ALWAYS: u32 = 1;
    /// File stream access mode: read and write.
    pub const ACCESS_READ_WRITE: u32 = 2;
}

/// Descriptor fields snapshotted during enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Unique port name, e.g. `usb:001,004`. Device identity key.
    pub port_name: String,
    /// Human-readable device description.
    pub description: String,
    /// Vendor sub-type discriminator.
    pub sub_type: u32,
}

/// Metadata for a directory item awaiting transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    /// Size of the file on the device, in bytes.
    pub size: u64,
    /// Device-reported file name, e.g. `IMG_0001.JPG`.
    pub file_name: String,
    /// Capture timestamp as reported by the device.
    pub captured_at: DateTime<Utc>,
}

/// Storage-capacity hint reported to the device before a capture so it does
/// not refuse to shoot for lack of (host-side) space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageCapacity {
    pub free_clusters: i32,
    pub bytes_per_sector: i32,
    pub reset: bool,
}

impl StorageCapacity {
    /// A generous hint: effectively unlimited free space.
    pub fn generous() -> Self {
        Self {
            free_clusters: 0x7FFF_FFFF,
            bytes_per_sector: 0x1000,
            reset: true,
        }
    }
}

/// The three classes of asynchronous device callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Property,
    Object,
    State,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            EventKind::Property => "property",
            EventKind::Object => "object",
            EventKind::State => "state",
        };
        write!(f, "{}", label)
    }
}

/// A device callback, delivered synchronously from within `pump_events`.
///
/// One tagged variant rather than three raw function-pointer shapes; a single
/// handler closure serves all three registrations.
#[derive(Debug, Clone)]
pub enum CameraEvent {
    Property { event: u32, property_id: u32 },
    Object { event: u32, item: NativeHandle },
    State { event: u32, data: u32 },
}

impl CameraEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CameraEvent::Property { .. } => EventKind::Property,
            CameraEvent::Object { .. } => EventKind::Object,
            CameraEvent::State { .. } => EventKind::State,
        }
    }
}

/// Handler closure registered for one event class of one device.
pub type EventHandler = Arc<dyn Fn(CameraEvent) + Send + Sync + 'static>;

/// The native SDK call surface consumed by the session core.
///
/// All calls are non-blocking apart from `download`, which streams bytes into
/// a previously created file stream. `pump_events` may synchronously invoke
/// zero or more registered handlers before returning.
pub trait CameraSdk: Send + Sync + 'static {
    /// Global SDK initialization. Must precede every other call.
    fn initialize(&self) -> SdkResult<()>;
    /// Global SDK teardown.
    fn terminate(&self) -> SdkResult<()>;

    /// Increment the SDK-managed refcount of `handle`.
    fn retain(&self, handle: NativeHandle) -> SdkResult<()>;
    /// Decrement the SDK-managed refcount of `handle`, freeing it at zero.
    fn release(&self, handle: NativeHandle) -> SdkResult<()>;

    /// Pump the SDK's internal event queue once, without blocking.
    fn pump_events(&self) -> SdkResult<()>;

    /// Enumerate connected devices. Returns a list handle the caller must
    /// release.
    fn enumerate_devices(&self) -> SdkResult<NativeHandle>;
    fn child_count(&self, list: NativeHandle) -> SdkResult<usize>;
    fn child_at(&self, list: NativeHandle, index: usize) -> SdkResult<NativeHandle>;
    fn device_info(&self, device: NativeHandle) -> SdkResult<DeviceInfo>;

    fn open_session(&self, device: NativeHandle) -> SdkResult<()>;
    fn close_session(&self, device: NativeHandle) -> SdkResult<()>;

    /// Register (`Some`) or unregister (`None`) the property-event handler.
    fn set_property_event_handler(
        &self,
        device: NativeHandle,
        mask: u32,
        handler: Option<EventHandler>,
    ) -> SdkResult<()>;
    /// Register (`Some`) or unregister (`None`) the object-event handler.
    fn set_object_event_handler(
        &self,
        device: NativeHandle,
        mask: u32,
        handler: Option<EventHandler>,
    ) -> SdkResult<()>;
    /// Register (`Some`) or unregister (`None`) the state-event handler.
    fn set_state_event_handler(
        &self,
        device: NativeHandle,
        mask: u32,
        handler: Option<EventHandler>,
    ) -> SdkResult<()>;

    /// Size in bytes of a property's current value.
    fn property_size(&self, device: NativeHandle, property_id: u32) -> SdkResult<usize>;
    /// Write a property value of `size` bytes.
    fn set_property(
        &self,
        device: NativeHandle,
        property_id: u32,
        size: usize,
        data: u32,
    ) -> SdkResult<()>;

    fn send_command(&self, device: NativeHandle, command: u32, param: i32) -> SdkResult<()>;
    fn set_capacity_hint(&self, device: NativeHandle, capacity: StorageCapacity) -> SdkResult<()>;

    fn item_info(&self, item: NativeHandle) -> SdkResult<ItemInfo>;
    /// Create a file stream at `path`. Returns a stream handle the caller
    /// must release.
    fn create_file_stream(
        &self,
        path: &Path,
        disposition: u32,
        access: u32,
    ) -> SdkResult<NativeHandle>;
    /// Stream `size` bytes from `item` into `stream`.
    fn download(&self, item: NativeHandle, size: u64, stream: NativeHandle) -> SdkResult<()>;
    /// Acknowledge a completed transfer so the device can drop the item.
    fn download_complete(&self, item: NativeHandle) -> SdkResult<()>;
}
