//! In-memory SDK double for tests and the CLI.
//!
//! `MockSdk` implements the full [`CameraSdk`] surface against an in-memory
//! device table. It records every binding call in order, tracks per-handle
//! retain/release counts, delivers queued events synchronously from
//! `pump_events`, and supports one-shot failure injection per call so tests
//! can exercise every error path deterministically. Streams are backed by
//! real files so download tests can assert on-disk results.

use super::{
    consts, CameraEvent, CameraSdk, DeviceInfo, EventHandler, EventKind, ItemInfo, NativeHandle,
    SdkError, SdkResult, StorageCapacity,
};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Result code used for injected and internal mock failures.
pub const MOCK_ERR_INTERNAL: u32 = 0x0000_00A1;
/// Result code for calls against a handle the mock does not know.
pub const MOCK_ERR_INVALID_HANDLE: u32 = 0x0000_0061;

/// Ordered record of one binding call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Initialize,
    Terminate,
    Retain(NativeHandle),
    Release(NativeHandle),
    PumpEvents,
    EnumerateDevices,
    ChildCount(NativeHandle),
    ChildAt(NativeHandle, usize),
    DeviceInfo(NativeHandle),
    OpenSession(NativeHandle),
    CloseSession(NativeHandle),
    SetEventHandler {
        device: NativeHandle,
        kind: EventKind,
        registered: bool,
    },
    PropertySize {
        device: NativeHandle,
        property_id: u32,
    },
    SetProperty {
        device: NativeHandle,
        property_id: u32,
        data: u32,
    },
    SendCommand {
        device: NativeHandle,
        command: u32,
        param: i32,
    },
    SetCapacityHint(NativeHandle),
    ItemInfo(NativeHandle),
    CreateFileStream(PathBuf),
    Download {
        item: NativeHandle,
        size: u64,
        stream: NativeHandle,
    },
    DownloadComplete(NativeHandle),
}

struct MockDevice {
    handle: NativeHandle,
    info: DeviceInfo,
}

struct MockState {
    initialized: bool,
    next_handle: u64,
    devices: Vec<MockDevice>,
    lists: HashMap<NativeHandle, Vec<NativeHandle>>,
    items: HashMap<NativeHandle, ItemInfo>,
    streams: HashMap<NativeHandle, File>,
    refcounts: HashMap<NativeHandle, u64>,
    handlers: HashMap<(NativeHandle, EventKind), EventHandler>,
    pending: VecDeque<(NativeHandle, CameraEvent)>,
    simulate_capture: bool,
    capture_seq: u32,
}

impl MockState {
    fn mint(&mut self) -> NativeHandle {
        self.next_handle += 1;
        NativeHandle::from_raw(self.next_handle)
    }

    fn device_by_handle(&self, handle: NativeHandle) -> Option<&MockDevice> {
        self.devices.iter().find(|d| d.handle == handle)
    }
}

/// In-memory double for the native SDK.
pub struct MockSdk {
    state: Mutex<MockState>,
    calls: Mutex<Vec<MockCall>>,
    fail_next: Mutex<HashMap<&'static str, u32>>,
}

/// Recover the guard even if a test assertion poisoned the lock; the mock's
/// own state stays consistent.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MockSdk {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                initialized: false,
                next_handle: 0,
                devices: Vec::new(),
                lists: HashMap::new(),
                items: HashMap::new(),
                streams: HashMap::new(),
                refcounts: HashMap::new(),
                handlers: HashMap::new(),
                pending: VecDeque::new(),
                simulate_capture: false,
                capture_seq: 0,
            }),
            calls: Mutex::new(Vec::new()),
            fail_next: Mutex::new(HashMap::new()),
        }
    }

    /// Add a connected device. The returned handle is stable for the life of
    /// the mock, so refcounts carry across repeated enumerations.
    pub fn add_device(
        &self,
        port_name: impl Into<String>,
        description: impl Into<String>,
        sub_type: u32,
    ) -> NativeHandle {
        let mut state = lock(&self.state);
        let handle = state.mint();
        state.devices.push(MockDevice {
            handle,
            info: DeviceInfo {
                port_name: port_name.into(),
                description: description.into(),
                sub_type,
            },
        });
        handle
    }

    /// Handle of the device at `port_name`, if present.
    pub fn device_handle(&self, port_name: &str) -> Option<NativeHandle> {
        lock(&self.state)
            .devices
            .iter()
            .find(|d| d.info.port_name == port_name)
            .map(|d| d.handle)
    }

    /// Create a directory item awaiting transfer.
    pub fn stage_item(&self, info: ItemInfo) -> NativeHandle {
        let mut state = lock(&self.state);
        let handle = state.mint();
        state.items.insert(handle, info);
        handle
    }

    /// Queue an event for delivery on the next `pump_events`.
    pub fn queue_event(&self, device: NativeHandle, event: CameraEvent) {
        lock(&self.state).pending.push_back((device, event));
    }

    /// Queue a transfer-requested object event for `item`.
    pub fn queue_transfer_request(&self, device: NativeHandle, item: NativeHandle) {
        self.queue_event(
            device,
            CameraEvent::Object {
                event: consts::OBJECT_EVENT_DIR_ITEM_REQUEST_TRANSFER,
                item,
            },
        );
    }

    /// Make the next call named `call` fail with `code`. One-shot.
    pub fn fail_next(&self, call: &'static str, code: u32) {
        lock(&self.fail_next).insert(call, code);
    }

    /// When enabled, releasing the shutter stages a fresh `IMG_nnnn.JPG` item
    /// and queues its transfer event, so a capture round-trips the pipeline
    /// without hardware.
    pub fn set_capture_simulation(&self, enabled: bool) {
        lock(&self.state).simulate_capture = enabled;
    }

    // --- introspection ----------------------------------------------------

    /// Snapshot of the ordered call log.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Drain the call log, returning what was recorded so far.
    pub fn take_calls(&self) -> Vec<MockCall> {
        std::mem::take(&mut *lock(&self.calls))
    }

    pub fn retain_count(&self, handle: NativeHandle) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == MockCall::Retain(handle))
            .count()
    }

    pub fn release_count(&self, handle: NativeHandle) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == MockCall::Release(handle))
            .count()
    }

    pub fn pump_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| **c == MockCall::PumpEvents)
            .count()
    }

    /// Whether a handler is currently registered for (`device`, `kind`).
    pub fn handler_registered(&self, device: NativeHandle, kind: EventKind) -> bool {
        lock(&self.state).handlers.contains_key(&(device, kind))
    }

    /// Number of live (unreleased) file streams.
    pub fn live_streams(&self) -> usize {
        lock(&self.state).streams.len()
    }

    /// Number of live (unreleased) enumeration lists.
    pub fn live_lists(&self) -> usize {
        lock(&self.state).lists.len()
    }

    // --- internals --------------------------------------------------------

    fn record(&self, call: MockCall) {
        lock(&self.calls).push(call);
    }

    /// Record the call, then apply one-shot failure injection.
    fn enter(&self, name: &'static str, call: MockCall) -> SdkResult<()> {
        self.record(call);
        if let Some(code) = lock(&self.fail_next).remove(name) {
            return Err(SdkError::new(code));
        }
        Ok(())
    }

    fn simulate_capture_item(&self, device: NativeHandle) {
        let item = {
            let mut state = lock(&self.state);
            state.capture_seq += 1;
            let seq = state.capture_seq;
            let handle = state.mint();
            state.items.insert(
                handle,
                ItemInfo {
                    size: 24 * 1024,
                    file_name: format!("IMG_{:04}.JPG", seq),
                    captured_at: Utc::now(),
                },
            );
            handle
        };
        self.queue_transfer_request(device, item);
    }
}

impl Default for MockSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraSdk for MockSdk {
    fn initialize(&self) -> SdkResult<()> {
        self.enter("initialize", MockCall::Initialize)?;
        lock(&self.state).initialized = true;
        Ok(())
    }

    fn terminate(&self) -> SdkResult<()> {
        self.enter("terminate", MockCall::Terminate)?;
        lock(&self.state).initialized = false;
        Ok(())
    }

    fn retain(&self, handle: NativeHandle) -> SdkResult<()> {
        self.enter("retain", MockCall::Retain(handle))?;
        let mut state = lock(&self.state);
        *state.refcounts.entry(handle).or_insert(0) += 1;
        Ok(())
    }

    fn release(&self, handle: NativeHandle) -> SdkResult<()> {
        self.enter("release", MockCall::Release(handle))?;
        let mut state = lock(&self.state);
        // Streams and lists are single-owner: release closes them outright.
        if state.streams.remove(&handle).is_some() || state.lists.remove(&handle).is_some() {
            return Ok(());
        }
        match state.refcounts.get_mut(&handle) {
            Some(count) if *count > 0 => {
                *count -= 1;
                Ok(())
            }
            _ => {
                // Items staged by tests may be released without a prior
                // retain; devices must not be over-released.
                if state.items.contains_key(&handle) {
                    Ok(())
                } else {
                    Err(SdkError::new(MOCK_ERR_INVALID_HANDLE))
                }
            }
        }
    }

    fn pump_events(&self) -> SdkResult<()> {
        self.enter("pump_events", MockCall::PumpEvents)?;
        // Deliver synchronously, one at a time, without holding the state
        // lock across a handler invocation.
        loop {
            let delivery = {
                let mut state = lock(&self.state);
                match state.pending.pop_front() {
                    Some((device, event)) => state
                        .handlers
                        .get(&(device, event.kind()))
                        .cloned()
                        .map(|h| (h, event)),
                    None => break,
                }
            };
            if let Some((handler, event)) = delivery {
                handler(event);
            }
        }
        Ok(())
    }

    fn enumerate_devices(&self) -> SdkResult<NativeHandle> {
        self.enter("enumerate_devices", MockCall::EnumerateDevices)?;
        let mut state = lock(&self.state);
        if !state.initialized {
            return Err(SdkError::new(MOCK_ERR_INTERNAL));
        }
        let children: Vec<NativeHandle> = state.devices.iter().map(|d| d.handle).collect();
        let list = state.mint();
        state.lists.insert(list, children);
        Ok(list)
    }

    fn child_count(&self, list: NativeHandle) -> SdkResult<usize> {
        self.enter("child_count", MockCall::ChildCount(list))?;
        lock(&self.state)
            .lists
            .get(&list)
            .map(Vec::len)
            .ok_or(SdkError::new(MOCK_ERR_INVALID_HANDLE))
    }

    fn child_at(&self, list: NativeHandle, index: usize) -> SdkResult<NativeHandle> {
        self.enter("child_at", MockCall::ChildAt(list, index))?;
        lock(&self.state)
            .lists
            .get(&list)
            .and_then(|children| children.get(index).copied())
            .ok_or(SdkError::new(MOCK_ERR_INVALID_HANDLE))
    }

    fn device_info(&self, device: NativeHandle) -> SdkResult<DeviceInfo> {
        self.enter("device_info", MockCall::DeviceInfo(device))?;
        lock(&self.state)
            .device_by_handle(device)
            .map(|d| d.info.clone())
            .ok_or(SdkError::new(MOCK_ERR_INVALID_HANDLE))
    }

    fn open_session(&self, device: NativeHandle) -> SdkResult<()> {
        self.enter("open_session", MockCall::OpenSession(device))?;
        if lock(&self.state).device_by_handle(device).is_none() {
            return Err(SdkError::new(MOCK_ERR_INVALID_HANDLE));
        }
        Ok(())
    }

    fn close_session(&self, device: NativeHandle) -> SdkResult<()> {
        self.enter("close_session", MockCall::CloseSession(device))?;
        Ok(())
    }

    fn set_property_event_handler(
        &self,
        device: NativeHandle,
        _mask: u32,
        handler: Option<EventHandler>,
    ) -> SdkResult<()> {
        self.set_handler("set_property_event_handler", device, EventKind::Property, handler)
    }

    fn set_object_event_handler(
        &self,
        device: NativeHandle,
        _mask: u32,
        handler: Option<EventHandler>,
    ) -> SdkResult<()> {
        self.set_handler("set_object_event_handler", device, EventKind::Object, handler)
    }

    fn set_state_event_handler(
        &self,
        device: NativeHandle,
        _mask: u32,
        handler: Option<EventHandler>,
    ) -> SdkResult<()> {
        self.set_handler("set_state_event_handler", device, EventKind::State, handler)
    }

    fn property_size(&self, device: NativeHandle, property_id: u32) -> SdkResult<usize> {
        self.enter(
            "property_size",
            MockCall::PropertySize {
                device,
                property_id,
            },
        )?;
        Ok(4)
    }

    fn set_property(
        &self,
        device: NativeHandle,
        property_id: u32,
        _size: usize,
        data: u32,
    ) -> SdkResult<()> {
        self.enter(
            "set_property",
            MockCall::SetProperty {
                device,
                property_id,
                data,
            },
        )?;
        Ok(())
    }

    fn send_command(&self, device: NativeHandle, command: u32, param: i32) -> SdkResult<()> {
        self.enter(
            "send_command",
            MockCall::SendCommand {
                device,
                command,
                param,
            },
        )?;
        let simulate = lock(&self.state).simulate_capture;
        if simulate
            && command == consts::CMD_PRESS_SHUTTER_BUTTON
            && param == consts::SHUTTER_BUTTON_OFF
        {
            self.simulate_capture_item(device);
        }
        Ok(())
    }

    fn set_capacity_hint(
        &self,
        device: NativeHandle,
        _capacity: StorageCapacity,
    ) -> SdkResult<()> {
        self.enter("set_capacity_hint", MockCall::SetCapacityHint(device))?;
        Ok(())
    }

    fn item_info(&self, item: NativeHandle) -> SdkResult<ItemInfo> {
        self.enter("item_info", MockCall::ItemInfo(item))?;
        lock(&self.state)
            .items
            .get(&item)
            .cloned()
            .ok_or(SdkError::new(MOCK_ERR_INVALID_HANDLE))
    }

    fn create_file_stream(
        &self,
        path: &Path,
        _disposition: u32,
        _access: u32,
    ) -> SdkResult<NativeHandle> {
        self.enter(
            "create_file_stream",
            MockCall::CreateFileStream(path.to_path_buf()),
        )?;
        // CREATE_ALWAYS semantics: truncate whatever is there.
        let file = File::create(path).map_err(|_| SdkError::new(MOCK_ERR_INTERNAL))?;
        let mut state = lock(&self.state);
        let handle = state.mint();
        state.streams.insert(handle, file);
        Ok(handle)
    }

    fn download(&self, item: NativeHandle, size: u64, stream: NativeHandle) -> SdkResult<()> {
        self.enter("download", MockCall::Download { item, size, stream })?;
        let mut state = lock(&self.state);
        if !state.items.contains_key(&item) {
            return Err(SdkError::new(MOCK_ERR_INVALID_HANDLE));
        }
        let file = state
            .streams
            .get_mut(&stream)
            .ok_or(SdkError::new(MOCK_ERR_INVALID_HANDLE))?;
        let chunk = [0xABu8; 4096];
        let mut remaining = size as usize;
        while remaining > 0 {
            let n = remaining.min(chunk.len());
            file.write_all(&chunk[..n])
                .map_err(|_| SdkError::new(MOCK_ERR_INTERNAL))?;
            remaining -= n;
        }
        file.flush().map_err(|_| SdkError::new(MOCK_ERR_INTERNAL))?;
        Ok(())
    }

    fn download_complete(&self, item: NativeHandle) -> SdkResult<()> {
        self.enter("download_complete", MockCall::DownloadComplete(item))?;
        Ok(())
    }
}

impl MockSdk {
    fn set_handler(
        &self,
        name: &'static str,
        device: NativeHandle,
        kind: EventKind,
        handler: Option<EventHandler>,
    ) -> SdkResult<()> {
        self.enter(
            name,
            MockCall::SetEventHandler {
                device,
                kind,
                registered: handler.is_some(),
            },
        )?;
        let mut state = lock(&self.state);
        match handler {
            Some(h) => {
                state.handlers.insert((device, kind), h);
            }
            None => {
                state.handlers.remove(&(device, kind));
            }
        }
        Ok(())
    }
}

/// Convenience constructor used by the CLI: one simulated body with capture
/// simulation enabled.
pub fn simulated_camera() -> Arc<MockSdk> {
    let sdk = Arc::new(MockSdk::new());
    sdk.add_device("usb:001,004", "Simulated Camera Mk II", 0);
    sdk.set_capture_simulation(true);
    sdk
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_device_handles_across_enumerations() {
        let sdk = MockSdk::new();
        let dev = sdk.add_device("usb:1", "Cam", 0);
        sdk.initialize().unwrap();

        let list_a = sdk.enumerate_devices().unwrap();
        let child_a = sdk.child_at(list_a, 0).unwrap();
        sdk.release(list_a).unwrap();

        let list_b = sdk.enumerate_devices().unwrap();
        let child_b = sdk.child_at(list_b, 0).unwrap();
        sdk.release(list_b).unwrap();

        assert_eq!(child_a, dev);
        assert_eq!(child_a, child_b);
    }

    #[test]
    fn fail_next_is_one_shot() {
        let sdk = MockSdk::new();
        sdk.fail_next("initialize", 0xC0);
        assert_eq!(sdk.initialize(), Err(SdkError::new(0xC0)));
        assert!(sdk.initialize().is_ok());
    }

    #[test]
    fn pump_delivers_queued_events_in_order() {
        let sdk = MockSdk::new();
        let dev = sdk.add_device("usb:1", "Cam", 0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        sdk.set_state_event_handler(
            dev,
            consts::STATE_EVENT_ALL,
            Some(Arc::new(move |event| {
                if let CameraEvent::State { data, .. } = event {
                    seen2.lock().unwrap().push(data);
                }
            })),
        )
        .unwrap();

        sdk.queue_event(dev, CameraEvent::State { event: 1, data: 10 });
        sdk.queue_event(dev, CameraEvent::State { event: 1, data: 20 });
        sdk.pump_events().unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
    }

    #[test]
    fn events_without_handler_are_dropped() {
        let sdk = MockSdk::new();
        let dev = sdk.add_device("usb:1", "Cam", 0);
        sdk.queue_event(dev, CameraEvent::State { event: 1, data: 0 });
        assert!(sdk.pump_events().is_ok());
    }
}
