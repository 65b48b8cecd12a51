//! Per-device camera session.
//!
//! Wraps one retained native handle in a Closed → Opening → Open → Closing →
//! Closed lifecycle, owns the event dispatcher and download worker for that
//! device, and hosts the listener registry for the images it produces.

use crate::config::TetherConfig;
use crate::download::{download_worker, DownloadPipeline};
use crate::error::{TetherError, TetherResult};
use crate::events::EventDispatcher;
use crate::listeners::{ImageListener, ListenerRegistry, Subscription};
use crate::sdk::{consts, CameraSdk, DeviceInfo, EventKind, NativeHandle, Retained, StorageCapacity};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Immutable device identity. Two identities are equal iff the port name
/// matches; description and sub-type are informational.
#[derive(Debug, Clone)]
pub struct CameraIdentity {
    /// Unique key, e.g. `usb:001,004`.
    pub port_name: String,
    pub description: String,
    pub sub_type: u32,
}

impl PartialEq for CameraIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.port_name == other.port_name
    }
}

impl Eq for CameraIdentity {}

impl std::hash::Hash for CameraIdentity {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.port_name.hash(state);
    }
}

impl From<DeviceInfo> for CameraIdentity {
    fn from(info: DeviceInfo) -> Self {
        Self {
            port_name: info.port_name,
            description: info.description,
            sub_type: info.sub_type,
        }
    }
}

impl std::fmt::Display for CameraIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description, self.port_name)
    }
}

/// Session lifecycle state. Opening and Closing are transient; externally a
/// session is observed as open or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Proof that one event-handler registration is live. Consumed exactly once
/// by the matching unregister during close.
#[derive(Debug)]
struct HandlerToken {
    kind: EventKind,
}

#[derive(Debug, Default)]
struct Registrations {
    property: Option<HandlerToken>,
    object: Option<HandlerToken>,
    state: Option<HandlerToken>,
}

/// One logical session with a physical device.
pub struct CameraSession {
    identity: CameraIdentity,
    sdk: Arc<dyn CameraSdk>,
    config: TetherConfig,
    state: SessionState,
    device: Option<Retained>,
    registrations: Registrations,
    listeners: Arc<ListenerRegistry>,
    transfer_tx: Option<mpsc::UnboundedSender<NativeHandle>>,
}

impl CameraSession {
    pub fn new(sdk: Arc<dyn CameraSdk>, identity: CameraIdentity, config: TetherConfig) -> Self {
        Self {
            identity,
            sdk,
            config,
            state: SessionState::Closed,
            device: None,
            registrations: Registrations::default(),
            listeners: Arc::new(ListenerRegistry::new()),
            transfer_tx: None,
        }
    }

    pub fn identity(&self) -> &CameraIdentity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Run the open sequence against `device`: retain, register the three
    /// event handlers, open the native session, route captures to the host
    /// and select continuous drive.
    ///
    /// Any step failing aborts the rest and surfaces the native result code.
    /// There is no rollback: the handle retained at step one stays retained
    /// (see [`Retained::leak`]) and registrations already made stay
    /// registered. Callers must discard the session rather than retry it.
    pub fn open(&mut self, device: NativeHandle) -> TetherResult<()> {
        let port = self.identity.port_name.clone();
        self.state = SessionState::Opening;

        let retained = Retained::acquire(Arc::clone(&self.sdk), device)
            .map_err(|code| TetherError::session(&port, code))?;
        self.device = Some(retained);

        // Download plumbing first, so a transfer event arriving right after
        // registration already has somewhere to go.
        let (transfer_tx, transfer_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(EventDispatcher::new(port.clone(), transfer_tx.clone()));
        let pipeline = Arc::new(DownloadPipeline::new(
            Arc::clone(&self.sdk),
            port.clone(),
            self.config.download_dir.clone(),
            Arc::clone(&self.listeners),
        ));
        // Detached: the worker exits on its own once the sender side closes.
        let _ = tokio::spawn(download_worker(pipeline, transfer_rx));
        self.transfer_tx = Some(transfer_tx);

        let handler = dispatcher.handler();

        self.sdk
            .set_property_event_handler(device, consts::PROPERTY_EVENT_ALL, Some(handler.clone()))
            .map_err(|code| self.open_step_failed(code))?;
        self.registrations.property = Some(HandlerToken {
            kind: EventKind::Property,
        });

        self.sdk
            .set_object_event_handler(device, consts::OBJECT_EVENT_ALL, Some(handler.clone()))
            .map_err(|code| self.open_step_failed(code))?;
        self.registrations.object = Some(HandlerToken {
            kind: EventKind::Object,
        });

        self.sdk
            .set_state_event_handler(device, consts::STATE_EVENT_ALL, Some(handler))
            .map_err(|code| self.open_step_failed(code))?;
        self.registrations.state = Some(HandlerToken {
            kind: EventKind::State,
        });

        self.sdk
            .open_session(device)
            .map_err(|code| self.open_step_failed(code))?;

        // Captures land on the host; no card required in the body.
        self.set_property(device, consts::PROP_SAVE_TO, consts::SAVE_TO_HOST)
            .map_err(|code| self.open_step_failed(code))?;
        self.set_property(device, consts::PROP_DRIVE_MODE, consts::DRIVE_MODE_CONTINUOUS)
            .map_err(|code| self.open_step_failed(code))?;

        self.state = SessionState::Open;
        tracing::info!(port = %port, "session open");
        Ok(())
    }

    fn set_property(
        &self,
        device: NativeHandle,
        property_id: u32,
        value: u32,
    ) -> crate::sdk::SdkResult<()> {
        let size = self.sdk.property_size(device, property_id)?;
        self.sdk.set_property(device, property_id, size, value)
    }

    /// Partial-open abort: leak the retained handle, leave registrations in
    /// place, report the failed step's code.
    fn open_step_failed(&mut self, code: crate::sdk::SdkError) -> TetherError {
        if let Some(retained) = self.device.take() {
            let handle = retained.leak();
            tracing::warn!(
                port = %self.identity.port_name,
                handle = %handle,
                error = %code,
                "open sequence aborted; handle left retained"
            );
        }
        TetherError::session(&self.identity.port_name, code)
    }

    /// Tear the session down. Every step is independent and best-effort: a
    /// failing step is logged and the remaining steps still run. A session
    /// that never opened returns immediately.
    pub fn close(&mut self) {
        let Some(device) = self.device.as_ref().map(Retained::handle) else {
            return;
        };
        let port = self.identity.port_name.clone();
        self.state = SessionState::Closing;

        if let Some(token) = self.registrations.property.take() {
            if let Err(code) =
                self.sdk
                    .set_property_event_handler(device, consts::PROPERTY_EVENT_ALL, None)
            {
                tracing::warn!(port = %port, kind = %token.kind, error = %code, "unregister failed");
            }
        }
        if let Some(token) = self.registrations.object.take() {
            if let Err(code) =
                self.sdk
                    .set_object_event_handler(device, consts::OBJECT_EVENT_ALL, None)
            {
                tracing::warn!(port = %port, kind = %token.kind, error = %code, "unregister failed");
            }
        }
        if let Some(token) = self.registrations.state.take() {
            if let Err(code) = self
                .sdk
                .set_state_event_handler(device, consts::STATE_EVENT_ALL, None)
            {
                tracing::warn!(port = %port, kind = %token.kind, error = %code, "unregister failed");
            }
        }

        if let Err(code) = self.sdk.close_session(device) {
            tracing::warn!(port = %port, error = %code, "native session close failed");
        }

        // Stops the worker once in-flight downloads drain; never cancels one.
        self.transfer_tx = None;

        if let Some(retained) = self.device.take() {
            if let Err(code) = retained.release() {
                tracing::warn!(port = %port, error = %code, "handle release failed");
            }
        }

        self.state = SessionState::Closed;
        tracing::info!(port = %port, "session closed");
    }

    /// Fire one capture: report generous storage capacity so the body does
    /// not refuse to shoot, press the shutter completely, wait out the
    /// mechanical settle interval, release. No retry on command failure.
    pub async fn trigger_capture(&self) -> TetherResult<()> {
        let port = &self.identity.port_name;
        let device = match self.device.as_ref() {
            Some(retained) if self.state == SessionState::Open => retained.handle(),
            _ => return Err(TetherError::not_open(port)),
        };

        self.sdk
            .set_capacity_hint(device, StorageCapacity::generous())
            .map_err(|code| TetherError::session(port, code))?;
        self.sdk
            .send_command(
                device,
                consts::CMD_PRESS_SHUTTER_BUTTON,
                consts::SHUTTER_BUTTON_COMPLETELY,
            )
            .map_err(|code| TetherError::session(port, code))?;

        if !self.config.shutter_settle.is_zero() {
            tokio::time::sleep(self.config.shutter_settle).await;
        }

        self.sdk
            .send_command(
                device,
                consts::CMD_PRESS_SHUTTER_BUTTON,
                consts::SHUTTER_BUTTON_OFF,
            )
            .map_err(|code| TetherError::session(port, code))?;

        tracing::debug!(port = %port, "capture triggered");
        Ok(())
    }

    /// Subscribe to images this session downloads.
    pub fn subscribe(&self, listener: ImageListener) -> Subscription {
        self.listeners.subscribe(listener)
    }

    /// Registry accessor for the download pipeline's observable state.
    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }
}

impl Drop for CameraSession {
    /// Fallback teardown for a session dropped while still open, so the
    /// handlers are unregistered and the native session closed before the
    /// retained handle is released. A no-op after an explicit close.
    fn drop(&mut self) {
        self.close();
    }
}
