//! Top-level session registry and polling-loop scheduler.
//!
//! At most one [`CameraSession`] exists per port name. The event-pump loop
//! runs iff at least one session is open: opening the first session starts
//! it, closing the last stops it.

use crate::config::TetherConfig;
use crate::error::{TetherError, TetherResult};
use crate::listeners::{ImageListener, Subscription};
use crate::sdk::{CameraSdk, DeviceInfo, NativeHandle, SdkResult};
use crate::session::{CameraIdentity, CameraSession};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Sessions live behind their own lock so long-running per-session work
/// (most notably the capture settle wait) never stalls the registry.
type SessionCell = Arc<Mutex<CameraSession>>;

/// Repeating event-pump scheduler.
///
/// One blocking worker calls `pump_events` once per tick. Each start spawns
/// a worker stamped with the current epoch; every start and stop bumps the
/// epoch, so a worker that outlives its stop (still inside a tick or its
/// sleep when the loop restarts) sees a stale stamp and exits instead of
/// looping alongside its replacement. The tick gate serializes the pump call
/// across worker generations, so ticks can never overlap even in that
/// handover window. Pump failures are logged and the loop keeps going.
struct PollLoop {
    sdk: Arc<dyn CameraSdk>,
    interval: Duration,
    active: Arc<AtomicBool>,
    epoch: Arc<AtomicU64>,
    tick_gate: Arc<std::sync::Mutex<()>>,
}

impl PollLoop {
    fn new(sdk: Arc<dyn CameraSdk>, interval: Duration) -> Self {
        Self {
            sdk,
            interval,
            active: Arc::new(AtomicBool::new(false)),
            epoch: Arc::new(AtomicU64::new(0)),
            tick_gate: Arc::new(std::sync::Mutex::new(())),
        }
    }

    /// Start the loop if it is not already running. Must be called from
    /// within a tokio runtime.
    fn start(&self) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }
        let token = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let epoch = Arc::clone(&self.epoch);
        let gate = Arc::clone(&self.tick_gate);
        let sdk = Arc::clone(&self.sdk);
        let interval = self.interval;
        let _ = tokio::task::spawn_blocking(move || {
            tracing::debug!("event pump loop started");
            while epoch.load(Ordering::SeqCst) == token {
                {
                    let _tick = match gate.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    if epoch.load(Ordering::SeqCst) != token {
                        break;
                    }
                    if let Err(code) = sdk.pump_events() {
                        // Tolerated; the loop only stops when the last
                        // session closes.
                        tracing::debug!(error = %code, "event pump call failed");
                    }
                }
                std::thread::sleep(interval);
            }
            tracing::debug!("event pump loop stopped");
        });
    }

    /// Signal the worker to exit after its current tick. The epoch bump
    /// invalidates the worker immediately, so a follow-up `start` spawns a
    /// fresh one without racing it.
    fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Public device API: enumeration, session lifecycle, capture and image
/// subscription.
pub struct SessionManager {
    sdk: Arc<dyn CameraSdk>,
    config: TetherConfig,
    sessions: Mutex<HashMap<String, SessionCell>>,
    poll: PollLoop,
}

impl SessionManager {
    /// Validate `config` and perform the global SDK initialization.
    pub fn new(sdk: Arc<dyn CameraSdk>, config: TetherConfig) -> TetherResult<Self> {
        config.validate()?;
        sdk.initialize().map_err(TetherError::Initialization)?;
        let poll = PollLoop::new(Arc::clone(&sdk), config.poll_interval);
        Ok(Self {
            sdk,
            config,
            sessions: Mutex::new(HashMap::new()),
            poll,
        })
    }

    /// Enumerate currently connected devices.
    ///
    /// Snapshots descriptor fields into immutable identities; the native
    /// references obtained along the way are not retained, and the list
    /// resource is released before returning.
    pub fn list_devices(&self) -> TetherResult<Vec<CameraIdentity>> {
        Ok(self
            .snapshot_devices()?
            .into_iter()
            .map(|(_, info)| info.into())
            .collect())
    }

    fn snapshot_devices(&self) -> TetherResult<Vec<(NativeHandle, DeviceInfo)>> {
        let list = self
            .sdk
            .enumerate_devices()
            .map_err(TetherError::Enumeration)?;
        let walked: SdkResult<Vec<(NativeHandle, DeviceInfo)>> = (|| {
            let count = self.sdk.child_count(list)?;
            let mut devices = Vec::with_capacity(count);
            for index in 0..count {
                let device = self.sdk.child_at(list, index)?;
                let info = self.sdk.device_info(device)?;
                devices.push((device, info));
            }
            Ok(devices)
        })();
        // The list is released whether or not the walk succeeded.
        if let Err(code) = self.sdk.release(list) {
            tracing::warn!(error = %code, "device list release failed");
        }
        walked.map_err(TetherError::Enumeration)
    }

    /// Open a session for `identity`. Idempotent: a second open for a port
    /// already tracked is a no-op.
    ///
    /// On an open-sequence failure the error propagates and the identity is
    /// not tracked; the partially configured native state is left as-is (see
    /// [`CameraSession::open`]).
    pub async fn open(&self, identity: &CameraIdentity) -> TetherResult<()> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&identity.port_name) {
            tracing::debug!(port = %identity.port_name, "session already open");
            return Ok(());
        }

        let (device, info) = self
            .snapshot_devices()?
            .into_iter()
            .find(|(_, info)| info.port_name == identity.port_name)
            .ok_or_else(|| TetherError::DeviceNotFound {
                port: identity.port_name.clone(),
            })?;

        let mut session =
            CameraSession::new(Arc::clone(&self.sdk), info.into(), self.config.clone());
        session.open(device)?;

        self.poll.start();
        sessions.insert(identity.port_name.clone(), Arc::new(Mutex::new(session)));
        Ok(())
    }

    /// Close the session for `identity`. Returns false if none is tracked.
    /// Closing the last session stops the polling loop.
    pub async fn close(&self, identity: &CameraIdentity) -> bool {
        let cell = {
            let mut sessions = self.sessions.lock().await;
            let Some(cell) = sessions.remove(&identity.port_name) else {
                return false;
            };
            if sessions.is_empty() {
                self.poll.stop();
            }
            cell
        };
        // Registry lock is released; an in-flight capture on this session
        // finishes before the teardown runs.
        cell.lock().await.close();
        true
    }

    /// Fire one capture on the open session for `identity`.
    ///
    /// Only this session's lock is held across the shutter settle wait;
    /// other sessions and the registry stay available.
    pub async fn trigger_capture(&self, identity: &CameraIdentity) -> TetherResult<()> {
        let cell = self.session_cell(&identity.port_name).await?;
        let session = cell.lock().await;
        session.trigger_capture().await
    }

    /// Subscribe to images downloaded by the session for `identity`.
    pub async fn subscribe_to_images(
        &self,
        identity: &CameraIdentity,
        listener: ImageListener,
    ) -> TetherResult<Subscription> {
        let cell = self.session_cell(&identity.port_name).await?;
        let session = cell.lock().await;
        Ok(session.subscribe(listener))
    }

    /// How many downloads for `identity` completed with no listener
    /// subscribed. The files are still on disk.
    pub async fn undelivered_image_count(&self, identity: &CameraIdentity) -> TetherResult<u64> {
        let cell = self.session_cell(&identity.port_name).await?;
        let session = cell.lock().await;
        Ok(session.listeners().dropped_publishes())
    }

    async fn session_cell(&self, port: &str) -> TetherResult<SessionCell> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(port)
            .cloned()
            .ok_or_else(|| TetherError::not_open(port))
    }

    /// Close every tracked session (best-effort), stop the polling loop and
    /// tear down the SDK.
    pub async fn terminate(&self) {
        let drained: Vec<(String, SessionCell)> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().collect()
        };
        self.poll.stop();
        for (port, cell) in drained {
            tracing::debug!(port = %port, "closing session during terminate");
            cell.lock().await.close();
        }
        if let Err(code) = self.sdk.terminate() {
            tracing::warn!(error = %code, "SDK terminate failed");
        }
    }

    /// Whether the event-pump loop is currently scheduled. True iff at least
    /// one session is open.
    pub fn is_polling(&self) -> bool {
        self.poll.is_running()
    }

    /// Number of tracked sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
