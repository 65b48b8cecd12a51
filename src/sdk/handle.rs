//! Opaque native handles and the retained-handle guard.

use super::{CameraSdk, SdkResult};
use std::sync::Arc;

/// Opaque reference to an SDK-managed object (device, list, item or stream).
///
/// The raw value is freely copyable; ownership and refcount discipline live
/// in [`Retained`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHandle(u64);

impl NativeHandle {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Owned wrapper around a retained native handle.
///
/// Acquisition increments the SDK refcount; the single release path
/// (explicit [`release`](Retained::release) or drop) decrements it exactly
/// once. The wrapper cannot be cloned, only moved.
///
/// [`leak`](Retained::leak) forgoes the release entirely. A failed session
/// open leaves its handle retained rather than rolling back, so that path
/// leaks deliberately instead of letting drop release a handle the SDK may
/// still reference from registered callbacks.
pub struct Retained {
    sdk: Arc<dyn CameraSdk>,
    handle: NativeHandle,
    armed: bool,
}

impl Retained {
    /// Retain `handle` and take ownership of the reference.
    pub fn acquire(sdk: Arc<dyn CameraSdk>, handle: NativeHandle) -> SdkResult<Self> {
        sdk.retain(handle)?;
        Ok(Self {
            sdk,
            handle,
            armed: true,
        })
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    /// Release the handle now, consuming the wrapper.
    pub fn release(mut self) -> SdkResult<()> {
        self.armed = false;
        self.sdk.release(self.handle)
    }

    /// Give up ownership without releasing. The SDK refcount stays elevated.
    pub fn leak(mut self) -> NativeHandle {
        self.armed = false;
        self.handle
    }
}

impl Drop for Retained {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = self.sdk.release(self.handle) {
                tracing::warn!(handle = %self.handle, error = %e, "release on drop failed");
            }
        }
    }
}

impl std::fmt::Debug for Retained {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retained")
            .field("handle", &self.handle)
            .field("armed", &self.armed)
            .finish()
    }
}
