//! Demultiplexing of the three asynchronous device callback classes.

use crate::sdk::{consts, CameraEvent, EventHandler, NativeHandle};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Routes raw device events for one open session.
///
/// Invoked synchronously from within a pump tick, never on its own thread.
/// Property and state events are logged and acknowledged (the SDK does not
/// support refusing acknowledgment). Object events are inspected: a
/// transfer-requested item is handed to the download queue, everything else
/// is ignored.
pub struct EventDispatcher {
    port: String,
    transfer_tx: mpsc::UnboundedSender<NativeHandle>,
}

impl EventDispatcher {
    pub fn new(port: String, transfer_tx: mpsc::UnboundedSender<NativeHandle>) -> Self {
        Self { port, transfer_tx }
    }

    /// One handler closure serves all three registrations; the event carries
    /// its own class tag.
    pub fn handler(self: Arc<Self>) -> EventHandler {
        Arc::new(move |event| self.dispatch(event))
    }

    fn dispatch(&self, event: CameraEvent) {
        match event {
            CameraEvent::Property { event, property_id } => {
                tracing::debug!(
                    port = %self.port,
                    code = event,
                    property = property_id,
                    "property event"
                );
            }
            CameraEvent::State { event, data } => {
                tracing::debug!(
                    port = %self.port,
                    code = event,
                    data,
                    "state event"
                );
            }
            CameraEvent::Object { event, item } => {
                if event == consts::OBJECT_EVENT_DIR_ITEM_REQUEST_TRANSFER {
                    // The download runs as its own unit of work; the tick
                    // this callback is riding on must return promptly.
                    if self.transfer_tx.send(item).is_err() {
                        tracing::warn!(
                            port = %self.port,
                            item = %item,
                            "transfer requested after download worker stopped"
                        );
                    }
                } else {
                    tracing::debug!(port = %self.port, code = event, "ignoring object event");
                }
            }
        }
    }
}
