//! Image download pipeline.
//!
//! Triggered out-of-band by a transfer-requested object event. The pipeline
//! pulls item metadata, streams the file into the download directory,
//! finalizes the native transfer and publishes a [`DownloadedImage`] to the
//! owning session's listener registry.

use crate::error::{DownloadStage, TetherError, TetherResult};
use crate::listeners::{DownloadedImage, ListenerRegistry};
use crate::sdk::{consts, CameraSdk, NativeHandle};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One session's download pipeline.
pub struct DownloadPipeline {
    sdk: Arc<dyn CameraSdk>,
    port: String,
    download_dir: PathBuf,
    listeners: Arc<ListenerRegistry>,
}

impl DownloadPipeline {
    pub fn new(
        sdk: Arc<dyn CameraSdk>,
        port: String,
        download_dir: PathBuf,
        listeners: Arc<ListenerRegistry>,
    ) -> Self {
        Self {
            sdk,
            port,
            download_dir,
            listeners,
        }
    }

    /// Pull one item from the device into the download directory.
    ///
    /// Metadata, stream creation and the byte transfer each abort the
    /// pipeline on failure. The completion acknowledgment is non-fatal (the
    /// file is already fully written), and the stream resource is released
    /// unconditionally once the transfer has been attempted.
    pub fn fetch(&self, item: NativeHandle) -> TetherResult<DownloadedImage> {
        let info = self.sdk.item_info(item).map_err(|code| TetherError::Download {
            stage: DownloadStage::ItemInfo,
            code,
        })?;

        // Destination is the download dir plus the device-reported name;
        // create-always disposition gives overwrite semantics on collision.
        let path = self.download_dir.join(&info.file_name);
        let stream = self
            .sdk
            .create_file_stream(&path, consts::FILE_CREATE_ALWAYS, consts::ACCESS_READ_WRITE)
            .map_err(|code| TetherError::Download {
                stage: DownloadStage::CreateStream,
                code,
            })?;

        let transferred = self.sdk.download(item, info.size, stream);
        if transferred.is_ok() {
            if let Err(code) = self.sdk.download_complete(item) {
                tracing::warn!(
                    port = %self.port,
                    file = %info.file_name,
                    error = %code,
                    "download-complete acknowledgment failed; file is intact"
                );
            }
        }
        if let Err(code) = self.sdk.release(stream) {
            tracing::warn!(port = %self.port, stream = %stream, error = %code, "stream release failed");
        }
        transferred.map_err(|code| TetherError::Download {
            stage: DownloadStage::Transfer,
            code,
        })?;

        Ok(DownloadedImage {
            path,
            file_name: info.file_name,
            size: info.size,
            captured_at: info.captured_at,
        })
    }

    /// Run the pipeline for one item and publish the result. Failures are
    /// logged; nothing synchronous is waiting on this path.
    pub fn run(&self, item: NativeHandle) {
        match self.fetch(item) {
            Ok(image) => {
                let delivered = self.listeners.publish(&image);
                if delivered == 0 {
                    tracing::warn!(
                        port = %self.port,
                        file = %image.file_name,
                        path = %image.path.display(),
                        "image downloaded but no listener is subscribed"
                    );
                } else {
                    tracing::info!(
                        port = %self.port,
                        file = %image.file_name,
                        size = image.size,
                        listeners = delivered,
                        "image downloaded"
                    );
                }
            }
            Err(e) => {
                tracing::warn!(port = %self.port, item = %item, error = %e, "image download failed");
            }
        }
    }
}

/// Per-session worker draining the transfer queue.
///
/// The dispatcher enqueues from within a pump tick; the blocking file I/O
/// happens here, off the polling thread. Exits when the session closes its
/// sender. In-flight downloads are never cancelled; each runs to completion
/// or failure.
pub(crate) async fn download_worker(
    pipeline: Arc<DownloadPipeline>,
    mut transfer_rx: mpsc::UnboundedReceiver<NativeHandle>,
) {
    while let Some(item) = transfer_rx.recv().await {
        let pipeline = Arc::clone(&pipeline);
        let task = tokio::task::spawn_blocking(move || pipeline.run(item));
        if let Err(e) = task.await {
            tracing::error!(item = %item, error = %e, "download task aborted");
        }
    }
    tracing::debug!("download worker stopped");
}
