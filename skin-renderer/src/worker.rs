//! Background pixel worker.
//!
//! Per-pixel loops over large textures run on a dedicated OS thread so the
//! surfaces stay responsive. Every [`skin_core::pixel_ops`] transform is
//! exposed as an async method with the same inputs; buffers are moved to
//! the worker and results come back over a oneshot channel, so no mutable
//! memory is shared with the caller.
//!
//! Calls made after [`PixelWorker::shutdown`] fail with
//! [`RenderError::WorkerClosed`] instead of hanging.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use skin_core::{pixel_ops, RgbaBuffer, SkinResult};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::{RenderError, RenderResult};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Messages sent to the worker thread.
enum WorkerMessage {
    /// Run one job.
    Run(Task),
    /// Stop the thread.
    Shutdown,
}

/// Handle to the pixel worker thread.
#[derive(Debug)]
pub struct PixelWorker {
    request_tx: Mutex<Option<Sender<WorkerMessage>>>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PixelWorker {
    /// Spawn the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::WorkerSpawn`] if the thread cannot be started.
    pub fn spawn() -> RenderResult<Self> {
        let (request_tx, request_rx) = mpsc::channel::<WorkerMessage>();

        let thread_handle = thread::Builder::new()
            .name("pixel-worker".to_string())
            .spawn(move || {
                debug!("Pixel worker thread started");
                Self::thread_loop(&request_rx);
                debug!("Pixel worker thread exiting");
            })
            .map_err(|e| RenderError::WorkerSpawn(e.to_string()))?;

        info!("Pixel worker spawned");

        Ok(Self {
            request_tx: Mutex::new(Some(request_tx)),
            thread_handle: Mutex::new(Some(thread_handle)),
        })
    }

    fn thread_loop(request_rx: &Receiver<WorkerMessage>) {
        loop {
            match request_rx.recv() {
                Ok(WorkerMessage::Run(task)) => task(),
                Ok(WorkerMessage::Shutdown) => {
                    debug!("Received shutdown signal");
                    break;
                }
                // All senders dropped.
                Err(_) => break,
            }
        }
    }

    /// Whether the worker still accepts jobs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.request_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the worker and wait for the thread to exit. Idempotent.
    pub fn shutdown(&self) {
        let sender = self
            .request_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(sender) = sender else {
            return;
        };
        // The thread may already be gone.
        let _ = sender.send(WorkerMessage::Shutdown);
        drop(sender);

        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Pixel worker thread panicked");
            }
        }
        info!("Pixel worker shut down");
    }

    /// Run `job` on the worker thread and await its result.
    async fn run<T, F>(&self, job: F) -> RenderResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let task: Task = Box::new(move || {
            // The caller may have stopped waiting.
            let _ = reply_tx.send(job());
        });
        {
            let guard = self.request_tx.lock().unwrap_or_else(PoisonError::into_inner);
            let sender = guard.as_ref().ok_or(RenderError::WorkerClosed)?;
            sender
                .send(WorkerMessage::Run(task))
                .map_err(|_| RenderError::WorkerClosed)?;
        }
        reply_rx.await.map_err(|_| RenderError::WorkerClosed)
    }

    async fn run_fallible<T, F>(&self, job: F) -> RenderResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> SkinResult<T> + Send + 'static,
    {
        Ok(self.run(job).await??)
    }

    /// Force every pixel opaque.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::WorkerClosed`] after shutdown.
    pub async fn strip_alpha(&self, buffer: RgbaBuffer) -> RenderResult<RgbaBuffer> {
        self.run(move || pixel_ops::strip_alpha(buffer)).await
    }

    /// Turn the alpha channel into an opaque grayscale image.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::WorkerClosed`] after shutdown.
    pub async fn alpha_to_grayscale(&self, buffer: RgbaBuffer) -> RenderResult<RgbaBuffer> {
        self.run(move || pixel_ops::alpha_to_grayscale(buffer)).await
    }

    /// Pack a grayscale image into the metallic-roughness layout.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::WorkerClosed`] after shutdown.
    pub async fn grayscale_to_metallic_roughness(
        &self,
        buffer: RgbaBuffer,
    ) -> RenderResult<RgbaBuffer> {
        self.run(move || pixel_ops::grayscale_to_metallic_roughness(buffer))
            .await
    }

    /// Combine a colour image with the alpha carried by a grayscale image.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::WorkerClosed`] after shutdown, or the core
    /// error for mismatched sizes.
    pub async fn combine_color_and_alpha(
        &self,
        color: RgbaBuffer,
        alpha: RgbaBuffer,
    ) -> RenderResult<RgbaBuffer> {
        self.run_fallible(move || pixel_ops::combine_color_and_alpha(color, &alpha))
            .await
    }

    /// Decode PNG bytes.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::WorkerClosed`] after shutdown, or the core
    /// decode error.
    pub async fn decode_png(&self, bytes: Vec<u8>) -> RenderResult<RgbaBuffer> {
        self.run_fallible(move || pixel_ops::decode_png(&bytes)).await
    }

    /// Encode as PNG.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::WorkerClosed`] after shutdown, or the core
    /// encode error.
    pub async fn encode_png(&self, buffer: RgbaBuffer) -> RenderResult<Vec<u8>> {
        self.run_fallible(move || pixel_ops::encode_png(&buffer)).await
    }
}

impl Drop for PixelWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ops_match_direct_calls() {
        let worker = PixelWorker::spawn().expect("spawn");
        let source = RgbaBuffer::filled(3, 2, [10, 20, 30, 77]);

        let stripped = worker.strip_alpha(source.clone()).await.expect("strip");
        assert_eq!(stripped, pixel_ops::strip_alpha(source.clone()));

        let gray = worker.alpha_to_grayscale(source.clone()).await.expect("gray");
        assert_eq!(gray, pixel_ops::alpha_to_grayscale(source.clone()));

        let packed = worker
            .grayscale_to_metallic_roughness(gray.clone())
            .await
            .expect("pack");
        assert_eq!(packed, pixel_ops::grayscale_to_metallic_roughness(gray.clone()));

        let combined = worker
            .combine_color_and_alpha(source.clone(), gray)
            .await
            .expect("combine");
        assert!(combined.alpha_values().all(|a| a == 77));
    }

    #[tokio::test]
    async fn test_png_roundtrip_through_worker() {
        let worker = PixelWorker::spawn().expect("spawn");
        let source = RgbaBuffer::filled(5, 4, [1, 2, 3, 4]);
        let bytes = worker.encode_png(source.clone()).await.expect("encode");
        let decoded = worker.decode_png(bytes).await.expect("decode");
        assert_eq!(decoded, source);

        let err = worker.decode_png(vec![1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, RenderError::Core(skin_core::SkinError::Decode(_))));
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let worker = PixelWorker::spawn().expect("spawn");
        assert!(worker.is_running());
        worker.shutdown();
        worker.shutdown();
        assert!(!worker.is_running());

        let err = worker
            .strip_alpha(RgbaBuffer::filled(1, 1, [0, 0, 0, 0]))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::WorkerClosed));
    }

    #[tokio::test]
    async fn test_mismatched_combine_is_an_error() {
        let worker = PixelWorker::spawn().expect("spawn");
        let result = worker
            .combine_color_and_alpha(
                RgbaBuffer::filled(2, 2, [0, 0, 0, 255]),
                RgbaBuffer::filled(3, 3, [0, 0, 0, 255]),
            )
            .await;
        assert!(result.is_err());
    }
}
