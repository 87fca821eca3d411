//! Out-of-band encoder for raw pixel buffers.
//!
//! Encoding a full page can take seconds of CPU, so it runs on its own
//! thread. The worker is driven through an awaitable request/response
//! wrapper; one worker serves one encode and is terminated afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{encode_rgba, ImageFormat};
use crate::error::{CaptureError, Result};

/// Everything the worker needs to produce one image.
#[derive(Debug)]
pub struct EncodeJob {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub quality: u8,
    pub alpha: bool,
}

type Reply = std::result::Result<Vec<u8>, String>;

pub struct EncodeWorker {
    running: Arc<AtomicBool>,
    job_tx: Option<std::sync::mpsc::Sender<EncodeJob>>,
    reply_rx: mpsc::Receiver<Reply>,
}

impl EncodeWorker {
    /// Start a worker running the stock encoder.
    pub fn spawn() -> Result<Self> {
        Self::spawn_with(|job: EncodeJob| {
            encode_rgba(&job.pixels, job.width, job.height, job.format, job.quality, job.alpha)
                .map_err(|e| e.to_string())
        })
    }

    /// Start a worker running `handler` for every posted job.
    pub fn spawn_with<F>(mut handler: F) -> Result<Self>
    where
        F: FnMut(EncodeJob) -> Reply + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let (job_tx, job_rx) = std::sync::mpsc::channel::<EncodeJob>();
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>(1);

        let running_clone = running.clone();
        std::thread::Builder::new()
            .name("encode-worker".into())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    if !running_clone.load(Ordering::Relaxed) {
                        break;
                    }
                    let reply = handler(job);
                    // Terminated while busy: nobody is waiting any more.
                    if !running_clone.load(Ordering::Relaxed) {
                        break;
                    }
                    if reply_tx.blocking_send(reply).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| CaptureError::Encode(format!("failed to start worker: {}", e)))?;

        Ok(Self {
            running,
            job_tx: Some(job_tx),
            reply_rx,
        })
    }

    pub fn post(&self, job: EncodeJob) -> Result<()> {
        let tx = self
            .job_tx
            .as_ref()
            .ok_or_else(|| CaptureError::Encode("worker already terminated".into()))?;
        tx.send(job)
            .map_err(|_| CaptureError::Encode("worker is gone".into()))
    }

    /// Wait for the next reply.
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        match self.reply_rx.recv().await {
            Some(Ok(bytes)) => Ok(bytes),
            Some(Err(reason)) => Err(CaptureError::Encode(reason)),
            None => Err(CaptureError::Encode("worker exited without a response".into())),
        }
    }

    /// Post `job` and wait for its reply, failing after `timeout`.
    pub async fn request(&mut self, job: EncodeJob, timeout: Duration) -> Result<Vec<u8>> {
        self.post(job)?;
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(reply) => reply,
            Err(_) => Err(CaptureError::EncodeTimeout(timeout)),
        }
    }

    /// Stop the worker. A job in progress runs to completion but its result
    /// is discarded.
    pub fn terminate(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        self.job_tx.take();
    }
}

impl Drop for EncodeWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}
