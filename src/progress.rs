//! Optional progress side channel (badge countdown, phase labels, notices).

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Notice {
    /// The output exceeds one drawing surface and goes through the worker.
    VeryLargeImage,
    /// Another session is encoding; this one waits for the encoder.
    EncoderBusy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Progress {
    /// Tiles still to be captured, counting down.
    Capturing { remaining: usize },
    Saving,
    Notice(Notice),
    /// Session over; clear any indicator.
    Idle,
}

/// Cloneable sender that silently drops events when nobody listens.
#[derive(Debug, Clone, Default)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<Progress>>,
}

impl ProgressSender {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Progress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn send(&self, progress: Progress) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(progress);
        }
    }
}
