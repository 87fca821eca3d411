use std::time::Duration;

use crate::encode::ImageFormat;

/// Everything that can end a capture session.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The trial capture could not be taken or decoded.
    #[error("pixel ratio calibration failed: {0}")]
    Calibration(String),

    /// The output cannot be held in memory or encoded in the target format.
    #[error("image of {width}x{height} is too large for {format}")]
    OversizeRejected {
        width: u64,
        height: u64,
        format: ImageFormat,
    },

    #[error("capture of tile {tile} failed: {reason}")]
    CaptureCall { tile: usize, reason: String },

    #[error("tile {tile} could not be decoded: {reason}")]
    Decode { tile: usize, reason: String },

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("encoder did not respond within {0:?}")]
    EncodeTimeout(Duration),

    /// Another session holds the lock for this key.
    #[error("{0} is busy")]
    LockBusy(String),

    #[error("region selection was cancelled")]
    SelectionCancelled,

    /// A collaborator (page metrics, style injection, scrolling) failed.
    #[error("{context}: {reason}")]
    Host { context: &'static str, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CaptureError {
    /// Wrap a collaborator failure, keeping the whole anyhow chain.
    pub fn host(context: &'static str, err: anyhow::Error) -> Self {
        Self::Host {
            context,
            reason: format!("{:#}", err),
        }
    }

    /// Busy locks and cancelled selections are dropped without telling the user.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::LockBusy(_) | Self::SelectionCancelled)
    }
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_and_cancel_are_silent() {
        assert!(!CaptureError::LockBusy("tab-1".into()).is_fatal());
        assert!(!CaptureError::SelectionCancelled.is_fatal());
        assert!(CaptureError::Encode("boom".into()).is_fatal());
        assert!(CaptureError::EncodeTimeout(Duration::from_secs(1)).is_fatal());
    }

    #[test]
    fn test_host_keeps_context_chain() {
        let err = anyhow::anyhow!("socket closed").context("executeScript");
        let wrapped = CaptureError::host("reading page metrics", err);
        let text = wrapped.to_string();
        assert!(text.starts_with("reading page metrics: executeScript"));
        assert!(text.contains("socket closed"));
    }
}
