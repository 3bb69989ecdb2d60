use std::time::Duration;

use glam::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Image(#[from] ::image::ImageError),
    #[error("image is empty")]
    EmptyImage,
    #[error("mask of selection run {0} has no pixel above the threshold")]
    EmptyMask(u64),
    #[error("image size {size} does not match {len} samples")]
    ImageSizeMismatch { size: UVec2, len: usize },
    #[error("prompt points must be an even number of comma-separated values: {0}")]
    InvalidPoints(String),
    #[error("invalid depth metadata: {0}")]
    InvalidDepthMetadata(String),
    #[error("inference request {id} timed out after {timeout:?}")]
    InferenceTimeout { id: u64, timeout: Duration },
    #[error("inference request {id} failed: {message}")]
    InferenceFailed { id: u64, message: String },
    #[error("inference process disconnected")]
    InferenceDisconnected,
    #[error("selection run {0} was superseded by a newer run")]
    RunSuperseded(u64),
    #[error("selection run {0} is already in flight")]
    RunInFlight(u64),
    #[error("buffer readback timed out after {0:?}")]
    ReadbackTimeout(Duration),
    #[error("{0}")]
    BufferDownloadOneShotReceive(#[from] oneshot::RecvError),
    #[error("{0}")]
    BufferDownloadAsync(#[from] wgpu::BufferAsyncError),
}
