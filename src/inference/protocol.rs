use std::path::PathBuf;

use glam::*;
use serde::{Deserialize, Serialize};

use crate::{DepthMetadata, Error};

/// A request line sent to the inference process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// The correlation id, assigned on submission.
    #[serde(default)]
    pub id: u64,
    /// The image to segment.
    pub image: PathBuf,
    /// The prompt points, see [`format_points`].
    pub points: String,
    /// Where the mask is written.
    pub out: PathBuf,
    /// Whether a depth estimate is requested.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub depth: bool,
    /// Where the depth is written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_out: Option<PathBuf>,
}

impl InferenceRequest {
    /// Create a new mask request.
    pub fn new(image: impl Into<PathBuf>, points: &[Vec2], out: impl Into<PathBuf>) -> Self {
        Self {
            id: 0,
            image: image.into(),
            points: format_points(points),
            out: out.into(),
            depth: false,
            depth_out: None,
        }
    }

    /// Request a depth estimate written to `path`.
    pub fn with_depth(mut self, path: impl Into<PathBuf>) -> Self {
        self.depth = true;
        self.depth_out = Some(path.into());
        self
    }
}

/// A response line received from the inference process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// The correlation id, absent from processes that answer strictly in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Whether the mask was written.
    #[serde(default)]
    pub ok: bool,
    /// The mask path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out: Option<PathBuf>,
    /// The mask width.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub w: Option<u32>,
    /// The mask height.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub h: Option<u32>,
    /// The depth path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_out: Option<PathBuf>,
    /// The depth range text, see [`DepthMetadata`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_meta: Option<String>,
    /// The failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InferenceResponse {
    /// Check the response of request `id` for an error or a missing mask.
    pub fn into_result(self, id: u64) -> Result<Self, Error> {
        if let Some(message) = self.error {
            return Err(Error::InferenceFailed { id, message });
        }

        if !self.ok || self.out.is_none() {
            return Err(Error::InferenceFailed {
                id,
                message: "empty response".to_string(),
            });
        }

        Ok(self)
    }

    /// Parse the depth metadata.
    ///
    /// Invalid metadata is logged and ignored.
    pub fn depth_metadata(&self) -> Option<DepthMetadata> {
        let text = self.depth_meta.as_deref()?;
        text.parse()
            .inspect_err(|e| log::warn!("Ignoring depth metadata: {e}"))
            .ok()
    }
}

/// Parse prompt points from `x1,y1,x2,y2,...`.
///
/// Coordinates are normalized with the origin at the top left. An empty string is no points.
pub fn parse_points(text: &str) -> Result<Vec<Vec2>, Error> {
    let values = text
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| Error::InvalidPoints(text.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    if values.len() % 2 != 0 {
        return Err(Error::InvalidPoints(text.to_string()));
    }

    Ok(values.chunks_exact(2).map(|p| vec2(p[0], p[1])).collect())
}

/// Format prompt points as `x1,y1,x2,y2,...`.
pub fn format_points(points: &[Vec2]) -> String {
    points
        .iter()
        .map(|p| format!("{},{}", p.x, p.y))
        .collect::<Vec<_>>()
        .join(",")
}
