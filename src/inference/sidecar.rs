use std::{
    io::BufReader,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    sync::atomic::{AtomicU64, Ordering},
};

use glam::*;

use crate::{
    DepthImage, DepthMetadata, Error, MaskImage,
    inference::{
        InferenceBackend, InferenceChannel, InferenceOutput, InferencePrompt, InferenceRequest,
        InferenceResponse, PendingInference,
    },
};

/// The configuration of the inference helper process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarConfig {
    /// The interpreter running the helper script.
    pub python: PathBuf,
    /// The helper script.
    pub script: PathBuf,
    /// The segmentation model checkpoint.
    pub checkpoint: Option<String>,
    /// The segmentation model type.
    pub model: Option<String>,
    /// The device the model runs on.
    pub device: Option<String>,
    /// The directory the helper writes masks and depth images to.
    pub work_dir: PathBuf,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            python: PathBuf::from("python3"),
            script: PathBuf::from("cli_sam.py"),
            checkpoint: None,
            model: None,
            device: None,
            work_dir: std::env::temp_dir().join("wgpu-3dgs-mask-select"),
        }
    }
}

impl SidecarConfig {
    /// Read the configuration from the environment.
    ///
    /// `SAM_PYTHON`, `SAM_SCRIPT` and `SAM_WORK_DIR` override the defaults, `SAM_CHECKPOINT`,
    /// `SAM_MODEL` and `SAM_DEVICE` are passed on to the helper.
    pub fn from_env() -> Self {
        let default = Self::default();
        let var = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        Self {
            python: var("SAM_PYTHON").map_or(default.python, PathBuf::from),
            script: var("SAM_SCRIPT").map_or(default.script, PathBuf::from),
            checkpoint: var("SAM_CHECKPOINT"),
            model: var("SAM_MODEL"),
            device: var("SAM_DEVICE"),
            work_dir: var("SAM_WORK_DIR").map_or(default.work_dir, PathBuf::from),
        }
    }
}

/// The inference helper running as a child process in loop mode.
///
/// The process is killed on drop.
#[derive(Debug)]
pub struct SidecarProcess {
    child: Child,
    channel: InferenceChannel,
    work_dir: PathBuf,
    next_file: AtomicU64,
}

impl SidecarProcess {
    /// Spawn the helper.
    pub fn spawn(config: &SidecarConfig) -> Result<Self, Error> {
        log::debug!("Spawning inference helper {}", config.script.display());

        std::fs::create_dir_all(&config.work_dir)?;

        let mut command = Command::new(&config.python);
        command
            .arg(&config.script)
            .arg("--loop")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        for (key, value) in [
            ("SAM_CHECKPOINT", &config.checkpoint),
            ("SAM_MODEL", &config.model),
            ("SAM_DEVICE", &config.device),
        ] {
            if let Some(value) = value {
                command.env(key, value);
            }
        }

        let mut child = command.spawn()?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            if let Err(e) = child.kill() {
                log::warn!("Error killing inference helper: {e}");
            }
            return Err(std::io::Error::other("inference helper stdio is unavailable").into());
        };

        Ok(Self {
            child,
            channel: InferenceChannel::new(BufReader::new(stdout), stdin),
            work_dir: config.work_dir.clone(),
            next_file: AtomicU64::new(0),
        })
    }

    /// Get the channel to the helper.
    pub fn channel(&self) -> &InferenceChannel {
        &self.channel
    }
}

impl InferenceBackend for SidecarProcess {
    fn submit(&self, prompt: &InferencePrompt) -> Result<PendingInference, Error> {
        let file = self.next_file.fetch_add(1, Ordering::Relaxed);
        let mut request = InferenceRequest::new(
            &prompt.image,
            &prompt.points,
            self.work_dir.join(format!("mask_{file}.png")),
        );
        if prompt.want_depth {
            request = request.with_depth(self.work_dir.join(format!("depth_{file}.png")));
        }

        let response = self.channel.submit(request)?;
        Ok(PendingInference::from_response(response, decode_response))
    }
}

impl Drop for SidecarProcess {
    fn drop(&mut self) {
        log::debug!("Stopping inference helper");

        if let Err(e) = self.child.kill() {
            log::warn!("Error killing inference helper: {e}");
        }
        if let Err(e) = self.child.wait() {
            log::warn!("Error waiting for inference helper: {e}");
        }
    }
}

/// Read a mask image file as luma.
pub fn read_mask(path: impl AsRef<Path>) -> Result<MaskImage, Error> {
    let luma = ::image::open(path)?.to_luma8();
    let size = uvec2(luma.width(), luma.height());
    MaskImage::from_luma8(size, luma.as_raw())
}

/// Read a 16 bit depth image file, de-normalized by the metadata if present.
pub fn read_depth(
    path: impl AsRef<Path>,
    metadata: Option<&DepthMetadata>,
) -> Result<DepthImage, Error> {
    let luma = ::image::open(path)?.to_luma16();
    let size = uvec2(luma.width(), luma.height());
    DepthImage::from_u16(size, luma.as_raw(), metadata)
}

/// Load the images referenced by a successful response.
///
/// A depth image that fails to load is dropped with a warning.
pub fn decode_response(response: InferenceResponse) -> Result<InferenceOutput, Error> {
    let Some(out) = response.out.as_ref() else {
        return Err(Error::InferenceFailed {
            id: response.id.unwrap_or_default(),
            message: "response has no mask".to_string(),
        });
    };

    let mask = read_mask(out)?;
    if let (Some(w), Some(h)) = (response.w, response.h) {
        if uvec2(w, h) != mask.size() {
            log::warn!(
                "Inference mask size {} does not match reported size {w}x{h}",
                mask.size()
            );
        }
    }

    let depth = response.depth_out.as_ref().and_then(|path| {
        read_depth(path, response.depth_metadata().as_ref())
            .inspect_err(|e| log::warn!("Ignoring depth image {}: {e}", path.display()))
            .ok()
    });

    Ok(InferenceOutput { mask, depth })
}
