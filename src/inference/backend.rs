use std::{path::PathBuf, time::Duration};

use glam::*;

use crate::{
    DepthImage, Error, MaskImage,
    inference::{InferenceResponse, PendingResponse},
};

/// The prompt of a selection run.
#[derive(Debug, Clone, PartialEq)]
pub struct InferencePrompt {
    /// The image the mask is inferred from.
    pub image: PathBuf,
    /// The prompt points, normalized with the origin at the top left.
    pub points: Vec<Vec2>,
    /// Whether a depth estimate is requested.
    pub want_depth: bool,
}

impl InferencePrompt {
    /// Create a new prompt.
    pub fn new(image: impl Into<PathBuf>, points: Vec<Vec2>) -> Self {
        Self {
            image: image.into(),
            points,
            want_depth: false,
        }
    }

    /// Set whether a depth estimate is requested.
    pub fn with_depth(mut self, want_depth: bool) -> Self {
        self.want_depth = want_depth;
        self
    }
}

/// The images returned by the inference process.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    /// The segmentation mask.
    pub mask: MaskImage,
    /// The depth estimate, if requested and produced.
    pub depth: Option<DepthImage>,
}

type Decode = Box<dyn FnOnce(InferenceResponse) -> Result<InferenceOutput, Error> + Send>;

enum PendingKind {
    Output(oneshot::Receiver<Result<InferenceOutput, Error>>),
    Response {
        response: PendingResponse,
        decode: Decode,
    },
}

/// An inference output that has not arrived yet.
pub struct PendingInference {
    id: u64,
    kind: PendingKind,
}

impl PendingInference {
    /// Create from a receiver of the decoded output.
    pub fn from_receiver(
        id: u64,
        receiver: oneshot::Receiver<Result<InferenceOutput, Error>>,
    ) -> Self {
        Self {
            id,
            kind: PendingKind::Output(receiver),
        }
    }

    /// Create from a pending protocol response, decoded by `decode` once it arrives.
    pub fn from_response(
        response: PendingResponse,
        decode: impl FnOnce(InferenceResponse) -> Result<InferenceOutput, Error> + Send + 'static,
    ) -> Self {
        Self {
            id: response.id(),
            kind: PendingKind::Response {
                response,
                decode: Box::new(decode),
            },
        }
    }

    /// Create an output that is already available.
    pub fn ready(id: u64, output: Result<InferenceOutput, Error>) -> Self {
        let (tx, rx) = oneshot::channel();
        if tx.send(output).is_err() {
            log::error!("Error sending ready inference output {id}");
        }
        Self::from_receiver(id, rx)
    }

    /// Get the request id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the output arrives or the timeout elapses.
    pub fn wait(self, timeout: Duration) -> Result<InferenceOutput, Error> {
        match self.kind {
            PendingKind::Output(receiver) => match receiver.recv_timeout(timeout) {
                Ok(result) => result,
                Err(oneshot::RecvTimeoutError::Timeout) => Err(Error::InferenceTimeout {
                    id: self.id,
                    timeout,
                }),
                Err(oneshot::RecvTimeoutError::Disconnected) => Err(Error::InferenceDisconnected),
            },
            PendingKind::Response { response, decode } => decode(response.wait(timeout)?),
        }
    }
}

impl std::fmt::Debug for PendingInference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingInference")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A source of masks and depth estimates.
pub trait InferenceBackend {
    /// Submit a prompt without blocking on the result.
    fn submit(&self, prompt: &InferencePrompt) -> Result<PendingInference, Error>;
}
