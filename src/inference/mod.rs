//! The external segmentation and depth inference process.

mod backend;
mod channel;
mod protocol;
mod sidecar;

pub use backend::*;
pub use channel::*;
pub use protocol::*;
pub use sidecar::*;
