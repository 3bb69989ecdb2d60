//! Depth-gated mask selection for 3D Gaussian splats.
//!
//! A selection run takes a segmentation mask and an optional monocular depth estimate from an
//! external inference process, aggregates the renderer's own depth under the mask, calibrates the
//! external depth against it, and decides per splat whether it joins the selection.
//!
//! The usual entry point is [`SelectionSession`], which owns the persisted calibration and the
//! [`SharedSelection`] bitset across runs.

mod aggregate;
mod band;
mod calibration;
mod camera;
mod error;
mod gate;
mod morphology;
mod probe;
mod raster;
mod selection;
mod session;
mod splat;

pub mod buffer;
pub mod inference;

pub use aggregate::*;
pub use band::*;
pub use calibration::*;
pub use camera::*;
pub use error::*;
pub use gate::*;
pub use morphology::*;
pub use probe::*;
pub use raster::*;
pub use selection::*;
pub use session::*;
pub use splat::*;

pub use glam;
