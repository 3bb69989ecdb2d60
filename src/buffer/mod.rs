mod projected;
mod readback;
mod selection;

pub use projected::*;
pub use readback::*;
pub use selection::*;
