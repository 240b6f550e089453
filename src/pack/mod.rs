//! The data pack (C2): a framed, authenticated sidecar file holding
//! per-frame region metadata and encrypted original pixels.

pub mod format;
mod reader;
mod writer;

pub use format::{PackHeader, Region, RegionSource};
pub use reader::{DataPackReader, FrameIter};
pub use writer::DataPackWriter;
