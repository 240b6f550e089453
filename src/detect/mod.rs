//! Detector capability (C9, detector half): a pluggable object-detection
//! backend yielding class-labelled bounding boxes per frame (external
//! interface, spec §6).

mod backend;
mod backends;
mod registry;

pub use backend::{DetectionBox, Detector};
pub use backends::StubDetector;
#[cfg(feature = "detect-tract")]
pub use backends::TractDetector;
pub use registry::DetectorRegistry;
