pub mod stub;

#[cfg(feature = "detect-tract")]
pub mod tract;

pub use stub::StubDetector;

#[cfg(feature = "detect-tract")]
pub use tract::TractDetector;
