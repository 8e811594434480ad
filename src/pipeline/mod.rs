pub mod analyzer;
pub mod camera;
pub mod capture;
pub mod overlay;
pub mod rgb_converter;

// Re-exports for convenience
pub use analyzer::{OrtFaceAnalyzer, start_worker};
pub use camera::NokhwaCamera;
pub use capture::{LoopExit, run_session};
