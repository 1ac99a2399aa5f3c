pub mod block_motion;
pub mod frame_diff;

#[cfg(feature = "backend-tract")]
pub mod tract;

pub use block_motion::BlockMotionSource;
pub use frame_diff::FrameDiffSource;

#[cfg(feature = "backend-tract")]
pub use tract::TractSource;
