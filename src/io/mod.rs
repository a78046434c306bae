//! Recording and replay of tracking sessions.

pub mod recording;

pub use recording::{PngSequence, RecordingCamera, RecordingImu, ReplayImu};
