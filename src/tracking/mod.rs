//! Optical tracking: blob detection with ROI search windows and stereo
//! triangulation into the world frame.
//!
//! - `image_ops`, `contours`: pixel-level building blocks over `image` buffers
//! - `detector`: per-camera blob search and ROI update
//! - `triangulation`: undistortion + DLT + camera-0 to world transform
//! - `tracked_object`: optical state owned by the optical loop

pub mod contours;
pub mod detector;
pub mod image_ops;
pub mod roi;
pub mod state;
pub mod tracked_object;
pub mod triangulation;

pub use detector::{BlobDetector, DetectorConfig};
pub use roi::Roi;
pub use state::TrackingState;
pub use tracked_object::{HsvColorRange, PerCameraData, TrackedObject};
pub use triangulation::{StereoFix, StereoGeometry, TriangulationError};
