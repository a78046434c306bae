//! Live preview, enabled with the `viz` feature.

mod rerun;

pub use self::rerun::{PreviewHandle, RerunPreview};
