#![doc = include_str!("../README.md")]

pub mod error;
pub mod gmm;
pub mod graph;
pub mod image;
pub mod kmeans;
pub mod segmenter;
pub mod weights;

// High-level re-exports
pub use crate::error::{ClusteringError, ModelError, SegmentError};
pub use crate::gmm::{GaussianParams, MixtureParams, COMPONENT_COUNT};
pub use crate::image::{ImageRgbx8, MaskU8, MaskValue, PixelClass};
pub use crate::segmenter::{GrabCut, GrabCutParams, Rect, SeedMode, SegmentationResult};

/// Convenience imports for typical callers.
pub mod prelude {
    pub use crate::error::SegmentError;
    pub use crate::gmm::MixtureParams;
    pub use crate::image::{ImageRgbx8, MaskU8, MaskValue};
    pub use crate::segmenter::{GrabCut, GrabCutParams, Rect, SeedMode, SegmentationResult};
}
