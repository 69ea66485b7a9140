//! Error types for clustering, model handling and segmentation.

use crate::image::PixelClass;

/// Reasons why a k-means run cannot be performed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusteringError {
    ZeroClusters,
    InsufficientSamples { found: usize, minimum: usize },
}

impl std::fmt::Display for ClusteringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusteringError::ZeroClusters => write!(f, "cluster count must be at least 1"),
            ClusteringError::InsufficientSamples { found, minimum } => {
                write!(f, "insufficient samples ({found} < {minimum})")
            }
        }
    }
}

impl std::error::Error for ClusteringError {}

/// Reasons why a mixture parameter block is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelError {
    NonFiniteParameter { component: usize },
    NegativeWeight { component: usize },
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelError::NonFiniteParameter { component } => {
                write!(f, "component {component} has a non-finite parameter")
            }
            ModelError::NegativeWeight { component } => {
                write!(f, "component {component} has a negative weight")
            }
        }
    }
}

impl std::error::Error for ModelError {}

/// Failures surfaced by the segmentation entry points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SegmentError {
    /// Image view fails basic shape validation.
    BadImage { reason: &'static str },
    /// Configuration value fails validation.
    BadParams { reason: &'static str },
    /// Mask view does not cover the image.
    MaskShapeMismatch { reason: &'static str },
    /// Mask byte outside the trimap range 0..=3.
    InvalidMaskValue { x: usize, y: usize, value: u8 },
    /// Seeding rectangle does not intersect the image.
    EmptyRect,
    /// Too few pixels of one class to fit a mixture.
    InsufficientSamples {
        class: PixelClass,
        found: usize,
        minimum: usize,
    },
    /// Per-class k-means failed.
    Clustering {
        class: PixelClass,
        source: ClusteringError,
    },
    /// Supplied mixture parameters are unusable.
    InvalidModel {
        class: PixelClass,
        source: ModelError,
    },
}

impl std::fmt::Display for SegmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentError::BadImage { reason } => write!(f, "bad image: {reason}"),
            SegmentError::BadParams { reason } => write!(f, "bad parameters: {reason}"),
            SegmentError::MaskShapeMismatch { reason } => {
                write!(f, "mask shape mismatch: {reason}")
            }
            SegmentError::InvalidMaskValue { x, y, value } => {
                write!(f, "invalid mask value {value} at ({x}, {y})")
            }
            SegmentError::EmptyRect => write!(f, "seeding rectangle is empty"),
            SegmentError::InsufficientSamples {
                class,
                found,
                minimum,
            } => write!(f, "{class:?}: insufficient samples ({found} < {minimum})"),
            SegmentError::Clustering { class, source } => {
                write!(f, "{class:?} clustering failed: {source}")
            }
            SegmentError::InvalidModel { class, source } => {
                write!(f, "{class:?} model rejected: {source}")
            }
        }
    }
}

impl std::error::Error for SegmentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SegmentError::Clustering { source, .. } => Some(source),
            SegmentError::InvalidModel { source, .. } => Some(source),
            _ => None,
        }
    }
}
