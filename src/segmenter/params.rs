//! Segmentation configuration.

use crate::kmeans::KmeansParams;

/// Tuning knobs of the iterative segmenter.
#[derive(Clone, Debug)]
pub struct GrabCutParams {
    /// Smoothness strength on axis-aligned neighbor links; diagonal links
    /// get `gamma / sqrt(2)` and hard labels are pinned with `9 * gamma`.
    pub gamma: f64,
    /// Clustering used to seed the color mixtures. The cluster count is
    /// forced to the mixture component count regardless of this value.
    pub kmeans: KmeansParams,
}

impl Default for GrabCutParams {
    fn default() -> Self {
        Self {
            gamma: 50.0,
            kmeans: KmeansParams::default(),
        }
    }
}

impl GrabCutParams {
    /// Terminal capacity pinning definite labels; dominates any sum of
    /// neighbor weights a pixel can accumulate.
    pub fn lambda(&self) -> f64 {
        9.0 * self.gamma
    }
}
