//! Iterative GrabCut controller.
//!
//! One `segment` call seeds (or reuses) the two color mixtures, computes
//! the contrast weight field once, then alternates component assignment,
//! mixture refit and a grid min-cut for the requested number of
//! iterations. Definite mask labels are never modified; probable labels
//! are rewritten from each cut.
//!
//! ```no_run
//! use grabcut::{GrabCut, GrabCutParams, ImageRgbx8, MaskU8, Rect};
//!
//! # fn run(pixels: &[u8], mask_buf: &mut [u8]) -> Result<(), grabcut::SegmentError> {
//! let image = ImageRgbx8 { w: 320, h: 240, stride: 320 * 4, data: pixels };
//! let mut mask = MaskU8 { w: 320, h: 240, stride: 320, data: mask_buf };
//! let mut engine = GrabCut::new(GrabCutParams::default());
//! let rect = Rect { x: 80, y: 60, width: 160, height: 120 };
//! let result = engine.segment_rect(image, &mut mask, rect, 5)?;
//! log::info!("flow {:.2} after {} iterations", result.max_flow, result.iterations_run);
//! # Ok(())
//! # }
//! ```

mod params;
mod workspace;

pub use params::GrabCutParams;

use crate::error::SegmentError;
use crate::gmm::{GaussianMixture, MixtureLearning, MixtureParams, COMPONENT_COUNT};
use crate::graph::{Dir, FlowStats};
use crate::image::{byte_is_foreground, byte_is_probable, ImageRgbx8, MaskU8, MaskValue, PixelClass};
use crate::kmeans::{self, KmeansResult};
use crate::weights::WeightField;
use workspace::SegmentWorkspace;

use log::debug;
use nalgebra::Vector3;
use rayon::prelude::*;
use serde::Serialize;
use std::time::Instant;

/// Axis-aligned seeding rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// How a `segment` call obtains its initial trimap and models.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedMode {
    /// Overwrite the mask: everything background, the rectangle probable
    /// foreground; train fresh models from the split.
    Rect(Rect),
    /// Trust the caller's trimap; train fresh models from it.
    Mask,
    /// Trust the caller's trimap and models; solve once, no refitting.
    Eval,
}

/// Outcome of one `segment` call.
#[derive(Clone, Debug, Serialize)]
pub struct SegmentationResult {
    /// Background mixture after the call; feed back to resume refinement.
    pub background: MixtureParams,
    /// Foreground mixture after the call.
    pub foreground: MixtureParams,
    /// Flow of the last solved cut; 0.0 when no cut was solved.
    pub max_flow: f64,
    /// Augmenting paths pushed across all solves of this call.
    pub augmentations: usize,
    /// Refinement iterations executed (0 in eval mode).
    pub iterations_run: usize,
    /// Wall-clock duration of the call.
    pub latency_ms: f64,
}

/// Segmentation engine holding tuning parameters and reusable buffers.
pub struct GrabCut {
    params: GrabCutParams,
    workspace: SegmentWorkspace,
}

impl GrabCut {
    pub fn new(params: GrabCutParams) -> Self {
        Self {
            params,
            workspace: SegmentWorkspace::default(),
        }
    }

    pub fn params(&self) -> &GrabCutParams {
        &self.params
    }

    /// Rectangle-seeded segmentation with freshly trained models.
    pub fn segment_rect(
        &mut self,
        image: ImageRgbx8,
        mask: &mut MaskU8,
        rect: Rect,
        iterations: usize,
    ) -> Result<SegmentationResult, SegmentError> {
        self.segment(
            image,
            mask,
            &MixtureParams::default(),
            &MixtureParams::default(),
            SeedMode::Rect(rect),
            iterations,
        )
    }

    /// Run segmentation in the given seeding mode.
    ///
    /// `background` and `foreground` are consulted only in `Eval` mode;
    /// the other modes train models from the (seeded) mask.
    pub fn segment(
        &mut self,
        image: ImageRgbx8,
        mask: &mut MaskU8,
        background: &MixtureParams,
        foreground: &MixtureParams,
        mode: SeedMode,
        iterations: usize,
    ) -> Result<SegmentationResult, SegmentError> {
        let start = Instant::now();
        if !self.params.gamma.is_finite() || self.params.gamma < 0.0 {
            return Err(SegmentError::BadParams {
                reason: "gamma must be finite and non-negative",
            });
        }
        image.validate()?;
        mask.validate_shape(image.w, image.h)?;
        debug!(
            "segment start: {}x{} mode={mode:?} iterations={iterations}",
            image.w, image.h
        );

        let (mut bg, mut fg) = match mode {
            SeedMode::Eval => {
                validate_mask_values(mask)?;
                let bg = GaussianMixture::from_params(background).map_err(|source| {
                    SegmentError::InvalidModel {
                        class: PixelClass::Background,
                        source,
                    }
                })?;
                let fg = GaussianMixture::from_params(foreground).map_err(|source| {
                    SegmentError::InvalidModel {
                        class: PixelClass::Foreground,
                        source,
                    }
                })?;
                (bg, fg)
            }
            SeedMode::Rect(rect) => {
                seed_rect(mask, rect)?;
                self.seed_models(&image, mask)?
            }
            SeedMode::Mask => {
                validate_mask_values(mask)?;
                self.seed_models(&image, mask)?
            }
        };

        self.workspace.prepare(image.w, image.h);

        let mut max_flow = 0.0;
        let mut augmentations = 0usize;
        let mut iterations_run = 0usize;

        if mode == SeedMode::Eval {
            let field = WeightField::compute(&image, self.params.gamma);
            let stats = self.solve_cut(&image, mask, &bg, &fg, &field);
            max_flow = stats.flow;
            augmentations = stats.augmentations;
        } else if iterations > 0 {
            let field = WeightField::compute(&image, self.params.gamma);
            for iteration in 0..iterations {
                self.assign_components(&image, mask, &bg, &fg);
                let (bg_learning, fg_learning) = self.accumulate_statistics(&image, mask);
                bg.update(&bg_learning);
                fg.update(&fg_learning);
                let stats = self.solve_cut(&image, mask, &bg, &fg, &field);
                debug!(
                    "iteration {iteration}: flow={:.4} augmentations={}",
                    stats.flow, stats.augmentations
                );
                max_flow = stats.flow;
                augmentations += stats.augmentations;
                iterations_run += 1;
            }
        }

        let latency_ms = start.elapsed().as_secs_f64() * 1e3;
        debug!("segment done: flow={max_flow:.4} in {latency_ms:.2} ms");
        Ok(SegmentationResult {
            background: bg.to_params(),
            foreground: fg.to_params(),
            max_flow,
            augmentations,
            iterations_run,
            latency_ms,
        })
    }

    /// Train both mixtures from the current trimap split.
    fn seed_models(
        &self,
        image: &ImageRgbx8,
        mask: &MaskU8,
    ) -> Result<(GaussianMixture, GaussianMixture), SegmentError> {
        let mut bg_samples: Vec<Vector3<f64>> = Vec::new();
        let mut fg_samples: Vec<Vector3<f64>> = Vec::new();
        for y in 0..image.h {
            let row = &mask.as_bytes()[y * mask.stride..y * mask.stride + mask.w];
            for (x, &m) in row.iter().enumerate() {
                if byte_is_foreground(m) {
                    fg_samples.push(image.color(x, y));
                } else {
                    bg_samples.push(image.color(x, y));
                }
            }
        }
        for (class, count) in [
            (PixelClass::Background, bg_samples.len()),
            (PixelClass::Foreground, fg_samples.len()),
        ] {
            if count < COMPONENT_COUNT {
                return Err(SegmentError::InsufficientSamples {
                    class,
                    found: count,
                    minimum: COMPONENT_COUNT,
                });
            }
        }

        let mut bg_config = self.params.kmeans.clone();
        bg_config.clusters = COMPONENT_COUNT;
        let mut fg_config = bg_config.clone();
        fg_config.seed = bg_config.seed.wrapping_add(1);

        let (bg_clusters, fg_clusters) = rayon::join(
            || kmeans::kmeans(&bg_samples, &bg_config),
            || kmeans::kmeans(&fg_samples, &fg_config),
        );
        let bg_clusters = bg_clusters.map_err(|source| SegmentError::Clustering {
            class: PixelClass::Background,
            source,
        })?;
        let fg_clusters = fg_clusters.map_err(|source| SegmentError::Clustering {
            class: PixelClass::Foreground,
            source,
        })?;
        debug!(
            "seeded models: bg {} samples distortion={:.1}, fg {} samples distortion={:.1}",
            bg_samples.len(),
            bg_clusters.distortion,
            fg_samples.len(),
            fg_clusters.distortion
        );
        Ok((
            mixture_from_clusters(&bg_samples, &bg_clusters),
            mixture_from_clusters(&fg_samples, &fg_clusters),
        ))
    }

    /// Assign every pixel to the most likely component of its class model.
    fn assign_components(
        &mut self,
        image: &ImageRgbx8,
        mask: &MaskU8,
        bg: &GaussianMixture,
        fg: &GaussianMixture,
    ) {
        let w = image.w;
        let mask_bytes = mask.as_bytes();
        let mask_stride = mask.stride;
        let image = *image;
        self.workspace
            .component
            .par_chunks_mut(w)
            .enumerate()
            .for_each(|(y, row)| {
                let mrow = &mask_bytes[y * mask_stride..y * mask_stride + w];
                for (x, out) in row.iter_mut().enumerate() {
                    let color = image.color(x, y);
                    let mixture = if byte_is_foreground(mrow[x]) { fg } else { bg };
                    *out = mixture.which_component(&color) as u8;
                }
            });
    }

    /// Collect per-class sufficient statistics from the assignment.
    fn accumulate_statistics(
        &self,
        image: &ImageRgbx8,
        mask: &MaskU8,
    ) -> (MixtureLearning, MixtureLearning) {
        let mut bg_learning = MixtureLearning::default();
        let mut fg_learning = MixtureLearning::default();
        for y in 0..image.h {
            let mrow = &mask.as_bytes()[y * mask.stride..y * mask.stride + mask.w];
            let crow = &self.workspace.component[y * image.w..(y + 1) * image.w];
            for (x, (&m, &c)) in mrow.iter().zip(crow).enumerate() {
                let color = image.color(x, y);
                if byte_is_foreground(m) {
                    fg_learning.add(c as usize, color);
                } else {
                    bg_learning.add(c as usize, color);
                }
            }
        }
        (bg_learning, fg_learning)
    }

    /// Fill the graph from the current models and solve one min-cut,
    /// rewriting probable mask labels from the partition.
    fn solve_cut(
        &mut self,
        image: &ImageRgbx8,
        mask: &mut MaskU8,
        bg: &GaussianMixture,
        fg: &GaussianMixture,
        field: &WeightField,
    ) -> FlowStats {
        let (w, h) = (image.w, image.h);
        let lambda = self.params.lambda();
        let workspace = &mut self.workspace;

        {
            let mask_bytes: &[u8] = &*mask.data;
            let mask_stride = mask.stride;
            let image = *image;
            workspace
                .cap_source
                .par_chunks_mut(w)
                .zip(workspace.cap_sink.par_chunks_mut(w))
                .enumerate()
                .for_each(|(y, (source_row, sink_row))| {
                    let mrow = &mask_bytes[y * mask_stride..y * mask_stride + w];
                    for x in 0..w {
                        if byte_is_probable(mrow[x]) {
                            let color = image.color(x, y);
                            source_row[x] = data_cost(bg.likelihood(&color));
                            sink_row[x] = data_cost(fg.likelihood(&color));
                        } else if byte_is_foreground(mrow[x]) {
                            source_row[x] = lambda;
                            sink_row[x] = 0.0;
                        } else {
                            source_row[x] = 0.0;
                            sink_row[x] = lambda;
                        }
                    }
                });
        }

        workspace.ensure_graph(w, h);
        let graph = workspace.graph.as_mut().expect("graph sized above");
        let cap_source = &workspace.cap_source;
        let cap_sink = &workspace.cap_sink;
        graph.reset();
        for y in 0..h {
            for x in 0..w {
                let v = graph.node_id(x, y);
                let i = y * w + x;
                graph.set_terminal_cap(v, cap_source[i], cap_sink[i]);
                let nw = field.at(x, y);
                if x > 0 {
                    graph.set_edge_weights(v, Dir::Left, nw.left, nw.left);
                }
                if x > 0 && y > 0 {
                    graph.set_edge_weights(v, Dir::UpLeft, nw.up_left, nw.up_left);
                }
                if y > 0 {
                    graph.set_edge_weights(v, Dir::Up, nw.up, nw.up);
                }
                if x + 1 < w && y > 0 {
                    graph.set_edge_weights(v, Dir::UpRight, nw.up_right, nw.up_right);
                }
            }
        }

        let stats = graph.compute_maxflow();

        for y in 0..h {
            for x in 0..w {
                let m = mask.get(x, y);
                if byte_is_probable(m) {
                    let v = graph.node_id(x, y);
                    let value = if graph.in_source_segment(v) {
                        MaskValue::ProbableForeground
                    } else {
                        MaskValue::ProbableBackground
                    };
                    mask.set(x, y, value);
                }
            }
        }
        stats
    }
}

/// Negative log likelihood, floored so terminal capacities stay finite
/// even when a color underflows both models.
#[inline]
fn data_cost(likelihood: f64) -> f64 {
    -likelihood.max(f64::MIN_POSITIVE).ln()
}

/// Whole mask to background, the clamped rectangle to probable foreground.
fn seed_rect(mask: &mut MaskU8, rect: Rect) -> Result<(), SegmentError> {
    let x0 = rect.x.min(mask.w);
    let y0 = rect.y.min(mask.h);
    let x1 = rect.x.saturating_add(rect.width).min(mask.w);
    let y1 = rect.y.saturating_add(rect.height).min(mask.h);
    if x0 >= x1 || y0 >= y1 {
        return Err(SegmentError::EmptyRect);
    }
    for y in 0..mask.h {
        let row = &mut mask.data[y * mask.stride..y * mask.stride + mask.w];
        row.fill(MaskValue::Background as u8);
        if y >= y0 && y < y1 {
            row[x0..x1].fill(MaskValue::ProbableForeground as u8);
        }
    }
    Ok(())
}

fn validate_mask_values(mask: &MaskU8) -> Result<(), SegmentError> {
    for y in 0..mask.h {
        let row = &mask.as_bytes()[y * mask.stride..y * mask.stride + mask.w];
        for (x, &value) in row.iter().enumerate() {
            if MaskValue::from_u8(value).is_none() {
                return Err(SegmentError::InvalidMaskValue { x, y, value });
            }
        }
    }
    Ok(())
}

/// Fit a mixture from a finished clustering of one class.
fn mixture_from_clusters(samples: &[Vector3<f64>], clusters: &KmeansResult) -> GaussianMixture {
    let mut learning = MixtureLearning::default();
    for (sample, &label) in samples.iter().zip(&clusters.labels) {
        learning.add(label as usize, *sample);
    }
    let mut mixture = GaussianMixture::default();
    mixture.update(&learning);
    mixture
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_seeding_writes_background_and_probable_foreground() {
        let mut buf = vec![9u8; 5 * 4];
        let mut mask = MaskU8 {
            w: 5,
            h: 4,
            stride: 5,
            data: &mut buf,
        };
        seed_rect(
            &mut mask,
            Rect {
                x: 1,
                y: 1,
                width: 2,
                height: 2,
            },
        )
        .unwrap();
        for y in 0..4 {
            for x in 0..5 {
                let expected = if (1..3).contains(&x) && (1..3).contains(&y) {
                    MaskValue::ProbableForeground as u8
                } else {
                    MaskValue::Background as u8
                };
                assert_eq!(mask.get(x, y), expected, "at ({x}, {y})");
            }
        }
    }

    #[test]
    fn rect_outside_image_is_rejected() {
        let mut buf = vec![0u8; 16];
        let mut mask = MaskU8 {
            w: 4,
            h: 4,
            stride: 4,
            data: &mut buf,
        };
        let result = seed_rect(
            &mut mask,
            Rect {
                x: 10,
                y: 10,
                width: 3,
                height: 3,
            },
        );
        assert_eq!(result, Err(SegmentError::EmptyRect));
    }

    #[test]
    fn oversized_rect_is_clamped() {
        let mut buf = vec![0u8; 9];
        let mut mask = MaskU8 {
            w: 3,
            h: 3,
            stride: 3,
            data: &mut buf,
        };
        seed_rect(
            &mut mask,
            Rect {
                x: 1,
                y: 0,
                width: 100,
                height: 100,
            },
        )
        .unwrap();
        assert_eq!(mask.get(0, 0), MaskValue::Background as u8);
        assert_eq!(mask.get(2, 2), MaskValue::ProbableForeground as u8);
    }

    #[test]
    fn mask_validation_reports_coordinates() {
        let mut buf = vec![0u8; 6];
        buf[4] = 7;
        let mask = MaskU8 {
            w: 3,
            h: 2,
            stride: 3,
            data: &mut buf,
        };
        assert_eq!(
            validate_mask_values(&mask),
            Err(SegmentError::InvalidMaskValue { x: 1, y: 1, value: 7 })
        );
    }

    #[test]
    fn data_cost_is_finite_for_degenerate_likelihoods() {
        assert!(data_cost(0.0).is_finite());
        assert!(data_cost(f64::MIN_POSITIVE).is_finite());
        assert!(data_cost(1.0).abs() < 1e-12);
        assert!(data_cost(0.0) > data_cost(1e-10));
    }
}
