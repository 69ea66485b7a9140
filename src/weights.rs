//! Contrast-sensitive neighbor weight field.
//!
//! Computed once per image: the inverse-contrast scale beta comes from the
//! mean squared color difference over the four directed neighbor pairs
//! (left, up-left, up, up-right), then every pixel stores the smoothness
//! weight toward those four neighbors. The grid solver mirrors each stored
//! weight onto the reverse edge, which covers all eight directions.

use crate::image::ImageRgbx8;
use rayon::prelude::*;
use std::f64::consts::SQRT_2;

/// Weights from a pixel toward its four lexicographically earlier
/// neighbors; 0 where the neighbor falls outside the image.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NeighborWeights {
    pub left: f64,
    pub up_left: f64,
    pub up: f64,
    pub up_right: f64,
}

/// Per-pixel smoothness weights for one image.
#[derive(Clone, Debug)]
pub struct WeightField {
    w: usize,
    h: usize,
    beta: f64,
    weights: Vec<NeighborWeights>,
}

impl WeightField {
    /// Build the field for `image` with smoothness strength `gamma`.
    pub fn compute(image: &ImageRgbx8, gamma: f64) -> WeightField {
        let (w, h) = (image.w, image.h);
        let beta = contrast_beta(image);
        let diag_gamma = gamma / SQRT_2;

        let mut weights = vec![NeighborWeights::default(); w * h];
        weights
            .par_chunks_mut(w)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    let c = image.color(x, y);
                    let edge = |nx: usize, ny: usize, g: f64| {
                        g * (-beta * (c - image.color(nx, ny)).norm_squared()).exp()
                    };
                    out.left = if x > 0 { edge(x - 1, y, gamma) } else { 0.0 };
                    out.up_left = if x > 0 && y > 0 {
                        edge(x - 1, y - 1, diag_gamma)
                    } else {
                        0.0
                    };
                    out.up = if y > 0 { edge(x, y - 1, gamma) } else { 0.0 };
                    out.up_right = if x + 1 < w && y > 0 {
                        edge(x + 1, y - 1, diag_gamma)
                    } else {
                        0.0
                    };
                }
            });

        WeightField { w, h, beta, weights }
    }

    /// Inverse-contrast scale used by the exponentials.
    pub fn beta(&self) -> f64 {
        self.beta
    }

    #[inline]
    pub fn at(&self, x: usize, y: usize) -> &NeighborWeights {
        &self.weights[y * self.w + x]
    }

    pub fn width(&self) -> usize {
        self.w
    }

    pub fn height(&self) -> usize {
        self.h
    }
}

/// beta = 1 / (2 * mean squared neighbor color difference); 0 for a
/// uniform image so all smoothness weights collapse to gamma.
pub(crate) fn contrast_beta(image: &ImageRgbx8) -> f64 {
    let (w, h) = (image.w, image.h);
    let total: f64 = (0..h)
        .into_par_iter()
        .map(|y| {
            let mut acc = 0.0;
            for x in 0..w {
                let c = image.color(x, y);
                if x > 0 {
                    acc += (c - image.color(x - 1, y)).norm_squared();
                }
                if x > 0 && y > 0 {
                    acc += (c - image.color(x - 1, y - 1)).norm_squared();
                }
                if y > 0 {
                    acc += (c - image.color(x, y - 1)).norm_squared();
                }
                if x + 1 < w && y > 0 {
                    acc += (c - image.color(x + 1, y - 1)).norm_squared();
                }
            }
            acc
        })
        .sum();

    let pairs = 4 * (w * h) as i64 - 3 * (w + h) as i64 + 2;
    if pairs <= 0 || total <= f64::EPSILON {
        return 0.0;
    }
    1.0 / (2.0 * total / pairs as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rgbx(pixels: &[[u8; 3]], w: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(pixels.len() * 4);
        for p in pixels {
            data.extend_from_slice(&[p[0], p[1], p[2], 0]);
        }
        assert_eq!(data.len() % (w * 4), 0);
        data
    }

    #[test]
    fn uniform_image_gets_flat_weights() {
        let w = 6;
        let h = 5;
        let data = rgbx(&vec![[80, 90, 100]; w * h], w);
        let image = ImageRgbx8 { w, h, stride: w * 4, data: &data };
        let field = WeightField::compute(&image, 50.0);
        assert_eq!(field.beta(), 0.0);
        let inner = field.at(3, 2);
        assert!((inner.left - 50.0).abs() < 1e-12);
        assert!((inner.up - 50.0).abs() < 1e-12);
        assert!((inner.up_left - 50.0 / SQRT_2).abs() < 1e-12);
        assert!((inner.up_right - 50.0 / SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn border_weights_are_zero() {
        let w = 4;
        let h = 3;
        let data = rgbx(&vec![[10, 10, 10]; w * h], w);
        let image = ImageRgbx8 { w, h, stride: w * 4, data: &data };
        let field = WeightField::compute(&image, 50.0);
        let corner = field.at(0, 0);
        assert_eq!(*corner, NeighborWeights::default());
        let right_edge = field.at(3, 1);
        assert_eq!(right_edge.up_right, 0.0);
        assert!(right_edge.left > 0.0);
    }

    #[test]
    fn beta_matches_hand_computation_on_two_pixels() {
        // single left pair: diff = (30, 0, 0), pairs = 4*2 - 3*3 + 2 = 1
        let data = rgbx(&[[10, 20, 30], [40, 20, 30]], 2);
        let image = ImageRgbx8 { w: 2, h: 1, stride: 8, data: &data };
        let beta = contrast_beta(&image);
        let d2 = 900.0;
        assert!((beta - 1.0 / (2.0 * d2)).abs() < 1e-12);

        let field = WeightField::compute(&image, 50.0);
        let expected = 50.0 * (-beta * d2).exp();
        assert!((field.at(1, 0).left - expected).abs() < 1e-12);
        assert_eq!(field.at(0, 0).left, 0.0);
    }

    #[test]
    fn single_pixel_image_has_no_pairs() {
        let data = rgbx(&[[1, 2, 3]], 1);
        let image = ImageRgbx8 { w: 1, h: 1, stride: 4, data: &data };
        assert_eq!(contrast_beta(&image), 0.0);
    }
}
