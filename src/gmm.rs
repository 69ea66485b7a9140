//! Gaussian mixture color models.
//!
//! Each pixel class (foreground, background) is modeled by a fixed-size
//! mixture of full-covariance Gaussians over R^3. Parameters travel between
//! calls as plain serializable blocks; the working representation caches
//! the covariance inverse and determinant, refreshed synchronously on every
//! parameter change.

use crate::error::ModelError;
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Number of mixture components per pixel class.
pub const COMPONENT_COUNT: usize = 5;

/// Determinant threshold below which a covariance counts as singular.
const SINGULAR_DET: f64 = 1e-7;

/// Diagonal noise added to regularize a singular covariance.
const NOISE_VARIANCE: f64 = 0.01;

/// One component of a serializable mixture block.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianParams {
    /// Mixing coefficient, >= 0; trained components sum to 1.
    pub weight: f64,
    pub mean: Vector3<f64>,
    pub covariance: Matrix3<f64>,
}

impl Default for GaussianParams {
    fn default() -> Self {
        Self {
            weight: 0.0,
            mean: Vector3::zeros(),
            covariance: Matrix3::zeros(),
        }
    }
}

/// Serializable parameters of one pixel-class mixture.
///
/// A default block (all weights zero) represents an untrained model.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MixtureParams {
    pub components: [GaussianParams; COMPONENT_COUNT],
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Gaussian {
    weight: f64,
    mean: Vector3<f64>,
    covariance: Matrix3<f64>,
    inv_covariance: Matrix3<f64>,
    det: f64,
}

impl Gaussian {
    /// Coefficient-free density; 0 for a component carrying no weight.
    fn density(&self, color: &Vector3<f64>) -> f64 {
        if self.weight <= 0.0 {
            return 0.0;
        }
        let d = color - self.mean;
        let mahalanobis = d.dot(&(self.inv_covariance * d));
        (-0.5 * mahalanobis).exp() / self.det.sqrt()
    }

    /// Install new moments, regularizing a singular covariance in place.
    fn set_moments(&mut self, weight: f64, mean: Vector3<f64>, covariance: Matrix3<f64>) {
        let mut cov = covariance;
        let mut det = cov.determinant();
        if det <= SINGULAR_DET {
            for i in 0..3 {
                cov[(i, i)] += NOISE_VARIANCE;
            }
            det = cov.determinant();
        }
        match cov.try_inverse() {
            Some(inv) => {
                self.weight = weight;
                self.mean = mean;
                self.covariance = cov;
                self.inv_covariance = inv;
                self.det = det;
            }
            None => {
                // unusable moments: drop the component from evaluation
                self.weight = 0.0;
            }
        }
    }
}

/// Working mixture with cached inverses.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GaussianMixture {
    components: [Gaussian; COMPONENT_COUNT],
}

impl GaussianMixture {
    /// Rebuild a working mixture from a parameter block.
    ///
    /// Components with zero weight stay untrained. Non-finite entries and
    /// negative weights are rejected; singular covariances are regularized.
    pub fn from_params(params: &MixtureParams) -> Result<GaussianMixture, ModelError> {
        let mut mixture = GaussianMixture::default();
        for (i, p) in params.components.iter().enumerate() {
            if !p.weight.is_finite()
                || p.mean.iter().any(|v| !v.is_finite())
                || p.covariance.iter().any(|v| !v.is_finite())
            {
                return Err(ModelError::NonFiniteParameter { component: i });
            }
            if p.weight < 0.0 {
                return Err(ModelError::NegativeWeight { component: i });
            }
            if p.weight > 0.0 {
                mixture.components[i].set_moments(p.weight, p.mean, p.covariance);
            }
        }
        Ok(mixture)
    }

    /// Export the serializable block, including regularization applied on
    /// the way in.
    pub fn to_params(&self) -> MixtureParams {
        let mut params = MixtureParams::default();
        for (p, g) in params.components.iter_mut().zip(&self.components) {
            p.weight = g.weight;
            p.mean = g.mean;
            p.covariance = g.covariance;
        }
        params
    }

    /// Weighted mixture likelihood of a color; 0 when nothing is trained.
    pub fn likelihood(&self, color: &Vector3<f64>) -> f64 {
        self.components
            .iter()
            .map(|g| g.weight * g.density(color))
            .sum()
    }

    /// Index of the component with the highest density, ties to the lowest.
    pub fn which_component(&self, color: &Vector3<f64>) -> usize {
        let mut best = 0usize;
        let mut best_density = 0.0f64;
        for (i, g) in self.components.iter().enumerate() {
            let d = g.density(color);
            if d > best_density {
                best_density = d;
                best = i;
            }
        }
        best
    }

    /// Refit components that received samples; others keep their previous
    /// parameters, including their coefficient.
    pub fn update(&mut self, learning: &MixtureLearning) {
        if learning.total == 0 {
            return;
        }
        let total = learning.total as f64;
        for (g, acc) in self.components.iter_mut().zip(&learning.components) {
            if acc.samples == 0 {
                continue;
            }
            let n = acc.samples as f64;
            let weight = n / total;
            let mean = acc.sum / n;
            let covariance = acc.outer / n - mean * mean.transpose();
            g.set_moments(weight, mean, covariance);
        }
    }
}

/// Sufficient statistics of one component.
#[derive(Clone, Copy, Debug, Default)]
struct Accumulator {
    sum: Vector3<f64>,
    outer: Matrix3<f64>,
    samples: usize,
}

/// Per-component sufficient statistics collected over one assignment pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct MixtureLearning {
    components: [Accumulator; COMPONENT_COUNT],
    total: usize,
}

impl MixtureLearning {
    /// Account one color sample to `component`.
    #[inline]
    pub fn add(&mut self, component: usize, color: Vector3<f64>) {
        let acc = &mut self.components[component];
        acc.sum += color;
        acc.outer += color * color.transpose();
        acc.samples += 1;
        self.total += 1;
    }

    /// Total number of samples across components.
    pub fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spread_samples(center: Vector3<f64>, count: usize) -> Vec<Vector3<f64>> {
        (0..count)
            .map(|i| {
                let t = i as f64;
                center + Vector3::new((t * 0.9).sin() * 6.0, (t * 1.3).cos() * 6.0, t % 5.0)
            })
            .collect()
    }

    fn fit(groups: &[(usize, Vec<Vector3<f64>>)]) -> GaussianMixture {
        let mut learning = MixtureLearning::default();
        for (component, samples) in groups {
            for s in samples {
                learning.add(*component, *s);
            }
        }
        let mut mixture = GaussianMixture::default();
        mixture.update(&learning);
        mixture
    }

    #[test]
    fn trained_coefficients_sum_to_one() {
        let mixture = fit(&[
            (0, spread_samples(Vector3::new(20.0, 30.0, 40.0), 30)),
            (2, spread_samples(Vector3::new(200.0, 180.0, 160.0), 20)),
        ]);
        let sum: f64 = mixture.to_params().components.iter().map(|c| c.weight).sum();
        assert!((sum - 1.0).abs() < 1e-12, "weights sum to {sum}");
    }

    #[test]
    fn untouched_components_keep_previous_parameters() {
        let mut mixture = fit(&[
            (0, spread_samples(Vector3::new(20.0, 30.0, 40.0), 30)),
            (1, spread_samples(Vector3::new(120.0, 90.0, 60.0), 30)),
        ]);
        let before = mixture.to_params();

        // second round only feeds component 0
        let mut learning = MixtureLearning::default();
        for s in spread_samples(Vector3::new(25.0, 28.0, 44.0), 40) {
            learning.add(0, s);
        }
        mixture.update(&learning);
        let after = mixture.to_params();
        assert_eq!(after.components[1], before.components[1]);
        assert!((after.components[0].weight - 1.0).abs() < 1e-12);
    }

    #[test]
    fn singular_covariance_is_regularized() {
        // identical samples give a zero covariance
        let mixture = fit(&[(0, vec![Vector3::new(50.0, 60.0, 70.0); 12])]);
        let p = mixture.to_params().components[0];
        assert!(p.covariance[(0, 0)] > 0.0);
        let likelihood = mixture.likelihood(&Vector3::new(50.0, 60.0, 70.0));
        assert!(likelihood.is_finite() && likelihood > 0.0);
    }

    #[test]
    fn untrained_mixture_scores_zero() {
        let mixture = GaussianMixture::from_params(&MixtureParams::default()).unwrap();
        assert_eq!(mixture.likelihood(&Vector3::new(1.0, 2.0, 3.0)), 0.0);
        assert_eq!(mixture.which_component(&Vector3::new(1.0, 2.0, 3.0)), 0);
    }

    #[test]
    fn which_component_picks_nearest_mode() {
        let near = Vector3::new(10.0, 10.0, 10.0);
        let far = Vector3::new(240.0, 240.0, 240.0);
        let mixture = fit(&[(1, spread_samples(near, 25)), (3, spread_samples(far, 25))]);
        assert_eq!(mixture.which_component(&near), 1);
        assert_eq!(mixture.which_component(&far), 3);
    }

    #[test]
    fn round_trip_preserves_trained_parameters() {
        let mixture = fit(&[
            (0, spread_samples(Vector3::new(20.0, 30.0, 40.0), 30)),
            (4, spread_samples(Vector3::new(220.0, 10.0, 90.0), 30)),
        ]);
        let params = mixture.to_params();
        let rebuilt = GaussianMixture::from_params(&params).unwrap();
        assert_eq!(rebuilt.to_params(), params);
    }

    #[test]
    fn rejects_non_finite_and_negative_parameters() {
        let mut params = MixtureParams::default();
        params.components[2].weight = f64::NAN;
        assert_eq!(
            GaussianMixture::from_params(&params),
            Err(ModelError::NonFiniteParameter { component: 2 })
        );
        let mut params = MixtureParams::default();
        params.components[1].weight = -0.5;
        assert_eq!(
            GaussianMixture::from_params(&params),
            Err(ModelError::NegativeWeight { component: 1 })
        );
    }
}
