//! Lloyd k-means over 3-D color samples.
//!
//! Seeding is either k-means++ (a few candidate draws per center, keep the
//! one that lowers the running potential most) or uniform draws from the
//! sample bounding box extended by a margin. The iteration keeps
//! Hammerly-style upper/lower distance bounds per sample so stable points
//! skip the full center scan. Empty clusters are repaired by stealing the
//! farthest member of the largest cluster before centers are recomputed.

use crate::error::ClusteringError;
use log::debug;
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Center shift below which the iteration is considered converged.
const SHIFT_EPS: f64 = 1e-6;

/// Bounding-box margin for random center seeding, per side.
const BOX_MARGIN: f64 = 1.0 / 3.0;

/// How initial centers are chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitMethod {
    /// Uniform draws from the extended sample bounding box.
    RandomInBox,
    /// k-means++ with `trials` candidate draws per center.
    PlusPlus { trials: usize },
}

/// Clustering configuration.
#[derive(Clone, Debug)]
pub struct KmeansParams {
    /// Number of clusters K.
    pub clusters: usize,
    /// Hard cap on Lloyd iterations per attempt.
    pub max_iterations: usize,
    /// Independent seeded runs; the lowest-distortion labeling wins.
    pub attempts: usize,
    /// Center seeding strategy.
    pub init: InitMethod,
    /// RNG seed; every run with the same inputs is reproducible.
    pub seed: u64,
}

impl Default for KmeansParams {
    fn default() -> Self {
        Self {
            clusters: 5,
            max_iterations: 10,
            attempts: 1,
            init: InitMethod::PlusPlus { trials: 3 },
            seed: 0x1234_5678,
        }
    }
}

/// Output of one clustering call.
#[derive(Clone, Debug, PartialEq)]
pub struct KmeansResult {
    /// Cluster index per sample.
    pub labels: Vec<u32>,
    /// Final centers, `clusters` entries.
    pub centroids: Vec<Vector3<f64>>,
    /// Sum of squared distances to assigned centers.
    pub distortion: f64,
}

/// Cluster `samples` into `params.clusters` groups.
pub fn kmeans(
    samples: &[Vector3<f64>],
    params: &KmeansParams,
) -> Result<KmeansResult, ClusteringError> {
    if params.clusters == 0 {
        return Err(ClusteringError::ZeroClusters);
    }
    if samples.len() < params.clusters {
        return Err(ClusteringError::InsufficientSamples {
            found: samples.len(),
            minimum: params.clusters,
        });
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best = run_once(samples, params, &mut rng);
    debug!(
        "kmeans attempt 0: distortion={:.3} over {} samples",
        best.distortion,
        samples.len()
    );
    for attempt in 1..params.attempts {
        let candidate = run_once(samples, params, &mut rng);
        debug!(
            "kmeans attempt {attempt}: distortion={:.3}",
            candidate.distortion
        );
        if candidate.distortion < best.distortion {
            best = candidate;
        }
    }
    Ok(best)
}

fn run_once(samples: &[Vector3<f64>], params: &KmeansParams, rng: &mut StdRng) -> KmeansResult {
    let (labels, centroids) = lloyd(samples, params, rng);
    let distortion = samples
        .par_iter()
        .zip(&labels)
        .map(|(p, &l)| (p - centroids[l as usize]).norm_squared())
        .sum();
    KmeansResult {
        labels,
        centroids,
        distortion,
    }
}

fn lloyd(
    samples: &[Vector3<f64>],
    params: &KmeansParams,
    rng: &mut StdRng,
) -> (Vec<u32>, Vec<Vector3<f64>>) {
    let n = samples.len();
    let k = params.clusters;
    let mut centroids = match params.init {
        InitMethod::RandomInBox => random_in_box_centers(samples, k, rng),
        InitMethod::PlusPlus { trials } => plus_plus_centers(samples, k, trials.max(1), rng),
    };

    let mut labels = vec![0u32; n];
    let mut upper = vec![0f64; n];
    labels
        .par_iter_mut()
        .zip(upper.par_iter_mut())
        .zip(samples.par_iter())
        .for_each(|((label, up), p)| {
            let (idx, d2) = nearest(&centroids, p);
            *label = idx as u32;
            *up = d2.sqrt();
        });
    let mut lower = vec![0f64; n];

    let mut sums = vec![Vector3::zeros(); k];
    let mut counts = vec![0usize; k];
    let mut shifts = vec![0f64; k];
    let mut half_sep = vec![0f64; k];
    let max_iterations = params.max_iterations.max(1);

    let mut iter = 0;
    loop {
        for s in sums.iter_mut() {
            *s = Vector3::zeros();
        }
        counts.fill(0);
        for (p, &l) in samples.iter().zip(&labels) {
            sums[l as usize] += p;
            counts[l as usize] += 1;
        }

        let mut max_shift = 0.0f64;
        let mut second_shift = 0.0f64;
        let mut max_shift_cluster = 0usize;
        for c in 0..k {
            if counts[c] == 0 {
                repair_empty_cluster(
                    samples,
                    &centroids,
                    &mut labels,
                    &mut upper,
                    &mut lower,
                    &mut sums,
                    &mut counts,
                    c,
                );
            }
            let updated = sums[c] / counts[c] as f64;
            let shift = (centroids[c] - updated).norm();
            if shift > max_shift {
                second_shift = max_shift;
                max_shift = shift;
                max_shift_cluster = c;
            } else if shift > second_shift {
                second_shift = shift;
            }
            shifts[c] = shift;
            centroids[c] = updated;
        }

        iter += 1;
        if iter == max_iterations || max_shift <= SHIFT_EPS {
            break;
        }

        for c in 0..k {
            let mut min_d2 = f64::INFINITY;
            for o in 0..k {
                if o != c {
                    min_d2 = min_d2.min((centroids[c] - centroids[o]).norm_squared());
                }
            }
            half_sep[c] = if min_d2.is_finite() {
                0.5 * min_d2.sqrt()
            } else {
                f64::INFINITY
            };
        }

        let centroids_ref = &centroids;
        let shifts_ref = &shifts;
        let half_sep_ref = &half_sep;
        labels
            .par_iter_mut()
            .zip(upper.par_iter_mut())
            .zip(lower.par_iter_mut())
            .zip(samples.par_iter())
            .for_each(|(((label, up), lo), p)| {
                let current = *label as usize;
                *up += shifts_ref[current];
                *lo -= if current == max_shift_cluster {
                    second_shift
                } else {
                    max_shift
                };
                let bound = half_sep_ref[current].max(*lo);
                if *up <= bound {
                    return;
                }
                let mut best_d2 = (p - centroids_ref[current]).norm_squared();
                *up = best_d2.sqrt();
                if *up <= bound {
                    return;
                }
                let mut best = current;
                let mut runner_up_d2 = f64::INFINITY;
                for j in 0..k {
                    if j == best {
                        continue;
                    }
                    let d2 = (p - centroids_ref[j]).norm_squared();
                    if d2 < best_d2 {
                        runner_up_d2 = best_d2;
                        best_d2 = d2;
                        best = j;
                    } else if d2 < runner_up_d2 {
                        runner_up_d2 = d2;
                    }
                }
                *label = best as u32;
                *up = best_d2.sqrt();
                *lo = runner_up_d2.sqrt();
            });
    }

    (labels, centroids)
}

/// Give an empty cluster the farthest member of the largest cluster.
#[allow(clippy::too_many_arguments)]
fn repair_empty_cluster(
    samples: &[Vector3<f64>],
    centroids: &[Vector3<f64>],
    labels: &mut [u32],
    upper: &mut [f64],
    lower: &mut [f64],
    sums: &mut [Vector3<f64>],
    counts: &mut [usize],
    empty: usize,
) {
    let mut donor = 0usize;
    for c in 1..counts.len() {
        if counts[c] > counts[donor] {
            donor = c;
        }
    }
    let mut far_idx = 0usize;
    let mut far_d2 = -1.0f64;
    for (i, p) in samples.iter().enumerate() {
        if labels[i] as usize != donor {
            continue;
        }
        let d2 = (p - centroids[donor]).norm_squared();
        if d2 > far_d2 {
            far_d2 = d2;
            far_idx = i;
        }
    }
    counts[donor] -= 1;
    counts[empty] = 1;
    sums[donor] -= samples[far_idx];
    sums[empty] = samples[far_idx];
    labels[far_idx] = empty as u32;
    // the stolen point becomes its cluster's center this round
    upper[far_idx] = 0.0;
    lower[far_idx] = 0.0;
}

fn plus_plus_centers(
    samples: &[Vector3<f64>],
    k: usize,
    trials: usize,
    rng: &mut StdRng,
) -> Vec<Vector3<f64>> {
    let n = samples.len();
    let mut centroids = Vec::with_capacity(k);
    let first = rng.gen_range(0..n);
    centroids.push(samples[first]);

    let mut dist: Vec<f64> = samples
        .par_iter()
        .map(|p| (p - samples[first]).norm_squared())
        .collect();
    let mut potential: f64 = dist.iter().sum();
    let mut trial_buf = vec![0f64; n];
    let mut best_buf = vec![0f64; n];

    for _ in 1..k {
        let mut best_potential = f64::INFINITY;
        let mut best_idx = 0usize;
        for _ in 0..trials {
            let mut p = rng.gen::<f64>() * potential;
            let mut candidate = 0usize;
            while candidate < n - 1 {
                p -= dist[candidate];
                if p <= 0.0 {
                    break;
                }
                candidate += 1;
            }
            let picked = samples[candidate];
            trial_buf
                .par_iter_mut()
                .zip(samples.par_iter())
                .zip(dist.par_iter())
                .for_each(|((t, q), &d)| {
                    *t = d.min((q - picked).norm_squared());
                });
            let trial_potential: f64 = trial_buf.iter().sum();
            if trial_potential < best_potential {
                best_potential = trial_potential;
                best_idx = candidate;
                std::mem::swap(&mut best_buf, &mut trial_buf);
            }
        }
        centroids.push(samples[best_idx]);
        potential = best_potential;
        std::mem::swap(&mut dist, &mut best_buf);
    }
    centroids
}

fn random_in_box_centers(
    samples: &[Vector3<f64>],
    k: usize,
    rng: &mut StdRng,
) -> Vec<Vector3<f64>> {
    let mut lo = samples[0];
    let mut hi = samples[0];
    for p in samples.iter().skip(1) {
        for j in 0..3 {
            lo[j] = lo[j].min(p[j]);
            hi[j] = hi[j].max(p[j]);
        }
    }
    (0..k)
        .map(|_| {
            let mut c = Vector3::zeros();
            for j in 0..3 {
                let t = rng.gen_range(-BOX_MARGIN..1.0 + BOX_MARGIN);
                c[j] = lo[j] + t * (hi[j] - lo[j]);
            }
            c
        })
        .collect()
}

fn nearest(centroids: &[Vector3<f64>], p: &Vector3<f64>) -> (usize, f64) {
    let mut best = 0usize;
    let mut best_d2 = f64::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d2 = (p - c).norm_squared();
        if d2 < best_d2 {
            best_d2 = d2;
            best = i;
        }
    }
    (best, best_d2)
}
