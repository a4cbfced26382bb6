//! Soft clustering of embedding vectors for the abstraction tree.
//!
//! Embeddings are L2-normalized (so Euclidean distance tracks cosine),
//! projected down to at most 10 dimensions with seeded PCA, then fit
//! with a diagonal-covariance Gaussian mixture. The component count is
//! chosen by a BIC scan and membership is soft: an item joins every
//! component whose posterior exceeds the threshold, so one chunk can
//! feed several summaries.

use anyhow::{Result, anyhow};
use ndarray::{Array1, Array2};
use rand::prelude::*;

const REDUCED_DIMS: usize = 10;
const MAX_COMPONENTS: usize = 50;
const EM_ITERATIONS: usize = 100;
const POWER_ITERATIONS: usize = 100;
const COVARIANCE_FLOOR: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub struct ClusterConfig {
    /// Posterior probability above which an item joins a component.
    pub membership_threshold: f64,
    pub seed: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            membership_threshold: 0.1,
            seed: 224,
        }
    }
}

/// Partition item indices into (possibly overlapping) clusters.
///
/// Fewer than three items, or any numerical failure, degrades to a
/// single cluster holding everything, so tree building always makes
/// progress.
pub fn split_into_clusters(embeddings: &[Vec<f32>], config: &ClusterConfig) -> Vec<Vec<usize>> {
    if embeddings.len() < 3 {
        return vec![(0..embeddings.len()).collect()];
    }
    match cluster_inner(embeddings, config) {
        Ok(clusters) if !clusters.is_empty() => clusters,
        _ => vec![(0..embeddings.len()).collect()],
    }
}

fn cluster_inner(embeddings: &[Vec<f32>], config: &ClusterConfig) -> Result<Vec<Vec<usize>>> {
    let data = to_matrix(embeddings)?;
    let normalized = normalize_rows(&data);
    let dim = REDUCED_DIMS.min(normalized.ncols()).min(normalized.nrows() - 1);
    let reduced = reduce_dimensions(&normalized, dim, config.seed);

    let k = optimal_components(&reduced, config.seed)?;
    let model = GaussianMixture::fit(&reduced, k, config.seed)?;
    let posteriors = model.posteriors(&reduced);

    let mut clusters: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (item, row) in posteriors.outer_iter().enumerate() {
        for (component, &p) in row.iter().enumerate() {
            if p > config.membership_threshold {
                clusters[component].push(item);
            }
        }
    }
    clusters.retain(|c| !c.is_empty());
    if clusters.is_empty() {
        return Err(anyhow!("no component crossed the membership threshold"));
    }
    Ok(clusters)
}

fn to_matrix(embeddings: &[Vec<f32>]) -> Result<Array2<f64>> {
    let n = embeddings.len();
    let d = embeddings.first().map(Vec::len).unwrap_or(0);
    if d == 0 {
        return Err(anyhow!("embeddings are empty"));
    }
    let mut flat = Vec::with_capacity(n * d);
    for row in embeddings {
        if row.len() != d {
            return Err(anyhow!("embedding dimension mismatch: {} vs {d}", row.len()));
        }
        flat.extend(row.iter().map(|&v| v as f64));
    }
    Ok(Array2::from_shape_vec((n, d), flat)?)
}

fn normalize_rows(data: &Array2<f64>) -> Array2<f64> {
    let mut out = data.clone();
    for mut row in out.outer_iter_mut() {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    }
    out
}

/// Project onto the top `dim` principal components, found by power
/// iteration with deflation on the covariance matrix.
fn reduce_dimensions(data: &Array2<f64>, dim: usize, seed: u64) -> Array2<f64> {
    let (n, d) = data.dim();
    if dim == 0 || dim >= d {
        return data.clone();
    }

    let mean = data.mean_axis(ndarray::Axis(0)).expect("nonempty rows");
    let centered = data - &mean;
    let mut covariance = centered.t().dot(&centered) / n as f64;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut components = Array2::zeros((d, dim));
    for c in 0..dim {
        let mut v = Array1::from_shape_fn(d, |_| rng.random_range(-1.0..1.0));
        for _ in 0..POWER_ITERATIONS {
            let next = covariance.dot(&v);
            let norm = next.dot(&next).sqrt();
            if norm < 1e-12 {
                break;
            }
            v = next / norm;
        }
        let eigenvalue = v.dot(&covariance.dot(&v));
        // Deflate so the next iteration finds the next component.
        let outer = v
            .clone()
            .insert_axis(ndarray::Axis(1))
            .dot(&v.clone().insert_axis(ndarray::Axis(0)));
        covariance -= &(outer * eigenvalue);
        components.column_mut(c).assign(&v);
    }

    centered.dot(&components)
}

/// Scan component counts and keep the one with the lowest BIC.
fn optimal_components(data: &Array2<f64>, seed: u64) -> Result<usize> {
    let n = data.nrows();
    let upper = MAX_COMPONENTS.min(n);
    let mut best = (1usize, f64::INFINITY);
    for k in 1..upper.max(2) {
        let model = GaussianMixture::fit(data, k, seed)?;
        let bic = model.bic(data);
        if bic < best.1 {
            best = (k, bic);
        }
    }
    Ok(best.0)
}

/// Diagonal-covariance Gaussian mixture fit with EM.
struct GaussianMixture {
    weights: Array1<f64>,
    means: Array2<f64>,
    variances: Array2<f64>,
}

impl GaussianMixture {
    fn fit(data: &Array2<f64>, k: usize, seed: u64) -> Result<Self> {
        let (n, d) = data.dim();
        if k == 0 || k > n {
            return Err(anyhow!("component count {k} out of range for {n} items"));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut means = Array2::zeros((k, d));
        // Farthest-point initialization keeps initial means spread out.
        let first = rng.random_range(0..n);
        means.row_mut(0).assign(&data.row(first));
        let mut chosen = vec![first];
        for c in 1..k {
            let mut far = (0usize, -1.0f64);
            for i in 0..n {
                let min_dist = chosen
                    .iter()
                    .map(|&j| {
                        let diff = &data.row(i) - &data.row(j);
                        diff.dot(&diff)
                    })
                    .fold(f64::INFINITY, f64::min);
                if min_dist > far.1 {
                    far = (i, min_dist);
                }
            }
            chosen.push(far.0);
            means.row_mut(c).assign(&data.row(far.0));
        }

        let mut variances = Array2::from_elem((k, d), 1.0);
        let mut weights = Array1::from_elem(k, 1.0 / k as f64);
        let mut resp = Array2::zeros((n, k));

        for _ in 0..EM_ITERATIONS {
            // E-step
            for i in 0..n {
                let mut log_probs = vec![0.0; k];
                for (c, log_prob) in log_probs.iter_mut().enumerate() {
                    *log_prob = weights[c].ln()
                        + log_gaussian(&data.row(i), &means.row(c), &variances.row(c));
                }
                let log_sum = logsumexp(&log_probs);
                for c in 0..k {
                    resp[[i, c]] = (log_probs[c] - log_sum).exp();
                }
            }

            // M-step
            let resp_sum: Vec<f64> = (0..k).map(|c| resp.column(c).sum()).collect();
            let total: f64 = resp_sum.iter().sum();
            for c in 0..k {
                weights[c] = resp_sum[c] / total;
            }

            let mut new_means = Array2::zeros((k, d));
            for c in 0..k {
                if resp_sum[c] > 1e-10 {
                    for i in 0..n {
                        for j in 0..d {
                            new_means[[c, j]] += resp[[i, c]] * data[[i, j]];
                        }
                    }
                    for j in 0..d {
                        new_means[[c, j]] /= resp_sum[c];
                    }
                } else {
                    new_means.row_mut(c).assign(&means.row(c));
                }
            }

            let mut new_variances = Array2::from_elem((k, d), COVARIANCE_FLOOR);
            for c in 0..k {
                if resp_sum[c] > 1e-10 {
                    for i in 0..n {
                        for j in 0..d {
                            let diff = data[[i, j]] - new_means[[c, j]];
                            new_variances[[c, j]] += resp[[i, c]] * diff * diff;
                        }
                    }
                    for j in 0..d {
                        new_variances[[c, j]] =
                            (new_variances[[c, j]] / resp_sum[c]).max(COVARIANCE_FLOOR);
                    }
                }
            }

            means = new_means;
            variances = new_variances;
        }

        Ok(Self {
            weights,
            means,
            variances,
        })
    }

    fn posteriors(&self, data: &Array2<f64>) -> Array2<f64> {
        let n = data.nrows();
        let k = self.weights.len();
        let mut out = Array2::zeros((n, k));
        for i in 0..n {
            let mut log_probs = vec![0.0; k];
            for (c, log_prob) in log_probs.iter_mut().enumerate() {
                *log_prob = self.weights[c].ln()
                    + log_gaussian(&data.row(i), &self.means.row(c), &self.variances.row(c));
            }
            let log_sum = logsumexp(&log_probs);
            for c in 0..k {
                out[[i, c]] = (log_probs[c] - log_sum).exp();
            }
        }
        out
    }

    fn log_likelihood(&self, data: &Array2<f64>) -> f64 {
        let k = self.weights.len();
        data.outer_iter()
            .map(|point| {
                let log_probs: Vec<f64> = (0..k)
                    .map(|c| {
                        self.weights[c].ln()
                            + log_gaussian(&point, &self.means.row(c), &self.variances.row(c))
                    })
                    .collect();
                logsumexp(&log_probs)
            })
            .sum()
    }

    /// Bayesian information criterion; lower is better.
    fn bic(&self, data: &Array2<f64>) -> f64 {
        let (n, d) = data.dim();
        let k = self.weights.len();
        let params = (2 * k * d + k - 1) as f64;
        -2.0 * self.log_likelihood(data) + params * (n as f64).ln()
    }
}

fn log_gaussian(
    point: &ndarray::ArrayView1<'_, f64>,
    mean: &ndarray::ArrayView1<'_, f64>,
    var: &ndarray::ArrayView1<'_, f64>,
) -> f64 {
    let d = point.len() as f64;
    let mut log_prob = -0.5 * d * (2.0 * std::f64::consts::PI).ln();
    for i in 0..point.len() {
        let diff = point[i] - mean[i];
        log_prob -= 0.5 * var[i].ln();
        log_prob -= 0.5 * diff * diff / var[i];
    }
    log_prob
}

fn logsumexp(values: &[f64]) -> f64 {
    let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    max_val + values.iter().map(|&v| (v - max_val).exp()).sum::<f64>().ln()
}
