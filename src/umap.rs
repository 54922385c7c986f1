use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{OptimizerError, Result};
use crate::projection::{check_matrix, pca_2d, squared_euclidean, Projector};
use crate::topic_modeling::seeded_rng;

const SMOOTH_KNN_STEPS: usize = 64;
const SMOOTH_KNN_TOLERANCE: f64 = 1e-5;
const MIN_DIST_SCALE: f64 = 1e-3;
const GRADIENT_CLIP: f64 = 4.0;
const INIT_EXTENT: f64 = 10.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Euclidean,
    Manhattan,
    Cosine,
    Chebyshev,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            DistanceMetric::Euclidean => squared_euclidean(a, b).sqrt(),
            DistanceMetric::Manhattan => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
            DistanceMetric::Chebyshev => a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max),
            DistanceMetric::Cosine => {
                let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
                match (norm_a == 0.0, norm_b == 0.0) {
                    (true, true) => 0.0,
                    (true, false) | (false, true) => 1.0,
                    _ => 1.0 - dot / (norm_a * norm_b),
                }
            }
        }
    }
}

/// UMAP into two dimensions.
///
/// `n_neighbors` counts the other points joined to each point in the k-NN
/// graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Umap {
    pub n_neighbors: usize,
    pub metric: DistanceMetric,
    pub min_dist: f64,
    pub spread: f64,
    pub learning_rate: f64,
    pub n_epochs: Option<usize>,
    pub negative_sample_rate: usize,
}

impl Default for Umap {
    fn default() -> Self {
        Umap {
            n_neighbors: 7,
            metric: DistanceMetric::Euclidean,
            min_dist: 0.1,
            spread: 1.0,
            learning_rate: 1.0,
            n_epochs: None,
            negative_sample_rate: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Edge {
    head: usize,
    tail: usize,
    weight: f64,
}

/// Fits `1 / (1 + a * x^(2b))` to the target membership curve by a
/// narrowing grid search over (a, b).
pub(crate) fn find_ab_params(spread: f64, min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..300).map(|i| i as f64 * spread * 3.0 / 299.0).collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| if x < min_dist { 1.0 } else { (-(x - min_dist) / spread).exp() })
        .collect();
    let loss = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| (1.0 / (1.0 + a * x.powf(2.0 * b)) - y).powi(2))
            .sum()
    };

    const STEPS: usize = 40;
    let (mut a_lo, mut a_hi, mut b_lo, mut b_hi) = (1e-3, 10.0, 0.1, 3.0);
    let mut best = (1.0, 1.0, f64::INFINITY);
    for _ in 0..8 {
        let a_step = (a_hi - a_lo) / STEPS as f64;
        let b_step = (b_hi - b_lo) / STEPS as f64;
        for ia in 0..=STEPS {
            for ib in 0..=STEPS {
                let a = a_lo + a_step * ia as f64;
                let b = b_lo + b_step * ib as f64;
                let value = loss(a, b);
                if value < best.2 {
                    best = (a, b, value);
                }
            }
        }
        a_lo = (best.0 - 4.0 * a_step).max(1e-6);
        a_hi = best.0 + 4.0 * a_step;
        b_lo = (best.1 - 4.0 * b_step).max(1e-6);
        b_hi = best.1 + 4.0 * b_step;
    }
    (best.0, best.1)
}

impl Umap {
    fn validate(&self, n: usize) -> Result<usize> {
        if self.n_neighbors == 0 {
            return Err(OptimizerError::Projection {
                method: "umap",
                reason: "n_neighbors must be at least 1".to_string(),
            });
        }
        if self.min_dist > self.spread {
            return Err(OptimizerError::Projection {
                method: "umap",
                reason: format!("min_dist ({}) must not exceed spread ({})", self.min_dist, self.spread),
            });
        }
        if self.n_neighbors >= n {
            log::warn!(
                "n_neighbors ({}) is not smaller than the number of samples ({}), using {}",
                self.n_neighbors,
                n,
                n - 1
            );
            return Ok(n - 1);
        }
        Ok(self.n_neighbors)
    }

    /// Symmetric fuzzy membership strengths of the k-NN graph.
    fn fuzzy_graph(&self, matrix: &[Vec<f64>], k: usize) -> Vec<Vec<f64>> {
        let n = matrix.len();
        let knn: Vec<Vec<(usize, f64)>> = (0..n)
            .map(|i| {
                let mut neighbors: Vec<(usize, f64)> = (0..n)
                    .filter(|&j| j != i)
                    .map(|j| (j, self.metric.distance(&matrix[i], &matrix[j])))
                    .collect();
                neighbors.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
                neighbors.truncate(k);
                neighbors
            })
            .collect();

        let mean_all = {
            let all: Vec<f64> = knn.iter().flatten().map(|(_, d)| *d).collect();
            all.iter().sum::<f64>() / all.len().max(1) as f64
        };
        let target = ((k + 1) as f64).log2();

        let mut membership = vec![vec![0.0; n]; n];
        for (i, neighbors) in knn.iter().enumerate() {
            let rho = neighbors.iter().map(|(_, d)| *d).find(|d| *d > 0.0).unwrap_or(0.0);

            let (mut lo, mut hi, mut sigma) = (0.0, f64::INFINITY, 1.0);
            for _ in 0..SMOOTH_KNN_STEPS {
                let psum: f64 = neighbors
                    .iter()
                    .map(|(_, d)| {
                        let gap = d - rho;
                        if gap > 0.0 { (-gap / sigma).exp() } else { 1.0 }
                    })
                    .sum();
                if (psum - target).abs() < SMOOTH_KNN_TOLERANCE {
                    break;
                }
                if psum > target {
                    hi = sigma;
                    sigma = (lo + hi) / 2.0;
                } else {
                    lo = sigma;
                    sigma = if hi.is_infinite() { sigma * 2.0 } else { (lo + hi) / 2.0 };
                }
            }
            let mean_i = neighbors.iter().map(|(_, d)| *d).sum::<f64>() / neighbors.len().max(1) as f64;
            let floor = if rho > 0.0 { mean_i } else { mean_all };
            sigma = sigma.max(MIN_DIST_SCALE * floor);

            for &(j, d) in neighbors {
                let gap = d - rho;
                membership[i][j] = if gap <= 0.0 || sigma == 0.0 { 1.0 } else { (-gap / sigma).exp() };
            }
        }

        let mut graph = vec![vec![0.0; n]; n];
        for i in 0..n {
            for j in 0..n {
                let (a, b) = (membership[i][j], membership[j][i]);
                graph[i][j] = a + b - a * b;
            }
        }
        graph
    }

    fn initial_embedding(&self, matrix: &[Vec<f64>], rng: &mut impl Rng) -> Result<Vec<[f64; 2]>> {
        let scores = pca_2d(matrix)?;
        let extent = scores.iter().flatten().fold(0.0f64, |acc, v| acc.max(v.abs()));
        if extent > 0.0 {
            return Ok(scores
                .iter()
                .map(|[x, y]| {
                    let noise_x: f64 = rng.sample(StandardNormal);
                    let noise_y: f64 = rng.sample(StandardNormal);
                    [
                        x * INIT_EXTENT / extent + noise_x * 1e-4,
                        y * INIT_EXTENT / extent + noise_y * 1e-4,
                    ]
                })
                .collect());
        }
        log::warn!("PCA initialisation is degenerate, falling back to random");
        Ok((0..matrix.len())
            .map(|_| [rng.gen_range(-INIT_EXTENT..INIT_EXTENT), rng.gen_range(-INIT_EXTENT..INIT_EXTENT)])
            .collect())
    }
}

impl Projector for Umap {
    fn name(&self) -> &'static str {
        "umap"
    }

    fn project(&self, matrix: &[Vec<f64>], seed: Option<u64>) -> Result<Vec<[f64; 2]>> {
        check_matrix("umap", matrix, 2)?;
        let n = matrix.len();
        let k = self.validate(n)?;
        let n_epochs = self.n_epochs.unwrap_or(if n <= 10_000 { 500 } else { 200 }).max(1);
        let (a, b) = find_ab_params(self.spread, self.min_dist);

        let graph = self.fuzzy_graph(matrix, k);
        let max_weight = graph.iter().flatten().fold(0.0f64, |acc, w| acc.max(*w));
        let edges: Vec<Edge> = (0..n)
            .flat_map(|head| (0..n).map(move |tail| (head, tail)))
            .filter(|&(head, tail)| head != tail)
            .map(|(head, tail)| Edge {
                head,
                tail,
                weight: graph[head][tail],
            })
            .filter(|edge| edge.weight > 0.0 && edge.weight >= max_weight / n_epochs as f64)
            .collect();

        let mut rng = seeded_rng(seed);
        let mut y = self.initial_embedding(matrix, &mut rng)?;

        let epochs_per_sample: Vec<f64> = edges.iter().map(|edge| max_weight / edge.weight).collect();
        let epochs_per_negative: Vec<f64> = epochs_per_sample
            .iter()
            .map(|eps| eps / self.negative_sample_rate.max(1) as f64)
            .collect();
        let mut next_sample = epochs_per_sample.clone();
        let mut next_negative = epochs_per_negative.clone();

        for epoch in 0..n_epochs {
            let alpha = self.learning_rate * (1.0 - epoch as f64 / n_epochs as f64);
            let epoch = epoch as f64;

            for (e, edge) in edges.iter().enumerate() {
                if next_sample[e] > epoch {
                    continue;
                }
                let (i, j) = (edge.head, edge.tail);

                // Attraction along the edge
                let dist2 = squared_euclidean(&y[i], &y[j]);
                if dist2 > 0.0 {
                    let coeff = -2.0 * a * b * dist2.powf(b - 1.0) / (a * dist2.powf(b) + 1.0);
                    for d in 0..2 {
                        let grad = (coeff * (y[i][d] - y[j][d])).clamp(-GRADIENT_CLIP, GRADIENT_CLIP);
                        y[i][d] += grad * alpha;
                        y[j][d] -= grad * alpha;
                    }
                }
                next_sample[e] += epochs_per_sample[e];

                // Repulsion from random points
                let n_negative = ((epoch - next_negative[e]) / epochs_per_negative[e]).floor().max(0.0) as usize;
                for _ in 0..n_negative {
                    let other = rng.gen_range(0..n);
                    if other == i {
                        continue;
                    }
                    let dist2 = squared_euclidean(&y[i], &y[other]);
                    let coeff = if dist2 > 0.0 {
                        2.0 * b / ((0.001 + dist2) * (a * dist2.powf(b) + 1.0))
                    } else {
                        0.0
                    };
                    for d in 0..2 {
                        let grad = if coeff > 0.0 {
                            (coeff * (y[i][d] - y[other][d])).clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
                        } else {
                            GRADIENT_CLIP
                        };
                        y[i][d] += grad * alpha;
                    }
                }
                next_negative[e] += n_negative as f64 * epochs_per_negative[e];
            }
        }
        log::debug!("UMAP finished {} epochs over {} edges", n_epochs, edges.len());
        Ok(y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_clusters() -> Vec<Vec<f64>> {
        vec![
            vec![0.9, 0.1, 0.0],
            vec![0.8, 0.2, 0.0],
            vec![0.85, 0.1, 0.05],
            vec![0.0, 0.1, 0.9],
            vec![0.1, 0.0, 0.9],
            vec![0.05, 0.1, 0.85],
        ]
    }

    fn distance(a: [f64; 2], b: [f64; 2]) -> f64 {
        squared_euclidean(&a, &b).sqrt()
    }

    #[test]
    fn curve_parameters_for_default_min_dist() {
        let (a, b) = find_ab_params(1.0, 0.1);
        assert!((a - 1.577).abs() < 0.1, "a = {a}");
        assert!((b - 0.895).abs() < 0.05, "b = {b}");
    }

    #[test]
    fn clusters_stay_apart() {
        let umap = Umap {
            n_neighbors: 2,
            ..Umap::default()
        };
        let y = umap.project(&two_clusters(), Some(3)).unwrap();
        assert!(y.iter().all(|p| p[0].is_finite() && p[1].is_finite()));
        let within = distance(y[0], y[1]).max(distance(y[3], y[4]));
        let between = distance(y[0], y[3]).min(distance(y[1], y[4]));
        assert!(within < between, "within {within} between {between}");
    }

    #[test]
    fn same_seed_same_embedding() {
        let umap = Umap {
            n_neighbors: 3,
            n_epochs: Some(100),
            ..Umap::default()
        };
        let first = umap.project(&two_clusters(), Some(11)).unwrap();
        let second = umap.project(&two_clusters(), Some(11)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn too_many_neighbors_are_truncated() {
        let matrix = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.5, 0.5]];
        let umap = Umap::default();
        assert_eq!(umap.validate(matrix.len()).unwrap(), 2);
        let y = umap.project(&matrix, Some(5)).unwrap();
        assert_eq!(y.len(), 3);
    }

    #[test]
    fn membership_is_symmetric() {
        let graph = Umap::default().fuzzy_graph(&two_clusters(), 2);
        for i in 0..6 {
            assert_eq!(graph[i][i], 0.0);
            for j in 0..6 {
                assert_eq!(graph[i][j], graph[j][i]);
                assert!((0.0..=1.0).contains(&graph[i][j]));
            }
        }
        assert!(graph[0][1] > graph[0][3]);
    }

    #[test]
    fn metrics() {
        let (a, b) = ([1.0, 0.0], [0.0, 2.0]);
        assert_eq!(DistanceMetric::Manhattan.distance(&a, &b), 3.0);
        assert_eq!(DistanceMetric::Chebyshev.distance(&a, &b), 2.0);
        assert_eq!(DistanceMetric::Cosine.distance(&a, &b), 1.0);
        assert_eq!("cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
    }

    #[test]
    fn single_row_is_rejected() {
        assert!(Umap::default().project(&[vec![1.0, 2.0]], None).is_err());
    }
}
