use std::fmt;
use std::str::FromStr;

use aprender::preprocessing::TSNE;
use aprender::traits::Transformer;
use serde::{Deserialize, Serialize};

use crate::error::{OptimizerError, Result};
use crate::projection::{check_matrix, estimator_failed, from_matrix, to_matrix, Projector};

const EARLY_EXAGGERATION: f64 = 12.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningRate {
    /// `max(n / 12 / 4, 50)`
    #[default]
    Auto,
    Value(f64),
}

impl FromStr for LearningRate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(LearningRate::Auto);
        }
        s.parse::<f64>()
            .map(LearningRate::Value)
            .map_err(|_| format!("expected 'auto' or a number, got '{s}'"))
    }
}

impl fmt::Display for LearningRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LearningRate::Auto => write!(f, "auto"),
            LearningRate::Value(value) => write!(f, "{value}"),
        }
    }
}

/// Exact t-SNE into two dimensions, fitted by `aprender`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tsne {
    pub perplexity: f64,
    pub n_iter: usize,
    pub learning_rate: LearningRate,
}

impl Default for Tsne {
    fn default() -> Self {
        Tsne {
            perplexity: 40.0,
            n_iter: 1000,
            learning_rate: LearningRate::Auto,
        }
    }
}

impl Tsne {
    fn learning_rate(&self, n: usize) -> f64 {
        match self.learning_rate {
            LearningRate::Auto => (n as f64 / EARLY_EXAGGERATION / 4.0).max(50.0),
            LearningRate::Value(value) => value,
        }
    }

    fn estimator(&self, n: usize, seed: Option<u64>) -> TSNE {
        let tsne = TSNE::new(2)
            .with_perplexity(self.perplexity as f32)
            .with_learning_rate(self.learning_rate(n) as f32)
            .with_n_iter(self.n_iter);
        match seed {
            Some(seed) => tsne.with_random_state(seed),
            None => tsne,
        }
    }
}

impl Projector for Tsne {
    fn name(&self) -> &'static str {
        "tsne"
    }

    fn project(&self, matrix: &[Vec<f64>], seed: Option<u64>) -> Result<Vec<[f64; 2]>> {
        check_matrix("tsne", matrix, 2)?;
        let n = matrix.len();
        if self.perplexity <= 0.0 || self.perplexity >= n as f64 {
            return Err(OptimizerError::Projection {
                method: "tsne",
                reason: format!("perplexity ({}) must be in (0, {n}), the number of samples", self.perplexity),
            });
        }

        let embedding = self
            .estimator(n, seed)
            .fit_transform(&to_matrix("tsne", matrix)?)
            .map_err(estimator_failed("tsne"))?;
        log::debug!("t-SNE finished {} iterations on {} samples", self.n_iter, n);
        Ok(from_matrix(&embedding))
    }
}
