use std::path::Path;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::topic_modeling::{check_fit_input, seeded_rng, top_n, write_model, ModelFamily, SavedModelRef, TopicModel};
use crate::vocabulary::EncodedDocument;

const EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NmfConfig {
    pub max_iterations: usize,
    pub tolerance: f64,  // Relative reconstruction improvement below which fitting stops
    pub minimum_probability: f64,
    pub inference_iterations: usize,
}

impl Default for NmfConfig {
    fn default() -> Self {
        NmfConfig {
            max_iterations: 200,
            tolerance: 1e-4,
            minimum_probability: 0.01,
            inference_iterations: 100,
        }
    }
}

/// Non-negative factorisation of the term-count matrix with multiplicative
/// updates. Topic rows are normalised to sum to one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmfModel {
    pub num_topics: usize,
    pub minimum_probability: f64,
    pub inference_iterations: usize,
    pub topic_word_matrix: Vec<Vec<f64>>,  // Topics x Words
    pub fitted_at: DateTime<Utc>,
}

fn gram(rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let k = rows.len();
    let mut out = vec![vec![0.0; k]; k];
    for a in 0..k {
        for b in a..k {
            let dot: f64 = rows[a].iter().zip(&rows[b]).map(|(x, y)| x * y).sum();
            out[a][b] = dot;
            out[b][a] = dot;
        }
    }
    out
}

impl NmfModel {
    pub fn fit(
        corpus: &[EncodedDocument],
        vocab_size: usize,
        num_topics: usize,
        seed: Option<u64>,
        config: &NmfConfig,
    ) -> Result<Self> {
        check_fit_input(corpus.len(), vocab_size, num_topics)?;
        let mut rng = seeded_rng(seed);
        let k = num_topics;

        let mut w: Vec<Vec<f64>> = (0..corpus.len())
            .map(|_| (0..k).map(|_| rng.gen_range(0.1..1.0)).collect())
            .collect();
        let mut h: Vec<Vec<f64>> = (0..k)
            .map(|_| (0..vocab_size).map(|_| rng.gen_range(0.1..1.0)).collect())
            .collect();

        let norm_v: f64 = corpus
            .iter()
            .flat_map(|doc| doc.terms.iter())
            .map(|&(_, count)| (count * count) as f64)
            .sum();
        let mut initial_error = None;
        let mut previous_error = f64::INFINITY;

        for iteration in 0..config.max_iterations {
            // Update H: H <- H * (W^T V) / (W^T W H)
            let mut wt_v = vec![vec![0.0; vocab_size]; k];
            for (doc, w_row) in corpus.iter().zip(&w) {
                for &(word_id, count) in &doc.terms {
                    for topic in 0..k {
                        wt_v[topic][word_id] += w_row[topic] * count as f64;
                    }
                }
            }
            let wt_w = gram(&transpose(&w, k));
            for topic in 0..k {
                for word_id in 0..vocab_size {
                    let denominator: f64 = (0..k).map(|j| wt_w[topic][j] * h[j][word_id]).sum();
                    h[topic][word_id] *= wt_v[topic][word_id] / (denominator + EPSILON);
                }
            }

            // Update W: W <- W * (V H^T) / (W H H^T)
            let h_ht = gram(&h);
            for (doc, w_row) in corpus.iter().zip(w.iter_mut()) {
                let mut v_ht = vec![0.0; k];
                for &(word_id, count) in &doc.terms {
                    for (topic, value) in v_ht.iter_mut().enumerate() {
                        *value += count as f64 * h[topic][word_id];
                    }
                }
                let current = w_row.clone();
                for topic in 0..k {
                    let denominator: f64 = (0..k).map(|j| current[j] * h_ht[j][topic]).sum();
                    w_row[topic] *= v_ht[topic] / (denominator + EPSILON);
                }
            }

            // ||V - WH||^2 = ||V||^2 - 2 <V, WH> + tr(W^T W H H^T)
            let h_ht = gram(&h);
            let wt_w = gram(&transpose(&w, k));
            let h_ref = &h;
            let cross: f64 = corpus
                .iter()
                .zip(&w)
                .flat_map(|(doc, w_row)| {
                    doc.terms.iter().map(move |&(word_id, count)| {
                        count as f64 * (0..k).map(|t| w_row[t] * h_ref[t][word_id]).sum::<f64>()
                    })
                })
                .sum();
            let reconstruction: f64 = (0..k)
                .flat_map(|a| (0..k).map(move |b| (a, b)))
                .map(|(a, b)| wt_w[a][b] * h_ht[a][b])
                .sum();
            let error = (norm_v - 2.0 * cross + reconstruction).max(0.0);

            let initial = *initial_error.get_or_insert(error.max(EPSILON));
            if iteration > 0 && (previous_error - error) / initial < config.tolerance {
                log::debug!("NMF with {} topics converged after {} iterations", k, iteration + 1);
                break;
            }
            previous_error = error;
        }

        let topic_word_matrix = h
            .into_iter()
            .map(|row| {
                let total: f64 = row.iter().sum();
                if total <= 0.0 {
                    vec![1.0 / vocab_size as f64; vocab_size]
                } else {
                    row.into_iter().map(|value| value / total).collect()
                }
            })
            .collect();

        Ok(NmfModel {
            num_topics: k,
            minimum_probability: config.minimum_probability,
            inference_iterations: config.inference_iterations,
            topic_word_matrix,
            fitted_at: Utc::now(),
        })
    }

    /// Non-negative weights of a document against the fitted topics,
    /// normalised to a mixture.
    pub fn infer(&self, document: &EncodedDocument) -> Vec<f64> {
        let k = self.num_topics;
        let vocab_size = self.topic_word_matrix.first().map_or(0, |row| row.len());
        let mut h_v = vec![0.0; k];
        for &(word_id, count) in &document.terms {
            if word_id >= vocab_size {
                continue;
            }
            for (topic, value) in h_v.iter_mut().enumerate() {
                *value += count as f64 * self.topic_word_matrix[topic][word_id];
            }
        }
        if h_v.iter().all(|&value| value <= 0.0) {
            return vec![1.0 / k as f64; k];
        }

        let h_ht = gram(&self.topic_word_matrix);
        let mut weights = vec![1.0 / k as f64; k];
        for _ in 0..self.inference_iterations {
            let current = weights.clone();
            for topic in 0..k {
                let denominator: f64 = (0..k).map(|j| h_ht[topic][j] * current[j]).sum();
                weights[topic] = current[topic] * h_v[topic] / (denominator + EPSILON);
            }
        }

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return vec![1.0 / k as f64; k];
        }
        weights.into_iter().map(|value| value / total).collect()
    }
}

fn transpose(rows: &[Vec<f64>], width: usize) -> Vec<Vec<f64>> {
    (0..width).map(|col| rows.iter().map(|row| row[col]).collect()).collect()
}

impl TopicModel for NmfModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::Nmf
    }

    fn num_topics(&self) -> usize {
        self.num_topics
    }

    fn top_terms(&self, topic_id: usize, num_words: usize) -> Vec<(usize, f64)> {
        self.topic_word_matrix
            .get(topic_id)
            .map(|weights| top_n(weights, num_words))
            .unwrap_or_default()
    }

    fn document_topics(&self, document: &EncodedDocument) -> Vec<(usize, f64)> {
        let threshold = self.minimum_probability.max(1e-8);
        self.infer(document)
            .into_iter()
            .enumerate()
            .filter(|(_, probability)| *probability >= threshold)
            .collect()
    }

    fn save(&self, path: &Path) -> Result<()> {
        write_model(path, SavedModelRef::Nmf(self))
    }
}
