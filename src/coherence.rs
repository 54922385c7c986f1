use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::Result;
use crate::vocabulary::Vocabulary;

const EPSILON: f64 = 1e-12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum CoherenceMetric {
    #[serde(rename = "u_mass")]
    #[strum(serialize = "u_mass")]
    UMass,
    #[default]
    #[serde(rename = "c_v")]
    #[strum(serialize = "c_v")]
    Cv,
    #[serde(rename = "c_uci")]
    #[strum(serialize = "c_uci")]
    Cuci,
    #[serde(rename = "c_npmi")]
    #[strum(serialize = "c_npmi")]
    Cnpmi,
}

impl CoherenceMetric {
    /// Boolean sliding window used for probability estimation. `None` means
    /// every document is one window.
    pub fn default_window_size(&self) -> Option<usize> {
        match self {
            CoherenceMetric::UMass => None,
            CoherenceMetric::Cv => Some(110),
            CoherenceMetric::Cuci | CoherenceMetric::Cnpmi => Some(10),
        }
    }
}

/// Scores a whole set of topics against reference texts.
pub trait CoherenceScorer {
    fn score(
        &self,
        topics: &[Vec<String>],
        texts: &[Vec<String>],
        vocabulary: &Vocabulary,
        metric: CoherenceMetric,
    ) -> Result<f64>;
}

/// Co-occurrence based coherence. Per-topic scores are averaged; a set
/// without a single scorable topic yields NaN.
#[derive(Debug, Clone, Default)]
pub struct WindowCoherence {
    pub window_size: Option<usize>,  // Overrides the metric's default window
}

#[derive(Debug, Default)]
struct OccurrenceCounts {
    num_windows: usize,
    single: HashMap<usize, usize>,
    pairs: HashMap<(usize, usize), usize>,
}

impl OccurrenceCounts {
    fn accumulate(texts: &[Vec<Option<usize>>], window_size: Option<usize>) -> Self {
        let mut counts = OccurrenceCounts::default();
        for text in texts {
            match window_size {
                Some(size) if text.len() > size => {
                    for window in text.windows(size) {
                        counts.add_window(window);
                    }
                }
                _ => counts.add_window(text),
            }
        }
        counts
    }

    fn add_window(&mut self, window: &[Option<usize>]) {
        self.num_windows += 1;
        let present: HashSet<usize> = window.iter().flatten().copied().collect();
        let mut present: Vec<usize> = present.into_iter().collect();
        present.sort_unstable();
        for (i, &a) in present.iter().enumerate() {
            *self.single.entry(a).or_insert(0) += 1;
            for &b in &present[i + 1..] {
                *self.pairs.entry((a, b)).or_insert(0) += 1;
            }
        }
    }

    fn probability(&self, word: usize) -> f64 {
        self.single.get(&word).copied().unwrap_or(0) as f64 / self.num_windows as f64
    }

    fn joint_probability(&self, a: usize, b: usize) -> f64 {
        let count = if a == b {
            self.single.get(&a).copied().unwrap_or(0)
        } else {
            self.pairs.get(&(a.min(b), a.max(b))).copied().unwrap_or(0)
        };
        count as f64 / self.num_windows as f64
    }

    fn log_conditional(&self, w_prime: usize, w_star: usize) -> f64 {
        let p_star = self.probability(w_star);
        if p_star == 0.0 {
            return 0.0;
        }
        ((self.joint_probability(w_prime, w_star) + EPSILON) / p_star).ln()
    }

    fn log_ratio(&self, a: usize, b: usize) -> f64 {
        let denominator = self.probability(a) * self.probability(b);
        if denominator == 0.0 {
            return 0.0;
        }
        ((self.joint_probability(a, b) + EPSILON) / denominator).ln()
    }

    fn normalized_log_ratio(&self, a: usize, b: usize) -> f64 {
        let ratio = self.log_ratio(a, b);
        let normalizer = -(self.joint_probability(a, b) + EPSILON).ln();
        if normalizer == 0.0 {
            return 0.0;
        }
        ratio / normalizer
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

fn cosine(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm = a.iter().map(|x| x * x).sum::<f64>().sqrt() * b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm == 0.0 {
        0.0
    } else {
        dot / norm
    }
}

fn topic_score(topic: &[usize], counts: &OccurrenceCounts, metric: CoherenceMetric) -> Option<f64> {
    match metric {
        CoherenceMetric::UMass => mean(
            (1..topic.len()).flat_map(|i| (0..i).map(move |j| counts.log_conditional(topic[i], topic[j]))),
        ),
        CoherenceMetric::Cuci => mean(ordered_pairs(topic).map(|(a, b)| counts.log_ratio(a, b))),
        CoherenceMetric::Cnpmi => mean(ordered_pairs(topic).map(|(a, b)| counts.normalized_log_ratio(a, b))),
        CoherenceMetric::Cv => {
            let vectors: Vec<Vec<f64>> = topic
                .iter()
                .map(|&w_i| topic.iter().map(|&w_j| counts.normalized_log_ratio(w_i, w_j)).collect())
                .collect();
            let topic_vector: Vec<f64> = (0..topic.len())
                .map(|j| vectors.iter().map(|v| v[j]).sum())
                .collect();
            mean(vectors.iter().map(|v| cosine(v, &topic_vector)))
        }
    }
}

fn ordered_pairs(topic: &[usize]) -> impl Iterator<Item = (usize, usize)> + '_ {
    topic
        .iter()
        .enumerate()
        .flat_map(move |(i, &a)| topic.iter().enumerate().filter(move |(j, _)| *j != i).map(move |(_, &b)| (a, b)))
}

impl CoherenceScorer for WindowCoherence {
    fn score(
        &self,
        topics: &[Vec<String>],
        texts: &[Vec<String>],
        vocabulary: &Vocabulary,
        metric: CoherenceMetric,
    ) -> Result<f64> {
        let topic_ids: Vec<Vec<usize>> = topics
            .iter()
            .map(|words| words.iter().filter_map(|word| vocabulary.id(word)).collect())
            .collect();
        let relevant: HashSet<usize> = topic_ids.iter().flatten().copied().collect();

        // Positions are kept so windows span the original token sequence
        let id_texts: Vec<Vec<Option<usize>>> = texts
            .iter()
            .map(|text| {
                text.iter()
                    .map(|token| vocabulary.id(token).filter(|id| relevant.contains(id)))
                    .collect()
            })
            .collect();

        let window_size = self.window_size.or(metric.default_window_size());
        let counts = OccurrenceCounts::accumulate(&id_texts, window_size);
        if counts.num_windows == 0 {
            return Ok(f64::NAN);
        }

        Ok(mean(topic_ids.iter().filter_map(|topic| topic_score(topic, &counts, metric))).unwrap_or(f64::NAN))
    }
}
