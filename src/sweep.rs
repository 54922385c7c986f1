use indexmap::IndexMap;

use crate::coherence::{CoherenceMetric, CoherenceScorer};
use crate::config::TopicRange;
use crate::error::{OptimizerError, Result};
use crate::topic_modeling::{ModelFactory, TopicModel};
use crate::vocabulary::{EncodedDocument, Vocabulary};

pub type CandidateModels = IndexMap<usize, Box<dyn TopicModel>>;

/// Coherence per topic count, in the order the counts were scored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoherenceTable {
    scores: IndexMap<usize, f64>,
}

impl CoherenceTable {
    pub fn new() -> Self {
        CoherenceTable::default()
    }

    pub fn insert(&mut self, num_topics: usize, score: f64) {
        self.scores.insert(num_topics, score);
    }

    pub fn get(&self, num_topics: usize) -> Option<f64> {
        self.scores.get(&num_topics).copied()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.scores.iter().map(|(k, v)| (*k, *v))
    }

    /// The topic count with the highest score. The first one wins a tie and
    /// NaN scores never win.
    pub fn best_topic_count(&self) -> Result<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (num_topics, score) in self.iter() {
            if score.is_nan() {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((num_topics, score)),
            }
        }
        best.map(|(num_topics, _)| num_topics)
            .ok_or(OptimizerError::NoCoherenceScores)
    }
}

impl FromIterator<(usize, f64)> for CoherenceTable {
    fn from_iter<I: IntoIterator<Item = (usize, f64)>>(iter: I) -> Self {
        CoherenceTable {
            scores: iter.into_iter().collect(),
        }
    }
}

/// Fits one model per topic count, in ascending order.
pub fn get_models(
    corpus: &[EncodedDocument],
    vocabulary: &Vocabulary,
    factory: &dyn ModelFactory,
    topic_numbers_range: TopicRange,
    random_state: Option<u64>,
) -> Result<CandidateModels> {
    topic_numbers_range.validate()?;
    let total = topic_numbers_range.end - topic_numbers_range.start;
    let mut models = CandidateModels::with_capacity(total);
    for (i, num_topics) in topic_numbers_range.iter().enumerate() {
        log::info!("Fitting model {}/{} with {} topics", i + 1, total, num_topics);
        let model = factory.fit(corpus, vocabulary, num_topics, random_state)?;
        models.insert(num_topics, model);
    }
    Ok(models)
}

pub fn get_coherences(
    models: &CandidateModels,
    texts: &[Vec<String>],
    vocabulary: &Vocabulary,
    scorer: &dyn CoherenceScorer,
    coherence: CoherenceMetric,
    num_words: usize,
) -> Result<CoherenceTable> {
    let mut table = CoherenceTable::new();
    for (&num_topics, model) in models {
        let topics = model.topic_words(vocabulary, num_words);
        let score = scorer.score(&topics, texts, vocabulary, coherence)?;
        log::info!("Coherence ({}) with {} topics: {:.4}", coherence, num_topics, score);
        table.insert(num_topics, score);
    }
    Ok(table)
}
