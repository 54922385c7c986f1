use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{OptimizerError, Result};
use crate::nmf::{NmfConfig, NmfModel};
use crate::vocabulary::{EncodedDocument, Vocabulary};

/// A fitted topic model as seen by the sweep and the reports.
pub trait TopicModel {
    fn family(&self) -> ModelFamily;

    fn num_topics(&self) -> usize;

    /// The `num_words` heaviest `(word id, weight)` pairs of one topic.
    fn top_terms(&self, topic_id: usize, num_words: usize) -> Vec<(usize, f64)>;

    /// Sparse topic mixture of a document. Topics below the model's
    /// minimum probability are left out.
    fn document_topics(&self, document: &EncodedDocument) -> Vec<(usize, f64)>;

    fn save(&self, path: &Path) -> Result<()>;

    fn topics(&self, num_words: usize) -> Vec<(usize, Vec<(usize, f64)>)> {
        (0..self.num_topics())
            .map(|topic_id| (topic_id, self.top_terms(topic_id, num_words)))
            .collect()
    }

    /// Top words of every topic, resolved through the vocabulary.
    fn topic_words(&self, vocabulary: &Vocabulary, num_words: usize) -> Vec<Vec<String>> {
        (0..self.num_topics())
            .map(|topic_id| {
                self.top_terms(topic_id, num_words)
                    .into_iter()
                    .filter_map(|(word_id, _)| vocabulary.token(word_id).map(|t| t.to_string()))
                    .collect()
            })
            .collect()
    }
}

/// Fits one candidate model for a given topic count.
pub trait ModelFactory {
    fn fit(
        &self,
        corpus: &[EncodedDocument],
        vocabulary: &Vocabulary,
        num_topics: usize,
        seed: Option<u64>,
    ) -> Result<Box<dyn TopicModel>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelFamily {
    #[default]
    Lda,
    Nmf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub family: ModelFamily,
    pub lda: LdaConfig,
    pub nmf: NmfConfig,
}

impl ModelFactory for ModelConfig {
    fn fit(
        &self,
        corpus: &[EncodedDocument],
        vocabulary: &Vocabulary,
        num_topics: usize,
        seed: Option<u64>,
    ) -> Result<Box<dyn TopicModel>> {
        match self.family {
            ModelFamily::Lda => Ok(Box::new(LdaModel::fit(corpus, vocabulary.len(), num_topics, seed, &self.lda)?)),
            ModelFamily::Nmf => Ok(Box::new(NmfModel::fit(corpus, vocabulary.len(), num_topics, seed, &self.nmf)?)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LdaConfig {
    pub max_iterations: usize,
    pub alpha: f64,  // Document-topic concentration
    pub beta: f64,   // Topic-word concentration
    pub minimum_probability: f64,
    pub inference_iterations: usize,
}

impl Default for LdaConfig {
    fn default() -> Self {
        LdaConfig {
            max_iterations: 200,
            alpha: 0.1,
            beta: 0.01,
            minimum_probability: 0.01,
            inference_iterations: 50,
        }
    }
}

pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Heaviest entries first, ties resolved by the lower id.
pub(crate) fn top_n(weights: &[f64], n: usize) -> Vec<(usize, f64)> {
    let mut ranked: Vec<(usize, f64)> = weights.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(n);
    ranked
}

pub(crate) fn check_fit_input(corpus_len: usize, vocab_size: usize, num_topics: usize) -> Result<()> {
    if num_topics == 0 {
        return Err(OptimizerError::InvalidTopicRange { start: 0, end: 0 });
    }
    if vocab_size == 0 {
        return Err(OptimizerError::EmptyVocabulary);
    }
    if corpus_len == 0 {
        return Err(OptimizerError::EmptyCorpus { filter: "{}".to_string() });
    }
    Ok(())
}

/// LDA fitted with collapsed Gibbs sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LdaModel {
    pub num_topics: usize,
    pub alpha: f64,
    pub beta: f64,
    pub minimum_probability: f64,
    pub inference_iterations: usize,
    pub topic_word_matrix: Vec<Vec<f64>>,  // Topics x Words
    pub fitted_at: DateTime<Utc>,
}

impl LdaModel {
    pub fn fit(
        corpus: &[EncodedDocument],
        vocab_size: usize,
        num_topics: usize,
        seed: Option<u64>,
        config: &LdaConfig,
    ) -> Result<Self> {
        check_fit_input(corpus.len(), vocab_size, num_topics)?;
        let mut rng = seeded_rng(seed);

        // Step 1: Expand the bags of words into token positions
        let word_docs: Vec<Vec<usize>> = corpus
            .iter()
            .map(|doc| {
                doc.terms
                    .iter()
                    .flat_map(|&(word_id, count)| std::iter::repeat(word_id).take(count))
                    .collect()
            })
            .collect();

        // Step 2: Random initialization
        let mut word_topic_counts = vec![vec![0usize; num_topics]; vocab_size];
        let mut doc_topic_counts = vec![vec![0usize; num_topics]; word_docs.len()];
        let mut topic_counts = vec![0usize; num_topics];
        let mut doc_word_topics: Vec<Vec<usize>> = Vec::with_capacity(word_docs.len());

        for (doc_id, doc) in word_docs.iter().enumerate() {
            let mut word_topics = Vec::with_capacity(doc.len());
            for &word_id in doc {
                let topic = rng.gen_range(0..num_topics);
                word_topic_counts[word_id][topic] += 1;
                doc_topic_counts[doc_id][topic] += 1;
                topic_counts[topic] += 1;
                word_topics.push(topic);
            }
            doc_word_topics.push(word_topics);
        }

        // Step 3: Gibbs sweeps
        let vocab_beta = vocab_size as f64 * config.beta;
        let mut cumulative = vec![0.0; num_topics];
        for _iteration in 0..config.max_iterations {
            for (doc_id, doc) in word_docs.iter().enumerate() {
                for (word_pos, &word_id) in doc.iter().enumerate() {
                    let old_topic = doc_word_topics[doc_id][word_pos];

                    // Remove current assignment
                    word_topic_counts[word_id][old_topic] -= 1;
                    doc_topic_counts[doc_id][old_topic] -= 1;
                    topic_counts[old_topic] -= 1;

                    let mut total = 0.0;
                    for topic in 0..num_topics {
                        total += (doc_topic_counts[doc_id][topic] as f64 + config.alpha)
                            * (word_topic_counts[word_id][topic] as f64 + config.beta)
                            / (topic_counts[topic] as f64 + vocab_beta);
                        cumulative[topic] = total;
                    }
                    let draw = rng.gen::<f64>() * total;
                    let new_topic = cumulative
                        .iter()
                        .position(|&bound| draw < bound)
                        .unwrap_or(num_topics - 1);

                    // Add new assignment
                    word_topic_counts[word_id][new_topic] += 1;
                    doc_topic_counts[doc_id][new_topic] += 1;
                    topic_counts[new_topic] += 1;
                    doc_word_topics[doc_id][word_pos] = new_topic;
                }
            }
        }

        // Step 4: Convert counts to probabilities
        let topic_word_matrix = (0..num_topics)
            .map(|topic| {
                (0..vocab_size)
                    .map(|word_id| {
                        (word_topic_counts[word_id][topic] as f64 + config.beta)
                            / (topic_counts[topic] as f64 + vocab_beta)
                    })
                    .collect()
            })
            .collect();

        log::debug!(
            "LDA with {} topics fitted on {} documents ({} sweeps)",
            num_topics,
            word_docs.len(),
            config.max_iterations
        );

        Ok(LdaModel {
            num_topics,
            alpha: config.alpha,
            beta: config.beta,
            minimum_probability: config.minimum_probability,
            inference_iterations: config.inference_iterations,
            topic_word_matrix,
            fitted_at: Utc::now(),
        })
    }

    /// Full topic mixture of a document, inferred against the fixed
    /// topic-word matrix.
    pub fn infer(&self, document: &EncodedDocument) -> Vec<f64> {
        let k = self.num_topics;
        let vocab_size = self.topic_word_matrix.first().map_or(0, |row| row.len());
        let mut gamma = vec![self.alpha + document.len() as f64 / k as f64; k];

        for _ in 0..self.inference_iterations {
            let mut next = vec![self.alpha; k];
            for &(word_id, count) in &document.terms {
                if word_id >= vocab_size {
                    continue;
                }
                let norm: f64 = (0..k).map(|t| self.topic_word_matrix[t][word_id] * gamma[t]).sum();
                if norm <= 0.0 {
                    continue;
                }
                for (t, value) in next.iter_mut().enumerate() {
                    *value += count as f64 * self.topic_word_matrix[t][word_id] * gamma[t] / norm;
                }
            }
            let change = next.iter().zip(&gamma).map(|(a, b)| (a - b).abs()).sum::<f64>() / k as f64;
            gamma = next;
            if change < 1e-6 {
                break;
            }
        }

        let total: f64 = gamma.iter().sum();
        gamma.into_iter().map(|value| value / total).collect()
    }
}

impl TopicModel for LdaModel {
    fn family(&self) -> ModelFamily {
        ModelFamily::Lda
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
        write_model(path, SavedModelRef::Lda(self))
    }
}

#[derive(Serialize)]
#[serde(tag = "family", rename_all = "lowercase")]
pub(crate) enum SavedModelRef<'a> {
    Lda(&'a LdaModel),
    Nmf(&'a NmfModel),
}

#[derive(Deserialize)]
#[serde(tag = "family", rename_all = "lowercase")]
enum SavedModel {
    Lda(LdaModel),
    Nmf(NmfModel),
}

pub(crate) fn write_model(path: &Path, model: SavedModelRef<'_>) -> Result<()> {
    write_model_to(File::create(path)?, model)
}

fn write_model_to<W: Write>(inner: W, model: SavedModelRef<'_>) -> Result<()> {
    let mut writer = BufWriter::new(inner);
    serde_json::to_writer(&mut writer, &model)?;
    writer.flush()?;
    Ok(())
}

/// Restores a model written by [`TopicModel::save`].
pub fn load_model(path: impl AsRef<Path>) -> Result<Box<dyn TopicModel>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(match serde_json::from_reader(reader)? {
        SavedModel::Lda(model) => Box::new(model),
        SavedModel::Nmf(model) => Box::new(model),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Two clearly separated themes, six documents each.
    pub(crate) fn two_theme_corpus() -> (Vocabulary, Vec<EncodedDocument>) {
        use crate::dataset::LemmaDocument;
        use crate::vocabulary::VocabularyOptions;

        let economy = ["tax", "economy", "work", "salary", "price"];
        let health = ["doctor", "hospital", "health", "nurse", "medicine"];
        let documents: Vec<LemmaDocument> = (0..12)
            .map(|i| {
                let theme = if i % 2 == 0 { &economy } else { &health };
                let lemmas = (0..8).map(|j| theme[(i + j) % theme.len()].to_string()).collect();
                LemmaDocument { row: i, lemmas }
            })
            .collect();
        let vocabulary = Vocabulary::build(&documents, &VocabularyOptions::default());
        let encoded = vocabulary.encode(&documents);
        (vocabulary, encoded)
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "no space left"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_final_write_is_reported() {
        let (vocabulary, corpus) = two_theme_corpus();
        let model = LdaModel::fit(&corpus, vocabulary.len(), 2, Some(3), &LdaConfig::default()).unwrap();
        let result = write_model_to(FullDisk, SavedModelRef::Lda(&model));
        assert!(result.is_err());
    }

    #[test]
    fn fitting_is_deterministic_with_a_seed() {
        let (vocabulary, corpus) = two_theme_corpus();
        let config = LdaConfig::default();
        let a = LdaModel::fit(&corpus, vocabulary.len(), 3, Some(7), &config).unwrap();
        let b = LdaModel::fit(&corpus, vocabulary.len(), 3, Some(7), &config).unwrap();
        assert_eq!(a.topic_word_matrix, b.topic_word_matrix);
        assert_eq!(a.document_topics(&corpus[0]), b.document_topics(&corpus[0]));
    }

    #[test]
    fn topic_word_rows_are_distributions() {
        let (vocabulary, corpus) = two_theme_corpus();
        let model = LdaModel::fit(&corpus, vocabulary.len(), 2, Some(1), &LdaConfig::default()).unwrap();
        for row in &model.topic_word_matrix {
            assert_eq!(row.len(), vocabulary.len());
            approx::assert_abs_diff_eq!(row.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        }
        let top = model.top_terms(0, 4);
        assert_eq!(top.len(), 4);
        assert!(top.windows(2).all(|w| w[0].1 >= w[1].1));
        assert_eq!(model.topic_words(&vocabulary, 3).len(), 2);
    }

    #[test]
    fn document_topics_respect_the_threshold() {
        let (vocabulary, corpus) = two_theme_corpus();
        let model = LdaModel::fit(&corpus, vocabulary.len(), 4, Some(3), &LdaConfig::default()).unwrap();
        for doc in &corpus {
            let full = model.infer(doc);
            approx::assert_abs_diff_eq!(full.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
            for (topic, probability) in model.document_topics(doc) {
                assert!(topic < 4);
                assert!(probability >= model.minimum_probability && probability <= 1.0);
            }
        }
    }

    #[test]
    fn rejects_degenerate_input() {
        let (vocabulary, corpus) = two_theme_corpus();
        let config = LdaConfig::default();
        assert!(LdaModel::fit(&corpus, vocabulary.len(), 0, None, &config).is_err());
        assert!(matches!(
            LdaModel::fit(&corpus, 0, 2, None, &config),
            Err(OptimizerError::EmptyVocabulary)
        ));
    }

    #[test]
    fn saved_models_load_back() {
        let (vocabulary, corpus) = two_theme_corpus();
        let config = ModelConfig::default();
        let model = config.fit(&corpus, &vocabulary, 2, Some(11)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        model.save(&path).unwrap();

        let restored = load_model(&path).unwrap();
        assert_eq!(restored.family(), ModelFamily::Lda);
        assert_eq!(restored.num_topics(), 2);
        for ((_, restored_terms), (_, terms)) in restored.topics(5).iter().zip(model.topics(5).iter()) {
            for ((restored_id, restored_weight), (id, weight)) in restored_terms.iter().zip(terms) {
                assert_eq!(restored_id, id);
                approx::assert_relative_eq!(*restored_weight, *weight, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn family_names() {
        assert_eq!("nmf".parse::<ModelFamily>().unwrap(), ModelFamily::Nmf);
        assert_eq!(ModelFamily::Lda.to_string(), "lda");
    }
}
