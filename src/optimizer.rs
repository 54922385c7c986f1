use std::path::{Path, PathBuf};

use crate::artifacts;
use crate::coherence::{CoherenceScorer, WindowCoherence};
use crate::completion::TextCompletion;
use crate::config::{NamingConfig, OptimizerConfig};
use crate::dataset::{describe_filter, filtered_lemmas, LemmaDocument, Table};
use crate::error::{OptimizerError, Result, TopicNamesError};
use crate::naming::{self, ManualNames, TopicNames};
use crate::projection::{ProjectionTable, Projector};
use crate::report::{aggregate_by_column, DocumentTopicTable, GroupAggregatedTable, TopicWordTable};
use crate::sweep::{get_coherences, get_models, CandidateModels, CoherenceTable};
use crate::topic_modeling::{ModelFactory, TopicModel};
use crate::tsne::Tsne;
use crate::umap::Umap;
use crate::vocabulary::{EncodedDocument, Vocabulary};

/// One sweep over a filtered data set and everything derived from it.
///
/// Construction runs the whole sweep; afterwards the session only answers
/// queries, except for the topic names which can be changed.
pub struct ModelOptimizer {
    config: OptimizerConfig,
    data: Table,
    documents: Vec<LemmaDocument>,
    vocabulary: Vocabulary,
    corpus: Vec<EncodedDocument>,
    models: CandidateModels,
    coherences: CoherenceTable,
    topics_num: usize,
    topic_names: TopicNames,
}

impl ModelOptimizer {
    /// Sweeps with the configured model family and window based coherence.
    pub fn new(data: &Table, config: OptimizerConfig) -> Result<Self> {
        let factory = config.model.clone();
        Self::with_collaborators(data, config, &factory, &WindowCoherence::default())
    }

    pub fn with_collaborators(
        data: &Table,
        config: OptimizerConfig,
        factory: &dyn ModelFactory,
        scorer: &dyn CoherenceScorer,
    ) -> Result<Self> {
        config.topic_numbers_range.validate()?;

        // Step 1: Keep the rows matching the filter and read their lemmas
        let data = data.filter(&config.column_filter)?;
        if data.is_empty() {
            return Err(OptimizerError::EmptyCorpus {
                filter: describe_filter(&config.column_filter),
            });
        }
        let documents = filtered_lemmas(&data, &config.lemma_column, &config.words_to_remove)?;
        log::info!("{} documents left after filtering with {}", documents.len(), describe_filter(&config.column_filter));

        // Step 2: Build the vocabulary and encode every document
        let vocabulary = Vocabulary::build(&documents, &config.vocabulary);
        if vocabulary.is_empty() {
            return Err(OptimizerError::EmptyVocabulary);
        }
        let corpus = vocabulary.encode(&documents);
        log::info!("Vocabulary holds {} tokens", vocabulary.len());

        // Step 3: Fit one model per candidate topic count
        let models = get_models(&corpus, &vocabulary, factory, config.topic_numbers_range, config.random_state)?;

        // Step 4: Score every candidate and pick the most coherent one
        let texts: Vec<Vec<String>> = documents.iter().map(|doc| doc.lemmas.clone()).collect();
        let coherences = get_coherences(
            &models,
            &texts,
            &vocabulary,
            scorer,
            config.coherence_measure,
            config.coherence_num_words,
        )?;
        let topics_num = coherences.best_topic_count()?;
        log::info!("Best number of topics: {}", topics_num);

        Ok(ModelOptimizer {
            config,
            data,
            documents,
            vocabulary,
            corpus,
            models,
            coherences,
            topics_num,
            topic_names: TopicNames::new(topics_num),
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// The rows that survived the filter.
    pub fn data(&self) -> &Table {
        &self.data
    }

    pub fn documents(&self) -> &[LemmaDocument] {
        &self.documents
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn corpus(&self) -> &[EncodedDocument] {
        &self.corpus
    }

    pub fn models(&self) -> &CandidateModels {
        &self.models
    }

    pub fn model(&self, num_topics: usize) -> Result<&dyn TopicModel> {
        self.models
            .get(&num_topics)
            .map(|model| model.as_ref())
            .ok_or(OptimizerError::MissingModel(num_topics))
    }

    pub fn best_model(&self) -> Result<&dyn TopicModel> {
        self.model(self.topics_num)
    }

    pub fn coherences(&self) -> &CoherenceTable {
        &self.coherences
    }

    pub fn topics_num(&self) -> usize {
        self.topics_num
    }

    pub fn topic_names(&self) -> &TopicNames {
        &self.topic_names
    }

    pub fn topics_table(&self, num_words: usize) -> Result<TopicWordTable> {
        Ok(TopicWordTable::build(self.best_model()?, &self.vocabulary, &self.documents, num_words))
    }

    pub fn topic_probs(&self) -> Result<DocumentTopicTable> {
        Ok(DocumentTopicTable::build(self.best_model()?, &self.data, &self.corpus))
    }

    pub fn topic_probs_by_column(&self, column: &str, show_names: bool) -> Result<GroupAggregatedTable> {
        let names = show_names.then_some(&self.topic_names);
        aggregate_by_column(&self.topic_probs()?, column, names)
    }

    fn mapping(&self, column: &str, projector: &dyn Projector) -> Result<ProjectionTable> {
        let groups = self.topic_probs_by_column(column, false)?;
        ProjectionTable::project(&groups, projector, self.config.random_state)
    }

    pub fn tsne_mapping(&self, column: &str, tsne: &Tsne) -> Result<ProjectionTable> {
        self.mapping(column, tsne)
    }

    pub fn umap_mapping(&self, column: &str, umap: &Umap) -> Result<ProjectionTable> {
        self.mapping(column, umap)
    }

    /// Writes the encoded documents, the vocabulary and the best model.
    /// Returns the common path prefix of the written files.
    pub fn save(&self, dir: impl AsRef<Path>, label: &str) -> Result<PathBuf> {
        let prefix = artifacts::artifact_prefix(dir.as_ref(), label, &self.config.column_filter);
        artifacts::write_encoded_docs(&artifacts::with_suffix(&prefix, "encoded_docs.csv"), &self.corpus)?;
        artifacts::write_dictionary(&artifacts::with_suffix(&prefix, "dictionary.csv"), &self.vocabulary)?;
        self.best_model()?.save(&artifacts::with_suffix(&prefix, "model.json"))?;
        log::info!("Saved the best model to {}_*", prefix.display());
        Ok(prefix)
    }

    /// Asks `completion` for a title per topic. The names change only when
    /// every topic got a title; any failure leaves the previous names.
    pub fn name_topics_automatically(&mut self, completion: &dyn TextCompletion, config: &NamingConfig) -> Result<()> {
        let keywords = self.topics_table(config.num_keywords)?;
        let mut names = self.topic_names.clone();
        naming::name_topics_automatically(&mut names, &keywords, completion, config)?;
        self.topic_names = names;
        Ok(())
    }

    /// Applies a manual rename. A rename that would add topics is refused
    /// with a warning and leaves the names untouched.
    pub fn name_topics_manually(&mut self, names: impl Into<ManualNames>) -> std::result::Result<(), TopicNamesError> {
        self.topic_names.update(names).inspect_err(|err| log::warn!("{err}"))
    }
}
