use std::collections::BTreeSet;
use thiserror::Error;

/// Everything that can abort a sweep, a report or a naming pass.
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("The column '{0}' does not exist in the data set!")]
    UnknownColumn(String),
    #[error("Row {row} has {found} cells, but the header has {expected}!")]
    RaggedRow { row: usize, expected: usize, found: usize },
    #[error("No rows are left after applying the filter {filter}!")]
    EmptyCorpus { filter: String },
    #[error("The filtered documents do not contain a single token!")]
    EmptyVocabulary,
    #[error("The topic range {start}..{end} does not contain a valid topic count!")]
    InvalidTopicRange { start: usize, end: usize },
    #[error("No topic count has a usable coherence score!")]
    NoCoherenceScores,
    #[error("There is no fitted model for {0} topics!")]
    MissingModel(usize),
    #[error("Projection with {method} failed: {reason}")]
    Projection { method: &'static str, reason: String },
    #[error("The completion service answered with {status}: {message}")]
    Completion { status: u16, message: String },
    #[error("The completion service returned no title for topic {topic_id}!")]
    EmptyTitle { topic_id: usize },
    #[error("No credential for the completion service was supplied!")]
    MissingCredential,
}

/// A rejected manual rename. The topic name map stays untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicNamesError {
    #[error("Topic names not updated: expected topics {expected:?}, but the update results in {found:?}")]
    KeySetMismatch {
        expected: BTreeSet<usize>,
        found: BTreeSet<usize>,
    },
}

pub type Result<T> = std::result::Result<T, OptimizerError>;
