use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::coherence::CoherenceMetric;
use crate::error::{OptimizerError, Result};
use crate::topic_modeling::ModelConfig;
use crate::tsne::Tsne;
use crate::umap::Umap;
use crate::vocabulary::VocabularyOptions;

/// Exact-match filter, column name to required value. Insertion order matters
/// for artifact names.
pub type ColumnFilter = IndexMap<String, String>;

/// Half-open range of candidate topic counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRange {
    pub start: usize,
    pub end: usize,
}

impl TopicRange {
    pub fn new(start: usize, end: usize) -> Self {
        TopicRange { start, end }
    }

    pub fn iter(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn validate(&self) -> Result<()> {
        if self.start == 0 || self.start >= self.end {
            return Err(OptimizerError::InvalidTopicRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

impl Default for TopicRange {
    fn default() -> Self {
        TopicRange { start: 2, end: 11 }
    }
}

impl fmt::Display for TopicRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl FromStr for TopicRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (start, end) = s
            .split_once("..")
            .or_else(|| s.split_once(':'))
            .ok_or_else(|| format!("expected START..END, got '{s}'"))?;
        let start = start.trim().parse::<usize>().map_err(|e| e.to_string())?;
        let end = end.trim().parse::<usize>().map_err(|e| e.to_string())?;
        Ok(TopicRange { start, end })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub lemma_column: String,
    pub column_filter: ColumnFilter,
    pub words_to_remove: Vec<String>,
    pub model: ModelConfig,
    pub topic_numbers_range: TopicRange,
    pub coherence_measure: CoherenceMetric,
    pub coherence_num_words: usize, // Words per topic used only for scoring
    pub random_state: Option<u64>,
    pub vocabulary: VocabularyOptions,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            lemma_column: "lemmas".to_string(),
            column_filter: ColumnFilter::new(),
            words_to_remove: Vec::new(),
            model: ModelConfig::default(),
            topic_numbers_range: TopicRange::default(),
            coherence_measure: CoherenceMetric::Cv,
            coherence_num_words: 20,
            random_state: None,
            vocabulary: VocabularyOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppExportConfig {
    pub num_words: usize,
    pub column: String,
    pub tsne: Tsne,
    pub umap: Umap,
    pub path: PathBuf,
    pub label: String,
}

impl Default for AppExportConfig {
    fn default() -> Self {
        AppExportConfig {
            num_words: 10,
            column: "country".to_string(),
            tsne: Tsne {
                perplexity: 10.0,
                ..Tsne::default()
            },
            umap: Umap::default(),
            path: PathBuf::new(),
            label: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub num_keywords: usize,
    pub model: String,
    pub temperature: f64,
}

impl Default for NamingConfig {
    fn default() -> Self {
        NamingConfig {
            num_keywords: 15,
            model: "gpt-3.5-turbo-instruct".to_string(),
            temperature: 0.5,
        }
    }
}

/// Root of a JSON settings file. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub optimizer: OptimizerConfig,
    pub export: AppExportConfig,
    pub naming: NamingConfig,
}

impl Settings {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
