//! Picks the most coherent number of topics for a corpus of lemmatised
//! documents and turns the winning model into reports, group mappings and
//! topic titles.

pub mod artifacts;
pub mod coherence;
pub mod completion;
pub mod config;
pub mod dataset;
pub mod error;
pub mod naming;
pub mod nmf;
pub mod optimizer;
pub mod projection;
pub mod report;
pub mod sweep;
pub mod topic_modeling;
pub mod tsne;
pub mod umap;
pub mod vocabulary;

pub use artifacts::{export_app_data, ExportedFiles};
pub use coherence::{CoherenceMetric, CoherenceScorer, WindowCoherence};
pub use completion::{OpenAiCompletion, TextCompletion};
pub use config::{AppExportConfig, ColumnFilter, NamingConfig, OptimizerConfig, Settings, TopicRange};
pub use dataset::Table;
pub use error::{OptimizerError, Result, TopicNamesError};
pub use naming::{ManualNames, TopicNames};
pub use optimizer::ModelOptimizer;
pub use projection::{ProjectionTable, Projector};
pub use report::{DocumentTopicTable, GroupAggregatedTable, TopicWordTable};
pub use sweep::CoherenceTable;
pub use topic_modeling::{load_model, ModelConfig, ModelFactory, ModelFamily, TopicModel};
pub use tsne::Tsne;
pub use umap::Umap;
pub use vocabulary::Vocabulary;
