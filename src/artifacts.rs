use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{AppExportConfig, ColumnFilter};
use crate::error::Result;
use crate::optimizer::ModelOptimizer;
use crate::vocabulary::{EncodedDocument, Vocabulary};

/// `{dir}/{label}_{filter values}`, spaces in the values replaced by `_`.
pub fn artifact_prefix(dir: &Path, label: &str, filter: &ColumnFilter) -> PathBuf {
    let filter_name = filter
        .values()
        .map(|value| value.replace(' ', "_"))
        .collect::<Vec<_>>()
        .join("_");
    dir.join(format!("{label}_{filter_name}"))
}

pub(crate) fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push("_");
    name.push(suffix);
    PathBuf::from(name)
}

#[derive(Serialize)]
struct EncodedDocRecord {
    row: usize,
    bow: String,
}

pub fn write_encoded_docs(path: &Path, corpus: &[EncodedDocument]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(BufWriter::new(File::create(path)?));
    for doc in corpus {
        wtr.serialize(EncodedDocRecord {
            row: doc.row,
            bow: serde_json::to_string(&doc.terms)?,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct DictionaryRecord<'a> {
    id: usize,
    token: &'a str,
    document_frequency: usize,
}

pub fn write_dictionary(path: &Path, vocabulary: &Vocabulary) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(BufWriter::new(File::create(path)?));
    for (id, token) in vocabulary.iter() {
        wtr.serialize(DictionaryRecord {
            id,
            token,
            document_frequency: vocabulary.document_frequency(id),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

/// Paths written by [`export_app_data`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFiles {
    pub encoded_docs: PathBuf,
    pub dictionary: PathBuf,
    pub model: PathBuf,
    pub topic_words: PathBuf,
    pub probs: PathBuf,
    pub mapping: PathBuf,
}

impl ExportedFiles {
    fn from_prefix(prefix: &Path) -> Self {
        ExportedFiles {
            encoded_docs: with_suffix(prefix, "encoded_docs.csv"),
            dictionary: with_suffix(prefix, "dictionary.csv"),
            model: with_suffix(prefix, "model.json"),
            topic_words: with_suffix(prefix, "topic_words.csv"),
            probs: with_suffix(prefix, "probs.csv"),
            mapping: with_suffix(prefix, "mapping.csv"),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        [
            &self.encoded_docs,
            &self.dictionary,
            &self.model,
            &self.topic_words,
            &self.probs,
            &self.mapping,
        ]
        .into_iter()
        .map(|path| path.as_path())
    }
}

/// Writes everything a viewer needs: the saved session, the topic words,
/// the per-group probabilities and both 2-D mappings side by side.
pub fn export_app_data(optimizer: &ModelOptimizer, config: &AppExportConfig) -> Result<ExportedFiles> {
    fs::create_dir_all(&config.path)?;
    let topic_words = optimizer.topics_table(config.num_words)?;
    let groups = optimizer.topic_probs_by_column(&config.column, false)?;

    let prefix = optimizer.save(&config.path, &config.label)?;
    let files = ExportedFiles::from_prefix(&prefix);
    topic_words.write_csv(BufWriter::new(File::create(&files.topic_words)?))?;
    groups.write_csv(BufWriter::new(File::create(&files.probs)?))?;

    let mapping = optimizer
        .tsne_mapping(&config.column, &config.tsne)?
        .join(optimizer.umap_mapping(&config.column, &config.umap)?)?;
    mapping.write_csv(BufWriter::new(File::create(&files.mapping)?))?;

    log::info!("Exported app data for {} groups to {}", groups.index.len(), config.path.display());
    Ok(files)
}
