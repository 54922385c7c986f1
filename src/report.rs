use std::collections::HashMap;
use std::io::Write;

use counter::Counter;
use indexmap::IndexMap;
use serde::Serialize;

use crate::dataset::{LemmaDocument, Table};
use crate::error::{OptimizerError, Result};
use crate::naming::TopicNames;
use crate::topic_modeling::TopicModel;
use crate::vocabulary::{EncodedDocument, Vocabulary};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicWord {
    pub word: String,
    pub topic_id: usize,
    pub importance: f64,  // The model's own weight of the word in the topic
    pub word_count: usize, // Occurrences in the whole filtered corpus
}

/// Top words of every topic, heaviest first.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicWordTable {
    rows: Vec<TopicWord>,
}

impl TopicWordTable {
    pub fn build(model: &dyn TopicModel, vocabulary: &Vocabulary, documents: &[LemmaDocument], num_words: usize) -> Self {
        let counter: Counter<&str> = documents
            .iter()
            .flat_map(|doc| doc.lemmas.iter().map(|lemma| lemma.as_str()))
            .collect();

        let mut rows: Vec<TopicWord> = model
            .topics(num_words)
            .into_iter()
            .flat_map(|(topic_id, terms)| {
                let counter = &counter;
                terms.into_iter().filter_map(move |(word_id, weight)| {
                    let word = vocabulary.token(word_id)?;
                    Some(TopicWord {
                        word: word.to_string(),
                        topic_id,
                        importance: weight,
                        word_count: counter.get(word).copied().unwrap_or(0),
                    })
                })
            })
            .collect();

        rows.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        TopicWordTable { rows }
    }

    pub fn rows(&self) -> &[TopicWord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn for_topic(&self, topic_id: usize) -> impl Iterator<Item = &TopicWord> {
        self.rows.iter().filter(move |row| row.topic_id == topic_id)
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        for row in &self.rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round_ties_even() / 10_000.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentTopicRow {
    pub index: usize,
    pub values: Vec<String>,
    pub probabilities: Vec<f64>,
}

/// The filtered rows with one probability column per topic appended.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentTopicTable {
    columns: Vec<String>,
    num_topics: usize,
    rows: Vec<DocumentTopicRow>,
}

impl DocumentTopicTable {
    pub fn build(model: &dyn TopicModel, data: &Table, corpus: &[EncodedDocument]) -> Self {
        let num_topics = model.num_topics();
        let by_row: HashMap<usize, &EncodedDocument> = corpus.iter().map(|doc| (doc.row, doc)).collect();

        let rows = data
            .rows()
            .iter()
            .map(|row| {
                let mut probabilities = vec![0.0; num_topics];
                match by_row.get(&row.index) {
                    Some(doc) => {
                        for (topic_id, probability) in model.document_topics(doc) {
                            if topic_id < num_topics {
                                probabilities[topic_id] = round4(probability);
                            }
                        }
                    }
                    None => log::warn!("Row {} has no encoded document", row.index),
                }
                DocumentTopicRow {
                    index: row.index,
                    values: row.values.clone(),
                    probabilities,
                }
            })
            .collect();

        DocumentTopicTable {
            columns: data.columns().to_vec(),
            num_topics,
            rows,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn num_topics(&self) -> usize {
        self.num_topics
    }

    pub fn rows(&self) -> &[DocumentTopicRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| OptimizerError::UnknownColumn(name.to_string()))
    }
}

/// One flattened row of topic probabilities per group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupAggregatedTable {
    pub column: String,
    pub index: Vec<String>,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<f64>>,
    pub dropped: Vec<String>,  // Groups left out because their size differs
}

impl GroupAggregatedTable {
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        let mut header = vec![self.column.clone()];
        header.extend(self.headers.iter().cloned());
        wtr.write_record(&header)?;
        for (group, values) in self.index.iter().zip(&self.rows) {
            let mut record = vec![group.clone()];
            record.extend(values.iter().map(|v| v.to_string()));
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Flattens the topic probabilities of every group into a single row.
///
/// All groups must have as many rows as the largest group. Smaller groups are
/// dropped with a warning instead of being padded.
pub fn aggregate_by_column(
    table: &DocumentTopicTable,
    column: &str,
    topic_names: Option<&TopicNames>,
) -> Result<GroupAggregatedTable> {
    let column_idx = table.column_index(column)?;
    let num_topics = table.num_topics();

    let mut groups: IndexMap<&str, Vec<&DocumentTopicRow>> = IndexMap::new();
    for row in table.rows() {
        groups.entry(row.values[column_idx].as_str()).or_default().push(row);
    }
    let rows_by_group = groups.values().map(|members| members.len()).max().unwrap_or(0);

    let mut index = Vec::new();
    let mut rows = Vec::new();
    let mut dropped = Vec::new();
    for (value, members) in &groups {
        if members.len() != rows_by_group {
            log::warn!("{column} - {value} has missing rows!");
            dropped.push(value.to_string());
            continue;
        }
        rows.push(
            members
                .iter()
                .flat_map(|member| member.probabilities.iter().copied())
                .collect::<Vec<f64>>(),
        );
        index.push(value.to_string());
    }

    let width = num_topics * rows_by_group;
    let headers = match topic_names {
        Some(names) if rows_by_group == 1 => (0..width).map(|j| names.name(j % num_topics)).collect(),
        Some(names) => (0..width)
            .map(|j| format!("{}_{}", names.name(j % num_topics), j / num_topics))
            .collect(),
        None => (0..width).map(|j| j.to_string()).collect(),
    };

    Ok(GroupAggregatedTable {
        column: column.to_string(),
        index,
        headers,
        rows,
        dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::ManualNames;
    use crate::sweep::tests::FixedModel;
    use crate::topic_modeling::tests::two_theme_corpus;
    use crate::topic_modeling::{LdaConfig, LdaModel};
    use crate::vocabulary::VocabularyOptions;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn mixture_table(groups: &[(&str, usize)], num_topics: usize) -> DocumentTopicTable {
        let mut rows = Vec::new();
        for (country, size) in groups {
            for member in 0..*size {
                let index = rows.len();
                rows.push(DocumentTopicRow {
                    index,
                    values: vec![country.to_string(), member.to_string()],
                    probabilities: (0..num_topics).map(|t| round4((index * num_topics + t) as f64 / 100.0)).collect(),
                });
            }
        }
        DocumentTopicTable {
            columns: strings(&["country", "year"]),
            num_topics,
            rows,
        }
    }

    #[test]
    fn groups_of_unequal_size_are_dropped() {
        let table = mixture_table(&[("Poland", 3), ("Spain", 3), ("Malta", 2)], 4);
        let aggregated = aggregate_by_column(&table, "country", None).unwrap();

        assert_eq!(aggregated.index, strings(&["Poland", "Spain"]));
        assert_eq!(aggregated.dropped, strings(&["Malta"]));
        assert_eq!(aggregated.headers.len(), 12);
        assert_eq!(aggregated.headers[11], "11");
        for row in &aggregated.rows {
            assert_eq!(row.len(), 3 * 4);
        }
        // Member rows are concatenated in order
        let expected: Vec<f64> = (0..12).map(|i| round4(i as f64 / 100.0)).collect();
        assert_eq!(aggregated.rows[0], expected);
    }

    #[test]
    fn display_names_become_headers() {
        let mut names = TopicNames::new(2);
        names
            .update(ManualNames::from(vec!["Economy".to_string(), "Health".to_string()]))
            .unwrap();

        let single = mixture_table(&[("Poland", 1), ("Spain", 1)], 2);
        let aggregated = aggregate_by_column(&single, "country", Some(&names)).unwrap();
        assert_eq!(aggregated.headers, strings(&["Economy", "Health"]));

        let double = mixture_table(&[("Poland", 2), ("Spain", 2)], 2);
        let aggregated = aggregate_by_column(&double, "country", Some(&names)).unwrap();
        assert_eq!(aggregated.headers, strings(&["Economy_0", "Health_0", "Economy_1", "Health_1"]));
    }

    #[test]
    fn unknown_group_column_fails() {
        let table = mixture_table(&[("Poland", 1)], 2);
        assert!(matches!(
            aggregate_by_column(&table, "region", None),
            Err(OptimizerError::UnknownColumn(_))
        ));
    }

    fn lemma_docs(raw: &[&[&str]]) -> Vec<LemmaDocument> {
        raw.iter()
            .enumerate()
            .map(|(row, tokens)| LemmaDocument {
                row,
                lemmas: strings(tokens),
            })
            .collect()
    }

    #[test]
    fn topic_words_have_num_words_per_topic_sorted_by_importance() {
        let (vocabulary, corpus) = two_theme_corpus();
        let model = LdaModel::fit(&corpus, vocabulary.len(), 3, Some(9), &LdaConfig::default()).unwrap();
        let docs = lemma_docs(&[&["tax", "tax", "doctor"]]);

        let table = TopicWordTable::build(&model, &vocabulary, &docs, 10);
        assert_eq!(table.len(), 10 * 3);
        assert!(table.rows().windows(2).all(|w| w[0].importance >= w[1].importance));
        for topic in 0..3 {
            assert_eq!(table.for_topic(topic).count(), 10);
        }
        let tax = table.rows().iter().find(|row| row.word == "tax").unwrap();
        assert_eq!(tax.word_count, 2);
        let salary = table.rows().iter().find(|row| row.word == "salary").unwrap();
        assert_eq!(salary.word_count, 0);

        // Rebuilding yields the same bytes
        let mut first = Vec::new();
        let mut second = Vec::new();
        table.write_csv(&mut first).unwrap();
        TopicWordTable::build(&model, &vocabulary, &docs, 10).write_csv(&mut second).unwrap();
        assert_eq!(first, second);
        assert!(String::from_utf8(first).unwrap().starts_with("word,topic_id,importance,word_count\n"));
    }

    #[test]
    fn document_topics_are_rounded_and_zero_filled() {
        let data = Table::new(
            strings(&["country", "lemmas"]),
            vec![strings(&["Poland", "tax work"]), strings(&["Spain", "health"])],
        )
        .unwrap();
        let docs = lemma_docs(&[&["tax", "work"], &["health"]]);
        let vocabulary = Vocabulary::build(&docs, &VocabularyOptions::default());
        let corpus = vocabulary.encode(&docs);

        let model = FixedModel { num_topics: 3, vocab_size: vocabulary.len() };
        let table = DocumentTopicTable::build(&model, &data, &corpus);
        assert_eq!(table.len(), data.len());
        for row in table.rows() {
            assert_eq!(row.probabilities, vec![1.0, 0.0, 0.0]);
        }

        let (vocabulary, corpus) = two_theme_corpus();
        let rows: Vec<Vec<String>> = corpus.iter().map(|doc| vec![doc.row.to_string()]).collect();
        let data = Table::new(strings(&["id"]), rows).unwrap();
        let model = LdaModel::fit(&corpus, vocabulary.len(), 3, Some(4), &LdaConfig::default()).unwrap();
        let table = DocumentTopicTable::build(&model, &data, &corpus);
        assert_eq!(table.len(), corpus.len());
        for row in table.rows() {
            for &p in &row.probabilities {
                assert!((0.0..=1.0).contains(&p));
                assert_eq!(round4(p), p);
            }
        }
    }

    #[test]
    fn rounding_to_four_places() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(0.99996), 1.0);
        assert_eq!(round4(0.0), 0.0);
        assert_eq!(round4(0.03125), 0.0312);
        assert_eq!(round4(0.28125), 0.2812);
    }
}
