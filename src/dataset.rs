use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use csv::ReaderBuilder;
use regex::Regex;

use crate::config::ColumnFilter;
use crate::error::{OptimizerError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub index: usize,        // Position of the row in the source data set
    pub values: Vec<String>,
}

/// String-celled table. Rows remember where they came from, so filtering
/// never loses the link to the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

/// The lemmas of one retained row after removing excluded words.
#[derive(Debug, Clone, PartialEq)]
pub struct LemmaDocument {
    pub row: usize,
    pub lemmas: Vec<String>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self> {
        let expected = columns.len();
        let rows = rows
            .into_iter()
            .enumerate()
            .map(|(index, values)| {
                if values.len() != expected {
                    return Err(OptimizerError::RaggedRow {
                        row: index,
                        expected,
                        found: values.len(),
                    });
                }
                Ok(Row { index, values })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Table { columns, rows })
    }

    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_reader(File::open(path)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
        let columns: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            rows.push(record.iter().map(|cell| cell.to_string()).collect());
        }
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
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

    /// Keeps the rows whose filter columns all equal the required values.
    pub fn filter(&self, filter: &ColumnFilter) -> Result<Table> {
        let conditions: Vec<(usize, &str)> = filter
            .iter()
            .map(|(column, value)| Ok((self.column_index(column)?, value.as_str())))
            .collect::<Result<_>>()?;

        let rows = self
            .rows
            .iter()
            .filter(|row| conditions.iter().all(|(i, value)| row.values[*i] == *value))
            .cloned()
            .collect();

        Ok(Table {
            columns: self.columns.clone(),
            rows,
        })
    }
}

pub fn describe_filter(filter: &ColumnFilter) -> String {
    if filter.is_empty() {
        return "{}".to_string();
    }
    filter
        .iter()
        .map(|(column, value)| format!("{column}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn quoted_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"'([^']*)'|"([^"]*)""#).unwrap())
}

/// Reads a lemma cell. Accepts a JSON array, a Python list literal or plain
/// whitespace separated tokens.
pub fn parse_lemmas(cell: &str) -> Vec<String> {
    let cell = cell.trim();
    if cell.starts_with('[') && cell.ends_with(']') {
        if let Ok(tokens) = serde_json::from_str::<Vec<String>>(cell) {
            return tokens;
        }
        return quoted_token_re()
            .captures_iter(cell)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str().to_string())
            .collect();
    }
    cell.split_whitespace().map(|token| token.to_string()).collect()
}

pub fn filtered_lemmas(table: &Table, lemma_column: &str, words_to_remove: &[String]) -> Result<Vec<LemmaDocument>> {
    let column = table.column_index(lemma_column)?;
    let excluded: HashSet<&str> = words_to_remove.iter().map(|w| w.as_str()).collect();

    Ok(table
        .rows()
        .iter()
        .map(|row| LemmaDocument {
            row: row.index,
            lemmas: parse_lemmas(&row.values[column])
                .into_iter()
                .filter(|lemma| !excluded.contains(lemma.as_str()))
                .collect(),
        })
        .collect())
}
