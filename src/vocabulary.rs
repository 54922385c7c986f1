use std::collections::{HashMap, HashSet};

use counter::Counter;
use serde::{Deserialize, Serialize};

use crate::dataset::LemmaDocument;

/// Optional frequency pruning applied while building the vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyOptions {
    pub no_below: Option<usize>, // Minimum number of documents a token must appear in
    pub no_above: Option<f64>,   // Maximum share of documents a token may appear in
    pub keep_n: Option<usize>,   // Keep only the n most document-frequent tokens
}

impl VocabularyOptions {
    fn prunes(&self) -> bool {
        self.no_below.is_some() || self.no_above.is_some() || self.keep_n.is_some()
    }
}

/// Sparse bag of words for one source row, `(token id, count)` sorted by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedDocument {
    pub row: usize,
    pub terms: Vec<(usize, usize)>,
}

impl EncodedDocument {
    pub fn len(&self) -> usize {
        self.terms.iter().map(|(_, count)| count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    id2token: Vec<String>,
    token2id: HashMap<String, usize>,
    dfs: Vec<usize>,  // Number of documents containing each token
    num_docs: usize,
}

impl Vocabulary {
    pub fn build(documents: &[LemmaDocument], options: &VocabularyOptions) -> Self {
        let mut id2token: Vec<String> = Vec::new();
        let mut token2id: HashMap<String, usize> = HashMap::new();
        let mut dfs: Vec<usize> = Vec::new();

        for doc in documents {
            let mut seen: HashSet<usize> = HashSet::new();
            for token in &doc.lemmas {
                let id = match token2id.get(token) {
                    Some(&id) => id,
                    None => {
                        let id = id2token.len();
                        id2token.push(token.clone());
                        token2id.insert(token.clone(), id);
                        dfs.push(0);
                        id
                    }
                };
                if seen.insert(id) {
                    dfs[id] += 1;
                }
            }
        }

        let vocabulary = Vocabulary {
            id2token,
            token2id,
            dfs,
            num_docs: documents.len(),
        };

        if options.prunes() {
            vocabulary.pruned(options)
        } else {
            vocabulary
        }
    }

    fn pruned(self, options: &VocabularyOptions) -> Self {
        let max_df = options
            .no_above
            .map(|share| share * self.num_docs as f64)
            .unwrap_or(f64::INFINITY);
        let min_df = options.no_below.unwrap_or(0);

        let mut kept: Vec<usize> = (0..self.id2token.len())
            .filter(|&id| self.dfs[id] >= min_df && self.dfs[id] as f64 <= max_df)
            .collect();

        if let Some(keep_n) = options.keep_n {
            kept.sort_by(|a, b| self.dfs[*b].cmp(&self.dfs[*a]).then(a.cmp(b)));
            kept.truncate(keep_n);
            kept.sort_unstable();
        }

        let before = self.id2token.len();
        let id2token: Vec<String> = kept.iter().map(|&id| self.id2token[id].clone()).collect();
        let dfs: Vec<usize> = kept.iter().map(|&id| self.dfs[id]).collect();
        let token2id = id2token
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id))
            .collect();

        log::debug!("Vocabulary pruned from {} to {} tokens", before, id2token.len());

        Vocabulary {
            id2token,
            token2id,
            dfs,
            num_docs: self.num_docs,
        }
    }

    pub fn len(&self) -> usize {
        self.id2token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id2token.is_empty()
    }

    pub fn num_docs(&self) -> usize {
        self.num_docs
    }

    pub fn id(&self, token: &str) -> Option<usize> {
        self.token2id.get(token).copied()
    }

    pub fn token(&self, id: usize) -> Option<&str> {
        self.id2token.get(id).map(|t| t.as_str())
    }

    pub fn document_frequency(&self, id: usize) -> usize {
        self.dfs.get(id).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.id2token.iter().enumerate().map(|(id, token)| (id, token.as_str()))
    }

    /// Counts the known tokens of a document. Unknown tokens are skipped.
    pub fn doc2bow(&self, tokens: &[String]) -> Vec<(usize, usize)> {
        let counts: Counter<usize> = tokens.iter().filter_map(|token| self.id(token)).collect();
        let mut bow: Vec<(usize, usize)> = counts.into_iter().collect();
        bow.sort_unstable();
        bow
    }

    pub fn encode(&self, documents: &[LemmaDocument]) -> Vec<EncodedDocument> {
        documents
            .iter()
            .map(|doc| EncodedDocument {
                row: doc.row,
                terms: self.doc2bow(&doc.lemmas),
            })
            .collect()
    }
}
