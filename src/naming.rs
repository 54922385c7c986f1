use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::completion::TextCompletion;
use crate::config::NamingConfig;
use crate::error::{OptimizerError, Result, TopicNamesError};
use crate::report::TopicWordTable;

/// Display label per topic. The set of topic ids is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicNames {
    names: BTreeMap<usize, String>,
}

/// A manual rename, either positional or keyed by topic id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualNames {
    Ordered(Vec<String>),
    Mapping(BTreeMap<usize, String>),
}

impl ManualNames {
    fn into_map(self) -> BTreeMap<usize, String> {
        match self {
            ManualNames::Ordered(names) => names.into_iter().enumerate().collect(),
            ManualNames::Mapping(names) => names,
        }
    }
}

impl From<Vec<String>> for ManualNames {
    fn from(names: Vec<String>) -> Self {
        ManualNames::Ordered(names)
    }
}

impl From<BTreeMap<usize, String>> for ManualNames {
    fn from(names: BTreeMap<usize, String>) -> Self {
        ManualNames::Mapping(names)
    }
}

impl From<HashMap<usize, String>> for ManualNames {
    fn from(names: HashMap<usize, String>) -> Self {
        ManualNames::Mapping(names.into_iter().collect())
    }
}

impl TopicNames {
    /// Every topic is named after its own id.
    pub fn new(num_topics: usize) -> Self {
        TopicNames {
            names: (0..num_topics).map(|id| (id, id.to_string())).collect(),
        }
    }

    pub fn name(&self, topic_id: usize) -> String {
        self.names
            .get(&topic_id)
            .cloned()
            .unwrap_or_else(|| topic_id.to_string())
    }

    pub fn get(&self, topic_id: usize) -> Option<&str> {
        self.names.get(&topic_id).map(|name| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().map(|(id, name)| (*id, name.as_str()))
    }

    /// Merges the update into a copy and commits it only if no topic id was
    /// added.
    pub fn update(&mut self, names: impl Into<ManualNames>) -> std::result::Result<(), TopicNamesError> {
        let mut updated = self.names.clone();
        updated.extend(names.into().into_map());

        let expected: BTreeSet<usize> = self.names.keys().copied().collect();
        let found: BTreeSet<usize> = updated.keys().copied().collect();
        if expected != found {
            return Err(TopicNamesError::KeySetMismatch { expected, found });
        }
        self.names = updated;
        Ok(())
    }

    fn rename(&mut self, topic_id: usize, name: String) {
        if let Some(slot) = self.names.get_mut(&topic_id) {
            *slot = name;
        }
    }
}

pub fn generate_prompt(keywords: &[(&str, f64)], excluded: &[String]) -> String {
    let keywords_weights: Vec<String> = keywords
        .iter()
        .map(|(word, weight)| format!("{word}: {weight}"))
        .collect();
    let excluded_str = if excluded.is_empty() {
        String::new()
    } else {
        format!("different than: {} ", excluded.join(", "))
    };
    format!(
        "Generate short (maximum three words) title {excluded_str}based on given keywords and their importance: {}",
        keywords_weights.join(", ")
    )
}

fn surrounding_quotes_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^["'“”‘’]+|["'“”‘’]+$"#).unwrap())
}

/// The last non-empty line of a completion without surrounding quotes.
pub fn extract_title(response: &str) -> Option<String> {
    let line = response.lines().map(str::trim).filter(|line| !line.is_empty()).last()?;
    let title = surrounding_quotes_re().replace_all(line, "").trim().to_string();
    (!title.is_empty()).then_some(title)
}

/// Asks the completion service for one title per topic, in topic order.
/// Every prompt lists the titles handed out before it.
pub fn name_topics_automatically(
    names: &mut TopicNames,
    topic_words: &TopicWordTable,
    completion: &dyn TextCompletion,
    config: &NamingConfig,
) -> Result<()> {
    let topic_ids: Vec<usize> = names.iter().map(|(id, _)| id).collect();
    let mut excluded: Vec<String> = Vec::with_capacity(topic_ids.len());

    for topic_id in topic_ids {
        let keywords: Vec<(&str, f64)> = topic_words
            .for_topic(topic_id)
            .map(|row| (row.word.as_str(), row.importance))
            .collect();
        let prompt = generate_prompt(&keywords, &excluded);
        let response = completion.complete(&config.model, &prompt, config.temperature)?;
        let title = extract_title(&response).ok_or(OptimizerError::EmptyTitle { topic_id })?;

        log::info!("Topic {} named '{}'", topic_id, title);
        names.rename(topic_id, title.clone());
        excluded.push(title);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::sweep::tests::FixedModel;
    use crate::dataset::LemmaDocument;
    use crate::vocabulary::{Vocabulary, VocabularyOptions};

    #[test]
    fn identity_names() {
        let names = TopicNames::new(3);
        assert_eq!(names.iter().collect::<Vec<_>>(), vec![(0, "0"), (1, "1"), (2, "2")]);
        assert_eq!(names.name(7), "7");
    }

    #[test]
    fn update_introducing_a_topic_is_rejected() {
        let mut names = TopicNames::new(3);
        let update: BTreeMap<usize, String> =
            [(0, "Economy".to_string()), (3, "Invalid".to_string())].into_iter().collect();

        let err = names.update(update).unwrap_err();
        assert_eq!(
            err,
            TopicNamesError::KeySetMismatch {
                expected: [0, 1, 2].into_iter().collect(),
                found: [0, 1, 2, 3].into_iter().collect(),
            }
        );
        assert_eq!(names, TopicNames::new(3));
    }

    #[test]
    fn partial_update_keeps_other_names() {
        let mut names = TopicNames::new(3);
        let update: HashMap<usize, String> =
            [(0, "Economy".to_string()), (1, "Health".to_string())].into_iter().collect();
        names.update(update).unwrap();
        assert_eq!(
            names.iter().collect::<Vec<_>>(),
            vec![(0, "Economy"), (1, "Health"), (2, "2")]
        );
    }

    #[test]
    fn ordered_update_maps_by_position() {
        let mut names = TopicNames::new(2);
        names.update(vec!["Economy".to_string()]).unwrap();
        assert_eq!(names.get(0), Some("Economy"));
        assert_eq!(names.get(1), Some("1"));

        let too_many = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(names.update(too_many).is_err());
        assert_eq!(names.get(1), Some("1"));
    }

    #[test]
    fn prompt_wording() {
        let prompt = generate_prompt(&[("tax", 0.25), ("work", 0.125)], &[]);
        assert_eq!(
            prompt,
            "Generate short (maximum three words) title based on given keywords and their importance: tax: 0.25, work: 0.125"
        );
        let prompt = generate_prompt(&[("doctor", 0.5)], &["Economy".to_string(), "Jobs".to_string()]);
        assert_eq!(
            prompt,
            "Generate short (maximum three words) title different than: Economy, Jobs based on given keywords and their importance: doctor: 0.5"
        );
    }

    #[test]
    fn title_is_the_last_non_empty_line_unquoted() {
        assert_eq!(extract_title("\n\n\"Labour Market\"\n\n").as_deref(), Some("Labour Market"));
        assert_eq!(extract_title("Title:\n“Public Health”").as_deref(), Some("Public Health"));
        assert_eq!(extract_title("It's fine").as_deref(), Some("It's fine"));
        assert_eq!(extract_title("\n \n"), None);
        assert_eq!(extract_title("\"\""), None);
    }

    struct EchoCompletion {
        prompts: RefCell<Vec<String>>,
    }

    impl TextCompletion for EchoCompletion {
        fn complete(&self, model: &str, prompt: &str, temperature: f64) -> Result<String> {
            assert_eq!(model, "test-model");
            assert_eq!(temperature, 0.3);
            let mut prompts = self.prompts.borrow_mut();
            prompts.push(prompt.to_string());
            Ok(format!("\n\"Title {}\"", prompts.len()))
        }
    }

    fn topic_words(num_topics: usize) -> TopicWordTable {
        let docs = vec![LemmaDocument {
            row: 0,
            lemmas: ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect(),
        }];
        let vocabulary = Vocabulary::build(&docs, &VocabularyOptions::default());
        let model = FixedModel { num_topics, vocab_size: vocabulary.len() };
        TopicWordTable::build(&model, &vocabulary, &docs, 2)
    }

    #[test]
    fn automatic_naming_calls_once_per_topic_in_order() {
        let mut names = TopicNames::new(3);
        let completion = EchoCompletion { prompts: RefCell::new(Vec::new()) };
        let config = NamingConfig {
            num_keywords: 2,
            model: "test-model".to_string(),
            temperature: 0.3,
        };

        name_topics_automatically(&mut names, &topic_words(3), &completion, &config).unwrap();

        let prompts = completion.prompts.borrow();
        assert_eq!(prompts.len(), 3);
        assert!(!prompts[0].contains("different than"));
        assert!(prompts[0].ends_with("a: 0.9, b: 0.01"));
        assert!(prompts[1].contains("different than: Title 1 based"));
        assert!(prompts[1].ends_with("b: 0.9, a: 0.01"));
        assert!(prompts[2].contains("different than: Title 1, Title 2 based"));
        assert_eq!(
            names.iter().collect::<Vec<_>>(),
            vec![(0, "Title 1"), (1, "Title 2"), (2, "Title 3")]
        );
    }

    struct SilentCompletion;

    impl TextCompletion for SilentCompletion {
        fn complete(&self, _: &str, _: &str, _: f64) -> Result<String> {
            Ok("\n\n".to_string())
        }
    }

    #[test]
    fn empty_completion_fails() {
        let mut names = TopicNames::new(2);
        let result = name_topics_automatically(&mut names, &topic_words(2), &SilentCompletion, &NamingConfig::default());
        assert!(matches!(result, Err(OptimizerError::EmptyTitle { topic_id: 0 })));
        assert_eq!(names, TopicNames::new(2));
    }
}
