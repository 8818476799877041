use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TriageError};

/// Gmail system label carried by unread messages
pub const UNREAD_LABEL: &str = "UNREAD";

/// Gmail system label for inbox membership; removing it archives the message
pub const INBOX_LABEL: &str = "INBOX";

/// Matches `-label:<name>` exclusion terms in a search query
static EXCLUDED_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:^|\s)-label:("[^"]*"|\S+)"#).unwrap());

/// Label info returned from Gmail API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelInfo {
    pub id: String,
    pub name: String,
}

/// One page of search results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// A label together with the ordered queries that assign it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRules {
    pub label: String,
    pub rules: Vec<String>,
}

impl LabelRules {
    pub fn new<S: Into<String>>(label: S, rules: Vec<String>) -> Self {
        let label = label.into();
        let rules = rules
            .into_iter()
            .map(|rule| with_self_exclusion(&rule, &label))
            .collect();
        Self { label, rules }
    }
}

/// Ordered classification table; iteration order is insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationTable(Vec<LabelRules>);

impl ClassificationTable {
    /// Build a table, appending each label's self-exclusion to its rules
    pub fn new(entries: Vec<LabelRules>) -> Self {
        Self(
            entries
                .into_iter()
                .map(|entry| LabelRules::new(entry.label, entry.rules))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelRules> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.0.iter().map(|entry| entry.label.as_str()).collect()
    }
}

/// A vendor key accepted by the extractor and its priority-ordered queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub key: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub queries: Vec<String>,
}

impl Selector {
    pub fn matches(&self, key: &str) -> bool {
        self.key == key || self.aliases.iter().any(|alias| alias == key)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorTable(Vec<Selector>);

impl SelectorTable {
    pub fn new(selectors: Vec<Selector>) -> Self {
        Self(selectors)
    }

    /// Look up a selector by key or alias (exact match)
    pub fn resolve(&self, key: &str) -> Result<&Selector> {
        self.0
            .iter()
            .find(|selector| selector.matches(key))
            .ok_or_else(|| TriageError::UnknownSelector {
                selector: key.to_string(),
                known: self.keys(),
            })
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.iter().map(|selector| selector.key.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Selector> {
        self.0.iter()
    }
}

/// Ordered, duplicate-free message ids gathered during one extractor run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionBatch {
    capacity: usize,
    ids: Vec<String>,
}

impl ExtractionBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ids: Vec::with_capacity(capacity),
        }
    }

    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.ids.len())
    }

    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Append ids in order, skipping ones already present, until full.
    /// Returns how many were added.
    pub fn extend<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        let mut added = 0;
        for id in ids {
            if self.is_full() {
                break;
            }
            if !self.ids.contains(&id) {
                self.ids.push(id);
                added += 1;
            }
        }
        added
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Format the exclusion clause for a label, quoting names with spaces
pub fn label_exclusion(label: &str) -> String {
    if label.contains(char::is_whitespace) {
        format!("-label:\"{}\"", label)
    } else {
        format!("-label:{}", label)
    }
}

/// Labels excluded by `-label:` terms in a query
pub fn excluded_labels(query: &str) -> Vec<String> {
    EXCLUDED_LABEL
        .captures_iter(query)
        .map(|caps| caps[1].trim_matches('"').to_string())
        .collect()
}

/// Append `-label:<label>` unless the query already excludes that label
pub fn with_self_exclusion(query: &str, label: &str) -> String {
    let query = query.trim();
    if excluded_labels(query).iter().any(|excluded| excluded == label) {
        query.to_string()
    } else {
        format!("{} {}", query, label_exclusion(label))
    }
}

/// Reject queries the service would misread: blank text, an unmatched
/// quotation mark, or unbalanced parentheses.
pub fn validate_query(query: &str) -> std::result::Result<(), String> {
    if query.trim().is_empty() {
        return Err("query is empty".to_string());
    }

    if query.chars().filter(|c| *c == '"').count() % 2 != 0 {
        return Err(format!("unmatched quotation mark in query '{}'", query));
    }

    let mut depth: i32 = 0;
    let mut in_quotes = false;
    for c in query.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(format!("unbalanced parentheses in query '{}'", query));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_exclusion_appended() {
        let rule = with_self_exclusion("\"Mogo eSIM\" in:inbox is:unread", ".a-mogo-unread");
        assert_eq!(rule, "\"Mogo eSIM\" in:inbox is:unread -label:.a-mogo-unread");
    }

    #[test]
    fn test_self_exclusion_is_idempotent() {
        let once = with_self_exclusion("\"AirAlo\" in:inbox", ".a-airalo-unread");
        let twice = with_self_exclusion(&once, ".a-airalo-unread");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_self_exclusion_ignores_other_label_exclusions() {
        let rule = with_self_exclusion(
            "\"AirAlo\" in:inbox -label:.a-airaloTine-unread",
            ".a-airalo-unread",
        );
        assert_eq!(
            excluded_labels(&rule),
            vec![".a-airaloTine-unread", ".a-airalo-unread"]
        );
    }

    #[test]
    fn test_self_exclusion_is_case_sensitive() {
        let rule = with_self_exclusion("x -label:Done", "done");
        assert!(rule.ends_with("-label:done"));
    }

    #[test]
    fn test_label_exclusion_quotes_spaces() {
        assert_eq!(label_exclusion("My Label"), "-label:\"My Label\"");
        assert_eq!(excluded_labels("a -label:\"My Label\""), vec!["My Label"]);
    }

    #[test]
    fn test_table_preserves_insertion_order() {
        let table = ClassificationTable::new(vec![
            LabelRules::new("z", vec!["zeta".to_string()]),
            LabelRules::new("a", vec!["alpha".to_string()]),
            LabelRules::new("m", vec!["mu".to_string()]),
        ]);
        assert_eq!(table.labels(), vec!["z", "a", "m"]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_validate_query() {
        assert!(validate_query("\"Simly\" in:inbox is:unread").is_ok());
        assert!(validate_query("(a OR b) is:unread").is_ok());
        assert!(validate_query("\"a (b\" is:unread").is_ok());

        let err = validate_query("label:.a-truly-unread is:unread in:all\"").unwrap_err();
        assert!(err.contains("unmatched quotation mark"));

        assert!(validate_query("   ").unwrap_err().contains("empty"));
        assert!(validate_query("(a OR b").unwrap_err().contains("parentheses"));
        assert!(validate_query("a) OR (b").unwrap_err().contains("parentheses"));
    }

    #[test]
    fn test_selector_resolve_by_key_and_alias() {
        let table = SelectorTable::new(vec![Selector {
            key: "airalo".to_string(),
            aliases: vec!["4".to_string()],
            queries: vec!["label:.a-airalo-unread is:unread".to_string()],
        }]);

        assert_eq!(table.resolve("airalo").unwrap().key, "airalo");
        assert_eq!(table.resolve("4").unwrap().key, "airalo");

        match table.resolve("Airalo") {
            Err(TriageError::UnknownSelector { selector, known }) => {
                assert_eq!(selector, "Airalo");
                assert_eq!(known, vec!["airalo".to_string()]);
            }
            other => panic!("expected UnknownSelector, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_caps_and_dedups() {
        let mut batch = ExtractionBatch::with_capacity(3);
        assert_eq!(batch.extend(vec!["a".to_string(), "b".to_string()]), 2);
        assert_eq!(batch.remaining(), 1);

        // "b" is already present; "c" fills the batch; "d" is dropped
        assert_eq!(
            batch.extend(vec!["b".to_string(), "c".to_string(), "d".to_string()]),
            1
        );
        assert!(batch.is_full());
        assert_eq!(batch.ids(), &["a", "b", "c"]);
    }
}
