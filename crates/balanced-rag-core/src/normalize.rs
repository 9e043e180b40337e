//! Dataset normalizers: map heterogeneous records onto passage candidates.
//!
//! Every dataset format has one [`Normalizer`] that combines the fields of
//! a raw [`Record`] into a single passage text. Normalizers are registered
//! by name in a [`NormalizerRegistry`]; adding a dataset means registering
//! one more rule, the ingestion pipeline never changes.
//!
//! # Built-in rules
//!
//! | Name | Fields |
//! |------|--------|
//! | `counsel_chat_questions` | `questionTitle` + `questionText` |
//! | `counsel_chat_answers` | `questionText` + `answerText` (markup stripped) |
//! | `psychology_pairs` | `question` + `response_j` |

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::models::PassageCandidate;

/// One raw dataset row: field name to value.
pub type Record = HashMap<String, String>;

/// Separator placed between combined fields.
pub const FIELD_SEPARATOR: &str = "\n\n";

/// Maps one record of a dataset onto zero or one passage candidate.
///
/// Implementations must be pure. Returning `None` drops the record before
/// validation.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, record: &Record, source_id: &str) -> Option<PassageCandidate>;
}

impl<F> Normalizer for F
where
    F: Fn(&Record, &str) -> Option<PassageCandidate> + Send + Sync,
{
    fn normalize(&self, record: &Record, source_id: &str) -> Option<PassageCandidate> {
        self(record, source_id)
    }
}

fn markup_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>?").expect("valid regex"))
}

/// Remove HTML-like tags, including a trailing unterminated `<...`.
pub fn strip_markup(text: &str) -> String {
    markup_re().replace_all(text, "").into_owned()
}

/// Concatenates a fixed list of fields, trimmed, skipping empty ones.
#[derive(Debug, Clone)]
pub struct FieldJoin {
    fields: Vec<String>,
    strip_markup: Vec<String>,
}

impl FieldJoin {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            strip_markup: Vec::new(),
        }
    }

    /// Strip markup tags from the named field before it is combined.
    pub fn strip_markup_from(mut self, field: impl Into<String>) -> Self {
        self.strip_markup.push(field.into());
        self
    }
}

impl Normalizer for FieldJoin {
    fn normalize(&self, record: &Record, source_id: &str) -> Option<PassageCandidate> {
        let parts: Vec<String> = self
            .fields
            .iter()
            .filter_map(|field| {
                let raw = record.get(field)?;
                let value = if self.strip_markup.contains(field) {
                    strip_markup(raw)
                } else {
                    raw.clone()
                };
                let value = value.trim();
                (!value.is_empty()).then(|| value.to_string())
            })
            .collect();

        let combined = parts.join(FIELD_SEPARATOR);
        let combined = combined.trim();
        if combined.is_empty() {
            return None;
        }
        Some(PassageCandidate::new(combined, source_id))
    }
}

/// Named collection of normalizer rules.
#[derive(Clone, Default)]
pub struct NormalizerRegistry {
    rules: HashMap<String, Arc<dyn Normalizer>>,
}

impl NormalizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-populated with the built-in dataset rules.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            "counsel_chat_questions",
            FieldJoin::new(["questionTitle", "questionText"]),
        );
        registry.register(
            "counsel_chat_answers",
            FieldJoin::new(["questionText", "answerText"]).strip_markup_from("answerText"),
        );
        registry.register(
            "psychology_pairs",
            FieldJoin::new(["question", "response_j"]),
        );
        registry
    }

    /// Register a rule, replacing any existing rule with the same name.
    pub fn register(&mut self, name: impl Into<String>, rule: impl Normalizer + 'static) {
        self.rules.insert(name.into(), Arc::new(rule));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Normalizer>> {
        self.rules.get(name).cloned()
    }

    /// Registered rule names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_field_join_combines_with_blank_line() {
        let rule = FieldJoin::new(["questionTitle", "questionText"]);
        let rec = record(&[
            ("questionTitle", "  Can't sleep  "),
            ("questionText", "I wake up at 3am every night."),
        ]);
        let c = rule.normalize(&rec, "counsel.csv").unwrap();
        assert_eq!(c.text, "Can't sleep\n\nI wake up at 3am every night.");
        assert_eq!(c.source_id, "counsel.csv");
    }

    #[test]
    fn test_field_join_skips_missing_and_empty_fields() {
        let rule = FieldJoin::new(["question", "response_j"]);
        let rec = record(&[("question", "   "), ("other", "ignored")]);
        assert!(rule.normalize(&rec, "psy.csv").is_none());

        let rec = record(&[("question", ""), ("response_j", "Only the answer.")]);
        assert_eq!(rule.normalize(&rec, "psy.csv").unwrap().text, "Only the answer.");
    }

    #[test]
    fn test_markup_is_stripped_from_answer() {
        let registry = NormalizerRegistry::with_builtins();
        let rule = registry.get("counsel_chat_answers").unwrap();
        let rec = record(&[
            ("questionText", "How do I stop worrying?"),
            ("answerText", "<p>Try <b>journaling</b> each evening.</p><br"),
        ]);
        let c = rule.normalize(&rec, "counselchat-data.csv").unwrap();
        assert_eq!(
            c.text,
            "How do I stop worrying?\n\nTry journaling each evening."
        );
    }

    #[test]
    fn test_strip_markup_only_applies_to_named_fields() {
        let rule = FieldJoin::new(["a", "b"]).strip_markup_from("b");
        let rec = record(&[("a", "x <kept> y"), ("b", "<i>z</i>")]);
        assert_eq!(rule.normalize(&rec, "s").unwrap().text, "x <kept> y\n\nz");
    }

    #[test]
    fn test_registry_accepts_closures() {
        let mut registry = NormalizerRegistry::new();
        registry.register("upper", |rec: &Record, src: &str| {
            rec.get("body")
                .map(|b| PassageCandidate::new(b.to_uppercase(), src))
        });
        let rule = registry.get("upper").unwrap();
        let c = rule.normalize(&record(&[("body", "calm")]), "x").unwrap();
        assert_eq!(c.text, "CALM");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_builtin_names() {
        let registry = NormalizerRegistry::with_builtins();
        assert_eq!(
            registry.names(),
            vec![
                "counsel_chat_answers",
                "counsel_chat_questions",
                "psychology_pairs"
            ]
        );
    }
}
