//! Prompt templates with `{placeholder}` substitution.
//!
//! A placeholder is `{name}` where `name` is an identifier. `{{` and `}}`
//! produce literal braces; any other brace is kept as written, so JSON
//! examples embedded in a prompt need no escaping.

use crate::errors::TemplateError;
use crate::parser::JsonMap;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed prompt template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parses `source` into a template named `name`.
    pub fn parse(name: impl Into<String>, source: impl Into<String>) -> Result<Self, TemplateError> {
        let name = name.into();
        let source = source.into();
        let segments = parse_segments(&name, &source)?;
        Ok(Self {
            name,
            source,
            segments,
        })
    }

    /// The template name (usually the stage name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unparsed template text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Distinct placeholder names, sorted.
    #[must_use]
    pub fn placeholders(&self) -> BTreeSet<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Placeholder(p) => Some(p.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Fails if the template uses a placeholder outside `known`.
    pub fn check_placeholders<S: AsRef<str>>(&self, known: &[S]) -> Result<(), TemplateError> {
        let unknown: Vec<String> = self
            .placeholders()
            .into_iter()
            .filter(|p| !known.iter().any(|k| k.as_ref() == *p))
            .map(str::to_string)
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(TemplateError::UnknownPlaceholders {
                template: self.name.clone(),
                unknown,
            })
        }
    }

    /// Substitutes placeholders from `values`.
    ///
    /// Strings are inserted raw, other JSON values pretty-printed, and
    /// absent or null values render as nothing.
    #[must_use]
    pub fn render(&self, values: &JsonMap) -> String {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(key) => match values.get(key) {
                    None | Some(Value::Null) => {}
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => {
                        let pretty = serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string());
                        out.push_str(&pretty);
                    }
                },
            }
        }
        out
    }
}

const fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

const fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_segments(name: &str, source: &str) -> Result<Vec<Segment>, TemplateError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, c)| c);
        match (c, next) {
            ('{', Some('{')) | ('}', Some('}')) => {
                literal.push(c);
                i += 2;
            }
            ('{', Some(n)) if is_ident_start(n) => {
                let mut j = i + 1;
                while j < chars.len() && is_ident_char(chars[j].1) {
                    j += 1;
                }
                match chars.get(j) {
                    Some(&(_, '}')) => {
                        if !literal.is_empty() {
                            segments.push(Segment::Literal(std::mem::take(&mut literal)));
                        }
                        let key: String = chars[i + 1..j].iter().map(|&(_, c)| c).collect();
                        segments.push(Segment::Placeholder(key));
                        i = j + 1;
                    }
                    None => {
                        return Err(TemplateError::Unterminated {
                            template: name.to_string(),
                            offset,
                        });
                    }
                    Some(_) => {
                        literal.push(c);
                        i += 1;
                    }
                }
            }
            _ => {
                literal.push(c);
                i += 1;
            }
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    template: String,
}

/// Named templates, typically loaded from a directory.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    templates: BTreeMap<String, PromptTemplate>,
}

impl TemplateSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `<name>.txt` and `<name>.json` file in `dir`.
    ///
    /// JSON files hold `{"template": "..."}`. Other files are ignored.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let dir = dir.as_ref();
        let load_err = |template: &str, message: String| TemplateError::Load {
            template: template.to_string(),
            message,
        };

        let entries = std::fs::read_dir(dir).map_err(|e| load_err(&dir.display().to_string(), e.to_string()))?;
        let mut set = Self::new();
        for entry in entries {
            let path = entry.map_err(|e| load_err(&dir.display().to_string(), e.to_string()))?.path();
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|s| s.to_str()),
            ) else {
                continue;
            };

            let raw = match ext {
                "txt" | "json" => std::fs::read_to_string(&path).map_err(|e| load_err(stem, e.to_string()))?,
                _ => continue,
            };
            let source = if ext == "json" {
                serde_json::from_str::<TemplateFile>(&raw)
                    .map_err(|e| load_err(stem, e.to_string()))?
                    .template
            } else {
                raw
            };

            debug!(template = stem, path = %path.display(), "Loaded prompt template");
            set.insert(PromptTemplate::parse(stem, source)?);
        }
        Ok(set)
    }

    /// Adds or replaces a template under its own name.
    pub fn insert(&mut self, template: PromptTemplate) {
        self.templates.insert(template.name.clone(), template);
    }

    /// Looks up a template by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PromptTemplate> {
        self.templates.get(name)
    }

    /// Template names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Number of templates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn values(v: Value) -> JsonMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_render_basic() {
        let t = PromptTemplate::parse("t", "Analyse: {text}").unwrap();
        assert_eq!(t.render(&values(json!({"text": "login"}))), "Analyse: login");
    }

    #[test]
    fn test_render_structured_value_pretty() {
        let t = PromptTemplate::parse("t", "R={requirements}").unwrap();
        let out = t.render(&values(json!({"requirements": {"a": [1]}})));
        assert_eq!(out, "R={\n  \"a\": [\n    1\n  ]\n}");
    }

    #[test]
    fn test_missing_and_null_render_empty() {
        let t = PromptTemplate::parse("t", "[{a}][{b}]").unwrap();
        assert_eq!(t.render(&values(json!({"b": null}))), "[][]");
    }

    #[test]
    fn test_json_example_left_literal() {
        let source = "Reply as {\"signal\": \"bullish\", \"confidence\": 0.8} for {ticker}";
        let t = PromptTemplate::parse("t", source).unwrap();
        assert_eq!(t.placeholders().into_iter().collect::<Vec<_>>(), vec!["ticker"]);
        assert_eq!(
            t.render(&values(json!({"ticker": "600519"}))),
            "Reply as {\"signal\": \"bullish\", \"confidence\": 0.8} for 600519"
        );
    }

    #[test]
    fn test_escaped_braces() {
        let t = PromptTemplate::parse("t", "{{text}} is {text}").unwrap();
        assert_eq!(t.render(&values(json!({"text": "x"}))), "{text} is x");
        assert_eq!(t.placeholders().len(), 1);
    }

    #[test]
    fn test_unterminated_placeholder() {
        let err = PromptTemplate::parse("extractor", "Input: {text").unwrap_err();
        assert_eq!(
            err,
            TemplateError::Unterminated {
                template: "extractor".to_string(),
                offset: 7
            }
        );
    }

    #[test]
    fn test_check_placeholders_reports_unknown() {
        let t = PromptTemplate::parse("checker", "{requirements} {analysis} {mood}").unwrap();
        let err = t.check_placeholders(&["requirements", "analysis"]).unwrap_err();
        match err {
            TemplateError::UnknownPlaceholders { template, unknown } => {
                assert_eq!(template, "checker");
                assert_eq!(unknown, vec!["mood".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(t.check_placeholders(&["requirements", "analysis", "mood"]).is_ok());
    }

    #[test]
    fn test_template_set_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("extractor.txt"), "Extract from {text}").unwrap();
        std::fs::write(
            dir.path().join("analyzer.json"),
            r#"{"template": "Analyse {requirements}"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let set = TemplateSet::from_dir(dir.path()).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["analyzer", "extractor"]);
        assert_eq!(set.get("analyzer").unwrap().source(), "Analyse {requirements}");
    }

    #[test]
    fn test_template_set_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("checker.json"), "{not json").unwrap();
        assert!(matches!(
            TemplateSet::from_dir(dir.path()),
            Err(TemplateError::Load { .. })
        ));
    }
}
