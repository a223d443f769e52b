//! Field-level match rules.
//!
//! A rule is written in the case file as `{"key", "type", "value"}` and compiled
//! once when the case file is loaded, so a malformed regex is reported before
//! any request is sent.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Comparison strategy as written in the case file's `type` field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum MatchKind {
    /// Empty `type`. Exact comparison, or a wildcard when `value` is empty too.
    #[default]
    Unset,
    /// `"contain"`: substring test.
    Contains,
    /// `"regex"`: regular expression search.
    Regex,
    /// Any other spelling falls back to exact comparison.
    Other(String),
}

impl From<String> for MatchKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "" => MatchKind::Unset,
            "contain" => MatchKind::Contains,
            "regex" => MatchKind::Regex,
            _ => MatchKind::Other(s),
        }
    }
}

impl From<MatchKind> for String {
    fn from(kind: MatchKind) -> Self {
        match kind {
            MatchKind::Unset => String::new(),
            MatchKind::Contains => "contain".to_string(),
            MatchKind::Regex => "regex".to_string(),
            MatchKind::Other(s) => s,
        }
    }
}

/// A single field comparison as declared in the case file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct MatchRule {
    #[serde(default)]
    pub key: String,
    #[serde(rename = "type", default)]
    pub kind: MatchKind,
    #[serde(default)]
    pub value: String,
}

impl MatchRule {
    pub fn new(key: impl Into<String>, kind: MatchKind, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind,
            value: value.into(),
        }
    }

    /// Empty type and empty value: matches anything.
    pub fn is_wildcard(&self) -> bool {
        self.kind == MatchKind::Unset && self.value.is_empty()
    }
}

#[derive(Debug, Clone)]
enum CompiledMatcher {
    Any,
    Exact,
    Contains,
    Regex(Arc<Regex>),
}

/// A rule ready for evaluation.
#[derive(Debug, Clone)]
pub struct CompiledMatchRule {
    key: String,
    expected: String,
    matcher: CompiledMatcher,
}

impl CompiledMatchRule {
    /// Compile a rule. `default_key` names the field when the rule's own key is
    /// empty; pass `""` for header and cookie rules, whose key is the lookup name.
    pub fn compile(rule: &MatchRule, default_key: &str) -> Result<Self, regex::Error> {
        let matcher = if rule.is_wildcard() {
            CompiledMatcher::Any
        } else {
            match rule.kind {
                MatchKind::Contains => CompiledMatcher::Contains,
                MatchKind::Regex => CompiledMatcher::Regex(Arc::new(Regex::new(&rule.value)?)),
                MatchKind::Unset | MatchKind::Other(_) => CompiledMatcher::Exact,
            }
        };

        let key = if rule.key.is_empty() {
            default_key.to_string()
        } else {
            rule.key.clone()
        };

        Ok(Self {
            key,
            expected: rule.value.clone(),
            matcher,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Compare `actual` against the rule.
    ///
    /// The diagnostic is produced whatever the outcome; callers only report it
    /// when the match fails.
    pub fn matches(&self, actual: &str) -> (bool, Diagnostic) {
        let ok = match &self.matcher {
            CompiledMatcher::Any => true,
            CompiledMatcher::Exact => actual == self.expected,
            CompiledMatcher::Contains => actual.contains(self.expected.as_str()),
            CompiledMatcher::Regex(regex) => regex.is_match(actual),
        };

        let diagnostic = Diagnostic {
            field: self.key.clone(),
            actual: actual.to_string(),
            expected: self.expected.clone(),
        };

        (ok, diagnostic)
    }
}

/// What a rule saw and what it wanted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub field: String,
    pub actual: String,
    pub expected: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: got '{}', expected: '{}'",
            self.field, self.actual, self.expected
        )
    }
}
