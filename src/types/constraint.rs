//! Tag constraints used to include or exclude discovered services.
//!
//! A constraint reads `tag==<glob>` (at least one tag must match) or
//! `tag!=<glob>` (no tag may match). The glob supports `*` as a wildcard
//! and is compiled to an anchored regex once, at parse time.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ProviderError;

#[derive(Debug, Clone)]
pub struct Constraint {
    pub key: String,
    pub must_match: bool,
    pattern: String,
    regex: Regex,
}

impl Constraint {
    pub fn new(key: &str, must_match: bool, pattern: &str) -> Result<Self, ProviderError> {
        let expression = format!("{key}{}{pattern}", if must_match { "==" } else { "!=" });
        if key != "tag" {
            return Err(ProviderError::InvalidConstraint {
                expression,
                reason: format!("unsupported key '{key}' (only 'tag' is supported)"),
            });
        }
        if pattern.is_empty() {
            return Err(ProviderError::InvalidConstraint {
                expression,
                reason: "empty pattern".into(),
            });
        }

        let source = format!(
            "^{}$",
            pattern
                .split('*')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(".*")
        );
        let regex = Regex::new(&source).map_err(|e| ProviderError::InvalidConstraint {
            expression,
            reason: e.to_string(),
        })?;

        Ok(Self {
            key: key.to_string(),
            must_match,
            pattern: pattern.to_string(),
            regex,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    #[must_use]
    pub fn matches_any<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        tags.iter().any(|t| self.regex.is_match(t.as_ref()))
    }

    /// Whether `tags` satisfy this single constraint.
    #[must_use]
    pub fn accepts<S: AsRef<str>>(&self, tags: &[S]) -> bool {
        self.matches_any(tags) == self.must_match
    }
}

/// Check every constraint against `tags`, returning the first that fails.
#[must_use]
pub fn first_failing<'a, S: AsRef<str>>(
    constraints: &'a [Constraint],
    tags: &[S],
) -> Option<&'a Constraint> {
    constraints.iter().find(|c| !c.accepts(tags))
}

/// Parse a list of constraint expressions, failing on the first bad one.
pub fn parse_all<S: AsRef<str>>(expressions: &[S]) -> Result<Vec<Constraint>, ProviderError> {
    expressions.iter().map(|e| e.as_ref().parse()).collect()
}

impl FromStr for Constraint {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (key, must_match, pattern) = if let Some((k, p)) = trimmed.split_once("==") {
            (k, true, p)
        } else if let Some((k, p)) = trimmed.split_once("!=") {
            (k, false, p)
        } else {
            return Err(ProviderError::InvalidConstraint {
                expression: s.to_string(),
                reason: "expected 'tag==<glob>' or 'tag!=<glob>'".into(),
            });
        };
        Self::new(key.trim(), must_match, pattern.trim())
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.must_match { "==" } else { "!=" };
        write!(f, "{}{op}{}", self.key, self.pattern)
    }
}

impl PartialEq for Constraint {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.must_match == other.must_match && self.pattern == other.pattern
    }
}

impl Eq for Constraint {}

impl Serialize for Constraint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Constraint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
