//! Frontend rule expressions and the rule template used to derive them.
//!
//! A rule is a `;`-separated list of `Matcher:value[,value]` terms, e.g.
//! `Host:api.example.com;PathPrefix:/v1`. [`validate_rule`] rejects
//! unknown matchers and empty values before a rule reaches the serving
//! layer.
//!
//! A [`RuleTemplate`] is operator-supplied text producing the default
//! rule for a service, with placeholders `{{.Name}}`, `{{.Domain}}` and
//! `{{.Label "key"}}`. Templates are parsed once at provider init, so a
//! malformed one disables the provider instead of failing every record.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::label::Labels;
use crate::error::TemplateError;

pub const DEFAULT_FRONTEND_RULE: &str = "Host:{{.Name}}.{{.Domain}}";

pub const MATCHERS: &[&str] = &[
    "Host",
    "HostRegexp",
    "Method",
    "Path",
    "PathStrip",
    "PathStripRegex",
    "PathPrefix",
    "PathPrefixStrip",
    "PathPrefixStripRegex",
    "Headers",
    "HeadersRegexp",
    "Query",
    "AddPrefix",
    "ReplacePath",
    "ReplacePathRegex",
];

/// Check `rule` syntax. Returns a human-readable reason on failure.
pub fn validate_rule(rule: &str) -> Result<(), String> {
    if rule.trim().is_empty() {
        return Err("rule is empty".into());
    }

    for term in rule.split(';') {
        let term = term.trim();
        let Some((matcher, values)) = term.split_once(':') else {
            return Err(format!("'{term}' is not of the form Matcher:value"));
        };
        let matcher = matcher.trim();
        if !MATCHERS.iter().any(|m| m.eq_ignore_ascii_case(matcher)) {
            return Err(format!("unknown matcher '{matcher}'"));
        }
        if values.split(',').all(|v| v.trim().is_empty()) {
            return Err(format!("matcher '{matcher}' has no value"));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Name,
    Domain,
    Label(String),
}

/// Values a rule template can refer to.
pub struct RuleInput<'a> {
    pub name: &'a str,
    pub domain: &'a str,
    pub labels: &'a Labels,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl RuleTemplate {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let fail = |reason: String| TemplateError::Parse {
            template: source.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(open) = rest.find("{{") {
            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }
            let after = &rest[open + 2..];
            let close = after
                .find("}}")
                .ok_or_else(|| fail(format!("unclosed '{{{{' at offset {}", source.len() - rest.len() + open)))?;
            segments.push(parse_action(after[..close].trim()).map_err(fail)?);
            rest = &after[close + 2..];
        }
        if rest.contains("}}") {
            return Err(fail("unexpected '}}'".into()));
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn render(&self, input: &RuleInput<'_>) -> String {
        let mut out = String::with_capacity(self.source.len() + input.name.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Name => out.push_str(input.name),
                Segment::Domain => out.push_str(input.domain),
                Segment::Label(key) => {
                    if let Some(v) = input.labels.get(key) {
                        out.push_str(v);
                    }
                }
            }
        }
        out
    }
}

fn parse_action(action: &str) -> Result<Segment, String> {
    match action {
        ".Name" => Ok(Segment::Name),
        ".Domain" => Ok(Segment::Domain),
        "" => Err("empty action '{{}}'".into()),
        _ => {
            let Some(arg) = action.strip_prefix(".Label") else {
                return Err(format!("unknown field '{action}'"));
            };
            let arg = arg.trim();
            let key = arg
                .strip_prefix('"')
                .and_then(|a| a.strip_suffix('"'))
                .filter(|k| !k.is_empty() && !k.contains('"'))
                .ok_or_else(|| format!("'.Label' expects one quoted key, got '{arg}'"))?;
            Ok(Segment::Label(key.to_string()))
        }
    }
}

impl Default for RuleTemplate {
    fn default() -> Self {
        Self {
            source: DEFAULT_FRONTEND_RULE.to_string(),
            segments: vec![
                Segment::Text("Host:".into()),
                Segment::Name,
                Segment::Text(".".into()),
                Segment::Domain,
            ],
        }
    }
}

impl fmt::Display for RuleTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for RuleTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for RuleTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_rules() {
        assert!(validate_rule("Host:svc1.example.com").is_ok());
        assert!(validate_rule("Host:a.com,b.com;PathPrefix:/api").is_ok());
        assert!(validate_rule("pathprefix:/v1").is_ok());
    }

    #[test]
    fn rejects_bad_rules() {
        assert!(validate_rule("").is_err());
        assert!(validate_rule("svc1.example.com").is_err());
        assert!(validate_rule("Hots:svc1.example.com").is_err());
        assert!(validate_rule("Host:").is_err());
        assert!(validate_rule("Host:a.com;").is_err());
    }

    #[test]
    fn default_template_matches_parsed_default() {
        assert_eq!(
            RuleTemplate::parse(DEFAULT_FRONTEND_RULE).unwrap(),
            RuleTemplate::default()
        );
    }

    #[test]
    fn renders_placeholders() {
        let mut labels = Labels::new();
        labels.insert("traefik.tenant".into(), "acme".into());
        let t = RuleTemplate::parse(r#"Host:{{.Name}}.{{ .Label "traefik.tenant" }}.{{.Domain}}"#)
            .unwrap();
        let rule = t.render(&RuleInput {
            name: "web",
            domain: "example.com",
            labels: &labels,
        });
        assert_eq!(rule, "Host:web.acme.example.com");
    }

    #[test]
    fn rejects_malformed_templates() {
        assert!(RuleTemplate::parse("Host:{{.Name").is_err());
        assert!(RuleTemplate::parse("Host:{{.Nmae}}").is_err());
        assert!(RuleTemplate::parse("Host:{{}}").is_err());
        assert!(RuleTemplate::parse(r"Host:{{.Label tenant}}").is_err());
        assert!(RuleTemplate::parse("Host:x}}").is_err());
    }
}
