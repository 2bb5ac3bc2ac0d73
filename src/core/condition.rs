//! Output matching patterns used to interpret collaborator output

use regex::Regex;

/// Pattern for matching command output (not serializable due to Regex)
#[derive(Debug, Clone)]
pub enum ConditionPattern {
    /// Simple string contains match
    Simple(String),
    /// Regular expression match
    Regex(Regex),
}

impl ConditionPattern {
    /// Build a pattern from configuration text
    pub fn new(pattern: &str, use_regex: bool) -> Result<Self, regex::Error> {
        if use_regex {
            Ok(ConditionPattern::Regex(Regex::new(pattern)?))
        } else {
            Ok(ConditionPattern::Simple(pattern.to_string()))
        }
    }

    /// Check if the pattern matches the given text
    pub fn matches(&self, text: &str) -> bool {
        match self {
            ConditionPattern::Simple(pattern) => text.contains(pattern.as_str()),
            ConditionPattern::Regex(regex) => regex.is_match(text),
        }
    }

    pub fn display(&self) -> String {
        match self {
            ConditionPattern::Simple(s) => s.clone(),
            ConditionPattern::Regex(r) => format!("[regex: {}]", r.as_str()),
        }
    }
}
