//! Prometheus label selectors of the form `label1=value1 label2=value2`.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use regex::Regex;

use crate::error::SelectorError;

/// All pairs must match for a target to be selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSelector {
    pairs: Vec<(String, String)>,
}

impl LabelSelector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let term_re = match Regex::new(r"^([a-zA-Z_][a-zA-Z0-9_]*)=(\S+)$") {
            Ok(re) => re,
            Err(e) => return Err(SelectorError::InvalidTerm(e.to_string())),
        };

        let mut pairs: Vec<(String, String)> = Vec::new();
        for term in input.split_whitespace() {
            let caps = term_re
                .captures(term)
                .ok_or_else(|| SelectorError::InvalidTerm(term.to_string()))?;
            let label = caps[1].to_string();
            if pairs.iter().any(|(l, _)| *l == label) {
                return Err(SelectorError::DuplicateLabel(label));
            }
            pairs.push((label, caps[2].to_string()));
        }

        if pairs.is_empty() {
            return Err(SelectorError::Empty);
        }
        Ok(Self { pairs })
    }

    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.pairs
            .iter()
            .all(|(label, value)| labels.get(label) == Some(value))
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let terms: Vec<String> = self.pairs.iter().map(|(l, v)| format!("{l}={v}")).collect();
        f.write_str(&terms.join(" "))
    }
}
