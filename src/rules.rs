//! Publisher authorization rules
//!
//! An optional line-oriented text file restricts which module may publish
//! which topics. The grammar:
//!
//! ```text
//! # comment
//! module: estimator
//! restrict_topics: att, local_position
//! ignore_others: true
//! ```
//!
//! `module` names the privileged module, `restrict_topics` lists the topics
//! reserved for it, and `ignore_others: true` additionally confines that
//! module to its own list. The rules are loaded once at startup and are
//! read-only afterwards.

use std::fs;
use std::path::Path;

use crate::error::{Result, SkybusError};

/// One parsed publisher rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherRule {
    /// Module the listed topics are reserved for
    pub module_name: String,
    /// Topics covered by the rule
    pub topics: Vec<String>,
    /// Whether the named module may publish anything outside its list
    pub ignore_other_topics: bool,
}

impl PublisherRule {
    /// Parse a rules file from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())
            .map_err(|e| SkybusError::from_io(e, "reading publisher rules"))?;
        Self::parse(&text)
    }

    /// Parse rules from text
    pub fn parse(text: &str) -> Result<Self> {
        let mut module_name: Option<String> = None;
        let mut topics: Option<Vec<String>> = None;
        let mut ignore_other_topics = false;

        for line in text.lines() {
            let line = line.trim();

            if line.len() < 2 || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("module:") {
                module_name = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix("restrict_topics:") {
                let list: Vec<String> = rest
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();

                if !list.is_empty() {
                    topics = Some(list);
                }
            } else if let Some(rest) = line.strip_prefix("ignore_others:") {
                ignore_other_topics = rest.trim() == "true";
            } else {
                return Err(SkybusError::invalid_argument(
                    "rules",
                    format!("wrong format: {}", line),
                ));
            }
        }

        match (module_name, topics) {
            (Some(module_name), Some(topics)) if !module_name.is_empty() => Ok(Self {
                module_name,
                topics,
                ignore_other_topics,
            }),
            _ => Err(SkybusError::invalid_argument(
                "rules",
                "rules file must set both module and restrict_topics",
            )),
        }
    }

    fn covers(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    /// Whether `module` may publish `topic` under this rule
    ///
    /// The named module is confined to its list when `ignore_others` is set;
    /// every other module is denied exactly the listed topics.
    pub fn allows(&self, module: &str, topic: &str) -> bool {
        if module == self.module_name {
            !self.ignore_other_topics || self.covers(topic)
        } else {
            !self.covers(topic)
        }
    }
}
