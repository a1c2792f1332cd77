//! Validation messages
//!
//! Rules report validation problems as [`RuleMessage`]s. Each field (and the
//! node itself) keeps a [`MessageBag`] keyed by [`RuleId`], so a rule re-run
//! only replaces its own entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::RuleId;

/// A message produced by a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMessage {
    /// Target field; `None` targets the node itself
    pub field: Option<String>,
    pub message: String,
}

impl RuleMessage {
    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Object-level message not tied to any field
    pub fn object(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }
}

/// A message surfaced to callers with the dotted path of the field it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMessage {
    /// Dotted path from the queried node, empty for object-level messages
    pub path: String,
    pub message: String,
}

/// Messages keyed by the rule that produced them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBag {
    by_rule: BTreeMap<RuleId, Vec<String>>,
}

impl MessageBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the messages of one rule; other rules' entries are untouched.
    pub fn replace(&mut self, rule_id: &RuleId, messages: Vec<String>) {
        self.by_rule.remove(rule_id);
        if !messages.is_empty() {
            self.by_rule.insert(rule_id.clone(), messages);
        }
    }

    pub fn remove(&mut self, rule_id: &RuleId) -> bool {
        self.by_rule.remove(rule_id).is_some()
    }

    pub fn contains(&self, rule_id: &RuleId) -> bool {
        self.by_rule.contains_key(rule_id)
    }

    pub fn clear(&mut self) {
        self.by_rule.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_rule.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_rule.values().map(Vec::len).sum()
    }

    /// All messages, ordered by rule id.
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.by_rule.values().flatten().map(String::as_str)
    }

    pub fn for_rule(&self, rule_id: &RuleId) -> &[String] {
        self.by_rule.get(rule_id).map(Vec::as_slice).unwrap_or(&[])
    }
}
