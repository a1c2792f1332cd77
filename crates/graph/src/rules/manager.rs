//! Per-node rule registry
//!
//! Holds the node's rules in registration order and answers which rules a
//! trigger or an explicit pass selects. Execution itself lives on the node,
//! which owns the containers the results are written to.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::GraphError;
use crate::ids::RuleId;

use super::{RuleDefinition, RunRulesFlag};

/// A registered rule and its execution state
pub(crate) struct RuleEntry {
    definition: RuleDefinition,
    executed: Cell<bool>,
}

impl RuleEntry {
    pub(crate) fn definition(&self) -> &RuleDefinition {
        &self.definition
    }

    pub(crate) fn id(&self) -> &RuleId {
        self.definition.id()
    }

    pub(crate) fn is_executed(&self) -> bool {
        self.executed.get()
    }

    pub(crate) fn mark_executed(&self) {
        self.executed.set(true);
    }
}

#[derive(Default)]
pub struct RuleManager {
    rules: RefCell<Vec<Rc<RuleEntry>>>,
}

impl RuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule. Ids must be unique per node.
    pub fn add_rule(&self, definition: RuleDefinition) -> Result<(), GraphError> {
        let mut rules = self.rules.borrow_mut();
        if rules.iter().any(|r| r.id() == definition.id()) {
            return Err(GraphError::InvalidRule(format!(
                "duplicate rule id {}",
                definition.id()
            )));
        }
        rules.push(Rc::new(RuleEntry {
            definition,
            executed: Cell::new(false),
        }));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rules.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.borrow().is_empty()
    }

    pub fn ids(&self) -> Vec<RuleId> {
        self.rules.borrow().iter().map(|r| r.id().clone()).collect()
    }

    pub fn is_executed(&self, id: &RuleId) -> bool {
        self.rules
            .borrow()
            .iter()
            .any(|r| r.id() == id && r.is_executed())
    }

    pub(crate) fn all(&self) -> Vec<Rc<RuleEntry>> {
        self.rules.borrow().clone()
    }

    /// Rules whose trigger set contains `path`, in registration order.
    pub(crate) fn triggered_by(&self, path: &str) -> Vec<Rc<RuleEntry>> {
        self.rules
            .borrow()
            .iter()
            .filter(|r| r.definition().is_triggered_by(path))
            .cloned()
            .collect()
    }

    /// Rules selected by `flags`, in registration order.
    pub(crate) fn matching(
        &self,
        flags: RunRulesFlag,
        has_messages: impl Fn(&RuleId) -> bool,
    ) -> Vec<Rc<RuleEntry>> {
        if flags.contains(RunRulesFlag::ALL) {
            return self.all();
        }
        self.rules
            .borrow()
            .iter()
            .filter(|r| {
                let messages = has_messages(r.id());
                (flags.contains(RunRulesFlag::MESSAGES) && messages)
                    || (flags.contains(RunRulesFlag::NO_MESSAGES) && !messages)
                    || (flags.contains(RunRulesFlag::EXECUTED) && r.is_executed())
                    || (flags.contains(RunRulesFlag::NOT_EXECUTED) && !r.is_executed())
            })
            .cloned()
            .collect()
    }
}
