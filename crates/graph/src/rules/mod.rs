//! Validation and derivation rules
//!
//! A rule is bound to one or more trigger fields and produces
//! [`RuleMessage`]s. Triggers are field names of the node the rule is attached
//! to, or dotted paths into children (`Lines.Quantity`) for rules that react to
//! changes inside the aggregate.
//!
//! Validation problems are returned as messages. An `Err` from a rule body is
//! an unexpected fault: it is captured and surfaced by `wait_for_tasks`.

pub mod fluent;
pub mod manager;

use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use bitflags::bitflags;
use tokio_util::sync::CancellationToken;

use crate::error::GraphError;
use crate::ids::RuleId;
use crate::message::RuleMessage;
use crate::node::Node;
use crate::schema::Schema;

pub use manager::RuleManager;

/// Synchronous rule body
pub trait Rule {
    fn execute(&self, target: &Node) -> anyhow::Result<Vec<RuleMessage>>;
}

/// Asynchronous rule body
///
/// Nodes are single-threaded, so rule futures are not `Send`.
#[async_trait(?Send)]
pub trait AsyncRule {
    async fn execute(
        &self,
        target: &Node,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<RuleMessage>>;
}

#[derive(Clone)]
pub enum RuleBody {
    Sync(Rc<dyn Rule>),
    Async(Rc<dyn AsyncRule>),
}

impl RuleBody {
    pub fn is_async(&self) -> bool {
        matches!(self, RuleBody::Async(_))
    }
}

/// A rule bound to its triggers under a stable id
#[derive(Clone)]
pub struct RuleDefinition {
    id: RuleId,
    triggers: Vec<String>,
    body: RuleBody,
}

impl RuleDefinition {
    pub fn new<I, S>(id: impl Into<RuleId>, triggers: I, rule: impl Rule + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            triggers: triggers.into_iter().map(Into::into).collect(),
            body: RuleBody::Sync(Rc::new(rule)),
        }
    }

    pub fn new_async<I, S>(id: impl Into<RuleId>, triggers: I, rule: impl AsyncRule + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            triggers: triggers.into_iter().map(Into::into).collect(),
            body: RuleBody::Async(Rc::new(rule)),
        }
    }

    #[inline]
    pub fn id(&self) -> &RuleId {
        &self.id
    }

    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }

    pub fn body(&self) -> &RuleBody {
        &self.body
    }

    pub fn is_triggered_by(&self, path: &str) -> bool {
        self.triggers.iter().any(|t| t == path)
    }

    /// Check the definition against the schema it is attached to.
    pub(crate) fn check(&self, schema: &Schema) -> Result<(), GraphError> {
        if self.triggers.is_empty() {
            return Err(GraphError::InvalidRule(format!(
                "rule {} has no trigger fields",
                self.id
            )));
        }
        for trigger in &self.triggers {
            let head = trigger.split('.').next().unwrap_or_default();
            if !schema.contains(head) {
                return Err(GraphError::InvalidRule(format!(
                    "rule {} triggers on undeclared field {}.{}",
                    self.id,
                    schema.type_name(),
                    trigger
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for RuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleDefinition")
            .field("id", &self.id)
            .field("triggers", &self.triggers)
            .field("async", &self.body.is_async())
            .finish()
    }
}

bitflags! {
    /// Selects which rules an explicit `run_rules` pass executes.
    ///
    /// The message and execution bits are unioned: a rule runs when any
    /// selected bit matches it. `SELF` keeps the pass on the node itself
    /// instead of cascading into child nodes and lists.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RunRulesFlag: u8 {
        const NO_MESSAGES = 0b0_0001;
        const MESSAGES = 0b0_0010;
        const EXECUTED = 0b0_0100;
        const NOT_EXECUTED = 0b0_1000;
        const SELF = 0b1_0000;
        const ALL = Self::NO_MESSAGES.bits()
            | Self::MESSAGES.bits()
            | Self::EXECUTED.bits()
            | Self::NOT_EXECUTED.bits();
    }
}

/// Supplies rule definitions for a node type.
///
/// Implemented by the factory layer, which may close over external
/// dependencies (lookup services, clocks) when building rules.
#[cfg_attr(test, mockall::automock)]
pub trait RuleResolver {
    fn resolve(&self, schema: &Schema) -> Vec<RuleDefinition>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDecl;

    struct Noop;

    impl Rule for Noop {
        fn execute(&self, _target: &Node) -> anyhow::Result<Vec<RuleMessage>> {
            Ok(Vec::new())
        }
    }

    fn schema() -> Schema {
        Schema::entity("Order")
            .field(FieldDecl::text("Number"))
            .field(FieldDecl::list("Lines"))
    }

    #[test]
    fn empty_triggers_are_invalid() {
        let rule = RuleDefinition::new("noop", Vec::<String>::new(), Noop);
        assert!(matches!(rule.check(&schema()), Err(GraphError::InvalidRule(_))));
    }

    #[test]
    fn child_paths_check_the_head_segment() {
        let ok = RuleDefinition::new("total", ["Lines.Quantity"], Noop);
        assert!(ok.check(&schema()).is_ok());

        let bad = RuleDefinition::new("total", ["Items.Quantity"], Noop);
        assert!(bad.check(&schema()).is_err());
    }

    #[test]
    fn all_excludes_self() {
        assert!(!RunRulesFlag::ALL.contains(RunRulesFlag::SELF));
        assert!(RunRulesFlag::ALL.contains(RunRulesFlag::MESSAGES | RunRulesFlag::NOT_EXECUTED));
    }
}
