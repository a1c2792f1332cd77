//! Node construction
//!
//! A [`NodeBuilder`] is the per-type factory: it holds the schema, the
//! property factory and the rule definitions, and stamps out nodes that share
//! them. `create` and `fetch` wrap construction in the matching lifecycle so
//! initial values never mark a node modified or trigger rules.

use std::rc::Rc;

use crate::config::GraphSettings;
use crate::error::GraphError;
use crate::lifecycle::LifecycleOperation;
use crate::property::{DefaultPropertyFactory, PropertyCollection, PropertyFactory};
use crate::rules::{RuleDefinition, RuleManager, RuleResolver};
use crate::schema::Schema;

use super::Node;

#[derive(Clone)]
pub struct NodeBuilder {
    schema: Rc<Schema>,
    settings: GraphSettings,
    factory: Rc<dyn PropertyFactory>,
    rules: Vec<RuleDefinition>,
}

impl NodeBuilder {
    pub fn new(schema: Schema) -> Self {
        Self::from_shared(Rc::new(schema))
    }

    pub fn from_shared(schema: Rc<Schema>) -> Self {
        Self {
            schema,
            settings: GraphSettings::default(),
            factory: Rc::new(DefaultPropertyFactory),
            rules: Vec::new(),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn settings(mut self, settings: GraphSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn property_factory(mut self, factory: impl PropertyFactory + 'static) -> Self {
        self.factory = Rc::new(factory);
        self
    }

    pub fn rule(mut self, rule: RuleDefinition) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append the rules a resolver supplies for this schema.
    pub fn resolve_rules(mut self, resolver: &dyn RuleResolver) -> Self {
        self.rules.extend(resolver.resolve(&self.schema));
        self
    }

    /// Build a bare node: no lifecycle, no entity state.
    pub fn build(&self) -> Result<Node, GraphError> {
        let rules = RuleManager::new();
        for rule in &self.rules {
            rule.check(&self.schema)?;
            rules.add_rule(rule.clone())?;
        }
        let properties = PropertyCollection::new(Rc::clone(&self.schema), Rc::clone(&self.factory));
        let node = Node::from_parts(
            Rc::clone(&self.schema),
            self.settings.clone(),
            properties,
            rules,
        );
        tracing::debug!(node = %node.type_name(), id = %node.id(), rules = self.rules.len(), "Built node");
        Ok(node)
    }

    /// Build a new node through the create lifecycle.
    pub fn create(&self) -> Result<Node, GraphError> {
        self.create_with(|_| Ok(()))
    }

    /// Build a new node, running `init` while its actions are paused.
    pub fn create_with(
        &self,
        init: impl FnOnce(&Node) -> Result<(), GraphError>,
    ) -> Result<Node, GraphError> {
        self.run_lifecycle(LifecycleOperation::Create, init)
    }

    /// Build an existing node, hydrating it with `hydrate` (usually via
    /// [`Node::load`]).
    pub fn fetch(
        &self,
        hydrate: impl FnOnce(&Node) -> Result<(), GraphError>,
    ) -> Result<Node, GraphError> {
        self.run_lifecycle(LifecycleOperation::Fetch, hydrate)
    }

    fn run_lifecycle(
        &self,
        operation: LifecycleOperation,
        body: impl FnOnce(&Node) -> Result<(), GraphError>,
    ) -> Result<Node, GraphError> {
        let node = self.build()?;
        node.on_lifecycle_start(operation);
        let result = body(&node);
        node.on_lifecycle_complete(operation);
        result.map(|()| node)
    }
}

impl std::fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("type", &self.schema.type_name())
            .field("rules", &self.rules)
            .field("settings", &self.settings)
            .finish()
    }
}
