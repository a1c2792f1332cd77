//! Per-node property collection
//!
//! Containers are created on first access through the injected
//! [`PropertyFactory`], so fields that are never touched never allocate.
//! Aggregate state (busy, valid, modified) is derived from the containers on
//! every read instead of being cached, which keeps it consistent while rule
//! tasks interleave.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::GraphError;
use crate::message::PropertyMessage;
use crate::schema::Schema;

use super::{ChildRef, Property, PropertyFactory};

pub struct PropertyCollection {
    schema: Rc<Schema>,
    factory: Rc<dyn PropertyFactory>,
    properties: RefCell<BTreeMap<Rc<str>, Rc<Property>>>,
}

impl PropertyCollection {
    pub fn new(schema: Rc<Schema>, factory: Rc<dyn PropertyFactory>) -> Self {
        Self {
            schema,
            factory,
            properties: RefCell::new(BTreeMap::new()),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Get a container, creating it on first access.
    pub fn get(&self, name: &str) -> Result<Rc<Property>, GraphError> {
        if let Some(existing) = self.properties.borrow().get(name) {
            return Ok(Rc::clone(existing));
        }

        let decl = self
            .schema
            .get(name)
            .ok_or_else(|| GraphError::unknown_field(self.schema.type_name(), name))?;
        let property = Rc::new(self.factory.create(decl, self.schema.kind()));
        self.properties
            .borrow_mut()
            .insert(property.name_rc(), Rc::clone(&property));
        Ok(property)
    }

    /// A container only if it has already been created.
    pub fn existing(&self, name: &str) -> Option<Rc<Property>> {
        self.properties.borrow().get(name).cloned()
    }

    /// Replace every container at once (hydration).
    pub fn set_properties(&self, properties: Vec<Property>) -> Result<(), GraphError> {
        let mut replacement = BTreeMap::new();
        for property in properties {
            if !self.schema.contains(property.name()) {
                return Err(GraphError::unknown_field(
                    self.schema.type_name(),
                    property.name(),
                ));
            }
            replacement.insert(property.name_rc(), Rc::new(property));
        }
        *self.properties.borrow_mut() = replacement;
        Ok(())
    }

    /// Snapshot of the created containers, ordered by name.
    pub fn snapshot(&self) -> Vec<Rc<Property>> {
        self.properties.borrow().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.properties.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.borrow().is_empty()
    }

    pub(crate) fn children(&self) -> Vec<ChildRef> {
        self.snapshot().iter().filter_map(|p| p.child()).collect()
    }

    pub fn is_busy(&self) -> bool {
        self.snapshot().iter().any(|p| p.is_busy())
    }

    pub fn is_self_busy(&self) -> bool {
        self.snapshot().iter().any(|p| p.is_self_busy())
    }

    pub fn is_valid(&self) -> bool {
        self.snapshot().iter().all(|p| p.is_valid())
    }

    pub fn is_self_valid(&self) -> bool {
        self.snapshot().iter().all(|p| p.is_self_valid())
    }

    pub fn is_modified(&self) -> bool {
        self.snapshot().iter().any(|p| p.is_modified())
    }

    pub fn is_self_modified(&self) -> bool {
        self.snapshot().iter().any(|p| p.is_self_modified())
    }

    pub fn modified_names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .filter(|p| p.is_self_modified())
            .map(|p| p.name().to_string())
            .collect()
    }

    pub fn mark_unmodified(&self) {
        for property in self.snapshot() {
            property.mark_unmodified();
        }
    }

    pub(crate) fn has_pending_tasks(&self) -> bool {
        self.children().iter().any(ChildRef::has_pending_tasks)
    }

    /// Await children until none has outstanding work.
    ///
    /// After every await the scan restarts from the first container, because
    /// a completed rule may have started new work in a container that was
    /// already passed. The first error is returned once everything settled.
    pub async fn wait_for_tasks(&self, max_rescans: u32) -> Result<(), GraphError> {
        let mut first_error = None;
        let mut rescans = 0u32;

        while let Some(child) = self
            .children()
            .into_iter()
            .find(ChildRef::has_pending_tasks)
        {
            rescans += 1;
            if rescans > max_rescans {
                return Err(GraphError::WaitLimitExceeded(max_rescans));
            }
            if let Err(err) = child.wait_for_tasks().await {
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    pub(crate) fn collect_messages(&self, out: &mut Vec<PropertyMessage>, prefix: &str) {
        for property in self.snapshot() {
            property.collect_messages(out, prefix);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::{DefaultPropertyFactory, MockPropertyFactory};
    use crate::schema::{FieldDecl, NodeKind};

    fn schema() -> Rc<Schema> {
        Rc::new(
            Schema::entity("Person")
                .field(FieldDecl::text("First"))
                .field(FieldDecl::text("Last")),
        )
    }

    #[test]
    fn containers_are_created_lazily_once() {
        let mut factory = MockPropertyFactory::new();
        factory
            .expect_create()
            .times(1)
            .returning(|decl, kind| Property::new(decl.clone(), kind == NodeKind::Entity));
        let collection = PropertyCollection::new(schema(), Rc::new(factory));

        assert!(collection.is_empty());
        let first = collection.get("First").unwrap();
        let again = collection.get("First").unwrap();
        assert!(Rc::ptr_eq(&first, &again));
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let collection = PropertyCollection::new(schema(), Rc::new(DefaultPropertyFactory));
        let err = collection.get("Middle").unwrap_err();
        assert!(matches!(err, GraphError::UnknownField { .. }));
    }

    #[test]
    fn set_properties_replaces_all() {
        let collection = PropertyCollection::new(schema(), Rc::new(DefaultPropertyFactory));
        collection.get("First").unwrap().mark_self_modified();
        assert!(collection.is_self_modified());

        collection
            .set_properties(vec![Property::new(FieldDecl::text("Last"), true)])
            .unwrap();
        assert!(collection.existing("First").is_none());
        assert!(!collection.is_self_modified());
    }

    #[test]
    fn aggregates_follow_containers() {
        let collection = PropertyCollection::new(schema(), Rc::new(DefaultPropertyFactory));
        let last = collection.get("Last").unwrap();
        let busy = crate::ids::BusyId::new();

        last.add_marked_busy(busy);
        assert!(collection.is_busy());
        last.remove_marked_busy(busy);
        assert!(!collection.is_busy());

        last.mark_self_modified();
        assert_eq!(collection.modified_names(), vec!["Last".to_string()]);
        collection.mark_unmodified();
        assert!(!collection.is_modified());
    }
}
