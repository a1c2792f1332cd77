//! Graph nodes
//!
//! A [`Node`] composes a property collection, a rule manager and an
//! object-level message bag, and carries the entity state machine
//! (new / deleted / child / marked-modified). Nodes are shared handles:
//! cloning a `Node` yields another handle to the same object.
//!
//! # State derivation
//!
//! Only the raw facts are stored (field values, messages, busy marks, entity
//! flags). Every aggregate flag is derived on read by walking the node's
//! containers and children, so the answers are exact whenever no rule task is
//! pending:
//!
//! | Flag | Derivation |
//! |------|------------|
//! | `is_self_valid` | own fields without messages, no object messages |
//! | `is_valid` | `is_self_valid` and every child valid |
//! | `is_self_busy` | running rule tasks, node or field busy marks |
//! | `is_busy` | `is_self_busy` or any child busy |
//! | `is_self_modified` | entity: new, deleted, marked, or a field self-modified |
//! | `is_modified` | `is_self_modified` or any child modified |
//! | `is_savable` | modified, valid, not busy, not a child |
//!
//! # Parent links
//!
//! A node knows its parent through a weak link set when it becomes a field
//! value or a list member. Changes bubble up that chain as
//! [`PropertyChange`] breadcrumbs; commands (pause, run rules, wait) flow
//! down through the containers.

mod builder;
mod field;
mod pause;
mod rules;

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use tokio::task::JoinHandle;

use crate::config::GraphSettings;
use crate::error::GraphError;
use crate::events::{PropertyChange, Subscribers, Subscription};
use crate::ids::{BusyId, NodeId};
use crate::lifecycle::LifecycleOperation;
use crate::list::{ChildList, WeakChildList};
use crate::message::{MessageBag, PropertyMessage};
use crate::property::{ChildRef, Property, PropertyCollection, WriteMode, WriteOutcome};
use crate::rules::RuleManager;
use crate::schema::{NodeKind, Schema};
use crate::value::{FromValue, Value};

pub use builder::NodeBuilder;
pub use field::Field;
pub use pause::PauseGuard;
pub(crate) use pause::{collect_list, hold_targets, pause_targets, release_targets, PauseTarget};

/// Non-owning link to whatever holds this node
#[derive(Clone)]
pub(crate) enum ParentLink {
    /// Value of a field on another node
    Node { node: Weak<NodeInner>, field: Rc<str> },
    /// Member of a child list
    List(WeakChildList),
}

#[derive(Default)]
struct EntityState {
    is_new: Cell<bool>,
    is_deleted: Cell<bool>,
    is_child: Cell<bool>,
    marked_modified: Cell<bool>,
}

pub(crate) struct NodeInner {
    id: NodeId,
    schema: Rc<Schema>,
    settings: GraphSettings,
    properties: PropertyCollection,
    rules: RuleManager,
    object_messages: RefCell<MessageBag>,
    state: EntityState,
    pause_depth: Cell<u32>,
    held_pauses: RefCell<Vec<Vec<PauseTarget>>>,
    marked_busy: RefCell<BTreeSet<BusyId>>,
    parent: RefCell<Option<ParentLink>>,
    owning_list: RefCell<Option<WeakChildList>>,
    tasks: RefCell<Vec<JoinHandle<Result<(), GraphError>>>>,
    running: Cell<usize>,
    faults: RefCell<Vec<GraphError>>,
    subscribers: Subscribers,
}

/// Handle to a node in the object graph
#[derive(Clone)]
pub struct Node {
    inner: Rc<NodeInner>,
}

impl Node {
    pub(crate) fn from_parts(
        schema: Rc<Schema>,
        settings: GraphSettings,
        properties: PropertyCollection,
        rules: RuleManager,
    ) -> Self {
        Self {
            inner: Rc::new(NodeInner {
                id: NodeId::new(),
                schema,
                settings,
                properties,
                rules,
                object_messages: RefCell::new(MessageBag::new()),
                state: EntityState::default(),
                pause_depth: Cell::new(0),
                held_pauses: RefCell::new(Vec::new()),
                marked_busy: RefCell::new(BTreeSet::new()),
                parent: RefCell::new(None),
                owning_list: RefCell::new(None),
                tasks: RefCell::new(Vec::new()),
                running: Cell::new(0),
                faults: RefCell::new(Vec::new()),
                subscribers: Subscribers::new(),
            }),
        }
    }

    fn from_inner(inner: Rc<NodeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<NodeInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<NodeInner>) -> Option<Node> {
        weak.upgrade().map(Node::from_inner)
    }

    /// Same underlying node.
    #[inline]
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // Identity
    // =========================================================================

    #[inline]
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    #[inline]
    pub fn type_name(&self) -> &str {
        self.inner.schema.type_name()
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.inner.schema.kind()
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.inner.settings
    }

    pub fn properties(&self) -> &PropertyCollection {
        &self.inner.properties
    }

    pub fn rules(&self) -> &RuleManager {
        &self.inner.rules
    }

    // =========================================================================
    // Field access
    // =========================================================================

    /// Indexer-style handle to one field.
    pub fn field(&self, name: &str) -> Result<Field, GraphError> {
        let property = self.inner.properties.get(name)?;
        Ok(Field::new(self.clone(), property))
    }

    pub fn value(&self, name: &str) -> Result<Value, GraphError> {
        Ok(self.inner.properties.get(name)?.value())
    }

    /// Typed read; `Ok(None)` when the field is null.
    pub fn get<T: FromValue>(&self, name: &str) -> Result<Option<T>, GraphError> {
        let property = self.inner.properties.get(name)?;
        read_typed(&property)
    }

    /// Tracked write: marks the field modified, runs its rules and notifies,
    /// unless the node is paused.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<(), GraphError> {
        let property = self.inner.properties.get(name)?;
        self.set_property(&property, value.into())
    }

    /// Untracked write used for hydration.
    pub fn load(&self, name: &str, value: impl Into<Value>) -> Result<(), GraphError> {
        let property = self.inner.properties.get(name)?;
        self.load_property(&property, value.into())
    }

    pub fn child_node(&self, name: &str) -> Result<Option<Node>, GraphError> {
        self.get::<Node>(name)
    }

    pub fn child_list(&self, name: &str) -> Result<Option<ChildList>, GraphError> {
        self.get::<ChildList>(name)
    }

    pub(crate) fn set_property(&self, property: &Rc<Property>, value: Value) -> Result<(), GraphError> {
        self.check_attachable(&value)?;
        let paused = self.is_paused();
        match property.write(value, WriteMode::Set { track: !paused })? {
            WriteOutcome::Unchanged => Ok(()),
            WriteOutcome::Changed { previous } => {
                self.relink(property, &previous);
                if !paused {
                    self.property_changed(property.name_rc());
                }
                Ok(())
            }
        }
    }

    pub(crate) fn load_property(&self, property: &Rc<Property>, value: Value) -> Result<(), GraphError> {
        self.check_attachable(&value)?;
        if let WriteOutcome::Changed { previous } = property.write(value, WriteMode::Load)? {
            self.relink(property, &previous);
        }
        Ok(())
    }

    /// A node may not become a descendant of itself.
    fn check_attachable(&self, value: &Value) -> Result<(), GraphError> {
        if let Value::Node(child) = value {
            if child.ptr_eq(self) || self.has_ancestor(child) {
                return Err(GraphError::aggregate_boundary(format!(
                    "{} cannot hold itself or one of its ancestors",
                    self.type_name()
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn has_ancestor(&self, candidate: &Node) -> bool {
        let mut current = self.parent();
        while let Some(node) = current {
            if node.ptr_eq(candidate) {
                return true;
            }
            current = node.parent();
        }
        false
    }

    fn relink(&self, property: &Property, previous: &Value) {
        match previous {
            Value::Node(old) => {
                if old.is_linked_to(self, property.name()) {
                    old.set_parent(None);
                }
            }
            Value::List(old) => old.detach_owner(self),
            _ => {}
        }
        self.link_property(property);
    }

    fn link_property(&self, property: &Property) {
        match property.child() {
            Some(ChildRef::Node(child)) => child.set_parent(Some(ParentLink::Node {
                node: self.downgrade(),
                field: property.name_rc(),
            })),
            Some(ChildRef::List(list)) => list.attach_owner(self, property.name_rc()),
            None => {}
        }
    }

    /// Re-establish parent links of every child after hydration.
    pub(crate) fn relink_children(&self) {
        for property in self.inner.properties.snapshot() {
            self.link_property(&property);
            match property.child() {
                Some(ChildRef::Node(child)) => child.relink_children(),
                Some(ChildRef::List(list)) => list.relink_items(),
                None => {}
            }
        }
    }

    // =========================================================================
    // Change propagation
    // =========================================================================

    /// Register a callback for every change at or below this node.
    pub fn subscribe(&self, callback: impl Fn(&PropertyChange) + 'static) -> Subscription {
        self.inner.subscribers.subscribe(callback)
    }

    fn property_changed(&self, field: Rc<str>) {
        tracing::trace!(node = %self.type_name(), field = %field, "Property changed");
        self.run_triggered_rules(&field);
        self.propagate(PropertyChange::new(field, self.clone()));
    }

    pub(crate) fn propagate(&self, change: PropertyChange) {
        self.inner.subscribers.notify(&change);
        let link = self.inner.parent.borrow().clone();
        match link {
            Some(ParentLink::Node { node, field }) => {
                if let Some(parent) = Node::upgrade(&node) {
                    parent.child_changed(field, change);
                }
            }
            Some(ParentLink::List(list)) => {
                if let Some(list) = list.upgrade() {
                    list.item_changed(change);
                }
            }
            None => {}
        }
    }

    /// A change arrived from the child held in `field`.
    pub(crate) fn child_changed(&self, field: Rc<str>, change: PropertyChange) {
        if self.is_paused() {
            return;
        }
        let wrapped = PropertyChange::wrap(field, self.clone(), change);
        self.run_triggered_rules(&wrapped.full_path());
        self.propagate(wrapped);
    }

    /// Membership of the list held in `field` changed.
    pub(crate) fn list_changed(&self, field: Rc<str>) {
        if self.is_paused() {
            return;
        }
        self.run_triggered_rules(&field);
        self.propagate(PropertyChange::new(field, self.clone()));
    }

    // =========================================================================
    // Parent links
    // =========================================================================

    pub(crate) fn set_parent(&self, link: Option<ParentLink>) {
        *self.inner.parent.borrow_mut() = link;
    }

    fn is_linked_to(&self, parent: &Node, field: &str) -> bool {
        match &*self.inner.parent.borrow() {
            Some(ParentLink::Node { node, field: f }) => {
                node.upgrade().is_some_and(|n| Rc::ptr_eq(&n, &parent.inner)) && &**f == field
            }
            _ => false,
        }
    }

    /// The node holding this one, directly or through a list.
    pub fn parent(&self) -> Option<Node> {
        let link = self.inner.parent.borrow().clone();
        match link? {
            ParentLink::Node { node, .. } => Node::upgrade(&node),
            ParentLink::List(list) => list.upgrade()?.owner(),
        }
    }

    /// Top-most ancestor; `None` for a node without a parent.
    pub fn root(&self) -> Option<Node> {
        let mut root = self.parent()?;
        while let Some(parent) = root.parent() {
            root = parent;
        }
        Some(root)
    }

    /// The collection this node belongs to, kept after removal until the
    /// delete is confirmed.
    pub fn owning_list(&self) -> Option<ChildList> {
        self.inner.owning_list.borrow().as_ref()?.upgrade()
    }

    pub(crate) fn set_owning_list(&self, list: Option<WeakChildList>) {
        *self.inner.owning_list.borrow_mut() = list;
    }

    // =========================================================================
    // Flags
    // =========================================================================

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.inner.pause_depth.get() > 0
    }

    pub fn is_self_valid(&self) -> bool {
        self.inner.object_messages.borrow().is_empty() && self.inner.properties.is_self_valid()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.object_messages.borrow().is_empty() && self.inner.properties.is_valid()
    }

    pub fn is_self_busy(&self) -> bool {
        self.inner.running.get() > 0
            || !self.inner.marked_busy.borrow().is_empty()
            || self.inner.properties.is_self_busy()
    }

    pub fn is_busy(&self) -> bool {
        self.is_self_busy() || self.inner.properties.is_busy()
    }

    #[inline]
    pub fn is_new(&self) -> bool {
        self.inner.state.is_new.get()
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.inner.state.is_deleted.get()
    }

    #[inline]
    pub fn is_child(&self) -> bool {
        self.inner.state.is_child.get()
    }

    #[inline]
    pub fn is_marked_modified(&self) -> bool {
        self.inner.state.marked_modified.get()
    }

    pub fn is_self_modified(&self) -> bool {
        match self.kind() {
            NodeKind::Validate => false,
            NodeKind::Entity => {
                self.is_new()
                    || self.is_deleted()
                    || self.is_marked_modified()
                    || self.inner.properties.is_self_modified()
            }
        }
    }

    pub fn is_modified(&self) -> bool {
        self.is_self_modified() || self.inner.properties.is_modified()
    }

    pub fn is_savable(&self) -> bool {
        self.is_modified() && self.is_valid() && !self.is_busy() && !self.is_child()
    }

    /// Names of the fields changed since the last `mark_unmodified`.
    pub fn modified_properties(&self) -> Vec<String> {
        self.inner.properties.modified_names()
    }

    // =========================================================================
    // State transitions
    // =========================================================================

    pub fn mark_new(&self) {
        self.inner.state.is_new.set(true);
    }

    pub fn mark_old(&self) {
        self.inner.state.is_new.set(false);
    }

    /// Clear field and object-level modification after a successful commit.
    pub fn mark_unmodified(&self) {
        self.inner.properties.mark_unmodified();
        self.inner.state.marked_modified.set(false);
    }

    /// Force the node modified without changing a field.
    pub fn mark_modified(&self) {
        self.inner.state.marked_modified.set(true);
    }

    pub(crate) fn mark_deleted(&self) {
        self.inner.state.is_deleted.set(true);
    }

    pub(crate) fn mark_as_child(&self) {
        self.inner.state.is_child.set(true);
    }

    pub(crate) fn clear_child(&self) {
        self.inner.state.is_child.set(false);
    }

    /// Delete this node.
    ///
    /// A node contained in a list is removed through that list, so the result
    /// is identical to `list.remove(node)`. Otherwise it is flagged deleted.
    pub fn delete(&self) -> Result<(), GraphError> {
        if let Some(list) = self.owning_list() {
            if list.contains(self) {
                list.remove(self)?;
                return Ok(());
            }
        }
        self.mark_deleted();
        Ok(())
    }

    pub fn undelete(&self) {
        self.inner.state.is_deleted.set(false);
    }

    /// Hold the node busy under an external correlation id.
    pub fn mark_busy(&self, id: BusyId) {
        self.inner.marked_busy.borrow_mut().insert(id);
    }

    pub fn mark_unbusy(&self, id: BusyId) {
        self.inner.marked_busy.borrow_mut().remove(&id);
    }

    /// Which commit the persistence layer should issue, if any.
    ///
    /// Children must be committed through their aggregate root, and nothing
    /// may be committed while invalid or busy. A new node that was deleted
    /// never reached storage, so there is nothing to do.
    pub fn pending_operation(&self) -> Result<Option<LifecycleOperation>, GraphError> {
        if self.is_child() {
            return Err(GraphError::ChildSave(self.type_name().to_string()));
        }
        if self.is_busy() {
            return Err(GraphError::NotSavable(format!("{} is busy", self.type_name())));
        }
        if self.is_deleted() {
            return Ok((!self.is_new()).then_some(LifecycleOperation::Delete));
        }
        if !self.is_valid() {
            return Err(GraphError::NotSavable(format!("{} is invalid", self.type_name())));
        }
        if !self.is_modified() {
            return Ok(None);
        }
        Ok(Some(if self.is_new() {
            LifecycleOperation::Insert
        } else {
            LifecycleOperation::Update
        }))
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Object-level messages (not tied to a field).
    pub fn object_messages(&self) -> Vec<String> {
        self.inner
            .object_messages
            .borrow()
            .messages()
            .map(str::to_string)
            .collect()
    }

    /// Every message in the subtree with its dotted path.
    pub fn property_messages(&self) -> Vec<PropertyMessage> {
        let mut out = Vec::new();
        self.collect_messages(&mut out, "");
        out
    }

    pub(crate) fn collect_messages(&self, out: &mut Vec<PropertyMessage>, prefix: &str) {
        out.extend(self.object_messages().into_iter().map(|message| PropertyMessage {
            path: prefix.to_string(),
            message,
        }));
        self.inner.properties.collect_messages(out, prefix);
    }

    /// Clear messages on this node only.
    pub fn clear_self_messages(&self) {
        self.inner.object_messages.borrow_mut().clear();
        for property in self.inner.properties.snapshot() {
            property.clear_messages();
        }
    }

    /// Clear messages on this node and every descendant.
    pub fn clear_all_messages(&self) {
        self.clear_self_messages();
        for child in self.inner.properties.children() {
            child.clear_all_messages();
        }
    }
}

pub(crate) fn read_typed<T: FromValue>(property: &Property) -> Result<Option<T>, GraphError> {
    property.with_value(|value| {
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(value)
            .map(Some)
            .ok_or_else(|| GraphError::type_mismatch(property.name(), T::KIND, value.kind()))
    })
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("type", &self.type_name())
            .field("id", &self.id())
            .field("new", &self.is_new())
            .field("deleted", &self.is_deleted())
            .field("child", &self.is_child())
            .field("paused", &self.is_paused())
            .finish()
    }
}

#[cfg(test)]
mod tests;
