//! Value containers
//!
//! A [`Property`] holds one tracked field: its value, read-only flag, busy
//! marks, rule messages and (for entity nodes) self-modification flag.
//!
//! # Invariants
//!
//! 1. When the value is a child node or child list, validity, busy state and
//!    messages are delegated to the child; the container's own bag is ignored.
//! 2. Tracked writes of an equal value are no-ops.
//! 3. A busy child is never attached or detached by a tracked write.
//!
//! Containers never run rules or notify on their own; the owning node
//! orchestrates that after a successful write, so the pause state is checked
//! in exactly one place.

pub mod collection;

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::GraphError;
use crate::ids::{BusyId, RuleId};
use crate::list::ChildList;
use crate::message::{MessageBag, PropertyMessage};
use crate::node::Node;
use crate::rules::RunRulesFlag;
use crate::schema::{FieldDecl, NodeKind};
use crate::value::Value;

pub use collection::PropertyCollection;

/// How a value reaches the container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// Setter path. `track` is false while the owning node is paused.
    Set { track: bool },
    /// Hydration path: no read-only, busy or modification handling.
    Load,
}

/// Result of a write
#[derive(Debug)]
pub(crate) enum WriteOutcome {
    Unchanged,
    Changed { previous: Value },
}

/// Builds containers for declared fields.
///
/// Injected into nodes so every container for the same declaration is
/// produced the same way.
#[cfg_attr(test, mockall::automock)]
pub trait PropertyFactory {
    fn create(&self, decl: &FieldDecl, node_kind: NodeKind) -> Property;
}

/// Factory producing plain containers; entity nodes get modification tracking.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPropertyFactory;

impl PropertyFactory for DefaultPropertyFactory {
    fn create(&self, decl: &FieldDecl, node_kind: NodeKind) -> Property {
        Property::new(decl.clone(), node_kind == NodeKind::Entity)
    }
}

/// A tracked field
pub struct Property {
    decl: FieldDecl,
    name: Rc<str>,
    value: RefCell<Value>,
    read_only: Cell<bool>,
    tracks_modification: bool,
    self_modified: Cell<bool>,
    marked_busy: RefCell<BTreeSet<BusyId>>,
    messages: RefCell<MessageBag>,
}

impl Property {
    pub fn new(decl: FieldDecl, tracks_modification: bool) -> Self {
        Self {
            name: Rc::from(decl.name()),
            read_only: Cell::new(decl.is_read_only()),
            decl,
            value: RefCell::new(Value::Null),
            tracks_modification,
            self_modified: Cell::new(false),
            marked_busy: RefCell::new(BTreeSet::new()),
            messages: RefCell::new(MessageBag::new()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_rc(&self) -> Rc<str> {
        Rc::clone(&self.name)
    }

    #[inline]
    pub fn decl(&self) -> &FieldDecl {
        &self.decl
    }

    /// Snapshot of the current value.
    pub fn value(&self) -> Value {
        self.value.borrow().clone()
    }

    pub fn with_value<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.value.borrow())
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only.get()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.set(read_only);
    }

    pub(crate) fn child(&self) -> Option<ChildRef> {
        ChildRef::from_value(&self.value.borrow())
    }

    pub(crate) fn write(&self, value: Value, mode: WriteMode) -> Result<WriteOutcome, GraphError> {
        if !self.decl.kind().accepts(&value) {
            return Err(GraphError::type_mismatch(
                self.name(),
                self.decl.kind(),
                value.kind(),
            ));
        }

        if let WriteMode::Set { .. } = mode {
            if self.is_read_only() {
                return Err(GraphError::read_only(self.name()));
            }
            {
                let current = self.value.borrow();
                if *current == value {
                    return Ok(WriteOutcome::Unchanged);
                }
                if ChildRef::from_value(&current).is_some_and(|c| c.is_busy()) {
                    return Err(GraphError::busy(format!(
                        "cannot replace busy child held in {}",
                        self.name()
                    )));
                }
            }
            if ChildRef::from_value(&value).is_some_and(|c| c.is_busy()) {
                return Err(GraphError::busy(format!(
                    "cannot attach busy child to {}",
                    self.name()
                )));
            }
        }

        let previous = self.value.replace(value);
        if let WriteMode::Set { track: true } = mode {
            if self.tracks_modification {
                self.self_modified.set(true);
            }
        }
        Ok(WriteOutcome::Changed { previous })
    }

    // =========================================================================
    // Modification
    // =========================================================================

    #[inline]
    pub fn is_self_modified(&self) -> bool {
        self.self_modified.get()
    }

    /// Self-modified, or holding a modified child.
    pub fn is_modified(&self) -> bool {
        self.is_self_modified() || self.child().is_some_and(|c| c.is_modified())
    }

    pub fn mark_unmodified(&self) {
        self.self_modified.set(false);
    }

    pub(crate) fn mark_self_modified(&self) {
        if self.tracks_modification {
            self.self_modified.set(true);
        }
    }

    // =========================================================================
    // Busy
    // =========================================================================

    pub fn add_marked_busy(&self, id: BusyId) {
        self.marked_busy.borrow_mut().insert(id);
    }

    pub fn remove_marked_busy(&self, id: BusyId) {
        self.marked_busy.borrow_mut().remove(&id);
    }

    /// Held busy by at least one correlation id.
    pub fn is_self_busy(&self) -> bool {
        !self.marked_busy.borrow().is_empty()
    }

    pub fn is_busy(&self) -> bool {
        self.is_self_busy() || self.child().is_some_and(|c| c.is_busy())
    }

    /// Await the held child's outstanding work, if any.
    pub fn wait_for_tasks(&self) -> LocalBoxFuture<'static, Result<(), GraphError>> {
        match self.child() {
            Some(child) => async move { child.wait_for_tasks().await }.boxed_local(),
            None => futures_util::future::ready(Ok(())).boxed_local(),
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Valid on its own: child values are not considered.
    pub fn is_self_valid(&self) -> bool {
        self.child().is_some() || self.messages.borrow().is_empty()
    }

    pub fn is_valid(&self) -> bool {
        match self.child() {
            Some(child) => child.is_valid(),
            None => self.messages.borrow().is_empty(),
        }
    }

    /// The container's own messages; empty when the value is a child.
    pub fn messages(&self) -> Vec<String> {
        if self.child().is_some() {
            return Vec::new();
        }
        self.messages
            .borrow()
            .messages()
            .map(str::to_string)
            .collect()
    }

    pub(crate) fn has_messages_for(&self, rule_id: &RuleId) -> bool {
        self.messages.borrow().contains(rule_id)
    }

    pub(crate) fn replace_rule_messages(&self, rule_id: &RuleId, messages: Vec<String>) {
        self.messages.borrow_mut().replace(rule_id, messages);
    }

    pub(crate) fn remove_rule_messages(&self, rule_id: &RuleId) -> bool {
        self.messages.borrow_mut().remove(rule_id)
    }

    pub fn clear_messages(&self) {
        self.messages.borrow_mut().clear();
    }

    pub(crate) fn collect_messages(&self, out: &mut Vec<PropertyMessage>, prefix: &str) {
        let path = join_path(prefix, self.name());
        match self.child() {
            Some(child) => child.collect_messages(out, &path),
            None => out.extend(self.messages.borrow().messages().map(|m| PropertyMessage {
                path: path.clone(),
                message: m.to_string(),
            })),
        }
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name())
            .field("value", &self.value.borrow().to_string())
            .field("read_only", &self.is_read_only())
            .field("self_modified", &self.is_self_modified())
            .field("self_busy", &self.is_self_busy())
            .finish()
    }
}

pub(crate) fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

/// A child held by a container
#[derive(Clone)]
pub(crate) enum ChildRef {
    Node(Node),
    List(ChildList),
}

impl ChildRef {
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Node(node) => Some(ChildRef::Node(node.clone())),
            Value::List(list) => Some(ChildRef::List(list.clone())),
            _ => None,
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        match self {
            ChildRef::Node(node) => node.is_valid(),
            ChildRef::List(list) => list.is_valid(),
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        match self {
            ChildRef::Node(node) => node.is_busy(),
            ChildRef::List(list) => list.is_busy(),
        }
    }

    pub(crate) fn is_modified(&self) -> bool {
        match self {
            ChildRef::Node(node) => node.is_modified(),
            ChildRef::List(list) => list.is_modified(),
        }
    }

    pub(crate) fn has_pending_tasks(&self) -> bool {
        match self {
            ChildRef::Node(node) => node.has_pending_tasks(),
            ChildRef::List(list) => list.has_pending_tasks(),
        }
    }

    pub(crate) async fn wait_for_tasks(&self) -> Result<(), GraphError> {
        match self {
            ChildRef::Node(node) => node.wait_for_tasks().await,
            ChildRef::List(list) => list.wait_for_tasks().await,
        }
    }

    pub(crate) async fn run_rules(
        &self,
        flags: RunRulesFlag,
        cancel: CancellationToken,
    ) -> Result<(), GraphError> {
        match self {
            ChildRef::Node(node) => node.run_rules(flags, cancel).await,
            ChildRef::List(list) => list.run_rules(flags, cancel).await,
        }
    }

    pub(crate) fn collect_messages(&self, out: &mut Vec<PropertyMessage>, prefix: &str) {
        match self {
            ChildRef::Node(node) => node.collect_messages(out, prefix),
            ChildRef::List(list) => list.collect_messages(out, prefix),
        }
    }

    pub(crate) fn clear_all_messages(&self) {
        match self {
            ChildRef::Node(node) => node.clear_all_messages(),
            ChildRef::List(list) => list.clear_all_messages(),
        }
    }
}
