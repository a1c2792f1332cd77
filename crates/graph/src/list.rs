//! Child collections
//!
//! A [`ChildList`] holds the child nodes of one aggregate field together with
//! the persisted children removed since the last commit. Removal of a
//! persisted child is deferred: it moves to `pending_deletion` (still linked
//! to the list) until an insert or update completes, so the persistence layer
//! can issue the deletes.
//!
//! Membership changes are reported to the owning node as a change of the
//! field holding the list; changes inside an item arrive at the owner as
//! dotted paths (`Lines.Quantity`).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tokio_util::sync::CancellationToken;

use crate::config::GraphSettings;
use crate::error::GraphError;
use crate::events::{PropertyChange, Subscribers, Subscription};
use crate::ids::NodeId;
use crate::message::PropertyMessage;
use crate::node::{
    collect_list, hold_targets, pause_targets, release_targets, Node, NodeInner, ParentLink,
    PauseGuard, PauseTarget,
};
use crate::rules::RunRulesFlag;
use crate::schema::NodeKind;

pub(crate) struct ListInner {
    id: NodeId,
    settings: GraphSettings,
    items: RefCell<Vec<Node>>,
    pending: RefCell<Vec<Node>>,
    owner: RefCell<Option<(Weak<NodeInner>, Rc<str>)>>,
    pause_depth: Cell<u32>,
    held_pauses: RefCell<Vec<Vec<PauseTarget>>>,
    subscribers: Subscribers,
}

/// Ordered collection of child nodes
#[derive(Clone)]
pub struct ChildList {
    inner: Rc<ListInner>,
}

/// Non-owning handle used for parent links
#[derive(Clone)]
pub(crate) struct WeakChildList(Weak<ListInner>);

impl WeakChildList {
    pub(crate) fn upgrade(&self) -> Option<ChildList> {
        self.0.upgrade().map(|inner| ChildList { inner })
    }
}

impl Default for ChildList {
    fn default() -> Self {
        Self::new()
    }
}

impl ChildList {
    pub fn new() -> Self {
        Self::with_settings(GraphSettings::default())
    }

    pub fn with_settings(settings: GraphSettings) -> Self {
        Self {
            inner: Rc::new(ListInner {
                id: NodeId::new(),
                settings,
                items: RefCell::new(Vec::new()),
                pending: RefCell::new(Vec::new()),
                owner: RefCell::new(None),
                pause_depth: Cell::new(0),
                held_pauses: RefCell::new(Vec::new()),
                subscribers: Subscribers::new(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakChildList {
        WeakChildList(Rc::downgrade(&self.inner))
    }

    #[inline]
    pub fn ptr_eq(&self, other: &ChildList) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn settings(&self) -> &GraphSettings {
        &self.inner.settings
    }

    // =========================================================================
    // Contents
    // =========================================================================

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    /// Snapshot of the active children.
    pub fn items(&self) -> Vec<Node> {
        self.inner.items.borrow().clone()
    }

    pub fn iter(&self) -> std::vec::IntoIter<Node> {
        self.items().into_iter()
    }

    pub fn get(&self, index: usize) -> Option<Node> {
        self.inner.items.borrow().get(index).cloned()
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.position(node).is_some()
    }

    fn position(&self, node: &Node) -> Option<usize> {
        self.inner.items.borrow().iter().position(|n| n.ptr_eq(node))
    }

    /// Persisted children removed since the last commit.
    pub fn pending_deletion(&self) -> Vec<Node> {
        self.inner.pending.borrow().clone()
    }

    // =========================================================================
    // Ownership
    // =========================================================================

    /// The node holding this list.
    pub fn owner(&self) -> Option<Node> {
        let weak = self.inner.owner.borrow().as_ref()?.0.clone();
        Node::upgrade(&weak)
    }

    /// Aggregate root this list belongs to: the owner's root, or the owner
    /// itself when it has no parent.
    pub fn root(&self) -> Option<Node> {
        let owner = self.owner()?;
        Some(owner.root().unwrap_or(owner))
    }

    fn owner_link(&self) -> Option<(Node, Rc<str>)> {
        let (node, field) = self.inner.owner.borrow().clone()?;
        Some((Node::upgrade(&node)?, field))
    }

    pub(crate) fn attach_owner(&self, owner: &Node, field: Rc<str>) {
        *self.inner.owner.borrow_mut() = Some((owner.downgrade(), field));
    }

    pub(crate) fn detach_owner(&self, owner: &Node) {
        let mut current = self.inner.owner.borrow_mut();
        let owned_by = current
            .as_ref()
            .is_some_and(|(node, _)| Weak::ptr_eq(node, &owner.downgrade()));
        if owned_by {
            *current = None;
        }
    }

    /// Re-establish item links after hydration.
    pub(crate) fn relink_items(&self) {
        for item in self.items() {
            self.link(&item);
            item.relink_children();
        }
        for pending in self.pending_deletion() {
            pending.set_owning_list(Some(self.downgrade()));
            pending.set_parent(Some(ParentLink::List(self.downgrade())));
        }
    }

    fn link(&self, node: &Node) {
        node.mark_as_child();
        node.set_owning_list(Some(self.downgrade()));
        node.set_parent(Some(ParentLink::List(self.downgrade())));
    }

    fn unlink(node: &Node) {
        node.set_parent(None);
        node.set_owning_list(None);
        node.clear_child();
    }

    // =========================================================================
    // Membership
    // =========================================================================

    /// Add a child.
    ///
    /// Unless paused, rejects nodes that are already members, busy, owned by
    /// another aggregate, or still active in another list. A node pending
    /// deletion in its previous list is taken out of that set and undeleted.
    pub fn add(&self, node: Node) -> Result<(), GraphError> {
        if let Some(owner) = self.owner() {
            if owner.ptr_eq(&node) || owner.has_ancestor(&node) {
                return Err(GraphError::aggregate_boundary(format!(
                    "{} cannot contain its own ancestor",
                    owner.type_name()
                )));
            }
        }

        if !self.is_paused() {
            self.check_add(&node)?;
        }

        if let Some(previous) = node.owning_list() {
            if self.same_aggregate(&previous) && previous.discard_pending(&node) {
                tracing::debug!(node = %node.type_name(), id = %node.id(), "Restored child pending deletion");
                node.undelete();
            }
        }

        self.link(&node);
        self.inner.items.borrow_mut().push(node);
        self.membership_changed();
        Ok(())
    }

    fn same_aggregate(&self, other: &ChildList) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self.root(), other.root()) {
            (Some(mine), Some(theirs)) => mine.ptr_eq(&theirs),
            _ => false,
        }
    }

    fn check_add(&self, node: &Node) -> Result<(), GraphError> {
        if self.contains(node) {
            return Err(GraphError::DuplicateChild(node.type_name().to_string()));
        }
        if node.is_busy() {
            return Err(GraphError::busy(format!(
                "cannot add busy {}",
                node.type_name()
            )));
        }
        if let Some(node_root) = node.root() {
            let same_aggregate = self.root().is_some_and(|root| root.ptr_eq(&node_root));
            if !same_aggregate {
                tracing::debug!(node = %node.type_name(), id = %node.id(), "Rejected child from another aggregate");
                return Err(GraphError::aggregate_boundary(format!(
                    "{} belongs to a different aggregate",
                    node.type_name()
                )));
            }
        }
        if let Some(other) = node.owning_list() {
            if !other.ptr_eq(self) && other.contains(node) {
                return Err(GraphError::AlreadyContained(node.type_name().to_string()));
            }
        }
        Ok(())
    }

    /// Remove a child; `Ok(false)` when it is not a member.
    ///
    /// New nodes and validate-only nodes are discarded outright. Persisted
    /// entities are marked deleted and kept in `pending_deletion` until the
    /// next insert or update completes.
    pub fn remove(&self, node: &Node) -> Result<bool, GraphError> {
        let Some(index) = self.position(node) else {
            return Ok(false);
        };
        if node.is_busy() {
            return Err(GraphError::busy(format!(
                "cannot remove busy {}",
                node.type_name()
            )));
        }

        self.inner.items.borrow_mut().remove(index);
        if node.is_new() || node.kind() == NodeKind::Validate {
            Self::unlink(node);
        } else {
            node.mark_deleted();
            self.inner.pending.borrow_mut().push(node.clone());
        }
        self.membership_changed();
        Ok(true)
    }

    /// Take `node` out of the pending-deletion set; true if it was there.
    pub(crate) fn discard_pending(&self, node: &Node) -> bool {
        let mut pending = self.inner.pending.borrow_mut();
        match pending.iter().position(|n| n.ptr_eq(node)) {
            Some(index) => {
                pending.remove(index);
                true
            }
            None => false,
        }
    }

    /// Forget removed children once their deletion is committed.
    pub(crate) fn confirm_deletions(&self) {
        let confirmed = std::mem::take(&mut *self.inner.pending.borrow_mut());
        for node in &confirmed {
            node.set_owning_list(None);
            node.set_parent(None);
        }
        if !confirmed.is_empty() {
            tracing::debug!(list = %self.id(), count = confirmed.len(), "Confirmed child deletions");
        }
    }

    fn membership_changed(&self) {
        if self.is_paused() {
            return;
        }
        if let Some((owner, field)) = self.owner_link() {
            owner.list_changed(field);
        }
    }

    pub(crate) fn item_changed(&self, change: PropertyChange) {
        if self.is_paused() {
            return;
        }
        self.inner.subscribers.notify(&change);
        if let Some((owner, field)) = self.owner_link() {
            owner.child_changed(field, change);
        }
    }

    /// Register a callback for changes inside the items.
    pub fn subscribe(&self, callback: impl Fn(&PropertyChange) + 'static) -> Subscription {
        self.inner.subscribers.subscribe(callback)
    }

    // =========================================================================
    // Pause
    // =========================================================================

    pub fn is_paused(&self) -> bool {
        self.inner.pause_depth.get() > 0
    }

    /// Pause the list and its items.
    pub fn pause_all_actions(&self) -> PauseGuard {
        let mut targets = Vec::new();
        collect_list(self, &mut targets);
        pause_targets(targets)
    }

    pub fn resume_all_actions(&self) {
        let mut targets = Vec::new();
        collect_list(self, &mut targets);
        for held in std::mem::take(&mut *self.inner.held_pauses.borrow_mut()) {
            targets.extend(held);
        }
        release_targets(&targets, true);
    }

    /// Open a lifecycle bracket over the list and its current items.
    pub(crate) fn pause_subtree(&self) {
        let mut targets = Vec::new();
        collect_list(self, &mut targets);
        hold_targets(&targets);
        let items = targets.split_off(1);
        self.inner.held_pauses.borrow_mut().push(items);
    }

    /// Close the innermost bracket, resuming exactly the items it paused.
    pub(crate) fn release_subtree(&self) {
        let items = self.inner.held_pauses.borrow_mut().pop().unwrap_or_default();
        release_targets(&items, false);
        self.release_pause(false);
    }

    pub(crate) fn increment_pause(&self) {
        let depth = &self.inner.pause_depth;
        depth.set(depth.get().saturating_add(1));
    }

    pub(crate) fn release_pause(&self, force: bool) {
        let depth = &self.inner.pause_depth;
        depth.set(if force { 0 } else { depth.get().saturating_sub(1) });
    }

    // =========================================================================
    // Aggregate state
    // =========================================================================

    pub fn is_valid(&self) -> bool {
        self.inner.items.borrow().iter().all(Node::is_valid)
    }

    /// A list has no rules of its own.
    pub fn is_self_valid(&self) -> bool {
        true
    }

    pub fn is_busy(&self) -> bool {
        self.inner.items.borrow().iter().any(Node::is_busy)
    }

    pub fn is_self_busy(&self) -> bool {
        false
    }

    /// Pending deletions count as a modification of the list itself.
    pub fn is_self_modified(&self) -> bool {
        !self.inner.pending.borrow().is_empty()
    }

    pub fn is_modified(&self) -> bool {
        self.is_self_modified() || self.inner.items.borrow().iter().any(Node::is_modified)
    }

    pub(crate) fn has_pending_tasks(&self) -> bool {
        self.inner.items.borrow().iter().any(Node::has_pending_tasks)
    }

    /// Await items until none has outstanding work.
    pub async fn wait_for_tasks(&self) -> Result<(), GraphError> {
        let limit = self.inner.settings.max_wait_rescans();
        let mut first_error = None;
        let mut rescans = 0u32;

        while let Some(item) = self.items().into_iter().find(Node::has_pending_tasks) {
            rescans += 1;
            if rescans > limit {
                return Err(GraphError::WaitLimitExceeded(limit));
            }
            if let Err(err) = item.wait_for_tasks().await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Run rules on every item.
    pub async fn run_rules(
        &self,
        flags: RunRulesFlag,
        cancel: CancellationToken,
    ) -> Result<(), GraphError> {
        let mut first_error = None;
        for item in self.items() {
            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }
            match item.run_rules(flags, cancel.clone()).await {
                Err(GraphError::Cancelled) => return Err(GraphError::Cancelled),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
                Ok(()) => {}
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Messages
    // =========================================================================

    pub(crate) fn collect_messages(&self, out: &mut Vec<PropertyMessage>, prefix: &str) {
        for (index, item) in self.items().iter().enumerate() {
            item.collect_messages(out, &format!("{prefix}[{index}]"));
        }
    }

    pub fn clear_all_messages(&self) {
        for item in self.items() {
            item.clear_all_messages();
        }
    }
}

impl fmt::Debug for ChildList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildList")
            .field("id", &self.id())
            .field("len", &self.len())
            .field("pending_deletion", &self.inner.pending.borrow().len())
            .field("paused", &self.is_paused())
            .finish()
    }
}

impl IntoIterator for &ChildList {
    type Item = Node;
    type IntoIter = std::vec::IntoIter<Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
