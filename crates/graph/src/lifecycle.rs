//! Persistence lifecycle hooks
//!
//! The factory layer brackets every create, fetch, insert, update and delete
//! with `on_lifecycle_start` / `on_lifecycle_complete`. While an operation is
//! in flight the subtree is paused, so hydration and server-side defaults
//! never mark anything modified or trigger rules. Completion resumes and
//! moves the entity state machine forward.
//!
//! Serialization uses the same pausing through the `on_serializing` /
//! `on_deserialized` family; deserialization additionally re-links every
//! child to its parent, since weak parent links are not part of the payload.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::list::ChildList;
use crate::node::Node;
use crate::schema::NodeKind;

/// Persistence operation bracketed by lifecycle hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleOperation {
    Create,
    Fetch,
    Insert,
    Update,
    Delete,
}

impl fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleOperation::Create => "create",
            LifecycleOperation::Fetch => "fetch",
            LifecycleOperation::Insert => "insert",
            LifecycleOperation::Update => "update",
            LifecycleOperation::Delete => "delete",
        };
        f.write_str(name)
    }
}

impl Node {
    pub fn on_lifecycle_start(&self, operation: LifecycleOperation) {
        tracing::debug!(node = %self.type_name(), id = %self.id(), %operation, "Lifecycle started");
        self.increment_pause();
    }

    pub fn on_lifecycle_complete(&self, operation: LifecycleOperation) {
        match operation {
            LifecycleOperation::Create => {
                if self.kind() == NodeKind::Entity {
                    self.mark_new();
                }
            }
            LifecycleOperation::Fetch | LifecycleOperation::Insert => {
                self.mark_old();
                self.mark_unmodified();
            }
            LifecycleOperation::Update => self.mark_unmodified(),
            LifecycleOperation::Delete => {}
        }
        self.release_pause();
        tracing::debug!(node = %self.type_name(), id = %self.id(), %operation, "Lifecycle completed");
    }

    pub fn on_serializing(&self) {
        self.increment_pause();
    }

    pub fn on_serialized(&self) {
        self.release_pause();
    }

    pub fn on_deserializing(&self) {
        self.increment_pause();
    }

    /// Re-link every child to its parent, then resume.
    pub fn on_deserialized(&self) {
        self.relink_children();
        self.release_pause();
    }
}

impl ChildList {
    pub fn on_lifecycle_start(&self, operation: LifecycleOperation) {
        tracing::debug!(list = %self.id(), %operation, "Lifecycle started");
        self.pause_subtree();
    }

    /// Insert and update commit pending deletions and mark the remaining
    /// children unmodified.
    pub fn on_lifecycle_complete(&self, operation: LifecycleOperation) {
        if matches!(
            operation,
            LifecycleOperation::Insert | LifecycleOperation::Update
        ) {
            self.confirm_deletions();
            for item in self.items() {
                item.mark_unmodified();
            }
        }
        self.release_subtree();
        tracing::debug!(list = %self.id(), %operation, "Lifecycle completed");
    }

    pub fn on_deserializing(&self) {
        self.pause_subtree();
    }

    pub fn on_deserialized(&self) {
        self.relink_items();
        self.release_subtree();
    }
}
