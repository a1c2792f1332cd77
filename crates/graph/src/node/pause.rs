//! Pausing change handling across a subtree
//!
//! While paused, writes are untracked, rules do not run and no change
//! notifications are raised. Pausing nests: every pause increments a depth
//! counter on each node and list of the subtree, and actions resume once the
//! depth returns to zero.

use crate::list::ChildList;
use crate::property::ChildRef;

use super::Node;

/// A node or list affected by a pause
#[derive(Clone)]
pub(crate) enum PauseTarget {
    Node(Node),
    List(ChildList),
}

impl PauseTarget {
    fn pause(&self) {
        match self {
            PauseTarget::Node(node) => {
                let depth = &node.inner.pause_depth;
                depth.set(depth.get().saturating_add(1));
            }
            PauseTarget::List(list) => list.increment_pause(),
        }
    }

    /// Decrement the depth; `force` drops it straight to zero.
    fn release(&self, force: bool) {
        match self {
            PauseTarget::Node(node) => {
                let depth = &node.inner.pause_depth;
                if depth.get() == 0 {
                    return;
                }
                depth.set(if force { 0 } else { depth.get() - 1 });
                if depth.get() == 0 && node.settings().rerun_rules_on_resume() {
                    tracing::debug!(node = %node.type_name(), "Re-running rules on resume");
                    node.rerun_rules_detached();
                }
            }
            PauseTarget::List(list) => list.release_pause(force),
        }
    }
}

/// Collect `node` and everything below it.
pub(crate) fn collect_node(node: &Node, out: &mut Vec<PauseTarget>) {
    out.push(PauseTarget::Node(node.clone()));
    for child in node.inner.properties.children() {
        match child {
            ChildRef::Node(child) => collect_node(&child, out),
            ChildRef::List(list) => collect_list(&list, out),
        }
    }
}

pub(crate) fn collect_list(list: &ChildList, out: &mut Vec<PauseTarget>) {
    out.push(PauseTarget::List(list.clone()));
    for item in list.items() {
        collect_node(&item, out);
    }
}

/// Pause one level on every target without a guard.
pub(crate) fn hold_targets(targets: &[PauseTarget]) {
    for target in targets {
        target.pause();
    }
}

/// Pause every target; the guard resumes them on drop.
pub(crate) fn pause_targets(targets: Vec<PauseTarget>) -> PauseGuard {
    hold_targets(&targets);
    PauseGuard { targets }
}

/// Release one level of pause on every target, children first.
pub(crate) fn release_targets(targets: &[PauseTarget], force: bool) {
    for target in targets.iter().rev() {
        target.release(force);
    }
}

/// Scope of a pause; dropping it resumes the nodes and lists it paused.
#[must_use = "dropping a PauseGuard resumes actions immediately"]
pub struct PauseGuard {
    targets: Vec<PauseTarget>,
}

impl PauseGuard {
    /// Number of nodes and lists held paused by this guard.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl std::fmt::Debug for PauseGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PauseGuard")
            .field("targets", &self.targets.len())
            .finish()
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        release_targets(&self.targets, false);
    }
}

impl Node {
    /// Pause this node and its current subtree.
    pub fn pause_all_actions(&self) -> PauseGuard {
        let mut targets = Vec::new();
        collect_node(self, &mut targets);
        pause_targets(targets)
    }

    /// Resume this node and its subtree regardless of nesting depth.
    ///
    /// Open lifecycle brackets are released too, including children that
    /// were detached while a bracket was open.
    pub fn resume_all_actions(&self) {
        let mut targets = Vec::new();
        collect_node(self, &mut targets);
        for held in std::mem::take(&mut *self.inner.held_pauses.borrow_mut()) {
            targets.extend(held);
        }
        release_targets(&targets, true);
    }

    /// Open a lifecycle bracket: pause the current subtree without a guard.
    ///
    /// The descendants paused here are remembered until the matching
    /// [`Node::release_pause`], so a child detached inside the bracket is
    /// still resumed.
    pub(crate) fn increment_pause(&self) {
        let mut targets = Vec::new();
        collect_node(self, &mut targets);
        hold_targets(&targets);
        // Descendants only; the node releases itself.
        let descendants = targets.split_off(1);
        self.inner.held_pauses.borrow_mut().push(descendants);
    }

    /// Close the innermost lifecycle bracket.
    pub(crate) fn release_pause(&self) {
        let descendants = self.inner.held_pauses.borrow_mut().pop().unwrap_or_default();
        release_targets(&descendants, false);
        PauseTarget::Node(self.clone()).release(false);
    }
}
