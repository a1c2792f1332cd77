//! Rule execution on a node
//!
//! Triggered rules run in registration order. Synchronous rules execute
//! inline; at the first asynchronous rule the remainder of the sequence moves
//! onto one local task, so later rules still observe the results of earlier
//! ones. While such a task runs the node counts as busy and the trigger fields
//! carry a busy mark.
//!
//! Tasks are spawned with [`tokio::task::spawn_local`], so setters that start
//! async rules must run inside a [`tokio::task::LocalSet`].

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;

use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::error::GraphError;
use crate::ids::{BusyId, RuleId};
use crate::message::RuleMessage;
use crate::property::Property;
use crate::rules::manager::RuleEntry;
use crate::rules::{RuleBody, RunRulesFlag};

use super::Node;

/// Busy accounting for one running rule sequence.
///
/// Released on drop so a panicking rule task cannot leave the node busy.
struct BusyScope {
    node: Node,
    busy: BusyId,
    marked: Vec<Rc<Property>>,
}

impl BusyScope {
    fn begin(node: &Node, entries: &[Rc<RuleEntry>]) -> Self {
        let busy = BusyId::new();
        let mut marked: Vec<Rc<Property>> = Vec::new();
        for entry in entries {
            for trigger in entry.definition().triggers() {
                if trigger.contains('.') {
                    continue;
                }
                let Ok(property) = node.inner.properties.get(trigger) else {
                    continue;
                };
                if !marked.iter().any(|p| Rc::ptr_eq(p, &property)) {
                    property.add_marked_busy(busy);
                    marked.push(property);
                }
            }
        }
        node.inner.running.set(node.inner.running.get() + 1);
        Self {
            node: node.clone(),
            busy,
            marked,
        }
    }
}

impl Drop for BusyScope {
    fn drop(&mut self) {
        for property in &self.marked {
            property.remove_marked_busy(self.busy);
        }
        let running = self.node.inner.running.get();
        self.node.inner.running.set(running.saturating_sub(1));
    }
}

impl Node {
    /// Run the rules triggered by `path` (a field name or a dotted child path).
    pub(crate) fn run_triggered_rules(&self, path: &str) {
        let entries = self.inner.rules.triggered_by(path);
        if entries.is_empty() {
            return;
        }
        tracing::trace!(node = %self.type_name(), trigger = path, rules = entries.len(), "Running triggered rules");
        self.start_rule_sequence(entries);
    }

    /// Re-run every rule without awaiting async ones.
    pub(crate) fn rerun_rules_detached(&self) {
        let entries = self.inner.rules.all();
        if !entries.is_empty() {
            self.start_rule_sequence(entries);
        }
    }

    fn start_rule_sequence(&self, entries: Vec<Rc<RuleEntry>>) {
        let mut remaining = entries.into_iter();
        while let Some(entry) = remaining.next() {
            if let RuleBody::Sync(rule) = entry.definition().body() {
                let result = rule.execute(self);
                if let Err(err) = self.apply_rule_result(&entry, result) {
                    self.inner.faults.borrow_mut().push(err);
                }
                continue;
            }
            let rest: Vec<_> = std::iter::once(entry).chain(remaining).collect();
            self.spawn_rule_sequence(rest);
            return;
        }
    }

    fn spawn_rule_sequence(&self, entries: Vec<Rc<RuleEntry>>) {
        self.prune_finished_tasks();
        if tokio::runtime::Handle::try_current().is_err() {
            self.record_spawn_failure("no tokio runtime is running");
            return;
        }

        let scope = BusyScope::begin(self, &entries);
        let node = self.clone();
        let task = async move {
            let _scope = scope;
            let cancel = CancellationToken::new();
            let mut first_error = None;
            for entry in entries {
                if let Err(err) = node.execute_entry(&entry, &cancel).await {
                    first_error.get_or_insert(err);
                }
            }
            first_error.map_or(Ok(()), Err)
        };
        // spawn_local panics outside a LocalSet; the dropped task releases its busy scope.
        match std::panic::catch_unwind(AssertUnwindSafe(|| tokio::task::spawn_local(task))) {
            Ok(handle) => self.inner.tasks.borrow_mut().push(handle),
            Err(_) => self.record_spawn_failure("not running inside a LocalSet"),
        }
    }

    fn record_spawn_failure(&self, reason: &str) {
        tracing::error!(node = %self.type_name(), reason, "Async rules could not be started");
        self.inner
            .faults
            .borrow_mut()
            .push(GraphError::TaskSpawn(reason.to_string()));
    }

    /// Collect results of tasks that already finished.
    ///
    /// Faults move into the fault list so `wait_for_tasks` still reports them.
    fn prune_finished_tasks(&self) {
        let mut faults = Vec::new();
        self.inner.tasks.borrow_mut().retain_mut(|handle| {
            if !handle.is_finished() {
                return true;
            }
            match handle.now_or_never() {
                Some(Ok(Ok(()))) => false,
                Some(Ok(Err(err))) => {
                    faults.push(err);
                    false
                }
                Some(Err(join)) => {
                    faults.push(GraphError::TaskJoin(join.to_string()));
                    false
                }
                None => true,
            }
        });
        self.inner.faults.borrow_mut().extend(faults);
    }

    async fn execute_entry(
        &self,
        entry: &RuleEntry,
        cancel: &CancellationToken,
    ) -> Result<(), GraphError> {
        let result = match entry.definition().body() {
            RuleBody::Sync(rule) => rule.execute(self),
            RuleBody::Async(rule) => rule.execute(self, cancel).await,
        };
        self.apply_rule_result(entry, result)
    }

    fn apply_rule_result(
        &self,
        entry: &RuleEntry,
        result: anyhow::Result<Vec<RuleMessage>>,
    ) -> Result<(), GraphError> {
        entry.mark_executed();
        match result {
            Ok(messages) => self.replace_rule_messages(entry.id(), messages),
            Err(source) => {
                tracing::warn!(
                    node = %self.type_name(),
                    rule = %entry.id(),
                    error = %source,
                    "Rule faulted"
                );
                Err(GraphError::rule_fault(entry.id().clone(), source))
            }
        }
    }

    /// Replace everything `rule_id` reported on this node with `messages`.
    ///
    /// Messages without a field land in the object-level bag. Targets are
    /// resolved first, so a message for an undeclared field leaves the
    /// previous state untouched.
    fn replace_rule_messages(
        &self,
        rule_id: &RuleId,
        messages: Vec<RuleMessage>,
    ) -> Result<(), GraphError> {
        let mut object = Vec::new();
        let mut by_field: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for message in messages {
            match message.field {
                Some(field) => by_field.entry(field).or_default().push(message.message),
                None => object.push(message.message),
            }
        }

        let targets = by_field
            .into_iter()
            .map(|(field, messages)| Ok((self.inner.properties.get(&field)?, messages)))
            .collect::<Result<Vec<_>, GraphError>>()?;

        for property in self.inner.properties.snapshot() {
            property.remove_rule_messages(rule_id);
        }
        self.inner
            .object_messages
            .borrow_mut()
            .replace(rule_id, object);
        for (property, messages) in targets {
            property.replace_rule_messages(rule_id, messages);
        }
        Ok(())
    }

    fn has_messages_for(&self, rule_id: &RuleId) -> bool {
        self.inner.object_messages.borrow().contains(rule_id)
            || self
                .inner
                .properties
                .snapshot()
                .iter()
                .any(|p| p.has_messages_for(rule_id))
    }

    async fn run_entries(
        &self,
        entries: Vec<Rc<RuleEntry>>,
        cancel: &CancellationToken,
    ) -> Result<(), GraphError> {
        let mut first_error = None;
        for entry in entries {
            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }
            let _scope = entry
                .definition()
                .body()
                .is_async()
                .then(|| BusyScope::begin(self, std::slice::from_ref(&entry)));
            if let Err(err) = self.execute_entry(&entry, cancel).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Explicit re-validation pass.
    ///
    /// Rules are selected by `flags` and awaited inline. Unless `flags`
    /// contains [`RunRulesFlag::SELF`] the pass continues into child nodes and
    /// lists. Cancellation stops before the next rule and yields
    /// [`GraphError::Cancelled`].
    pub fn run_rules(
        &self,
        flags: RunRulesFlag,
        cancel: CancellationToken,
    ) -> LocalBoxFuture<'_, Result<(), GraphError>> {
        async move {
            let entries = self
                .inner
                .rules
                .matching(flags, |id| self.has_messages_for(id));
            let mut first_error = match self.run_entries(entries, &cancel).await {
                Err(GraphError::Cancelled) => return Err(GraphError::Cancelled),
                result => result.err(),
            };

            if !flags.contains(RunRulesFlag::SELF) {
                for child in self.inner.properties.children() {
                    if cancel.is_cancelled() {
                        return Err(GraphError::Cancelled);
                    }
                    match child.run_rules(flags, cancel.clone()).await {
                        Err(GraphError::Cancelled) => return Err(GraphError::Cancelled),
                        Err(err) => {
                            first_error.get_or_insert(err);
                        }
                        Ok(()) => {}
                    }
                }
            }
            first_error.map_or(Ok(()), Err)
        }
        .boxed_local()
    }

    /// Run the rules bound to one trigger and await them.
    pub async fn run_rules_for(
        &self,
        trigger: &str,
        cancel: CancellationToken,
    ) -> Result<(), GraphError> {
        let entries = self.inner.rules.triggered_by(trigger);
        self.run_entries(entries, &cancel).await
    }

    /// Run every rule on this node and its descendants.
    pub async fn run_all_rules(&self) -> Result<(), GraphError> {
        self.run_rules(RunRulesFlag::ALL, CancellationToken::new())
            .await
    }

    pub(crate) fn has_pending_tasks(&self) -> bool {
        self.prune_finished_tasks();
        !self.inner.tasks.borrow().is_empty()
            || !self.inner.faults.borrow().is_empty()
            || self.inner.properties.has_pending_tasks()
    }

    /// Await every outstanding rule task in this subtree.
    ///
    /// Completing tasks may start new ones, so the scan repeats until nothing
    /// is pending. Faults captured from rules (inline or async) are reported
    /// here; the first one is returned after everything settled.
    pub fn wait_for_tasks(&self) -> LocalBoxFuture<'_, Result<(), GraphError>> {
        async move {
            let limit = self.inner.settings.max_wait_rescans();
            let mut first_error = None;
            let mut rescans = 0u32;

            loop {
                let handles = std::mem::take(&mut *self.inner.tasks.borrow_mut());
                if handles.is_empty() && !self.inner.properties.has_pending_tasks() {
                    break;
                }
                rescans += 1;
                if rescans > limit {
                    tracing::warn!(node = %self.type_name(), limit, "Rule tasks did not settle");
                    return Err(GraphError::WaitLimitExceeded(limit));
                }
                for handle in handles {
                    match handle.await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            first_error.get_or_insert(err);
                        }
                        Err(join) => {
                            first_error.get_or_insert(GraphError::TaskJoin(join.to_string()));
                        }
                    }
                }
                if let Err(err) = self.inner.properties.wait_for_tasks(limit).await {
                    first_error.get_or_insert(err);
                }
            }

            let faults = std::mem::take(&mut *self.inner.faults.borrow_mut());
            for fault in faults {
                first_error.get_or_insert(fault);
            }
            first_error.map_or(Ok(()), Err)
        }
        .boxed_local()
    }
}
