//! Change notifications
//!
//! A field change is described by a [`PropertyChange`] breadcrumb. When the
//! change bubbles to a parent, the parent wraps it in a new breadcrumb for the
//! field that holds the child, so the full dotted path (`Order.Lines.Quantity`)
//! can be rebuilt at every level.
//!
//! Subscribers are notified in registration order. Dropping the returned
//! [`Subscription`] removes the callback before the next notification.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::node::Node;

/// Breadcrumb for a field change
#[derive(Clone)]
pub struct PropertyChange {
    field: Rc<str>,
    source: Node,
    inner: Option<Box<PropertyChange>>,
}

impl PropertyChange {
    pub(crate) fn new(field: Rc<str>, source: Node) -> Self {
        Self {
            field,
            source,
            inner: None,
        }
    }

    /// Wrap a change coming from a child held in `field` of `source`.
    pub(crate) fn wrap(field: Rc<str>, source: Node, inner: PropertyChange) -> Self {
        Self {
            field,
            source,
            inner: Some(Box::new(inner)),
        }
    }

    /// Field name at this level.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Node owning the field at this level.
    pub fn source(&self) -> &Node {
        &self.source
    }

    pub fn inner(&self) -> Option<&PropertyChange> {
        self.inner.as_deref()
    }

    /// The breadcrumb where the change started.
    pub fn origin(&self) -> &PropertyChange {
        let mut current = self;
        while let Some(inner) = current.inner.as_deref() {
            current = inner;
        }
        current
    }

    /// Dotted path from this level down to the changed field.
    pub fn full_path(&self) -> String {
        let mut path = self.field.to_string();
        let mut current = self.inner.as_deref();
        while let Some(change) = current {
            path.push('.');
            path.push_str(&change.field);
            current = change.inner.as_deref();
        }
        path
    }
}

impl fmt::Debug for PropertyChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyChange")
            .field("path", &self.full_path())
            .field("source", &self.source.id())
            .finish()
    }
}

type Callback = Rc<dyn Fn(&PropertyChange)>;

struct SubscriberList {
    next_id: Cell<u64>,
    callbacks: RefCell<Vec<(u64, Callback)>>,
}

/// Registry of change callbacks owned by a node or list
pub(crate) struct Subscribers {
    inner: Rc<SubscriberList>,
}

impl Subscribers {
    pub(crate) fn new() -> Self {
        Self {
            inner: Rc::new(SubscriberList {
                next_id: Cell::new(0),
                callbacks: RefCell::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn subscribe(&self, callback: impl Fn(&PropertyChange) + 'static) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner
            .callbacks
            .borrow_mut()
            .push((id, Rc::new(callback)));
        Subscription {
            list: Rc::downgrade(&self.inner),
            id,
        }
    }

    pub(crate) fn notify(&self, change: &PropertyChange) {
        // Snapshot so callbacks may subscribe or unsubscribe re-entrantly.
        let callbacks: Vec<Callback> = self
            .inner
            .callbacks
            .borrow()
            .iter()
            .map(|(_, cb)| Rc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(change);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.callbacks.borrow().len()
    }
}

/// RAII guard for a change callback; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    list: Weak<SubscriberList>,
    id: u64,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            list.callbacks.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeBuilder;
    use crate::schema::{FieldDecl, Schema};

    fn node() -> Node {
        NodeBuilder::new(Schema::entity("Order").field(FieldDecl::text("Number")))
            .build()
            .unwrap()
    }

    #[test]
    fn full_path_joins_every_level() {
        let order = node();
        let line = node();
        let change = PropertyChange::wrap(
            Rc::from("Lines"),
            order.clone(),
            PropertyChange::new(Rc::from("Quantity"), line.clone()),
        );

        assert_eq!(change.full_path(), "Lines.Quantity");
        assert_eq!(change.field(), "Lines");
        assert!(change.source().ptr_eq(&order));
        assert!(change.origin().source().ptr_eq(&line));
        assert_eq!(change.inner().map(PropertyChange::full_path).as_deref(), Some("Quantity"));
    }

    #[test]
    fn dropping_the_subscription_unsubscribes() {
        let subscribers = Subscribers::new();
        let seen = Rc::new(Cell::new(0));
        let counter = Rc::clone(&seen);
        let subscription = subscribers.subscribe(move |_| counter.set(counter.get() + 1));
        let change = PropertyChange::new(Rc::from("Number"), node());

        subscribers.notify(&change);
        assert_eq!(subscribers.len(), 1);

        drop(subscription);
        subscribers.notify(&change);
        assert_eq!(subscribers.len(), 0);
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn callbacks_run_in_registration_order() {
        let subscribers = Subscribers::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let first = Rc::clone(&order);
        let second = Rc::clone(&order);
        let _a = subscribers.subscribe(move |_| first.borrow_mut().push("first"));
        let _b = subscribers.subscribe(move |_| second.borrow_mut().push("second"));

        subscribers.notify(&PropertyChange::new(Rc::from("Number"), node()));

        assert_eq!(*order.borrow(), vec!["first", "second"]);
    }
}
