use std::rc::Rc;

use futures_util::future::LocalBoxFuture;

use crate::error::GraphError;
use crate::ids::BusyId;
use crate::property::Property;
use crate::value::{FromValue, Value};

use super::{read_typed, Node};

/// Handle to one field of a node.
///
/// Writes through the handle behave exactly like [`Node::set`] and
/// [`Node::load`]; reads expose the container's own state.
#[derive(Clone)]
pub struct Field {
    node: Node,
    property: Rc<Property>,
}

impl Field {
    pub(super) fn new(node: Node, property: Rc<Property>) -> Self {
        Self { node, property }
    }

    pub fn name(&self) -> &str {
        self.property.name()
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn value(&self) -> Value {
        self.property.value()
    }

    pub fn get<T: FromValue>(&self) -> Result<Option<T>, GraphError> {
        read_typed(&self.property)
    }

    pub fn set_value(&self, value: impl Into<Value>) -> Result<(), GraphError> {
        self.node.set_property(&self.property, value.into())
    }

    pub fn load_value(&self, value: impl Into<Value>) -> Result<(), GraphError> {
        self.node.load_property(&self.property, value.into())
    }

    pub fn is_read_only(&self) -> bool {
        self.property.is_read_only()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.property.set_read_only(read_only);
    }

    pub fn is_busy(&self) -> bool {
        self.property.is_busy()
    }

    pub fn is_self_busy(&self) -> bool {
        self.property.is_self_busy()
    }

    pub fn is_valid(&self) -> bool {
        self.property.is_valid()
    }

    pub fn is_self_valid(&self) -> bool {
        self.property.is_self_valid()
    }

    pub fn is_modified(&self) -> bool {
        self.property.is_modified()
    }

    pub fn is_self_modified(&self) -> bool {
        self.property.is_self_modified()
    }

    pub fn messages(&self) -> Vec<String> {
        self.property.messages()
    }

    pub fn add_marked_busy(&self, id: BusyId) {
        self.property.add_marked_busy(id);
    }

    pub fn remove_marked_busy(&self, id: BusyId) {
        self.property.remove_marked_busy(id);
    }

    /// Await outstanding work of the child held in this field.
    pub fn wait_for_tasks(&self) -> LocalBoxFuture<'static, Result<(), GraphError>> {
        self.property.wait_for_tasks()
    }
}

impl std::fmt::Debug for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("node", &self.node.type_name())
            .field("property", &self.property)
            .finish()
    }
}
