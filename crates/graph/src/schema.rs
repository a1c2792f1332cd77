//! Declarative field lists
//!
//! A [`Schema`] names a node type and the fields it tracks. The property
//! collection consumes it to create containers lazily, and rule resolvers key
//! off it to decide which rules a node type gets.

use std::rc::Rc;

use crate::value::ValueKind;

/// Whether a node tracks persistence state or only validation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Validation-only object: busy/valid/messages, no new/modified/deleted
    Validate,
    /// Persistable entity: adds modification tracking and the new/deleted state
    Entity,
}

/// A single declared field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    name: Rc<str>,
    kind: ValueKind,
    read_only: bool,
}

impl FieldDecl {
    pub fn new(name: &str, kind: ValueKind) -> Self {
        Self {
            name: Rc::from(name),
            kind,
            read_only: false,
        }
    }

    pub fn bool(name: &str) -> Self {
        Self::new(name, ValueKind::Bool)
    }

    pub fn int(name: &str) -> Self {
        Self::new(name, ValueKind::Int)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, ValueKind::Float)
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, ValueKind::Text)
    }

    pub fn uuid(name: &str) -> Self {
        Self::new(name, ValueKind::Uuid)
    }

    pub fn timestamp(name: &str) -> Self {
        Self::new(name, ValueKind::Timestamp)
    }

    /// A field holding a child node
    pub fn node(name: &str) -> Self {
        Self::new(name, ValueKind::Node)
    }

    /// A field holding a child list
    pub fn list(name: &str) -> Self {
        Self::new(name, ValueKind::List)
    }

    /// Mark the field read-only: tracked writes fail, `load_value` still works.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Field declarations for one node type
///
/// # Example
///
/// ```
/// use wrldbldr_graph::schema::{FieldDecl, Schema};
///
/// let schema = Schema::entity("Order")
///     .field(FieldDecl::text("Number"))
///     .field(FieldDecl::list("Lines"));
///
/// assert!(schema.contains("Lines"));
/// assert!(!schema.contains("Total"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    type_name: Rc<str>,
    kind: NodeKind,
    fields: Vec<FieldDecl>,
}

impl Schema {
    pub fn new(type_name: &str, kind: NodeKind) -> Self {
        Self {
            type_name: Rc::from(type_name),
            kind,
            fields: Vec::new(),
        }
    }

    pub fn entity(type_name: &str) -> Self {
        Self::new(type_name, NodeKind::Entity)
    }

    pub fn validate(type_name: &str) -> Self {
        Self::new(type_name, NodeKind::Validate)
    }

    /// Declare a field. Redeclaring a name replaces the earlier declaration.
    pub fn field(mut self, decl: FieldDecl) -> Self {
        match self.fields.iter_mut().find(|f| f.name() == decl.name()) {
            Some(existing) => *existing = decl,
            None => self.fields.push(decl),
        }
        self
    }

    #[inline]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeclaring_a_field_replaces_it() {
        let schema = Schema::entity("Person")
            .field(FieldDecl::text("Name"))
            .field(FieldDecl::text("Name").read_only());

        assert_eq!(schema.fields().len(), 1);
        assert!(schema.get("Name").map(FieldDecl::is_read_only).unwrap_or(false));
    }

    #[test]
    fn constructors_set_kind() {
        assert_eq!(Schema::validate("Filter").kind(), NodeKind::Validate);
        assert_eq!(FieldDecl::list("Lines").kind(), ValueKind::List);
    }
}
