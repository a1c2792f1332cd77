//! Unified error type for the graph engine
//!
//! Only programming-contract violations and captured rule faults are errors.
//! Validation failures are never errors: they are [`RuleMessage`] data that
//! flows into `is_valid` and the message accessors.
//!
//! [`RuleMessage`]: crate::message::RuleMessage

use thiserror::Error;

use crate::ids::RuleId;
use crate::value::ValueKind;

/// Unified error type for graph operations
#[derive(Debug, Error)]
pub enum GraphError {
    /// Write to a field declared read-only
    #[error("Field is read-only: {field}")]
    ReadOnly { field: String },

    /// Value variant does not match the declared field kind
    #[error("Type mismatch on {field}: expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// Field name not declared on the node's schema
    #[error("Unknown field: {type_name}.{field}")]
    UnknownField { type_name: String, field: String },

    /// Node already present in the child collection
    #[error("Node is already a member of this collection: {0}")]
    DuplicateChild(String),

    /// Node (or a node being attached/detached) has outstanding async work
    #[error("Node is busy: {0}")]
    Busy(String),

    /// Node belongs to a different aggregate than the target collection
    #[error("Aggregate boundary violation: {0}")]
    AggregateBoundary(String),

    /// Node is an active member of another collection
    #[error("Node is still contained in another collection: {0}")]
    AlreadyContained(String),

    /// Attempt to commit a child directly instead of through its aggregate root
    #[error("Cannot save a child node directly: {0}")]
    ChildSave(String),

    /// Node is not valid or still busy, so no commit may be issued
    #[error("Node is not savable: {0}")]
    NotSavable(String),

    /// Rule definition does not fit the node it is attached to
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// A rule raised an unexpected fault
    #[error("Rule {rule_id} faulted: {source}")]
    RuleFault {
        rule_id: RuleId,
        #[source]
        source: anyhow::Error,
    },

    /// A rule task panicked or was aborted
    #[error("Rule task failed to join: {0}")]
    TaskJoin(String),

    /// An async rule sequence could not be started
    #[error("Rule task could not be spawned: {0}")]
    TaskSpawn(String),

    /// Explicit re-validation pass was cancelled
    #[error("Rule run cancelled")]
    Cancelled,

    /// `wait_for_tasks` kept finding new work past the configured limit
    #[error("Wait limit exceeded after {0} rescans")]
    WaitLimitExceeded(u32),
}

impl GraphError {
    /// Create a read-only violation
    pub fn read_only(field: impl Into<String>) -> Self {
        Self::ReadOnly {
            field: field.into(),
        }
    }

    /// Creates a type mismatch error for a rejected write.
    ///
    /// # Example
    /// ```ignore
    /// if !decl.kind().accepts(&value) {
    ///     return Err(GraphError::type_mismatch(decl.name(), decl.kind(), value.kind()));
    /// }
    /// ```
    pub fn type_mismatch(field: impl Into<String>, expected: ValueKind, actual: ValueKind) -> Self {
        Self::TypeMismatch {
            field: field.into(),
            expected,
            actual,
        }
    }

    /// Create an unknown field error
    pub fn unknown_field(type_name: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownField {
            type_name: type_name.into(),
            field: field.into(),
        }
    }

    /// Create a busy error
    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Busy(msg.into())
    }

    /// Create an aggregate boundary error
    pub fn aggregate_boundary(msg: impl Into<String>) -> Self {
        Self::AggregateBoundary(msg.into())
    }

    /// Wrap a fault raised by a rule body
    pub fn rule_fault(rule_id: RuleId, source: anyhow::Error) -> Self {
        Self::RuleFault { rule_id, source }
    }

    /// Returns true for faults captured from rule execution (category c).
    pub fn is_rule_fault(&self) -> bool {
        matches!(
            self,
            Self::RuleFault { .. } | Self::TaskJoin(_) | Self::TaskSpawn(_)
        )
    }
}
