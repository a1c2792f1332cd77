//! WrldBldr Graph - reactive domain-object graph
//!
//! Domain objects are [`Node`]s built from a declared [`Schema`]. Each field
//! is a tracked container that knows whether it was modified, whether it is
//! valid (per the messages its rules produced) and whether async work is
//! still running on it. Nodes hold child nodes and [`ChildList`]s, and every
//! flag aggregates up the tree: an order is valid only when all its lines
//! are, busy while any line still runs a lookup, and so on.
//!
//! # Quick start
//!
//! ```
//! use wrldbldr_graph::{FieldDecl, NodeBuilder, RuleDefinition, Schema};
//!
//! let customers = NodeBuilder::new(
//!     Schema::entity("Customer")
//!         .field(FieldDecl::text("Name"))
//!         .field(FieldDecl::int("Discount")),
//! )
//! .rule(RuleDefinition::validation("name-required", "Name", |node| {
//!     let name: Option<String> = node.get("Name")?;
//!     Ok(name.is_none().then(|| "Name is required".to_string()))
//! }));
//!
//! let customer = customers.create()?;
//! customer.set("Name", "Ada")?;
//! customer.set("Name", None::<String>)?;
//! assert!(!customer.is_valid());
//! assert!(!customer.is_savable());
//! # Ok::<(), wrldbldr_graph::GraphError>(())
//! ```
//!
//! # Async rules
//!
//! Async rules run on `tokio::task::spawn_local`. A graph that registers
//! them must be driven from inside a [`tokio::task::LocalSet`], and callers
//! await [`Node::wait_for_tasks`] before reading final state. Outside a
//! `LocalSet` the rules are skipped and `wait_for_tasks` returns
//! [`GraphError::TaskSpawn`].

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod lifecycle;
pub mod list;
pub mod message;
pub mod node;
pub mod property;
pub mod rules;
pub mod schema;
pub mod value;

pub use config::GraphSettings;
pub use error::GraphError;
pub use events::{PropertyChange, Subscription};
pub use ids::{BusyId, NodeId, RuleId};
pub use lifecycle::LifecycleOperation;
pub use list::ChildList;
pub use message::{PropertyMessage, RuleMessage};
pub use node::{Field, Node, NodeBuilder, PauseGuard};
pub use property::{DefaultPropertyFactory, Property, PropertyCollection, PropertyFactory};
pub use rules::{AsyncRule, Rule, RuleDefinition, RuleManager, RuleResolver, RunRulesFlag};
pub use schema::{FieldDecl, NodeKind, Schema};
pub use value::{FromValue, Value, ValueKind};

/// Token type accepted by explicit rule runs
pub use tokio_util::sync::CancellationToken;
