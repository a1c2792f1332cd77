//! Closure-backed rules
//!
//! Shorthand constructors for the common shapes: a validation that returns
//! an optional message for one field, and an action that derives values.
//!
//! # Example
//!
//! ```
//! use wrldbldr_graph::rules::RuleDefinition;
//!
//! let required = RuleDefinition::validation("name-required", "Name", |node| {
//!     let name: Option<String> = node.get("Name")?;
//!     Ok(name.filter(|n| !n.trim().is_empty()).is_none().then(|| "Name is required".to_string()))
//! });
//! assert_eq!(required.triggers(), ["Name".to_string()]);
//! ```

use std::future::Future;

use async_trait::async_trait;
use futures_util::future::LocalBoxFuture;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::ids::RuleId;
use crate::message::RuleMessage;
use crate::node::Node;

use super::{AsyncRule, Rule, RuleDefinition};

struct FnRule<F>(F);

impl<F> Rule for FnRule<F>
where
    F: Fn(&Node) -> anyhow::Result<Vec<RuleMessage>>,
{
    fn execute(&self, target: &Node) -> anyhow::Result<Vec<RuleMessage>> {
        (self.0)(target)
    }
}

type BoxedRuleFuture = LocalBoxFuture<'static, anyhow::Result<Vec<RuleMessage>>>;

struct FnAsyncRule<F>(F);

#[async_trait(?Send)]
impl<F> AsyncRule for FnAsyncRule<F>
where
    F: Fn(Node, CancellationToken) -> BoxedRuleFuture,
{
    async fn execute(
        &self,
        target: &Node,
        cancel: &CancellationToken,
    ) -> anyhow::Result<Vec<RuleMessage>> {
        (self.0)(target.clone(), cancel.clone()).await
    }
}

impl RuleDefinition {
    /// Rule from a closure returning the full message list.
    pub fn from_fn<I, S, F>(id: impl Into<RuleId>, triggers: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Node) -> anyhow::Result<Vec<RuleMessage>> + 'static,
    {
        Self::new(id, triggers, FnRule(f))
    }

    /// Single-field validation; `Some(message)` marks the field invalid.
    pub fn validation<F>(id: impl Into<RuleId>, field: &str, f: F) -> Self
    where
        F: Fn(&Node) -> anyhow::Result<Option<String>> + 'static,
    {
        let target = field.to_string();
        Self::from_fn(id, [field], move |node| {
            Ok(f(node)?
                .map(|message| vec![RuleMessage::for_field(target.clone(), message)])
                .unwrap_or_default())
        })
    }

    /// Derivation with no messages, typically setting other fields.
    pub fn action<I, S, F>(id: impl Into<RuleId>, triggers: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Node) -> anyhow::Result<()> + 'static,
    {
        Self::from_fn(id, triggers, move |node| {
            f(node)?;
            Ok(Vec::new())
        })
    }

    /// Async rule from a closure returning the full message list.
    pub fn from_async_fn<I, S, F, Fut>(id: impl Into<RuleId>, triggers: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(Node, CancellationToken) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<Vec<RuleMessage>>> + 'static,
    {
        Self::new_async(
            id,
            triggers,
            FnAsyncRule(move |node: Node, cancel: CancellationToken| -> BoxedRuleFuture {
                f(node, cancel).boxed_local()
            }),
        )
    }

    /// Async single-field validation (remote uniqueness checks and the like).
    pub fn validation_async<F, Fut>(id: impl Into<RuleId>, field: &str, f: F) -> Self
    where
        F: Fn(Node) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<Option<String>>> + 'static,
    {
        let target = field.to_string();
        Self::from_async_fn(id, [field], move |node, _cancel| {
            let target = target.clone();
            let check = f(node);
            async move {
                let message = check.await?;
                Ok::<_, anyhow::Error>(
                    message
                        .map(|message| vec![RuleMessage::for_field(target, message)])
                        .unwrap_or_default(),
                )
            }
        })
    }

    /// Async derivation with no messages.
    pub fn action_async<I, S, F, Fut>(id: impl Into<RuleId>, triggers: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(Node) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        Self::from_async_fn(id, triggers, move |node, _cancel| {
            let run = f(node);
            async move {
                run.await?;
                Ok::<_, anyhow::Error>(Vec::new())
            }
        })
    }
}
