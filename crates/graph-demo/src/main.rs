//! Walks an order aggregate through hydration, edits, an async credit check
//! and a simulated commit, logging the aggregate flags at each step.
//!
//! Run with `RUST_LOG=wrldbldr_graph=debug,graph_demo=info` for rule-level logs.

use std::time::Duration;

use tokio::task::LocalSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wrldbldr_graph::{
    ChildList, FieldDecl, GraphSettings, LifecycleOperation, Node, NodeBuilder, RuleDefinition,
    Schema,
};

const CREDIT_LIMIT: i64 = 500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv_from_repo_root();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graph_demo=info,wrldbldr_graph=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = GraphSettings::from_env();
    tracing::info!(?settings, "Starting graph demo");

    LocalSet::new().run_until(run(settings)).await
}

async fn run(settings: GraphSettings) -> anyhow::Result<()> {
    let lines = line_builder(settings.clone());
    let orders = order_builder(settings.clone());

    let items = ChildList::with_settings(settings);
    let order = orders.fetch(|order| {
        order.load("Number", "SO-1001")?;
        order.load("Customer", "Ada")?;
        order.load("Lines", items.clone())?;
        for (sku, quantity, price) in [("LAMP", 1, 120), ("DESK", 1, 240)] {
            items.add(lines.fetch(|line| {
                line.load("Sku", sku)?;
                line.load("Quantity", quantity)?;
                line.load("Price", price)
            })?)?;
        }
        Ok(())
    })?;
    order.run_all_rules().await?;
    report("fetched", &order);

    let chair = lines.create_with(|line| {
        line.load("Sku", "CHAIR")?;
        line.load("Price", 90)
    })?;
    items.add(chair.clone())?;
    chair.set("Quantity", 2)?;
    report("added a line", &order);

    chair.set("Quantity", 0)?;
    report("invalid quantity", &order);
    for message in order.property_messages() {
        tracing::warn!(path = %message.path, message = %message.message, "Validation message");
    }
    chair.set("Quantity", 3)?;

    if let Some(desk) = items.get(1) {
        items.remove(&desk)?;
    }
    report("removed a persisted line", &order);

    order.wait_for_tasks().await?;
    report("credit check settled", &order);

    commit(&order, &items)?;
    report("committed", &order);

    Ok(())
}

fn order_builder(settings: GraphSettings) -> NodeBuilder {
    NodeBuilder::new(
        Schema::entity("Order")
            .field(FieldDecl::text("Number").read_only())
            .field(FieldDecl::text("Customer"))
            .field(FieldDecl::list("Lines"))
            .field(FieldDecl::int("Total")),
    )
    .settings(settings)
    .rule(RuleDefinition::action(
        "order-total",
        ["Lines", "Lines.Quantity", "Lines.Price"],
        |order| {
            let mut total = 0;
            for line in order.child_list("Lines")?.unwrap_or_default().iter() {
                let quantity = line.get::<i64>("Quantity")?.unwrap_or_default();
                let price = line.get::<i64>("Price")?.unwrap_or_default();
                total += quantity * price;
            }
            order.set("Total", total)?;
            Ok(())
        },
    ))
    .rule(RuleDefinition::validation_async(
        "credit-check",
        "Total",
        |order| async move {
            // Stands in for a call to a credit service.
            tokio::time::sleep(Duration::from_millis(50)).await;
            let total = order.get::<i64>("Total")?.unwrap_or_default();
            Ok::<_, anyhow::Error>(
                (total > CREDIT_LIMIT).then(|| format!("Total {total} exceeds the credit limit")),
            )
        },
    ))
}

fn line_builder(settings: GraphSettings) -> NodeBuilder {
    NodeBuilder::new(
        Schema::entity("OrderLine")
            .field(FieldDecl::text("Sku"))
            .field(FieldDecl::int("Quantity"))
            .field(FieldDecl::int("Price")),
    )
    .settings(settings)
    .rule(RuleDefinition::validation("quantity-positive", "Quantity", |line| {
        let quantity = line.get::<i64>("Quantity")?.unwrap_or_default();
        Ok((quantity <= 0).then(|| "Quantity must be at least 1".to_string()))
    }))
}

/// Pretend to persist the aggregate the way a repository adapter would.
fn commit(order: &Node, lines: &ChildList) -> anyhow::Result<()> {
    let operation = match order.pending_operation() {
        Ok(Some(operation)) => operation,
        Ok(None) => {
            tracing::info!("Nothing to commit");
            return Ok(());
        }
        Err(err @ wrldbldr_graph::GraphError::NotSavable(_)) => {
            tracing::warn!(error = %err, "Order not committed");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    order.on_lifecycle_start(operation);
    lines.on_lifecycle_start(operation);
    tracing::info!(
        %operation,
        deleted = lines.pending_deletion().len(),
        "Writing order"
    );
    for line in lines.iter().filter(Node::is_new) {
        line.on_lifecycle_start(LifecycleOperation::Insert);
        tracing::info!(id = %line.id(), "Inserting line");
        line.on_lifecycle_complete(LifecycleOperation::Insert);
    }
    lines.on_lifecycle_complete(operation);
    order.on_lifecycle_complete(operation);
    if operation == LifecycleOperation::Delete {
        tracing::info!("Order deleted");
    }
    Ok(())
}

fn report(step: &str, order: &Node) {
    tracing::info!(
        step,
        total = ?order.get::<i64>("Total").ok().flatten(),
        valid = order.is_valid(),
        busy = order.is_busy(),
        modified = order.is_modified(),
        savable = order.is_savable(),
        "Order state"
    );
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}
