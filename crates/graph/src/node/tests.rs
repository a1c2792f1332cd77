use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio::sync::Notify;
use tokio::task::LocalSet;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::GraphSettings;
use crate::message::RuleMessage;
use crate::rules::{RuleDefinition, RunRulesFlag};
use crate::schema::FieldDecl;

fn person_schema() -> Schema {
    Schema::entity("Person")
        .field(FieldDecl::text("Name"))
        .field(FieldDecl::int("Age"))
        .field(FieldDecl::uuid("Id").read_only())
}

fn name_required() -> RuleDefinition {
    RuleDefinition::validation("name-required", "Name", |node| {
        let name: Option<String> = node.get("Name")?;
        Ok(name
            .filter(|n| !n.trim().is_empty())
            .is_none()
            .then(|| "Name is required".to_string()))
    })
}

fn person() -> NodeBuilder {
    NodeBuilder::new(person_schema()).rule(name_required())
}

fn fetched_person(name: &str) -> Node {
    let name = name.to_string();
    person().fetch(move |n| n.load("Name", name)).unwrap()
}

fn order_builder() -> NodeBuilder {
    NodeBuilder::new(
        Schema::entity("Order")
            .field(FieldDecl::node("Customer"))
            .field(FieldDecl::list("Lines"))
            .field(FieldDecl::int("Total"))
            .field(FieldDecl::int("LineCount")),
    )
    .rule(RuleDefinition::action(
        "total",
        ["Lines.Quantity", "Lines"],
        |order| {
            let lines = order.child_list("Lines")?.unwrap_or_default();
            let mut total = 0;
            for line in &lines {
                total += line.get::<i64>("Quantity")?.unwrap_or_default();
            }
            order.set("Total", total)?;
            order.set("LineCount", lines.len() as i64)?;
            Ok(())
        },
    ))
}

fn line_builder() -> NodeBuilder {
    NodeBuilder::new(Schema::entity("Line").field(FieldDecl::int("Quantity")))
}

fn counter() -> (Rc<Cell<u32>>, impl Fn(&PropertyChange) + 'static) {
    let count = Rc::new(Cell::new(0));
    let handle = Rc::clone(&count);
    (count, move |_: &PropertyChange| handle.set(handle.get() + 1))
}

mod fields {
    use super::*;

    #[test]
    fn set_marks_field_and_node_modified() {
        let node = fetched_person("Ada");
        assert!(!node.is_modified());

        node.set("Age", 36).unwrap();

        assert_eq!(node.get::<i64>("Age").unwrap(), Some(36));
        assert!(node.field("Age").unwrap().is_self_modified());
        assert!(node.is_self_modified());
        assert_eq!(node.modified_properties(), vec!["Age".to_string()]);
    }

    #[test]
    fn load_round_trips_without_tracking() {
        let node = fetched_person("Ada");
        node.load("Age", 41).unwrap();
        assert_eq!(node.value("Age").unwrap(), Value::Int(41));
        assert!(!node.is_modified());
    }

    #[test]
    fn equal_set_is_a_no_op() {
        let node = fetched_person("Ada");
        let (count, callback) = counter();
        let _subscription = node.subscribe(callback);

        node.set("Name", "Ada").unwrap();

        assert_eq!(count.get(), 0);
        assert!(!node.is_modified());
    }

    #[test]
    fn contract_violations_are_errors() {
        let node = fetched_person("Ada");
        assert!(matches!(
            node.set("Nope", 1),
            Err(GraphError::UnknownField { .. })
        ));
        assert!(matches!(
            node.set("Age", "old"),
            Err(GraphError::TypeMismatch { .. })
        ));
        assert!(matches!(
            node.set("Id", uuid::Uuid::new_v4()),
            Err(GraphError::ReadOnly { .. })
        ));
        assert!(node.field("Id").unwrap().load_value(uuid::Uuid::new_v4()).is_ok());
    }

    #[test]
    fn wrong_typed_read_is_a_mismatch() {
        let node = fetched_person("Ada");
        assert!(matches!(
            node.get::<i64>("Name"),
            Err(GraphError::TypeMismatch { .. })
        ));
        assert_eq!(node.get::<i64>("Age").unwrap(), None);
    }

    #[test]
    fn node_cannot_hold_itself() {
        let node = NodeBuilder::new(Schema::entity("Folder").field(FieldDecl::node("Parent")))
            .create()
            .unwrap();
        let err = node.set("Parent", node.clone()).unwrap_err();
        assert!(matches!(err, GraphError::AggregateBoundary(_)));
    }
}

mod rules {
    use super::*;

    #[test]
    fn validation_messages_follow_the_value() {
        let node = person().create().unwrap();

        node.set("Name", "").unwrap();
        assert!(!node.is_valid());
        assert_eq!(
            node.field("Name").unwrap().messages(),
            vec!["Name is required".to_string()]
        );

        node.set("Name", "Ada").unwrap();
        assert!(node.is_valid());
        assert!(node.property_messages().is_empty());
    }

    #[test]
    fn re_running_a_rule_replaces_its_messages() {
        let node = person().create().unwrap();
        node.set("Name", "").unwrap();
        node.set("Name", " ").unwrap();
        assert_eq!(node.field("Name").unwrap().messages().len(), 1);
    }

    #[test]
    fn object_level_messages_invalidate_the_node() {
        let node = NodeBuilder::new(person_schema())
            .rule(RuleDefinition::from_fn("adult", ["Age"], |node| {
                let age = node.get::<i64>("Age")?.unwrap_or_default();
                Ok(if age < 18 {
                    vec![RuleMessage::object("Person must be an adult")]
                } else {
                    Vec::new()
                })
            }))
            .create()
            .unwrap();

        node.set("Age", 12).unwrap();

        assert!(!node.is_self_valid());
        assert_eq!(node.object_messages(), vec!["Person must be an adult".to_string()]);
        assert_eq!(node.property_messages()[0].path, "");

        node.clear_self_messages();
        assert!(node.is_valid());
    }

    #[tokio::test]
    async fn sync_fault_surfaces_on_wait() {
        let node = NodeBuilder::new(person_schema())
            .rule(RuleDefinition::action("explode", ["Age"], |_| {
                Err(anyhow::anyhow!("lookup table missing"))
            }))
            .create()
            .unwrap();

        node.set("Age", 1).unwrap();

        let err = node.wait_for_tasks().await.unwrap_err();
        assert!(err.is_rule_fault());
        assert!(node.wait_for_tasks().await.is_ok());
    }

    #[tokio::test]
    async fn message_for_undeclared_field_is_a_fault() {
        let node = NodeBuilder::new(person_schema())
            .rule(RuleDefinition::from_fn("typo", ["Age"], |_| {
                Ok(vec![RuleMessage::for_field("Agee", "bad")])
            }))
            .create()
            .unwrap();

        node.set("Age", 1).unwrap();

        assert!(matches!(
            node.wait_for_tasks().await,
            Err(GraphError::UnknownField { .. })
        ));
    }

    #[tokio::test]
    async fn flags_select_rules_by_execution_state() {
        let runs = Rc::new(RefCell::new(Vec::new()));
        let (name_runs, age_runs) = (Rc::clone(&runs), Rc::clone(&runs));
        let node = NodeBuilder::new(person_schema())
            .rule(RuleDefinition::action("name", ["Name"], move |_| {
                name_runs.borrow_mut().push("name");
                Ok(())
            }))
            .rule(RuleDefinition::action("age", ["Age"], move |_| {
                age_runs.borrow_mut().push("age");
                Ok(())
            }))
            .create()
            .unwrap();

        node.set("Name", "Ada").unwrap();
        runs.borrow_mut().clear();

        node.run_rules(RunRulesFlag::NOT_EXECUTED, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*runs.borrow(), vec!["age"]);

        runs.borrow_mut().clear();
        node.run_all_rules().await.unwrap();
        assert_eq!(*runs.borrow(), vec!["name", "age"]);
    }

    #[tokio::test]
    async fn run_rules_for_targets_one_trigger() {
        let node = person().create().unwrap();
        node.run_rules_for("Name", CancellationToken::new())
            .await
            .unwrap();
        assert!(!node.is_valid());
    }

    #[tokio::test]
    async fn cancelled_run_stops() {
        let node = person().create().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = node.run_rules(RunRulesFlag::ALL, cancel).await.unwrap_err();

        assert!(matches!(err, GraphError::Cancelled));
        assert!(node.is_valid());
    }
}

mod propagation {
    use super::*;

    fn order_with_lines() -> (Node, ChildList) {
        let order = order_builder().create().unwrap();
        let lines = ChildList::new();
        order.load("Lines", lines.clone()).unwrap();
        (order, lines)
    }

    #[test]
    fn item_change_reaches_parent_rules_as_dotted_path() {
        let (order, lines) = order_with_lines();
        let line = line_builder().create().unwrap();
        lines.add(line.clone()).unwrap();
        let paths = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&paths);
        let _subscription = order.subscribe(move |change| {
            seen.borrow_mut().push(change.full_path());
        });

        line.set("Quantity", 4).unwrap();

        assert_eq!(order.get::<i64>("Total").unwrap(), Some(4));
        assert!(paths.borrow().contains(&"Lines.Quantity".to_string()));
        assert!(paths.borrow().contains(&"Total".to_string()));
    }

    #[test]
    fn membership_change_runs_list_rules() {
        let (order, lines) = order_with_lines();
        let line = line_builder().create_with(|l| l.load("Quantity", 2)).unwrap();

        lines.add(line.clone()).unwrap();
        assert_eq!(order.get::<i64>("LineCount").unwrap(), Some(1));
        assert_eq!(order.get::<i64>("Total").unwrap(), Some(2));

        lines.remove(&line).unwrap();
        assert_eq!(order.get::<i64>("LineCount").unwrap(), Some(0));
    }

    #[test]
    fn breadcrumb_keeps_the_origin() {
        let order = order_builder().create().unwrap();
        let customer = fetched_person("Ada");
        order.set("Customer", customer.clone()).unwrap();
        let origin = Rc::new(RefCell::new(None));
        let seen = Rc::clone(&origin);
        let _subscription = order.subscribe(move |change| {
            *seen.borrow_mut() = Some((change.full_path(), change.origin().source().id()));
        });

        customer.set("Age", 40).unwrap();

        let (path, source) = origin.borrow().clone().unwrap();
        assert_eq!(path, "Customer.Age");
        assert_eq!(source, customer.id());
        assert!(customer.parent().is_some_and(|p| p.ptr_eq(&order)));
    }

    #[test]
    fn replaced_child_is_unlinked() {
        let order = order_builder().create().unwrap();
        let first = fetched_person("Ada");
        let second = fetched_person("Grace");

        order.set("Customer", first.clone()).unwrap();
        order.set("Customer", second.clone()).unwrap();

        assert!(first.parent().is_none());
        assert!(second.parent().is_some_and(|p| p.ptr_eq(&order)));
    }

    #[test]
    fn dropped_subscription_stops_notifications() {
        let node = fetched_person("Ada");
        let (count, callback) = counter();
        let subscription = node.subscribe(callback);

        node.set("Age", 1).unwrap();
        drop(subscription);
        node.set("Age", 2).unwrap();

        assert_eq!(count.get(), 1);
    }

    #[test]
    fn child_state_aggregates_to_parent() {
        let order = order_builder().fetch(|_| Ok(())).unwrap();
        let customer = fetched_person("Ada");
        order.load("Customer", customer.clone()).unwrap();
        assert!(!order.is_modified());

        customer.set("Name", "").unwrap();

        assert!(order.is_modified());
        assert!(!order.is_self_modified());
        assert!(!order.is_valid());
        assert!(order.is_self_valid());
        let messages = order.property_messages();
        assert_eq!(messages[0].path, "Customer.Name");

        order.clear_all_messages();
        assert!(customer.is_valid());
    }
}

mod state {
    use super::*;

    #[test]
    fn pending_operation_follows_entity_state() {
        let new = person().create_with(|n| n.load("Name", "Ada")).unwrap();
        assert_eq!(
            new.pending_operation().unwrap(),
            Some(LifecycleOperation::Insert)
        );

        let fetched = fetched_person("Ada");
        assert_eq!(fetched.pending_operation().unwrap(), None);
        fetched.set("Age", 3).unwrap();
        assert_eq!(
            fetched.pending_operation().unwrap(),
            Some(LifecycleOperation::Update)
        );

        fetched.delete().unwrap();
        assert_eq!(
            fetched.pending_operation().unwrap(),
            Some(LifecycleOperation::Delete)
        );

        new.delete().unwrap();
        assert_eq!(new.pending_operation().unwrap(), None);
    }

    #[test]
    fn invalid_busy_and_child_nodes_cannot_be_saved() {
        let invalid = person().create().unwrap();
        invalid.set("Name", "").unwrap();
        assert!(matches!(
            invalid.pending_operation(),
            Err(GraphError::NotSavable(_))
        ));

        let busy = fetched_person("Ada");
        let id = BusyId::new();
        busy.mark_busy(id);
        assert!(busy.is_busy());
        assert!(matches!(busy.pending_operation(), Err(GraphError::NotSavable(_))));
        busy.mark_unbusy(id);
        assert!(!busy.is_busy());

        let order = order_builder().create().unwrap();
        let lines = ChildList::new();
        order.load("Lines", lines.clone()).unwrap();
        let line = line_builder().create().unwrap();
        lines.add(line.clone()).unwrap();
        assert!(!line.is_savable());
        assert!(matches!(line.pending_operation(), Err(GraphError::ChildSave(_))));
    }

    #[test]
    fn savable_requires_every_condition() {
        let node = fetched_person("Ada");
        assert!(!node.is_savable());

        node.mark_modified();
        assert!(node.is_marked_modified());
        assert!(node.is_savable());

        node.mark_unmodified();
        assert!(!node.is_marked_modified());
        assert!(!node.is_savable());
    }

    #[test]
    fn standalone_delete_toggles_flag() {
        let node = fetched_person("Ada");
        node.delete().unwrap();
        assert!(node.is_deleted());
        assert!(node.is_modified());
        node.undelete();
        assert!(!node.is_deleted());
        assert!(!node.is_modified());
    }

    #[test]
    fn delete_of_contained_node_goes_through_the_list() {
        let order = order_builder().create().unwrap();
        let lines = ChildList::new();
        order.load("Lines", lines.clone()).unwrap();
        let line = line_builder().fetch(|_| Ok(())).unwrap();
        lines.add(line.clone()).unwrap();

        line.delete().unwrap();

        assert!(lines.is_empty());
        assert!(line.is_deleted());
        assert_eq!(lines.pending_deletion().len(), 1);
    }
}

mod pause {
    use super::*;
    use crate::lifecycle::LifecycleOperation;

    #[test]
    fn paused_writes_are_untracked_and_silent() {
        let node = fetched_person("Ada");
        let (count, callback) = counter();
        let _subscription = node.subscribe(callback);

        {
            let _guard = node.pause_all_actions();
            node.set("Name", "").unwrap();
            assert!(node.is_paused());
        }

        assert!(!node.is_paused());
        assert_eq!(count.get(), 0);
        assert!(!node.is_modified());
        assert!(node.is_valid());
    }

    #[test]
    fn pauses_nest_until_forced() {
        let node = fetched_person("Ada");
        let outer = node.pause_all_actions();
        let inner = node.pause_all_actions();
        drop(inner);
        assert!(node.is_paused());

        node.resume_all_actions();
        assert!(!node.is_paused());
        drop(outer);
        assert!(!node.is_paused());
    }

    #[test]
    fn pause_cascades_into_children() {
        let order = order_builder().create().unwrap();
        let lines = ChildList::new();
        order.load("Lines", lines.clone()).unwrap();
        let line = line_builder().create().unwrap();
        lines.add(line.clone()).unwrap();

        let guard = order.pause_all_actions();
        assert_eq!(guard.len(), 3);
        assert!(lines.is_paused());
        line.set("Quantity", 9).unwrap();
        drop(guard);

        assert_eq!(order.get::<i64>("Total").unwrap(), Some(0));
        assert!(!line.is_paused());
    }

    #[test]
    fn child_replaced_inside_a_lifecycle_bracket_is_resumed() {
        let runs = Rc::new(Cell::new(0));
        let seen = Rc::clone(&runs);
        let customers = person().rule(RuleDefinition::action("count-age", ["Age"], move |_| {
            seen.set(seen.get() + 1);
            Ok(())
        }));
        let first = customers.fetch(|n| n.load("Name", "Ada")).unwrap();
        let second = customers.fetch(|n| n.load("Name", "Grace")).unwrap();
        let order = order_builder()
            .fetch(|o| o.load("Customer", first.clone()))
            .unwrap();

        order.on_lifecycle_start(LifecycleOperation::Update);
        assert!(first.is_paused());
        order.load("Customer", second.clone()).unwrap();
        order.on_lifecycle_complete(LifecycleOperation::Update);

        assert!(!first.is_paused());
        assert!(!second.is_paused());
        first.set("Age", 40).unwrap();
        assert!(first.is_modified());
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn item_removed_inside_a_lifecycle_bracket_is_resumed() {
        let lines = ChildList::new();
        let line = line_builder().fetch(|l| l.load("Quantity", 2)).unwrap();
        let order = order_builder()
            .fetch(|o| {
                o.load("Lines", lines.clone())?;
                lines.add(line.clone())
            })
            .unwrap();

        order.on_lifecycle_start(LifecycleOperation::Update);
        lines.remove(&line).unwrap();
        order.on_lifecycle_complete(LifecycleOperation::Update);

        assert!(!line.is_paused());
        assert!(!lines.is_paused());
        assert_eq!(lines.pending_deletion().len(), 1);
    }

    #[test]
    fn resume_reruns_rules_only_when_enabled() {
        let quiet = person().fetch(|_| Ok(())).unwrap();
        assert!(quiet.is_valid());

        let eager = person()
            .settings(GraphSettings::default().with_rerun_rules_on_resume(true))
            .fetch(|_| Ok(()))
            .unwrap();
        assert!(!eager.is_valid());
    }
}

mod async_rules {
    use super::*;

    fn gated_uniqueness(gate: Rc<Notify>) -> RuleDefinition {
        RuleDefinition::validation_async("unique-name", "Name", move |node| {
            let gate = Rc::clone(&gate);
            async move {
                gate.notified().await;
                let name: Option<String> = node.get("Name")?;
                Ok::<_, anyhow::Error>(
                    name.filter(|n| n == "taken")
                        .map(|_| "Name is already taken".to_string()),
                )
            }
        })
    }

    #[tokio::test]
    async fn async_rule_holds_node_busy_until_complete() {
        LocalSet::new()
            .run_until(async {
                let gate = Rc::new(Notify::new());
                let node = NodeBuilder::new(person_schema())
                    .rule(gated_uniqueness(Rc::clone(&gate)))
                    .create()
                    .unwrap();

                node.set("Name", "taken").unwrap();
                assert!(node.is_busy());
                assert!(node.field("Name").unwrap().is_self_busy());
                assert!(matches!(node.pending_operation(), Err(GraphError::NotSavable(_))));

                gate.notify_one();
                node.wait_for_tasks().await.unwrap();

                assert!(!node.is_busy());
                assert!(!node.is_valid());
                assert_eq!(
                    node.field("Name").unwrap().messages(),
                    vec!["Name is already taken".to_string()]
                );
            })
            .await;
    }

    #[tokio::test]
    async fn busy_child_makes_ancestors_busy() {
        LocalSet::new()
            .run_until(async {
                let gate = Rc::new(Notify::new());
                let customer = NodeBuilder::new(person_schema())
                    .rule(gated_uniqueness(Rc::clone(&gate)))
                    .fetch(|_| Ok(()))
                    .unwrap();
                let order = order_builder().create().unwrap();
                order.set("Customer", customer.clone()).unwrap();

                customer.set("Name", "Ada").unwrap();
                assert!(order.is_busy());
                assert!(!order.is_self_busy());
                assert!(matches!(
                    order.set("Customer", None::<Node>),
                    Err(GraphError::Busy(_))
                ));

                gate.notify_one();
                order.wait_for_tasks().await.unwrap();
                assert!(!order.is_busy());
                assert!(order.is_valid());
            })
            .await;
    }

    #[tokio::test]
    async fn rules_after_an_async_rule_run_in_order() {
        LocalSet::new()
            .run_until(async {
                let gate = Rc::new(Notify::new());
                let log = Rc::new(RefCell::new(Vec::new()));
                let (first, second, third) = (Rc::clone(&log), Rc::clone(&log), Rc::clone(&log));
                let async_gate = Rc::clone(&gate);

                let node = NodeBuilder::new(person_schema())
                    .rule(RuleDefinition::action("first", ["Name"], move |_| {
                        first.borrow_mut().push("first");
                        Ok(())
                    }))
                    .rule(RuleDefinition::action_async("second", ["Name"], move |_| {
                        let gate = Rc::clone(&async_gate);
                        let log = Rc::clone(&second);
                        async move {
                            gate.notified().await;
                            log.borrow_mut().push("second");
                            Ok::<_, anyhow::Error>(())
                        }
                    }))
                    .rule(RuleDefinition::action("third", ["Name"], move |_| {
                        third.borrow_mut().push("third");
                        Ok(())
                    }))
                    .create()
                    .unwrap();

                node.set("Name", "Ada").unwrap();
                assert_eq!(*log.borrow(), vec!["first"]);

                gate.notify_one();
                node.wait_for_tasks().await.unwrap();
                assert_eq!(*log.borrow(), vec!["first", "second", "third"]);
                assert!(node.rules().is_executed(&"third".into()));
            })
            .await;
    }

    #[tokio::test]
    async fn async_fault_is_captured() {
        LocalSet::new()
            .run_until(async {
                let node = NodeBuilder::new(person_schema())
                    .rule(RuleDefinition::action_async("lookup", ["Age"], |_| async {
                        Err::<(), _>(anyhow::anyhow!("service unavailable"))
                    }))
                    .create()
                    .unwrap();

                node.set("Age", 5).unwrap();
                let err = node.wait_for_tasks().await.unwrap_err();

                match err {
                    GraphError::RuleFault { rule_id, source } => {
                        assert_eq!(rule_id.as_str(), "lookup");
                        assert_eq!(source.to_string(), "service unavailable");
                    }
                    other => panic!("unexpected error: {other}"),
                }
                assert!(!node.is_busy());
            })
            .await;
    }

    fn noop_async() -> NodeBuilder {
        NodeBuilder::new(person_schema()).rule(RuleDefinition::action_async(
            "touch",
            ["Age"],
            |_| async { Ok::<_, anyhow::Error>(()) },
        ))
    }

    #[tokio::test]
    async fn finished_tasks_do_not_accumulate() {
        LocalSet::new()
            .run_until(async {
                let node = noop_async().create().unwrap();

                for age in 0..100i64 {
                    node.set("Age", age).unwrap();
                    assert!(node.inner.tasks.borrow().len() <= 1);
                    tokio::task::yield_now().await;
                }

                assert!(!node.has_pending_tasks());
                assert!(node.inner.tasks.borrow().is_empty());
                assert!(!node.is_busy());
                node.wait_for_tasks().await.unwrap();
            })
            .await;
    }

    #[tokio::test]
    async fn finished_fault_is_kept_for_wait() {
        LocalSet::new()
            .run_until(async {
                let node = NodeBuilder::new(person_schema())
                    .rule(RuleDefinition::action_async("lookup", ["Age"], |_| async {
                        Err::<(), _>(anyhow::anyhow!("service unavailable"))
                    }))
                    .create()
                    .unwrap();

                node.set("Age", 5).unwrap();
                tokio::task::yield_now().await;
                assert!(node.has_pending_tasks());
                assert!(node.inner.tasks.borrow().is_empty());

                let err = node.wait_for_tasks().await.unwrap_err();
                assert!(matches!(err, GraphError::RuleFault { .. }));
                assert!(!node.has_pending_tasks());
            })
            .await;
    }

    #[test]
    fn async_rule_without_a_runtime_is_recorded() {
        let node = noop_async().create().unwrap();

        node.set("Age", 5).unwrap();

        assert!(!node.is_busy());
        assert!(!node.field("Age").unwrap().is_self_busy());
        assert!(matches!(
            node.inner.faults.borrow().as_slice(),
            [GraphError::TaskSpawn(_)]
        ));
    }

    #[tokio::test]
    async fn async_rule_outside_a_local_set_is_recorded() {
        let node = noop_async().create().unwrap();

        node.set("Age", 5).unwrap();

        assert!(!node.is_busy());
        assert!(node.inner.tasks.borrow().is_empty());
        assert!(matches!(
            node.wait_for_tasks().await,
            Err(GraphError::TaskSpawn(_))
        ));
    }

    #[tokio::test]
    async fn explicit_run_awaits_async_rules() {
        LocalSet::new()
            .run_until(async {
                let gate = Rc::new(Notify::new());
                let node = NodeBuilder::new(person_schema())
                    .rule(gated_uniqueness(Rc::clone(&gate)))
                    .fetch(|n| n.load("Name", "taken"))
                    .unwrap();

                gate.notify_one();
                node.run_rules(RunRulesFlag::ALL, CancellationToken::new())
                    .await
                    .unwrap();

                assert!(!node.is_valid());
                assert!(!node.is_busy());
            })
            .await;
    }
}
