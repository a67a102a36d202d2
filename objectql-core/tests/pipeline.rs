//! End-to-end tests of the repository pipeline over the in-memory
//! driver: system stamps, hooks, validation, permissions, row-level
//! security, transactions, actions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use objectql_core::prelude::*;
use objectql_core::{
    ActionDefinition, ActionKind, CrossFieldOperator, PermissionOp, PermissionRule, RuleKind,
    StateTransition, TriggerOp, ValidationRule,
};
use objectql_data_memory::MemoryDriver;

fn record(value: Value) -> Record {
    value.as_object().unwrap().clone()
}

fn todo_object() -> ObjectDefinition {
    ObjectDefinition::new("todo")
        .field("title", FieldDefinition::new(FieldType::Text).required())
        .field("status", FieldDefinition::new(FieldType::Text))
}

fn runtime_with(objects: Vec<ObjectDefinition>) -> ObjectQL {
    let mut builder = ObjectQL::builder().datasource("default", Arc::new(MemoryDriver::new()));
    for object in objects {
        builder = builder.object(object);
    }
    builder.build().unwrap()
}

#[tokio::test]
async fn create_stamps_system_fields() {
    let runtime = runtime_with(vec![todo_object()]);
    let ctx = runtime.context(UserContext::user("u1").in_space("space-A"));

    let created = ctx
        .object("todo")
        .create(record(json!({ "title": "Buy milk" })))
        .await
        .unwrap();

    assert_eq!(created["created_by"], "u1");
    assert_eq!(created["updated_by"], "u1");
    assert_eq!(created["space_id"], "space-A");
    assert!(!created["_id"].as_str().unwrap().is_empty());
    assert_eq!(created["created_at"], created["updated_at"]);
}

#[tokio::test]
async fn update_preserves_created_at_and_advances_updated_at() {
    let runtime = runtime_with(vec![todo_object()]);
    let ctx = runtime.context(UserContext::user("u1"));
    let repo = ctx.object("todo");

    let created = repo.create(record(json!({ "title": "a" }))).await.unwrap();
    let id = created["_id"].as_str().unwrap();

    let updated = repo
        .update(id, record(json!({ "title": "b", "created_at": "1999-01-01T00:00:00Z" })))
        .await
        .unwrap();

    assert_eq!(updated["created_at"], created["created_at"]);
    assert!(updated["updated_at"].as_str().unwrap() > created["updated_at"].as_str().unwrap());
    assert_eq!(updated["title"], "b");
}

#[tokio::test]
async fn unknown_object_is_not_found() {
    let runtime = runtime_with(vec![]);
    let ctx = runtime.system_context();
    let err = ctx
        .object("ghost")
        .create(record(json!({ "a": 1 })))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn required_field_blocks_create_with_details() {
    let runtime = runtime_with(vec![todo_object()]);
    let ctx = runtime.context(UserContext::user("u1"));
    let err = ctx
        .object("todo")
        .create(record(json!({ "status": "open" })))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Validation);
    let details = err.details.unwrap();
    assert_eq!(details["errors"][0]["field"], "title");
}

#[tokio::test]
async fn create_trigger_rules_skip_updates() {
    let object = todo_object().rule(
        ValidationRule::new(RuleKind::CrossField {
            field: "status".to_string(),
            operator: CrossFieldOperator::Eq,
            compare_to: None,
            value: Some(json!("new")),
        })
        .trigger(vec![TriggerOp::Create]),
    );
    let runtime = runtime_with(vec![object]);
    let ctx = runtime.context(UserContext::user("u1"));
    let repo = ctx.object("todo");

    let err = repo
        .create(record(json!({ "title": "a", "status": "old" })))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Validation);

    let created = repo
        .create(record(json!({ "title": "a", "status": "new" })))
        .await
        .unwrap();
    let id = created["_id"].as_str().unwrap();

    // The same violating value sails through on update and delete.
    repo.update(id, record(json!({ "status": "old" }))).await.unwrap();
    repo.delete(id).await.unwrap();
}

#[tokio::test]
async fn terminal_state_blocks_transitions() {
    let mut transitions = BTreeMap::new();
    transitions.insert(
        "active".to_string(),
        StateTransition { allowed_next: vec!["completed".to_string()], is_terminal: false },
    );
    transitions.insert(
        "completed".to_string(),
        StateTransition { allowed_next: vec![], is_terminal: true },
    );
    let object = todo_object().rule(ValidationRule::new(RuleKind::StateMachine {
        field: "status".to_string(),
        transitions,
    }));
    let runtime = runtime_with(vec![object]);
    let ctx = runtime.context(UserContext::user("u1"));
    let repo = ctx.object("todo");

    let created = repo
        .create(record(json!({ "title": "t", "status": "completed" })))
        .await
        .unwrap();
    let id = created["_id"].as_str().unwrap();

    let err = repo
        .update(id, record(json!({ "status": "active" })))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Validation);
    let details = err.details.unwrap();
    let message = details["errors"][0]["message"].as_str().unwrap();
    assert_eq!(details["errors"][0]["code"], "INVALID_STATE_TRANSITION");
    assert!(message.contains("completed"));
    assert!(message.contains("active"));
}

#[tokio::test]
async fn before_create_hook_defaults_a_field() {
    let runtime = runtime_with(vec![ObjectDefinition::new("post")
        .field("title", FieldDefinition::new(FieldType::Text))
        .field("status", FieldDefinition::new(FieldType::Text))]);

    runtime.on(HookEvent::BeforeCreate, "post", |mut hc| async move {
        if let Some(data) = hc.data.as_mut() {
            if !data.contains_key("status") {
                data.insert("status".to_string(), json!("draft"));
            }
        }
        Ok(hc)
    });

    let ctx = runtime.context(UserContext::user("u1"));
    let created = ctx
        .object("post")
        .create(record(json!({ "title": "x" })))
        .await
        .unwrap();
    assert_eq!(created["status"], "draft");
}

#[tokio::test]
async fn hooks_fire_in_registration_order_and_share_state() {
    let runtime = runtime_with(vec![todo_object()]);

    runtime.on(HookEvent::BeforeCreate, "todo", |mut hc| async move {
        hc.state.insert("trail".to_string(), json!("first"));
        Ok(hc)
    });
    runtime.on(HookEvent::BeforeCreate, "todo", |mut hc| async move {
        let trail = hc.state["trail"].as_str().unwrap().to_string();
        hc.state.insert("trail".to_string(), json!(format!("{trail},second")));
        Ok(hc)
    });
    runtime.on(HookEvent::AfterCreate, "todo", |mut hc| async move {
        // The scratch state written by the before hooks is visible here.
        let trail = hc.state["trail"].clone();
        if let Some(Value::Object(result)) = hc.result.as_mut() {
            result.insert("trail".to_string(), trail);
        }
        Ok(hc)
    });

    let ctx = runtime.context(UserContext::user("u1"));
    let created = ctx
        .object("todo")
        .create(record(json!({ "title": "t" })))
        .await
        .unwrap();
    assert_eq!(created["trail"], "first,second");
}

#[tokio::test]
async fn hook_error_aborts_the_write() {
    let runtime = runtime_with(vec![todo_object()]);
    runtime.on(HookEvent::BeforeCreate, "todo", |hc| async move {
        let _ = &hc;
        Err(Error::conflict("nope"))
    });

    let ctx = runtime.context(UserContext::user("u1"));
    let err = ctx
        .object("todo")
        .create(record(json!({ "title": "t" })))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
    assert_eq!(ctx.object("todo").count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn removed_hooks_stop_firing() {
    let runtime = runtime_with(vec![todo_object()]);
    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    let id = runtime.on(HookEvent::BeforeCreate, "todo", move |hc| {
        let c = c.clone();
        async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(hc)
        }
    });

    let ctx = runtime.context(UserContext::user("u1"));
    ctx.object("todo").create(record(json!({ "title": "a" }))).await.unwrap();
    runtime.off(HookEvent::BeforeCreate, "todo", id);
    ctx.object("todo").create(record(json!({ "title": "b" }))).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn restrict_scopes_reads_to_the_caller_space() {
    let runtime = runtime_with(vec![todo_object()]);
    runtime.on(HookEvent::BeforeFind, "todo", |mut hc| async move {
        let space = hc.ctx.user().space_id.clone().unwrap_or_default();
        hc.restrict(FilterCondition::eq("space_id", space));
        Ok(hc)
    });

    let system = runtime.system_context();
    for space in ["space-A", "space-B"] {
        let ctx = runtime.context(UserContext::user("seed").in_space(space));
        ctx.object("todo")
            .create(record(json!({ "title": format!("in {space}") })))
            .await
            .unwrap();
    }

    let ctx = runtime.context(UserContext::user("u1").in_space("space-A"));
    let visible = ctx.object("todo").find(QueryAst::new("todo")).await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0]["space_id"], "space-A");

    // restrict is a no-op for system contexts.
    let all = system.object("todo").find(QueryAst::new("todo")).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn permissions_gate_by_role() {
    let object = todo_object().permission(PermissionRule {
        operations: vec![PermissionOp::Delete],
        allowed_roles: vec!["admin".to_string()],
    });
    let runtime = runtime_with(vec![object]);

    let admin = runtime.context(UserContext::user("a").with_roles(vec!["admin".to_string()]));
    let created = admin
        .object("todo")
        .create(record(json!({ "title": "t" })))
        .await
        .unwrap();
    let id = created["_id"].as_str().unwrap().to_string();

    let user = runtime.context(UserContext::user("u").with_roles(vec!["user".to_string()]));
    let err = user.object("todo").delete(&id).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Forbidden);

    assert!(admin.object("todo").delete(&id).await.unwrap());
}

#[tokio::test]
async fn transaction_commits_on_ok_and_rolls_back_on_err() {
    let runtime = runtime_with(vec![todo_object()]);
    let ctx = runtime.context(UserContext::user("u1"));

    let result: Result<()> = ctx
        .transaction(|trx| async move {
            trx.object("todo").create(record(json!({ "title": "kept" }))).await?;
            Ok(())
        })
        .await;
    result.unwrap();
    assert_eq!(ctx.object("todo").count(None).await.unwrap(), 1);

    let result: Result<()> = ctx
        .transaction(|trx| async move {
            trx.object("todo").create(record(json!({ "title": "lost" }))).await?;
            Err(Error::validation("boom"))
        })
        .await;
    assert!(result.is_err());
    assert_eq!(ctx.object("todo").count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn actions_validate_target_and_input() {
    let object = todo_object()
        .action(
            "complete",
            ActionDefinition { kind: ActionKind::Record, label: None, params: BTreeMap::new() },
        )
        .action(
            "purge",
            ActionDefinition {
                kind: ActionKind::Global,
                label: None,
                params: {
                    let mut params = BTreeMap::new();
                    params.insert(
                        "confirm".to_string(),
                        FieldDefinition::new(FieldType::Boolean).required(),
                    );
                    params
                },
            },
        );
    let runtime = runtime_with(vec![object]);

    runtime.register_action("todo", "complete", |ac| async move {
        let id = ac.id.clone().expect("record action has an id");
        let updated = ac
            .ctx
            .object("todo")
            .update(&id, record(json!({ "status": "done" })))
            .await?;
        Ok(Value::Object(updated))
    });
    runtime.register_action("todo", "purge", |ac| async move {
        let removed = ac
            .ctx
            .object("todo")
            .delete_many(FilterCondition::eq("status", "done"))
            .await?;
        Ok(json!({ "removed": removed }))
    });

    let ctx = runtime.context(UserContext::user("u1"));
    let repo = ctx.object("todo");
    let created = repo.create(record(json!({ "title": "t" }))).await.unwrap();
    let id = created["_id"].as_str().unwrap();

    // A record action without an id, a global action with one.
    let err = repo.execute("complete", None, Record::new()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Validation);
    let err = repo.execute("purge", Some(id), Record::new()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Validation);

    // Param validation runs before the handler.
    let err = repo.execute("purge", None, Record::new()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Validation);

    let result = repo.execute("complete", Some(id), Record::new()).await.unwrap();
    assert_eq!(result["status"], "done");

    let result = repo
        .execute("purge", None, record(json!({ "confirm": true })))
        .await
        .unwrap();
    assert_eq!(result["removed"], 1);

    let err = repo.execute("missing", None, Record::new()).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn bulk_updates_run_the_full_pipeline() {
    let runtime = runtime_with(vec![todo_object()]);
    let ctx = runtime.context(UserContext::user("u1"));
    let repo = ctx.object("todo");

    repo.create_many(vec![
        record(json!({ "title": "a", "status": "open" })),
        record(json!({ "title": "b", "status": "open" })),
        record(json!({ "title": "c", "status": "done" })),
    ])
    .await
    .unwrap();

    let touched = repo
        .update_many(FilterCondition::eq("status", "open"), record(json!({ "status": "done" })))
        .await
        .unwrap();
    assert_eq!(touched, 2);
    assert_eq!(
        repo.count(Some(FilterCondition::eq("status", "done"))).await.unwrap(),
        3
    );
    // Audit stamps applied per record.
    let rows = repo.find(QueryAst::new("todo")).await.unwrap();
    assert!(rows.iter().all(|r| r["updated_by"] == "u1"));

    let removed = repo
        .delete_many(FilterCondition::eq("status", "done"))
        .await
        .unwrap();
    assert_eq!(removed, 3);
}

#[tokio::test]
async fn expand_replaces_lookup_ids_with_records() {
    let author = ObjectDefinition::new("author")
        .field("name", FieldDefinition::new(FieldType::Text));
    let book = ObjectDefinition::new("book")
        .field("title", FieldDefinition::new(FieldType::Text))
        .field(
            "author",
            FieldDefinition::new(FieldType::Lookup).reference_to("author"),
        );
    let runtime = runtime_with(vec![author, book]);
    let ctx = runtime.context(UserContext::user("u1"));

    let author = ctx
        .object("author")
        .create(record(json!({ "name": "Ursula" })))
        .await
        .unwrap();
    let author_id = author["_id"].as_str().unwrap();
    ctx.object("book")
        .create(record(json!({ "title": "Earthsea", "author": author_id })))
        .await
        .unwrap();

    let repo = ctx.object("book");
    let mut rows = repo.find(QueryAst::new("book")).await.unwrap();
    repo.expand(&mut rows, &["author".to_string()]).await.unwrap();
    assert_eq!(rows[0]["author"]["name"], "Ursula");

    // A reference to an unregistered object surfaces on first read.
    let orphan = ObjectDefinition::new("orphan").field(
        "parent",
        FieldDefinition::new(FieldType::Lookup).reference_to("nowhere"),
    );
    runtime.register_object(orphan).unwrap();
    let repo = ctx.object("orphan");
    let mut rows = vec![record(json!({ "_id": "x", "parent": "y" }))];
    let err = repo.expand(&mut rows, &["parent".to_string()]).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn config_declared_packages_load_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("ticket.object.yml"),
        "name: ticket\nlabel: Ticket\nfields:\n  subject:\n    type: text\n",
    )
    .unwrap();

    let yaml = format!(
        "packages:\n  - id: ticketing\n    path: \"{}\"\n",
        dir.path().display()
    );
    let config = objectql_core::RuntimeConfig::from_yaml_str(&yaml).unwrap();
    let runtime = ObjectQL::builder()
        .config(config)
        .datasource("default", Arc::new(MemoryDriver::new()))
        .build()
        .unwrap();

    let def = runtime.registry().get_object("ticket").unwrap().unwrap();
    assert_eq!(def.label.as_deref(), Some("Ticket"));

    let ctx = runtime.system_context();
    ctx.object("ticket")
        .create(record(json!({ "subject": "hello" })))
        .await
        .unwrap();

    // Package-scoped, so removal takes the object with it.
    runtime.remove_package("ticketing");
    assert!(runtime.registry().get_object("ticket").unwrap().is_none());
}

#[tokio::test]
async fn removing_a_package_removes_its_objects() {
    let runtime = runtime_with(vec![]);
    runtime
        .registry()
        .register(
            objectql_core::MetadataKind::Object,
            json!({ "name": "plugin_thing" }),
            objectql_core::RegisterOptions::package("plugin"),
        )
        .unwrap();
    runtime.register_datasource("default", Arc::new(MemoryDriver::new()));

    let ctx = runtime.system_context();
    ctx.object("plugin_thing")
        .create(record(json!({ "x": 1 })))
        .await
        .unwrap();

    runtime.remove_package("plugin");
    let err = ctx
        .object("plugin_thing")
        .create(record(json!({ "x": 2 })))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
}
