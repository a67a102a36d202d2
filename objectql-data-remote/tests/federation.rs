//! Federation driver against an in-process mock ObjectQL server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use objectql_core::{MetadataKind, ObjectQL, QueryAst, UserContext};
use objectql_data::ErrorCode;
use objectql_data_remote::{RemoteDriver, RemoteOptions, RetryPolicy};

#[derive(Clone, Default)]
struct MockState {
    /// POST /api/objectql calls observed.
    op_calls: Arc<AtomicUsize>,
    /// How many times to answer 500 before succeeding.
    flaky_budget: Arc<AtomicUsize>,
}

async fn metadata_listing() -> Json<Value> {
    Json(json!({ "objects": [
        { "name": "remote_user", "label": "Remote User" },
        { "name": "remote_org", "label": "Remote Org" },
    ] }))
}

async fn metadata_object(Path(name): Path<String>) -> Json<Value> {
    Json(json!({
        "name": name,
        "label": name,
        "fields": { "name": { "type": "text" } },
    }))
}

async fn objectql_op(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    state.op_calls.fetch_add(1, Ordering::SeqCst);
    let op = body["op"].as_str().unwrap_or_default();
    let object = body["object"].as_str().unwrap_or_default();
    match (op, object) {
        ("find", "remote_user") => Json(json!({ "data": [
            { "_id": "ru-1", "name": "Remote Ada" },
        ] })),
        ("count", "remote_user") => Json(json!({ "data": 1 })),
        _ => Json(json!({ "error": {
            "code": "NOT_FOUND",
            "message": format!("no such object '{object}'"),
        } })),
    }
}

async fn flaky_op(
    State(state): State<MockState>,
    Json(_body): Json<Value>,
) -> Result<Json<Value>, axum::http::StatusCode> {
    state.op_calls.fetch_add(1, Ordering::SeqCst);
    if state
        .flaky_budget
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return Err(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
    Ok(Json(json!({ "data": [] })))
}

async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn fast_retry(max_attempts: u32) -> RemoteOptions {
    RemoteOptions {
        timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(2),
            factor: 2,
            max_backoff: Duration::from_millis(20),
        },
    }
}

#[tokio::test]
async fn mounted_remote_objects_behave_like_local_ones() {
    let state = MockState::default();
    let router = Router::new()
        .route("/api/metadata/objects", get(metadata_listing))
        .route("/api/metadata/objects/{name}", get(metadata_object))
        .route("/api/objectql", post(objectql_op))
        .with_state(state.clone());
    let base_url = spawn(router).await;

    let runtime = ObjectQL::builder().build().unwrap();
    RemoteDriver::mount_with_options(&runtime, &base_url, fast_retry(3))
        .await
        .unwrap();

    // Both remote objects landed in the local registry, tagged with
    // the federated datasource.
    let names = runtime.registry().names(MetadataKind::Object);
    assert_eq!(names, ["remote_user", "remote_org"]);
    let def = runtime.registry().get_object("remote_user").unwrap().unwrap();
    assert!(def.datasource.starts_with("remote:"));

    let ctx = runtime.context(UserContext::user("u1"));
    let rows = ctx
        .object("remote_user")
        .find(QueryAst::new("remote_user"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Remote Ada");

    assert_eq!(ctx.object("remote_user").count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn transient_failures_retry_with_backoff() {
    let state = MockState::default();
    state.flaky_budget.store(2, Ordering::SeqCst);
    let router = Router::new()
        .route("/api/objectql", post(flaky_op))
        .with_state(state.clone());
    let base_url = spawn(router).await;

    let runtime = ObjectQL::builder().build().unwrap();
    let driver = RemoteDriver::with_options(runtime.registry_handle(), &base_url, fast_retry(5)).unwrap();

    use objectql_data::{CallOptions, Driver};
    let rows = driver
        .find("anything", &QueryAst::new("anything"), &CallOptions::default())
        .await
        .unwrap();
    assert!(rows.is_empty());
    // Two 500s, then the success.
    assert_eq!(state.op_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn not_found_is_never_retried() {
    let state = MockState::default();
    let router = Router::new()
        .route("/api/objectql", post(objectql_op))
        .with_state(state.clone());
    let base_url = spawn(router).await;

    let runtime = ObjectQL::builder().build().unwrap();
    let driver = RemoteDriver::with_options(runtime.registry_handle(), &base_url, fast_retry(5)).unwrap();

    use objectql_data::{CallOptions, Driver};
    let err = driver
        .find("missing", &QueryAst::new("missing"), &CallOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);
    assert_eq!(state.op_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unreachable_remote_mounts_nothing() {
    let runtime = ObjectQL::builder().build().unwrap();
    // Nothing listens here; connect logs and continues.
    RemoteDriver::mount_with_options(&runtime, "http://127.0.0.1:9", fast_retry(2))
        .await
        .unwrap();
    assert!(runtime.registry().names(MetadataKind::Object).is_empty());
}
