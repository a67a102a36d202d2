use serde_json::{json, Value};

use objectql_data::{
    CallOptions, Command, CommandType, Driver, FilterCondition, QueryAst, Record, SortSpec,
};
use objectql_data_memory::MemoryDriver;

fn record(value: Value) -> Record {
    value.as_object().unwrap().clone()
}

async fn seeded(n: usize) -> MemoryDriver {
    let driver = MemoryDriver::new();
    let opts = CallOptions::default();
    for i in 0..n {
        driver
            .create(
                "item",
                record(json!({ "_id": format!("i{i}"), "n": i, "group": if i % 2 == 0 { "even" } else { "odd" } })),
                &opts,
            )
            .await
            .unwrap();
    }
    driver
}

#[tokio::test]
async fn pagination_length_invariant() {
    let n = 10u64;
    let driver = seeded(n as usize).await;
    let opts = CallOptions::default();
    for offset in [0u64, 3, 9, 10, 15] {
        for limit in [0u64, 1, 5, 10, 20] {
            let query = QueryAst::new("item").offset(offset).limit(limit);
            let result = driver.find("item", &query, &opts).await.unwrap();
            let expected = limit.min(n.saturating_sub(offset));
            assert_eq!(
                result.len() as u64,
                expected,
                "offset={offset} limit={limit}"
            );
        }
    }
}

#[tokio::test]
async fn find_filters_sorts_and_projects() {
    let driver = seeded(6).await;
    let opts = CallOptions::default();
    let query = QueryAst::new("item")
        .filter(FilterCondition::eq("group", "even"))
        .order_by(SortSpec::desc("n"))
        .fields(vec!["n".to_string()]);
    let result = driver.find("item", &query, &opts).await.unwrap();
    let ns: Vec<_> = result.iter().map(|r| r["n"].as_i64().unwrap()).collect();
    assert_eq!(ns, [4, 2, 0]);
    assert!(result[0].get("group").is_none());
    assert!(result[0].get("_id").is_some());
}

#[tokio::test]
async fn count_and_distinct() {
    let driver = seeded(5).await;
    let opts = CallOptions::default();
    assert_eq!(driver.count("item", None, &opts).await.unwrap(), 5);
    let filter = FilterCondition::eq("group", "odd");
    assert_eq!(driver.count("item", Some(&filter), &opts).await.unwrap(), 2);

    let groups = driver.distinct("item", "group", None, &opts).await.unwrap();
    assert_eq!(groups, vec![json!("even"), json!("odd")]);
}

#[tokio::test]
async fn aggregation_pipeline_groups_and_sorts() {
    let driver = MemoryDriver::new();
    let opts = CallOptions::default();
    for (dept, salary) in [("IT", 80000), ("IT", 90000), ("HR", 60000)] {
        driver
            .create("emp", record(json!({ "department": dept, "salary": salary })), &opts)
            .await
            .unwrap();
    }
    let out = driver
        .aggregate(
            "emp",
            &[
                json!({ "$group": { "_id": "$department", "avg": { "$avg": "$salary" } } }),
                json!({ "$sort": { "avg": -1 } }),
            ],
            &opts,
        )
        .await
        .unwrap();
    assert_eq!(
        out.into_iter().map(Value::Object).collect::<Vec<_>>(),
        vec![
            json!({ "_id": "IT", "avg": 85000 }),
            json!({ "_id": "HR", "avg": 60000 }),
        ]
    );
}

#[tokio::test]
async fn execute_query_reports_total_for_paginated_queries() {
    let driver = seeded(10).await;
    let opts = CallOptions::default();
    let query = QueryAst::new("item").offset(4).limit(3);
    let result = driver.execute_query(&query, &opts).await.unwrap();
    assert_eq!(result.value.len(), 3);
    assert_eq!(result.count, Some(10));

    let unpaged = driver
        .execute_query(&QueryAst::new("item"), &opts)
        .await
        .unwrap();
    assert_eq!(unpaged.value.len(), 10);
    assert_eq!(unpaged.count, None);
}

#[tokio::test]
async fn execute_command_bulk_operations() {
    let driver = MemoryDriver::new();
    let opts = CallOptions::default();

    let insert = Command {
        kind: CommandType::InsertMany,
        object: "todo".to_string(),
        id: None,
        ids: None,
        data: None,
        records: Some(vec![
            record(json!({ "title": "a", "done": false })),
            record(json!({ "title": "b", "done": false })),
            record(json!({ "title": "c", "done": true })),
        ]),
        updates: None,
        filter: None,
    };
    let result = driver.execute_command(&insert, &opts).await.unwrap();
    assert!(result.success);
    assert_eq!(result.affected, 3);

    let update = Command {
        kind: CommandType::UpdateMany,
        object: "todo".to_string(),
        id: None,
        ids: None,
        data: None,
        records: None,
        updates: Some(record(json!({ "done": true }))),
        filter: Some(FilterCondition::eq("done", false)),
    };
    let result = driver.execute_command(&update, &opts).await.unwrap();
    assert_eq!(result.affected, 2);

    let delete = Command {
        kind: CommandType::DeleteMany,
        object: "todo".to_string(),
        id: None,
        ids: None,
        data: None,
        records: None,
        updates: None,
        filter: Some(FilterCondition::eq("done", true)),
    };
    let result = driver.execute_command(&delete, &opts).await.unwrap();
    assert_eq!(result.affected, 3);
    assert_eq!(driver.count("todo", None, &opts).await.unwrap(), 0);
}

#[tokio::test]
async fn transaction_commit_and_rollback() {
    let driver = MemoryDriver::new();
    let opts = CallOptions::default();
    driver
        .create("acct", record(json!({ "_id": "a", "balance": 10 })), &opts)
        .await
        .unwrap();

    // Rollback: the working copy is discarded.
    let trx: std::sync::Arc<dyn objectql_data::Transaction> =
        std::sync::Arc::from(driver.begin_transaction().await.unwrap());
    let trx_opts = CallOptions {
        transaction: Some(trx.clone()),
        ..CallOptions::default()
    };
    driver
        .update("acct", "a", record(json!({ "balance": 0 })), &trx_opts)
        .await
        .unwrap();
    trx.rollback().await.unwrap();
    let live = driver.find_one("acct", "a", None, &opts).await.unwrap().unwrap();
    assert_eq!(live["balance"], 10);

    // Commit: the working copy becomes the live store.
    let trx: std::sync::Arc<dyn objectql_data::Transaction> =
        std::sync::Arc::from(driver.begin_transaction().await.unwrap());
    let trx_opts = CallOptions {
        transaction: Some(trx.clone()),
        ..CallOptions::default()
    };
    driver
        .update("acct", "a", record(json!({ "balance": 99 })), &trx_opts)
        .await
        .unwrap();
    // Not visible outside the transaction before commit.
    let live = driver.find_one("acct", "a", None, &opts).await.unwrap().unwrap();
    assert_eq!(live["balance"], 10);
    trx.commit().await.unwrap();
    let live = driver.find_one("acct", "a", None, &opts).await.unwrap().unwrap();
    assert_eq!(live["balance"], 99);
}
