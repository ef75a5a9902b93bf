//! Demand-driven result delivery.

mod common;

use common::*;
use futures::StreamExt;
use pretty_assertions::assert_eq;
use std::time::Duration;
use ydb_reactive::backend::mock::{MockBackend, QueryScript};
use ydb_reactive::driver::{Outcome, UNBOUNDED};
use ydb_reactive::{
    BackendError, ConnectionConfig, DriverError, DriverResult, NativeType, NativeValue, StatusCode,
};

#[tokio::test]
async fn test_zero_demand_fetches_nothing() -> DriverResult<()> {
    let backend = MockBackend::new();
    script_numbers(&backend, &[3]);
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement(NUMBERS)?;
    let mut result = stmt.execute().await?;
    let mut rows = result.subscribe()?;

    rows.request(0);
    assert!(rows.next().await.is_none());
    assert!(!rows.is_terminated());
    assert!(rows.metadata().is_none());
    assert!(backend.queries().is_empty());
    assert_eq!(backend.parts_fetched(), 0);

    rows.request(1);
    let first = drain(&mut rows).await;
    assert_eq!(numbers(&first), vec![1]);
    assert!(!rows.is_terminated());
    assert_eq!(backend.parts_fetched(), 1);
    assert_eq!(rows.demand(), 0);

    drop(rows);
    let stats = factory.pool().stats();
    assert_eq!(stats.released, 1);
    assert_eq!(stats.leased, 0);
    Ok(())
}

#[tokio::test]
async fn test_next_part_fetched_only_after_drain() -> DriverResult<()> {
    let backend = MockBackend::new();
    let total = script_numbers(&backend, &[3, 2, 1]);
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement(NUMBERS)?;
    let mut result = stmt.execute().await?;
    let mut rows = result.subscribe()?;

    rows.request(2);
    assert_eq!(numbers(&drain(&mut rows).await), vec![1, 2]);
    assert_eq!(backend.parts_fetched(), 1);

    rows.request(2);
    assert_eq!(numbers(&drain(&mut rows).await), vec![3, 4]);
    assert_eq!(backend.parts_fetched(), 2);

    rows.request(UNBOUNDED);
    assert_eq!(numbers(&drain(&mut rows).await), vec![5, 6]);
    assert!(rows.is_terminated());
    assert_eq!(rows.outcome(), Some(Outcome::Completed));
    assert_eq!(rows.rows_emitted(), total);
    assert_eq!(factory.pool().stats().released, 1);
    Ok(())
}

#[tokio::test]
async fn test_demand_sequences_emit_every_row() -> DriverResult<()> {
    let backend = MockBackend::new();
    let total = script_numbers(&backend, &[3, 1, 0, 4, 2]);
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let schedules: Vec<Vec<u64>> = vec![
        vec![1; 12],
        vec![3, 3, 3, 3],
        vec![0, 10],
        vec![2, 0, 5, 0, 7],
        vec![100],
    ];
    for schedule in schedules {
        let mut stmt = conn.create_statement(NUMBERS)?;
        let mut result = stmt.execute().await?;
        let mut rows = result.subscribe()?;

        let mut seen = Vec::new();
        for &n in &schedule {
            rows.request(n);
            let burst = drain(&mut rows).await;
            assert!(burst.len() as u64 <= n, "burst of {} exceeds demand {n}", burst.len());
            seen.extend(numbers(&burst));
        }
        assert_eq!(seen, (1..=total).collect::<Vec<_>>());
    }
    assert_eq!(factory.pool().stats().leased, 0);
    Ok(())
}

#[tokio::test]
async fn test_cancel_releases_session_once() -> DriverResult<()> {
    let backend = MockBackend::new();
    script_numbers(&backend, &[2, 2]);
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement(NUMBERS)?;
    let mut result = stmt.execute().await?;
    let mut rows = result.subscribe()?;

    rows.request(1);
    assert_eq!(numbers(&drain(&mut rows).await), vec![1]);

    rows.cancel().await;
    rows.cancel().await;
    rows.request(10);
    assert!(rows.next().await.is_none());
    assert_eq!(rows.outcome(), Some(Outcome::Cancelled));
    drop(rows);

    assert_eq!(backend.cancellations(), 1);
    let stats = factory.pool().stats();
    assert_eq!(stats.released, 1);
    assert_eq!(stats.invalidated, 0);
    assert_eq!(stats.leased, 0);
    Ok(())
}

#[tokio::test]
async fn test_cancel_before_demand_sends_nothing() -> DriverResult<()> {
    let backend = MockBackend::new();
    script_numbers(&backend, &[2]);
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    {
        let mut stmt = conn.create_statement(NUMBERS)?;
        let mut result = stmt.execute().await?;
        let mut rows = result.subscribe()?;
        rows.cancel().await;
        assert!(rows.is_terminated());
    }
    {
        // Never subscribed.
        let mut stmt = conn.create_statement(NUMBERS)?;
        let _result = stmt.execute().await?;
    }

    assert!(backend.queries().is_empty());
    assert_eq!(backend.cancellations(), 0);
    let stats = factory.pool().stats();
    assert_eq!(stats.acquired, 2);
    assert_eq!(stats.released, 2);
    Ok(())
}

#[tokio::test]
async fn test_dropped_stream_is_cancelled_before_next_statement() -> DriverResult<()> {
    let backend = MockBackend::new();
    script_numbers(&backend, &[2, 2]);
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    {
        let mut stmt = conn.create_statement(NUMBERS)?;
        let mut result = stmt.execute().await?;
        let mut rows = result.subscribe()?;
        rows.request(1);
        assert_eq!(drain(&mut rows).await.len(), 1);
    }

    conn.create_statement("SELECT 1")?.execute().await?.rows().await?;
    assert_eq!(backend.cancellations(), 1);

    let queries = backend.queries();
    assert_eq!(queries.len(), 2);
    // The cancelled call gave its session back before the next lease.
    assert_eq!(queries[0].session, queries[1].session);
    assert_eq!(factory.pool().stats().created, 1);
    Ok(())
}

#[tokio::test]
async fn test_second_subscription_fails() -> DriverResult<()> {
    let backend = MockBackend::new();
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement("SELECT 1")?;
    let mut result = stmt.execute().await?;
    {
        let mut rows = result.subscribe()?;
        rows.request(UNBOUNDED);
        drain(&mut rows).await;
    }
    let err = result.subscribe().unwrap_err();
    assert!(matches!(err, DriverError::MultipleSubscription));
    assert!(err.is_programming_error());
    Ok(())
}

#[tokio::test]
async fn test_backend_error_terminates_stream() -> DriverResult<()> {
    let backend = MockBackend::new();
    backend.script(
        NUMBERS,
        QueryScript::new()
            .column("n", NativeType::Uint64)
            .part(vec![vec![NativeValue::Uint64(1)], vec![NativeValue::Uint64(2)]])
            .part(vec![vec![NativeValue::Uint64(3)]])
            .fail_at_part(1, BackendError::new(StatusCode::Overloaded, "shard busy")),
    );
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement(NUMBERS)?;
    let mut result = stmt.execute().await?;
    let mut rows = result.subscribe()?;
    rows.request(UNBOUNDED);

    assert_eq!(rows.next().await.transpose()?.map(|r| r.get::<u64>(0usize)).transpose()?, Some(1));
    assert_eq!(rows.next().await.transpose()?.map(|r| r.get::<u64>(0usize)).transpose()?, Some(2));
    match rows.next().await {
        Some(Err(DriverError::Backend(e))) => assert_eq!(e.status(), StatusCode::Overloaded),
        other => panic!("unexpected {other:?}"),
    }
    assert!(rows.next().await.is_none());
    assert_eq!(rows.outcome(), Some(Outcome::Failed));

    // Statement-level failure: the session goes back to the pool.
    let stats = factory.pool().stats();
    assert_eq!(stats.released, 1);
    assert_eq!(stats.invalidated, 0);
    Ok(())
}

#[tokio::test]
async fn test_session_failure_invalidates_session() -> DriverResult<()> {
    let backend = MockBackend::new();
    backend.script(
        NUMBERS,
        QueryScript::new()
            .column("n", NativeType::Uint64)
            .fail_at_part(0, BackendError::new(StatusCode::SessionExpired, "expired")),
    );
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement(NUMBERS)?;
    let err = stmt.execute().await?.rows().await.unwrap_err();
    assert!(matches!(err, DriverError::Backend(_)));

    let stats = factory.pool().stats();
    assert_eq!(stats.invalidated, 1);
    assert_eq!(stats.released, 0);
    assert_eq!(stats.idle, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_invalidates_session() -> DriverResult<()> {
    let backend = MockBackend::new();
    script_numbers(&backend, &[1]);
    let config = ConnectionConfig::builder()
        .pool(pool_config())
        .operation_timeout(Duration::from_millis(50))
        .build()?;
    let factory = factory_with(&backend, config).await;
    let mut conn = factory.create()?;
    backend.set_fetch_delay(Some(Duration::from_secs(1)));

    let mut stmt = conn.create_statement(NUMBERS)?;
    let err = stmt.execute().await?.rows().await.unwrap_err();
    assert!(matches!(err, DriverError::Timeout { operation: "fetch", .. }));
    assert!(err.is_retryable());
    assert_eq!(factory.pool().stats().invalidated, 1);
    Ok(())
}

#[tokio::test]
async fn test_metadata_known_after_first_fetch() -> DriverResult<()> {
    let backend = MockBackend::new();
    script_users(&backend);
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement(SELECT_USER)?;
    stmt.bind("$id", 1u64)?;
    let mut result = stmt.execute().await?;
    let mut rows = result.subscribe()?;
    assert!(rows.metadata().is_none());

    rows.request(1);
    let row = rows.next().await.expect("one row")?;
    let metadata = rows.metadata().expect("metadata").clone();
    assert_eq!(metadata.column_names(), vec!["id", "name"]);
    assert!(metadata.column_by_name("name").expect("name").is_nullable());
    assert_eq!(row.get::<Option<String>>("name")?, Some("a".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_stream_adapter_prefetches_in_steps() -> DriverResult<()> {
    let backend = MockBackend::new();
    let total = script_numbers(&backend, &[2, 2, 1]);
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement(NUMBERS)?;
    let mut result = stmt.execute().await?;
    let rows = result.subscribe()?;
    let collected: Vec<u64> = rows
        .into_stream(2)
        .map(|row| row.and_then(|r| r.get::<u64>("n")))
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<DriverResult<_>>()?;

    assert_eq!(collected, (1..=total).collect::<Vec<_>>());
    assert_eq!(backend.parts_fetched(), 3);
    assert_eq!(factory.pool().stats().released, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_pull_can_be_retried() -> DriverResult<()> {
    let backend = MockBackend::new();
    script_numbers(&backend, &[3]);
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement(NUMBERS)?;
    let mut result = stmt.execute().await?;
    let mut rows = result.subscribe()?;

    backend.set_fetch_delay(Some(Duration::from_millis(100)));
    rows.request(3);
    assert!(tokio::time::timeout(Duration::from_millis(10), rows.next()).await.is_err());
    assert!(!rows.is_terminated());

    backend.set_fetch_delay(None);
    assert_eq!(numbers(&drain(&mut rows).await), vec![1, 2, 3]);
    assert_eq!(rows.outcome(), Some(Outcome::Completed));
    assert_eq!(rows.demand(), 0);
    assert_eq!(backend.queries().len(), 1);
    assert_eq!(backend.parts_fetched(), 1);
    drop(rows);

    let stats = factory.pool().stats();
    assert_eq!(stats.released, 1);
    assert_eq!(stats.invalidated, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_send_is_not_repeated() -> DriverResult<()> {
    let backend = MockBackend::new();
    script_numbers(&backend, &[3]);
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement(NUMBERS)?;
    let mut result = stmt.execute().await?;
    let mut rows = result.subscribe()?;

    backend.set_query_delay(Some(Duration::from_millis(100)));
    rows.request(3);
    assert!(tokio::time::timeout(Duration::from_millis(10), rows.next()).await.is_err());

    backend.set_query_delay(None);
    assert!(matches!(
        rows.next().await,
        Some(Err(DriverError::InvalidState(_)))
    ));
    assert!(rows.next().await.is_none());
    assert_eq!(rows.outcome(), Some(Outcome::Failed));
    assert!(backend.queries().is_empty());

    let stats = factory.pool().stats();
    assert_eq!(stats.invalidated, 1);
    assert_eq!(stats.leased, 0);
    Ok(())
}
