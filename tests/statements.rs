//! Binding, execution and batches.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use ydb_reactive::backend::mock::MockBackend;
use ydb_reactive::driver::ParamRef;
use ydb_reactive::{
    ConnectionConfig, DriverError, DriverResult, NativeType, NativeValue, SqlType, Value,
};

#[tokio::test]
async fn test_missing_binding_fails_without_touching_the_pool() -> DriverResult<()> {
    let backend = MockBackend::new();
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement(INSERT_USER)?;
    stmt.bind("$id", 1u64)?;
    match stmt.execute().await {
        Err(DriverError::UnboundParameter(name)) => assert_eq!(name, "$name"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(factory.pool().stats().acquired, 0);
    Ok(())
}

#[tokio::test]
async fn test_unknown_parameter() -> DriverResult<()> {
    let backend = MockBackend::new();
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement(SELECT_USER)?;
    assert!(matches!(
        stmt.bind("$nope", 1u64),
        Err(DriverError::UnknownParameter(_))
    ));
    assert!(matches!(
        stmt.bind(3usize, 1u64),
        Err(DriverError::UnknownParameter(_))
    ));
    stmt.bind(ParamRef::Index(0), 1u64)?;
    stmt.execute().await?.rows().await?;
    Ok(())
}

#[tokio::test]
async fn test_declared_types_are_checked_at_bind_time() -> DriverResult<()> {
    let backend = MockBackend::new();
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let text = "DECLARE $id AS Uint64;\n\
                DECLARE $note AS Optional<Utf8>;\n\
                UPSERT INTO notes (id, note) VALUES ($id, $note);";
    let mut stmt = conn.create_statement(text)?;

    match stmt.bind("$id", "seven") {
        Err(DriverError::TypeMismatch { target, .. }) => assert_eq!(target, "$id"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        stmt.bind_null("$id", SqlType::BigInt),
        Err(DriverError::TypeMismatch { .. })
    ));
    assert!(matches!(
        stmt.bind_null("$note", SqlType::Integer),
        Err(DriverError::TypeMismatch { .. })
    ));

    // Narrower integers widen to the declared type.
    stmt.bind("$id", 7u32)?;
    stmt.bind_null("$note", SqlType::Varchar)?;
    stmt.execute().await?.rows().await?;

    assert_eq!(
        backend.queries()[0].params,
        vec![
            ("$id".to_string(), NativeValue::Uint64(7)),
            ("$note".to_string(), NativeValue::Empty(NativeType::Text)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_explicit_and_null_bindings() -> DriverResult<()> {
    let backend = MockBackend::new();
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement("SELECT $a, $b, $c, $d")?;
    stmt.bind_typed("$a", 5i32, &NativeType::Int64)?;
    stmt.bind_sql("$d", 3i16, SqlType::Integer)?;
    assert!(matches!(
        stmt.bind_sql("$d", 3i16, SqlType::Collection),
        Err(DriverError::UnsupportedType(_))
    ));
    stmt.bind_null("$b", SqlType::Date)?;
    stmt.bind("$c", Option::<String>::None)?;
    assert!(matches!(
        stmt.bind_null("$c", SqlType::Collection),
        Err(DriverError::UnsupportedType(_))
    ));
    stmt.execute().await?.rows().await?;

    assert_eq!(
        backend.queries()[0].params,
        vec![
            ("$a".to_string(), NativeValue::Int64(5)),
            ("$b".to_string(), NativeValue::Empty(NativeType::Date)),
            ("$c".to_string(), NativeValue::Null),
            ("$d".to_string(), NativeValue::Int32(3)),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_unrepresentable_value_is_rejected() -> DriverResult<()> {
    let backend = MockBackend::new();
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement("SELECT $t")?;
    let noon = chrono::NaiveTime::from_hms_opt(12, 0, 0).expect("valid time");
    assert!(matches!(
        stmt.bind("$t", Value::Time(noon)),
        Err(DriverError::UnsupportedType(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_reexecution_produces_independent_results() -> DriverResult<()> {
    let backend = MockBackend::new();
    script_users(&backend);
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement(SELECT_USER)?;
    stmt.bind("$id", 1u64)?;
    let first = stmt.execute().await?.rows().await?;
    let second = stmt.execute().await?.rows().await?;
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(backend.queries().len(), 2);

    stmt.clear_bindings();
    assert!(matches!(
        stmt.execute().await,
        Err(DriverError::UnboundParameter(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_batch_joins_statements() -> DriverResult<()> {
    let backend = MockBackend::new();
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    {
        let mut batch = conn.create_batch()?;
        assert!(matches!(
            batch.execute().await,
            Err(DriverError::InvalidState(_))
        ));
        batch
            .add("UPSERT INTO a (id) VALUES (1);")
            .add("  UPSERT INTO b (id) VALUES (2)  ");
        assert_eq!(batch.len(), 2);
        batch.execute().await?.rows().await?;
    }
    assert_eq!(
        backend.queries()[0].text,
        "UPSERT INTO a (id) VALUES (1);UPSERT INTO b (id) VALUES (2)"
    );

    let mut batch = conn.create_batch()?;
    batch.add("DELETE FROM a WHERE id = $id");
    assert!(matches!(
        batch.execute().await,
        Err(DriverError::UnboundParameter(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_statement_cache() -> DriverResult<()> {
    let backend = MockBackend::new();
    let factory = factory(&backend).await;
    let mut conn = factory.create()?;

    conn.create_statement(SELECT_USER)?;
    conn.create_statement(SELECT_USER)?;
    conn.create_statement(INSERT_USER)?;
    assert_eq!(conn.cached_statements(), 2);

    let config = ConnectionConfig::builder()
        .pool(pool_config())
        .statement_cache_capacity(0)
        .build()?;
    let uncached = factory_with(&backend, config).await;
    let mut conn = uncached.create()?;
    conn.create_statement(SELECT_USER)?;
    assert_eq!(conn.cached_statements(), 0);
    Ok(())
}

#[tokio::test]
async fn test_fetch_size_hint_is_forwarded() -> DriverResult<()> {
    let backend = MockBackend::new();
    let config = ConnectionConfig::builder()
        .pool(pool_config())
        .fetch_size(100)
        .build()?;
    let factory = factory_with(&backend, config).await;
    let mut conn = factory.create()?;

    let mut stmt = conn.create_statement("SELECT 1")?;
    stmt.fetch_size(10);
    stmt.execute().await?.rows().await?;
    conn.create_statement("SELECT 2")?.execute().await?.rows().await?;

    let queries = backend.queries();
    assert_eq!(queries[0].fetch_size, Some(10));
    assert_eq!(queries[1].fetch_size, Some(100));
    Ok(())
}
