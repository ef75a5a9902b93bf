//! Shared setup for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use ydb_reactive::backend::mock::{MockBackend, QueryScript};
use ydb_reactive::{
    ConnectionConfig, ConnectionFactory, NativeType, NativeValue, PoolConfig, Row, RowStream,
};

pub const SELECT_USER: &str = "SELECT id, name FROM users WHERE id = $id";
pub const INSERT_USER: &str = "INSERT INTO users (id, name) VALUES ($id, $name)";
pub const NUMBERS: &str = "SELECT n FROM numbers";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn pool_config() -> PoolConfig {
    PoolConfig::new()
        .max_size(4)
        .acquire_timeout(Duration::from_millis(200))
        .reaper_interval(None)
}

pub fn config() -> ConnectionConfig {
    ConnectionConfig::builder()
        .endpoint("grpc://localhost:2136")
        .database("/local")
        .pool(pool_config())
        .operation_timeout(Duration::from_secs(5))
        .build()
        .expect("valid config")
}

pub async fn factory(backend: &Arc<MockBackend>) -> ConnectionFactory {
    factory_with(backend, config()).await
}

pub async fn factory_with(backend: &Arc<MockBackend>, config: ConnectionConfig) -> ConnectionFactory {
    init_tracing();
    ConnectionFactory::new(config, backend.clone())
        .await
        .expect("factory")
}

pub fn text(s: &str) -> NativeValue {
    NativeValue::Optional(Box::new(NativeValue::Text(s.to_string())))
}

/// `users` holds a single row `{id: 1, name: "a"}`.
pub fn script_users(backend: &MockBackend) {
    backend.script(
        SELECT_USER,
        QueryScript::new()
            .column("id", NativeType::Uint64)
            .column("name", NativeType::Text.optional())
            .part(vec![vec![NativeValue::Uint64(1), text("a")]]),
    );
}

/// `numbers` yields `1..=total` split into parts of the given sizes.
pub fn script_numbers(backend: &MockBackend, part_sizes: &[usize]) -> u64 {
    let mut script = QueryScript::new().column("n", NativeType::Uint64);
    let mut next = 0u64;
    for &size in part_sizes {
        let rows = (0..size)
            .map(|_| {
                next += 1;
                vec![NativeValue::Uint64(next)]
            })
            .collect();
        script = script.part(rows);
    }
    backend.script(NUMBERS, script);
    next
}

/// Pull rows until the stream stalls or terminates.
pub async fn drain(rows: &mut RowStream<'_>) -> Vec<Row> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().await {
        out.push(row.expect("row"));
    }
    out
}

pub fn numbers(rows: &[Row]) -> Vec<u64> {
    rows.iter().map(|r| r.get::<u64>("n").expect("n")).collect()
}
