//! Reactive YDB driver core.
//!
//! Sessions are leased from a pool, statements run in implicit or explicit
//! transactions, and results arrive as demand-gated row streams: nothing is
//! fetched from the backend until the consumer asks for rows, and never more
//! than one part ahead of what it asked for.
//!
//! The network protocol is not part of this crate. A [`Backend`]
//! implementation supplies session, transaction and query calls. The
//! scripted in-process `backend::mock::MockBackend` is available with the
//! `mock` feature.
//!
//! ```ignore
//! use ydb_reactive::prelude::*;
//!
//! let config = ConnectionConfig::builder()
//!     .endpoint("grpc://localhost:2136")
//!     .database("/local")
//!     .build()?;
//! let factory = ConnectionFactory::new(config, backend).await?;
//! let mut conn = factory.create()?;
//!
//! let mut stmt = conn.create_statement("SELECT id, name FROM users WHERE id = $id")?;
//! stmt.bind("$id", 1u64)?;
//! let mut result = stmt.execute().await?;
//! let mut rows = result.subscribe()?;
//! rows.request(1);
//! if let Some(row) = rows.next().await {
//!     let name: String = row?.get("name")?;
//! }
//! ```

pub mod backend;
pub mod config;
pub mod driver;
pub mod error;
pub mod types;

pub use backend::{Backend, BackendError, ErrorKind, StatusCode};
pub use config::{ConnectionConfig, Credentials, PoolConfig, RetryConfig};
pub use driver::{
    Batch, Connection, ConnectionFactory, IsolationMode, QueryResult, Row, RowMetadata, RowStream,
    SessionPool, Statement, TxStatus, ValidationDepth,
};
pub use error::{DriverError, DriverResult};
pub use types::{FromValue, NativeType, NativeValue, SqlType, Value};

pub mod prelude {
    pub use crate::backend::Backend;
    pub use crate::config::{ConnectionConfig, Credentials, PoolConfig, RetryConfig};
    pub use crate::driver::{
        Connection, ConnectionFactory, FromRow, IsolationMode, QueryResult, Row, RowStream,
        Statement, TxStatus, UNBOUNDED, ValidationDepth,
    };
    pub use crate::error::{DriverError, DriverResult};
    pub use crate::types::{FromValue, NativeType, SqlType, Value};
}
