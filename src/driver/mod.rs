//! Driver core: session pool, transactions, statements and result streams.
//!
//! ```ignore
//! let factory = ConnectionFactory::new(config, backend).await?;
//! let mut conn = factory.create()?;
//! conn.begin().await?;
//! let mut stmt = conn.create_statement("SELECT * FROM users WHERE id = $id")?;
//! stmt.bind("$id", 1u64)?;
//! let rows = stmt.execute().await?.rows().await?;
//! conn.commit().await?;
//! ```

pub mod bridge;
mod connection;
mod pool;
mod result;
mod row;
mod statement;
mod template;
mod transaction;

pub use bridge::{Outcome, UNBOUNDED};
pub use connection::{Connection, ConnectionFactory, FactoryMetadata, ValidationDepth};
pub use pool::{PoolStats, SessionLease, SessionPool};
pub use result::{QueryResult, RowStream};
pub use row::{ColumnIndex, ColumnMetadata, FromRow, Row, RowMetadata};
pub use statement::{Batch, ParamRef, Statement};
pub use template::{Param, QueryTemplate, query_hash};
pub use transaction::{IsolationMode, TransactionController, TxStatus};
