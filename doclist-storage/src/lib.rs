pub mod memory;
pub mod postgres;
pub mod query_log;
pub mod sql;

pub use memory::{MemoryDatabase, MemoryTransaction};
pub use postgres::{PgDatabase, PgTransaction, PostgresConfig};
pub use query_log::QueryLogger;
