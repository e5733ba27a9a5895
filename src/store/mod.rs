//! Persistence layer: libSQL-backed storage for tasks, connections, send
//! counters, and the execution log.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ChannelConnection, ConnectionProvider, ConnectionStatus, Database, LogQuery};
