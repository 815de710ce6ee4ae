//! Connection (F) and Connection Pool (G): endpoint-equivalent session
//! reuse with keep-alive idle timers.

pub mod connection;
pub mod pool;

pub use connection::{CancelToken, Connection, ConnectionStatus, Endpoint, Session, SessionFactory};
pub use pool::{ConnectionPool, ConnectionPoolConfig};
