//! Connection Pool (component G): owns a set of idle [`Connection`]s,
//! reusable by endpoint equivalence, each with a per-entry idle timer and
//! a bounded idle count.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::debug;

use super::connection::{Connection, ConnectionStatus, Endpoint, SessionFactory};
use crate::error::Result;

/// Construction knobs for a [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct ConnectionPoolConfig {
    pub keep_alive_timeout: Duration,
    pub keep_alive_idle_count_max: usize,
}

/// How often the background timer worker scans for expired idle entries.
/// Bounds how stale an idle entry's expiry can be observed before eviction.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

struct IdleEntry {
    connection: Connection,
    expires_at: Instant,
}

struct PoolState {
    idle: HashMap<u64, IdleEntry>,
}

/// A set of reusable HTTP sessions. Connections are removed from the
/// internal map while checked out, so no I/O ever happens while the pool's
/// mutex is held.
pub struct ConnectionPool {
    state: Arc<Mutex<PoolState>>,
    config: ConnectionPoolConfig,
    factory: Arc<dyn SessionFactory>,
    next_id: AtomicU64,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("idle_count", &self.idle_count())
            .finish()
    }
}

impl ConnectionPool {
    pub fn new(config: ConnectionPoolConfig, factory: Arc<dyn SessionFactory>) -> Self {
        let state = Arc::new(Mutex::new(PoolState { idle: HashMap::new() }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_state = state.clone();
        let worker_shutdown = shutdown.clone();
        let worker = std::thread::spawn(move || {
            while !worker_shutdown.load(Ordering::SeqCst) {
                std::thread::sleep(POLL_INTERVAL);
                let now = Instant::now();
                let mut guard = worker_state.lock().unwrap();
                let expired: Vec<u64> = guard
                    .idle
                    .iter()
                    .filter(|(_, e)| e.expires_at <= now)
                    .map(|(id, _)| *id)
                    .collect();
                for id in expired {
                    guard.idle.remove(&id);
                    debug!("keep-alive timer evicted connection {id}");
                }
            }
        });

        ConnectionPool {
            state,
            config,
            factory,
            next_id: AtomicU64::new(1),
            shutdown,
            worker: Some(worker),
        }
    }

    /// Number of currently idle connections.
    pub fn idle_count(&self) -> usize {
        self.state.lock().unwrap().idle.len()
    }

    /// Acquires a connection for `endpoint`: reuses an idle, equivalent
    /// connection if one exists (first acceptor wins, in map iteration
    /// order), else creates a fresh one. `force_create` bypasses reuse
    /// entirely, which the connection-reuse retry path uses to avoid
    /// handing back the same failing connection.
    pub fn get_connection(
        &self,
        endpoint: &Endpoint,
        force_create: bool,
    ) -> Result<(Connection, bool)> {
        if !force_create {
            let mut guard = self.state.lock().unwrap();
            let hit = guard
                .idle
                .iter()
                .find(|(_, e)| {
                    e.connection.status() == ConnectionStatus::Idle
                        && e.connection.is_equivalent_to(endpoint)
                })
                .map(|(id, _)| *id);
            if let Some(id) = hit {
                let mut entry = guard.idle.remove(&id).unwrap();
                entry.connection.set_status(ConnectionStatus::InUse);
                debug!("reused connection {id} for {}:{}", endpoint.host, endpoint.port);
                return Ok((entry.connection, true));
            }
        }

        let connection = self.create_connection(endpoint)?;
        Ok((connection, false))
    }

    /// Builds and registers a brand-new in-use connection for `endpoint`.
    pub fn create_connection(&self, endpoint: &Endpoint) -> Result<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = self.factory.create(endpoint, self.config.keep_alive_timeout)?;
        debug!("created connection {id} for {}:{}", endpoint.host, endpoint.port);
        Ok(Connection::new(id, endpoint.clone(), session))
    }

    /// Removes `connection`'s bookkeeping from the pool if it is present
    /// (i.e. currently idle). Checked-out connections are already absent
    /// from the map, so this is a no-op for them.
    pub fn remove_connection(&self, id: u64) -> bool {
        self.state.lock().unwrap().idle.remove(&id).is_some()
    }

    /// Returns a connection to the idle set, arming its keep-alive timer,
    /// then runs the idle-count enforcement sweep. If the connection was
    /// cancelled, it is dropped (not returned to the pool) instead.
    pub fn release_connection(&self, mut connection: Connection) {
        if connection.is_cancelled() {
            debug!("dropping cancelled connection {}", connection.id());
            return;
        }

        connection.set_status(ConnectionStatus::Idle);
        let id = connection.id();
        let expires_at = Instant::now() + self.config.keep_alive_timeout;

        let mut guard = self.state.lock().unwrap();
        guard.idle.insert(id, IdleEntry { connection, expires_at });

        if guard.idle.len() > self.config.keep_alive_idle_count_max {
            if let Some(oldest_id) = guard
                .idle
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(id, _)| *id)
            {
                guard.idle.remove(&oldest_id);
                debug!("idle-count sweep evicted connection {oldest_id}");
            }
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::connection::test_support::{endpoint, NullSessionFactory};
    use super::*;

    fn pool(keep_alive: Duration, idle_max: usize) -> ConnectionPool {
        ConnectionPool::new(
            ConnectionPoolConfig {
                keep_alive_timeout: keep_alive,
                keep_alive_idle_count_max: idle_max,
            },
            Arc::new(NullSessionFactory),
        )
    }

    #[test]
    fn reuses_idle_equivalent_connection() {
        let pool = pool(Duration::from_secs(30), 10);
        let ep = endpoint("example.com");
        let (conn, reused) = pool.get_connection(&ep, false).unwrap();
        assert!(!reused);
        pool.release_connection(conn);

        let (conn2, reused2) = pool.get_connection(&ep, false).unwrap();
        assert!(reused2);
        pool.release_connection(conn2);
    }

    #[test]
    fn force_create_bypasses_reuse() {
        let pool = pool(Duration::from_secs(30), 10);
        let ep = endpoint("example.com");
        let (conn, _) = pool.get_connection(&ep, false).unwrap();
        pool.release_connection(conn);

        let (_conn2, reused) = pool.get_connection(&ep, true).unwrap();
        assert!(!reused);
    }

    #[test]
    fn different_endpoint_does_not_reuse() {
        let pool = pool(Duration::from_secs(30), 10);
        let ep_a = endpoint("a.example.com");
        let ep_b = endpoint("b.example.com");
        let (conn, _) = pool.get_connection(&ep_a, false).unwrap();
        pool.release_connection(conn);

        let (_conn2, reused) = pool.get_connection(&ep_b, false).unwrap();
        assert!(!reused);
    }

    #[test]
    fn idle_count_sweep_enforces_bound() {
        let pool = pool(Duration::from_secs(30), 1);
        let ep_a = endpoint("a.example.com");
        let ep_b = endpoint("b.example.com");
        let (conn_a, _) = pool.get_connection(&ep_a, false).unwrap();
        pool.release_connection(conn_a);
        let (conn_b, _) = pool.get_connection(&ep_b, false).unwrap();
        pool.release_connection(conn_b);

        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn keep_alive_timer_evicts_idle_connection() {
        let pool = pool(Duration::from_millis(50), 10);
        let ep = endpoint("example.com");
        let (conn, _) = pool.get_connection(&ep, false).unwrap();
        pool.release_connection(conn);
        assert_eq!(pool.idle_count(), 1);

        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn cancelled_connection_is_not_returned_to_pool() {
        let pool = pool(Duration::from_secs(30), 10);
        let ep = endpoint("example.com");
        let (mut conn, _) = pool.get_connection(&ep, false).unwrap();
        conn.cancel();
        pool.release_connection(conn);
        assert_eq!(pool.idle_count(), 0);
    }
}
