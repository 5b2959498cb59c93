//! Process-wide database handle with an explicit `acquire` / `invalidate` /
//! `shutdown` lifecycle.
//!
//! The first `acquire` opens the connection; later calls reuse the cached
//! handle. Concurrent callers that find the cache empty queue behind a single
//! in-flight attempt. A failed attempt leaves the cache empty so the next call
//! tries again, with no backoff and no attempt limit.

use std::sync::RwLock;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum DbError {
    #[error("{0} is not set")] MissingConfig(&'static str),
    #[error("connect failed: {0}")] Connect(String),
    #[error("connect timed out")] Timeout,
    #[error("migration failed: {0}")] Migrate(String),
}

/// Opens (and closes) the underlying driver handle.
#[async_trait]
pub trait Connect: Send + Sync {
    type Handle: Clone + Send + Sync;

    async fn connect(&self) -> Result<Self::Handle, DbError>;

    async fn close(&self, _handle: Self::Handle) {}
}

pub struct ConnectionManager<C: Connect> {
    connector: C,
    handle: RwLock<Option<C::Handle>>,
    in_flight: Mutex<()>,
}

impl<C: Connect> ConnectionManager<C> {
    pub fn new(connector: C) -> Self {
        Self { connector, handle: RwLock::new(None), in_flight: Mutex::new(()) }
    }

    fn cached(&self) -> Option<C::Handle> {
        self.handle.read().ok().and_then(|h| h.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.cached().is_some()
    }

    pub async fn acquire(&self) -> Result<C::Handle, DbError> {
        if let Some(h) = self.cached() {
            return Ok(h);
        }
        let _attempt = self.in_flight.lock().await;
        // another caller may have finished connecting while we waited
        if let Some(h) = self.cached() {
            return Ok(h);
        }
        info!(target: "db", "connecting");
        match self.connector.connect().await {
            Ok(h) => {
                if let Ok(mut slot) = self.handle.write() {
                    *slot = Some(h.clone());
                }
                info!(target: "db", "connected");
                Ok(h)
            }
            Err(e) => {
                error!(target: "db", error = %e, "connection error");
                Err(e)
            }
        }
    }

    /// Drop the cached handle after a driver-level failure; the next
    /// `acquire` reconnects.
    pub fn invalidate(&self) {
        if let Ok(mut slot) = self.handle.write() {
            if slot.take().is_some() {
                warn!(target: "db", "disconnected, cached handle cleared");
            }
        }
    }

    pub async fn shutdown(&self) {
        let _attempt = self.in_flight.lock().await;
        let handle = self.handle.write().ok().and_then(|mut slot| slot.take());
        if let Some(h) = handle {
            self.connector.close(h).await;
            info!(target: "db", "disconnected");
        }
    }
}

#[cfg(feature = "postgres-store")]
pub use pg::PgConnector;

#[cfg(feature = "postgres-store")]
mod pg {
    use super::*;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use sqlx::{Pool, Postgres};
    use std::str::FromStr;
    use std::time::Duration;

    /// Bounded Postgres pool with explicit selection, socket and connect
    /// timeouts. Runs embedded migrations after every fresh connect.
    pub struct PgConnector {
        url: String,
        max_connections: u32,
        select_timeout: Duration,
        connect_timeout: Duration,
        socket_timeout: Duration,
    }

    impl PgConnector {
        pub fn from_env() -> Result<Self, DbError> {
            fn u64_env(name: &str, default: u64) -> u64 { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
            let url = std::env::var("DATABASE_URL").map_err(|_| DbError::MissingConfig("DATABASE_URL"))?;
            Ok(Self {
                url,
                max_connections: u64_env("DB_MAX_CONNECTIONS", 10) as u32,
                select_timeout: Duration::from_secs(u64_env("DB_SELECT_TIMEOUT_SECS", 5)),
                connect_timeout: Duration::from_secs(u64_env("DB_CONNECT_TIMEOUT_SECS", 10)),
                socket_timeout: Duration::from_secs(u64_env("DB_SOCKET_TIMEOUT_SECS", 45)),
            })
        }
    }

    #[async_trait]
    impl Connect for PgConnector {
        type Handle = Pool<Postgres>;

        async fn connect(&self) -> Result<Self::Handle, DbError> {
            let opts = PgConnectOptions::from_str(&self.url)
                .map_err(|e| DbError::Connect(e.to_string()))?
                .options([("statement_timeout", format!("{}", self.socket_timeout.as_millis()))]);
            let connect = PgPoolOptions::new()
                .max_connections(self.max_connections)
                .acquire_timeout(self.select_timeout)
                .connect_with(opts);
            let pool = tokio::time::timeout(self.connect_timeout, connect)
                .await
                .map_err(|_| DbError::Timeout)?
                .map_err(|e| DbError::Connect(e.to_string()))?;
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| DbError::Migrate(e.to_string()))?;
            Ok(pool)
        }

        async fn close(&self, pool: Self::Handle) {
            pool.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Fails the first `failures` attempts, then hands out the attempt number.
    struct Flaky {
        attempts: AtomicUsize,
        failures: usize,
        closed: AtomicUsize,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self { attempts: AtomicUsize::new(0), failures, closed: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl Connect for Flaky {
        type Handle = usize;

        async fn connect(&self) -> Result<usize, DbError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
            if n <= self.failures {
                return Err(DbError::Connect(format!("attempt {n} refused")));
            }
            Ok(n)
        }

        async fn close(&self, _handle: usize) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_attempt() {
        let mgr = Arc::new(ConnectionManager::new(Flaky::new(0)));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let mgr = mgr.clone();
            tasks.push(tokio::spawn(async move { mgr.acquire().await.unwrap() }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap(), 1);
        }
        assert_eq!(mgr.connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_is_retried_on_next_call() {
        let mgr = ConnectionManager::new(Flaky::new(2));
        assert!(mgr.acquire().await.is_err());
        assert!(!mgr.is_connected());
        assert!(mgr.acquire().await.is_err());
        assert_eq!(mgr.acquire().await.unwrap(), 3);
        assert_eq!(mgr.acquire().await.unwrap(), 3);
        assert_eq!(mgr.connector.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn invalidate_forces_reconnect_and_shutdown_closes() {
        let mgr = ConnectionManager::new(Flaky::new(0));
        assert_eq!(mgr.acquire().await.unwrap(), 1);
        mgr.invalidate();
        assert_eq!(mgr.acquire().await.unwrap(), 2);
        mgr.shutdown().await;
        assert!(!mgr.is_connected());
        assert_eq!(mgr.connector.closed.load(Ordering::SeqCst), 1);
    }
}
