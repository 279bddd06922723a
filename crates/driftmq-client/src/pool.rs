//! Bounded pool of broker connections.
//!
//! Capacity is a semaphore of `pool_size` permits. Every live connection,
//! idle or checked out, holds one permit, so the pool never opens more than
//! `pool_size` connections. Acquire never waits for a permit: an exhausted
//! pool counts as a failed attempt and is retried after `retry_interval`.

use std::{
    collections::VecDeque,
    ops::{Deref, DerefMut},
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use driftmq_core::Connector;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    task::JoinHandle,
    time::{MissedTickBehavior, sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::{
    config::PoolConfig,
    connection::Connection,
    error::{ConnectionError, PoolError},
};

/// Why one acquire attempt failed.
#[derive(Debug, Error)]
enum AttemptError {
    #[error("pool exhausted")]
    Exhausted,
    #[error("idle connection was no longer active")]
    Inactive,
    #[error("connect timed out")]
    Timeout,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

struct Entry<S> {
    conn: Connection<S>,
    permit: OwnedSemaphorePermit,
}

/// A connection checked out of the pool.
///
/// Return it with [`ConnectionPool::release`]. Dropping it instead closes
/// the connection and frees its slot.
#[derive(Debug)]
pub struct PooledConnection<S> {
    conn: Connection<S>,
    permit: OwnedSemaphorePermit,
}

impl<S> Deref for PooledConnection<S> {
    type Target = Connection<S>;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl<S> DerefMut for PooledConnection<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

/// Pool of connections to one broker endpoint.
pub struct ConnectionPool<C: Connector> {
    connector: C,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Entry<C::Stream>>>,
    closed: AtomicBool,
}

impl<C: Connector> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("endpoint", &self.connector.endpoint())
            .field("idle", &self.idle_count())
            .field("available_permits", &self.available_permits())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionPool<C> {
    /// Empty pool; connections are opened on demand.
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.pool_size)),
            connector,
            config,
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Connections waiting to be reused.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Slots available for new connections.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Whether [`Self::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Check out a connection, reusing an idle one when possible.
    ///
    /// Makes up to `retry_count + 1` attempts, sleeping `retry_interval`
    /// between them.
    pub async fn acquire(&self) -> Result<PooledConnection<C::Stream>, PoolError> {
        let attempts = self.config.retry_count + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            if self.is_closed() {
                return Err(PoolError::Closed);
            }

            match self.try_acquire().await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    debug!(attempt, attempts, error = %e, "acquire attempt failed");
                    last_error = Some(e);
                },
            }

            if attempt < attempts {
                sleep(self.config.retry_interval).await;
            }
        }

        let last_error = last_error.map(|e| e.to_string()).unwrap_or_default();
        warn!(
            endpoint = %self.connector.endpoint(),
            attempts,
            %last_error,
            "max retries reached"
        );
        Err(PoolError::NoConnectionAvailable { attempts, last_error })
    }

    async fn try_acquire(&self) -> Result<PooledConnection<C::Stream>, AttemptError> {
        let idle = self.idle.lock().pop_back();
        if let Some(Entry { mut conn, permit }) = idle {
            if conn.is_active() {
                return Ok(PooledConnection { conn, permit });
            }
            conn.close().await;
            drop(permit);
            return Err(AttemptError::Inactive);
        }

        let permit =
            Arc::clone(&self.permits).try_acquire_owned().map_err(|_| AttemptError::Exhausted)?;
        let conn = timeout(self.config.connect_timeout, self.open())
            .await
            .map_err(|_| AttemptError::Timeout)??;

        Ok(PooledConnection { conn, permit })
    }

    async fn open(&self) -> Result<Connection<C::Stream>, ConnectionError> {
        let stream = self.connector.connect().await.map_err(ConnectionError::Connect)?;
        let mut conn =
            Connection::new(stream, self.config.max_frame_length, self.config.liveness);
        conn.handshake(&self.config.client_id, &self.config.client_type).await?;
        info!(endpoint = %self.connector.endpoint(), "connection established");
        Ok(conn)
    }

    /// Return a connection. Inactive connections are closed and their slot
    /// freed.
    pub async fn release(&self, conn: PooledConnection<C::Stream>) {
        let PooledConnection { mut conn, permit } = conn;

        if conn.is_active() {
            let mut idle = self.idle.lock();
            if !self.is_closed() {
                idle.push_back(Entry { conn, permit });
                return;
            }
        }

        debug!("discarding inactive connection");
        conn.close().await;
        drop(permit);
    }

    /// Close every idle connection and refuse further acquires. Idempotent.
    ///
    /// Checked-out connections are closed when released.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.permits.close();

        let idle: Vec<_> = self.idle.lock().drain(..).collect();
        for Entry { mut conn, permit } in idle {
            conn.close().await;
            drop(permit);
        }
        info!(endpoint = %self.connector.endpoint(), "connection pool closed");
    }

    /// Heartbeat idle connections in the background.
    ///
    /// Every half heartbeat interval each idle connection runs its liveness
    /// check; connections that fail it are dropped. The task ends when the
    /// pool is closed or dropped.
    pub fn spawn_keepalive(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::downgrade(self);
        let period = (self.config.liveness.heartbeat_interval / 2).max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !Self::keepalive_round(&pool).await {
                    break;
                }
            }
            debug!("keepalive task stopped");
        })
    }

    async fn keepalive_round(pool: &Weak<Self>) -> bool {
        let Some(pool) = pool.upgrade() else {
            return false;
        };
        if pool.is_closed() {
            return false;
        }

        // One entry at a time; the rest stay available to acquire
        let count = pool.idle_count();
        for _ in 0..count {
            let Some(Entry { mut conn, permit }) = pool.idle.lock().pop_front() else {
                break;
            };

            match conn.keepalive().await {
                Ok(()) if conn.is_active() => {
                    let mut idle = pool.idle.lock();
                    if !pool.is_closed() {
                        idle.push_back(Entry { conn, permit });
                        continue;
                    }
                },
                Ok(()) => {},
                Err(e) => debug!(error = %e, "dropping idle connection"),
            }

            conn.close().await;
            drop(permit);
        }
        !pool.is_closed()
    }
}
