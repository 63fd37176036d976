use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use http::Uri;
use tracing::debug;

use crate::connect::Connection;
use crate::extensions::Clock;
use crate::trace::{IdleRejection, PutIdleInfo, Tracers};
use crate::util::{default_port, lock_unpoisoned};

const DEFAULT_MAX_IDLE_PER_KEY: usize = 8;
const DEFAULT_MAX_IDLE_TOTAL: usize = 100;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_MAX_DRAIN_BYTES: usize = 64 * 1024;
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    scheme: String,
    host: String,
    port: u16,
}

impl ConnectionKey {
    pub fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: scheme.into().to_ascii_lowercase(),
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let scheme = uri.scheme_str()?;
        let host = uri.host()?;
        let port = default_port(uri)?;
        Some(Self::new(scheme, host, port))
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_idle_per_key: usize,
    pub max_idle_total: usize,
    pub idle_timeout: Duration,
    pub max_drain_bytes: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_key: DEFAULT_MAX_IDLE_PER_KEY,
            max_idle_total: DEFAULT_MAX_IDLE_TOTAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_drain_bytes: DEFAULT_MAX_DRAIN_BYTES,
        }
    }
}

impl PoolConfig {
    pub fn with_max_idle_per_key(mut self, max_idle_per_key: usize) -> Self {
        self.max_idle_per_key = max_idle_per_key;
        self
    }

    pub fn with_max_idle_total(mut self, max_idle_total: usize) -> Self {
        self.max_idle_total = max_idle_total;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_max_drain_bytes(mut self, max_drain_bytes: usize) -> Self {
        self.max_drain_bytes = max_drain_bytes;
        self
    }

    fn reuse_enabled(&self) -> bool {
        !self.idle_timeout.is_zero()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub connections_created: u64,
    pub connections_reused: u64,
    pub connections_returned: u64,
    pub connections_discarded: u64,
    pub connections_evicted: u64,
    pub idle: usize,
}

#[derive(Debug, Default)]
struct PoolCounters {
    created: AtomicU64,
    reused: AtomicU64,
    returned: AtomicU64,
    discarded: AtomicU64,
    evicted: AtomicU64,
}

struct IdleConnection {
    connection: Connection,
    idle_since: Instant,
}

#[derive(Default)]
struct PoolState {
    idle: HashMap<ConnectionKey, VecDeque<IdleConnection>>,
    total_idle: usize,
}

impl PoolState {
    fn remove_oldest(&mut self) -> Option<Connection> {
        let key = self
            .idle
            .iter()
            .filter_map(|(key, queue)| queue.front().map(|entry| (key, entry.idle_since)))
            .min_by_key(|(_, idle_since)| *idle_since)
            .map(|(key, _)| key.clone())?;
        let queue = self.idle.get_mut(&key)?;
        let entry = queue.pop_front()?;
        if queue.is_empty() {
            self.idle.remove(&key);
        }
        self.total_idle -= 1;
        Some(entry.connection)
    }
}

struct PoolInner {
    config: PoolConfig,
    clock: Arc<dyn Clock>,
    // Never held across an await or a trace hook.
    state: Mutex<PoolState>,
    counters: PoolCounters,
}

pub(crate) struct IdleCheckout {
    pub(crate) connection: Connection,
    pub(crate) idle_time: Duration,
}

#[derive(Clone)]
pub(crate) struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub(crate) fn new(config: PoolConfig, clock: Arc<dyn Clock>) -> Self {
        let inner = Arc::new(PoolInner {
            config,
            clock,
            state: Mutex::new(PoolState::default()),
            counters: PoolCounters::default(),
        });
        spawn_reaper(&inner);
        Self { inner }
    }

    pub(crate) fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub(crate) fn checkout(&self, key: &ConnectionKey) -> Option<IdleCheckout> {
        let now = self.inner.clock.now();
        let idle_timeout = self.inner.config.idle_timeout;
        let mut stale = Vec::new();
        let found = {
            let mut state = lock_unpoisoned(&self.inner.state);
            let mut found = None;
            if let Some(queue) = state.idle.get_mut(key) {
                while let Some(entry) = queue.pop_back() {
                    let idle_time = now.saturating_duration_since(entry.idle_since);
                    if idle_time >= idle_timeout || entry.connection.is_closed() {
                        stale.push(entry.connection);
                        continue;
                    }
                    found = Some(IdleCheckout {
                        connection: entry.connection,
                        idle_time,
                    });
                    break;
                }
                if queue.is_empty() {
                    state.idle.remove(key);
                }
            }
            let taken = stale.len() + usize::from(found.is_some());
            state.total_idle -= taken;
            found
        };
        if !stale.is_empty() {
            self.inner
                .counters
                .evicted
                .fetch_add(stale.len() as u64, Ordering::Relaxed);
            debug!(key = %key, evicted = stale.len(), "evicted stale idle connections");
        }
        found
    }

    pub(crate) fn put_idle(&self, connection: Connection) -> Result<(), IdleRejection> {
        let config = &self.inner.config;
        if !config.reuse_enabled() {
            self.record_discarded();
            return Err(IdleRejection::ReuseDisabled);
        }
        if connection.is_closed() {
            self.record_discarded();
            return Err(IdleRejection::ConnectionClosed);
        }

        let key = connection.key().clone();
        let idle_since = self.inner.clock.now();
        let displaced = {
            let mut state = lock_unpoisoned(&self.inner.state);
            let per_key = state.idle.get(&key).map_or(0, VecDeque::len);
            if per_key >= config.max_idle_per_key {
                drop(state);
                self.record_discarded();
                return Err(IdleRejection::PerKeyLimit);
            }
            let mut displaced = None;
            if state.total_idle >= config.max_idle_total {
                displaced = state.remove_oldest();
                if displaced.is_none() {
                    drop(state);
                    self.record_discarded();
                    return Err(IdleRejection::TotalLimit);
                }
            }
            state
                .idle
                .entry(key)
                .or_default()
                .push_back(IdleConnection {
                    connection,
                    idle_since,
                });
            state.total_idle += 1;
            displaced
        };
        if let Some(displaced) = displaced {
            self.inner.counters.evicted.fetch_add(1, Ordering::Relaxed);
            debug!(key = %displaced.key(), id = displaced.id(), "evicted oldest idle connection");
        }
        self.inner.counters.returned.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) fn discard(&self, connection: Connection) {
        debug!(key = %connection.key(), id = connection.id(), "discarding connection");
        self.record_discarded();
    }

    pub(crate) fn record_created(&self) {
        self.inner.counters.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reused(&self) {
        self.inner.counters.reused.fetch_add(1, Ordering::Relaxed);
    }

    fn record_discarded(&self) {
        self.inner.counters.discarded.fetch_add(1, Ordering::Relaxed);
    }

    #[cfg(test)]
    pub(crate) fn evict_expired(&self) -> usize {
        self.inner.evict_expired()
    }

    pub(crate) fn clear(&self) -> usize {
        let drained = {
            let mut state = lock_unpoisoned(&self.inner.state);
            state.total_idle = 0;
            std::mem::take(&mut state.idle)
        };
        let count: usize = drained.values().map(VecDeque::len).sum();
        self.inner
            .counters
            .evicted
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let idle = lock_unpoisoned(&self.inner.state).total_idle;
        let counters = &self.inner.counters;
        PoolStats {
            connections_created: counters.created.load(Ordering::Relaxed),
            connections_reused: counters.reused.load(Ordering::Relaxed),
            connections_returned: counters.returned.load(Ordering::Relaxed),
            connections_discarded: counters.discarded.load(Ordering::Relaxed),
            connections_evicted: counters.evicted.load(Ordering::Relaxed),
            idle,
        }
    }
}

impl PoolInner {
    fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let idle_timeout = self.config.idle_timeout;
        let expired = {
            let mut state = lock_unpoisoned(&self.state);
            let mut expired = Vec::new();
            state.idle.retain(|_, queue| {
                while let Some(entry) = queue.front() {
                    let idle_time = now.saturating_duration_since(entry.idle_since);
                    if idle_time < idle_timeout && !entry.connection.is_closed() {
                        break;
                    }
                    if let Some(entry) = queue.pop_front() {
                        expired.push(entry.connection);
                    }
                }
                !queue.is_empty()
            });
            state.total_idle -= expired.len();
            expired
        };
        let count = expired.len();
        if count > 0 {
            self.counters
                .evicted
                .fetch_add(count as u64, Ordering::Relaxed);
            debug!(evicted = count, "reaped expired idle connections");
        }
        count
    }
}

fn spawn_reaper(inner: &Arc<PoolInner>) {
    if !inner.config.reuse_enabled() {
        return;
    }
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        debug!("no tokio runtime at pool construction; idle eviction happens on checkout");
        return;
    };
    let period = (inner.config.idle_timeout / 2).max(MIN_REAP_INTERVAL);
    let weak: Weak<PoolInner> = Arc::downgrade(inner);
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(inner) = weak.upgrade() else {
                break;
            };
            inner.evict_expired();
        }
    });
}

pub(crate) struct PooledConnection {
    connection: Option<Connection>,
    pool: Pool,
    tracers: Tracers,
}

impl PooledConnection {
    pub(crate) fn new(connection: Connection, pool: Pool, tracers: Tracers) -> Self {
        Self {
            connection: Some(connection),
            pool,
            tracers,
        }
    }

    pub(crate) fn give_back(mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        let key = connection.key().clone();
        let connection_id = connection.id();
        let rejected = self.pool.put_idle(connection).err();
        match rejected {
            None => debug!(key = %key, id = connection_id, "connection returned to idle pool"),
            Some(reason) => {
                debug!(key = %key, id = connection_id, %reason, "connection not pooled")
            }
        }
        self.report(key, connection_id, rejected);
    }

    pub(crate) fn discard(mut self, reason: IdleRejection) {
        self.discard_with(reason);
    }

    fn discard_with(&mut self, reason: IdleRejection) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        let key = connection.key().clone();
        let connection_id = connection.id();
        self.pool.discard(connection);
        self.report(key, connection_id, Some(reason));
    }

    fn report(&self, key: ConnectionKey, connection_id: u64, rejected: Option<IdleRejection>) {
        let info = PutIdleInfo {
            key,
            connection_id,
            rejected,
        };
        self.tracers.emit(|sink| sink.put_idle_conn(&info));
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.connection.is_some() {
            debug!("response body dropped before release; connection discarded");
            self.discard_with(IdleRejection::BodyNotDrained);
        }
    }
}
