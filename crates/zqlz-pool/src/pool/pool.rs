//! Connection pool implementation

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use zqlz_core::{QueryResult, StatementResult, Value};

use super::config::PoolOptions;
use super::lease::{LeaseId, PooledConnection, RawConnection};
use super::stats::PoolStats;
use crate::error::{PoolError, Result};
use crate::events::{EventBus, PoolEvent};
use crate::factory::ConnectionFactory;
use crate::health::{PoolLoad, probe_connection};
use crate::retry::{RetryPolicy, UnclosableConnection};

/// A connection pool that lends out a bounded set of database connections
///
/// The pool hands out [`PooledConnection`]s on [`request`](Self::request):
/// an idle connection if one is available, a new one if there is capacity,
/// otherwise the request waits in a FIFO queue or is rejected. Released
/// connections go straight to the oldest waiter, or are parked idle until
/// `max_idle_time` elapses.
///
/// Cloning a `ConnectionPool` is cheap; all clones share the same state.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

pub(crate) struct PoolShared {
    options: PoolOptions,
    retry: RetryPolicy,
    factory: Arc<dyn ConnectionFactory>,
    driver_name: String,
    events: Arc<EventBus>,
    state: Mutex<PoolState>,
    next_connection_id: AtomicU64,
    runtime: Handle,
}

/// Everything guarded by the pool lock. The lock is never held across an
/// await, so each admission or release decision is atomic with respect to
/// every other.
#[derive(Default)]
struct PoolState {
    closed: bool,
    idle: VecDeque<IdleEntry>,
    acquired: HashMap<LeaseId, RawConnection>,
    waiters: VecDeque<Waiter>,
    /// Slots reserved by creations and liveness probes still in flight
    in_transit: usize,
    next_waiter_id: u64,
}

impl PoolState {
    /// Slots counted against `max_connection`
    fn occupied(&self) -> usize {
        self.idle.len() + self.acquired.len() + self.in_transit
    }
}

struct IdleEntry {
    raw: RawConnection,
    eviction: AbortHandle,
}

struct Waiter {
    id: u64,
    sender: oneshot::Sender<Grant>,
}

/// What a queued request is served with
enum Grant {
    /// A connection passed on by a release
    Lease(PooledConnection),
    /// A slot given up by a creation that never produced a lease. The
    /// waiter creates its own connection in it.
    Create(Reservation),
}

/// Capacity freed while requests may be waiting for it
enum Vacancy {
    Connection(RawConnection, Reservation),
    Slot(Reservation),
}

enum Admission {
    Reuse(RawConnection, Reservation),
    Create(Reservation),
    Wait {
        id: u64,
        receiver: oneshot::Receiver<Grant>,
    },
}

impl ConnectionPool {
    /// Create a new connection pool with the given options and factory
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime; eviction timers are
    /// spawned on the runtime the pool was created in.
    pub fn new<F: ConnectionFactory>(options: PoolOptions, factory: F) -> Self {
        let driver_name = factory.driver_name().to_string();
        tracing::debug!(
            driver = %driver_name,
            max_connection = options.max_connection(),
            should_queue = options.should_queue(),
            "creating connection pool"
        );
        Self {
            shared: Arc::new(PoolShared {
                retry: RetryPolicy::from_options(&options),
                options,
                factory: Arc::new(factory),
                driver_name,
                events: Arc::new(EventBus::new()),
                state: Mutex::new(PoolState::default()),
                next_connection_id: AtomicU64::new(1),
                runtime: Handle::current(),
            }),
        }
    }

    /// Get a connection from the pool
    ///
    /// This will:
    /// 1. Reuse an idle connection, probing it first if `should_check` is set
    /// 2. Otherwise create a new connection if under `max_connection`
    /// 3. Otherwise wait in the queue (up to `max_queue_time`) if queueing is on
    /// 4. Otherwise fail with [`PoolError::MaxConnections`]
    #[tracing::instrument(skip(self), fields(driver = %self.shared.driver_name))]
    pub async fn request(&self) -> Result<PooledConnection> {
        let admission = match self.shared.admit() {
            Ok(admission) => admission,
            Err(error) => {
                self.shared.report_rejection(&error);
                return Err(error);
            }
        };

        match admission {
            Admission::Reuse(raw, reservation) => self.shared.checkout_idle(raw, reservation).await,
            Admission::Create(reservation) => self.shared.create_leased(reservation).await,
            Admission::Wait { id, receiver } => self.shared.wait_in_queue(id, receiver).await,
        }
    }

    /// Return a leased connection to the pool
    ///
    /// The lease becomes inert immediately and [`PoolEvent::Released`] is
    /// published. Then the raw connection goes to the oldest queued request,
    /// or is parked idle.
    ///
    /// A transaction left open is dropped, leaving rollback to the driver. If
    /// a statement on the lease is still running, the transaction is dropped
    /// as soon as that statement finishes.
    pub fn release(&self, lease: &PooledConnection) -> Result<()> {
        self.shared.release_lease(lease)
    }

    /// Request a connection, run one query on it and release it
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let lease = self.request().await?;
        let result = lease.query(sql, params).await;
        self.release(&lease)?;
        result
    }

    /// Request a connection, run one statement on it and release it
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let lease = self.request().await?;
        let result = lease.execute(sql, params).await;
        self.release(&lease)?;
        result
    }

    /// Close every idle connection and retire the pool
    ///
    /// Fails without side effects while any connection is acquired (or being
    /// created) or any request is queued. Idle connections that cannot be
    /// closed are published as [`PoolEvent::CloseFailed`] and do not fail the
    /// shutdown. Afterwards every operation fails with [`PoolError::Closed`].
    #[tracing::instrument(skip(self), fields(driver = %self.shared.driver_name))]
    pub async fn shutdown(&self) -> Result<()> {
        let shared = &self.shared;
        let drained = {
            let mut state = shared.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            state.waiters.retain(|w| !w.sender.is_closed());
            let acquired = state.acquired.len() + state.in_transit;
            let queued = state.waiters.len();
            if acquired > 0 || queued > 0 {
                Err(PoolError::ShutdownPending { acquired, queued })
            } else {
                let retired = std::mem::take(&mut *state);
                state.closed = true;
                Ok(retired)
            }
        };

        let retired = match drained {
            Ok(retired) => retired,
            Err(error) => {
                tracing::warn!(%error, "shutdown refused");
                shared
                    .events
                    .emit(&PoolEvent::ShutdownFailed { error: error.clone() });
                return Err(error);
            }
        };

        let closes = retired.idle.into_iter().map(|entry| {
            entry.eviction.abort();
            shared.close_raw(entry.raw)
        });
        let outcomes = futures::future::join_all(closes).await;
        let unclosable = outcomes.iter().filter(|closed| !**closed).count();

        tracing::info!(
            closed = outcomes.len() - unclosable,
            unclosable,
            "connection pool shut down"
        );
        shared.events.emit(&PoolEvent::ShutdownSucceeded);
        Ok(())
    }

    /// Number of connections currently leased to callers
    pub fn acquired_count(&self) -> usize {
        self.shared.state.lock().acquired.len()
    }

    /// Number of connections parked idle
    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    /// Number of requests waiting in the queue
    pub fn queued_count(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// Snapshot of all counters, taken atomically
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats::new(
            state.idle.len(),
            state.acquired.len(),
            state.waiters.len(),
            state.in_transit,
            self.shared.options.max_connection(),
        )
    }

    /// Coarse load rating from the share of capacity currently acquired
    pub fn load(&self) -> PoolLoad {
        PoolLoad::from_counts(self.acquired_count(), self.shared.options.max_connection())
    }

    pub fn options(&self) -> &PoolOptions {
        &self.shared.options
    }

    /// Identity of the driver the pool creates connections with
    pub fn driver_name(&self) -> &str {
        &self.shared.driver_name
    }

    /// The pool's event bus, for subscribing to lifecycle events
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("driver", &self.shared.driver_name)
            .field("stats", &self.stats())
            .finish()
    }
}

impl PoolShared {
    /// Decide, under the lock, how a request will be served
    fn admit(self: &Arc<Self>) -> Result<Admission> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::Closed);
        }

        if let Some(entry) = state.idle.pop_front() {
            entry.eviction.abort();
            let reservation = Reservation::take(self, &mut state);
            return Ok(Admission::Reuse(entry.raw, reservation));
        }

        let max = self.options.max_connection();
        if state.occupied() < max {
            return Ok(Admission::Create(Reservation::take(self, &mut state)));
        }

        if !self.options.should_queue() {
            return Err(PoolError::MaxConnections { max });
        }

        // Requesters that gave up no longer hold a place in line.
        state.waiters.retain(|w| !w.sender.is_closed());
        if let Some(limit) = self.options.max_queue_size() {
            if state.waiters.len() >= limit {
                return Err(PoolError::QueueFull { max: limit });
            }
        }

        let (sender, receiver) = oneshot::channel();
        let id = state.next_waiter_id;
        state.next_waiter_id += 1;
        state.waiters.push_back(Waiter { id, sender });
        tracing::debug!(waiter_id = id, queued = state.waiters.len(), "request queued");
        Ok(Admission::Wait { id, receiver })
    }

    fn report_rejection(&self, error: &PoolError) {
        tracing::debug!(%error, "request rejected");
        let event = match error {
            PoolError::MaxConnections { .. } => PoolEvent::MaxConnection {
                error: error.clone(),
            },
            PoolError::QueueFull { .. } => PoolEvent::MaxQueueSize {
                error: error.clone(),
            },
            _ => return,
        };
        self.events.emit(&event);
    }

    /// Vet a connection taken from the idle set before leasing it
    async fn checkout_idle(
        self: &Arc<Self>,
        raw: RawConnection,
        reservation: Reservation,
    ) -> Result<PooledConnection> {
        if self.options.should_check() {
            let mut probing = ProbeInFlight {
                shared: self,
                raw: raw.clone(),
                armed: true,
            };
            let outcome = probe_connection(&*raw.connection).await;
            probing.armed = false;
            if let Err(error) = outcome {
                tracing::warn!(connection_id = raw.id, %error, "idle connection failed liveness probe");
                self.events.emit(&PoolEvent::ProbeFailed {
                    connection_id: raw.id,
                    error,
                });
                self.spawn_close(raw);
                // The reserved slot carries over to a fresh connection.
                return self.create_leased(reservation).await;
            }
        }
        self.lease_reserved(raw, reservation, false)
    }

    async fn create_leased(self: &Arc<Self>, reservation: Reservation) -> Result<PooledConnection> {
        let outcome = self.retry.run(|| self.factory.create()).await;
        match outcome {
            Ok(connection) => {
                let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(connection_id = id, "raw connection created");
                self.lease_reserved(RawConnection { id, connection }, reservation, true)
            }
            Err(err) => {
                let error = PoolError::Create(Arc::new(err));
                tracing::warn!(%error, attempts = self.retry.max_attempts(), "could not create connection");
                self.events.emit(&PoolEvent::CreateFailed {
                    error: error.clone(),
                });
                // The slot goes to the oldest queued request, if any.
                drop(reservation);
                Err(error)
            }
        }
    }

    /// Turn a reserved slot into an acquired lease
    fn lease_reserved(
        self: &Arc<Self>,
        raw: RawConnection,
        mut reservation: Reservation,
        created: bool,
    ) -> Result<PooledConnection> {
        let lease = {
            let mut state = self.state.lock();
            reservation.settle(&mut state);
            if state.closed {
                drop(state);
                self.spawn_close(raw);
                return Err(PoolError::Closed);
            }
            let lease = PooledConnection::new(raw.clone(), self.events.clone(), Arc::downgrade(self));
            state.acquired.insert(lease.id(), raw);
            lease
        };

        tracing::debug!(lease_id = %lease.id(), connection_id = lease.connection_id(), created, "connection acquired");
        if created {
            self.events.emit(&PoolEvent::CreateSucceeded {
                connection_id: lease.connection_id(),
                lease_id: lease.id(),
            });
        }
        Ok(lease)
    }

    async fn wait_in_queue(
        self: &Arc<Self>,
        id: u64,
        mut receiver: oneshot::Receiver<Grant>,
    ) -> Result<PooledConnection> {
        let mut place = QueuePlace {
            shared: self,
            id,
            armed: true,
        };
        let max_wait = self.options.max_queue_time();

        let waited = tokio::time::timeout(max_wait, &mut receiver).await;
        place.armed = false;
        let grant = match waited {
            // The sender only disappears when the pool itself is gone.
            Ok(received) => received.map_err(|_| PoolError::Closed)?,
            Err(_) if place.leave() => {
                let error = PoolError::QueueTimeout { waited: max_wait };
                tracing::debug!(waiter_id = id, %error, "queued request timed out");
                self.events.emit(&PoolEvent::MaxQueueTime {
                    error: error.clone(),
                });
                return Err(error);
            }
            // Picked in the same instant the timer fired; the grant is on its way.
            Err(_) => receiver.await.map_err(|_| PoolError::Closed)?,
        };

        match grant {
            Grant::Lease(lease) => Ok(lease),
            Grant::Create(reservation) => {
                tracing::debug!(waiter_id = id, "queued request creating a connection in a freed slot");
                self.create_leased(reservation).await
            }
        }
    }

    pub(crate) fn release_lease(self: &Arc<Self>, lease: &PooledConnection) -> Result<()> {
        let (connection_id, vacancy) = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if lease.is_released() {
                return Err(PoolError::LeaseReleased);
            }
            let Some(raw) = state.acquired.remove(&lease.id()) else {
                return Err(PoolError::UnknownLease);
            };
            lease.mark_released();
            (raw.id, Vacancy::Connection(raw, Reservation::take(self, &mut state)))
        };

        self.events.emit(&PoolEvent::Released {
            lease_id: lease.id(),
            connection_id,
        });
        self.pass_on(vacancy);
        Ok(())
    }

    /// Serve the oldest live waiter with freed capacity: a returned
    /// connection becomes its lease, a bare slot lets it create one. With
    /// nobody waiting, the connection is parked idle or the slot is freed.
    fn pass_on(self: &Arc<Self>, mut vacancy: Vacancy) {
        loop {
            let (waiter, grant) = {
                let mut state = self.state.lock();
                let Some(waiter) = state.waiters.pop_front() else {
                    match vacancy {
                        Vacancy::Connection(raw, mut reservation) => {
                            reservation.settle(&mut state);
                            self.park_idle(&mut state, raw);
                        }
                        Vacancy::Slot(mut reservation) => reservation.settle(&mut state),
                    }
                    return;
                };
                let grant = match vacancy {
                    Vacancy::Connection(raw, mut reservation) => {
                        reservation.settle(&mut state);
                        let lease =
                            PooledConnection::new(raw.clone(), self.events.clone(), Arc::downgrade(self));
                        state.acquired.insert(lease.id(), raw);
                        Grant::Lease(lease)
                    }
                    Vacancy::Slot(reservation) => Grant::Create(reservation),
                };
                (waiter, grant)
            };

            // Sent outside the lock: a grant refused by a closing receiver is
            // handed back, one dropped with it runs its own Drop.
            let waiter_id = waiter.id;
            match waiter.sender.send(grant) {
                Ok(()) => {
                    tracing::debug!(waiter_id, "freed capacity handed to queued request");
                    return;
                }
                Err(Grant::Create(reservation)) => vacancy = Vacancy::Slot(reservation),
                Err(Grant::Lease(lease)) => {
                    let mut state = self.state.lock();
                    let raw = state.acquired.remove(&lease.id());
                    lease.disarm();
                    let Some(raw) = raw else { return };
                    vacancy = Vacancy::Connection(raw, Reservation::take(self, &mut state));
                }
            }
        }
    }

    fn park_idle(self: &Arc<Self>, state: &mut PoolState, raw: RawConnection) {
        let pool = Arc::downgrade(self);
        let connection_id = raw.id;
        let max_idle = self.options.max_idle_time();
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep(max_idle).await;
            if let Some(pool) = pool.upgrade() {
                pool.evict(connection_id).await;
            }
        });
        state.idle.push_back(IdleEntry {
            raw,
            eviction: timer.abort_handle(),
        });
        tracing::debug!(connection_id, idle = state.idle.len(), "connection parked idle");
    }

    /// Close an idle connection whose eviction timer fired
    async fn evict(&self, connection_id: u64) {
        let raw = {
            let mut state = self.state.lock();
            let Some(pos) = state.idle.iter().position(|e| e.raw.id == connection_id) else {
                return;
            };
            state.idle.remove(pos).map(|entry| entry.raw)
        };
        let Some(raw) = raw else { return };

        tracing::debug!(connection_id, "evicting idle connection");
        self.events.emit(&PoolEvent::Evicted { connection_id });
        self.close_raw(raw).await;
    }

    fn spawn_close(self: &Arc<Self>, raw: RawConnection) {
        let pool = self.clone();
        self.runtime.spawn(async move {
            pool.close_raw(raw).await;
        });
    }

    /// Close a connection the pool no longer tracks. Returns whether it closed.
    async fn close_raw(&self, raw: RawConnection) -> bool {
        let outcome = self.retry.run(|| raw.connection.close()).await;
        match outcome {
            Ok(()) => {
                tracing::debug!(connection_id = raw.id, "connection closed");
                self.events.emit(&PoolEvent::CloseSucceeded {
                    connection_id: raw.id,
                });
                true
            }
            Err(err) => {
                let source = Arc::new(err);
                let error = PoolError::Close {
                    connection_id: raw.id,
                    source: source.clone(),
                };
                tracing::warn!(%error, "connection could not be closed");
                let handle =
                    UnclosableConnection::new(raw.id, raw.connection, source, self.retry.clone());
                self.events.emit(&PoolEvent::CloseFailed { handle, error });
                false
            }
        }
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        for entry in self.state.get_mut().idle.drain(..) {
            entry.eviction.abort();
        }
    }
}

/// A capacity slot counted in `in_transit`: held by a creation, a liveness
/// probe or a connection on its way to a waiter.
///
/// Dropped without being settled, the slot passes on to the oldest queued
/// request so a waiter never times out while capacity sits unused. Must not
/// be dropped armed while the pool lock is held.
struct Reservation {
    pool: Weak<PoolShared>,
    armed: bool,
}

impl Reservation {
    fn take(pool: &Arc<PoolShared>, state: &mut PoolState) -> Self {
        state.in_transit += 1;
        Self {
            pool: Arc::downgrade(pool),
            armed: true,
        }
    }

    fn settle(&mut self, state: &mut PoolState) {
        if self.armed {
            state.in_transit -= 1;
            self.armed = false;
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        if let Some(pool) = self.pool.upgrade() {
            let slot = Reservation {
                pool: self.pool.clone(),
                armed: true,
            };
            pool.pass_on(Vacancy::Slot(slot));
        }
    }
}

/// An idle connection out for its liveness probe. If the request is dropped
/// mid-probe the connection is closed instead of leaking.
struct ProbeInFlight<'a> {
    shared: &'a Arc<PoolShared>,
    raw: RawConnection,
    armed: bool,
}

impl Drop for ProbeInFlight<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(connection_id = self.raw.id, "request abandoned during liveness probe");
            self.shared.spawn_close(self.raw.clone());
        }
    }
}

/// A place in the request queue, given up if the waiting request is dropped
struct QueuePlace<'a> {
    shared: &'a PoolShared,
    id: u64,
    armed: bool,
}

impl QueuePlace<'_> {
    /// Remove this place from the queue. Returns false if it was already served.
    fn leave(&self) -> bool {
        let mut state = self.shared.state.lock();
        match state.waiters.iter().position(|w| w.id == self.id) {
            Some(pos) => {
                state.waiters.remove(pos);
                true
            }
            None => false,
        }
    }
}

impl Drop for QueuePlace<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.leave();
        }
    }
}
