mod admin;
mod error;
mod horizon;
mod queries;
mod reservations;

pub use admin::{NewResource, ScheduleChange};
pub use error::EngineError;
pub use reservations::BookingRequest;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::auth::Authorizer;
use crate::clock::Clock;
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::pricing::PricingCache;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Blocks for the first append, drains whatever else is already
/// queued, then commits the whole batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes never leak into
    // the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());

    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Tunables the engine reads at construction.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub horizon_months: u32,
    pub pricing_cache_ttl_ms: Ms,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            horizon_months: DEFAULT_HORIZON_MONTHS,
            pricing_cache_ttl_ms: DEFAULT_PRICING_TTL_MS,
        }
    }
}

/// The slot calendar store. Every mutation of a resource runs under that
/// resource's write lock, so availability checks and slot flips are atomic
/// with respect to each other.
pub struct Engine {
    pub(super) state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: booking id → resource id
    pub(super) booking_to_resource: DashMap<Ulid, Ulid>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) authorizer: Arc<dyn Authorizer>,
    pub(super) pricing_cache: PricingCache,
    pub(super) horizon_months: u32,
    /// Held while a resource is registered and for the whole of a WAL
    /// compaction, so the set of resources cannot change under a snapshot.
    pub(super) catalog: Mutex<()>,
}

/// Apply an event at the map level: resource creation and snapshots create
/// entries, everything else goes to the resource itself.
fn apply_event(
    state: &DashMap<Ulid, SharedResourceState>,
    bookings: &DashMap<Ulid, Ulid>,
    rs: Option<&mut ResourceState>,
    event: &Event,
) {
    match event {
        Event::ResourceCreated { id, owner, name, sport, schedule, pricing } => {
            let rs = ResourceState::new(
                *id,
                owner.clone(),
                name.clone(),
                sport.clone(),
                *schedule,
                pricing.clone(),
            );
            state.insert(*id, Arc::new(RwLock::new(rs)));
        }
        Event::ResourceSnapshot { state: snapshot } => {
            for id in snapshot.bookings.keys() {
                bookings.insert(*id, snapshot.id);
            }
            state.insert(snapshot.id, Arc::new(RwLock::new((**snapshot).clone())));
        }
        other => {
            if let Event::BookingConfirmed { booking } = other {
                bookings.insert(booking.id, booking.resource_id);
            }
            if let Some(rs) = rs {
                rs.apply(other);
            }
        }
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        authorizer: Arc<dyn Authorizer>,
        settings: EngineSettings,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            booking_to_resource: DashMap::new(),
            pricing_cache: PricingCache::new(clock.clone(), settings.pricing_cache_ttl_ms),
            clock,
            authorizer,
            horizon_months: settings.horizon_months.clamp(1, MAX_HORIZON_MONTHS),
            catalog: Mutex::new(()),
        };

        // Sole owner of every Arc during replay, so try_write never contends.
        // Blocking locks are off limits here: this may run inside the runtime.
        for event in &events {
            let entry = engine.get_resource(&event.resource_id());
            match entry {
                Some(rs) => {
                    let mut guard = rs.try_write().map_err(io::Error::other)?;
                    apply_event(&engine.state, &engine.booking_to_resource, Some(&mut guard), event);
                }
                None => apply_event(&engine.state, &engine.booking_to_resource, None, event),
            }
        }
        if !events.is_empty() {
            info!("replayed {} events for {} resources", events.len(), engine.state.len());
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_resource_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_resource.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append, apply and notify.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_event(&self.state, &self.booking_to_resource, Some(rs), event);
        self.notify.send(rs.id, event);
        Ok(())
    }

    pub(super) async fn write_resource(
        &self,
        resource_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or_else(|| EngineError::NotFound(format!("resource {resource_id}")))?;
        Ok(rs.write_owned().await)
    }

    /// Lookup booking → resource, acquire the resource's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<ResourceState>, EngineError> {
        let resource_id = self
            .get_resource_for_booking(booking_id)
            .ok_or_else(|| EngineError::NotFound(format!("booking {booking_id}")))?;
        self.write_resource(resource_id).await
    }

    /// Owner-level permission on a resource.
    pub(super) async fn require_admin(
        &self,
        rs: &ResourceState,
        requester: &str,
    ) -> Result<(), EngineError> {
        if self.authorizer.can_administer(requester, &rs.info()).await {
            Ok(())
        } else {
            Err(EngineError::Forbidden(format!(
                "{requester} does not administer resource {}",
                rs.id
            )))
        }
    }

    /// Rewrite the WAL as one snapshot per resource.
    ///
    /// Every resource stays read-locked until the writer has swapped the
    /// compacted file in, so no event can land in the old log after its
    /// resource was snapshotted.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let mut resources: Vec<(Ulid, SharedResourceState)> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        // Fixed lock order: ascending resource id.
        resources.sort_by_key(|(id, _)| *id);

        let mut guards = Vec::with_capacity(resources.len());
        let mut events = Vec::with_capacity(resources.len());
        for (_, rs) in resources {
            let guard = rs.read_owned().await;
            events.push(Event::ResourceSnapshot {
                state: Box::new(guard.clone()),
            });
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
