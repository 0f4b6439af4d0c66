mod admin;
mod allocate;
mod booking;
mod bounds;
mod error;
mod lock;
mod queries;
mod retry;
mod txn;

pub use booking::BookingMode;
pub use bounds::{assert_class_in_year, assert_within_year};
pub use error::{BoundsViolation, ConcurrencyError, EngineError};
pub use lock::order_for_locking;
pub use retry::RetryPolicy;
pub use txn::Transaction;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::compactor;
use crate::config::Config;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        events: Vec<Event>,
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

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { events, response } => {
                let mut batch = vec![(events, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { events, response }) => {
                            batch.push((events, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                    .record(batch.len() as f64);
                let flush_start = std::time::Instant::now();
                let result = flush_batch(&mut wal, &batch);
                metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(flush_start.elapsed().as_secs_f64());
                respond_batch(batch, &result);

                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (events, _) in batch {
        if let Err(e) = wal.append_buffered(events) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
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
        WalCommand::Append { events, response } => {
            let batch = vec![(events, response)];
            let result = flush_batch(wal, &batch);
            respond_batch(batch, &result);
        }
    }
}

/// The row store. Classes and teachers are lockable rows; years, assignments
/// and bookings are plain tables read optimistically and version-checked at
/// commit.
pub struct Engine {
    pub(super) years: DashMap<Ulid, AcademicYear>,
    pub(super) rows: DashMap<ResourceKey, SharedResourceState>,
    /// Unlocked copy of each row's identity and profile, for listings and
    /// compaction.
    pub(super) catalog: DashMap<ResourceKey, ResourceInfo>,
    pub(super) assignments: DashMap<(Ulid, Ulid), Assignment>,
    pub(super) bookings: DashMap<Ulid, Booking>,
    /// Commit sequencer: read-set validation, WAL append and apply happen
    /// under this lock.
    pub(super) commit_seq: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) lock_wait: Duration,
    pub(super) retry: RetryPolicy,
}

/// Apply an event to one resource row (caller holds the row's write lock).
pub(super) fn apply_to_resource(rs: &mut ResourceState, event: &Event) {
    match event {
        Event::CapacityChanged { capacity, .. } => {
            if let ResourceProfile::Class { capacity: c, .. } = &mut rs.profile {
                *c = *capacity;
            }
        }
        Event::AssignmentSaved {
            assignment,
            released_class,
        } => {
            if let Some(c) = released_class
                && rs.key == ResourceKey::Class(*c)
            {
                rs.enrolled.remove(&assignment.requester_id);
            }
            if rs.key == ResourceKey::Class(assignment.class_id) {
                if assignment.active {
                    rs.enrolled.insert(assignment.requester_id);
                } else {
                    rs.enrolled.remove(&assignment.requester_id);
                }
            }
        }
        Event::BookingSaved { booking, .. } => {
            rs.remove_slot(booking.id);
            if booking.is_active() && booking.resource_keys().contains(&rs.key) {
                rs.insert_slot(booking.slot());
            }
        }
        // Row creation happens at the table level
        Event::YearCreated { .. }
        | Event::YearDeleted { .. }
        | Event::ClassCreated { .. }
        | Event::TeacherCreated { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let records = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let defaults = Config::default();
        let engine = Self {
            years: DashMap::new(),
            rows: DashMap::new(),
            catalog: DashMap::new(),
            assignments: DashMap::new(),
            bookings: DashMap::new(),
            commit_seq: Mutex::new(()),
            wal_tx,
            notify,
            lock_wait: defaults.lock_wait,
            retry: defaults.retry,
        };

        // We're the sole owner of every row here, so try_write always succeeds.
        // Never block: this may run inside an async context.
        for events in &records {
            for event in events {
                engine.apply_to_tables(event);
                for key in event.resource_keys() {
                    if let Some(row) = engine.get_row(&key)
                        && let Ok(mut guard) = row.try_write()
                    {
                        apply_to_resource(&mut guard, event);
                    }
                }
            }
        }
        if !records.is_empty() {
            info!(
                records = records.len(),
                path = %wal_path.display(),
                "replayed WAL"
            );
        }

        Ok(engine)
    }

    /// Create the data directory, open the engine's WAL inside it and start
    /// the background compactor. Must be called inside a tokio runtime.
    pub fn open(config: &Config) -> io::Result<Arc<Self>> {
        std::fs::create_dir_all(&config.data_dir)?;
        let engine = Self::new(config.wal_path(), Arc::new(NotifyHub::new()))?
            .with_lock_wait(config.lock_wait)
            .with_retry_policy(config.retry.clone());
        let engine = Arc::new(engine);
        compactor::spawn(&engine, config.compact_threshold, compactor::CHECK_INTERVAL);
        Ok(engine)
    }

    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn begin(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    pub fn get_row(&self, key: &ResourceKey) -> Option<SharedResourceState> {
        self.rows.get(key).map(|e| e.value().clone())
    }

    /// Current version of an optimistically read row; `None` if absent.
    pub(super) fn row_version(&self, row: &RowKey) -> Option<u64> {
        match row {
            RowKey::Year(id) => self.years.contains_key(id).then_some(0),
            RowKey::Assignment {
                requester_id,
                year_id,
            } => self
                .assignments
                .get(&(*requester_id, *year_id))
                .map(|a| a.version),
            RowKey::Booking(id) => self.bookings.get(id).map(|b| b.version),
        }
    }

    /// Apply an event to the table-level state (years, row registry, assignment
    /// and booking tables). Resource row contents are handled by
    /// `apply_to_resource`.
    pub(super) fn apply_to_tables(&self, event: &Event) {
        match event {
            Event::YearCreated { year } => {
                self.years.insert(year.id, year.clone());
            }
            Event::YearDeleted { id } => {
                self.years.remove(id);
            }
            Event::ClassCreated {
                id,
                year_id,
                name,
                capacity,
            } => {
                let key = ResourceKey::Class(*id);
                let profile = ResourceProfile::Class {
                    year_id: *year_id,
                    capacity: *capacity,
                };
                self.insert_row(key, name.clone(), profile);
            }
            Event::TeacherCreated { id, name } => {
                self.insert_row(ResourceKey::Teacher(*id), name.clone(), ResourceProfile::Teacher);
            }
            Event::CapacityChanged { class_id, capacity } => {
                if let Some(mut info) = self.catalog.get_mut(&ResourceKey::Class(*class_id))
                    && let ResourceProfile::Class { capacity: c, .. } = &mut info.profile
                {
                    *c = *capacity;
                }
            }
            Event::AssignmentSaved { assignment, .. } => {
                self.assignments.insert(
                    (assignment.requester_id, assignment.year_id),
                    assignment.clone(),
                );
            }
            Event::BookingSaved { booking, .. } => {
                self.bookings.insert(booking.id, booking.clone());
            }
        }
    }

    fn insert_row(&self, key: ResourceKey, name: Option<String>, profile: ResourceProfile) {
        let rs = ResourceState::new(key, name.clone(), profile);
        self.rows.insert(key, Arc::new(RwLock::new(rs)));
        self.catalog.insert(key, ResourceInfo { key, name, profile });
    }

    /// Write one committed transaction to the WAL via the group-commit writer.
    pub(super) async fn wal_append(&self, events: &[Event]) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events: events.to_vec(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _seq = self.commit_seq.lock().await;

        let mut events: Vec<Event> = self
            .years
            .iter()
            .map(|e| Event::YearCreated {
                year: e.value().clone(),
            })
            .collect();
        for entry in self.catalog.iter() {
            let info = entry.value();
            events.push(match info.profile {
                ResourceProfile::Class { year_id, capacity } => Event::ClassCreated {
                    id: info.key.id(),
                    year_id,
                    name: info.name.clone(),
                    capacity,
                },
                ResourceProfile::Teacher => Event::TeacherCreated {
                    id: info.key.id(),
                    name: info.name.clone(),
                },
            });
        }
        events.extend(self.assignments.iter().map(|e| Event::AssignmentSaved {
            assignment: e.value().clone(),
            released_class: None,
        }));
        events.extend(self.bookings.iter().map(|e| Event::BookingSaved {
            booking: e.value().clone(),
            released: Vec::new(),
        }));

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;

        metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
        info!(events = count, "compacted WAL");
        Ok(())
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
