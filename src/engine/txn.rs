use std::collections::{BTreeMap, HashMap};

use tokio::sync::OwnedRwLockWriteGuard;
use tracing::debug;
use ulid::Ulid;

use crate::model::*;

use super::{apply_to_resource, ConcurrencyError, Engine, EngineError};

/// A unit of work against the engine.
///
/// Rows that feed capacity or conflict decisions are read only after
/// `lock_exclusive`. Everything else read here (years, assignment rows,
/// booking rows) is recorded with the version seen and re-checked at commit,
/// which makes the whole transaction serializable. Staged writes are visible
/// to later reads in the same transaction. Dropping without `commit` rolls
/// back.
pub struct Transaction<'e> {
    pub(super) engine: &'e Engine,
    pub(super) id: Ulid,
    pub(super) guards: BTreeMap<ResourceKey, OwnedRwLockWriteGuard<ResourceState>>,
    read_set: BTreeMap<RowKey, Option<u64>>,
    staged_assignments: HashMap<(Ulid, Ulid), Assignment>,
    staged_bookings: HashMap<Ulid, Booking>,
    staged_capacity: HashMap<Ulid, u32>,
    events: Vec<Event>,
}

impl<'e> Transaction<'e> {
    pub(super) fn new(engine: &'e Engine) -> Self {
        Self {
            engine,
            id: Ulid::new(),
            guards: BTreeMap::new(),
            read_set: BTreeMap::new(),
            staged_assignments: HashMap::new(),
            staged_bookings: HashMap::new(),
            staged_capacity: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    fn record_read(&mut self, row: RowKey, version: Option<u64>) {
        self.read_set.entry(row).or_insert(version);
    }

    // ── Optimistic reads ─────────────────────────────────────

    pub fn year(&mut self, year_id: Ulid) -> Result<AcademicYear, EngineError> {
        let year = self.engine.years.get(&year_id).map(|y| y.value().clone());
        self.record_read(RowKey::Year(year_id), year.as_ref().map(|_| 0));
        year.ok_or(EngineError::NotFound(year_id))
    }

    pub fn assignment(&mut self, requester_id: Ulid, year_id: Ulid) -> Option<Assignment> {
        if let Some(staged) = self.staged_assignments.get(&(requester_id, year_id)) {
            return Some(staged.clone());
        }
        let current = self
            .engine
            .assignments
            .get(&(requester_id, year_id))
            .map(|a| a.value().clone());
        self.record_read(
            RowKey::Assignment {
                requester_id,
                year_id,
            },
            current.as_ref().map(|a| a.version),
        );
        current
    }

    pub fn booking(&mut self, booking_id: Ulid) -> Option<Booking> {
        if let Some(staged) = self.staged_bookings.get(&booking_id) {
            return Some(staged.clone());
        }
        let current = self.engine.bookings.get(&booking_id).map(|b| b.value().clone());
        self.record_read(RowKey::Booking(booking_id), current.as_ref().map(|b| b.version));
        current
    }

    // ── Reads under lock ─────────────────────────────────────

    fn locked(&self, key: ResourceKey) -> Result<&ResourceState, EngineError> {
        self.guards
            .get(&key)
            .map(|g| &**g)
            .ok_or(EngineError::LockNotHeld(key))
    }

    /// `(year_id, capacity)` of a locked class, including staged capacity changes.
    pub(super) fn class_profile(&self, class_id: Ulid) -> Result<(Ulid, u32), EngineError> {
        let (year_id, capacity) = self
            .locked(ResourceKey::Class(class_id))?
            .class_profile()
            .ok_or(EngineError::NotFound(class_id))?;
        let capacity = self
            .staged_capacity
            .get(&class_id)
            .copied()
            .unwrap_or(capacity);
        Ok((year_id, capacity))
    }

    /// Active assignments on a locked class, optionally not counting one
    /// requester's own row.
    pub(super) fn active_count(
        &self,
        class_id: Ulid,
        excluding: Option<Ulid>,
    ) -> Result<usize, EngineError> {
        let rs = self.locked(ResourceKey::Class(class_id))?;
        let (class_year, _) = rs.class_profile().ok_or(EngineError::NotFound(class_id))?;

        let is_member = |requester: &Ulid| match self.staged_assignments.get(&(*requester, class_year)) {
            Some(a) => a.active && a.class_id == class_id,
            None => rs.enrolled.contains(requester),
        };

        let mut count = rs.enrolled.len();
        for ((requester, year), staged) in &self.staged_assignments {
            if *year != class_year {
                continue;
            }
            let was = rs.enrolled.contains(requester);
            let now = staged.active && staged.class_id == class_id;
            match (was, now) {
                (true, false) => count -= 1,
                (false, true) => count += 1,
                _ => {}
            }
        }
        if let Some(requester) = excluding
            && is_member(&requester)
        {
            count -= 1;
        }
        Ok(count)
    }

    /// Active slots on a locked resource, with this transaction's staged
    /// bookings overlaid.
    pub(super) fn slots_on(&self, key: ResourceKey) -> Result<Vec<Slot>, EngineError> {
        let rs = self.locked(key)?;
        let mut slots: Vec<Slot> = rs
            .slots
            .iter()
            .filter(|s| !self.staged_bookings.contains_key(&s.booking_id))
            .copied()
            .collect();
        slots.extend(
            self.staged_bookings
                .values()
                .filter(|b| b.is_active() && b.resource_keys().contains(&key))
                .map(Booking::slot),
        );
        Ok(slots)
    }

    // ── Writes ───────────────────────────────────────────────

    pub(super) fn stage(&mut self, event: Event) {
        match &event {
            Event::AssignmentSaved { assignment, .. } => {
                self.staged_assignments.insert(
                    (assignment.requester_id, assignment.year_id),
                    assignment.clone(),
                );
            }
            Event::BookingSaved { booking, .. } => {
                self.staged_bookings.insert(booking.id, booking.clone());
            }
            Event::CapacityChanged { class_id, capacity } => {
                self.staged_capacity.insert(*class_id, *capacity);
            }
            _ => {}
        }
        self.events.push(event);
    }

    /// Validate the read set, make the staged events durable, apply them and
    /// release every lock.
    pub async fn commit(mut self) -> Result<(), EngineError> {
        let engine = self.engine;
        let _seq = engine.commit_seq.lock().await;

        for (row, seen) in &self.read_set {
            if engine.row_version(row) != *seen {
                debug!(txn = %self.id, %row, "read set invalidated");
                return Err(ConcurrencyError::SerializationFailure { row: *row }.into());
            }
        }
        if self.events.is_empty() {
            return Ok(());
        }
        for event in &self.events {
            for key in event.resource_keys() {
                if !self.guards.contains_key(&key) {
                    return Err(EngineError::LockNotHeld(key));
                }
            }
        }

        let events = std::mem::take(&mut self.events);
        engine.wal_append(&events).await?;
        for event in &events {
            engine.apply_to_tables(event);
            for key in event.resource_keys() {
                if let Some(guard) = self.guards.get_mut(&key) {
                    apply_to_resource(guard, event);
                }
                engine.notify.send(key, event);
            }
        }
        debug!(txn = %self.id, events = events.len(), "committed");
        Ok(())
    }

    /// Discard staged writes and release locks.
    pub fn rollback(self) {
        debug!(txn = %self.id, staged = self.events.len(), "rolled back");
    }
}
