use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    pub fn get_year(&self, id: &Ulid) -> Option<AcademicYear> {
        self.years.get(id).map(|y| y.value().clone())
    }

    pub fn get_assignment(&self, requester_id: Ulid, year_id: Ulid) -> Option<Assignment> {
        self.assignments
            .get(&(requester_id, year_id))
            .map(|a| a.value().clone())
    }

    pub fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.get(id).map(|b| b.value().clone())
    }

    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        let mut resources: Vec<ResourceInfo> =
            self.catalog.iter().map(|e| e.value().clone()).collect();
        resources.sort_by_key(|r| r.key);
        resources
    }

    /// Active assignments on a class. Waits for any transaction holding the
    /// class lock to finish.
    pub async fn active_count(&self, class_id: Ulid) -> Result<usize, EngineError> {
        let row = self
            .get_row(&ResourceKey::Class(class_id))
            .ok_or(EngineError::NotFound(class_id))?;
        let guard = row.read().await;
        Ok(guard.enrolled.len())
    }

    /// Active bookings referencing a resource, ordered by booking id.
    pub async fn bookings_on(&self, key: ResourceKey) -> Result<Vec<Booking>, EngineError> {
        let row = self.get_row(&key).ok_or(EngineError::NotFound(key.id()))?;
        let guard = row.read().await;
        let mut bookings: Vec<Booking> = guard
            .slots
            .iter()
            .filter_map(|s| self.get_booking(&s.booking_id))
            .collect();
        bookings.sort_by_key(|b| b.id);
        Ok(bookings)
    }
}
