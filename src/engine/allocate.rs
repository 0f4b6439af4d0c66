use ulid::Ulid;

use crate::limits::MAX_CLASS_CAPACITY;
use crate::model::*;

use super::bounds::assert_class_in_year;
use super::{EngineError, Transaction};

impl Transaction<'_> {
    /// Give `requester_id` a seat in `class_id` for `year_id`.
    ///
    /// Re-allocating to the class the requester already sits in is a no-op.
    /// Moving from another class locks both classes in lock order, so two
    /// requesters swapping seats cannot deadlock.
    pub async fn allocate(
        &mut self,
        requester_id: Ulid,
        year_id: Ulid,
        class_id: Ulid,
    ) -> Result<Assignment, EngineError> {
        let year = self.year(year_id)?;
        let current = self.assignment(requester_id, year_id);
        if let Some(a) = &current
            && a.active
            && a.class_id == class_id
        {
            return Ok(a.clone());
        }

        let source = current.as_ref().filter(|a| a.active).map(|a| a.class_id);
        let mut keys = vec![ResourceKey::Class(class_id)];
        keys.extend(source.map(ResourceKey::Class));
        self.lock_exclusive(&keys).await?;

        let (class_year, capacity) = self.class_profile(class_id)?;
        assert_class_in_year(class_id, class_year, &year)?;

        let active = self.active_count(class_id, Some(requester_id))?;
        if active >= capacity as usize {
            return Err(EngineError::CapacityExceeded { class_id, capacity });
        }

        let assignment = match current {
            Some(a) => Assignment {
                class_id,
                active: true,
                version: a.version + 1,
                ..a
            },
            None => Assignment {
                id: Ulid::new(),
                requester_id,
                year_id,
                class_id,
                active: true,
                version: 1,
            },
        };
        self.stage(Event::AssignmentSaved {
            assignment: assignment.clone(),
            released_class: source,
        });
        Ok(assignment)
    }

    /// Deactivate the requester's assignment for the year, freeing the seat.
    pub async fn withdraw(
        &mut self,
        requester_id: Ulid,
        year_id: Ulid,
    ) -> Result<Assignment, EngineError> {
        let current = self
            .assignment(requester_id, year_id)
            .ok_or(EngineError::NotFound(requester_id))?;
        if !current.active {
            return Ok(current);
        }

        self.lock_exclusive(&[ResourceKey::Class(current.class_id)])
            .await?;
        let assignment = Assignment {
            active: false,
            version: current.version + 1,
            ..current
        };
        self.stage(Event::AssignmentSaved {
            assignment: assignment.clone(),
            released_class: Some(assignment.class_id),
        });
        Ok(assignment)
    }

    /// Change a class's capacity. It may not drop below the seats in use.
    pub async fn set_capacity(&mut self, class_id: Ulid, capacity: u32) -> Result<(), EngineError> {
        if capacity == 0 {
            return Err(EngineError::Validation("capacity must be positive"));
        }
        if capacity > MAX_CLASS_CAPACITY {
            return Err(EngineError::LimitExceeded("capacity too large"));
        }
        self.lock_exclusive(&[ResourceKey::Class(class_id)]).await?;
        self.class_profile(class_id)?;

        let active = self.active_count(class_id, None)?;
        if (capacity as usize) < active {
            return Err(EngineError::CapacityBelowEnrollment {
                class_id,
                capacity,
                active,
            });
        }
        self.stage(Event::CapacityChanged { class_id, capacity });
        Ok(())
    }
}
