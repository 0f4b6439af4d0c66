use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

fn check_name(name: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = name
        && n.len() > MAX_NAME_LEN
    {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    /// Write and apply setup events. Caller holds `commit_seq`.
    async fn persist_admin(&self, event: Event) -> Result<(), EngineError> {
        self.wal_append(std::slice::from_ref(&event)).await?;
        self.apply_to_tables(&event);
        for key in event.resource_keys() {
            self.notify.send(key, &event);
        }
        Ok(())
    }

    pub async fn create_year(
        &self,
        id: Ulid,
        label: impl Into<String>,
        span: Span,
    ) -> Result<AcademicYear, EngineError> {
        let label = label.into();
        if label.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("label too long"));
        }
        if span.end <= span.start {
            return Err(EngineError::Validation("academic year must end after it starts"));
        }

        let _seq = self.commit_seq.lock().await;
        if self.years.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let year = AcademicYear { id, label, span };
        self.persist_admin(Event::YearCreated { year: year.clone() })
            .await?;
        info!(year = %id, label = %year.label, "academic year created");
        Ok(year)
    }

    /// Remove an academic year nothing refers to any more.
    pub async fn delete_year(&self, id: Ulid) -> Result<(), EngineError> {
        let _seq = self.commit_seq.lock().await;
        if !self.years.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let class_refs = self.catalog.iter().any(|e| {
            matches!(e.value().profile, ResourceProfile::Class { year_id, .. } if year_id == id)
        });
        let assignment_refs = self.assignments.iter().any(|e| e.value().year_id == id);
        let booking_refs = self.bookings.iter().any(|e| e.value().year_id == id);
        if class_refs || assignment_refs || booking_refs {
            return Err(EngineError::YearInUse(id));
        }
        self.persist_admin(Event::YearDeleted { id }).await
    }

    pub async fn create_class(
        &self,
        id: Ulid,
        year_id: Ulid,
        name: Option<String>,
        capacity: u32,
    ) -> Result<(), EngineError> {
        check_name(&name)?;
        if capacity == 0 {
            return Err(EngineError::Validation("capacity must be positive"));
        }
        if capacity > MAX_CLASS_CAPACITY {
            return Err(EngineError::LimitExceeded("capacity too large"));
        }

        let _seq = self.commit_seq.lock().await;
        if !self.years.contains_key(&year_id) {
            return Err(EngineError::NotFound(year_id));
        }
        if self.rows.contains_key(&ResourceKey::Class(id)) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.persist_admin(Event::ClassCreated {
            id,
            year_id,
            name,
            capacity,
        })
        .await
    }

    pub async fn create_teacher(&self, id: Ulid, name: Option<String>) -> Result<(), EngineError> {
        check_name(&name)?;
        let _seq = self.commit_seq.lock().await;
        if self.rows.contains_key(&ResourceKey::Teacher(id)) {
            return Err(EngineError::AlreadyExists(id));
        }
        self.persist_admin(Event::TeacherCreated { id, name }).await
    }
}
