use ulid::Ulid;

use crate::model::{Ms, ResourceKey, RowKey};

/// Store-detected conditions where a transaction's work is invalid but may
/// succeed if run again from the top. This is the only retryable class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConcurrencyError {
    /// A row read without a lock changed before commit.
    SerializationFailure { row: RowKey },
    /// Waiting for `key` could close a lock cycle.
    Deadlock { key: ResourceKey },
    /// The lock on `key` was not obtained within the configured wait.
    LockTimeout { key: ResourceKey },
}

impl ConcurrencyError {
    pub fn label(&self) -> &'static str {
        match self {
            ConcurrencyError::SerializationFailure { .. } => "serialization_failure",
            ConcurrencyError::Deadlock { .. } => "deadlock",
            ConcurrencyError::LockTimeout { .. } => "lock_timeout",
        }
    }
}

/// Why an interval does not fit its academic year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundsViolation {
    StartsBeforeYear { start: Ms, year_start: Ms },
    EndsAfterYear { end: Ms, year_end: Ms },
    ClassInOtherYear { class_id: Ulid, class_year_id: Ulid },
}

#[derive(Debug)]
pub enum EngineError {
    Validation(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    OutOfBounds {
        year_id: Ulid,
        violation: BoundsViolation,
    },
    CapacityExceeded {
        class_id: Ulid,
        capacity: u32,
    },
    CapacityBelowEnrollment {
        class_id: Ulid,
        capacity: u32,
        active: usize,
    },
    BookingConflict {
        resource: ResourceKey,
        existing: Ulid,
    },
    YearInUse(Ulid),
    /// A resource row was read or written without holding its lock.
    LockNotHeld(ResourceKey),
    LimitExceeded(&'static str),
    Concurrency(ConcurrencyError),
    WalError(String),
}

impl EngineError {
    /// The single classification point for the retry executor.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Concurrency(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::OutOfBounds { .. } => "out_of_bounds",
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::CapacityBelowEnrollment { .. } => "capacity_below_enrollment",
            EngineError::BookingConflict { .. } => "booking_conflict",
            EngineError::YearInUse(_) => "year_in_use",
            EngineError::LockNotHeld(_) => "lock_not_held",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Concurrency(c) => c.label(),
            EngineError::WalError(_) => "wal",
        }
    }
}

impl From<ConcurrencyError> for EngineError {
    fn from(e: ConcurrencyError) -> Self {
        EngineError::Concurrency(e)
    }
}

impl std::fmt::Display for ConcurrencyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcurrencyError::SerializationFailure { row } => {
                write!(f, "serialization failure: {row} changed concurrently")
            }
            ConcurrencyError::Deadlock { key } => write!(f, "deadlock detected locking {key}"),
            ConcurrencyError::LockTimeout { key } => write!(f, "lock wait timeout on {key}"),
        }
    }
}

impl std::fmt::Display for BoundsViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BoundsViolation::StartsBeforeYear { start, year_start } => {
                write!(f, "starts at {start}, before year start {year_start}")
            }
            BoundsViolation::EndsAfterYear { end, year_end } => {
                write!(f, "ends at {end}, after year end {year_end}")
            }
            BoundsViolation::ClassInOtherYear {
                class_id,
                class_year_id,
            } => write!(f, "class {class_id} belongs to year {class_year_id}"),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid request: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::OutOfBounds { year_id, violation } => {
                write!(f, "outside academic year {year_id}: {violation}")
            }
            EngineError::CapacityExceeded { class_id, capacity } => {
                write!(f, "class {class_id} is full: capacity {capacity}")
            }
            EngineError::CapacityBelowEnrollment {
                class_id,
                capacity,
                active,
            } => write!(
                f,
                "capacity {capacity} for class {class_id} is below its {active} active assignments"
            ),
            EngineError::BookingConflict { resource, existing } => {
                write!(f, "conflict on {resource} with booking {existing}")
            }
            EngineError::YearInUse(id) => {
                write!(f, "cannot delete academic year {id}: still referenced")
            }
            EngineError::LockNotHeld(key) => write!(f, "{key} used without holding its lock"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Concurrency(e) => write!(f, "{e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_concurrency_errors_are_retryable() {
        let key = ResourceKey::Class(Ulid::new());
        assert!(EngineError::from(ConcurrencyError::Deadlock { key }).is_retryable());
        assert!(EngineError::from(ConcurrencyError::LockTimeout { key }).is_retryable());
        assert!(
            EngineError::from(ConcurrencyError::SerializationFailure {
                row: RowKey::Booking(Ulid::new())
            })
            .is_retryable()
        );

        let business = [
            EngineError::Validation("x"),
            EngineError::NotFound(Ulid::new()),
            EngineError::CapacityExceeded {
                class_id: Ulid::new(),
                capacity: 1,
            },
            EngineError::BookingConflict {
                resource: key,
                existing: Ulid::new(),
            },
            EngineError::OutOfBounds {
                year_id: Ulid::new(),
                violation: BoundsViolation::EndsAfterYear { end: 2, year_end: 1 },
            },
            EngineError::WalError("disk".into()),
        ];
        for e in business {
            assert!(!e.is_retryable(), "{e} must not be retried");
        }
    }

    #[test]
    fn conflict_message_names_resource_and_booking() {
        let teacher = Ulid::new();
        let existing = Ulid::new();
        let msg = EngineError::BookingConflict {
            resource: ResourceKey::Teacher(teacher),
            existing,
        }
        .to_string();
        assert!(msg.contains(&teacher.to_string()));
        assert!(msg.contains(&existing.to_string()));
    }
}
