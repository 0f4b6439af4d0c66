use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::bounds::{assert_class_in_year, assert_within_year};
use super::lock::order_for_locking;
use super::{EngineError, Transaction};

/// Whether `validate_and_book` creates a booking or replaces the stored
/// booking with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingMode {
    Create,
    /// The booking's own slots are excluded from the conflict scan.
    Replace,
}

/// Shape checks that need no stored state.
fn validate_request(request: &BookingRequest) -> Result<(), EngineError> {
    if !request.window.is_well_formed() {
        return Err(EngineError::Validation("interval end must be after its start"));
    }
    if request.kind.expects_weekly() != request.window.is_weekly() {
        return Err(EngineError::Validation(
            "lessons take weekly slots; exams and leave take absolute windows",
        ));
    }
    match request.kind {
        BookingKind::Lesson | BookingKind::Exam => {
            if request.class_id.is_none() {
                return Err(EngineError::Validation("lessons and exams need a class"));
            }
        }
        BookingKind::Leave => {
            if request.class_id.is_some() || request.assistant != TeacherRef::NoTeacher {
                return Err(EngineError::Validation("leave books only the teacher"));
            }
            if request.teacher == TeacherRef::NoTeacher {
                return Err(EngineError::Validation("leave needs a teacher"));
            }
        }
    }
    if request.assistant != TeacherRef::NoTeacher && request.assistant == request.teacher {
        return Err(EngineError::Validation("assistant must differ from the teacher"));
    }
    if let Some(label) = &request.label
        && label.len() > MAX_LABEL_LEN
    {
        return Err(EngineError::LimitExceeded("label too long"));
    }
    Ok(())
}

impl Transaction<'_> {
    /// Book `request`, or in `BookingMode::Replace` overwrite the stored
    /// booking that has the same id.
    ///
    /// Every resource the booking references is locked before its slots are
    /// read. A slot only conflicts with slots of the same kind on the same
    /// resource (weekly lessons only within the same academic year); the booking
    /// being edited never conflicts with itself.
    pub async fn validate_and_book(
        &mut self,
        request: BookingRequest,
        mode: BookingMode,
    ) -> Result<Booking, EngineError> {
        validate_request(&request)?;
        let year = self.year(request.year_id)?;

        let previous = self.booking(request.id);
        let (version, previous_keys) = match (mode, previous) {
            (BookingMode::Create, Some(_)) => return Err(EngineError::AlreadyExists(request.id)),
            (BookingMode::Create, None) => (1, Vec::new()),
            (BookingMode::Replace, None) => return Err(EngineError::NotFound(request.id)),
            (BookingMode::Replace, Some(prev)) => {
                if !prev.is_active() {
                    return Err(EngineError::Validation("cancelled bookings cannot be edited"));
                }
                if prev.kind != request.kind {
                    return Err(EngineError::Validation("a booking's kind cannot change"));
                }
                (prev.version + 1, prev.resource_keys())
            }
        };

        let keys = order_for_locking(request.resource_keys());
        let mut to_lock = keys.clone();
        to_lock.extend(previous_keys.iter().copied());
        self.lock_exclusive(&to_lock).await?;

        if let Some(class_id) = request.class_id {
            let (class_year, _) = self.class_profile(class_id)?;
            assert_class_in_year(class_id, class_year, &year)?;
        }
        assert_within_year(&request.window, &year)?;

        let candidate = Slot {
            booking_id: request.id,
            year_id: request.year_id,
            kind: request.kind,
            window: request.window,
        };
        for &key in &keys {
            let slots = self.slots_on(key)?;
            if slots.len() >= MAX_SLOTS_PER_RESOURCE {
                return Err(EngineError::LimitExceeded("too many bookings on resource"));
            }
            let clash = slots
                .iter()
                .find(|s| s.booking_id != request.id && candidate.clashes_with(s));
            if let Some(existing) = clash {
                return Err(EngineError::BookingConflict {
                    resource: key,
                    existing: existing.booking_id,
                });
            }
        }

        let released = previous_keys
            .into_iter()
            .filter(|k| !keys.contains(k))
            .collect();
        let booking = Booking {
            id: request.id,
            year_id: request.year_id,
            kind: request.kind,
            class_id: request.class_id,
            teacher: request.teacher,
            assistant: request.assistant,
            window: request.window,
            label: request.label,
            status: BookingStatus::Active,
            version,
        };
        self.stage(Event::BookingSaved {
            booking: booking.clone(),
            released,
        });
        Ok(booking)
    }

    /// Soft-cancel a booking. Frees its slots; no conflict check is needed.
    pub async fn cancel_booking(&mut self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let booking = self
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if !booking.is_active() {
            return Ok(booking);
        }

        self.lock_exclusive(&booking.resource_keys()).await?;
        let cancelled = Booking {
            status: BookingStatus::Cancelled,
            version: booking.version + 1,
            ..booking
        };
        self.stage(Event::BookingSaved {
            booking: cancelled.clone(),
            released: Vec::new(),
        });
        Ok(cancelled)
    }
}
