use ulid::Ulid;

use crate::model::{AcademicYear, Window};

use super::{BoundsViolation, EngineError};

/// Absolute windows must lie inside `[year.start, year.end)`. Weekly slots
/// carry no instants; their year is checked referentially through the class
/// (`assert_class_in_year`).
pub fn assert_within_year(window: &Window, year: &AcademicYear) -> Result<(), EngineError> {
    let Window::Absolute(span) = window else {
        return Ok(());
    };
    if year.span.contains_span(span) {
        return Ok(());
    }
    if span.start < year.span.start {
        return Err(EngineError::OutOfBounds {
            year_id: year.id,
            violation: BoundsViolation::StartsBeforeYear {
                start: span.start,
                year_start: year.span.start,
            },
        });
    }
    Err(EngineError::OutOfBounds {
        year_id: year.id,
        violation: BoundsViolation::EndsAfterYear {
            end: span.end,
            year_end: year.span.end,
        },
    })
}

pub fn assert_class_in_year(
    class_id: Ulid,
    class_year_id: Ulid,
    year: &AcademicYear,
) -> Result<(), EngineError> {
    if class_year_id != year.id {
        return Err(EngineError::OutOfBounds {
            year_id: year.id,
            violation: BoundsViolation::ClassInOtherYear {
                class_id,
                class_year_id,
            },
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Span, Weekday, WeeklySlot};

    fn year(start: i64, end: i64) -> AcademicYear {
        AcademicYear {
            id: Ulid::new(),
            label: "Y".into(),
            span: Span::new(start, end),
        }
    }

    #[test]
    fn inside_and_exact_fit_accepted() {
        let y = year(100, 1000);
        assert!(assert_within_year(&Window::Absolute(Span::new(200, 300)), &y).is_ok());
        assert!(assert_within_year(&Window::Absolute(Span::new(100, 1000)), &y).is_ok());
    }

    #[test]
    fn start_before_year_rejected() {
        let y = year(100, 1000);
        let err = assert_within_year(&Window::Absolute(Span::new(50, 300)), &y).unwrap_err();
        assert!(matches!(
            err,
            EngineError::OutOfBounds {
                violation: BoundsViolation::StartsBeforeYear { start: 50, .. },
                ..
            }
        ));
    }

    #[test]
    fn end_after_year_rejected() {
        let y = year(100, 1000);
        let err = assert_within_year(&Window::Absolute(Span::new(900, 1001)), &y).unwrap_err();
        assert!(matches!(
            err,
            EngineError::OutOfBounds {
                violation: BoundsViolation::EndsAfterYear { end: 1001, .. },
                ..
            }
        ));
    }

    #[test]
    fn weekly_slots_are_not_instant_checked() {
        let y = year(100, 1000);
        let slot = Window::Weekly(WeeklySlot::hm(Weekday::Wed, (8, 0), (9, 0)));
        assert!(assert_within_year(&slot, &y).is_ok());
    }

    #[test]
    fn class_from_other_year_rejected() {
        let y = year(100, 1000);
        let class = Ulid::new();
        assert!(assert_class_in_year(class, y.id, &y).is_ok());
        let other = Ulid::new();
        let err = assert_class_in_year(class, other, &y).unwrap_err();
        assert!(matches!(
            err,
            EngineError::OutOfBounds {
                violation: BoundsViolation::ClassInOtherYear { .. },
                ..
            }
        ));
    }
}
