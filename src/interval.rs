use serde::{Deserialize, Serialize};

use crate::limits::MINUTES_PER_DAY;

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

/// A weekly recurring slot: `[start_minute, end_minute)` minutes after
/// midnight, every `weekday`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySlot {
    pub weekday: Weekday,
    pub start_minute: u16,
    pub end_minute: u16,
}

impl WeeklySlot {
    pub fn new(weekday: Weekday, start_minute: u16, end_minute: u16) -> Self {
        Self {
            weekday,
            start_minute,
            end_minute,
        }
    }

    /// Convenience for `HH:MM` style construction.
    pub fn hm(weekday: Weekday, start: (u16, u16), end: (u16, u16)) -> Self {
        Self::new(weekday, start.0 * 60 + start.1, end.0 * 60 + end.1)
    }
}

/// The time claimed by a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Window {
    Weekly(WeeklySlot),
    Absolute(Span),
}

impl Window {
    /// `end > start` and, for weekly slots, both ends fall within one day.
    pub fn is_well_formed(&self) -> bool {
        match self {
            Window::Weekly(slot) => {
                slot.end_minute > slot.start_minute && slot.end_minute <= MINUTES_PER_DAY
            }
            Window::Absolute(span) => span.end > span.start,
        }
    }

    pub fn is_weekly(&self) -> bool {
        matches!(self, Window::Weekly(_))
    }
}

/// Do two windows claim any common instant?
///
/// Ranges are half-open, so touching endpoints do not conflict. Weekly slots
/// only meet on the same weekday; windows of different shapes never overlap.
pub fn overlaps(a: &Window, b: &Window) -> bool {
    match (a, b) {
        (Window::Weekly(x), Window::Weekly(y)) => {
            x.weekday == y.weekday
                && x.start_minute < y.end_minute
                && y.start_minute < x.end_minute
        }
        (Window::Absolute(x), Window::Absolute(y)) => x.overlaps(y),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;

    fn mon(start: (u16, u16), end: (u16, u16)) -> Window {
        Window::Weekly(WeeklySlot::hm(Weekday::Mon, start, end))
    }

    #[test]
    fn span_overlap() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
    }

    #[test]
    fn span_contains_span() {
        let outer = Span::new(100, 400);
        let inner = Span::new(150, 300);
        let partial = Span::new(50, 200);
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer));
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn weekly_same_day_overlap() {
        // 08:00-09:30 vs 09:00-10:00
        assert!(overlaps(&mon((8, 0), (9, 30)), &mon((9, 0), (10, 0))));
    }

    #[test]
    fn weekly_touching_endpoints_do_not_conflict() {
        assert!(!overlaps(&mon((8, 0), (9, 30)), &mon((9, 30), (10, 30))));
        assert!(!overlaps(&mon((9, 30), (10, 30)), &mon((8, 0), (9, 30))));
    }

    #[test]
    fn weekly_different_weekdays_never_overlap() {
        let tue = Window::Weekly(WeeklySlot::hm(Weekday::Tue, (8, 0), (9, 30)));
        assert!(!overlaps(&mon((8, 0), (9, 30)), &tue));
    }

    #[test]
    fn weekly_containment_overlaps() {
        assert!(overlaps(&mon((8, 0), (12, 0)), &mon((9, 0), (9, 15))));
    }

    #[test]
    fn absolute_overlap_is_symmetric() {
        let a = Window::Absolute(Span::new(8 * H, 10 * H));
        let b = Window::Absolute(Span::new(9 * H, 11 * H));
        assert!(overlaps(&a, &b));
        assert!(overlaps(&b, &a));
    }

    #[test]
    fn absolute_touching_does_not_overlap() {
        let a = Window::Absolute(Span::new(8 * H, 9 * H));
        let b = Window::Absolute(Span::new(9 * H, 10 * H));
        assert!(!overlaps(&a, &b));
    }

    #[test]
    fn mixed_shapes_never_overlap() {
        let a = Window::Absolute(Span::new(0, 7 * 24 * H));
        assert!(!overlaps(&a, &mon((0, 0), (23, 59))));
    }

    #[test]
    fn well_formedness() {
        assert!(mon((8, 0), (9, 0)).is_well_formed());
        assert!(!mon((9, 0), (9, 0)).is_well_formed());
        assert!(!mon((10, 0), (9, 0)).is_well_formed());
        assert!(!Window::Weekly(WeeklySlot::new(Weekday::Fri, 1000, 1441)).is_well_formed());
        assert!(Window::Weekly(WeeklySlot::new(Weekday::Fri, 1000, 1440)).is_well_formed());
        assert!(!Window::Absolute(Span { start: 5, end: 5 }).is_well_formed());
    }
}
