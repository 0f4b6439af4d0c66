use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::interval::overlaps;
pub use crate::interval::{Ms, Span, Weekday, WeeklySlot, Window};

/// Identity of a lockable row. The derived `Ord` is the global lock order:
/// classes before teachers, then by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKey {
    Class(Ulid),
    Teacher(Ulid),
}

impl ResourceKey {
    pub fn id(&self) -> Ulid {
        match self {
            ResourceKey::Class(id) | ResourceKey::Teacher(id) => *id,
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Class(id) => write!(f, "class {id}"),
            ResourceKey::Teacher(id) => write!(f, "teacher {id}"),
        }
    }
}

/// Optional teacher attached to a booking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeacherRef {
    #[default]
    NoTeacher,
    Teacher(Ulid),
}

impl TeacherRef {
    pub fn id(&self) -> Option<Ulid> {
        match self {
            TeacherRef::NoTeacher => None,
            TeacherRef::Teacher(id) => Some(*id),
        }
    }
}

/// A row that is read without a lock and therefore version-checked at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RowKey {
    Year(Ulid),
    Assignment { requester_id: Ulid, year_id: Ulid },
    Booking(Ulid),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Year(id) => write!(f, "year {id}"),
            RowKey::Assignment {
                requester_id,
                year_id,
            } => write!(f, "assignment of {requester_id} in year {year_id}"),
            RowKey::Booking(id) => write!(f, "booking {id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcademicYear {
    pub id: Ulid,
    pub label: String,
    /// `[start, end)`; every absolute booking of the year must fit inside.
    pub span: Span,
}

/// A requester's seat in a class for one academic year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Ulid,
    pub requester_id: Ulid,
    pub year_id: Ulid,
    pub class_id: Ulid,
    pub active: bool,
    pub version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingKind {
    /// Weekly timetable slot.
    Lesson,
    Exam,
    /// Teacher leave request.
    Leave,
}

impl BookingKind {
    pub fn expects_weekly(&self) -> bool {
        matches!(self, BookingKind::Lesson)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Active,
    Cancelled,
}

/// What a caller asks to book (or what an edit should turn a booking into).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub year_id: Ulid,
    pub kind: BookingKind,
    pub class_id: Option<Ulid>,
    pub teacher: TeacherRef,
    /// Secondary teacher role (assistant, proctor) that must also be free.
    pub assistant: TeacherRef,
    pub window: Window,
    pub label: Option<String>,
}

impl BookingRequest {
    pub fn lesson(year_id: Ulid, class_id: Ulid, teacher: TeacherRef, slot: WeeklySlot) -> Self {
        Self {
            id: Ulid::new(),
            year_id,
            kind: BookingKind::Lesson,
            class_id: Some(class_id),
            teacher,
            assistant: TeacherRef::NoTeacher,
            window: Window::Weekly(slot),
            label: None,
        }
    }

    pub fn exam(year_id: Ulid, class_id: Ulid, teacher: TeacherRef, span: Span) -> Self {
        Self {
            id: Ulid::new(),
            year_id,
            kind: BookingKind::Exam,
            class_id: Some(class_id),
            teacher,
            assistant: TeacherRef::NoTeacher,
            window: Window::Absolute(span),
            label: None,
        }
    }

    pub fn leave(year_id: Ulid, teacher_id: Ulid, span: Span) -> Self {
        Self {
            id: Ulid::new(),
            year_id,
            kind: BookingKind::Leave,
            class_id: None,
            teacher: TeacherRef::Teacher(teacher_id),
            assistant: TeacherRef::NoTeacher,
            window: Window::Absolute(span),
            label: None,
        }
    }

    pub fn with_assistant(mut self, assistant: Ulid) -> Self {
        self.assistant = TeacherRef::Teacher(assistant);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn resource_keys(&self) -> Vec<ResourceKey> {
        resource_keys(self.class_id, self.teacher, self.assistant)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub year_id: Ulid,
    pub kind: BookingKind,
    pub class_id: Option<Ulid>,
    pub teacher: TeacherRef,
    pub assistant: TeacherRef,
    pub window: Window,
    pub label: Option<String>,
    pub status: BookingStatus,
    pub version: u64,
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status == BookingStatus::Active
    }

    pub fn resource_keys(&self) -> Vec<ResourceKey> {
        resource_keys(self.class_id, self.teacher, self.assistant)
    }

    pub(crate) fn slot(&self) -> Slot {
        Slot {
            booking_id: self.id,
            year_id: self.year_id,
            kind: self.kind,
            window: self.window,
        }
    }
}

fn resource_keys(class_id: Option<Ulid>, teacher: TeacherRef, assistant: TeacherRef) -> Vec<ResourceKey> {
    let mut keys = Vec::with_capacity(3);
    if let Some(id) = class_id {
        keys.push(ResourceKey::Class(id));
    }
    for t in [teacher, assistant] {
        if let TeacherRef::Teacher(id) = t {
            keys.push(ResourceKey::Teacher(id));
        }
    }
    keys
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceProfile {
    Class { year_id: Ulid, capacity: u32 },
    Teacher,
}

/// A booked slot as seen from one resource row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub booking_id: Ulid,
    pub year_id: Ulid,
    pub kind: BookingKind,
    pub window: Window,
}

impl Slot {
    /// Same conflict scope and a shared instant. Weekly slots only recur
    /// inside their own academic year; absolute windows are compared as
    /// instants whatever year they belong to.
    pub fn clashes_with(&self, other: &Slot) -> bool {
        if self.kind != other.kind {
            return false;
        }
        if self.window.is_weekly() && self.year_id != other.year_id {
            return false;
        }
        overlaps(&self.window, &other.window)
    }
}

/// The lockable row for a class or a teacher. Holds exactly the data that
/// capacity and conflict decisions read.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub key: ResourceKey,
    pub name: Option<String>,
    pub profile: ResourceProfile,
    /// Requesters holding an active assignment to this class.
    pub enrolled: BTreeSet<Ulid>,
    /// Active booked slots on this resource.
    pub slots: Vec<Slot>,
}

impl ResourceState {
    pub fn new(key: ResourceKey, name: Option<String>, profile: ResourceProfile) -> Self {
        Self {
            key,
            name,
            profile,
            enrolled: BTreeSet::new(),
            slots: Vec::new(),
        }
    }

    /// `(year_id, capacity)` for class rows.
    pub fn class_profile(&self) -> Option<(Ulid, u32)> {
        match self.profile {
            ResourceProfile::Class { year_id, capacity } => Some((year_id, capacity)),
            ResourceProfile::Teacher => None,
        }
    }

    pub fn insert_slot(&mut self, slot: Slot) {
        self.remove_slot(slot.booking_id);
        self.slots.push(slot);
    }

    pub fn remove_slot(&mut self, booking_id: Ulid) -> Option<Slot> {
        let pos = self.slots.iter().position(|s| s.booking_id == booking_id)?;
        Some(self.slots.swap_remove(pos))
    }
}

/// The event types. A committed transaction is a `Vec<Event>` in the WAL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    YearCreated {
        year: AcademicYear,
    },
    YearDeleted {
        id: Ulid,
    },
    ClassCreated {
        id: Ulid,
        year_id: Ulid,
        name: Option<String>,
        capacity: u32,
    },
    TeacherCreated {
        id: Ulid,
        name: Option<String>,
    },
    CapacityChanged {
        class_id: Ulid,
        capacity: u32,
    },
    AssignmentSaved {
        assignment: Assignment,
        /// Class the requester's active seat was moved off, if any.
        released_class: Option<Ulid>,
    },
    BookingSaved {
        booking: Booking,
        /// Resources the booking no longer references after an edit.
        released: Vec<ResourceKey>,
    },
}

impl Event {
    /// Resource rows whose state this event changes.
    pub fn resource_keys(&self) -> Vec<ResourceKey> {
        match self {
            Event::YearCreated { .. } | Event::YearDeleted { .. } => Vec::new(),
            Event::ClassCreated { id, .. } => vec![ResourceKey::Class(*id)],
            Event::TeacherCreated { id, .. } => vec![ResourceKey::Teacher(*id)],
            Event::CapacityChanged { class_id, .. } => vec![ResourceKey::Class(*class_id)],
            Event::AssignmentSaved {
                assignment,
                released_class,
            } => {
                let mut keys = vec![ResourceKey::Class(assignment.class_id)];
                if let Some(c) = released_class
                    && *c != assignment.class_id
                {
                    keys.push(ResourceKey::Class(*c));
                }
                keys
            }
            Event::BookingSaved { booking, released } => {
                let mut keys = booking.resource_keys();
                for k in released {
                    if !keys.contains(k) {
                        keys.push(*k);
                    }
                }
                keys
            }
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub key: ResourceKey,
    pub name: Option<String>,
    pub profile: ResourceProfile,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_order_puts_classes_before_teachers() {
        let a = Ulid::from_parts(1, 0);
        let b = Ulid::from_parts(2, 0);
        let mut keys = vec![
            ResourceKey::Teacher(a),
            ResourceKey::Class(b),
            ResourceKey::Class(a),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                ResourceKey::Class(a),
                ResourceKey::Class(b),
                ResourceKey::Teacher(a)
            ]
        );
    }

    #[test]
    fn booking_keys_skip_missing_teacher() {
        let year = Ulid::new();
        let class = Ulid::new();
        let req = BookingRequest::lesson(
            year,
            class,
            TeacherRef::NoTeacher,
            WeeklySlot::hm(Weekday::Mon, (8, 0), (9, 0)),
        );
        assert_eq!(req.resource_keys(), vec![ResourceKey::Class(class)]);
    }

    #[test]
    fn exam_with_assistant_references_three_rows() {
        let (class, t1, t2) = (Ulid::new(), Ulid::new(), Ulid::new());
        let req = BookingRequest::exam(Ulid::new(), class, TeacherRef::Teacher(t1), Span::new(0, 10))
            .with_assistant(t2);
        assert_eq!(
            req.resource_keys(),
            vec![
                ResourceKey::Class(class),
                ResourceKey::Teacher(t1),
                ResourceKey::Teacher(t2)
            ]
        );
    }

    #[test]
    fn leave_references_only_teacher() {
        let t = Ulid::new();
        let req = BookingRequest::leave(Ulid::new(), t, Span::new(0, 10));
        assert_eq!(req.resource_keys(), vec![ResourceKey::Teacher(t)]);
    }

    #[test]
    fn assignment_event_touches_both_classes_on_transfer() {
        let (from, to) = (Ulid::new(), Ulid::new());
        let event = Event::AssignmentSaved {
            assignment: Assignment {
                id: Ulid::new(),
                requester_id: Ulid::new(),
                year_id: Ulid::new(),
                class_id: to,
                active: true,
                version: 2,
            },
            released_class: Some(from),
        };
        assert_eq!(
            event.resource_keys(),
            vec![ResourceKey::Class(to), ResourceKey::Class(from)]
        );
    }

    #[test]
    fn slot_insert_replaces_same_booking() {
        let mut rs = ResourceState::new(ResourceKey::Teacher(Ulid::new()), None, ResourceProfile::Teacher);
        let id = Ulid::new();
        let slot = Slot {
            booking_id: id,
            year_id: Ulid::new(),
            kind: BookingKind::Leave,
            window: Window::Absolute(Span::new(0, 10)),
        };
        rs.insert_slot(slot);
        rs.insert_slot(Slot {
            window: Window::Absolute(Span::new(20, 30)),
            ..slot
        });
        assert_eq!(rs.slots.len(), 1);
        assert_eq!(rs.slots[0].window, Window::Absolute(Span::new(20, 30)));
        assert!(rs.remove_slot(id).is_some());
        assert!(rs.remove_slot(id).is_none());
    }

    #[test]
    fn weekly_slots_clash_only_within_their_year() {
        let this_year = Ulid::new();
        let monday = Window::Weekly(WeeklySlot::hm(Weekday::Mon, (8, 0), (9, 0)));
        let lesson = Slot {
            booking_id: Ulid::new(),
            year_id: this_year,
            kind: BookingKind::Lesson,
            window: monday,
        };
        let same_year = Slot {
            booking_id: Ulid::new(),
            ..lesson
        };
        let next_year = Slot {
            year_id: Ulid::new(),
            ..same_year
        };
        assert!(lesson.clashes_with(&same_year));
        assert!(!lesson.clashes_with(&next_year));

        let exam = Slot {
            kind: BookingKind::Exam,
            ..lesson
        };
        assert!(!lesson.clashes_with(&exam));
    }

    #[test]
    fn absolute_slots_clash_across_years() {
        let leave = Slot {
            booking_id: Ulid::new(),
            year_id: Ulid::new(),
            kind: BookingKind::Leave,
            window: Window::Absolute(Span::new(0, 100)),
        };
        let other_year = Slot {
            booking_id: Ulid::new(),
            year_id: Ulid::new(),
            window: Window::Absolute(Span::new(50, 150)),
            ..leave
        };
        assert!(leave.clashes_with(&other_year));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ClassCreated {
            id: Ulid::new(),
            year_id: Ulid::new(),
            name: Some("5A".into()),
            capacity: 30,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
