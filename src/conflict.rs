use crate::data::{Course, Room, RoomId, Slot, StudentId};
use chrono::NaiveTime;
use std::collections::{BTreeMap, HashMap};

/// Outcome of checking one (slot, room) candidate for a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub room_fits: bool,
    pub students_free: bool,
}

impl Verdict {
    pub fn is_placeable(&self) -> bool {
        self.room_fits && self.students_free
    }
}

/// Committed student intervals and per-room occupancy for one run.
///
/// Each student maps to the slots of their committed exams, each room to the
/// cumulative head count per slot. The index never touches anything outside
/// itself, so a run can build one in scratch and discard it on failure.
#[derive(Debug, Clone, Default)]
pub struct ConflictIndex {
    students: HashMap<StudentId, Vec<Slot>>,
    rooms: HashMap<RoomId, BTreeMap<Slot, u32>>,
}

impl ConflictIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Head count already committed to `room` in any slot overlapping `slot`.
    pub fn occupancy(&self, room: RoomId, slot: &Slot) -> u32 {
        let Some(by_slot) = self.rooms.get(&room) else {
            return 0;
        };
        let day_start = Slot::new(slot.date, NaiveTime::MIN, NaiveTime::MIN);
        by_slot
            .range(day_start..)
            .take_while(|(s, _)| s.date == slot.date)
            .filter(|(s, _)| s.overlaps(slot))
            .map(|(_, count)| *count)
            .sum()
    }

    pub fn student_is_free(&self, student: StudentId, slot: &Slot) -> bool {
        self.students
            .get(&student)
            .is_none_or(|taken| !taken.iter().any(|s| s.overlaps(slot)))
    }

    pub fn check(&self, course: &Course, slot: &Slot, room: &Room) -> Verdict {
        let room_fits = u64::from(self.occupancy(room.id, slot)) + u64::from(course.roster_size())
            <= u64::from(room.capacity);
        let students_free = course
            .students
            .iter()
            .all(|s| self.student_is_free(*s, slot));
        Verdict {
            room_fits,
            students_free,
        }
    }

    pub fn can_place(&self, course: &Course, slot: &Slot, room: &Room) -> bool {
        self.check(course, slot, room).is_placeable()
    }

    /// Registers the placement. Callers check `can_place` first; the index
    /// itself does not refuse.
    pub fn commit(&mut self, course: &Course, slot: Slot, room: &Room) {
        for student in &course.students {
            self.students.entry(*student).or_default().push(slot);
        }
        *self
            .rooms
            .entry(room.id)
            .or_default()
            .entry(slot)
            .or_insert(0) += course.roster_size();
    }

    /// Inverse of `commit`.
    pub fn rollback(&mut self, course: &Course, slot: Slot, room: &Room) {
        for student in &course.students {
            if let Some(taken) = self.students.get_mut(student) {
                if let Some(pos) = taken.iter().position(|s| *s == slot) {
                    taken.swap_remove(pos);
                }
                if taken.is_empty() {
                    self.students.remove(student);
                }
            }
        }
        if let Some(by_slot) = self.rooms.get_mut(&room.id) {
            if let Some(count) = by_slot.get_mut(&slot) {
                *count = count.saturating_sub(course.roster_size());
                if *count == 0 {
                    by_slot.remove(&slot);
                }
            }
            if by_slot.is_empty() {
                self.rooms.remove(&room.id);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty() && self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn slot(start: u32, end: u32) -> Slot {
        Slot::new(
            NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
        )
    }

    fn course(id: u32, students: &[u32]) -> Course {
        Course {
            id,
            code: format!("C{id}"),
            title: format!("Course {id}"),
            department_id: 1,
            semester_id: 1,
            students: students.iter().copied().collect(),
        }
    }

    fn room(id: u32, capacity: u32) -> Room {
        Room {
            id,
            name: format!("R{id}"),
            capacity,
        }
    }

    #[test]
    fn capacity_accumulates_per_room_and_slot() {
        let mut index = ConflictIndex::new();
        let hall = room(1, 5);
        let a = course(1, &[1, 2, 3]);
        let b = course(2, &[4, 5, 6]);
        assert!(index.can_place(&a, &slot(9, 11), &hall));
        index.commit(&a, slot(9, 11), &hall);
        let verdict = index.check(&b, &slot(9, 11), &hall);
        assert!(!verdict.room_fits);
        assert!(verdict.students_free);
        // overlapping but distinct slot still counts
        assert!(!index.can_place(&b, &slot(10, 12), &hall));
        assert!(index.can_place(&b, &slot(11, 13), &hall));
    }

    #[test]
    fn shared_student_blocks_overlapping_slot() {
        let mut index = ConflictIndex::new();
        let a = course(1, &[1, 2]);
        let b = course(2, &[2, 3]);
        index.commit(&a, slot(9, 11), &room(1, 50));
        let verdict = index.check(&b, &slot(9, 11), &room(2, 50));
        assert!(verdict.room_fits);
        assert!(!verdict.students_free);
        assert!(index.can_place(&b, &slot(11, 13), &room(2, 50)));
    }

    #[test]
    fn rollback_restores_empty_index() {
        let mut index = ConflictIndex::new();
        let a = course(1, &[1, 2]);
        let hall = room(1, 10);
        index.commit(&a, slot(9, 11), &hall);
        index.rollback(&a, slot(9, 11), &hall);
        assert!(index.is_empty());
        assert_eq!(index.occupancy(1, &slot(9, 11)), 0);
    }

    #[test]
    fn empty_roster_always_fits() {
        let mut index = ConflictIndex::new();
        let hall = room(1, 2);
        index.commit(&course(1, &[1, 2]), slot(9, 11), &hall);
        assert!(index.can_place(&course(2, &[]), &slot(9, 11), &hall));
    }
}
