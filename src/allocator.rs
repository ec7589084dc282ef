use crate::conflict::ConflictIndex;
use crate::data::{Course, Exam, ExamId, ExamStatus, Room, Slot, UnscheduledEntry, UnscheduledReason};
use itertools::Itertools;
use log::{debug, info, trace};
use std::time::Instant;

/// Result of one allocation pass. Every input course ends up in exactly one
/// of the two lists.
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    pub assignments: Vec<Exam>,
    pub unscheduled: Vec<UnscheduledEntry>,
    pub index: ConflictIndex,
}

/// Greedy largest-first packing of course exams into (slot, room) pairs.
///
/// Courses are taken by decreasing roster size (ties by id), candidates by
/// slot order then by ascending room capacity, so the first fitting
/// candidate is the earliest slot in the smallest sufficient room. A course
/// that fits nowhere is reported unscheduled and the pass continues.
pub fn allocate(courses: &[Course], slots: &[Slot], rooms: &[Room]) -> Allocation {
    let start_time = Instant::now();
    info!(
        "Allocating {} courses over {} slots and {} rooms...",
        courses.len(),
        slots.len(),
        rooms.len()
    );

    let ordered_courses = courses
        .iter()
        .sorted_by(|a, b| {
            b.roster_size()
                .cmp(&a.roster_size())
                .then_with(|| a.id.cmp(&b.id))
        })
        .collect_vec();
    let ordered_slots = slots.iter().copied().sorted().dedup().collect_vec();
    let ordered_rooms = rooms
        .iter()
        .sorted_by_key(|r| (r.capacity, r.id))
        .collect_vec();
    let largest_room = ordered_rooms.last().map_or(0, |r| r.capacity);

    let mut allocation = Allocation::default();
    let mut next_id: ExamId = 1;

    for course in ordered_courses {
        if ordered_slots.is_empty() || ordered_rooms.is_empty() {
            allocation
                .unscheduled
                .push(unscheduled(course, UnscheduledReason::NoCandidateSlots, 0, 0));
            continue;
        }
        if course.roster_size() > largest_room {
            debug!(
                "Course {} needs {} seats, largest room has {}",
                course.id,
                course.roster_size(),
                largest_room
            );
            allocation
                .unscheduled
                .push(unscheduled(course, UnscheduledReason::NoRoomLargeEnough, 0, 0));
            continue;
        }

        let mut capacity_rejections = 0;
        let mut conflict_rejections = 0;
        let placement = ordered_slots
            .iter()
            .cartesian_product(ordered_rooms.iter())
            .find(|(slot, room)| {
                let verdict = allocation.index.check(course, slot, room);
                if !verdict.room_fits {
                    capacity_rejections += 1;
                }
                if !verdict.students_free {
                    conflict_rejections += 1;
                }
                verdict.is_placeable()
            });

        match placement {
            Some((slot, room)) => {
                allocation.index.commit(course, *slot, room);
                trace!("Course {} placed in room {} at {}", course.id, room.id, slot);
                allocation.assignments.push(Exam {
                    id: next_id,
                    course_id: course.id,
                    slot: *slot,
                    room_id: room.id,
                    student_count: course.roster_size(),
                    status: ExamStatus::Scheduled,
                });
                next_id += 1;
            }
            None => {
                // student conflicts are room-independent, so they win ties
                let reason = if conflict_rejections >= capacity_rejections {
                    UnscheduledReason::StudentConflict
                } else {
                    UnscheduledReason::CapacityExhausted
                };
                debug!(
                    "Course {} unscheduled: {} ({} capacity, {} conflict rejections)",
                    course.id, reason, capacity_rejections, conflict_rejections
                );
                allocation.unscheduled.push(unscheduled(
                    course,
                    reason,
                    capacity_rejections,
                    conflict_rejections,
                ));
            }
        }
    }

    info!(
        "Allocation finished in {:.2?}: {} scheduled, {} unscheduled",
        start_time.elapsed(),
        allocation.assignments.len(),
        allocation.unscheduled.len()
    );
    allocation
}

fn unscheduled(
    course: &Course,
    reason: UnscheduledReason,
    capacity_rejections: usize,
    conflict_rejections: usize,
) -> UnscheduledEntry {
    UnscheduledEntry {
        course_id: course.id,
        reason,
        capacity_rejections,
        conflict_rejections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use std::collections::{HashMap, HashSet};

    fn slot(day: u32, start: u32) -> Slot {
        Slot::new(
            NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(start + 2, 0, 0).unwrap(),
        )
    }

    fn course(id: u32, students: impl IntoIterator<Item = u32>) -> Course {
        Course {
            id,
            code: format!("C{id}"),
            title: format!("Course {id}"),
            department_id: 1,
            semester_id: 1,
            students: students.into_iter().collect(),
        }
    }

    fn room(id: u32, capacity: u32) -> Room {
        Room {
            id,
            name: format!("R{id}"),
            capacity,
        }
    }

    fn assert_invariants(courses: &[Course], rooms: &[Room], allocation: &Allocation) {
        let capacity: HashMap<_, _> = rooms.iter().map(|r| (r.id, r.capacity)).collect();
        let mut load: HashMap<(u32, Slot), u32> = HashMap::new();
        for exam in &allocation.assignments {
            *load.entry((exam.room_id, exam.slot)).or_default() += exam.student_count;
        }
        for ((room_id, _), total) in &load {
            assert!(*total <= capacity[room_id]);
        }

        let rosters: HashMap<_, _> = courses.iter().map(|c| (c.id, &c.students)).collect();
        for (a, b) in allocation.assignments.iter().tuple_combinations() {
            if a.slot.overlaps(&b.slot) {
                assert!(rosters[&a.course_id].is_disjoint(rosters[&b.course_id]));
            }
        }

        let scheduled: HashSet<_> = allocation.assignments.iter().map(|e| e.course_id).collect();
        let unscheduled: HashSet<_> = allocation.unscheduled.iter().map(|u| u.course_id).collect();
        assert!(scheduled.is_disjoint(&unscheduled));
        assert_eq!(scheduled.len() + unscheduled.len(), courses.len());
    }

    #[test]
    fn over_capacity_pair_with_single_slot() {
        let courses = vec![course(1, 0..25), course(2, 100..110)];
        let rooms = vec![room(1, 30)];
        let allocation = allocate(&courses, &[slot(6, 9)], &rooms);
        assert_eq!(allocation.assignments.len(), 1);
        assert_eq!(allocation.assignments[0].course_id, 1);
        assert_eq!(allocation.unscheduled[0].course_id, 2);
        assert_eq!(allocation.unscheduled[0].reason, UnscheduledReason::CapacityExhausted);
        assert_invariants(&courses, &rooms, &allocation);
    }

    #[test]
    fn over_capacity_pair_with_second_slot() {
        let courses = vec![course(1, 0..25), course(2, 100..110)];
        let rooms = vec![room(1, 30)];
        let allocation = allocate(&courses, &[slot(6, 11), slot(6, 9)], &rooms);
        assert!(allocation.unscheduled.is_empty());
        assert_eq!(allocation.assignments[0].slot, slot(6, 9));
        assert_eq!(allocation.assignments[1].slot, slot(6, 11));
        assert_invariants(&courses, &rooms, &allocation);
    }

    #[test]
    fn oversized_course_reports_no_room() {
        let courses = vec![course(1, 0..25)];
        let allocation = allocate(&courses, &[slot(6, 9)], &[room(1, 20)]);
        assert!(allocation.assignments.is_empty());
        assert_eq!(
            allocation.unscheduled[0].reason,
            UnscheduledReason::NoRoomLargeEnough
        );
        assert_eq!(allocation.unscheduled[0].groups(), vec!["no room large enough"]);
    }

    #[test]
    fn shared_student_moves_to_next_slot_or_fails() {
        let courses = vec![course(1, [1, 2, 3]), course(2, [3, 4])];
        let rooms = vec![room(1, 10), room(2, 10)];

        let single = allocate(&courses, &[slot(6, 9)], &rooms);
        assert_eq!(single.assignments.len(), 1);
        assert_eq!(single.unscheduled[0].course_id, 2);
        assert_eq!(single.unscheduled[0].reason, UnscheduledReason::StudentConflict);

        let double = allocate(&courses, &[slot(6, 9), slot(6, 11)], &rooms);
        assert!(double.unscheduled.is_empty());
        assert_eq!(double.assignments[1].slot, slot(6, 11));
        assert_invariants(&courses, &rooms, &double);
    }

    #[test]
    fn smallest_sufficient_room_is_preferred() {
        let courses = vec![course(1, 0..40), course(2, 100..115)];
        let rooms = vec![room(1, 200), room(2, 50), room(3, 20)];
        let allocation = allocate(&courses, &[slot(6, 9)], &rooms);
        let by_course: HashMap<_, _> = allocation
            .assignments
            .iter()
            .map(|e| (e.course_id, e.room_id))
            .collect();
        assert_eq!(by_course[&1], 2);
        assert_eq!(by_course[&2], 3);
    }

    #[test]
    fn empty_roster_takes_first_slot() {
        let courses = vec![course(1, 0..10), course(2, [])];
        let rooms = vec![room(1, 10)];
        let allocation = allocate(&courses, &[slot(6, 9), slot(6, 11)], &rooms);
        let empty = allocation.assignments.iter().find(|e| e.course_id == 2).unwrap();
        assert_eq!(empty.slot, slot(6, 9));
        assert_eq!(empty.student_count, 0);
    }

    #[test]
    fn no_candidates_reports_every_course() {
        let courses = vec![course(1, [1]), course(2, [2])];
        let allocation = allocate(&courses, &[], &[room(1, 10)]);
        assert!(allocation
            .unscheduled
            .iter()
            .all(|u| u.reason == UnscheduledReason::NoCandidateSlots));
        assert_eq!(allocation.unscheduled.len(), 2);
    }

    #[test]
    fn allocation_is_deterministic() {
        let courses: Vec<_> = (0..30)
            .map(|i| course(i, (i * 7..i * 7 + 5 + i % 11).map(|s| s % 60)))
            .collect();
        let rooms = vec![room(1, 12), room(2, 25), room(3, 8)];
        let slots: Vec<_> = (6..9).flat_map(|d| [slot(d, 9), slot(d, 13)]).collect();

        let first = allocate(&courses, &slots, &rooms);
        let second = allocate(&courses, &slots, &rooms);
        assert_eq!(first.assignments, second.assignments);
        assert_eq!(first.unscheduled, second.unscheduled);
        assert_invariants(&courses, &rooms, &first);
    }
}
