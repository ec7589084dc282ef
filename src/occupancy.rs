use crate::data::{Course, CourseId, Exam, ExamId, ExamStatus, Room, RoomId, Slot};
use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseOccupancy {
    pub course_id: CourseId,
    pub exam_id: ExamId,
    pub student_count: u32,
}

/// Who sits in one room during one slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancySummary {
    pub courses: Vec<CourseOccupancy>,
    pub total_students: u32,
    pub room_capacity: u32,
}

impl OccupancySummary {
    pub fn utilization(&self) -> f64 {
        if self.room_capacity == 0 {
            return 0.0;
        }
        f64::from(self.total_students) / f64::from(self.room_capacity)
    }
}

/// Rolls committed exams up per (room, slot). Cancelled exams hold no seats
/// and are left out.
pub fn aggregate(
    exams: &[Exam],
    rooms: &HashMap<RoomId, Room>,
) -> BTreeMap<(RoomId, Slot), OccupancySummary> {
    let mut summaries: BTreeMap<(RoomId, Slot), OccupancySummary> = BTreeMap::new();
    for exam in exams.iter().filter(|e| e.status.is_occupying()) {
        let summary = summaries
            .entry((exam.room_id, exam.slot))
            .or_insert_with(|| OccupancySummary {
                courses: Vec::new(),
                total_students: 0,
                room_capacity: rooms.get(&exam.room_id).map_or(0, |r| r.capacity),
            });
        summary.courses.push(CourseOccupancy {
            course_id: exam.course_id,
            exam_id: exam.id,
            student_count: exam.student_count,
        });
        summary.total_students += exam.student_count;
    }
    summaries
}

#[derive(Debug, Clone, Serialize)]
pub struct ExamOccupancy {
    pub exam_id: ExamId,
    pub course_id: CourseId,
    pub course_code: String,
    pub course_title: String,
    pub student_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleOccupancy {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub total_students: u32,
    pub utilization: f64,
    pub exams: Vec<ExamOccupancy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomOccupancy {
    pub room_id: RoomId,
    pub room_name: String,
    pub room_capacity: u32,
    pub schedules: Vec<ScheduleOccupancy>,
}

/// Nested per-room view of `aggregate`, the shape the occupancy page reads.
pub fn room_occupancies(
    exams: &[Exam],
    rooms: &HashMap<RoomId, Room>,
    courses: &HashMap<CourseId, Course>,
) -> Vec<RoomOccupancy> {
    let mut by_room: BTreeMap<RoomId, RoomOccupancy> = BTreeMap::new();
    for ((room_id, slot), summary) in aggregate(exams, rooms) {
        let entry = by_room.entry(room_id).or_insert_with(|| RoomOccupancy {
            room_id,
            room_name: rooms.get(&room_id).map(|r| r.name.clone()).unwrap_or_default(),
            room_capacity: summary.room_capacity,
            schedules: Vec::new(),
        });
        let utilization = summary.utilization();
        let exams = summary
            .courses
            .into_iter()
            .map(|c| {
                let course = courses.get(&c.course_id);
                ExamOccupancy {
                    exam_id: c.exam_id,
                    course_id: c.course_id,
                    course_code: course.map(|found| found.code.clone()).unwrap_or_default(),
                    course_title: course.map(|found| found.title.clone()).unwrap_or_default(),
                    student_count: c.student_count,
                }
            })
            .collect();
        entry.schedules.push(ScheduleOccupancy {
            date: slot.date,
            start_time: slot.start_time,
            end_time: slot.end_time,
            total_students: summary.total_students,
            utilization,
            exams,
        });
    }
    by_room.into_values().collect()
}

/// Headline counts for the administration dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DashboardCounts {
    pub total_exams: usize,
    pub today_exams: usize,
    pub ongoing_exams: usize,
    pub completed_exams: usize,
    pub upcoming_exams: usize,
    pub cancelled_exams: usize,
}

pub fn dashboard(exams: &[Exam], today: NaiveDate) -> DashboardCounts {
    let mut counts = DashboardCounts {
        total_exams: exams.len(),
        ..DashboardCounts::default()
    };
    for exam in exams {
        match exam.status {
            ExamStatus::Ongoing => counts.ongoing_exams += 1,
            ExamStatus::Completed => counts.completed_exams += 1,
            ExamStatus::Cancelled => counts.cancelled_exams += 1,
            ExamStatus::Scheduled if exam.slot.date > today => counts.upcoming_exams += 1,
            ExamStatus::Scheduled => {}
        }
        if exam.slot.date == today && exam.status.is_occupying() {
            counts.today_exams += 1;
        }
    }
    counts
}
