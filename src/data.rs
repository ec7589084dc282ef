use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

// Type aliases for clarity
pub type RoomId = u32;
pub type CourseId = u32;
pub type StudentId = u32;
pub type DepartmentId = u32;
pub type SemesterId = u32;
pub type ExamId = u32;
pub type RunId = Uuid;

/// Rejection of a malformed payload at the API boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{entity} {id}: {field} must not be blank")]
    Blank {
        entity: &'static str,
        id: u32,
        field: &'static str,
    },
    #[error("room {0}: capacity must be a positive integer")]
    ZeroCapacity(RoomId),
    #[error("course {course}: student {student} is not registered")]
    UnknownStudent { course: CourseId, student: StudentId },
    #[error("unknown course {0}")]
    UnknownCourse(CourseId),
    #[error("unknown room {0}")]
    UnknownRoom(RoomId),
    #[error("no courses requested")]
    EmptyCourseList,
}

/// A registered student.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Student {
    pub id: StudentId,
    pub registration_number: String,
    pub department_id: DepartmentId,
}

impl Student {
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.registration_number.trim().is_empty() {
            return Err(ValidationError::Blank {
                entity: "student",
                id: self.id,
                field: "registration_number",
            });
        }
        Ok(self)
    }
}

/// Represents a physical room with a given capacity.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub capacity: u32,
}

impl Room {
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.capacity == 0 {
            return Err(ValidationError::ZeroCapacity(self.id));
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::Blank {
                entity: "room",
                id: self.id,
                field: "name",
            });
        }
        Ok(self)
    }
}

/// A course whose exam is to be scheduled. The roster size is the
/// capacity the exam needs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Course {
    pub id: CourseId,
    pub code: String,
    pub title: String,
    pub department_id: DepartmentId,
    pub semester_id: SemesterId,
    #[serde(default)]
    pub students: BTreeSet<StudentId>,
}

impl Course {
    pub fn roster_size(&self) -> u32 {
        u32::try_from(self.students.len()).unwrap_or(u32::MAX)
    }

    /// Checks the payload and that every roster entry is a known student.
    pub fn validate(
        self,
        is_registered: impl Fn(StudentId) -> bool,
    ) -> Result<Self, ValidationError> {
        for (field, value) in [("code", &self.code), ("title", &self.title)] {
            if value.trim().is_empty() {
                return Err(ValidationError::Blank {
                    entity: "course",
                    id: self.id,
                    field,
                });
            }
        }
        if let Some(&student) = self.students.iter().find(|s| !is_registered(**s)) {
            return Err(ValidationError::UnknownStudent {
                course: self.id,
                student,
            });
        }
        Ok(self)
    }
}

/// A candidate exam interval. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub struct Slot {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl Slot {
    pub fn new(date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            date,
            start_time,
            end_time,
        }
    }

    /// Stable identifier derived from date and times, e.g. `2025-01-06T09:00-11:00`.
    pub fn id(&self) -> String {
        format!(
            "{}T{}-{}",
            self.date,
            self.start_time.format("%H:%M"),
            self.end_time.format("%H:%M")
        )
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.date == other.date
            && self.start_time < other.end_time
            && other.start_time < self.end_time
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamStatus {
    Scheduled,
    Ongoing,
    Completed,
    Cancelled,
}

impl ExamStatus {
    pub fn can_become(self, next: ExamStatus) -> bool {
        use ExamStatus::*;
        matches!(
            (self, next),
            (Scheduled, Ongoing) | (Ongoing, Completed) | (Scheduled | Ongoing, Cancelled)
        )
    }

    /// Whether the exam still holds its seats and student intervals.
    pub fn is_occupying(self) -> bool {
        self != ExamStatus::Cancelled
    }
}

impl fmt::Display for ExamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExamStatus::Scheduled => "SCHEDULED",
            ExamStatus::Ongoing => "ONGOING",
            ExamStatus::Completed => "COMPLETED",
            ExamStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Represents a single, scheduled course exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exam {
    pub id: ExamId,
    pub course_id: CourseId,
    pub slot: Slot,
    pub room_id: RoomId,
    pub student_count: u32,
    pub status: ExamStatus,
}

/// Why no (slot, room) pair could be found for a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnscheduledReason {
    NoRoomLargeEnough,
    CapacityExhausted,
    StudentConflict,
    NoCandidateSlots,
    RemovedManually,
}

impl fmt::Display for UnscheduledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnscheduledReason::NoRoomLargeEnough => "no room large enough",
            UnscheduledReason::CapacityExhausted => "capacity exhausted for all rooms in range",
            UnscheduledReason::StudentConflict => "student conflict unavoidable",
            UnscheduledReason::NoCandidateSlots => "no candidate slots or rooms in range",
            UnscheduledReason::RemovedManually => "exam removed by manual edit",
        };
        f.write_str(s)
    }
}

/// A course the allocator could not place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnscheduledEntry {
    pub course_id: CourseId,
    pub reason: UnscheduledReason,
    pub capacity_rejections: usize,
    pub conflict_rejections: usize,
}

impl UnscheduledEntry {
    /// Reason identifiers as reported to the front-end.
    pub fn groups(&self) -> Vec<String> {
        vec![self.reason.to_string()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Draft,
    Published,
    Archived,
    Deleted,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Draft => "DRAFT",
            RunStatus::Published => "PUBLISHED",
            RunStatus::Archived => "ARCHIVED",
            RunStatus::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Metadata of one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimetableRun {
    pub id: RunId,
    pub academic_year: String,
    pub term: String,
    pub location: String,
    pub generated_by: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub status: RunStatus,
}

impl TimetableRun {
    pub fn new(academic_year: String, term: String, location: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            academic_year,
            term,
            location,
            generated_by: None,
            generated_at: Utc::now(),
            status: RunStatus::Draft,
        }
    }

    pub fn with_generated_by(mut self, user: Option<String>) -> Self {
        self.generated_by = user;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(day: u32, start: u32, end: u32) -> Slot {
        Slot::new(
            NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
            NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
        )
    }

    #[test]
    fn slot_overlap_is_same_day_and_half_open() {
        assert!(slot(6, 9, 11).overlaps(&slot(6, 10, 12)));
        assert!(!slot(6, 9, 11).overlaps(&slot(6, 11, 13)));
        assert!(!slot(6, 9, 11).overlaps(&slot(7, 9, 11)));
        assert_eq!(slot(6, 9, 11).id(), "2025-01-06T09:00-11:00");
    }

    #[test]
    fn course_rejects_unregistered_roster_entry() {
        let course = Course {
            id: 1,
            code: "CS101".into(),
            title: "Intro".into(),
            department_id: 1,
            semester_id: 1,
            students: [1, 2].into_iter().collect(),
        };
        let err = course.validate(|s| s == 1).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownStudent {
                course: 1,
                student: 2
            }
        );
    }

    #[test]
    fn room_needs_positive_capacity() {
        let room = Room {
            id: 3,
            name: "Hall".into(),
            capacity: 0,
        };
        assert_eq!(room.validate(), Err(ValidationError::ZeroCapacity(3)));
    }

    #[test]
    fn exam_status_transitions() {
        assert!(ExamStatus::Scheduled.can_become(ExamStatus::Ongoing));
        assert!(ExamStatus::Ongoing.can_become(ExamStatus::Cancelled));
        assert!(!ExamStatus::Completed.can_become(ExamStatus::Cancelled));
        assert!(!ExamStatus::Cancelled.can_become(ExamStatus::Scheduled));
        assert!(!ExamStatus::Scheduled.can_become(ExamStatus::Completed));
    }
}
