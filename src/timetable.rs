use crate::allocator::Allocation;
use crate::conflict::ConflictIndex;
use crate::data::{
    Course, CourseId, Exam, ExamId, ExamStatus, Room, RoomId, RunId, RunStatus, Slot,
    TimetableRun, UnscheduledEntry, UnscheduledReason,
};
use log::{info, warn};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("cannot {action} run {run} in state {status}")]
    InvalidState {
        run: RunId,
        status: RunStatus,
        action: &'static str,
    },
    #[error("exam {0} does not exist in this run")]
    UnknownExam(ExamId),
    #[error("course {0} is not part of this run")]
    UnknownCourse(CourseId),
    #[error("room {0} is not part of this run")]
    UnknownRoom(RoomId),
    #[error("course {0} already has an exam in this run")]
    AlreadyPlaced(CourseId),
    #[error("placement rejected: {0}")]
    Rejected(&'static str),
    #[error("exam {exam} cannot go from {from} to {to}")]
    InvalidExamTransition {
        exam: ExamId,
        from: ExamStatus,
        to: ExamStatus,
    },
}

/// One generation run together with the exams it owns.
///
/// The course and room sets are snapshots taken when the run was created; the
/// conflict index always mirrors the seats held by non-cancelled exams.
#[derive(Debug, Clone)]
pub struct Timetable {
    run: TimetableRun,
    exams: BTreeMap<ExamId, Exam>,
    unscheduled: Vec<UnscheduledEntry>,
    index: ConflictIndex,
    courses: HashMap<CourseId, Course>,
    rooms: HashMap<RoomId, Room>,
    next_exam_id: ExamId,
}

impl Timetable {
    pub fn new(
        run: TimetableRun,
        allocation: Allocation,
        courses: Vec<Course>,
        rooms: Vec<Room>,
    ) -> Self {
        let next_exam_id = allocation
            .assignments
            .iter()
            .map(|e| e.id)
            .max()
            .map_or(1, |id| id + 1);
        Self {
            run,
            exams: allocation
                .assignments
                .into_iter()
                .map(|e| (e.id, e))
                .collect(),
            unscheduled: allocation.unscheduled,
            index: allocation.index,
            courses: courses.into_iter().map(|c| (c.id, c)).collect(),
            rooms: rooms.into_iter().map(|r| (r.id, r)).collect(),
            next_exam_id,
        }
    }

    pub fn run(&self) -> &TimetableRun {
        &self.run
    }

    pub fn id(&self) -> RunId {
        self.run.id
    }

    pub fn status(&self) -> RunStatus {
        self.run.status
    }

    pub fn exams(&self) -> impl Iterator<Item = &Exam> {
        self.exams.values()
    }

    pub fn exam(&self, id: ExamId) -> Option<&Exam> {
        self.exams.get(&id)
    }

    pub fn unscheduled(&self) -> &[UnscheduledEntry] {
        &self.unscheduled
    }

    pub fn courses(&self) -> &HashMap<CourseId, Course> {
        &self.courses
    }

    pub fn rooms(&self) -> &HashMap<RoomId, Room> {
        &self.rooms
    }

    fn require(&self, allowed: &[RunStatus], action: &'static str) -> Result<(), LifecycleError> {
        if allowed.contains(&self.run.status) {
            return Ok(());
        }
        warn!(
            "Refusing to {} run {} in state {}",
            action, self.run.id, self.run.status
        );
        Err(LifecycleError::InvalidState {
            run: self.run.id,
            status: self.run.status,
            action,
        })
    }

    pub fn publish(&mut self) -> Result<(), LifecycleError> {
        self.require(&[RunStatus::Draft], "publish")?;
        self.run.status = RunStatus::Published;
        info!("Run {} published with {} exams", self.run.id, self.exams.len());
        Ok(())
    }

    pub fn archive(&mut self) -> Result<(), LifecycleError> {
        self.require(&[RunStatus::Published], "archive")?;
        self.run.status = RunStatus::Archived;
        info!("Run {} archived", self.run.id);
        Ok(())
    }

    /// Deletes every exam of a draft run. The run itself stays as a
    /// tombstone in state DELETED.
    pub fn truncate_all(&mut self) -> Result<usize, LifecycleError> {
        self.require(&[RunStatus::Draft], "truncate")?;
        let removed = self.exams.len();
        self.exams.clear();
        self.unscheduled.clear();
        self.index = ConflictIndex::new();
        self.run.status = RunStatus::Deleted;
        info!("Run {} truncated, {} exams deleted", self.run.id, removed);
        Ok(removed)
    }

    /// Manually places a course's exam, honouring the same capacity and
    /// student invariants as the allocator.
    pub fn place_one(
        &mut self,
        course_id: CourseId,
        slot: Slot,
        room_id: RoomId,
    ) -> Result<ExamId, LifecycleError> {
        self.require(&[RunStatus::Draft], "edit")?;
        if self
            .exams
            .values()
            .any(|e| e.course_id == course_id && e.status.is_occupying())
        {
            return Err(LifecycleError::AlreadyPlaced(course_id));
        }
        let course = self
            .courses
            .get(&course_id)
            .ok_or(LifecycleError::UnknownCourse(course_id))?;
        let room = self
            .rooms
            .get(&room_id)
            .ok_or(LifecycleError::UnknownRoom(room_id))?;

        let verdict = self.index.check(course, &slot, room);
        if !verdict.room_fits {
            return Err(LifecycleError::Rejected("room capacity exceeded"));
        }
        if !verdict.students_free {
            return Err(LifecycleError::Rejected("student already sits an overlapping exam"));
        }

        self.index.commit(course, slot, room);
        let id = self.next_exam_id;
        self.next_exam_id += 1;
        self.exams.insert(
            id,
            Exam {
                id,
                course_id,
                slot,
                room_id,
                student_count: course.roster_size(),
                status: ExamStatus::Scheduled,
            },
        );
        self.unscheduled.retain(|u| u.course_id != course_id);
        info!("Exam {} for course {} placed in room {} at {}", id, course_id, room_id, slot);
        Ok(id)
    }

    /// Removes an exam and releases its seats. A course left without any
    /// exam goes back on the unscheduled list.
    pub fn remove_one(&mut self, exam_id: ExamId) -> Result<Exam, LifecycleError> {
        self.require(&[RunStatus::Draft], "edit")?;
        let exam = self
            .exams
            .remove(&exam_id)
            .ok_or(LifecycleError::UnknownExam(exam_id))?;
        self.release(&exam);
        let still_listed = self.exams.values().any(|e| e.course_id == exam.course_id)
            || self.unscheduled.iter().any(|u| u.course_id == exam.course_id);
        if !still_listed {
            self.unscheduled.push(UnscheduledEntry {
                course_id: exam.course_id,
                reason: UnscheduledReason::RemovedManually,
                capacity_rejections: 0,
                conflict_rejections: 0,
            });
        }
        info!("Exam {} removed from run {}", exam_id, self.run.id);
        Ok(exam)
    }

    /// Moves an exam to another (slot, room). On rejection the exam keeps its
    /// old placement.
    pub fn reassign(
        &mut self,
        exam_id: ExamId,
        slot: Slot,
        room_id: RoomId,
    ) -> Result<(), LifecycleError> {
        self.require(&[RunStatus::Draft], "edit")?;
        let exam = self
            .exams
            .get(&exam_id)
            .cloned()
            .ok_or(LifecycleError::UnknownExam(exam_id))?;
        let course = self
            .courses
            .get(&exam.course_id)
            .ok_or(LifecycleError::UnknownCourse(exam.course_id))?;
        let room = self
            .rooms
            .get(&room_id)
            .ok_or(LifecycleError::UnknownRoom(room_id))?;

        if exam.status.is_occupying() {
            if let Some(old_room) = self.rooms.get(&exam.room_id) {
                self.index.rollback(course, exam.slot, old_room);
            }
        }
        let verdict = self.index.check(course, &slot, room);
        if !verdict.is_placeable() {
            if exam.status.is_occupying() {
                if let Some(old_room) = self.rooms.get(&exam.room_id) {
                    self.index.commit(course, exam.slot, old_room);
                }
            }
            return Err(LifecycleError::Rejected(if verdict.room_fits {
                "student already sits an overlapping exam"
            } else {
                "room capacity exceeded"
            }));
        }
        if exam.status.is_occupying() {
            self.index.commit(course, slot, room);
        }
        if let Some(stored) = self.exams.get_mut(&exam_id) {
            stored.slot = slot;
            stored.room_id = room_id;
        }
        info!("Exam {} moved to room {} at {}", exam_id, room_id, slot);
        Ok(())
    }

    /// Advances an exam's status. Cancelling frees its seats.
    pub fn set_exam_status(
        &mut self,
        exam_id: ExamId,
        status: ExamStatus,
    ) -> Result<(), LifecycleError> {
        self.require(&[RunStatus::Draft, RunStatus::Published], "update exams of")?;
        let exam = self
            .exams
            .get(&exam_id)
            .cloned()
            .ok_or(LifecycleError::UnknownExam(exam_id))?;
        if !exam.status.can_become(status) {
            return Err(LifecycleError::InvalidExamTransition {
                exam: exam_id,
                from: exam.status,
                to: status,
            });
        }
        if !status.is_occupying() {
            self.release(&exam);
        }
        if let Some(stored) = self.exams.get_mut(&exam_id) {
            stored.status = status;
        }
        info!("Exam {} is now {}", exam_id, status);
        Ok(())
    }

    fn release(&mut self, exam: &Exam) {
        if !exam.status.is_occupying() {
            return;
        }
        if let (Some(course), Some(room)) =
            (self.courses.get(&exam.course_id), self.rooms.get(&exam.room_id))
        {
            self.index.rollback(course, exam.slot, room);
        }
    }
}
