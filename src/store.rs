use crate::data::{
    Course, CourseId, Room, RoomId, RunId, RunStatus, Student, StudentId, ValidationError,
};
use crate::timetable::Timetable;
use log::info;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogLoadError {
    #[error("cannot read catalog {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed catalog: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid catalog entry: {0}")]
    Invalid(#[from] ValidationError),
}

/// Seed file layout: students first, since course rosters refer to them.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CatalogSeed {
    pub students: Vec<Student>,
    pub rooms: Vec<Room>,
    pub courses: Vec<Course>,
}

/// Students, rooms and courses known to the service, plus every generated run
/// in creation order.
#[derive(Debug, Default)]
pub struct Store {
    students: BTreeMap<StudentId, Student>,
    rooms: BTreeMap<RoomId, Room>,
    courses: BTreeMap<CourseId, Course>,
    runs: Vec<Timetable>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_seed(&mut self, seed: CatalogSeed) -> Result<(), ValidationError> {
        for student in seed.students {
            self.upsert_student(student)?;
        }
        for room in seed.rooms {
            self.upsert_room(room)?;
        }
        for course in seed.courses {
            self.upsert_course(course)?;
        }
        info!(
            "Catalog holds {} students, {} rooms, {} courses",
            self.students.len(),
            self.rooms.len(),
            self.courses.len()
        );
        Ok(())
    }

    pub fn load_file(&mut self, path: &Path) -> Result<(), CatalogLoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let seed: CatalogSeed = serde_json::from_str(&raw)?;
        self.load_seed(seed)?;
        Ok(())
    }

    pub fn upsert_student(&mut self, student: Student) -> Result<&Student, ValidationError> {
        let student = student.validate()?;
        let id = student.id;
        self.students.insert(id, student);
        Ok(&self.students[&id])
    }

    pub fn upsert_room(&mut self, room: Room) -> Result<&Room, ValidationError> {
        let room = room.validate()?;
        let id = room.id;
        self.rooms.insert(id, room);
        Ok(&self.rooms[&id])
    }

    pub fn upsert_course(&mut self, course: Course) -> Result<&Course, ValidationError> {
        let course = course.validate(|s| self.students.contains_key(&s))?;
        let id = course.id;
        self.courses.insert(id, course);
        Ok(&self.courses[&id])
    }

    pub fn students(&self) -> impl Iterator<Item = &Student> {
        self.students.values()
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn courses(&self) -> impl Iterator<Item = &Course> {
        self.courses.values()
    }

    /// Resolves requested ids to catalog courses, in request order without
    /// duplicates.
    pub fn select_courses(&self, ids: &[CourseId]) -> Result<Vec<Course>, ValidationError> {
        if ids.is_empty() {
            return Err(ValidationError::EmptyCourseList);
        }
        let mut selected: Vec<Course> = Vec::with_capacity(ids.len());
        for id in ids {
            if selected.iter().any(|c| c.id == *id) {
                continue;
            }
            let course = self
                .courses
                .get(id)
                .ok_or(ValidationError::UnknownCourse(*id))?;
            selected.push(course.clone());
        }
        Ok(selected)
    }

    /// Rooms to allocate into; all rooms when `ids` is absent.
    pub fn select_rooms(&self, ids: Option<&[RoomId]>) -> Result<Vec<Room>, ValidationError> {
        match ids {
            None => Ok(self.rooms.values().cloned().collect()),
            Some(ids) => ids
                .iter()
                .map(|id| {
                    self.rooms
                        .get(id)
                        .cloned()
                        .ok_or(ValidationError::UnknownRoom(*id))
                })
                .collect(),
        }
    }

    /// Adds a finished run. Runs are only inserted whole.
    pub fn insert_run(&mut self, timetable: Timetable) -> &Timetable {
        info!(
            "Storing run {} with {} exams",
            timetable.id(),
            timetable.exams().count()
        );
        self.runs.push(timetable);
        &self.runs[self.runs.len() - 1]
    }

    pub fn runs(&self) -> impl Iterator<Item = &Timetable> {
        self.runs.iter()
    }

    pub fn run(&self, id: RunId) -> Option<&Timetable> {
        self.runs.iter().find(|t| t.id() == id)
    }

    pub fn run_mut(&mut self, id: RunId) -> Option<&mut Timetable> {
        self.runs.iter_mut().find(|t| t.id() == id)
    }

    /// The most recently generated run.
    pub fn latest_run(&self) -> Option<&Timetable> {
        self.runs.last()
    }

    pub fn latest_run_mut(&mut self) -> Option<&mut Timetable> {
        self.runs.last_mut()
    }

    /// The newest run whose exams are live: a published run wins over a
    /// draft, deleted and archived runs are skipped.
    pub fn active_run(&self) -> Option<&Timetable> {
        self.runs
            .iter()
            .rev()
            .find(|t| t.status() == RunStatus::Published)
            .or_else(|| {
                self.runs
                    .iter()
                    .rev()
                    .find(|t| t.status() == RunStatus::Draft)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::allocate;
    use crate::data::TimetableRun;
    use std::io::Write;

    fn seed() -> CatalogSeed {
        serde_json::from_str(
            r#"{
                "students": [
                    {"id": 1, "registration_number": "S-001", "department_id": 1},
                    {"id": 2, "registration_number": "S-002", "department_id": 1}
                ],
                "rooms": [{"id": 1, "name": "Hall A", "capacity": 30}],
                "courses": [
                    {"id": 7, "code": "CS101", "title": "Intro", "department_id": 1,
                     "semester_id": 1, "students": [1, 2]}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn seed_loads_in_dependency_order() {
        let mut store = Store::new();
        store.load_seed(seed()).unwrap();
        assert_eq!(store.courses().next().unwrap().roster_size(), 2);
    }

    #[test]
    fn catalog_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"rooms": [{{"id": 4, "name": "Annex", "capacity": 12}}]}}"#
        )
        .unwrap();
        let mut store = Store::new();
        store.load_file(file.path()).unwrap();
        assert_eq!(store.rooms().count(), 1);
    }

    #[test]
    fn course_selection_validates_ids() {
        let mut store = Store::new();
        store.load_seed(seed()).unwrap();
        assert_eq!(store.select_courses(&[]), Err(ValidationError::EmptyCourseList));
        assert_eq!(store.select_courses(&[7, 8]), Err(ValidationError::UnknownCourse(8)));
        assert_eq!(store.select_courses(&[7, 7]).unwrap().len(), 1);
        assert_eq!(store.select_rooms(Some(&[2][..])), Err(ValidationError::UnknownRoom(2)));
    }

    #[test]
    fn active_run_prefers_published() {
        let mut store = Store::new();
        store.load_seed(seed()).unwrap();
        let courses = store.select_courses(&[7]).unwrap();
        let rooms = store.select_rooms(None).unwrap();
        let make = || {
            let allocation = allocate(&courses, &[], &rooms);
            let run = TimetableRun::new("2024".into(), "T1".into(), "Main".into());
            Timetable::new(run, allocation, courses.clone(), rooms.clone())
        };
        let first = store.insert_run(make()).id();
        store.run_mut(first).unwrap().publish().unwrap();
        let second = store.insert_run(make()).id();
        assert_eq!(store.latest_run().unwrap().id(), second);
        assert_eq!(store.active_run().unwrap().id(), first);
    }
}
