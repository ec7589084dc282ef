use crate::allocator;
use crate::config::Config;
use crate::data::{
    Course, CourseId, Exam, ExamId, ExamStatus, Room, RoomId, RunId, RunStatus, Slot, Student,
    TimetableRun, UnscheduledReason,
};
use crate::error::{ApiResponse, AppError};
use crate::occupancy::{self, DashboardCounts, RoomOccupancy};
use crate::slots::{self, SlotConfig};
use crate::store::Store;
use crate::timetable::{LifecycleError, Timetable};
use axum::extract::{FromRequest, FromRequestParts, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::{Local, NaiveDate, NaiveTime};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::RwLock;

/// JSON body whose rejection is reported through `AppError`.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Query string whose rejection is reported through `AppError`.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Path segment whose rejection is reported through `AppError`.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RwLock<Store>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Store, config: Config) -> Self {
        Self {
            store: Arc::new(RwLock::new(store)),
            config: Arc::new(config),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CourseRef {
    pub id: CourseId,
    pub code: String,
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct GroupRef {
    pub course: CourseRef,
}

#[derive(Debug, Serialize)]
pub struct RoomRef {
    pub id: RoomId,
    pub name: String,
}

/// An exam as the exam list and calendar render it.
#[derive(Debug, Serialize)]
pub struct ExamView {
    pub id: ExamId,
    pub group: GroupRef,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub status: ExamStatus,
    pub room: RoomRef,
    pub student_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnscheduledView {
    pub course_id: CourseId,
    pub groups: Vec<String>,
    pub reason: UnscheduledReason,
}

#[derive(Debug, Serialize)]
pub struct ScheduleView {
    pub run: TimetableRun,
    pub exams: Vec<ExamView>,
    pub unscheduled: Vec<UnscheduledView>,
}

fn exam_view(timetable: &Timetable, exam: &Exam) -> ExamView {
    let course = timetable.courses().get(&exam.course_id);
    let room = timetable.rooms().get(&exam.room_id);
    ExamView {
        id: exam.id,
        group: GroupRef {
            course: CourseRef {
                id: exam.course_id,
                code: course.map(|c| c.code.clone()).unwrap_or_default(),
                title: course.map(|c| c.title.clone()).unwrap_or_default(),
            },
        },
        date: exam.slot.date,
        start_time: exam.slot.start_time,
        end_time: exam.slot.end_time,
        status: exam.status,
        room: RoomRef {
            id: exam.room_id,
            name: room.map(|r| r.name.clone()).unwrap_or_default(),
        },
        student_count: exam.student_count,
    }
}

impl From<&Timetable> for ScheduleView {
    fn from(timetable: &Timetable) -> Self {
        Self {
            run: timetable.run().clone(),
            exams: timetable
                .exams()
                .map(|e| exam_view(timetable, e))
                .collect(),
            unscheduled: timetable
                .unscheduled()
                .iter()
                .map(|u| UnscheduledView {
                    course_id: u.course_id,
                    groups: u.groups(),
                    reason: u.reason,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RunQuery {
    pub run_id: Option<RunId>,
}

fn pick_run(store: &Store, run_id: Option<RunId>) -> Result<&Timetable, AppError> {
    let found = match run_id {
        Some(id) => store.run(id),
        None => store.latest_run(),
    };
    found.ok_or(AppError::RunNotFound(run_id))
}

fn pick_run_mut(store: &mut Store, run_id: Option<RunId>) -> Result<&mut Timetable, AppError> {
    let found = match run_id {
        Some(id) => store.run_mut(id),
        None => store.latest_run_mut(),
    };
    found.ok_or(AppError::RunNotFound(run_id))
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub course_ids: Vec<CourseId>,
    pub room_ids: Option<Vec<RoomId>>,
    #[serde(default)]
    pub academic_year: String,
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub location: String,
    pub generated_by: Option<String>,
    pub slot_config: Option<SlotConfig>,
}

async fn generate_exam_schedule(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<GenerateRequest>,
) -> Result<Json<ApiResponse<ScheduleView>>, AppError> {
    let slot_config = request
        .slot_config
        .unwrap_or_else(|| state.config.slots.clone());
    let grid = slots::generate_slots(request.start_date, request.end_date, &slot_config)?;
    let (courses, rooms) = {
        let store = state.store.read().await;
        (
            store.select_courses(&request.course_ids)?,
            store.select_rooms(request.room_ids.as_deref())?,
        )
    };
    let run = TimetableRun::new(request.academic_year, request.term, request.location)
        .with_generated_by(request.generated_by);
    info!(
        "Generating run {} for {}..{}",
        run.id, request.start_date, request.end_date
    );

    // the run only becomes visible once allocation has finished
    let timetable = tokio::task::spawn_blocking(move || {
        let candidates: Vec<Slot> = grid.iter().collect();
        let allocation = allocator::allocate(&courses, &candidates, &rooms);
        Timetable::new(run, allocation, courses, rooms)
    })
    .await?;

    let mut store = state.store.write().await;
    let view = ScheduleView::from(store.insert_run(timetable));
    let message = format!(
        "{} exams scheduled, {} courses unscheduled",
        view.exams.len(),
        view.unscheduled.len()
    );
    Ok(ApiResponse::ok(message, view))
}

#[derive(Debug, Deserialize)]
pub struct SlotsRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub config: Option<SlotConfig>,
}

#[derive(Debug, Serialize)]
pub struct SlotView {
    pub id: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

async fn generate_slots(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<SlotsRequest>,
) -> Result<Json<ApiResponse<BTreeMap<NaiveDate, Vec<SlotView>>>>, AppError> {
    let config = request.config.unwrap_or_else(|| state.config.slots.clone());
    let grid = slots::generate_slots(request.start_date, request.end_date, &config)?;
    let days: BTreeMap<_, _> = grid
        .by_date()
        .into_iter()
        .map(|(date, day_slots)| {
            let views = day_slots
                .into_iter()
                .map(|s| SlotView {
                    id: s.id(),
                    start_time: s.start_time,
                    end_time: s.end_time,
                })
                .collect();
            (date, views)
        })
        .collect();
    let message = format!("{} exam days generated", days.len());
    Ok(ApiResponse::ok(message, days))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTarget {
    pub master_timetable: Option<RunId>,
}

#[derive(Debug, Serialize)]
pub struct RunStatusView {
    pub run_id: RunId,
    pub status: RunStatus,
}

async fn publish(
    State(state): State<AppState>,
    ApiJson(target): ApiJson<RunTarget>,
) -> Result<Json<RunStatusView>, AppError> {
    let mut store = state.store.write().await;
    let timetable = pick_run_mut(&mut store, target.master_timetable)?;
    timetable.publish()?;
    Ok(Json(RunStatusView {
        run_id: timetable.id(),
        status: timetable.status(),
    }))
}

async fn archive(
    State(state): State<AppState>,
    ApiJson(target): ApiJson<RunTarget>,
) -> Result<Json<RunStatusView>, AppError> {
    let mut store = state.store.write().await;
    let timetable = pick_run_mut(&mut store, target.master_timetable)?;
    timetable.archive()?;
    Ok(Json(RunStatusView {
        run_id: timetable.id(),
        status: timetable.status(),
    }))
}

#[derive(Debug, Serialize)]
pub struct TruncateView {
    pub run_id: RunId,
    pub deleted: usize,
}

async fn truncate_all(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RunQuery>,
) -> Result<Json<ApiResponse<TruncateView>>, AppError> {
    let mut store = state.store.write().await;
    let timetable = pick_run_mut(&mut store, query.run_id)?;
    let deleted = timetable.truncate_all()?;
    let view = TruncateView {
        run_id: timetable.id(),
        deleted,
    };
    Ok(ApiResponse::ok(format!("{deleted} exams deleted"), view))
}

async fn list_exams(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RunQuery>,
) -> Result<Json<ApiResponse<ScheduleView>>, AppError> {
    let store = state.store.read().await;
    let view = ScheduleView::from(pick_run(&store, query.run_id)?);
    Ok(ApiResponse::ok(format!("{} exams", view.exams.len()), view))
}

async fn list_runs(State(state): State<AppState>) -> Json<ApiResponse<Vec<TimetableRun>>> {
    let store = state.store.read().await;
    let runs: Vec<_> = store.runs().map(|t| t.run().clone()).collect();
    ApiResponse::ok(format!("{} runs", runs.len()), runs)
}

#[derive(Debug, Deserialize)]
pub struct PlaceRequest {
    pub run_id: Option<RunId>,
    pub course_id: CourseId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room_id: RoomId,
}

fn requested_slot(
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
) -> Result<Slot, AppError> {
    if start_time >= end_time {
        return Err(slots::SlotError::InvalidConfig(format!(
            "slot {start_time}..{end_time} is empty"
        ))
        .into());
    }
    Ok(Slot::new(date, start_time, end_time))
}

async fn place_exam(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PlaceRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ExamView>>), AppError> {
    let slot = requested_slot(request.date, request.start_time, request.end_time)?;
    let mut store = state.store.write().await;
    let timetable = pick_run_mut(&mut store, request.run_id)?;
    let id = timetable.place_one(request.course_id, slot, request.room_id)?;
    let exam = timetable.exam(id).ok_or(LifecycleError::UnknownExam(id))?;
    let view = exam_view(timetable, exam);
    Ok((StatusCode::CREATED, ApiResponse::ok("exam placed", view)))
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub run_id: Option<RunId>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub room_id: RoomId,
}

async fn move_exam(
    State(state): State<AppState>,
    ApiPath(exam_id): ApiPath<ExamId>,
    ApiJson(request): ApiJson<MoveRequest>,
) -> Result<Json<ApiResponse<ExamView>>, AppError> {
    let slot = requested_slot(request.date, request.start_time, request.end_time)?;
    let mut store = state.store.write().await;
    let timetable = pick_run_mut(&mut store, request.run_id)?;
    timetable.reassign(exam_id, slot, request.room_id)?;
    let exam = timetable
        .exam(exam_id)
        .ok_or(LifecycleError::UnknownExam(exam_id))?;
    Ok(ApiResponse::ok("exam moved", exam_view(timetable, exam)))
}

async fn remove_exam(
    State(state): State<AppState>,
    ApiPath(exam_id): ApiPath<ExamId>,
    ApiQuery(query): ApiQuery<RunQuery>,
) -> Result<Json<ApiResponse<ExamView>>, AppError> {
    let mut store = state.store.write().await;
    let timetable = pick_run_mut(&mut store, query.run_id)?;
    let exam = timetable.remove_one(exam_id)?;
    Ok(ApiResponse::ok("exam removed", exam_view(timetable, &exam)))
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub run_id: Option<RunId>,
    pub status: ExamStatus,
}

async fn set_exam_status(
    State(state): State<AppState>,
    ApiPath(exam_id): ApiPath<ExamId>,
    ApiJson(request): ApiJson<StatusRequest>,
) -> Result<Json<ApiResponse<ExamView>>, AppError> {
    let mut store = state.store.write().await;
    let timetable = pick_run_mut(&mut store, request.run_id)?;
    timetable.set_exam_status(exam_id, request.status)?;
    let exam = timetable
        .exam(exam_id)
        .ok_or(LifecycleError::UnknownExam(exam_id))?;
    Ok(ApiResponse::ok("exam status updated", exam_view(timetable, exam)))
}

async fn room_occupancies(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<RunQuery>,
) -> Result<Json<Vec<RoomOccupancy>>, AppError> {
    let store = state.store.read().await;
    let timetable = pick_run(&store, query.run_id)?;
    let exams: Vec<Exam> = timetable.exams().cloned().collect();
    Ok(Json(occupancy::room_occupancies(
        &exams,
        timetable.rooms(),
        timetable.courses(),
    )))
}

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    pub run_id: Option<RunId>,
    pub today: Option<NaiveDate>,
}

async fn dashboard(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<DashboardQuery>,
) -> Result<Json<ApiResponse<DashboardCounts>>, AppError> {
    let today = query.today.unwrap_or_else(|| Local::now().date_naive());
    let store = state.store.read().await;
    // An explicit run must exist; only the implicit pick may come up empty.
    let timetable = match query.run_id {
        Some(id) => Some(store.run(id).ok_or(AppError::RunNotFound(Some(id)))?),
        None => store.active_run(),
    };
    let exams: Vec<Exam> = timetable
        .map(|t| t.exams().cloned().collect())
        .unwrap_or_default();
    Ok(ApiResponse::ok(
        "dashboard",
        occupancy::dashboard(&exams, today),
    ))
}

async fn list_students(State(state): State<AppState>) -> Json<Vec<Student>> {
    Json(state.store.read().await.students().cloned().collect())
}

async fn create_student(
    State(state): State<AppState>,
    ApiJson(student): ApiJson<Student>,
) -> Result<(StatusCode, Json<Student>), AppError> {
    let mut store = state.store.write().await;
    let stored = store.upsert_student(student)?.clone();
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn list_rooms(State(state): State<AppState>) -> Json<Vec<Room>> {
    Json(state.store.read().await.rooms().cloned().collect())
}

async fn create_room(
    State(state): State<AppState>,
    ApiJson(room): ApiJson<Room>,
) -> Result<(StatusCode, Json<Room>), AppError> {
    let mut store = state.store.write().await;
    let stored = store.upsert_room(room)?.clone();
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn list_courses(State(state): State<AppState>) -> Json<Vec<Course>> {
    Json(state.store.read().await.courses().cloned().collect())
}

async fn create_course(
    State(state): State<AppState>,
    ApiJson(course): ApiJson<Course>,
) -> Result<(StatusCode, Json<Course>), AppError> {
    let mut store = state.store.write().await;
    let stored = store.upsert_course(course)?.clone();
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/exams/exams/generate-exam-schedule/",
            post(generate_exam_schedule),
        )
        .route("/api/exams/exams/", get(list_exams))
        .route("/api/exams/exams/publish/", put(publish))
        .route("/api/exams/exams/archive/", put(archive))
        .route("/api/exams/exams/truncate-all/", delete(truncate_all))
        .route("/api/exams/exams/place/", post(place_exam))
        .route("/api/exams/exams/:id/", delete(remove_exam))
        .route("/api/exams/exams/:id/move/", put(move_exam))
        .route("/api/exams/exams/:id/status/", put(set_exam_status))
        .route("/api/exams/runs/", get(list_runs))
        .route("/api/schedules/generate_slots/", post(generate_slots))
        .route("/api/schedules/dashboard/", get(dashboard))
        .route("/api/rooms/occupancies/", get(room_occupancies))
        .route("/api/students/", get(list_students).post(create_student))
        .route("/api/rooms/", get(list_rooms).post(create_room))
        .route("/api/courses/", get(list_courses).post(create_course))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

pub async fn run_server(state: AppState) -> std::io::Result<()> {
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr).await?;

    info!("Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}
