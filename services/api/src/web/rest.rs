//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the attendance endpoints and the master
//! definition of the OpenAPI document.

use crate::error::{invalid_input, ApiError, ErrorBody};
use crate::web::{admin, auth, middleware::CurrentUser, state::AppState};
use attendance_core::{
    access::{ensure_can_view_course, ensure_role},
    countdown,
    domain::{Role, SessionRecord},
    report::{format_session_header, AttendanceReport},
    IssuedSession, PortError,
};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::me_handler,
        admin::create_user_handler,
        admin::list_users_handler,
        admin::update_user_handler,
        admin::delete_user_handler,
        admin::create_course_handler,
        admin::list_courses_handler,
        admin::update_course_handler,
        admin::delete_course_handler,
        admin::assign_lecturer_handler,
        admin::enroll_students_handler,
        admin::unenroll_student_handler,
        admin::roster_handler,
        generate_session_handler,
        active_session_handler,
        list_session_records_handler,
        submit_scan_handler,
        submit_course_scan_handler,
        report_handler,
        report_csv_handler,
    ),
    components(
        schemas(
            ErrorBody,
            auth::LoginRequest,
            auth::LoginResponse,
            auth::UserResponse,
            admin::CreateUserRequest,
            admin::UpdateUserRequest,
            admin::ScheduleBody,
            admin::CourseRequest,
            admin::AssignLecturerRequest,
            admin::EnrollRequest,
            admin::EnrollResponse,
            admin::CourseResponse,
            SessionResponse,
            ScanRequest,
            ScanResponse,
            ScanRecordResponse,
            SessionRecordResponse,
            ReportColumnResponse,
            ReportRowResponse,
            ReportResponse,
        )
    ),
    tags(
        (name = "QR Attendance API", description = "Session issuing, scan recording and attendance reports.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A session as shown on the lecturer's screen.
#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub session_id: Uuid,
    pub course_id: Uuid,
    pub course_code: String,
    pub course_name: String,
    /// The string to render as a QR code.
    pub qr_payload: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Countdown text, e.g. `"59 minutes"`.
    pub expires_in: String,
    /// `true` when the still-open session was returned instead of a new one.
    pub reused: bool,
}

impl SessionResponse {
    fn new(issued: IssuedSession, now: DateTime<Utc>) -> Self {
        Self {
            session_id: issued.session.id,
            course_id: issued.course.id,
            course_code: issued.course.code,
            course_name: issued.course.name,
            qr_payload: issued.payload,
            generated_at: issued.session.generated_at,
            expires_at: issued.session.expires_at,
            expires_in: countdown::describe(issued.session.expires_at, now),
            reused: issued.reused,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct ScanRequest {
    /// The exact string decoded from the QR code.
    pub qr_payload: String,
}

#[derive(Serialize, ToSchema)]
pub struct ScanResponse {
    pub success: bool,
    pub message: String,
    pub session_id: Option<Uuid>,
    /// When the student's attendance was recorded. For a repeat scan this is
    /// the time of the original scan.
    pub scanned_at: DateTime<Utc>,
    pub already_recorded: bool,
}

#[derive(Serialize, ToSchema)]
pub struct ScanRecordResponse {
    pub scan_id: Uuid,
    pub student_id: Uuid,
    pub scanned_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct SessionRecordResponse {
    pub session_id: Uuid,
    pub course_id: Uuid,
    pub created_by: Uuid,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Whether scans are still accepted right now.
    pub active: bool,
    pub scans: Vec<ScanRecordResponse>,
}

impl SessionRecordResponse {
    fn new(record: SessionRecord, now: DateTime<Utc>) -> Self {
        Self {
            session_id: record.session.id,
            course_id: record.session.course_id,
            created_by: record.session.created_by,
            generated_at: record.session.generated_at,
            expires_at: record.session.expires_at,
            active: record.session.is_open_at(now),
            scans: record
                .scans
                .into_iter()
                .map(|scan| ScanRecordResponse {
                    scan_id: scan.id,
                    student_id: scan.student_id,
                    scanned_at: scan.scanned_at,
                })
                .collect(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ReportColumnResponse {
    pub session_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// `generated_at` in the display offset, as in the CSV header.
    pub label: String,
}

#[derive(Serialize, ToSchema)]
pub struct ReportRowResponse {
    pub student_id: Uuid,
    pub id_number: Option<String>,
    pub student_name: String,
    /// `Present` or `Absent`, one per column.
    pub statuses: Vec<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ReportResponse {
    pub course_id: Uuid,
    pub course_code: String,
    pub course_name: String,
    pub columns: Vec<ReportColumnResponse>,
    pub rows: Vec<ReportRowResponse>,
}

impl ReportResponse {
    fn new(report: AttendanceReport, state: &AppState) -> Self {
        let offset = state.config.display_offset;
        Self {
            course_id: report.course_id,
            course_code: report.course_code,
            course_name: report.course_name,
            columns: report
                .columns
                .into_iter()
                .map(|c| ReportColumnResponse {
                    session_id: c.session_id,
                    label: format_session_header(c.generated_at, offset),
                    generated_at: c.generated_at,
                })
                .collect(),
            rows: report
                .rows
                .into_iter()
                .map(|r| ReportRowResponse {
                    student_name: r.display_name(),
                    student_id: r.student_id,
                    id_number: r.id_number,
                    statuses: r.statuses.iter().map(|s| s.as_str().to_string()).collect(),
                })
                .collect(),
        }
    }
}

#[derive(Deserialize, IntoParams)]
pub struct SessionRecordsQuery {
    /// Restrict the listing to one session of the course.
    pub session_id: Option<Uuid>,
}

#[derive(Deserialize, IntoParams)]
pub struct ReportQuery {
    /// Comma-separated session ids; all of the course's sessions when absent.
    pub session_ids: Option<String>,
}

impl ReportQuery {
    fn parse_ids(&self) -> Result<Option<Vec<Uuid>>, ApiError> {
        let Some(raw) = self.session_ids.as_deref() else {
            return Ok(None);
        };
        raw.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                Uuid::parse_str(part).map_err(|_| invalid_input(format!("'{}' is not a session id", part)))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health_handler() -> &'static str {
    "ok"
}

/// Generate the attendance QR code for a course.
///
/// Returns the session that is still open if there is one, so refreshing the
/// lecturer's screen never invalidates a code students are already scanning.
#[utoipa::path(
    post,
    path = "/courses/{course_id}/sessions",
    params(("course_id" = Uuid, Path, description = "Course id")),
    responses(
        (status = 201, description = "New session issued", body = SessionResponse),
        (status = 200, description = "Open session returned", body = SessionResponse),
        (status = 403, description = "Not the course's lecturer", body = ErrorBody),
        (status = 404, description = "Unknown course", body = ErrorBody)
    )
)]
pub async fn generate_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let issued = state.issuer.create_session(course_id, user.id).await?;
    let status = if issued.reused {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(SessionResponse::new(issued, state.clock.now()))))
}

/// The course's currently open session.
#[utoipa::path(
    get,
    path = "/courses/{course_id}/sessions/active",
    params(("course_id" = Uuid, Path, description = "Course id")),
    responses(
        (status = 200, description = "Open session", body = SessionResponse),
        (status = 403, description = "Not the course's lecturer", body = ErrorBody),
        (status = 404, description = "No open session", body = ErrorBody)
    )
)]
pub async fn active_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let issued = state
        .issuer
        .active_session(course_id, user.id)
        .await?
        .ok_or_else(|| PortError::NotFound(format!("No open session for course {}", course_id)))?;
    Ok(Json(SessionResponse::new(issued, state.clock.now())))
}

/// Sessions issued for a course, oldest first, each with its scans.
#[utoipa::path(
    get,
    path = "/courses/{course_id}/sessions",
    params(("course_id" = Uuid, Path, description = "Course id"), SessionRecordsQuery),
    responses(
        (status = 200, description = "Session records", body = [SessionRecordResponse]),
        (status = 403, description = "Not allowed to view the course", body = ErrorBody),
        (status = 404, description = "Unknown course or session", body = ErrorBody)
    )
)]
pub async fn list_session_records_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
    Query(query): Query<SessionRecordsQuery>,
) -> Result<Json<Vec<SessionRecordResponse>>, ApiError> {
    let course = state.db.get_course(course_id).await?;
    ensure_can_view_course(&course, &user)?;

    let records = state.reports.fetch_session_records(course.id, query.session_id).await?;
    let now = state.clock.now();
    Ok(Json(
        records
            .into_iter()
            .map(|r| SessionRecordResponse::new(r, now))
            .collect(),
    ))
}

async fn record_scan(
    state: &AppState,
    user: &attendance_core::User,
    req: ScanRequest,
    expected_course: Option<Uuid>,
) -> Result<Json<ScanResponse>, ApiError> {
    ensure_role(user, Role::Student)?;

    match state
        .recorder
        .record_scan(&req.qr_payload, user.id, expected_course)
        .await
    {
        Ok(result) => Ok(Json(ScanResponse {
            success: true,
            message: format!("Attendance recorded for {}", result.course_code),
            session_id: Some(result.session.id),
            scanned_at: result.scan.scanned_at,
            already_recorded: false,
        })),
        // A repeat scan is not a failure for the student.
        Err(err @ PortError::DuplicateScan { scanned_at }) => {
            info!("Student {} scanned again: {}", user.id, err);
            Ok(Json(ScanResponse {
                success: true,
                message: err.to_string(),
                session_id: None,
                scanned_at,
                already_recorded: true,
            }))
        }
        Err(e) => Err(e.into()),
    }
}

/// Submit a scanned QR payload.
#[utoipa::path(
    post,
    path = "/scans",
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Attendance recorded, or already on record", body = ScanResponse),
        (status = 400, description = "Invalid QR code", body = ErrorBody),
        (status = 403, description = "Not enrolled in the course", body = ErrorBody),
        (status = 410, description = "Code expired", body = ErrorBody)
    )
)]
pub async fn submit_scan_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, ApiError> {
    record_scan(&state, &user, req, None).await
}

/// Submit a scanned QR payload from a course's page.
///
/// A code issued for any other course is rejected as invalid.
#[utoipa::path(
    post,
    path = "/courses/{course_id}/scans",
    params(("course_id" = Uuid, Path, description = "Course id")),
    request_body = ScanRequest,
    responses(
        (status = 200, description = "Attendance recorded, or already on record", body = ScanResponse),
        (status = 400, description = "Invalid QR code or code for another course", body = ErrorBody),
        (status = 403, description = "Not enrolled in the course", body = ErrorBody),
        (status = 410, description = "Code expired", body = ErrorBody)
    )
)]
pub async fn submit_course_scan_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, ApiError> {
    record_scan(&state, &user, req, Some(course_id)).await
}

async fn load_report(
    state: &AppState,
    user: &attendance_core::User,
    course_id: Uuid,
    query: &ReportQuery,
) -> Result<AttendanceReport, ApiError> {
    let course = state.db.get_course(course_id).await?;
    ensure_can_view_course(&course, user)?;
    let session_ids = query.parse_ids()?;
    Ok(state.reports.build(course.id, session_ids.as_deref()).await?)
}

/// The attendance grid for a course.
#[utoipa::path(
    get,
    path = "/courses/{course_id}/report",
    params(("course_id" = Uuid, Path, description = "Course id"), ReportQuery),
    responses(
        (status = 200, description = "Attendance report", body = ReportResponse),
        (status = 403, description = "Not allowed to view the course", body = ErrorBody),
        (status = 404, description = "Unknown course or session", body = ErrorBody)
    )
)]
pub async fn report_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<ReportResponse>, ApiError> {
    let report = load_report(&state, &user, course_id, &query).await?;
    Ok(Json(ReportResponse::new(report, &state)))
}

/// The attendance grid as a CSV download.
#[utoipa::path(
    get,
    path = "/courses/{course_id}/report.csv",
    params(("course_id" = Uuid, Path, description = "Course id"), ReportQuery),
    responses(
        (status = 200, description = "CSV file", content_type = "text/csv"),
        (status = 403, description = "Not allowed to view the course", body = ErrorBody),
        (status = 404, description = "Unknown course or session", body = ErrorBody)
    )
)]
pub async fn report_csv_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let report = load_report(&state, &user, course_id, &query).await?;
    let body = report.to_csv_string(state.config.display_offset)?;
    let disposition = format!("attachment; filename=\"{}\"", report.file_name(state.clock.now()));
    info!(
        "Exported {} report: {} students, {} sessions",
        report.course_code,
        report.rows.len(),
        report.columns.len()
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}
