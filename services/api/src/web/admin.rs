//! services/api/src/web/admin.rs
//!
//! Account, course and enrollment management. Everything here except the
//! course listing and the roster is restricted to administrators.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use attendance_core::{
    access::{ensure_can_view_course, ensure_role},
    domain::{ClassSchedule, Course, CourseUpdate, NewCourse, NewUser, Role, User, UserUpdate},
    ports::PortError,
    report::compare_students,
};
use chrono::{NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::{invalid_input, ApiError};
use crate::web::{
    auth::{hash_password, UserResponse},
    middleware::CurrentUser,
    state::AppState,
};

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub id_number: Option<String>,
    /// One of `admin`, `lecturer` or `student`.
    pub role: String,
}

/// Replaces an account's details. The password is kept when omitted.
#[derive(Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub id_number: Option<String>,
    /// One of `admin`, `lecturer` or `student`.
    pub role: String,
    pub password: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct UserFilter {
    /// Only list accounts with this role.
    pub role: Option<String>,
}

/// A weekly meeting slot as sent and returned over the API.
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ScheduleBody {
    /// Day names, e.g. `["Mon", "Wed"]`. Full names are accepted too.
    pub days: Vec<String>,
    /// Local start time, `HH:MM`.
    pub start_time: String,
    /// Local end time, `HH:MM`, after `start_time`.
    pub end_time: String,
}

impl From<&ClassSchedule> for ScheduleBody {
    fn from(schedule: &ClassSchedule) -> Self {
        Self {
            days: schedule.days.iter().map(|d| d.to_string()).collect(),
            start_time: schedule.start_time.format("%H:%M").to_string(),
            end_time: schedule.end_time.format("%H:%M").to_string(),
        }
    }
}

/// The body of both course creation and course edits.
#[derive(Deserialize, ToSchema)]
pub struct CourseRequest {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub lecturer_id: Option<Uuid>,
    /// At least one slot is required.
    #[serde(default)]
    pub schedules: Vec<ScheduleBody>,
}

#[derive(Deserialize, ToSchema)]
pub struct AssignLecturerRequest {
    /// `null` leaves the course without a lecturer.
    pub lecturer_id: Option<Uuid>,
}

#[derive(Deserialize, ToSchema)]
pub struct EnrollRequest {
    pub student_ids: Vec<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct CourseResponse {
    pub course_id: Uuid,
    pub code: String,
    pub name: String,
    pub description: String,
    pub lecturer_id: Option<Uuid>,
    pub schedules: Vec<ScheduleBody>,
}

impl From<Course> for CourseResponse {
    fn from(course: Course) -> Self {
        Self {
            course_id: course.id,
            schedules: course.schedules.iter().map(ScheduleBody::from).collect(),
            code: course.code,
            name: course.name,
            description: course.description,
            lecturer_id: course.lecturer_id,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct EnrollResponse {
    pub course_id: Uuid,
    pub enrolled: usize,
}

//=========================================================================================
// Helpers
//=========================================================================================

fn parse_role(raw: &str) -> Result<Role, ApiError> {
    raw.parse::<Role>().map_err(invalid_input)
}

fn parse_time(raw: &str) -> Result<NaiveTime, ApiError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| invalid_input(format!("'{}' is not a HH:MM time", raw)))
}

fn parse_schedule(body: ScheduleBody) -> Result<ClassSchedule, ApiError> {
    let days = body
        .days
        .iter()
        .map(|d| {
            d.trim()
                .parse::<Weekday>()
                .map_err(|_| invalid_input(format!("unknown day '{}'", d)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    ClassSchedule::new(days, parse_time(&body.start_time)?, parse_time(&body.end_time)?).map_err(invalid_input)
}

/// Validates a create or edit body into the stored course fields.
async fn course_fields(state: &AppState, req: CourseRequest) -> Result<NewCourse, ApiError> {
    if req.code.trim().is_empty() || req.name.trim().is_empty() {
        return Err(invalid_input("course code and name are required"));
    }
    if req.schedules.is_empty() {
        return Err(invalid_input("at least one schedule is required"));
    }
    let schedules = req
        .schedules
        .into_iter()
        .map(parse_schedule)
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(lecturer_id) = req.lecturer_id {
        ensure_user_has_role(state, lecturer_id, Role::Lecturer).await?;
    }
    Ok(NewCourse {
        code: req.code,
        name: req.name,
        description: req.description,
        lecturer_id: req.lecturer_id,
        schedules,
    })
}

/// A role change would orphan whatever the old role ties the account to.
async fn ensure_role_can_change(state: &AppState, user: &User) -> Result<(), ApiError> {
    let courses = state.db.list_courses().await?;
    for course in &courses {
        let tied = match user.role {
            Role::Lecturer => course.lecturer_id == Some(user.id),
            Role::Student => state.db.is_enrolled(course.id, user.id).await?,
            Role::Admin => false,
        };
        if tied {
            return Err(PortError::Conflict(format!(
                "{} {} is still linked to course {}",
                user.role, user.id, course.code
            ))
            .into());
        }
    }
    Ok(())
}

async fn ensure_user_has_role(state: &AppState, user_id: Uuid, role: Role) -> Result<(), ApiError> {
    let user = state.db.get_user(user_id).await?;
    if user.role != role {
        return Err(invalid_input(format!("user {} is not a {}", user_id, role)));
    }
    Ok(())
}

//=========================================================================================
// Users
//=========================================================================================

/// POST /users - Create an account (admin only)
#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = UserResponse),
        (status = 400, description = "Invalid input", body = crate::error::ErrorBody),
        (status = 403, description = "Not an administrator", body = crate::error::ErrorBody),
        (status = 409, description = "Email already registered", body = crate::error::ErrorBody)
    )
)]
pub async fn create_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(admin)): Extension<CurrentUser>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_role(&admin, Role::Admin)?;

    let role = parse_role(&req.role)?;
    if req.email.trim().is_empty() || !req.email.contains('@') {
        return Err(invalid_input("a valid email is required"));
    }
    if req.password.len() < 8 {
        return Err(invalid_input("password must be at least 8 characters"));
    }

    let hashed = hash_password(&req.password)?;
    let user = state
        .db
        .create_user(
            NewUser {
                email: req.email,
                first_name: req.first_name,
                last_name: req.last_name,
                id_number: req.id_number.filter(|n| !n.trim().is_empty()),
                role,
            },
            &hashed,
        )
        .await?;
    info!("Admin {} created {} account {}", admin.id, user.role, user.id);

    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

/// GET /users - List accounts (admin only)
#[utoipa::path(
    get,
    path = "/users",
    params(UserFilter),
    responses(
        (status = 200, description = "Accounts", body = [UserResponse]),
        (status = 403, description = "Not an administrator", body = crate::error::ErrorBody)
    )
)]
pub async fn list_users_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(admin)): Extension<CurrentUser>,
    Query(filter): Query<UserFilter>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    ensure_role(&admin, Role::Admin)?;
    let role = filter.role.as_deref().map(parse_role).transpose()?;

    let users = state.db.list_users().await?;
    Ok(Json(
        users
            .iter()
            .filter(|u| role.map_or(true, |r| u.role == r))
            .map(UserResponse::from)
            .collect(),
    ))
}

/// PUT /users/{user_id} - Edit an account (admin only)
#[utoipa::path(
    put,
    path = "/users/{user_id}",
    params(("user_id" = Uuid, Path, description = "User id")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = UserResponse),
        (status = 400, description = "Invalid input", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown user", body = crate::error::ErrorBody),
        (status = 409, description = "Email taken, or the role is still in use", body = crate::error::ErrorBody)
    )
)]
pub async fn update_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(admin)): Extension<CurrentUser>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    ensure_role(&admin, Role::Admin)?;

    let role = parse_role(&req.role)?;
    if req.email.trim().is_empty() || !req.email.contains('@') {
        return Err(invalid_input("a valid email is required"));
    }
    let hashed = match req.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) if password.len() < 8 => {
            return Err(invalid_input("password must be at least 8 characters"));
        }
        Some(password) => Some(hash_password(password)?),
        None => None,
    };

    let existing = state.db.get_user(user_id).await?;
    if existing.role != role {
        if existing.id == admin.id {
            return Err(invalid_input("administrators cannot change their own role"));
        }
        ensure_role_can_change(&state, &existing).await?;
    }

    let user = state
        .db
        .update_user(
            user_id,
            UserUpdate {
                email: req.email,
                first_name: req.first_name,
                last_name: req.last_name,
                id_number: req.id_number.filter(|n| !n.trim().is_empty()),
                role,
            },
            hashed.as_deref(),
        )
        .await?;
    info!("Admin {} updated account {}", admin.id, user.id);

    Ok(Json(UserResponse::from(&user)))
}

/// DELETE /users/{user_id} - Delete an account (admin only)
///
/// Accounts with attendance history (issued sessions or recorded scans) are
/// kept and the request fails with 409.
#[utoipa::path(
    delete,
    path = "/users/{user_id}",
    params(("user_id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 400, description = "Tried to delete the caller's own account", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown user", body = crate::error::ErrorBody),
        (status = 409, description = "User has attendance history", body = crate::error::ErrorBody)
    )
)]
pub async fn delete_user_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(admin)): Extension<CurrentUser>,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ensure_role(&admin, Role::Admin)?;
    if user_id == admin.id {
        return Err(invalid_input("administrators cannot delete their own account"));
    }
    state.db.delete_user(user_id).await?;
    info!("Admin {} deleted account {}", admin.id, user_id);
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Courses
//=========================================================================================

/// POST /courses - Create a course (admin only)
#[utoipa::path(
    post,
    path = "/courses",
    request_body = CourseRequest,
    responses(
        (status = 201, description = "Course created", body = CourseResponse),
        (status = 400, description = "Invalid input", body = crate::error::ErrorBody),
        (status = 403, description = "Not an administrator", body = crate::error::ErrorBody),
        (status = 409, description = "Course code already taken", body = crate::error::ErrorBody)
    )
)]
pub async fn create_course_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(admin)): Extension<CurrentUser>,
    Json(req): Json<CourseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_role(&admin, Role::Admin)?;
    let new_course = course_fields(&state, req).await?;

    let course = state.db.create_course(new_course).await?;
    info!("Admin {} created course {}", admin.id, course.code);

    Ok((StatusCode::CREATED, Json(CourseResponse::from(course))))
}

/// PUT /courses/{course_id} - Edit a course (admin only)
#[utoipa::path(
    put,
    path = "/courses/{course_id}",
    params(("course_id" = Uuid, Path, description = "Course id")),
    request_body = CourseRequest,
    responses(
        (status = 200, description = "Course updated", body = CourseResponse),
        (status = 400, description = "Invalid input", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown course", body = crate::error::ErrorBody),
        (status = 409, description = "Course code already taken", body = crate::error::ErrorBody)
    )
)]
pub async fn update_course_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(admin)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<CourseRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    ensure_role(&admin, Role::Admin)?;
    let update: CourseUpdate = course_fields(&state, req).await?;

    let course = state.db.update_course(course_id, update).await?;
    info!("Admin {} updated course {}", admin.id, course.code);
    Ok(Json(CourseResponse::from(course)))
}

/// DELETE /courses/{course_id} - Delete a course (admin only)
///
/// Only courses that never had an attendance session can be deleted.
#[utoipa::path(
    delete,
    path = "/courses/{course_id}",
    params(("course_id" = Uuid, Path, description = "Course id")),
    responses(
        (status = 204, description = "Course deleted"),
        (status = 404, description = "Unknown course", body = crate::error::ErrorBody),
        (status = 409, description = "Course has attendance sessions", body = crate::error::ErrorBody)
    )
)]
pub async fn delete_course_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(admin)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    ensure_role(&admin, Role::Admin)?;
    state.db.delete_course(course_id).await?;
    info!("Admin {} deleted course {}", admin.id, course_id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /courses - Courses visible to the caller
///
/// Administrators see every course, lecturers the courses they teach and
/// students the courses they are enrolled in.
#[utoipa::path(
    get,
    path = "/courses",
    responses(
        (status = 200, description = "Courses", body = [CourseResponse])
    )
)]
pub async fn list_courses_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Vec<CourseResponse>>, ApiError> {
    let courses = state.db.list_courses().await?;
    let visible = match user.role {
        Role::Admin => courses,
        Role::Lecturer => courses
            .into_iter()
            .filter(|c| c.lecturer_id == Some(user.id))
            .collect(),
        Role::Student => {
            let mut enrolled = Vec::new();
            for course in courses {
                if state.db.is_enrolled(course.id, user.id).await? {
                    enrolled.push(course);
                }
            }
            enrolled
        }
    };
    Ok(Json(visible.into_iter().map(CourseResponse::from).collect()))
}

/// PUT /courses/{course_id}/lecturer - Assign the course's lecturer (admin only)
#[utoipa::path(
    put,
    path = "/courses/{course_id}/lecturer",
    params(("course_id" = Uuid, Path, description = "Course id")),
    request_body = AssignLecturerRequest,
    responses(
        (status = 200, description = "Lecturer assigned", body = CourseResponse),
        (status = 400, description = "Not a lecturer", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown course", body = crate::error::ErrorBody)
    )
)]
pub async fn assign_lecturer_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(admin)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<AssignLecturerRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    ensure_role(&admin, Role::Admin)?;
    if let Some(lecturer_id) = req.lecturer_id {
        ensure_user_has_role(&state, lecturer_id, Role::Lecturer).await?;
    }
    let course = state.db.set_course_lecturer(course_id, req.lecturer_id).await?;
    info!("Course {} lecturer set to {:?}", course.code, course.lecturer_id);
    Ok(Json(CourseResponse::from(course)))
}

//=========================================================================================
// Enrollment
//=========================================================================================

/// POST /courses/{course_id}/students - Enroll students (admin only)
#[utoipa::path(
    post,
    path = "/courses/{course_id}/students",
    params(("course_id" = Uuid, Path, description = "Course id")),
    request_body = EnrollRequest,
    responses(
        (status = 200, description = "Students enrolled", body = EnrollResponse),
        (status = 400, description = "An id is not a student", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown course or user", body = crate::error::ErrorBody)
    )
)]
pub async fn enroll_students_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(admin)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<EnrollResponse>, ApiError> {
    ensure_role(&admin, Role::Admin)?;
    let course = state.db.get_course(course_id).await?;

    // Validate the whole list before enrolling anyone.
    for student_id in &req.student_ids {
        ensure_user_has_role(&state, *student_id, Role::Student).await?;
    }
    for student_id in &req.student_ids {
        state.db.enroll_student(course.id, *student_id).await?;
    }
    info!("Enrolled {} students in {}", req.student_ids.len(), course.code);

    Ok(Json(EnrollResponse {
        course_id: course.id,
        enrolled: req.student_ids.len(),
    }))
}

/// DELETE /courses/{course_id}/students/{student_id} - Remove a student (admin only)
#[utoipa::path(
    delete,
    path = "/courses/{course_id}/students/{student_id}",
    params(
        ("course_id" = Uuid, Path, description = "Course id"),
        ("student_id" = Uuid, Path, description = "Student id")
    ),
    responses(
        (status = 204, description = "Student removed"),
        (status = 404, description = "Not enrolled", body = crate::error::ErrorBody)
    )
)]
pub async fn unenroll_student_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(admin)): Extension<CurrentUser>,
    Path((course_id, student_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    ensure_role(&admin, Role::Admin)?;
    state.db.unenroll_student(course_id, student_id).await?;
    info!("Removed student {} from course {}", student_id, course_id);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /courses/{course_id}/students - The course roster
#[utoipa::path(
    get,
    path = "/courses/{course_id}/students",
    params(("course_id" = Uuid, Path, description = "Course id")),
    responses(
        (status = 200, description = "Enrolled students, sorted by name", body = [UserResponse]),
        (status = 403, description = "Not the course's lecturer", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown course", body = crate::error::ErrorBody)
    )
)]
pub async fn roster_handler(
    State(state): State<Arc<AppState>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(course_id): Path<Uuid>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let course = state.db.get_course(course_id).await?;
    ensure_can_view_course(&course, &user)?;

    let mut roster = state.db.get_roster(course.id).await?;
    roster.sort_by(compare_students);
    Ok(Json(roster.iter().map(UserResponse::from).collect()))
}
