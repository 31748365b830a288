//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use attendance_core::domain::{
    ClassSchedule, Course, CourseUpdate, NewCourse, NewUser, Role, Scan, Session, User, UserCredentials,
    UserUpdate,
};
use attendance_core::ports::{DatabaseService, PortError, PortResult};
use chrono::{DateTime, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn has_code(e: &sqlx::Error, wanted: &str) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == wanted)
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    has_code(e, UNIQUE_VIOLATION)
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    has_code(e, FOREIGN_KEY_VIOLATION)
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const USER_COLUMNS: &str = "id, email, first_name, last_name, id_number, role";

#[derive(FromRow)]
struct UserRecord {
    id: Uuid,
    email: String,
    first_name: String,
    last_name: String,
    id_number: Option<String>,
    role: String,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        let role = self
            .role
            .parse::<Role>()
            .map_err(|e| PortError::Unexpected(format!("user {}: {}", self.id, e)))?;
        Ok(User {
            id: self.id,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            id_number: self.id_number,
            role,
        })
    }
}

#[derive(FromRow)]
struct CredentialsRecord {
    #[sqlx(flatten)]
    user: UserRecord,
    hashed_password: String,
}

const COURSE_COLUMNS: &str = "id, code, name, description, lecturer_id, schedules";

/// One element of the `courses.schedules` JSONB array.
#[derive(Serialize, Deserialize)]
struct ScheduleRecord {
    days: Vec<Weekday>,
    start_time: NaiveTime,
    end_time: NaiveTime,
}
impl ScheduleRecord {
    fn from_domain(schedule: &ClassSchedule) -> Self {
        Self {
            days: schedule.days.clone(),
            start_time: schedule.start_time,
            end_time: schedule.end_time,
        }
    }
}

fn schedules_json(schedules: &[ClassSchedule]) -> Json<Vec<ScheduleRecord>> {
    Json(schedules.iter().map(ScheduleRecord::from_domain).collect())
}

#[derive(FromRow)]
struct CourseRecord {
    id: Uuid,
    code: String,
    name: String,
    description: String,
    lecturer_id: Option<Uuid>,
    schedules: Json<Vec<ScheduleRecord>>,
}
impl CourseRecord {
    fn to_domain(self) -> Course {
        Course {
            id: self.id,
            code: self.code,
            name: self.name,
            description: self.description,
            lecturer_id: self.lecturer_id,
            schedules: self
                .schedules
                .0
                .into_iter()
                .map(|r| ClassSchedule {
                    days: r.days,
                    start_time: r.start_time,
                    end_time: r.end_time,
                })
                .collect(),
        }
    }
}

const SESSION_COLUMNS: &str = "id, course_id, created_by, generated_at, expires_at";

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    course_id: Uuid,
    created_by: Uuid,
    generated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}
impl SessionRecord {
    fn to_domain(self) -> Session {
        Session {
            id: self.id,
            course_id: self.course_id,
            created_by: self.created_by,
            generated_at: self.generated_at,
            expires_at: self.expires_at,
        }
    }
}

#[derive(FromRow)]
struct ScanRecord {
    id: Uuid,
    session_id: Uuid,
    student_id: Uuid,
    scanned_at: DateTime<Utc>,
}
impl ScanRecord {
    fn to_domain(self) -> Scan {
        Scan {
            id: self.id,
            session_id: self.session_id,
            student_id: self.student_id,
            scanned_at: self.scanned_at,
        }
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user(&self, new_user: NewUser, hashed_password: &str) -> PortResult<User> {
        let email = new_user.email.trim().to_lowercase();
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "INSERT INTO users (id, email, first_name, last_name, id_number, role, hashed_password) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&email)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(&new_user.id_number)
        .bind(new_user.role.as_str())
        .bind(hashed_password)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::Conflict(format!("email {} is already registered", email))
            } else {
                unexpected(e)
            }
        })?;
        record.to_domain()
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?
            .to_domain()
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let email = email.trim().to_lowercase();
        let record = sqlx::query_as::<_, CredentialsRecord>(&format!(
            "SELECT {}, hashed_password FROM users WHERE email = $1",
            USER_COLUMNS
        ))
        .bind(&email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))?;

        Ok(UserCredentials {
            user: record.user.to_domain()?,
            hashed_password: record.hashed_password,
        })
    }

    async fn list_users(&self) -> PortResult<Vec<User>> {
        sqlx::query_as::<_, UserRecord>(&format!("SELECT {} FROM users ORDER BY email", USER_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?
            .into_iter()
            .map(UserRecord::to_domain)
            .collect()
    }

    async fn update_user(
        &self,
        user_id: Uuid,
        update: UserUpdate,
        hashed_password: Option<&str>,
    ) -> PortResult<User> {
        let email = update.email.trim().to_lowercase();
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "UPDATE users SET email = $2, first_name = $3, last_name = $4, id_number = $5, role = $6, \
             hashed_password = COALESCE($7, hashed_password) WHERE id = $1 RETURNING {}",
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(&email)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.id_number)
        .bind(update.role.as_str())
        .bind(hashed_password)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::Conflict(format!("email {} is already registered", email))
            } else {
                unexpected(e)
            }
        })?
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        record.to_domain()
    }

    async fn delete_user(&self, user_id: Uuid) -> PortResult<()> {
        // Enrollments and logins cascade, taught courses are set to NULL, and
        // sessions or scans referencing the user restrict the delete.
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    PortError::Conflict(format!("user {} has attendance history and cannot be deleted", user_id))
                } else {
                    unexpected(e)
                }
            })?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        Ok(())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str, now: DateTime<Utc>) -> PortResult<Uuid> {
        let user_id: Option<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > $2")
                .bind(session_id)
                .bind(now)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        user_id.ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn create_course(&self, new_course: NewCourse) -> PortResult<Course> {
        let code = new_course.code.trim().to_uppercase();
        let record = sqlx::query_as::<_, CourseRecord>(&format!(
            "INSERT INTO courses (id, code, name, description, lecturer_id, schedules) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            COURSE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&code)
        .bind(&new_course.name)
        .bind(&new_course.description)
        .bind(new_course.lecturer_id)
        .bind(schedules_json(&new_course.schedules))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::Conflict(format!("course code {} already exists", code))
            } else {
                unexpected(e)
            }
        })?;
        Ok(record.to_domain())
    }

    async fn get_course(&self, course_id: Uuid) -> PortResult<Course> {
        let record = sqlx::query_as::<_, CourseRecord>(&format!(
            "SELECT {} FROM courses WHERE id = $1",
            COURSE_COLUMNS
        ))
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))?;
        Ok(record.to_domain())
    }

    async fn list_courses(&self) -> PortResult<Vec<Course>> {
        let records = sqlx::query_as::<_, CourseRecord>(&format!(
            "SELECT {} FROM courses ORDER BY code",
            COURSE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(CourseRecord::to_domain).collect())
    }

    async fn set_course_lecturer(&self, course_id: Uuid, lecturer_id: Option<Uuid>) -> PortResult<Course> {
        let record = sqlx::query_as::<_, CourseRecord>(&format!(
            "UPDATE courses SET lecturer_id = $2 WHERE id = $1 RETURNING {}",
            COURSE_COLUMNS
        ))
        .bind(course_id)
        .bind(lecturer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))?;
        Ok(record.to_domain())
    }

    async fn update_course(&self, course_id: Uuid, update: CourseUpdate) -> PortResult<Course> {
        let code = update.code.trim().to_uppercase();
        let record = sqlx::query_as::<_, CourseRecord>(&format!(
            "UPDATE courses SET code = $2, name = $3, description = $4, lecturer_id = $5, schedules = $6 \
             WHERE id = $1 RETURNING {}",
            COURSE_COLUMNS
        ))
        .bind(course_id)
        .bind(&code)
        .bind(&update.name)
        .bind(&update.description)
        .bind(update.lecturer_id)
        .bind(schedules_json(&update.schedules))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::Conflict(format!("course code {} already exists", code))
            } else {
                unexpected(e)
            }
        })?
        .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))?;
        Ok(record.to_domain())
    }

    async fn delete_course(&self, course_id: Uuid) -> PortResult<()> {
        // The roster cascades; issued sessions restrict the delete.
        let result = sqlx::query("DELETE FROM courses WHERE id = $1")
            .bind(course_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    PortError::Conflict(format!(
                        "course {} has attendance sessions and cannot be deleted",
                        course_id
                    ))
                } else {
                    unexpected(e)
                }
            })?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Course {} not found", course_id)));
        }
        Ok(())
    }

    async fn enroll_student(&self, course_id: Uuid, student_id: Uuid) -> PortResult<()> {
        self.get_course(course_id).await?;
        self.get_user(student_id).await?;
        sqlx::query(
            "INSERT INTO enrollments (course_id, student_id) VALUES ($1, $2) \
             ON CONFLICT (course_id, student_id) DO NOTHING",
        )
        .bind(course_id)
        .bind(student_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn unenroll_student(&self, course_id: Uuid, student_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM enrollments WHERE course_id = $1 AND student_id = $2")
            .bind(course_id)
            .bind(student_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Student {} is not enrolled in course {}",
                student_id, course_id
            )));
        }
        Ok(())
    }

    async fn is_enrolled(&self, course_id: Uuid, student_id: Uuid) -> PortResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM enrollments WHERE course_id = $1 AND student_id = $2)",
        )
        .bind(course_id)
        .bind(student_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)
    }

    async fn get_roster(&self, course_id: Uuid) -> PortResult<Vec<User>> {
        self.get_course(course_id).await?;
        sqlx::query_as::<_, UserRecord>(
            "SELECT u.id, u.email, u.first_name, u.last_name, u.id_number, u.role \
             FROM enrollments e JOIN users u ON u.id = e.student_id \
             WHERE e.course_id = $1",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?
        .into_iter()
        .map(UserRecord::to_domain)
        .collect()
    }

    async fn find_active_session(&self, course_id: Uuid, now: DateTime<Utc>) -> PortResult<Option<Session>> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM attendance_sessions WHERE course_id = $1 AND expires_at >= $2 \
             ORDER BY generated_at DESC, id DESC LIMIT 1",
            SESSION_COLUMNS
        ))
        .bind(course_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(SessionRecord::to_domain))
    }

    async fn create_session_if_absent(
        &self,
        candidate: Session,
        now: DateTime<Utc>,
    ) -> PortResult<(Session, bool)> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // Serializes issuers of the same course until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(candidate.course_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        let course_exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM courses WHERE id = $1)")
            .bind(candidate.course_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(unexpected)?;
        if !course_exists {
            return Err(PortError::NotFound(format!("Course {} not found", candidate.course_id)));
        }

        let existing = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM attendance_sessions WHERE course_id = $1 AND expires_at >= $2 \
             ORDER BY generated_at DESC, id DESC LIMIT 1",
            SESSION_COLUMNS
        ))
        .bind(candidate.course_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;

        if let Some(existing) = existing {
            tx.commit().await.map_err(unexpected)?;
            return Ok((existing.to_domain(), false));
        }

        let inserted = sqlx::query_as::<_, SessionRecord>(&format!(
            "INSERT INTO attendance_sessions (id, course_id, created_by, generated_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(candidate.id)
        .bind(candidate.course_id)
        .bind(candidate.created_by)
        .bind(candidate.generated_at)
        .bind(candidate.expires_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;

        Ok((inserted.to_domain(), true))
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM attendance_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        Ok(record.to_domain())
    }

    async fn list_sessions_for_course(&self, course_id: Uuid) -> PortResult<Vec<Session>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM attendance_sessions WHERE course_id = $1 ORDER BY generated_at ASC, id ASC",
            SESSION_COLUMNS
        ))
        .bind(course_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(SessionRecord::to_domain).collect())
    }

    async fn insert_scan(&self, scan: Scan) -> PortResult<Scan> {
        // The unique constraint decides; a conflicting insert returns no row.
        let inserted = sqlx::query_as::<_, ScanRecord>(
            "INSERT INTO scans (id, session_id, student_id, scanned_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (session_id, student_id) DO NOTHING \
             RETURNING id, session_id, student_id, scanned_at",
        )
        .bind(scan.id)
        .bind(scan.session_id)
        .bind(scan.student_id)
        .bind(scan.scanned_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        if let Some(record) = inserted {
            return Ok(record.to_domain());
        }

        let scanned_at: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT scanned_at FROM scans WHERE session_id = $1 AND student_id = $2")
                .bind(scan.session_id)
                .bind(scan.student_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unexpected)?;
        Err(PortError::DuplicateScan {
            scanned_at: scanned_at.unwrap_or(scan.scanned_at),
        })
    }

    async fn list_scans_for_sessions(&self, session_ids: &[Uuid]) -> PortResult<Vec<Scan>> {
        if session_ids.is_empty() {
            return Ok(Vec::new());
        }
        let records = sqlx::query_as::<_, ScanRecord>(
            "SELECT id, session_id, student_id, scanned_at FROM scans \
             WHERE session_id = ANY($1) ORDER BY scanned_at ASC, id ASC",
        )
        .bind(session_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(ScanRecord::to_domain).collect())
    }
}
