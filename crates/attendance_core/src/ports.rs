//! crates/attendance_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or
//! push channels.

use crate::domain::{
    Course, CourseUpdate, NewCourse, NewUser, Scan, ScanEvent, Session, User, UserCredentials, UserUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use std::pin::Pin;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error type for all port and protocol operations.
///
/// The scan-related variants are terminal outcomes: none of them is retried.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// No valid credentials were presented.
    #[error("Unauthorized")]
    Unauthorized,
    /// The caller is authenticated but may not perform the action.
    #[error("Forbidden: {0}")]
    Authorization(String),
    #[error("invalid QR code: {0}")]
    InvalidCode(String),
    #[error("code expired at {expires_at}, ask lecturer to regenerate")]
    Expired { expires_at: DateTime<Utc> },
    #[error("you are not enrolled in this course")]
    NotEnrolled,
    /// Carries the time of the scan that was already on record.
    #[error("you are already marked present for this session")]
    DuplicateScan { scanned_at: DateTime<Utc> },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- User Management ---
    async fn create_user(&self, new_user: NewUser, hashed_password: &str) -> PortResult<User>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn list_users(&self) -> PortResult<Vec<User>>;

    /// Replaces the account's fields, and its password when `hashed_password`
    /// is given. A taken email is a `Conflict`.
    async fn update_user(
        &self,
        user_id: Uuid,
        update: UserUpdate,
        hashed_password: Option<&str>,
    ) -> PortResult<User>;

    /// Removes an account together with its enrollments and login sessions,
    /// and unassigns it from any course it teaches. An account that has
    /// issued sessions or recorded scans is kept for the audit trail and the
    /// call fails with `Conflict`.
    async fn delete_user(&self, user_id: Uuid) -> PortResult<()>;

    // --- Auth Methods ---
    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Resolves a login token to its user, failing with `Unauthorized` when the
    /// token is unknown or expired at `now`.
    async fn validate_auth_session(&self, session_id: &str, now: DateTime<Utc>) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Courses and Enrollment ---
    async fn create_course(&self, new_course: NewCourse) -> PortResult<Course>;

    async fn get_course(&self, course_id: Uuid) -> PortResult<Course>;

    async fn list_courses(&self) -> PortResult<Vec<Course>>;

    async fn set_course_lecturer(&self, course_id: Uuid, lecturer_id: Option<Uuid>) -> PortResult<Course>;

    /// Replaces the course's fields. A taken code is a `Conflict`.
    async fn update_course(&self, course_id: Uuid, update: CourseUpdate) -> PortResult<Course>;

    /// Removes a course and its roster. Fails with `Conflict` once any
    /// attendance session has been issued for it.
    async fn delete_course(&self, course_id: Uuid) -> PortResult<()>;

    /// Adds a student to a course roster. Enrolling twice is a no-op.
    async fn enroll_student(&self, course_id: Uuid, student_id: Uuid) -> PortResult<()>;

    async fn unenroll_student(&self, course_id: Uuid, student_id: Uuid) -> PortResult<()>;

    async fn is_enrolled(&self, course_id: Uuid, student_id: Uuid) -> PortResult<bool>;

    /// The enrolled students of a course, in no particular order.
    async fn get_roster(&self, course_id: Uuid) -> PortResult<Vec<User>>;

    // --- Attendance Sessions ---
    /// Returns the newest session for the course that is still open at `now`.
    async fn find_active_session(&self, course_id: Uuid, now: DateTime<Utc>) -> PortResult<Option<Session>>;

    /// Inserts `candidate` unless its course already has a session open at `now`.
    ///
    /// Returns the stored session and `true` when `candidate` was inserted, or the
    /// already-open session and `false`. The check and the insert happen as one
    /// step from the point of view of concurrent issuers.
    async fn create_session_if_absent(
        &self,
        candidate: Session,
        now: DateTime<Utc>,
    ) -> PortResult<(Session, bool)>;

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session>;

    /// All sessions ever issued for a course, ordered by `generated_at`.
    async fn list_sessions_for_course(&self, course_id: Uuid) -> PortResult<Vec<Session>>;

    // --- Scans ---
    /// Persists a scan. Fails with `DuplicateScan` if the (session, student) pair
    /// already has one; the uniqueness is enforced by the store itself.
    async fn insert_scan(&self, scan: Scan) -> PortResult<Scan>;

    /// Scans for any of the given sessions, ordered by `scanned_at`.
    async fn list_scans_for_sessions(&self, session_ids: &[Uuid]) -> PortResult<Vec<Scan>>;
}

/// A boxed stream of scan events for one session.
pub type ScanEventStream = Pin<Box<dyn Stream<Item = ScanEvent> + Send>>;

/// The single push channel for "a new scan arrived".
pub trait ScanNotifier: Send + Sync {
    /// Fire-and-forget; having no subscribers is not an error.
    fn publish(&self, event: ScanEvent);

    /// Streams every event published for `session_id` after the call.
    fn subscribe(&self, session_id: Uuid) -> ScanEventStream;
}
