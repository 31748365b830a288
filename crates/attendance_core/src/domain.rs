//! crates/attendance_core/src/domain.rs
//!
//! Defines the pure, core data structures for the attendance service.
//! These structs are independent of any database or wire format; the
//! scannable payload lives in `payload.rs` and the api crate owns its DTOs.

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The role an account acts under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Lecturer,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Lecturer => "lecturer",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "lecturer" => Ok(Role::Lecturer),
            "student" => Ok(Role::Student),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Represents an account - used throughout the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// The institutional ID number printed on attendance reports.
    pub id_number: Option<String>,
    pub role: Role,
}

impl User {
    /// `"Last, First"`, the form used on rosters and reports.
    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

// Only used internally for login - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub hashed_password: String,
}

/// The fields an administrator supplies when creating an account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub id_number: Option<String>,
    pub role: Role,
}

/// Replaces every editable field of an account.
#[derive(Debug, Clone)]
pub struct UserUpdate {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub id_number: Option<String>,
    pub role: Role,
}

/// A weekly meeting slot of a course, in the institution's local time.
///
/// Informational only: sessions can be issued at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSchedule {
    /// Sorted Monday first, without repeats.
    pub days: Vec<Weekday>,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl ClassSchedule {
    pub fn new(mut days: Vec<Weekday>, start_time: NaiveTime, end_time: NaiveTime) -> Result<Self, String> {
        if days.is_empty() {
            return Err("a schedule needs at least one day".to_string());
        }
        if start_time >= end_time {
            return Err(format!(
                "schedule start {} must be before its end {}",
                start_time.format("%H:%M"),
                end_time.format("%H:%M")
            ));
        }
        days.sort_by_key(|d| d.num_days_from_monday());
        days.dedup();
        Ok(Self {
            days,
            start_time,
            end_time,
        })
    }
}

/// A course that attendance is taken for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Course {
    pub id: Uuid,
    /// Short unique code, e.g. `CS101`.
    pub code: String,
    pub name: String,
    pub description: String,
    /// The lecturer allowed to issue attendance sessions for this course.
    pub lecturer_id: Option<Uuid>,
    pub schedules: Vec<ClassSchedule>,
}

#[derive(Debug, Clone)]
pub struct NewCourse {
    pub code: String,
    pub name: String,
    pub description: String,
    pub lecturer_id: Option<Uuid>,
    pub schedules: Vec<ClassSchedule>,
}

/// Replaces every editable field of a course.
pub type CourseUpdate = NewCourse;

/// One lecturer-initiated attendance window for a course.
///
/// Sessions are immutable once written. They stay in storage after
/// `expires_at` so reports can still be built from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub course_id: Uuid,
    pub created_by: Uuid,
    pub generated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// A session accepts scans up to and including `expires_at`.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// A single accepted attendance scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    pub id: Uuid,
    pub session_id: Uuid,
    pub student_id: Uuid,
    /// Stamped by the server clock, never by the scanning device.
    pub scanned_at: DateTime<Utc>,
}

/// A session together with the scans recorded against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub session: Session,
    pub scans: Vec<Scan>,
}

/// Published on the notification channel whenever a scan is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    pub session_id: Uuid,
    pub course_id: Uuid,
    pub student_id: Uuid,
    pub scanned_at: DateTime<Utc>,
    /// Number of scans recorded for the session, this one included. `None` when
    /// the count could not be read after the scan was stored.
    pub scan_count: Option<usize>,
}
