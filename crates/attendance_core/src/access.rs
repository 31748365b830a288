//! crates/attendance_core/src/access.rs
//!
//! Who may act on a course.

use crate::domain::{Course, Role, User};
use crate::ports::{PortError, PortResult};
use uuid::Uuid;

/// Only the course's assigned lecturer may issue attendance sessions.
pub fn ensure_course_lecturer(course: &Course, user_id: Uuid) -> PortResult<()> {
    if course.lecturer_id == Some(user_id) {
        Ok(())
    } else {
        Err(PortError::Authorization(format!(
            "only the assigned lecturer may manage attendance for {}",
            course.code
        )))
    }
}

/// Administrators and the course's lecturer may read rosters, records and reports.
pub fn ensure_can_view_course(course: &Course, user: &User) -> PortResult<()> {
    match user.role {
        Role::Admin => Ok(()),
        Role::Lecturer => ensure_course_lecturer(course, user.id),
        Role::Student => Err(PortError::Authorization(
            "students cannot view course attendance".to_string(),
        )),
    }
}

pub fn ensure_role(user: &User, role: Role) -> PortResult<()> {
    if user.role == role {
        Ok(())
    } else {
        Err(PortError::Authorization(format!("requires the {} role", role)))
    }
}
