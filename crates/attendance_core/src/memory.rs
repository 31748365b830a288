//! crates/attendance_core/src/memory.rs
//!
//! An in-process implementation of the `DatabaseService` port.
//!
//! Backs the api when no `DATABASE_URL` is configured and drives the test
//! suites. All state sits behind one mutex, so every trait method is atomic;
//! in particular the duplicate-scan check and the insert can never interleave.

use crate::domain::{
    Course, CourseUpdate, NewCourse, NewUser, Scan, Session, User, UserCredentials, UserUpdate,
};
use crate::ports::{DatabaseService, PortError, PortResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, UserCredentials>,
    auth_sessions: HashMap<String, (Uuid, DateTime<Utc>)>,
    courses: HashMap<Uuid, Course>,
    enrollments: HashMap<Uuid, BTreeSet<Uuid>>,
    sessions: HashMap<Uuid, Session>,
    scans: Vec<Scan>,
    scan_keys: HashSet<(Uuid, Uuid)>,
}

#[derive(Default)]
pub struct InMemoryDatabase {
    inner: Mutex<Inner>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> PortResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| PortError::Unexpected("in-memory store lock poisoned".to_string()))
    }
}

fn sorted_sessions(mut sessions: Vec<Session>) -> Vec<Session> {
    sessions.sort_by(|a, b| a.generated_at.cmp(&b.generated_at).then(a.id.cmp(&b.id)));
    sessions
}

#[async_trait]
impl DatabaseService for InMemoryDatabase {
    async fn create_user(&self, new_user: NewUser, hashed_password: &str) -> PortResult<User> {
        let mut inner = self.lock()?;
        let email = new_user.email.trim().to_lowercase();
        if inner.users.values().any(|c| c.user.email == email) {
            return Err(PortError::Conflict(format!("email {} is already registered", email)));
        }
        let user = User {
            id: Uuid::new_v4(),
            email,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            id_number: new_user.id_number,
            role: new_user.role,
        };
        inner.users.insert(
            user.id,
            UserCredentials {
                user: user.clone(),
                hashed_password: hashed_password.to_string(),
            },
        );
        Ok(user)
    }

    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        self.lock()?
            .users
            .get(&user_id)
            .map(|c| c.user.clone())
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let email = email.trim().to_lowercase();
        self.lock()?
            .users
            .values()
            .find(|c| c.user.email == email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn list_users(&self) -> PortResult<Vec<User>> {
        let mut users: Vec<User> = self.lock()?.users.values().map(|c| c.user.clone()).collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn update_user(
        &self,
        user_id: Uuid,
        update: UserUpdate,
        hashed_password: Option<&str>,
    ) -> PortResult<User> {
        let mut inner = self.lock()?;
        let email = update.email.trim().to_lowercase();
        if inner.users.values().any(|c| c.user.email == email && c.user.id != user_id) {
            return Err(PortError::Conflict(format!("email {} is already registered", email)));
        }
        let credentials = inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))?;
        credentials.user = User {
            id: user_id,
            email,
            first_name: update.first_name,
            last_name: update.last_name,
            id_number: update.id_number,
            role: update.role,
        };
        if let Some(hashed) = hashed_password {
            credentials.hashed_password = hashed.to_string();
        }
        Ok(credentials.user.clone())
    }

    async fn delete_user(&self, user_id: Uuid) -> PortResult<()> {
        let mut inner = self.lock()?;
        if !inner.users.contains_key(&user_id) {
            return Err(PortError::NotFound(format!("User {} not found", user_id)));
        }
        if inner.scans.iter().any(|s| s.student_id == user_id)
            || inner.sessions.values().any(|s| s.created_by == user_id)
        {
            return Err(PortError::Conflict(format!(
                "user {} has attendance history and cannot be deleted",
                user_id
            )));
        }
        inner.users.remove(&user_id);
        inner.auth_sessions.retain(|_, (owner, _)| *owner != user_id);
        for students in inner.enrollments.values_mut() {
            students.remove(&user_id);
        }
        for course in inner.courses.values_mut() {
            if course.lecturer_id == Some(user_id) {
                course.lecturer_id = None;
            }
        }
        Ok(())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.lock()?
            .auth_sessions
            .insert(session_id.to_string(), (user_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str, now: DateTime<Utc>) -> PortResult<Uuid> {
        match self.lock()?.auth_sessions.get(session_id) {
            Some((user_id, expires_at)) if *expires_at > now => Ok(*user_id),
            _ => Err(PortError::Unauthorized),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.lock()?.auth_sessions.remove(session_id);
        Ok(())
    }

    async fn create_course(&self, new_course: NewCourse) -> PortResult<Course> {
        let mut inner = self.lock()?;
        let code = new_course.code.trim().to_uppercase();
        if inner.courses.values().any(|c| c.code == code) {
            return Err(PortError::Conflict(format!("course code {} already exists", code)));
        }
        let course = Course {
            id: Uuid::new_v4(),
            code,
            name: new_course.name,
            description: new_course.description,
            lecturer_id: new_course.lecturer_id,
            schedules: new_course.schedules,
        };
        inner.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn get_course(&self, course_id: Uuid) -> PortResult<Course> {
        self.lock()?
            .courses
            .get(&course_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))
    }

    async fn list_courses(&self) -> PortResult<Vec<Course>> {
        let mut courses: Vec<Course> = self.lock()?.courses.values().cloned().collect();
        courses.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(courses)
    }

    async fn set_course_lecturer(&self, course_id: Uuid, lecturer_id: Option<Uuid>) -> PortResult<Course> {
        let mut inner = self.lock()?;
        let course = inner
            .courses
            .get_mut(&course_id)
            .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))?;
        course.lecturer_id = lecturer_id;
        Ok(course.clone())
    }

    async fn update_course(&self, course_id: Uuid, update: CourseUpdate) -> PortResult<Course> {
        let mut inner = self.lock()?;
        let code = update.code.trim().to_uppercase();
        if inner.courses.values().any(|c| c.code == code && c.id != course_id) {
            return Err(PortError::Conflict(format!("course code {} already exists", code)));
        }
        let course = inner
            .courses
            .get_mut(&course_id)
            .ok_or_else(|| PortError::NotFound(format!("Course {} not found", course_id)))?;
        *course = Course {
            id: course_id,
            code,
            name: update.name,
            description: update.description,
            lecturer_id: update.lecturer_id,
            schedules: update.schedules,
        };
        Ok(course.clone())
    }

    async fn delete_course(&self, course_id: Uuid) -> PortResult<()> {
        let mut inner = self.lock()?;
        if !inner.courses.contains_key(&course_id) {
            return Err(PortError::NotFound(format!("Course {} not found", course_id)));
        }
        if inner.sessions.values().any(|s| s.course_id == course_id) {
            return Err(PortError::Conflict(format!(
                "course {} has attendance sessions and cannot be deleted",
                course_id
            )));
        }
        inner.courses.remove(&course_id);
        inner.enrollments.remove(&course_id);
        Ok(())
    }

    async fn enroll_student(&self, course_id: Uuid, student_id: Uuid) -> PortResult<()> {
        let mut inner = self.lock()?;
        if !inner.courses.contains_key(&course_id) {
            return Err(PortError::NotFound(format!("Course {} not found", course_id)));
        }
        if !inner.users.contains_key(&student_id) {
            return Err(PortError::NotFound(format!("User {} not found", student_id)));
        }
        inner.enrollments.entry(course_id).or_default().insert(student_id);
        Ok(())
    }

    async fn unenroll_student(&self, course_id: Uuid, student_id: Uuid) -> PortResult<()> {
        let mut inner = self.lock()?;
        let removed = inner
            .enrollments
            .get_mut(&course_id)
            .map(|students| students.remove(&student_id))
            .unwrap_or(false);
        if removed {
            Ok(())
        } else {
            Err(PortError::NotFound(format!(
                "Student {} is not enrolled in course {}",
                student_id, course_id
            )))
        }
    }

    async fn is_enrolled(&self, course_id: Uuid, student_id: Uuid) -> PortResult<bool> {
        Ok(self
            .lock()?
            .enrollments
            .get(&course_id)
            .is_some_and(|students| students.contains(&student_id)))
    }

    async fn get_roster(&self, course_id: Uuid) -> PortResult<Vec<User>> {
        let inner = self.lock()?;
        if !inner.courses.contains_key(&course_id) {
            return Err(PortError::NotFound(format!("Course {} not found", course_id)));
        }
        let roster = inner
            .enrollments
            .get(&course_id)
            .map(|students| {
                students
                    .iter()
                    .filter_map(|id| inner.users.get(id).map(|c| c.user.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(roster)
    }

    async fn find_active_session(&self, course_id: Uuid, now: DateTime<Utc>) -> PortResult<Option<Session>> {
        let inner = self.lock()?;
        Ok(newest_open_session(&inner, course_id, now))
    }

    async fn create_session_if_absent(
        &self,
        candidate: Session,
        now: DateTime<Utc>,
    ) -> PortResult<(Session, bool)> {
        let mut inner = self.lock()?;
        if !inner.courses.contains_key(&candidate.course_id) {
            return Err(PortError::NotFound(format!("Course {} not found", candidate.course_id)));
        }
        if let Some(existing) = newest_open_session(&inner, candidate.course_id, now) {
            return Ok((existing, false));
        }
        inner.sessions.insert(candidate.id, candidate.clone());
        Ok((candidate, true))
    }

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        self.lock()?
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))
    }

    async fn list_sessions_for_course(&self, course_id: Uuid) -> PortResult<Vec<Session>> {
        let sessions = self
            .lock()?
            .sessions
            .values()
            .filter(|s| s.course_id == course_id)
            .cloned()
            .collect();
        Ok(sorted_sessions(sessions))
    }

    async fn insert_scan(&self, scan: Scan) -> PortResult<Scan> {
        let mut inner = self.lock()?;
        if !inner.scan_keys.insert((scan.session_id, scan.student_id)) {
            let scanned_at = inner
                .scans
                .iter()
                .find(|s| s.session_id == scan.session_id && s.student_id == scan.student_id)
                .map(|s| s.scanned_at)
                .unwrap_or(scan.scanned_at);
            return Err(PortError::DuplicateScan { scanned_at });
        }
        inner.scans.push(scan.clone());
        Ok(scan)
    }

    async fn list_scans_for_sessions(&self, session_ids: &[Uuid]) -> PortResult<Vec<Scan>> {
        let wanted: HashSet<&Uuid> = session_ids.iter().collect();
        let mut scans: Vec<Scan> = self
            .lock()?
            .scans
            .iter()
            .filter(|s| wanted.contains(&s.session_id))
            .cloned()
            .collect();
        scans.sort_by(|a, b| a.scanned_at.cmp(&b.scanned_at).then(a.id.cmp(&b.id)));
        Ok(scans)
    }
}

fn newest_open_session(inner: &Inner, course_id: Uuid, now: DateTime<Utc>) -> Option<Session> {
    inner
        .sessions
        .values()
        .filter(|s| s.course_id == course_id && s.is_open_at(now))
        .max_by(|a, b| a.generated_at.cmp(&b.generated_at).then(a.id.cmp(&b.id)))
        .cloned()
}
