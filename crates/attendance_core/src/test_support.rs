//! Shared fixtures for the core unit tests.

use crate::clock::ManualClock;
use crate::domain::{
    ClassSchedule, Course, CourseUpdate, NewCourse, NewUser, Role, Scan, ScanEvent, Session, User,
    UserCredentials, UserUpdate,
};
use crate::issuer::SessionIssuer;
use crate::memory::InMemoryDatabase;
use crate::ports::{DatabaseService, PortError, PortResult, ScanEventStream, ScanNotifier};
use crate::recorder::ScanRecorder;
use crate::report::ReportAggregator;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc, Weekday};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<ScanEvent>>,
}

impl RecordingNotifier {
    pub fn events(&self) -> Vec<ScanEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl ScanNotifier for RecordingNotifier {
    fn publish(&self, event: ScanEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn subscribe(&self, _session_id: Uuid) -> ScanEventStream {
        Box::pin(futures::stream::empty())
    }
}

/// CS101 taught by `lecturer` with three enrolled students, plus CS102
/// taught by `other_lecturer` and a student enrolled in neither.
/// The clock starts at 2024-01-15T09:00:00Z.
pub struct Fixture {
    pub db: Arc<InMemoryDatabase>,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
    pub lecturer: User,
    pub other_lecturer: User,
    pub course: Course,
    pub other_course: Course,
    pub students: Vec<User>,
    pub outsider: User,
}

async fn user(db: &InMemoryDatabase, first: &str, last: &str, id_number: Option<&str>, role: Role) -> User {
    db.create_user(
        NewUser {
            email: format!("{}.{}@uni.edu", first, last).to_lowercase(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            id_number: id_number.map(str::to_string),
            role,
        },
        "not-a-real-hash",
    )
    .await
    .unwrap()
}

/// A 09:00-10:30 slot on one day of the week.
pub fn weekly(day: Weekday) -> ClassSchedule {
    ClassSchedule::new(
        vec![day],
        NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
    )
    .unwrap()
}

impl Fixture {
    pub async fn new() -> Self {
        let db = Arc::new(InMemoryDatabase::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()));

        let lecturer = user(&db, "Edsger", "Dijkstra", None, Role::Lecturer).await;
        let other_lecturer = user(&db, "Barbara", "Liskov", None, Role::Lecturer).await;

        let course = db
            .create_course(NewCourse {
                code: "CS101".to_string(),
                name: "Intro to Computing".to_string(),
                description: String::new(),
                lecturer_id: Some(lecturer.id),
                schedules: vec![weekly(Weekday::Mon)],
            })
            .await
            .unwrap();
        let other_course = db
            .create_course(NewCourse {
                code: "CS102".to_string(),
                name: "Data Structures".to_string(),
                description: String::new(),
                lecturer_id: Some(other_lecturer.id),
                schedules: vec![weekly(Weekday::Tue)],
            })
            .await
            .unwrap();

        let students = vec![
            user(&db, "Grace", "Hopper", Some("2024-0003"), Role::Student).await,
            user(&db, "alan", "turing", Some("2024-0001"), Role::Student).await,
            user(&db, "Ada", "hopper", Some("2024-0002"), Role::Student).await,
        ];
        for student in &students {
            db.enroll_student(course.id, student.id).await.unwrap();
            db.enroll_student(other_course.id, student.id).await.unwrap();
        }
        let outsider = user(&db, "Ken", "Thompson", None, Role::Student).await;

        Self {
            db,
            clock,
            notifier: Arc::new(RecordingNotifier::default()),
            lecturer,
            other_lecturer,
            course,
            other_course,
            students,
            outsider,
        }
    }

    pub fn issuer(&self) -> SessionIssuer {
        SessionIssuer::new(self.db.clone(), self.clock.clone(), Duration::hours(1))
    }

    pub fn recorder(&self) -> ScanRecorder {
        ScanRecorder::new(self.db.clone(), self.clock.clone(), self.notifier.clone())
    }

    pub fn aggregator(&self) -> ReportAggregator {
        ReportAggregator::new(self.db.clone())
    }
}

/// Delegates to an `InMemoryDatabase` but fails every scan listing, as a
/// store that drops its connection right after a write would.
pub struct FailingScanListing(pub Arc<InMemoryDatabase>);

#[async_trait]
impl DatabaseService for FailingScanListing {
    async fn create_user(&self, new_user: NewUser, hashed_password: &str) -> PortResult<User> {
        self.0.create_user(new_user, hashed_password).await
    }
    async fn get_user(&self, user_id: Uuid) -> PortResult<User> {
        self.0.get_user(user_id).await
    }
    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.0.get_user_by_email(email).await
    }
    async fn list_users(&self) -> PortResult<Vec<User>> {
        self.0.list_users().await
    }
    async fn update_user(&self, user_id: Uuid, update: UserUpdate, hashed_password: Option<&str>) -> PortResult<User> {
        self.0.update_user(user_id, update, hashed_password).await
    }
    async fn delete_user(&self, user_id: Uuid) -> PortResult<()> {
        self.0.delete_user(user_id).await
    }
    async fn create_auth_session(&self, session_id: &str, user_id: Uuid, expires_at: DateTime<Utc>) -> PortResult<()> {
        self.0.create_auth_session(session_id, user_id, expires_at).await
    }
    async fn validate_auth_session(&self, session_id: &str, now: DateTime<Utc>) -> PortResult<Uuid> {
        self.0.validate_auth_session(session_id, now).await
    }
    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.0.delete_auth_session(session_id).await
    }
    async fn create_course(&self, new_course: NewCourse) -> PortResult<Course> {
        self.0.create_course(new_course).await
    }
    async fn get_course(&self, course_id: Uuid) -> PortResult<Course> {
        self.0.get_course(course_id).await
    }
    async fn list_courses(&self) -> PortResult<Vec<Course>> {
        self.0.list_courses().await
    }
    async fn set_course_lecturer(&self, course_id: Uuid, lecturer_id: Option<Uuid>) -> PortResult<Course> {
        self.0.set_course_lecturer(course_id, lecturer_id).await
    }
    async fn update_course(&self, course_id: Uuid, update: CourseUpdate) -> PortResult<Course> {
        self.0.update_course(course_id, update).await
    }
    async fn delete_course(&self, course_id: Uuid) -> PortResult<()> {
        self.0.delete_course(course_id).await
    }
    async fn enroll_student(&self, course_id: Uuid, student_id: Uuid) -> PortResult<()> {
        self.0.enroll_student(course_id, student_id).await
    }
    async fn unenroll_student(&self, course_id: Uuid, student_id: Uuid) -> PortResult<()> {
        self.0.unenroll_student(course_id, student_id).await
    }
    async fn is_enrolled(&self, course_id: Uuid, student_id: Uuid) -> PortResult<bool> {
        self.0.is_enrolled(course_id, student_id).await
    }
    async fn get_roster(&self, course_id: Uuid) -> PortResult<Vec<User>> {
        self.0.get_roster(course_id).await
    }
    async fn find_active_session(&self, course_id: Uuid, now: DateTime<Utc>) -> PortResult<Option<Session>> {
        self.0.find_active_session(course_id, now).await
    }
    async fn create_session_if_absent(&self, candidate: Session, now: DateTime<Utc>) -> PortResult<(Session, bool)> {
        self.0.create_session_if_absent(candidate, now).await
    }
    async fn get_session(&self, session_id: Uuid) -> PortResult<Session> {
        self.0.get_session(session_id).await
    }
    async fn list_sessions_for_course(&self, course_id: Uuid) -> PortResult<Vec<Session>> {
        self.0.list_sessions_for_course(course_id).await
    }
    async fn insert_scan(&self, scan: Scan) -> PortResult<Scan> {
        self.0.insert_scan(scan).await
    }
    async fn list_scans_for_sessions(&self, _session_ids: &[Uuid]) -> PortResult<Vec<Scan>> {
        Err(PortError::Unexpected("connection reset".to_string()))
    }
}
