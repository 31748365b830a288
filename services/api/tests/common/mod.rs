#![allow(dead_code)]

use api_lib::{
    config::Config,
    web::{router, state::AppState},
};
use attendance_core::{
    domain::{Course, NewCourse, NewUser, Role, User},
    Clock, DatabaseService, InMemoryDatabase, ManualClock, ScanNotifier,
};
use api_lib::adapters::BroadcastNotifier;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

/// The instant every test app starts at: 2024-01-15T09:00:00Z.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap()
}

pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, h, m, s).unwrap()
}

/// An account together with a ready-to-use bearer token.
#[derive(Clone)]
pub struct Actor {
    pub user: User,
    pub token: String,
}

/// The router on the in-memory store with a manual clock, seeded with:
/// CS101 taught by `lecturer`, CS102 taught by `other_lecturer`, three
/// students enrolled in both, and an `outsider` enrolled in neither.
pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub db: Arc<InMemoryDatabase>,
    pub clock: Arc<ManualClock>,
    pub admin: Actor,
    pub lecturer: Actor,
    pub other_lecturer: Actor,
    pub students: Vec<Actor>,
    pub outsider: Actor,
    pub course: Course,
    pub other_course: Course,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).unwrap()
    }
}

async fn seed_user(
    db: &InMemoryDatabase,
    first: &str,
    last: &str,
    id_number: Option<&str>,
    role: Role,
) -> Actor {
    let user = db
        .create_user(
            NewUser {
                email: format!("{}.{}@uni.edu", first, last).to_lowercase(),
                first_name: first.to_string(),
                last_name: last.to_string(),
                id_number: id_number.map(str::to_string),
                role,
            },
            "seeded-without-password",
        )
        .await
        .unwrap();
    let token = Uuid::new_v4().to_string();
    db.create_auth_session(&token, user.id, start_time() + Duration::days(365))
        .await
        .unwrap();
    Actor { user, token }
}

async fn seed_course(db: &InMemoryDatabase, code: &str, name: &str, lecturer: &Actor) -> Course {
    db.create_course(NewCourse {
        code: code.to_string(),
        name: name.to_string(),
        description: String::new(),
        lecturer_id: Some(lecturer.user.id),
        schedules: Vec::new(),
    })
    .await
    .unwrap()
}

impl TestApp {
    pub async fn new() -> Self {
        let db = Arc::new(InMemoryDatabase::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let config = Arc::new(Config::from_lookup(|_| None).unwrap());
        let notifier: Arc<dyn ScanNotifier> = Arc::new(BroadcastNotifier::default());
        let state = Arc::new(AppState::new(
            db.clone() as Arc<dyn DatabaseService>,
            config,
            clock.clone() as Arc<dyn Clock>,
            notifier,
        ));

        let admin = seed_user(&db, "Root", "Admin", None, Role::Admin).await;
        let lecturer = seed_user(&db, "Edsger", "Dijkstra", None, Role::Lecturer).await;
        let other_lecturer = seed_user(&db, "Barbara", "Liskov", None, Role::Lecturer).await;
        let students = vec![
            seed_user(&db, "Grace", "Hopper", Some("2024-0003"), Role::Student).await,
            seed_user(&db, "alan", "turing", Some("2024-0001"), Role::Student).await,
            seed_user(&db, "Ada", "hopper", Some("2024-0002"), Role::Student).await,
        ];
        let outsider = seed_user(&db, "Ken", "Thompson", Some("2024-0099"), Role::Student).await;

        let course = seed_course(&db, "CS101", "Intro to Computing", &lecturer).await;
        let other_course = seed_course(&db, "CS102", "Data Structures", &other_lecturer).await;
        for student in &students {
            db.enroll_student(course.id, student.user.id).await.unwrap();
            db.enroll_student(other_course.id, student.user.id).await.unwrap();
        }

        Self {
            router: router(state.clone()),
            state,
            db,
            clock,
            admin,
            lecturer,
            other_lecturer,
            students,
            outsider,
            course,
            other_course,
        }
    }

    pub async fn request(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec();
        TestResponse { status, headers, body }
    }

    pub async fn get(&self, uri: &str, actor: &Actor) -> TestResponse {
        self.request(Method::GET, uri, Some(actor.token.as_str()), None).await
    }

    pub async fn post(&self, uri: &str, actor: &Actor, body: Value) -> TestResponse {
        self.request(Method::POST, uri, Some(actor.token.as_str()), Some(body)).await
    }

    /// Issues a CS101 session as its lecturer and returns the response body.
    pub async fn generate_session(&self) -> Value {
        let uri = format!("/courses/{}/sessions", self.course.id);
        let response = self
            .request(Method::POST, &uri, Some(self.lecturer.token.as_str()), None)
            .await;
        assert!(response.status.is_success(), "generate failed: {}", response.text());
        response.json()
    }

    pub async fn scan(&self, student: &Actor, payload: &str) -> TestResponse {
        self.post("/scans", student, serde_json::json!({ "qr_payload": payload }))
            .await
    }
}
