mod common;

use api_lib::web::auth::hash_password;
use attendance_core::{
    domain::{NewUser, Role},
    DatabaseService,
};
use axum::http::{header, Method, StatusCode};
use common::TestApp;
use serde_json::{json, Value};

fn weekly() -> Value {
    json!({ "days": ["Mon"], "start_time": "09:00", "end_time": "10:30" })
}

// -----------------------------------
// Authentication
// -----------------------------------

#[tokio::test]
async fn protected_routes_require_a_token() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/me", None, None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.json()["code"], "unauthorized");

    let response = app.request(Method::GET, "/me", Some("not-a-token"), None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn login_issues_a_working_token_and_logout_revokes_it() {
    let app = TestApp::new().await;
    let hashed = hash_password("correct horse battery").unwrap();
    app.db
        .create_user(
            NewUser {
                email: "new.lecturer@uni.edu".to_string(),
                first_name: "Tony".to_string(),
                last_name: "Hoare".to_string(),
                id_number: None,
                role: Role::Lecturer,
            },
            &hashed,
        )
        .await
        .unwrap();

    let response = app
        .request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "new.lecturer@uni.edu", "password": "wrong password" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = app
        .request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "New.Lecturer@uni.edu", "password": "correct horse battery" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let cookie = response.headers[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.starts_with("session="));
    let body = response.json();
    assert_eq!(body["user"]["role"], "lecturer");
    let token = body["token"].as_str().unwrap().to_string();

    let me = app.request(Method::GET, "/me", Some(token.as_str()), None).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.json()["last_name"], "Hoare");

    let response = app.request(Method::POST, "/auth/logout", Some(token.as_str()), None).await;
    assert_eq!(response.status, StatusCode::OK);
    let me = app.request(Method::GET, "/me", Some(token.as_str()), None).await;
    assert_eq!(me.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_email_is_unauthorized() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "nobody@uni.edu", "password": "whatever1" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

// -----------------------------------
// Users and courses
// -----------------------------------

#[tokio::test]
async fn admin_creates_users_and_duplicates_conflict() {
    let app = TestApp::new().await;
    let body = json!({
        "email": "linus@uni.edu",
        "password": "penguins!",
        "first_name": "Linus",
        "last_name": "Torvalds",
        "id_number": "2024-0100",
        "role": "Student"
    });

    let response = app.post("/users", &app.admin, body.clone()).await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.json()["role"], "student");

    let response = app.post("/users", &app.admin, body.clone()).await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    let response = app.post("/users", &app.lecturer, body).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let students = app.get("/users?role=student", &app.admin).await.json();
    assert_eq!(students.as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn unknown_role_is_rejected() {
    let app = TestApp::new().await;
    let body = json!({
        "email": "x@uni.edu",
        "password": "long enough",
        "first_name": "X",
        "last_name": "Y",
        "role": "dean"
    });
    let response = app.post("/users", &app.admin, body).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["code"], "invalid_input");
}

#[tokio::test]
async fn course_lecturer_must_be_a_lecturer() {
    let app = TestApp::new().await;
    let body = json!({
        "code": "cs201",
        "name": "Algorithms",
        "lecturer_id": app.students[0].user.id,
        "schedules": [weekly()]
    });
    let response = app.post("/courses", &app.admin, body).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let body = json!({
        "code": "cs201",
        "name": "Algorithms",
        "lecturer_id": app.lecturer.user.id,
        "schedules": [weekly()]
    });
    let response = app.post("/courses", &app.admin, body).await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.json()["code"], "CS201");

    let response = app
        .post("/courses", &app.admin, json!({ "code": "CS201", "name": "Again", "schedules": [weekly()] }))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn courses_carry_validated_schedules() {
    let app = TestApp::new().await;
    let course = |schedules: Value| json!({ "code": "CS301", "name": "Compilers", "schedules": schedules });

    let response = app.post("/courses", &app.admin, json!({ "code": "CS301", "name": "Compilers" })).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    let bad = [
        json!([{ "days": [], "start_time": "09:00", "end_time": "10:00" }]),
        json!([{ "days": ["Mon"], "start_time": "9am", "end_time": "10:00" }]),
        json!([{ "days": ["Mon"], "start_time": "11:00", "end_time": "10:00" }]),
        json!([{ "days": ["Someday"], "start_time": "09:00", "end_time": "10:00" }]),
    ];
    for schedules in bad {
        let response = app.post("/courses", &app.admin, course(schedules)).await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "{}", response.text());
        assert_eq!(response.json()["code"], "invalid_input");
    }

    let response = app
        .post(
            "/courses",
            &app.admin,
            course(json!([
                { "days": ["wed", "Monday"], "start_time": "09:00", "end_time": "10:30" },
                { "days": ["Fri"], "start_time": "14:00", "end_time": "16:00" }
            ])),
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    let body = response.json();
    assert_eq!(body["schedules"][0]["days"], json!(["Mon", "Wed"]));
    assert_eq!(body["schedules"][0]["end_time"], "10:30");
    assert_eq!(body["schedules"][1]["start_time"], "14:00");
}

#[tokio::test]
async fn admin_edits_a_course() {
    let app = TestApp::new().await;
    let uri = format!("/courses/{}", app.course.id);
    let edit = |code: &str| {
        json!({
            "code": code,
            "name": "Introduction to Computing",
            "description": "First-year core",
            "lecturer_id": app.other_lecturer.user.id,
            "schedules": [weekly()]
        })
    };

    let response = app
        .request(Method::PUT, &uri, Some(app.admin.token.as_str()), Some(edit("cs102")))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    let response = app
        .request(Method::PUT, &uri, Some(app.lecturer.token.as_str()), Some(edit("CS100")))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = app
        .request(Method::PUT, &uri, Some(app.admin.token.as_str()), Some(edit("cs100")))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["code"], "CS100");
    assert_eq!(body["description"], "First-year core");
    assert_eq!(body["lecturer_id"], json!(app.other_lecturer.user.id));

    let missing = format!("/courses/{}", uuid::Uuid::new_v4());
    let response = app
        .request(Method::PUT, &missing, Some(app.admin.token.as_str()), Some(edit("CS999")))
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn courses_with_sessions_cannot_be_deleted() {
    let app = TestApp::new().await;
    app.generate_session().await;

    let uri = format!("/courses/{}", app.course.id);
    let response = app.request(Method::DELETE, &uri, Some(app.admin.token.as_str()), None).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.json()["code"], "conflict");

    let uri = format!("/courses/{}", app.other_course.id);
    let response = app.request(Method::DELETE, &uri, Some(app.lecturer.token.as_str()), None).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    let response = app.request(Method::DELETE, &uri, Some(app.admin.token.as_str()), None).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let courses = app.get("/courses", &app.admin).await.json();
    assert_eq!(courses.as_array().unwrap().len(), 1);
    let response = app.request(Method::DELETE, &uri, Some(app.admin.token.as_str()), None).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_edits_an_account() {
    let app = TestApp::new().await;
    let student = &app.students[0].user;
    let uri = format!("/users/{}", student.id);
    let body = |email: &str, role: &str| {
        json!({
            "email": email,
            "first_name": "Grace",
            "last_name": "Hopper-Murray",
            "id_number": "2024-0003",
            "role": role
        })
    };

    let response = app
        .request(Method::PUT, &uri, Some(app.admin.token.as_str()), Some(body("ken.thompson@uni.edu", "student")))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    // Still enrolled in CS101 and CS102.
    let response = app
        .request(Method::PUT, &uri, Some(app.admin.token.as_str()), Some(body(student.email.as_str(), "lecturer")))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    let response = app
        .request(Method::PUT, &uri, Some(app.admin.token.as_str()), Some(body(student.email.as_str(), "student")))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["last_name"], "Hopper-Murray");

    let response = app
        .request(Method::PUT, &uri, Some(app.students[1].token.as_str()), Some(body(student.email.as_str(), "student")))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn password_and_role_change_for_an_unlinked_account() {
    let app = TestApp::new().await;
    let outsider = &app.outsider.user;
    let uri = format!("/users/{}", outsider.id);
    let body = json!({
        "email": outsider.email,
        "first_name": "Ken",
        "last_name": "Thompson",
        "role": "Lecturer",
        "password": "unix forever"
    });

    let response = app
        .request(Method::PUT, &uri, Some(app.admin.token.as_str()), Some(body))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["role"], "lecturer");

    let response = app
        .request(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": outsider.email, "password": "unix forever" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["user"]["role"], "lecturer");
}

#[tokio::test]
async fn accounts_with_attendance_history_are_kept() {
    let app = TestApp::new().await;
    let session = app.generate_session().await;
    let payload = session["qr_payload"].as_str().unwrap();
    assert_eq!(app.scan(&app.students[0], payload).await.status, StatusCode::OK);

    for actor in [&app.students[0], &app.lecturer] {
        let uri = format!("/users/{}", actor.user.id);
        let response = app.request(Method::DELETE, &uri, Some(app.admin.token.as_str()), None).await;
        assert_eq!(response.status, StatusCode::CONFLICT);
    }

    let uri = format!("/users/{}", app.admin.user.id);
    let response = app.request(Method::DELETE, &uri, Some(app.admin.token.as_str()), None).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deleting_an_account_revokes_access_and_unassigns_courses() {
    let app = TestApp::new().await;

    let uri = format!("/users/{}", app.other_lecturer.user.id);
    let response = app.request(Method::DELETE, &uri, Some(app.admin.token.as_str()), None).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    assert_eq!(app.get("/me", &app.other_lecturer).await.status, StatusCode::UNAUTHORIZED);
    let courses = app.get("/courses", &app.admin).await.json();
    let cs102 = courses
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["code"] == "CS102")
        .unwrap();
    assert!(cs102["lecturer_id"].is_null());

    let uri = format!("/users/{}", app.students[1].user.id);
    let response = app.request(Method::DELETE, &uri, Some(app.admin.token.as_str()), None).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    let roster = format!("/courses/{}/students", app.course.id);
    assert_eq!(app.get(&roster, &app.lecturer).await.json().as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn course_listing_depends_on_role() {
    let app = TestApp::new().await;
    let count = |v: serde_json::Value| v.as_array().unwrap().len();

    assert_eq!(count(app.get("/courses", &app.admin).await.json()), 2);
    let mine = app.get("/courses", &app.lecturer).await.json();
    assert_eq!(count(mine.clone()), 1);
    assert_eq!(mine[0]["code"], "CS101");
    assert_eq!(count(app.get("/courses", &app.students[0]).await.json()), 2);
    assert_eq!(count(app.get("/courses", &app.outsider).await.json()), 0);
}

#[tokio::test]
async fn reassigning_the_lecturer_moves_issuing_rights() {
    let app = TestApp::new().await;
    let uri = format!("/courses/{}/lecturer", app.course.id);
    let response = app
        .request(
            Method::PUT,
            &uri,
            Some(app.admin.token.as_str()),
            Some(json!({ "lecturer_id": app.other_lecturer.user.id })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let sessions = format!("/courses/{}/sessions", app.course.id);
    let response = app
        .request(Method::POST, &sessions, Some(app.lecturer.token.as_str()), None)
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);
    let response = app
        .request(Method::POST, &sessions, Some(app.other_lecturer.token.as_str()), None)
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
}

// -----------------------------------
// Enrollment
// -----------------------------------

#[tokio::test]
async fn enrolling_and_removing_students() {
    let app = TestApp::new().await;
    let students = format!("/courses/{}/students", app.course.id);

    let response = app
        .post(&students, &app.admin, json!({ "student_ids": [app.lecturer.user.id] }))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = app
        .post(&students, &app.admin, json!({ "student_ids": [app.outsider.user.id] }))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["enrolled"], 1);

    let roster = app.get(&students, &app.lecturer).await.json();
    let names: Vec<&str> = roster
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["last_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["hopper", "Hopper", "Thompson", "turing"]);

    let uri = format!("{}/{}", students, app.outsider.user.id);
    let response = app.request(Method::DELETE, &uri, Some(app.admin.token.as_str()), None).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
    assert_eq!(app.get(&students, &app.lecturer).await.json().as_array().unwrap().len(), 3);

    assert_eq!(app.get(&students, &app.students[0]).await.status, StatusCode::FORBIDDEN);
}
