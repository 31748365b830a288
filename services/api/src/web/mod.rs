pub mod admin;
pub mod auth;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;

pub use middleware::require_auth;
pub use state::AppState;
pub use ws_handler::ws_handler;

/// Builds the API router. Shared by the server binary and the integration
/// tests; CORS and the Swagger UI are layered on in `bin/api.rs`.
pub fn router(app_state: Arc<AppState>) -> Router {
    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/me", get(auth::me_handler))
        .route(
            "/users",
            post(admin::create_user_handler).get(admin::list_users_handler),
        )
        .route(
            "/users/{user_id}",
            put(admin::update_user_handler).delete(admin::delete_user_handler),
        )
        .route(
            "/courses",
            post(admin::create_course_handler).get(admin::list_courses_handler),
        )
        .route(
            "/courses/{course_id}",
            put(admin::update_course_handler).delete(admin::delete_course_handler),
        )
        .route("/courses/{course_id}/lecturer", put(admin::assign_lecturer_handler))
        .route(
            "/courses/{course_id}/students",
            get(admin::roster_handler).post(admin::enroll_students_handler),
        )
        .route(
            "/courses/{course_id}/students/{student_id}",
            delete(admin::unenroll_student_handler),
        )
        .route(
            "/courses/{course_id}/sessions",
            post(rest::generate_session_handler).get(rest::list_session_records_handler),
        )
        .route("/courses/{course_id}/sessions/active", get(rest::active_session_handler))
        .route("/courses/{course_id}/scans", post(rest::submit_course_scan_handler))
        .route("/scans", post(rest::submit_scan_handler))
        .route("/courses/{course_id}/report", get(rest::report_handler))
        .route("/courses/{course_id}/report.csv", get(rest::report_csv_handler))
        .route("/sessions/{session_id}/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(app_state)
}
