//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{BroadcastNotifier, DbAdapter},
    config::{BootstrapAdmin, Config, ConfigError},
    error::ApiError,
    web::{auth::hash_password, rest::ApiDoc, router, state::AppState},
};
use attendance_core::{
    domain::{NewUser, Role},
    Clock, DatabaseService, InMemoryDatabase, PortError, ScanNotifier, SystemClock,
};
use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    Router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Creates the configured administrator unless the email is already taken.
async fn bootstrap_admin(db: &dyn DatabaseService, admin: &BootstrapAdmin) -> Result<(), ApiError> {
    match db.get_user_by_email(&admin.email).await {
        Ok(_) => {
            info!("Bootstrap admin {} already exists.", admin.email);
            Ok(())
        }
        Err(PortError::NotFound(_)) => {
            let hashed = hash_password(&admin.password)?;
            let user = db
                .create_user(
                    NewUser {
                        email: admin.email.clone(),
                        first_name: "System".to_string(),
                        last_name: "Administrator".to_string(),
                        id_number: None,
                        role: Role::Admin,
                    },
                    &hashed,
                )
                .await?;
            info!("Created bootstrap admin {}", user.id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    let db: Arc<dyn DatabaseService> = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            warn!("DATABASE_URL is not set; using the in-memory store. Nothing will persist across restarts.");
            Arc::new(InMemoryDatabase::new())
        }
    };

    if let Some(admin) = &config.bootstrap_admin {
        bootstrap_admin(db.as_ref(), admin).await?;
    }

    // --- 3. Build the Shared AppState ---
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notifier: Arc<dyn ScanNotifier> = Arc::new(BroadcastNotifier::default());
    let app_state = Arc::new(AppState::new(db, config.clone(), clock, notifier));
    info!(
        "Attendance sessions stay open for {} minutes.",
        config.session_validity.num_minutes()
    );

    // --- 4. Create the Web Router ---
    let cors_origin = config
        .cors_origin
        .parse::<HeaderValue>()
        .map_err(|e| ConfigError::InvalidValue("CORS_ORIGIN".to_string(), e.to_string()))?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(router(app_state).layer(cors))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
