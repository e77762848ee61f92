use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod engine;
mod error;
mod extract;
mod middleware;
mod routes;
mod state;
mod store;
#[cfg(test)]
mod testing;

use crate::engine::provider::HttpProvider;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Forma Coaching API",
        version = "0.1.0",
        description = "Execution core for the Forma coaching agent: event-sourced sessions, \
                       a bounded tool-calling loop, and versioned workout commands."
    ),
    paths(
        routes::health::health_check,
        routes::sessions::create_session,
        routes::sessions::get_session,
        routes::sessions::send_message,
        routes::events::list_session_events,
        routes::events::list_session_segments,
        routes::workouts::create_workout,
        routes::workouts::get_workout,
        routes::workouts::submit_command,
        routes::profile::get_profile,
        routes::profile::put_profile,
    ),
    components(schemas(
        HealthResponse,
        routes::profile::ProfileResponse,
        routes::profile::PutProfileRequest,
        forma_core::error::ApiError,
        forma_core::events::Event,
        forma_core::events::EventBody,
        forma_core::events::PaginatedResponse<forma_core::events::Event>,
        forma_core::session::Session,
        forma_core::session::LogSegment,
        forma_core::session::CreateSessionRequest,
        forma_core::session::SendMessageRequest,
        forma_core::stream::StreamEvent,
        forma_core::stream::TurnStatus,
        forma_core::workout::WorkoutSession,
        forma_core::workout::WorkoutStatus,
        forma_core::workout::WorkoutPayload,
        forma_core::workout::Exercise,
        forma_core::workout::CreateWorkoutRequest,
        forma_core::commands::Command,
        forma_core::commands::CommandType,
        forma_core::commands::CommandAccepted,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "forma_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Database connection
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let config = config::EngineConfig::from_env();
    let provider = Arc::new(HttpProvider::from_env(config.provider_timeout));

    let app_state = state::AppState {
        db: pool,
        provider,
        config,
    };

    // CORS
    let cors_layer = middleware::cors::build_cors_layer();

    // Router with per-group rate limiting: turns are the expensive path,
    // commands and reads get their own budgets.
    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::sessions::router().layer(middleware::rate_limit::turns_layer()))
        .merge(routes::events::router().layer(middleware::rate_limit::reads_layer()))
        .merge(routes::workouts::router().layer(middleware::rate_limit::commands_layer()))
        .merge(routes::profile::router().layer(middleware::rate_limit::reads_layer()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer),
        )
        .with_state(app_state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Forma API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server error");
}
