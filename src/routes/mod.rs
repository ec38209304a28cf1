use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod departments;
pub mod emissions;
pub mod files;
pub mod health;
pub mod sequences;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let emissions_routes = Router::new()
        .route("/", get(emissions::list_emissions))
        .route(
            "/:id",
            get(emissions::get_emission).patch(emissions::update_emission),
        )
        .route("/:id/receive", post(emissions::receive_emission))
        .route("/:id/unreceive", post(emissions::unreceive_emission))
        .route(
            "/:id/files",
            get(files::list_files).post(files::upload_file),
        )
        .route("/:id/files/:file_id", delete(files::delete_file))
        .route("/:id/files/:file_id/download", get(files::download_file));

    let departments_routes = Router::new()
        .route("/", get(departments::list_departments))
        .route(
            "/:id/emissions",
            get(departments::admin_list_emissions).post(emissions::create_emission),
        )
        .route("/:id/emissions/batch", post(emissions::create_batch))
        .route(
            "/:id/members",
            get(departments::list_members).post(departments::add_member),
        )
        .route(
            "/:id/members/:user_id",
            patch(departments::update_member).delete(departments::remove_member),
        )
        .route(
            "/:id/sequences",
            get(sequences::list_sequences).post(sequences::create_sequence),
        );

    let sequences_routes = Router::new().route("/:id", patch(sequences::update_sequence));

    let document_type_routes = Router::new().route(
        "/",
        get(sequences::list_document_types).post(sequences::create_document_type),
    );

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/emissions", emissions_routes)
        .nest("/api/departments", departments_routes)
        .nest("/api/sequences", sequences_routes)
        .nest("/api/document-types", document_type_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024 * 64))
}
