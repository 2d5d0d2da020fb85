//! Route table for the map backend

use super::handlers::{
    AppState, create_entity, crm_stages, delete_entity, geocode, health, list_entities,
    update_entity,
};
use axum::{
    Router,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the HTTP routes
///
/// - GET /health - Liveness and registered providers
/// - GET /entities - Aggregate over providers (bounds, radius, category, text, sources)
/// - POST /entities/{source} - Create through one provider
/// - PUT /entities/{source}/{id} - Update through one provider
/// - DELETE /entities/{source}/{id} - Delete through one provider
/// - GET /geocode/{provider}?q= - Address suggestions
/// - GET /crm/stages/{category_id} - Smart-process stages
pub fn build_routes(state: AppState) -> Router {
    // The widget is served from the CRM portal's origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/entities", get(list_entities))
        .route("/entities/{source}", post(create_entity))
        .route(
            "/entities/{source}/{id}",
            put(update_entity).delete(delete_entity),
        )
        .route("/geocode/{provider}", get(geocode))
        .route("/crm/stages/{category_id}", get(crm_stages))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}
