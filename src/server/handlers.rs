//! HTTP handlers over the aggregator, the providers and the geocoders
//!
//! Credentials are read from request headers on every call and dropped with
//! the request.

use axum::{
    Json,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::adapters::CrmAdapter;
use crate::adapters::crm::CrmStage;
use crate::aggregator::{AggregateReport, Aggregator};
use crate::core::auth::AuthContext;
use crate::core::entity::{EntityDraft, GeoEntity};
use crate::core::error::GeoError;
use crate::core::query::EntityQueryParams;
use crate::core::service::{Fetched, GeoCandidate, GeoProvider, Geocoder};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    /// Smart-process adapter, needed for stage listing
    pub crm: Option<Arc<CrmAdapter>>,
    pub geocoders: Arc<IndexMap<String, Arc<dyn Geocoder>>>,
    /// Fired on shutdown; aborts running aggregations
    pub shutdown: CancellationToken,
}

impl AppState {
    fn provider(&self, name: &str) -> Result<Arc<dyn GeoProvider>, GeoError> {
        self.aggregator
            .provider(name)
            .ok_or_else(|| GeoError::UnknownProvider {
                name: name.to_string(),
            })
    }

    fn geocoder(&self, name: &str) -> Result<Arc<dyn Geocoder>, GeoError> {
        self.geocoders
            .get(name)
            .cloned()
            .ok_or_else(|| GeoError::UnknownProvider {
                name: name.to_string(),
            })
    }
}

/// Per-request credentials taken from headers
#[derive(Debug, Clone)]
pub struct RequestAuth(pub AuthContext);

impl<S> FromRequestParts<S> for RequestAuth
where
    S: Send + Sync,
{
    type Rejection = GeoError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        AuthContext::from_headers(&parts.headers)
            .map(RequestAuth)
            .map_err(GeoError::from)
    }
}

/// Query string of `GET /geocode/{provider}`
#[derive(Debug, Default, Deserialize)]
pub struct GeocodeParams {
    #[serde(default)]
    pub q: String,
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let geocoders: Vec<&String> = state.geocoders.keys().collect();
    Json(json!({
        "status": "ok",
        "service": "mapgeo",
        "providers": state.aggregator.provider_names(),
        "geocoders": geocoders,
    }))
}

/// GET /entities
pub async fn list_entities(
    State(state): State<AppState>,
    RequestAuth(auth): RequestAuth,
    Query(params): Query<EntityQueryParams>,
) -> Result<Json<AggregateReport>, GeoError> {
    let request = params.into_request()?;
    if let Some(names) = &request.providers {
        for name in names {
            state.provider(name)?;
        }
    }

    let report = state
        .aggregator
        .aggregate_with_cancel(&auth, &request, &state.shutdown)
        .await?;
    Ok(Json(report))
}

/// POST /entities/{source}
pub async fn create_entity(
    State(state): State<AppState>,
    Path(source): Path<String>,
    RequestAuth(auth): RequestAuth,
    Json(draft): Json<EntityDraft>,
) -> Result<(StatusCode, Json<GeoEntity>), GeoError> {
    let provider = state.provider(&source)?;
    let entity = provider.create_entity(&auth, draft).await?;
    tracing::info!(provider = %source, id = %entity.id, "entity created");
    Ok((StatusCode::CREATED, Json(entity)))
}

/// PUT /entities/{source}/{id}
pub async fn update_entity(
    State(state): State<AppState>,
    Path((source, id)): Path<(String, String)>,
    RequestAuth(auth): RequestAuth,
    Json(draft): Json<EntityDraft>,
) -> Result<Json<GeoEntity>, GeoError> {
    let provider = state.provider(&source)?;
    let entity = provider.update_entity(&auth, &id, draft).await?;
    tracing::info!(provider = %source, id = %id, "entity updated");
    Ok(Json(entity))
}

/// DELETE /entities/{source}/{id}
pub async fn delete_entity(
    State(state): State<AppState>,
    Path((source, id)): Path<(String, String)>,
    RequestAuth(auth): RequestAuth,
) -> Result<StatusCode, GeoError> {
    let provider = state.provider(&source)?;
    provider.delete_entity(&auth, &id).await?;
    tracing::info!(provider = %source, id = %id, "entity deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /geocode/{provider}?q=
pub async fn geocode(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<GeocodeParams>,
) -> Result<Json<Fetched<GeoCandidate>>, GeoError> {
    let geocoder = state.geocoder(&provider)?;
    Ok(Json(geocoder.search(&params.q).await))
}

/// GET /crm/stages/{category_id}
pub async fn crm_stages(
    State(state): State<AppState>,
    Path(category_id): Path<i64>,
    RequestAuth(auth): RequestAuth,
) -> Result<Json<Fetched<CrmStage>>, GeoError> {
    let crm = state.crm.as_ref().ok_or_else(|| GeoError::UnknownProvider {
        name: "crm".to_string(),
    })?;
    Ok(Json(crm.stages(&auth, category_id).await))
}
