//! # MapGeo
//!
//! A geo-entity aggregation layer for CRM map widgets.
//!
//! ## Features
//!
//! - **One Entity Model**: CRM smart-process items, CRM deals, Userside nodes
//!   and optical lines, UTM5 customers all become [`GeoEntity`](core::GeoEntity)
//! - **Partial Failure Tolerant**: A failing backend yields a diagnostic, never a
//!   failed map
//! - **Spatial Filtering**: Viewport rectangles and radius searches over merged results
//! - **Geocoding**: DaData suggestions and Yandex lookups behind one trait
//! - **Per-Request Credentials**: Nothing is persisted; every call carries its own auth
//! - **Configuration-Based**: Backends are switched on and off from YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mapgeo::prelude::*;
//!
//! let config = MapGeoConfig::from_yaml_file("mapgeo.yaml")?;
//! ServerBuilder::from_config(&config)?
//!     .serve(&config.server.bind)
//!     .await?;
//! ```
//!
//! Or drive the aggregator directly:
//!
//! ```rust,ignore
//! let aggregator = Aggregator::new(AggregatorConfig::default())
//!     .with_provider(Arc::new(crm_adapter))
//!     .with_provider(Arc::new(userside_adapter));
//!
//! let report = aggregator.aggregate(&auth, &AggregateRequest::new(filter)).await;
//! for diagnostic in &report.diagnostics {
//!     eprintln!("{} degraded: {}", diagnostic.provider, diagnostic.message);
//! }
//! ```

pub mod adapters;
pub mod aggregator;
pub mod config;
pub mod core;
pub mod geocoding;
pub mod server;
pub mod transport;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core Types ===
    pub use crate::core::{
        AggregateRequest, ApiAuth, AuthContext, BoundsRect, CrmAuth, Diagnostic, DiagnosticKind,
        EntityDraft, EntityKind, EntityQueryParams, Fetched, FieldValue, GeoCandidate, GeoEntity,
        GeoFilter, GeoPoint, RadiusFilter, Shape, SourceSystem,
    };

    // === Service Traits ===
    pub use crate::core::{GeoProvider, Geocoder};

    // === Errors ===
    pub use crate::core::{GeoError, NetworkError, ProtocolError, ValidationError};

    // === Adapters ===
    pub use crate::adapters::{
        CrmAdapter, CrmClient, CrmDealsAdapter, InMemoryProvider, RestCrmClient, UsersideAdapter,
        Utm5Adapter,
    };

    // === Geocoders ===
    pub use crate::geocoding::{DadataGeocoder, YandexGeocoder};

    // === Aggregation ===
    pub use crate::aggregator::{AggregateReport, Aggregator, AggregatorConfig};

    // === Configuration ===
    pub use crate::config::MapGeoConfig;

    // === Transport ===
    pub use crate::transport::{JsonTransport, ReqwestTransport};

    // === Server ===
    pub use crate::server::{AppState, ServerBuilder};

    // === Re-exports ===
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;
}
