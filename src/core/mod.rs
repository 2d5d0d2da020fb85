//! Core module containing the entity model, filters and service traits

pub mod auth;
pub mod entity;
pub mod error;
pub mod field;
pub mod geometry;
pub mod pagination;
pub mod query;
pub mod service;

pub use auth::{ApiAuth, AuthContext, CrmAuth};
pub use entity::{EntityDraft, EntityKind, GeoEntity, Shape, SourceSystem};
pub use error::{ConfigError, GeoError, NetworkError, ProtocolError, ValidationError};
pub use field::FieldValue;
pub use geometry::{BoundsRect, GeoPoint, haversine_distance_km, in_bounds};
pub use pagination::{Page, PageCursor, collect_pages};
pub use query::{AggregateRequest, EntityQueryParams, GeoFilter, RadiusFilter};
pub use service::{Diagnostic, DiagnosticKind, Fetched, GeoCandidate, GeoProvider, Geocoder};
