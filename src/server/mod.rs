//! HTTP server for the map widget
//!
//! Exposes the aggregator, per-provider writes, geocoding and CRM stages
//! over REST. Backend credentials travel in request headers; see
//! [`AuthContext::from_headers`](crate::core::auth::AuthContext::from_headers).

pub mod builder;
pub mod handlers;
pub mod router;

pub use builder::ServerBuilder;
pub use handlers::{AppState, RequestAuth};
