//! Service traits for backend adapters and geocoders

use crate::core::auth::AuthContext;
use crate::core::entity::{EntityDraft, GeoEntity, SourceSystem};
use crate::core::error::{GeoError, NetworkError};
use crate::core::geometry::{BoundsRect, GeoPoint};
use crate::core::query::GeoFilter;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Minimum number of characters before a geocoder issues a request
pub const MIN_QUERY_CHARS: usize = 3;

/// What went wrong on a degraded read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Network,
    Timeout,
    ProtocolViolation,
    Unauthorized,
    Internal,
}

impl From<&GeoError> for DiagnosticKind {
    fn from(err: &GeoError) -> Self {
        match err {
            GeoError::Network(NetworkError::Timeout { .. }) => DiagnosticKind::Timeout,
            GeoError::Network(_) => DiagnosticKind::Network,
            GeoError::Protocol(_) => DiagnosticKind::ProtocolViolation,
            GeoError::Unauthorized { .. } => DiagnosticKind::Unauthorized,
            _ => DiagnosticKind::Internal,
        }
    }
}

/// Record of a read that degraded to an empty result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub provider: String,
    pub kind: DiagnosticKind,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(provider: impl Into<String>, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        let diagnostic = Self {
            provider: provider.into(),
            kind,
            message: message.into(),
            recorded_at: Utc::now(),
        };
        tracing::warn!(
            provider = %diagnostic.provider,
            kind = ?diagnostic.kind,
            "{}",
            diagnostic.message
        );
        diagnostic
    }

    pub fn from_error(provider: impl Into<String>, err: &GeoError) -> Self {
        Self::new(provider, DiagnosticKind::from(err), err.to_string())
    }

    pub fn timeout(provider: impl Into<String>, after: Duration) -> Self {
        Self::new(
            provider,
            DiagnosticKind::Timeout,
            format!("no answer within {} ms", after.as_millis()),
        )
    }
}

/// Result of a read operation
///
/// Reads never fail: a backend error yields no items and a diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fetched<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
}

impl<T> Fetched<T> {
    pub fn ok(items: Vec<T>) -> Self {
        Self {
            items,
            diagnostic: None,
        }
    }

    /// Nothing to return and nothing went wrong (e.g. a short query)
    pub fn empty() -> Self {
        Self::ok(Vec::new())
    }

    pub fn failed(diagnostic: Diagnostic) -> Self {
        Self {
            items: Vec::new(),
            diagnostic: Some(diagnostic),
        }
    }

    /// Degrade an adapter-internal result into a read outcome
    pub fn from_result(provider: &str, result: Result<Vec<T>, GeoError>) -> Self {
        match result {
            Ok(items) => Self::ok(items),
            Err(err) => Self::failed(Diagnostic::from_error(provider, &err)),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.diagnostic.is_some()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Fetched<U> {
        Fetched {
            items: self.items.into_iter().map(f).collect(),
            diagnostic: self.diagnostic,
        }
    }
}

/// Service trait for one backend holding geo entities
///
/// Implementations translate the common [`GeoFilter`] into their backend's
/// request shape and map raw records into [`GeoEntity`]. Reads degrade to a
/// diagnostic; writes propagate errors. Read-only backends keep the default
/// write methods, which report [`GeoError::Unsupported`].
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Registry name (`crm`, `crm_deals`, `userside`, ...)
    fn name(&self) -> &str;

    /// Backend the entities come from
    fn source_system(&self) -> SourceSystem;

    /// List entities matching `filter`
    async fn fetch_entities(&self, auth: &AuthContext, filter: &GeoFilter) -> Fetched<GeoEntity>;

    /// Create a new entity
    async fn create_entity(
        &self,
        _auth: &AuthContext,
        _draft: EntityDraft,
    ) -> Result<GeoEntity, GeoError> {
        Err(GeoError::Unsupported {
            provider: self.name().to_string(),
            operation: "create",
        })
    }

    /// Update an existing entity
    async fn update_entity(
        &self,
        _auth: &AuthContext,
        _id: &str,
        _draft: EntityDraft,
    ) -> Result<GeoEntity, GeoError> {
        Err(GeoError::Unsupported {
            provider: self.name().to_string(),
            operation: "update",
        })
    }

    /// Delete an entity
    async fn delete_entity(&self, _auth: &AuthContext, _id: &str) -> Result<(), GeoError> {
        Err(GeoError::Unsupported {
            provider: self.name().to_string(),
            operation: "delete",
        })
    }
}

/// Address suggestion returned by a geocoder (`x` = longitude, `y` = latitude)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCandidate {
    pub x: f64,
    pub y: f64,
    pub label: String,
    #[serde(default)]
    pub bounds: Option<BoundsRect>,
    #[serde(default)]
    pub raw: Value,
}

impl GeoCandidate {
    pub fn point(&self) -> Option<GeoPoint> {
        GeoPoint::new(self.y, self.x)
    }
}

/// True when `query` is long enough to be sent to a geocoder
///
/// Counts characters as typed, whitespace included.
pub fn is_searchable(query: &str) -> bool {
    query.chars().count() >= MIN_QUERY_CHARS
}

/// Service trait for address geocoders
#[async_trait]
pub trait Geocoder: Send + Sync {
    fn name(&self) -> &str;

    /// Suggestions for `query`
    ///
    /// Queries shorter than [`MIN_QUERY_CHARS`] return an empty result
    /// without touching the network.
    async fn search(&self, query: &str) -> Fetched<GeoCandidate> {
        if !is_searchable(query) {
            return Fetched::empty();
        }
        self.lookup(query).await
    }

    /// Perform the remote lookup; only called with searchable queries
    async fn lookup(&self, query: &str) -> Fetched<GeoCandidate>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ProtocolError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGeocoder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Geocoder for CountingGeocoder {
        fn name(&self) -> &str {
            "counting"
        }

        async fn lookup(&self, query: &str) -> Fetched<GeoCandidate> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Fetched::ok(vec![GeoCandidate {
                x: 37.6,
                y: 55.7,
                label: query.to_string(),
                bounds: None,
                raw: Value::Null,
            }])
        }
    }

    #[tokio::test]
    async fn test_short_queries_never_reach_lookup() {
        let geocoder = CountingGeocoder {
            calls: AtomicUsize::new(0),
        };
        for query in ["", "a", "ab", "ул"] {
            assert!(geocoder.search(query).await.items.is_empty());
        }
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);

        let found = geocoder.search("Мос").await;
        assert_eq!(found.items[0].label, "Мос");
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_query_length_counts_whitespace() {
        let geocoder = CountingGeocoder {
            calls: AtomicUsize::new(0),
        };
        let found = geocoder.search("ab ").await;
        assert_eq!(found.items[0].label, "ab ");
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_is_searchable_counts_characters() {
        assert!(is_searchable("абв"));
        assert!(!is_searchable("аб"));
        assert!(is_searchable("аб "));
    }

    #[test]
    fn test_fetched_from_result() {
        let ok: Fetched<u8> = Fetched::from_result("crm", Ok(vec![1, 2]));
        assert!(!ok.is_degraded());

        let failed: Fetched<u8> = Fetched::from_result(
            "crm",
            Err(ProtocolError::CursorNotAdvancing {
                previous: 0,
                next: 0,
            }
            .into()),
        );
        assert!(failed.items.is_empty());
        let diagnostic = failed.diagnostic.unwrap();
        assert_eq!(diagnostic.kind, DiagnosticKind::ProtocolViolation);
        assert_eq!(diagnostic.provider, "crm");
    }

    #[test]
    fn test_diagnostic_kind_mapping() {
        let timeout = GeoError::from(NetworkError::Timeout { elapsed_ms: 5 });
        assert_eq!(DiagnosticKind::from(&timeout), DiagnosticKind::Timeout);
        let unauthorized = GeoError::Unauthorized {
            system: SourceSystem::Utm5,
        };
        assert_eq!(DiagnosticKind::from(&unauthorized), DiagnosticKind::Unauthorized);
    }
}
