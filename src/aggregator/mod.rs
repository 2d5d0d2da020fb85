//! Aggregator - merges entities from every configured provider.
//!
//! ```text
//!                ┌─▶ crm      ─┐
//! request ──fan-out─▶ userside ─┼─▶ per-provider dedup ─▶ spatial filter ─▶ report
//!                └─▶ utm5     ─┘        (backend order kept)
//! ```
//!
//! Each provider call runs under its own deadline. A provider that fails or
//! times out contributes no entities and one [`Diagnostic`]; the aggregation
//! itself never fails. Cancelling through
//! [`Aggregator::aggregate_with_cancel`] drops every in-flight call and
//! discards what was accumulated.

use crate::config::AggregatorSettings;
use crate::core::auth::AuthContext;
use crate::core::entity::GeoEntity;
use crate::core::error::GeoError;
use crate::core::geometry::BoundsRect;
use crate::core::query::{AggregateRequest, GeoFilter, RadiusFilter};
use crate::core::service::{Diagnostic, DiagnosticKind, Fetched, GeoProvider};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fan-out limits for one aggregation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorConfig {
    /// Deadline for a single provider call
    pub timeout: Duration,

    /// Providers queried at the same time
    pub max_concurrency: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_concurrency: 4,
        }
    }
}

impl From<&AggregatorSettings> for AggregatorConfig {
    fn from(settings: &AggregatorSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            max_concurrency: settings.max_concurrency.max(1),
        }
    }
}

/// Outcome of one aggregation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    /// Entities in provider order, then backend order
    pub entities: Vec<GeoEntity>,

    /// Entities left out of a spatial result because they have no position
    ///
    /// Always empty for non-spatial requests, where such entities stay in
    /// `entities`.
    #[serde(default)]
    pub unlocated: Vec<GeoEntity>,

    /// One entry per provider that failed, timed out or was unknown
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl AggregateReport {
    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }
}

/// Fan-out over a fixed set of providers
#[derive(Clone, Default)]
pub struct Aggregator {
    providers: Vec<Arc<dyn GeoProvider>>,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            providers: Vec::new(),
            config,
        }
    }

    /// Register a provider; one with the same name is replaced in place
    pub fn with_provider(mut self, provider: Arc<dyn GeoProvider>) -> Self {
        match self
            .providers
            .iter()
            .position(|p| p.name() == provider.name())
        {
            Some(index) => self.providers[index] = provider,
            None => self.providers.push(provider),
        }
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn GeoProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Providers named by the request, in registration order
    ///
    /// Unknown names produce a diagnostic instead of an error.
    fn select(&self, request: &AggregateRequest) -> (Vec<Arc<dyn GeoProvider>>, Vec<Diagnostic>) {
        let Some(names) = &request.providers else {
            return (self.providers.clone(), Vec::new());
        };

        let diagnostics = names
            .iter()
            .filter(|name| self.provider(name).is_none())
            .map(|name| {
                Diagnostic::new(
                    name.as_str(),
                    DiagnosticKind::Internal,
                    format!("no provider named '{}'", name),
                )
            })
            .collect();
        let selected = self
            .providers
            .iter()
            .filter(|p| names.iter().any(|n| n == p.name()))
            .cloned()
            .collect();
        (selected, diagnostics)
    }

    async fn fetch_one(
        &self,
        provider: &dyn GeoProvider,
        auth: &AuthContext,
        filter: &GeoFilter,
    ) -> Fetched<GeoEntity> {
        let timeout = self.config.timeout;
        match tokio::time::timeout(timeout, provider.fetch_entities(auth, filter)).await {
            Ok(fetched) => {
                debug!(
                    provider = provider.name(),
                    count = fetched.items.len(),
                    degraded = fetched.is_degraded(),
                    "provider fetch complete"
                );
                fetched
            }
            Err(_) => Fetched::failed(Diagnostic::timeout(provider.name(), timeout)),
        }
    }

    /// Query every selected provider and merge the results
    pub async fn aggregate(&self, auth: &AuthContext, request: &AggregateRequest) -> AggregateReport {
        let (providers, mut diagnostics) = self.select(request);
        let filter = &request.filter;

        let fetches: Vec<_> = providers.iter().cloned().map(|provider: Arc<dyn GeoProvider>| async move {
            self.fetch_one(provider.as_ref(), auth, filter).await
        }).collect();
        let results: Vec<Fetched<GeoEntity>> = stream::iter(fetches)
            .buffered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        let mut merged = Vec::new();
        for fetched in results {
            merged.extend(dedup_by_id(fetched.items));
            diagnostics.extend(fetched.diagnostic);
        }

        let report = if request.is_spatial() {
            let (entities, unlocated) =
                spatial_filter(merged, request.filter.bounds.as_ref(), request.radius.as_ref());
            AggregateReport {
                entities,
                unlocated,
                diagnostics,
            }
        } else {
            AggregateReport {
                entities: merged,
                unlocated: Vec::new(),
                diagnostics,
            }
        };

        if report.is_degraded() {
            warn!(
                providers = providers.len(),
                failed = report.diagnostics.len(),
                entities = report.entities.len(),
                "aggregation degraded"
            );
        } else {
            debug!(
                providers = providers.len(),
                entities = report.entities.len(),
                "aggregation complete"
            );
        }
        report
    }

    /// [`aggregate`](Self::aggregate) that stops as soon as `cancel` fires
    pub async fn aggregate_with_cancel(
        &self,
        auth: &AuthContext,
        request: &AggregateRequest,
        cancel: &CancellationToken,
    ) -> Result<AggregateReport, GeoError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("aggregation cancelled");
                Err(GeoError::Cancelled)
            }
            report = self.aggregate(auth, request) => Ok(report),
        }
    }
}

/// Drop repeated ids from one provider's sequence, keeping the first
///
/// Ids are scoped by kind: a backend may number nodes and lines separately.
pub fn dedup_by_id(entities: Vec<GeoEntity>) -> Vec<GeoEntity> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|entity| seen.insert((entity.source_system, entity.kind, entity.id.clone())))
        .collect()
}

/// True when a located entity passes both optional filters
pub fn matches_spatial(
    entity: &GeoEntity,
    bounds: Option<&BoundsRect>,
    radius: Option<&RadiusFilter>,
) -> bool {
    let Some(point) = entity.location() else {
        return false;
    };
    bounds.is_none_or(|b| b.contains(&point)) && radius.is_none_or(|r| r.contains(&point))
}

/// Split into (matching located entities, entities without a position)
pub fn spatial_filter(
    entities: Vec<GeoEntity>,
    bounds: Option<&BoundsRect>,
    radius: Option<&RadiusFilter>,
) -> (Vec<GeoEntity>, Vec<GeoEntity>) {
    let (located, unlocated): (Vec<_>, Vec<_>) =
        entities.into_iter().partition(GeoEntity::is_located);
    let matching = located
        .into_iter()
        .filter(|entity| matches_spatial(entity, bounds, radius))
        .collect();
    (matching, unlocated)
}
