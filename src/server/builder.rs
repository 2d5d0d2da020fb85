//! ServerBuilder for fluent API to build the map HTTP server

use super::handlers::AppState;
use super::router::build_routes;
use crate::adapters::{
    CrmAdapter, CrmClient, CrmDealsAdapter, RestCrmClient, UsersideAdapter, Utm5Adapter,
};
use crate::aggregator::{Aggregator, AggregatorConfig};
use crate::config::MapGeoConfig;
use crate::core::service::{GeoProvider, Geocoder};
use crate::geocoding::{DadataGeocoder, YandexGeocoder};
use crate::transport::{JsonTransport, ReqwestTransport};
use anyhow::Result;
use axum::Router;
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Builder for the map HTTP server
///
/// # Example
///
/// ```ignore
/// let app = ServerBuilder::new()
///     .with_provider(InMemoryProvider::new())
///     .with_geocoder(DadataGeocoder::new(transport, dadata))
///     .build()?;
/// ```
pub struct ServerBuilder {
    aggregator_config: AggregatorConfig,
    providers: Vec<Arc<dyn GeoProvider>>,
    crm: Option<Arc<CrmAdapter>>,
    geocoders: IndexMap<String, Arc<dyn Geocoder>>,
    custom_routes: Vec<Router>,
    shutdown: CancellationToken,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            aggregator_config: AggregatorConfig::default(),
            providers: Vec::new(),
            crm: None,
            geocoders: IndexMap::new(),
            custom_routes: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Register every backend and geocoder present in `config`
    ///
    /// All adapters share one HTTP client.
    pub fn from_config(config: &MapGeoConfig) -> Result<Self> {
        let transport: Arc<dyn JsonTransport> = Arc::new(ReqwestTransport::with_settings(
            config.http.timeout(),
            &config.http.user_agent,
        )?);
        Self::from_config_with_transport(config, transport)
    }

    /// Same as [`from_config`](Self::from_config) over a caller-supplied transport
    pub fn from_config_with_transport(
        config: &MapGeoConfig,
        transport: Arc<dyn JsonTransport>,
    ) -> Result<Self> {
        let mut builder = Self::new().with_aggregator_config((&config.aggregator).into());

        let crm_client: Arc<dyn CrmClient> = Arc::new(RestCrmClient::new(transport.clone()));
        if config.crm.enabled {
            builder = builder.with_crm(CrmAdapter::new(crm_client.clone(), config.crm.clone()));
        }
        if config.crm.deals.enabled {
            builder = builder.with_provider(CrmDealsAdapter::new(
                crm_client,
                config.crm.deals.clone(),
            ));
        }
        if let Some(userside) = &config.userside {
            builder =
                builder.with_provider(UsersideAdapter::new(transport.clone(), &userside.base_url));
        }
        if let Some(utm5) = &config.utm5 {
            builder = builder.with_provider(Utm5Adapter::new(transport.clone(), &utm5.base_url));
        }
        if let Some(dadata) = &config.dadata {
            builder = builder.with_geocoder(DadataGeocoder::new(transport.clone(), dadata.clone()));
        }
        if let Some(yandex) = &config.yandex {
            builder = builder.with_geocoder(YandexGeocoder::new(transport, yandex.clone()));
        }

        tracing::info!(
            providers = builder.providers.len(),
            geocoders = builder.geocoders.len(),
            "server configured"
        );
        Ok(builder)
    }

    pub fn with_aggregator_config(mut self, config: AggregatorConfig) -> Self {
        self.aggregator_config = config;
        self
    }

    /// Register an entity provider under its own name
    pub fn with_provider(mut self, provider: impl GeoProvider + 'static) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Register the smart-process adapter as a provider and as the stage source
    pub fn with_crm(mut self, adapter: CrmAdapter) -> Self {
        let adapter = Arc::new(adapter);
        self.providers.push(adapter.clone());
        self.crm = Some(adapter);
        self
    }

    /// Register a geocoder under its own name; a later one with the same name wins
    pub fn with_geocoder(mut self, geocoder: impl Geocoder + 'static) -> Self {
        let geocoder: Arc<dyn Geocoder> = Arc::new(geocoder);
        self.geocoders.insert(geocoder.name().to_string(), geocoder);
        self
    }

    /// Add custom routes to the server
    ///
    /// Custom routes are merged after the built-in ones.
    pub fn with_custom_routes(mut self, routes: Router) -> Self {
        self.custom_routes.push(routes);
        self
    }

    /// Token cancelled when the server shuts down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Assemble the shared handler state
    pub fn build_state(&self) -> AppState {
        let aggregator = self
            .providers
            .iter()
            .cloned()
            .fold(Aggregator::new(self.aggregator_config), Aggregator::with_provider);

        AppState {
            aggregator: Arc::new(aggregator),
            crm: self.crm.clone(),
            geocoders: Arc::new(self.geocoders.clone()),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Build the final router
    pub fn build(mut self) -> Result<Router> {
        let state = self.build_state();
        let mut app = build_routes(state);

        for routes in self.custom_routes.drain(..) {
            app = app.merge(routes);
        }

        Ok(app)
    }

    /// Serve the application with graceful shutdown
    ///
    /// Running aggregations are cancelled when the shutdown signal arrives.
    pub async fn serve(self, addr: &str) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let app = self.build()?;
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                shutdown.cancel();
            })
            .await?;

        tracing::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
