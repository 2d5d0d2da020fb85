//! UTM5 billing: subscribers placed on the map by their address coordinates

use crate::adapters::{PostJsonApi, bounds_params, matches_text};
use crate::core::auth::AuthContext;
use crate::core::entity::{EntityKind, GeoEntity, SourceSystem};
use crate::core::error::GeoError;
use crate::core::field::{attributes_from_object, extract_point, first_string};
use crate::core::geometry::BoundsRect;
use crate::core::query::GeoFilter;
use crate::core::service::{Fetched, GeoProvider};
use crate::transport::JsonTransport;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const LAT_KEYS: &[&str] = &["lat", "latitude", "house_lat", "coordinates"];
const LNG_KEYS: &[&str] = &["lon", "lng", "longitude", "house_lon"];

/// Read-only adapter over the UTM5 API
pub struct Utm5Adapter {
    api: PostJsonApi,
}

impl Utm5Adapter {
    pub fn new(transport: Arc<dyn JsonTransport>, base_url: &str) -> Self {
        Self {
            api: PostJsonApi::new(transport, base_url, "utm5"),
        }
    }

    fn customer_entity(record: &Map<String, Value>) -> Option<GeoEntity> {
        let id = first_string(record, &["id", "customer_id", "user_id"])?;
        let mut entity = GeoEntity::new(id, SourceSystem::Utm5, EntityKind::Point)
            .with_point(extract_point(record, LAT_KEYS, LNG_KEYS))
            .with_attributes(attributes_from_object(record, &["id"]));
        if let Some(name) = first_string(record, &["full_name", "name", "login"]) {
            entity = entity.with_attribute("name", name);
        }
        Some(entity)
    }

    async fn customer_list(
        &self,
        auth: &AuthContext,
        endpoint: &str,
        params: Value,
    ) -> Result<Vec<GeoEntity>, GeoError> {
        let records = self
            .api
            .call_list(endpoint, auth.utm5()?, params, &["customers", "users"])
            .await?;
        Ok(records.iter().filter_map(Self::customer_entity).collect())
    }

    async fn raw(
        &self,
        auth: &AuthContext,
        endpoint: &str,
        customer_id: Option<&str>,
        key: &str,
    ) -> Result<Vec<Value>, GeoError> {
        let params = match customer_id {
            Some(id) => json!({ "customer_id": id }),
            None => json!({}),
        };
        let records = self.api.call_list(endpoint, auth.utm5()?, params, &[key]).await?;
        Ok(records.into_iter().map(Value::Object).collect())
    }

    /// Customers matching backend-side `filters` (passed through verbatim)
    pub async fn customers(&self, auth: &AuthContext, filters: Value) -> Fetched<GeoEntity> {
        let result = self.customer_list(auth, "/customers", filters).await;
        Fetched::from_result(self.name(), result)
    }

    /// Zero or one customer
    pub async fn customer(&self, auth: &AuthContext, customer_id: &str) -> Fetched<GeoEntity> {
        let result: Result<Vec<GeoEntity>, GeoError> = match auth.utm5() {
            Ok(utm5) => self
                .api
                .call_single("/customer", utm5, json!({ "customer_id": customer_id }), &["customer"])
                .await
                .map(|record| {
                    record
                        .as_ref()
                        .and_then(Self::customer_entity)
                        .into_iter()
                        .collect()
                }),
            Err(err) => Err(err),
        };
        Fetched::from_result(self.name(), result)
    }

    pub async fn customers_by_address(&self, auth: &AuthContext, address: &str) -> Fetched<GeoEntity> {
        let result = self
            .customer_list(auth, "/customers/search", json!({ "address": address }))
            .await;
        Fetched::from_result(self.name(), result)
    }

    pub async fn customers_in_bounds(&self, auth: &AuthContext, bounds: &BoundsRect) -> Fetched<GeoEntity> {
        let result = self
            .customer_list(auth, "/customers/bounds", bounds_params(bounds))
            .await;
        Fetched::from_result(self.name(), result)
    }

    /// Tariff services, optionally for one customer
    pub async fn services(&self, auth: &AuthContext, customer_id: Option<&str>) -> Fetched<Value> {
        let result = self.raw(auth, "/services", customer_id, "services").await;
        Fetched::from_result(self.name(), result)
    }

    /// Billing accounts, optionally for one customer
    pub async fn accounts(&self, auth: &AuthContext, customer_id: Option<&str>) -> Fetched<Value> {
        let result = self.raw(auth, "/accounts", customer_id, "accounts").await;
        Fetched::from_result(self.name(), result)
    }
}

#[async_trait]
impl GeoProvider for Utm5Adapter {
    fn name(&self) -> &str {
        "utm5"
    }

    fn source_system(&self) -> SourceSystem {
        SourceSystem::Utm5
    }

    /// Bounds win over text search; text is still applied locally when both are set
    async fn fetch_entities(&self, auth: &AuthContext, filter: &GeoFilter) -> Fetched<GeoEntity> {
        match (&filter.bounds, filter.text()) {
            (Some(bounds), text) => {
                let mut fetched = self.customers_in_bounds(auth, bounds).await;
                if let Some(text) = text {
                    fetched.items.retain(|entity| matches_text(entity, text));
                }
                fetched
            }
            (None, Some(text)) => self.customers_by_address(auth, text).await,
            (None, None) => self.customers(auth, json!({})).await,
        }
    }
}
