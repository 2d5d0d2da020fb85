//! DaData address suggestions

use crate::config::DadataConfig;
use crate::core::error::GeoError;
use crate::core::field::FieldValue;
use crate::core::service::{Fetched, GeoCandidate, Geocoder};
use crate::transport::JsonTransport;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;

/// Address suggestions with coordinates from DaData
pub struct DadataGeocoder {
    transport: Arc<dyn JsonTransport>,
    config: DadataConfig,
}

impl DadataGeocoder {
    pub fn new(transport: Arc<dyn JsonTransport>, config: DadataConfig) -> Self {
        Self { transport, config }
    }

    async fn suggest(&self, query: &str) -> Result<Vec<GeoCandidate>, GeoError> {
        let authorization = format!("Token {}", self.config.token);
        let headers = [
            ("Accept", "application/json"),
            ("Authorization", authorization.as_str()),
        ];
        let body = json!({ "query": query, "count": self.config.count });

        let response = self
            .transport
            .post_json(&self.config.endpoint, &headers, &body)
            .await?;
        Ok(candidates(&response))
    }
}

/// Suggestions lacking `geo_lat`/`geo_lon` are dropped
fn candidates(response: &Value) -> Vec<GeoCandidate> {
    let Some(suggestions) = response.get("suggestions").and_then(Value::as_array) else {
        return Vec::new();
    };
    suggestions
        .iter()
        .filter_map(|suggestion| {
            let data = suggestion.get("data")?;
            let lat = data.get("geo_lat").map(FieldValue::from_json)?.as_f64()?;
            let lon = data.get("geo_lon").map(FieldValue::from_json)?.as_f64()?;
            Some(GeoCandidate {
                x: lon,
                y: lat,
                label: suggestion
                    .get("value")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                bounds: None,
                raw: suggestion.clone(),
            })
        })
        .filter(|candidate| candidate.point().is_some())
        .collect()
}

#[async_trait]
impl Geocoder for DadataGeocoder {
    fn name(&self) -> &str {
        "dadata"
    }

    async fn lookup(&self, query: &str) -> Fetched<GeoCandidate> {
        Fetched::from_result(self.name(), self.suggest(query).await)
    }
}
