//! Yandex geocoder over its HTTP API
//!
//! Positions come back as `"lon lat"` strings; at most one result is
//! requested.

use crate::config::YandexConfig;
use crate::core::error::{GeoError, ProtocolError};
use crate::core::geometry::{BoundsRect, GeoPoint};
use crate::core::service::{Fetched, GeoCandidate, Geocoder};
use crate::transport::JsonTransport;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct YandexGeocoder {
    transport: Arc<dyn JsonTransport>,
    config: YandexConfig,
}

impl YandexGeocoder {
    pub fn new(transport: Arc<dyn JsonTransport>, config: YandexConfig) -> Self {
        Self { transport, config }
    }

    async fn geocode(&self, query: &str) -> Result<Vec<GeoCandidate>, GeoError> {
        let params = [
            ("apikey", self.config.api_key.as_str()),
            ("geocode", query),
            ("format", "json"),
            ("results", "1"),
        ];
        let response = self.transport.get_json(&self.config.endpoint, &params).await?;

        let members = response
            .pointer("/response/GeoObjectCollection/featureMember")
            .and_then(Value::as_array)
            .ok_or_else(|| ProtocolError::MalformedPayload {
                backend: "yandex".to_string(),
                message: "no GeoObjectCollection in response".to_string(),
            })?;

        Ok(members
            .first()
            .and_then(|member| member.get("GeoObject"))
            .and_then(|object| candidate(object, query))
            .into_iter()
            .collect())
    }
}

/// `"37.617635 55.755814"` → point
fn parse_lon_lat(text: &str) -> Option<GeoPoint> {
    let mut parts = text.split_whitespace();
    let lon: f64 = parts.next()?.parse().ok()?;
    let lat: f64 = parts.next()?.parse().ok()?;
    GeoPoint::new(lat, lon)
}

fn candidate(object: &Value, query: &str) -> Option<GeoCandidate> {
    let point = object
        .pointer("/Point/pos")
        .and_then(Value::as_str)
        .and_then(parse_lon_lat)?;

    let corner = |name: &str| {
        object
            .pointer(&format!("/boundedBy/Envelope/{}", name))
            .and_then(Value::as_str)
            .and_then(parse_lon_lat)
    };
    let bounds = match (corner("lowerCorner"), corner("upperCorner")) {
        (Some(lower), Some(upper)) => Some(BoundsRect::from_corners(lower, upper)),
        _ => None,
    };

    let label = object
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .unwrap_or(query)
        .to_string();

    Some(GeoCandidate {
        x: point.lng,
        y: point.lat,
        label,
        bounds,
        raw: object.clone(),
    })
}

#[async_trait]
impl Geocoder for YandexGeocoder {
    fn name(&self) -> &str {
        "yandex"
    }

    async fn lookup(&self, query: &str) -> Fetched<GeoCandidate> {
        Fetched::from_result(self.name(), self.geocode(query).await)
    }
}
