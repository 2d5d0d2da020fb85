//! Backend adapters implementing [`GeoProvider`](crate::core::GeoProvider)

pub mod crm;
pub mod in_memory;
pub mod userside;
pub mod utm5;

pub use crm::{CrmAdapter, CrmClient, CrmDealsAdapter, RestCrmClient};
pub use in_memory::InMemoryProvider;
pub use userside::UsersideAdapter;
pub use utm5::Utm5Adapter;

use crate::core::auth::ApiAuth;
use crate::core::entity::GeoEntity;
use crate::core::error::{GeoError, ProtocolError};
use crate::core::geometry::BoundsRect;
use crate::transport::JsonTransport;
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Keys under which list endpoints wrap their records
const WRAPPER_KEYS: &[&str] = &["data", "items", "result", "list"];

/// Client for the inventory/billing APIs: `POST {base_url}{endpoint}` with `{auth, ...params}`
#[derive(Clone)]
pub struct PostJsonApi {
    transport: Arc<dyn JsonTransport>,
    base_url: String,
    backend: &'static str,
}

impl PostJsonApi {
    pub fn new(transport: Arc<dyn JsonTransport>, base_url: &str, backend: &'static str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            backend,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn call(&self, endpoint: &str, auth: &ApiAuth, params: Value) -> Result<Value, GeoError> {
        let mut body = Map::new();
        body.insert("auth".to_string(), auth.0.clone());
        if let Value::Object(params) = params {
            body.extend(params);
        }
        let url = format!("{}{}", self.base_url, endpoint);
        tracing::trace!(backend = self.backend, endpoint, "calling backend");
        self.transport
            .post_json(&url, &[("Content-Type", "application/json")], &Value::Object(body))
            .await
    }

    /// Call an endpoint that answers with a list of records
    pub async fn call_list(
        &self,
        endpoint: &str,
        auth: &ApiAuth,
        params: Value,
        keys: &[&str],
    ) -> Result<Vec<Map<String, Value>>, GeoError> {
        let response = self.call(endpoint, auth, params).await?;
        list_records(self.backend, response, keys)
    }

    /// Call an endpoint that answers with one record (possibly wrapped)
    pub async fn call_single(
        &self,
        endpoint: &str,
        auth: &ApiAuth,
        params: Value,
        keys: &[&str],
    ) -> Result<Option<Map<String, Value>>, GeoError> {
        let response = self.call(endpoint, auth, params).await?;
        Ok(single_record(response, keys))
    }
}

/// Records from a bare array or from the first array found under `keys` or a wrapper key
pub(crate) fn list_records(
    backend: &str,
    response: Value,
    keys: &[&str],
) -> Result<Vec<Map<String, Value>>, GeoError> {
    let items = match response {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let key = keys
                .iter()
                .chain(WRAPPER_KEYS)
                .find(|key| map.get(**key).is_some_and(Value::is_array));
            match key.and_then(|key| map.remove(*key)) {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(ProtocolError::MalformedPayload {
                        backend: backend.to_string(),
                        message: "expected a list of records".to_string(),
                    }
                    .into());
                }
            }
        }
        other => {
            return Err(ProtocolError::MalformedPayload {
                backend: backend.to_string(),
                message: format!("expected a list of records, got {}", other),
            }
            .into());
        }
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect())
}

pub(crate) fn single_record(response: Value, keys: &[&str]) -> Option<Map<String, Value>> {
    let Value::Object(mut map) = response else {
        return None;
    };
    let wrapped = keys
        .iter()
        .chain(WRAPPER_KEYS)
        .find(|key| map.get(**key).is_some_and(Value::is_object))
        .and_then(|key| map.remove(*key));
    match wrapped {
        Some(Value::Object(inner)) => Some(inner),
        _ if map.is_empty() => None,
        _ => Some(map),
    }
}

pub(crate) fn bounds_params(bounds: &BoundsRect) -> Value {
    json!({
        "north": bounds.north,
        "south": bounds.south,
        "east": bounds.east,
        "west": bounds.west,
    })
}

/// Case-insensitive substring match over the label-like attributes
pub(crate) fn matches_text(entity: &GeoEntity, text: &str) -> bool {
    let needle = text.to_lowercase();
    std::iter::once(entity.title())
        .chain(["address", "full_address"].iter().filter_map(|k| entity.attribute(k)))
        .any(|value| value.to_lowercase().contains(&needle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_records_shapes() {
        let bare = list_records("us", json!([{"id": 1}, 5, {"id": 2}]), &[]).unwrap();
        assert_eq!(bare.len(), 2);

        let wrapped = list_records("us", json!({"nodes": [{"id": 1}]}), &["nodes"]).unwrap();
        assert_eq!(wrapped.len(), 1);

        let generic = list_records("us", json!({"status": "ok", "data": [{"id": 1}]}), &[]).unwrap();
        assert_eq!(generic.len(), 1);

        assert!(list_records("us", Value::Null, &[]).unwrap().is_empty());
        assert!(matches!(
            list_records("us", json!({"status": "ok"}), &[]),
            Err(GeoError::Protocol(_))
        ));
    }

    #[test]
    fn test_single_record_shapes() {
        assert_eq!(single_record(json!({"data": {"id": 3}}), &[]).unwrap()["id"], 3);
        assert_eq!(single_record(json!({"id": 3}), &[]).unwrap()["id"], 3);
        assert!(single_record(json!({}), &[]).is_none());
        assert!(single_record(json!([1]), &[]).is_none());
    }
}
