//! Userside network inventory: nodes and optical lines

use crate::adapters::{PostJsonApi, bounds_params, matches_text};
use crate::core::auth::AuthContext;
use crate::core::entity::{EntityKind, GeoEntity, Shape, SourceSystem};
use crate::core::error::GeoError;
use crate::core::field::{attributes_from_object, extract_point, first_string, parse_ring};
use crate::core::geometry::BoundsRect;
use crate::core::query::GeoFilter;
use crate::core::service::{Diagnostic, Fetched, GeoProvider};
use crate::transport::JsonTransport;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;

const LAT_KEYS: &[&str] = &["lat", "latitude", "coord_lat", "coordinates"];
const LNG_KEYS: &[&str] = &["lon", "lng", "longitude", "coord_lon"];
const PATH_KEYS: &[&str] = &["path", "points", "coordinates", "geometry"];

/// Read-only adapter over the Userside API
pub struct UsersideAdapter {
    api: PostJsonApi,
}

impl UsersideAdapter {
    pub fn new(transport: Arc<dyn JsonTransport>, base_url: &str) -> Self {
        Self {
            api: PostJsonApi::new(transport, base_url, "userside"),
        }
    }

    fn node_entity(record: &Map<String, Value>) -> Option<GeoEntity> {
        let id = first_string(record, &["id", "node_id", "code"])?;
        let mut entity = GeoEntity::new(id, SourceSystem::Userside, EntityKind::Node)
            .with_point(extract_point(record, LAT_KEYS, LNG_KEYS))
            .with_attributes(attributes_from_object(record, &["id"]));
        if let Some(name) = first_string(record, &["name", "title"]) {
            entity = entity.with_attribute("name", name);
        }
        Some(entity)
    }

    fn line_entity(record: &Map<String, Value>) -> Option<GeoEntity> {
        let id = first_string(record, &["id", "line_id"])?;
        let mut skip = vec!["id"];
        skip.extend(PATH_KEYS);
        let mut entity = GeoEntity::new(id, SourceSystem::Userside, EntityKind::Line)
            .with_attributes(attributes_from_object(record, &skip));
        let path = PATH_KEYS
            .iter()
            .filter_map(|key| record.get(*key))
            .find_map(parse_ring);
        if let Some(path) = path {
            entity = entity.with_shape(Shape::Line(path));
        }
        Some(entity)
    }

    async fn list(
        &self,
        auth: &AuthContext,
        endpoint: &str,
        params: Value,
        key: &str,
        map: fn(&Map<String, Value>) -> Option<GeoEntity>,
    ) -> Result<Vec<GeoEntity>, GeoError> {
        let records = self.api.call_list(endpoint, auth.userside()?, params, &[key]).await?;
        Ok(records.iter().filter_map(map).collect())
    }

    async fn single(
        &self,
        auth: &AuthContext,
        endpoint: &str,
        params: Value,
        key: &str,
        map: fn(&Map<String, Value>) -> Option<GeoEntity>,
    ) -> Result<Vec<GeoEntity>, GeoError> {
        let record = self.api.call_single(endpoint, auth.userside()?, params, &[key]).await?;
        Ok(record.as_ref().and_then(map).into_iter().collect())
    }

    async fn raw(
        &self,
        auth: &AuthContext,
        endpoint: &str,
        params: Value,
        key: &str,
    ) -> Result<Vec<Value>, GeoError> {
        let records = self.api.call_list(endpoint, auth.userside()?, params, &[key]).await?;
        Ok(records.into_iter().map(Value::Object).collect())
    }

    pub async fn nodes(&self, auth: &AuthContext) -> Fetched<GeoEntity> {
        let result = self.list(auth, "/nodes", json!({}), "nodes", Self::node_entity).await;
        Fetched::from_result(self.name(), result)
    }

    /// Zero or one node
    pub async fn node(&self, auth: &AuthContext, node_id: &str) -> Fetched<GeoEntity> {
        let params = json!({ "node_id": node_id });
        let result = self.single(auth, "/node", params, "node", Self::node_entity).await;
        Fetched::from_result(self.name(), result)
    }

    pub async fn optical_lines(&self, auth: &AuthContext) -> Fetched<GeoEntity> {
        let result = self
            .list(auth, "/optical-lines", json!({}), "lines", Self::line_entity)
            .await;
        Fetched::from_result(self.name(), result)
    }

    pub async fn optical_line(&self, auth: &AuthContext, line_id: &str) -> Fetched<GeoEntity> {
        let params = json!({ "line_id": line_id });
        let result = self
            .single(auth, "/optical-line", params, "line", Self::line_entity)
            .await;
        Fetched::from_result(self.name(), result)
    }

    /// Equipment records, optionally limited to one node
    pub async fn equipment(&self, auth: &AuthContext, node_id: Option<&str>) -> Fetched<Value> {
        let params = match node_id {
            Some(id) => json!({ "node_id": id }),
            None => json!({}),
        };
        let result = self.raw(auth, "/equipment", params, "equipment").await;
        Fetched::from_result(self.name(), result)
    }

    /// Raw address records matching `query`
    pub async fn search_address(&self, auth: &AuthContext, query: &str) -> Fetched<Value> {
        let params = json!({ "query": query });
        let result = self.raw(auth, "/address/search", params, "addresses").await;
        Fetched::from_result(self.name(), result)
    }

    pub async fn nodes_in_bounds(&self, auth: &AuthContext, bounds: &BoundsRect) -> Fetched<GeoEntity> {
        let result = self
            .list(auth, "/nodes/bounds", bounds_params(bounds), "nodes", Self::node_entity)
            .await;
        Fetched::from_result(self.name(), result)
    }

    pub async fn lines_in_bounds(&self, auth: &AuthContext, bounds: &BoundsRect) -> Fetched<GeoEntity> {
        let result = self
            .list(auth, "/lines/bounds", bounds_params(bounds), "lines", Self::line_entity)
            .await;
        Fetched::from_result(self.name(), result)
    }
}

#[async_trait]
impl GeoProvider for UsersideAdapter {
    fn name(&self) -> &str {
        "userside"
    }

    fn source_system(&self) -> SourceSystem {
        SourceSystem::Userside
    }

    /// Nodes followed by lines; bounds go to the bounds endpoints, text is matched locally
    async fn fetch_entities(&self, auth: &AuthContext, filter: &GeoFilter) -> Fetched<GeoEntity> {
        let (nodes, lines) = match &filter.bounds {
            Some(bounds) => {
                futures::join!(self.nodes_in_bounds(auth, bounds), self.lines_in_bounds(auth, bounds))
            }
            None => futures::join!(self.nodes(auth), self.optical_lines(auth)),
        };

        let diagnostic: Option<Diagnostic> = nodes.diagnostic.or(lines.diagnostic);
        let mut items = nodes.items;
        items.extend(lines.items);
        if let Some(text) = filter.text() {
            items.retain(|entity| matches_text(entity, text));
        }
        Fetched { items, diagnostic }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::auth::ApiAuth;
    use crate::core::error::NetworkError;
    use crate::core::geometry::GeoPoint;
    use crate::core::service::DiagnosticKind;
    use crate::transport::testing::ScriptedTransport;

    fn auth() -> AuthContext {
        AuthContext::anonymous().with_userside(ApiAuth::new(json!({"key": "us-key"})))
    }

    #[tokio::test]
    async fn test_nodes_and_lines_are_normalized() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on(
                    "/nodes",
                    Ok(json!([
                        {"id": 10, "name": "PoP-1", "lat": "55.75", "lon": "37.61", "address": "Tverskaya 1"},
                        {"id": 11, "name": "Box", "lat": null, "lon": null}
                    ])),
                )
                .on(
                    "/optical-lines",
                    Ok(json!({"lines": [{"id": 5, "path": [[55.0, 37.0], [56.0, 38.0]], "fibers": 16}]})),
                ),
        );
        let adapter = UsersideAdapter::new(transport.clone(), "https://us.local/api/");

        let fetched = adapter.fetch_entities(&auth(), &GeoFilter::all()).await;
        assert!(!fetched.is_degraded());
        assert_eq!(fetched.items.len(), 3);
        assert_eq!(fetched.items[0].kind, EntityKind::Node);
        assert_eq!(fetched.items[0].location(), GeoPoint::new(55.75, 37.61));
        assert!(!fetched.items[1].is_located());

        let line = &fetched.items[2];
        assert_eq!(line.kind, EntityKind::Line);
        assert_eq!(line.location(), GeoPoint::new(55.5, 37.5));
        assert_eq!(line.attribute("fibers"), Some("16"));

        let calls = transport.calls();
        assert!(calls.iter().any(|c| c.url == "https://us.local/api/nodes"));
        assert_eq!(calls[0].body["auth"], json!({"key": "us-key"}));
    }

    #[tokio::test]
    async fn test_bounds_use_bounds_endpoints() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on("/nodes/bounds", Ok(json!([])))
                .on("/lines/bounds", Ok(json!([]))),
        );
        let adapter = UsersideAdapter::new(transport.clone(), "https://us.local");
        let bounds = BoundsRect::new(56.0, 54.0, 38.0, 36.0).unwrap();

        let fetched = adapter
            .fetch_entities(&auth(), &GeoFilter::all().with_bounds(bounds))
            .await;
        assert!(!fetched.is_degraded());

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        let nodes = calls.iter().find(|c| c.url.ends_with("/nodes/bounds")).unwrap();
        assert_eq!(nodes.body["north"], 56.0);
        assert_eq!(nodes.body["west"], 36.0);
    }

    #[tokio::test]
    async fn test_failed_call_keeps_other_half() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on("/nodes", Ok(json!([{"id": 1, "lat": 1, "lon": 1}])))
                .on(
                    "/optical-lines",
                    Err(NetworkError::Status {
                        status: 500,
                        url: "https://us.local/optical-lines".into(),
                    }
                    .into()),
                ),
        );
        let adapter = UsersideAdapter::new(transport, "https://us.local");
        let fetched = adapter.fetch_entities(&auth(), &GeoFilter::all()).await;
        assert_eq!(fetched.items.len(), 1);
        assert_eq!(fetched.diagnostic.unwrap().kind, DiagnosticKind::Network);
    }

    #[tokio::test]
    async fn test_text_filter_is_local() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on(
                    "/nodes",
                    Ok(json!([
                        {"id": 1, "name": "North hub", "address": "Lenina 5"},
                        {"id": 2, "name": "South hub"}
                    ])),
                )
                .on("/optical-lines", Ok(json!([]))),
        );
        let adapter = UsersideAdapter::new(transport, "https://us.local");
        let fetched = adapter
            .fetch_entities(&auth(), &GeoFilter::all().with_text("lenina"))
            .await;
        assert_eq!(fetched.items.len(), 1);
        assert_eq!(fetched.items[0].id, "1");
    }

    #[tokio::test]
    async fn test_single_lookups_and_equipment() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .on("/node", Ok(json!({"data": {"id": 7, "name": "N7"}})))
                .on("/equipment", Ok(json!({"equipment": [{"id": "sw-1"}, {"id": "sw-2"}]}))),
        );
        let adapter = UsersideAdapter::new(transport.clone(), "https://us.local");

        let node = adapter.node(&auth(), "7").await;
        assert_eq!(node.items.len(), 1);
        assert_eq!(node.items[0].title(), "N7");

        let equipment = adapter.equipment(&auth(), Some("7")).await;
        assert_eq!(equipment.items.len(), 2);
        assert_eq!(transport.calls()[1].body["node_id"], "7");
    }

    #[tokio::test]
    async fn test_writes_are_unsupported() {
        let adapter = UsersideAdapter::new(Arc::new(ScriptedTransport::new()), "https://us.local");
        let result = adapter.delete_entity(&auth(), "1").await;
        assert!(matches!(result, Err(GeoError::Unsupported { .. })));
    }

    #[tokio::test]
    async fn test_missing_auth_is_diagnosed_without_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let adapter = UsersideAdapter::new(transport.clone(), "https://us.local");
        let fetched = adapter.nodes(&AuthContext::anonymous()).await;
        assert_eq!(fetched.diagnostic.unwrap().kind, DiagnosticKind::Unauthorized);
        assert_eq!(transport.call_count(), 0);
    }
}
