//! Bitrix24 CRM adapter
//!
//! Smart-process items carry the map layers (category 61 holds polygons,
//! category 65 holds points); deals are the customer layer. Both are read
//! through the REST method API:
//!
//! ```text
//! POST https://{domain}/rest/{method}.json   { auth: <token>, ...params }
//!   ◀── { result: ..., next: 50, total: 120 }
//! ```

use crate::config::{CrmConfig, DealsConfig, GeoFieldNames};
use crate::core::auth::{AuthContext, CrmAuth};
use crate::core::entity::{EntityDraft, EntityKind, GeoEntity, Shape, SourceSystem};
use crate::core::error::{GeoError, NetworkError, ProtocolError, ValidationError};
use crate::core::field::{
    attributes_from_object, extract_point, first_number, first_string, is_custom_field, parse_ring,
};
use crate::core::pagination::{Page, PageCursor, collect_pages};
use crate::core::query::GeoFilter;
use crate::core::service::{Fetched, GeoProvider};
use crate::transport::JsonTransport;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::debug;

/// Decoded REST envelope
#[derive(Debug, Clone, PartialEq)]
pub struct CrmResponse {
    pub result: Value,
    /// Offset of the next page, zero when there is none
    pub next: u64,
    pub total: Option<u64>,
}

impl CrmResponse {
    fn cursor(&self) -> PageCursor {
        PageCursor::new(self.next)
    }
}

/// Generic CRM RPC call
#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn call_method(
        &self,
        auth: &CrmAuth,
        method: &str,
        params: Value,
    ) -> Result<CrmResponse, GeoError>;
}

/// [`CrmClient`] over the portal's REST endpoint
#[derive(Clone)]
pub struct RestCrmClient {
    transport: Arc<dyn JsonTransport>,
}

impl RestCrmClient {
    pub fn new(transport: Arc<dyn JsonTransport>) -> Self {
        Self { transport }
    }

    pub fn method_url(auth: &CrmAuth, method: &str) -> String {
        format!("https://{}/rest/{}.json", auth.domain, method)
    }
}

#[async_trait]
impl CrmClient for RestCrmClient {
    async fn call_method(
        &self,
        auth: &CrmAuth,
        method: &str,
        params: Value,
    ) -> Result<CrmResponse, GeoError> {
        auth.validate()?;
        let url = Self::method_url(auth, method);

        let mut body = match params {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ValidationError::FieldError {
                    field: "params".to_string(),
                    message: format!("expected an object, got {}", other),
                }
                .into());
            }
        };
        body.insert("auth".to_string(), Value::String(auth.access_token.clone()));

        let response = self.transport.post_json(&url, &[], &Value::Object(body)).await?;
        decode_envelope(&auth.domain, method, response)
    }
}

fn decode_envelope(domain: &str, method: &str, response: Value) -> Result<CrmResponse, GeoError> {
    let Value::Object(mut envelope) = response else {
        return Err(ProtocolError::MalformedPayload {
            backend: "crm".to_string(),
            message: format!("{} did not return an object", method),
        }
        .into());
    };

    if let Some(code) = envelope.get("error").and_then(Value::as_str) {
        return Err(NetworkError::Backend {
            backend: domain.to_string(),
            code: code.to_string(),
            message: envelope
                .get("error_description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
        .into());
    }

    let next = envelope.get("next").and_then(Value::as_u64).unwrap_or(0);
    let total = envelope.get("total").and_then(Value::as_u64);
    let result = envelope.remove("result").ok_or_else(|| ProtocolError::MalformedPayload {
        backend: "crm".to_string(),
        message: format!("{} response has no 'result'", method),
    })?;

    Ok(CrmResponse {
        result,
        next,
        total,
    })
}

/// Path of an entity card inside the portal UI
pub fn entity_card_path(entity_type_id: i64, entity_id: &str) -> String {
    format!("/crm/type/{}/details/{}/", entity_type_id, entity_id)
}

/// CRM ids are integers; reject anything else before calling the portal
fn parse_crm_id(id: &str) -> Result<i64, ValidationError> {
    id.trim().parse().map_err(|_| ValidationError::FieldError {
        field: "id".to_string(),
        message: format!("'{}' is not a CRM id", id),
    })
}

/// Records under `key` of the result object, or the result itself when it is an array
fn result_records(result: &Value, key: &str, method: &str) -> Result<Vec<Map<String, Value>>, GeoError> {
    let list = match result {
        Value::Array(items) => items,
        Value::Object(map) => match map.get(key) {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(ProtocolError::MalformedPayload {
                    backend: "crm".to_string(),
                    message: format!("{} result has no '{}' list", method, key),
                }
                .into());
            }
        },
        _ => {
            return Err(ProtocolError::MalformedPayload {
                backend: "crm".to_string(),
                message: format!("{} result is neither a list nor an object", method),
            }
            .into());
        }
    };
    Ok(list.iter().filter_map(|v| v.as_object().cloned()).collect())
}

/// Attribute listing the user-defined (`UF_*`) fields present on a record
pub const CUSTOM_FIELDS_ATTRIBUTE: &str = "custom_fields";

/// Map one CRM record to an entity using the configured geo fields
fn record_to_entity(
    record: &Map<String, Value>,
    fields: &GeoFieldNames,
    kind: EntityKind,
) -> Option<GeoEntity> {
    let id = first_string(record, &["id", "ID"])?;
    let lat_keys = fields.latitude_keys();
    let lng_keys = fields.longitude_keys();
    let geometry_keys = fields.geometry_keys();

    let mut skip: Vec<&str> = vec!["id", "ID"];
    skip.extend(geometry_keys.iter().copied());

    let mut entity = GeoEntity::new(id, SourceSystem::Crm, kind)
        .with_point(extract_point(record, &lat_keys, &lng_keys))
        .with_attributes(attributes_from_object(record, &skip));

    if let Some(title) = first_string(record, &["title", "TITLE"]) {
        entity = entity.with_attribute("title", title);
    }

    let custom: Vec<String> = entity
        .attributes
        .keys()
        .filter(|key| is_custom_field(key))
        .cloned()
        .collect();
    if !custom.is_empty() {
        entity = entity.with_attribute(CUSTOM_FIELDS_ATTRIBUTE, custom.join(","));
    }

    let ring = geometry_keys
        .iter()
        .filter_map(|key| record.get(*key))
        .find_map(parse_ring);
    if let Some(ring) = ring {
        entity = entity.with_shape(Shape::Polygon(ring));
    }
    Some(entity)
}

/// Field map for a write, keyed by the first configured name of each geo field
fn draft_fields(draft: &EntityDraft, fields: &GeoFieldNames, title_key: &str) -> Map<String, Value> {
    let mut out: Map<String, Value> = draft
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    if let Some(title) = &draft.title {
        out.insert(title_key.to_string(), Value::String(title.clone()));
    }
    if let (Some(point), Some(lat_key), Some(lng_key)) =
        (draft.location(), fields.latitude.first(), fields.longitude.first())
    {
        out.insert(lat_key.clone(), json!(point.lat));
        out.insert(lng_key.clone(), json!(point.lng));
    }
    if let (Some(Shape::Polygon(ring)), Some(key)) = (&draft.shape, fields.geometry.first()) {
        let pairs: Vec<[f64; 2]> = ring.iter().map(|p| [p.lat, p.lng]).collect();
        out.insert(key.clone(), Value::String(json!(pairs).to_string()));
    }
    out
}

/// Stage of a smart-process category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmStage {
    pub status_id: String,
    pub name: String,
    pub sort: i64,
    #[serde(default)]
    pub semantics: Option<String>,
}

impl CrmStage {
    fn from_record(record: &Map<String, Value>) -> Option<Self> {
        Some(Self {
            status_id: first_string(record, &["STATUS_ID", "statusId"])?,
            name: first_string(record, &["NAME", "name"]).unwrap_or_default(),
            sort: first_number(record, &["SORT", "sort"]).unwrap_or(0.0) as i64,
            semantics: first_string(record, &["SEMANTICS", "semantics"]),
        })
    }
}

/// One command of a batch call
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCommand {
    pub method: String,
    pub params: Value,
}

impl BatchCommand {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }

    /// `method?a=1&filter[categoryId]=61&select[0]=*`
    pub fn to_command_string(&self) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        append_query(&mut query, None, &self.params);
        let query = query.finish();
        if query.is_empty() {
            self.method.clone()
        } else {
            format!("{}?{}", self.method, query)
        }
    }
}

fn append_query(
    query: &mut url::form_urlencoded::Serializer<'_, String>,
    prefix: Option<&str>,
    value: &Value,
) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let name = match prefix {
                    Some(p) => format!("{}[{}]", p, key),
                    None => key.clone(),
                };
                append_query(query, Some(&name), nested);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                let name = match prefix {
                    Some(p) => format!("{}[{}]", p, index),
                    None => index.to_string(),
                };
                append_query(query, Some(&name), nested);
            }
        }
        Value::Null => {
            if let Some(p) = prefix {
                query.append_pair(p, "");
            }
        }
        Value::String(s) => {
            if let Some(p) = prefix {
                query.append_pair(p, s);
            }
        }
        other => {
            if let Some(p) = prefix {
                query.append_pair(p, &other.to_string());
            }
        }
    }
}

/// Per-command outcome of a batch call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: IndexMap<String, Value>,
    pub errors: IndexMap<String, Value>,
}

fn object_entries(value: Option<&Value>) -> IndexMap<String, Value> {
    match value {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => IndexMap::new(),
    }
}

/// Smart-process items as map entities
pub struct CrmAdapter {
    client: Arc<dyn CrmClient>,
    config: CrmConfig,
}

impl CrmAdapter {
    pub fn new(client: Arc<dyn CrmClient>, config: CrmConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &CrmConfig {
        &self.config
    }

    fn kind_for_category(&self, category_id: Option<i64>) -> EntityKind {
        if category_id == Some(self.config.polygon_category_id) {
            EntityKind::Polygon
        } else {
            EntityKind::Point
        }
    }

    fn to_entity(&self, record: &Map<String, Value>) -> Option<GeoEntity> {
        let category = first_number(record, &["categoryId", "CATEGORY_ID"]).map(|c| c as i64);
        record_to_entity(record, &self.config.fields, self.kind_for_category(category))
    }

    /// Every item of the smart process matching `filter`, across all pages
    pub async fn list_items(
        &self,
        auth: &CrmAuth,
        filter: &GeoFilter,
    ) -> Result<Vec<GeoEntity>, GeoError> {
        let mut crm_filter = Map::new();
        if let Some(category_id) = filter.category_id {
            crm_filter.insert("categoryId".to_string(), json!(category_id));
        }
        if let Some(text) = filter.text() {
            crm_filter.insert("%title".to_string(), json!(text));
        }
        let crm_filter = Value::Object(crm_filter);

        let records = collect_pages(|cursor| {
            let params = json!({
                "entityTypeId": self.config.smart_process_id,
                "select": ["*", "UF_*"],
                "filter": crm_filter,
                "start": cursor.offset(),
            });
            async move {
                let response = self.client.call_method(auth, "crm.item.list", params).await?;
                let items = result_records(&response.result, "items", "crm.item.list")?;
                Ok(Page::new(items, response.cursor()))
            }
        })
        .await?;

        Ok(records.iter().filter_map(|r| self.to_entity(r)).collect())
    }

    /// Items of one category, degraded to a diagnostic on failure
    pub async fn fetch_category(&self, auth: &AuthContext, category_id: i64) -> Fetched<GeoEntity> {
        self.fetch_entities(auth, &GeoFilter::category(category_id)).await
    }

    pub async fn polygons(&self, auth: &AuthContext) -> Fetched<GeoEntity> {
        self.fetch_category(auth, self.config.polygon_category_id).await
    }

    pub async fn points(&self, auth: &AuthContext) -> Fetched<GeoEntity> {
        self.fetch_category(auth, self.config.point_category_id).await
    }

    /// Pipeline stages of a category
    pub async fn stages(&self, auth: &AuthContext, category_id: i64) -> Fetched<CrmStage> {
        let result = match auth.crm() {
            Ok(crm) => self.list_stages(crm, category_id).await,
            Err(err) => Err(err),
        };
        Fetched::from_result(self.name(), result)
    }

    async fn list_stages(&self, auth: &CrmAuth, category_id: i64) -> Result<Vec<CrmStage>, GeoError> {
        let entity_id = format!(
            "DYNAMIC_{}_STAGE_{}",
            self.config.smart_process_id, category_id
        );
        let statuses = collect_pages(|cursor| {
            let params = json!({
                "filter": { "ENTITY_ID": entity_id },
                "start": cursor.offset(),
            });
            async move {
                let response = self.client.call_method(auth, "crm.status.list", params).await?;
                let statuses = result_records(&response.result, "statuses", "crm.status.list")?;
                Ok(Page::new(statuses, response.cursor()))
            }
        })
        .await?;
        Ok(statuses.iter().filter_map(CrmStage::from_record).collect())
    }

    /// Run several methods in one round-trip
    ///
    /// With `halt` set the portal stops at the first failing command.
    pub async fn batch(
        &self,
        auth: &AuthContext,
        commands: &IndexMap<String, BatchCommand>,
        halt: bool,
    ) -> Result<BatchResult, GeoError> {
        let crm = auth.crm()?;
        let cmd: Map<String, Value> = commands
            .iter()
            .map(|(key, command)| (key.clone(), Value::String(command.to_command_string())))
            .collect();
        let params = json!({ "halt": if halt { 1 } else { 0 }, "cmd": cmd });

        let response = self.client.call_method(crm, "batch", params).await?;
        Ok(BatchResult {
            results: object_entries(response.result.get("result")),
            errors: object_entries(response.result.get("result_error")),
        })
    }

    /// Portal path of an item card
    pub fn entity_card_path(&self, entity_id: &str) -> String {
        entity_card_path(self.config.smart_process_id, entity_id)
    }

    fn item_from_result(&self, result: &Value, method: &str) -> Result<GeoEntity, GeoError> {
        result
            .get("item")
            .and_then(Value::as_object)
            .and_then(|item| self.to_entity(item))
            .ok_or_else(|| {
                ProtocolError::MalformedPayload {
                    backend: "crm".to_string(),
                    message: format!("{} result has no item", method),
                }
                .into()
            })
    }
}

#[async_trait]
impl GeoProvider for CrmAdapter {
    fn name(&self) -> &str {
        "crm"
    }

    fn source_system(&self) -> SourceSystem {
        SourceSystem::Crm
    }

    async fn fetch_entities(&self, auth: &AuthContext, filter: &GeoFilter) -> Fetched<GeoEntity> {
        let result = match auth.crm() {
            Ok(crm) => self.list_items(crm, filter).await,
            Err(err) => Err(err),
        };
        if let Ok(items) = &result {
            debug!(provider = "crm", count = items.len(), category = ?filter.category_id, "fetched smart-process items");
        }
        Fetched::from_result(self.name(), result)
    }

    async fn create_entity(
        &self,
        auth: &AuthContext,
        draft: EntityDraft,
    ) -> Result<GeoEntity, GeoError> {
        let crm = auth.crm()?;
        draft.validate()?;

        let category_id = draft.category_id.unwrap_or(match draft.kind {
            Some(EntityKind::Polygon) => self.config.polygon_category_id,
            _ => self.config.point_category_id,
        });
        let mut fields = draft_fields(&draft, &self.config.fields, "title");
        fields.insert("categoryId".to_string(), json!(category_id));

        let params = json!({
            "entityTypeId": self.config.smart_process_id,
            "fields": fields,
        });
        let response = self.client.call_method(crm, "crm.item.add", params).await?;
        self.item_from_result(&response.result, "crm.item.add")
    }

    async fn update_entity(
        &self,
        auth: &AuthContext,
        id: &str,
        draft: EntityDraft,
    ) -> Result<GeoEntity, GeoError> {
        let crm = auth.crm()?;
        let id = parse_crm_id(id)?;
        draft.validate()?;

        let mut fields = draft_fields(&draft, &self.config.fields, "title");
        if let Some(category_id) = draft.category_id {
            fields.insert("categoryId".to_string(), json!(category_id));
        }
        let params = json!({
            "entityTypeId": self.config.smart_process_id,
            "id": id,
            "fields": fields,
        });
        let response = self.client.call_method(crm, "crm.item.update", params).await?;
        self.item_from_result(&response.result, "crm.item.update")
    }

    async fn delete_entity(&self, auth: &AuthContext, id: &str) -> Result<(), GeoError> {
        let crm = auth.crm()?;
        let id = parse_crm_id(id)?;
        let params = json!({
            "entityTypeId": self.config.smart_process_id,
            "id": id,
        });
        self.client.call_method(crm, "crm.item.delete", params).await?;
        Ok(())
    }
}

/// Deals with coordinates in custom fields
pub struct CrmDealsAdapter {
    client: Arc<dyn CrmClient>,
    config: DealsConfig,
}

impl CrmDealsAdapter {
    pub fn new(client: Arc<dyn CrmClient>, config: DealsConfig) -> Self {
        Self { client, config }
    }

    fn to_entity(&self, record: &Map<String, Value>) -> Option<GeoEntity> {
        record_to_entity(record, &self.config.fields, EntityKind::Point)
    }

    pub async fn list_deals(
        &self,
        auth: &CrmAuth,
        filter: &GeoFilter,
    ) -> Result<Vec<GeoEntity>, GeoError> {
        let mut crm_filter = Map::new();
        if let Some(category_id) = filter.category_id {
            crm_filter.insert("CATEGORY_ID".to_string(), json!(category_id));
        }
        if let Some(text) = filter.text() {
            crm_filter.insert("%TITLE".to_string(), json!(text));
        }
        let crm_filter = Value::Object(crm_filter);

        let records = collect_pages(|cursor| {
            let params = json!({
                "select": ["ID", "TITLE", "UF_*"],
                "filter": crm_filter,
                "start": cursor.offset(),
            });
            async move {
                let response = self.client.call_method(auth, "crm.deal.list", params).await?;
                let deals = result_records(&response.result, "items", "crm.deal.list")?;
                Ok(Page::new(deals, response.cursor()))
            }
        })
        .await?;

        Ok(records.iter().filter_map(|r| self.to_entity(r)).collect())
    }

    /// One deal by id
    pub async fn get_deal(&self, auth: &AuthContext, id: &str) -> Result<GeoEntity, GeoError> {
        let crm = auth.crm()?;
        let numeric = parse_crm_id(id)?;
        let response = self
            .client
            .call_method(crm, "crm.deal.get", json!({ "id": numeric }))
            .await?;
        response
            .result
            .as_object()
            .and_then(|deal| self.to_entity(deal))
            .ok_or_else(|| GeoError::NotFound {
                provider: self.name().to_string(),
                id: id.to_string(),
            })
    }
}

#[async_trait]
impl GeoProvider for CrmDealsAdapter {
    fn name(&self) -> &str {
        "crm_deals"
    }

    fn source_system(&self) -> SourceSystem {
        SourceSystem::Crm
    }

    async fn fetch_entities(&self, auth: &AuthContext, filter: &GeoFilter) -> Fetched<GeoEntity> {
        let result = match auth.crm() {
            Ok(crm) => self.list_deals(crm, filter).await,
            Err(err) => Err(err),
        };
        Fetched::from_result(self.name(), result)
    }

    async fn create_entity(
        &self,
        auth: &AuthContext,
        draft: EntityDraft,
    ) -> Result<GeoEntity, GeoError> {
        let crm = auth.crm()?;
        draft.validate()?;
        let fields = draft_fields(&draft, &self.config.fields, "TITLE");

        let response = self
            .client
            .call_method(crm, "crm.deal.add", json!({ "fields": fields }))
            .await?;
        let id = match &response.result {
            Value::Number(n) => n.to_string(),
            Value::String(s) if !s.is_empty() => s.clone(),
            other => {
                return Err(ProtocolError::MalformedPayload {
                    backend: "crm".to_string(),
                    message: format!("crm.deal.add returned {} instead of an id", other),
                }
                .into());
            }
        };

        let mut record = fields;
        record.insert("ID".to_string(), Value::String(id));
        self.to_entity(&record).ok_or_else(|| GeoError::Internal("deal without id".to_string()))
    }

    async fn update_entity(
        &self,
        auth: &AuthContext,
        id: &str,
        draft: EntityDraft,
    ) -> Result<GeoEntity, GeoError> {
        let crm = auth.crm()?;
        let numeric = parse_crm_id(id)?;
        draft.validate()?;
        let fields = draft_fields(&draft, &self.config.fields, "TITLE");

        self.client
            .call_method(crm, "crm.deal.update", json!({ "id": numeric, "fields": fields }))
            .await?;
        self.get_deal(auth, id).await
    }

    async fn delete_entity(&self, auth: &AuthContext, id: &str) -> Result<(), GeoError> {
        let crm = auth.crm()?;
        let numeric = parse_crm_id(id)?;
        self.client
            .call_method(crm, "crm.deal.delete", json!({ "id": numeric }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geometry::GeoPoint;
    use crate::core::service::DiagnosticKind;
    use crate::transport::testing::ScriptedTransport;

    fn auth() -> AuthContext {
        AuthContext::anonymous().with_crm(CrmAuth::new("portal.bitrix24.ru", "token-1"))
    }

    fn adapter(transport: Arc<ScriptedTransport>) -> CrmAdapter {
        CrmAdapter::new(Arc::new(RestCrmClient::new(transport)), CrmConfig::default())
    }

    fn item(id: u64, category: i64, lat: &str, lng: &str) -> Value {
        json!({
            "id": id,
            "title": format!("Object {}", id),
            "categoryId": category,
            "ufCrmLatitude": lat,
            "ufCrmLongitude": lng,
            "ufCrm5Owner": "ISP",
        })
    }

    #[tokio::test]
    async fn test_list_follows_next_marker() {
        let first: Vec<Value> = (1..=50).map(|i| item(i, 65, "55.7", "37.6")).collect();
        let transport = Arc::new(
            ScriptedTransport::new()
                .on("crm.item.list", Ok(json!({"result": {"items": first}, "next": 50, "total": 52})))
                .on(
                    "crm.item.list",
                    Ok(json!({"result": {"items": [item(51, 65, "1", "2"), item(52, 65, "", "")]}, "total": 52})),
                ),
        );
        let adapter = adapter(transport.clone());

        let fetched = adapter.points(&auth()).await;
        assert!(!fetched.is_degraded());
        assert_eq!(fetched.items.len(), 52);
        assert!(!fetched.items[51].is_located());

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].url, "https://portal.bitrix24.ru/rest/crm.item.list.json");
        assert_eq!(calls[0].body["auth"], "token-1");
        assert_eq!(calls[0].body["entityTypeId"], 139);
        assert_eq!(calls[0].body["select"], json!(["*", "UF_*"]));
        assert_eq!(calls[0].body["filter"], json!({"categoryId": 65}));
        assert_eq!(calls[0].body["start"], 0);
        assert_eq!(calls[1].body["start"], 50);
    }

    #[tokio::test]
    async fn test_polygons_return_their_items() {
        let polygon = json!({
            "id": 7,
            "categoryId": 61,
            "ufCrmGeometry": "[[54,36],[54,38],[56,38],[56,36]]",
        });
        let transport = Arc::new(
            ScriptedTransport::new().on("crm.item.list", Ok(json!({"result": {"items": [polygon]}}))),
        );
        let fetched = adapter(transport).polygons(&auth()).await;

        assert_eq!(fetched.items.len(), 1);
        let entity = &fetched.items[0];
        assert_eq!(entity.kind, EntityKind::Polygon);
        assert_eq!(entity.location(), GeoPoint::new(55.0, 37.0));
        assert!(matches!(entity.bounding_shape, Some(Shape::Polygon(ref ring)) if ring.len() == 4));
        assert!(!entity.attributes.contains_key("ufCrmGeometry"));
    }

    #[tokio::test]
    async fn test_missing_credentials_make_no_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let fetched = adapter(transport.clone())
            .fetch_entities(&AuthContext::anonymous(), &GeoFilter::all())
            .await;

        assert!(fetched.items.is_empty());
        assert_eq!(fetched.diagnostic.unwrap().kind, DiagnosticKind::Unauthorized);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_read_failure_degrades() {
        let transport = Arc::new(ScriptedTransport::new().on(
            "crm.item.list",
            Ok(json!({"error": "QUERY_LIMIT_EXCEEDED", "error_description": "Too many requests"})),
        ));
        let fetched = adapter(transport).points(&auth()).await;
        assert!(fetched.items.is_empty());
        assert_eq!(fetched.diagnostic.unwrap().kind, DiagnosticKind::Network);
    }

    #[tokio::test]
    async fn test_stuck_cursor_is_reported() {
        let transport = Arc::new(ScriptedTransport::new().on(
            "crm.item.list",
            Ok(json!({"result": {"items": [item(1, 65, "1", "1")]}, "next": 50})),
        ));
        let fetched = adapter(transport.clone()).points(&auth()).await;
        assert!(fetched.items.is_empty());
        assert_eq!(fetched.diagnostic.unwrap().kind, DiagnosticKind::ProtocolViolation);
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn test_create_sends_category_and_coordinates() {
        let transport = Arc::new(ScriptedTransport::new().on(
            "crm.item.add",
            Ok(json!({"result": {"item": item(99, 65, "55.1", "37.2")}})),
        ));
        let draft = EntityDraft {
            kind: Some(EntityKind::Point),
            title: Some("New".into()),
            latitude: Some(55.1),
            longitude: Some(37.2),
            ..Default::default()
        };
        let created = adapter(transport.clone()).create_entity(&auth(), draft).await.unwrap();

        assert_eq!(created.id, "99");
        assert_eq!(created.location(), GeoPoint::new(55.1, 37.2));
        let body = &transport.calls()[0].body;
        assert_eq!(body["fields"]["categoryId"], 65);
        assert_eq!(body["fields"]["title"], "New");
        assert_eq!(body["fields"]["ufCrmLatitude"], 55.1);
    }

    #[tokio::test]
    async fn test_write_failures_propagate() {
        let transport = Arc::new(ScriptedTransport::new().on(
            "crm.item.delete",
            Err(NetworkError::Status {
                status: 500,
                url: "x".into(),
            }
            .into()),
        ));
        let adapter = adapter(transport.clone());
        assert!(matches!(
            adapter.delete_entity(&auth(), "5").await,
            Err(GeoError::Network(_))
        ));
        assert!(matches!(
            adapter.delete_entity(&auth(), "abc").await,
            Err(GeoError::Validation(_))
        ));
        assert!(matches!(
            adapter.delete_entity(&AuthContext::anonymous(), "5").await,
            Err(GeoError::Unauthorized { .. })
        ));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_draft_is_rejected_before_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let draft = EntityDraft {
            latitude: Some(95.0),
            longitude: Some(37.0),
            ..Default::default()
        };
        let result = adapter(transport.clone()).create_entity(&auth(), draft).await;
        assert!(matches!(result, Err(GeoError::Validation(_))));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stages_filter_by_entity_id() {
        let transport = Arc::new(ScriptedTransport::new().on(
            "crm.status.list",
            Ok(json!({"result": [
                {"STATUS_ID": "DT139_61:NEW", "NAME": "New", "SORT": "10", "SEMANTICS": null},
                {"STATUS_ID": "DT139_61:SUCCESS", "NAME": "Done", "SORT": 20, "SEMANTICS": "S"}
            ]})),
        ));
        let stages = adapter(transport.clone()).stages(&auth(), 61).await;

        assert_eq!(stages.items.len(), 2);
        assert_eq!(stages.items[0].sort, 10);
        assert_eq!(stages.items[1].semantics.as_deref(), Some("S"));
        assert_eq!(
            transport.calls()[0].body["filter"]["ENTITY_ID"],
            "DYNAMIC_139_STAGE_61"
        );
    }

    #[tokio::test]
    async fn test_batch_builds_command_strings() {
        let transport = Arc::new(ScriptedTransport::new().on(
            "rest/batch.json",
            Ok(json!({"result": {
                "result": {"points": {"items": []}},
                "result_error": {"bad": {"error": "NOT_FOUND"}}
            }})),
        ));
        let mut commands = IndexMap::new();
        commands.insert(
            "points".to_string(),
            BatchCommand::new(
                "crm.item.list",
                json!({"entityTypeId": 139, "filter": {"categoryId": 65}, "select": ["*", "UF_*"]}),
            ),
        );
        commands.insert("bad".to_string(), BatchCommand::new("crm.item.get", json!({"id": 0})));

        let result = adapter(transport.clone()).batch(&auth(), &commands, true).await.unwrap();
        assert!(result.results.contains_key("points"));
        assert!(result.errors.contains_key("bad"));

        let body = &transport.calls()[0].body;
        assert_eq!(body["halt"], 1);
        assert_eq!(
            body["cmd"]["points"],
            "crm.item.list?entityTypeId=139&filter%5BcategoryId%5D=65&select%5B0%5D=*&select%5B1%5D=UF_*"
        );
        assert_eq!(body["cmd"]["bad"], "crm.item.get?id=0");
    }

    #[test]
    fn test_custom_fields_are_listed() {
        let record = json!({
            "id": 7,
            "title": "Zone",
            "ufCrm5Zone": "north",
            "UF_CRM_OWNER": "Ivanov",
            "stageId": "DT139_61:NEW",
            "UF_EMPTY": ""
        });
        let entity = record_to_entity(
            record.as_object().unwrap(),
            &GeoFieldNames::default(),
            EntityKind::Point,
        )
        .unwrap();

        let mut custom: Vec<&str> = entity
            .attribute(CUSTOM_FIELDS_ATTRIBUTE)
            .unwrap()
            .split(',')
            .collect();
        custom.sort_unstable();
        assert_eq!(custom, vec!["UF_CRM_OWNER", "ufCrm5Zone"]);
        assert_eq!(entity.attribute("UF_CRM_OWNER"), Some("Ivanov"));
    }

    #[test]
    fn test_record_without_custom_fields_has_no_listing() {
        let record = json!({"ID": "8", "TITLE": "Plain"});
        let entity = record_to_entity(
            record.as_object().unwrap(),
            &GeoFieldNames::default(),
            EntityKind::Point,
        )
        .unwrap();
        assert_eq!(entity.attribute(CUSTOM_FIELDS_ATTRIBUTE), None);
    }

    #[test]
    fn test_entity_card_path() {
        let adapter = adapter(Arc::new(ScriptedTransport::new()));
        assert_eq!(adapter.entity_card_path("12"), "/crm/type/139/details/12/");
    }

    #[tokio::test]
    async fn test_deals_listing_and_update() {
        let deal = json!({"ID": "301", "TITLE": "Customer", "UF_CRM_LATITUDE": "59.93", "UF_CRM_LONGITUDE": "30.34"});
        let transport = Arc::new(
            ScriptedTransport::new()
                .on("crm.deal.list", Ok(json!({"result": [deal.clone()]})))
                .on("crm.deal.update", Ok(json!({"result": true})))
                .on("crm.deal.get", Ok(json!({"result": deal}))),
        );
        let deals = CrmDealsAdapter::new(
            Arc::new(RestCrmClient::new(transport.clone())),
            DealsConfig::default(),
        );

        let fetched = deals.fetch_entities(&auth(), &GeoFilter::all()).await;
        assert_eq!(fetched.items.len(), 1);
        assert_eq!(fetched.items[0].title(), "Customer");
        assert_eq!(fetched.items[0].location(), GeoPoint::new(59.93, 30.34));
        assert_eq!(transport.calls()[0].body["select"], json!(["ID", "TITLE", "UF_*"]));

        let draft = EntityDraft {
            title: Some("Customer".into()),
            ..Default::default()
        };
        let updated = deals.update_entity(&auth(), "301", draft).await.unwrap();
        assert_eq!(updated.id, "301");
        assert_eq!(transport.calls()[1].body["fields"]["TITLE"], "Customer");
    }

    #[tokio::test]
    async fn test_deal_create_uses_returned_id() {
        let transport = Arc::new(ScriptedTransport::new().on("crm.deal.add", Ok(json!({"result": 512}))));
        let deals = CrmDealsAdapter::new(
            Arc::new(RestCrmClient::new(transport)),
            DealsConfig::default(),
        );
        let draft = EntityDraft {
            title: Some("Shop".into()),
            latitude: Some(55.0),
            longitude: Some(37.0),
            ..Default::default()
        };
        let created = deals.create_entity(&auth(), draft).await.unwrap();
        assert_eq!(created.id, "512");
        assert!(created.is_located());
    }
}
