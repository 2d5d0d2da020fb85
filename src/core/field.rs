//! Raw backend field values and their normalization into attributes

use crate::core::geometry::GeoPoint;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// A polymorphic field value as returned by a backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    List(Vec<FieldValue>),
    /// Nested object kept as its JSON text
    Json(String),
    Null,
}

impl FieldValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => FieldValue::Integer(i),
                None => n.as_f64().map(FieldValue::Float).unwrap_or(FieldValue::Null),
            },
            Value::String(s) => FieldValue::String(s.clone()),
            Value::Array(items) => FieldValue::List(items.iter().map(Self::from_json).collect()),
            Value::Object(_) => FieldValue::Json(value.to_string()),
        }
    }

    /// Numeric view; backends frequently send numbers as strings
    pub fn as_f64(&self) -> Option<f64> {
        let number: Option<f64> = match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::String(s) => s.trim().replace(',', ".").parse().ok(),
            _ => None,
        };
        number.filter(|f| f.is_finite())
    }

    /// String form stored in `GeoEntity::attributes`; `None` for empty values
    pub fn to_attribute(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::String(s) if s.is_empty() => None,
            FieldValue::String(s) => Some(s.clone()),
            FieldValue::Integer(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Boolean(b) => Some(if *b { "Y" } else { "N" }.to_string()),
            FieldValue::List(items) => {
                let parts: Vec<String> = items.iter().filter_map(Self::to_attribute).collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join(","))
                }
            }
            FieldValue::Json(text) => Some(text.clone()),
        }
    }
}

/// CRM user-defined field names: `UF_CRM_...` (classic API) or `ufCrm...` (item API)
pub fn is_custom_field(name: &str) -> bool {
    static CUSTOM_FIELD: OnceLock<Regex> = OnceLock::new();
    let regex = CUSTOM_FIELD.get_or_init(|| Regex::new(r"^(?:UF_[A-Z0-9_]+|uf[A-Z]\w*)$").unwrap());
    regex.is_match(name)
}

/// Parse "lat, lng" / "lat;lng" / "lat lng" strings
pub fn parse_coordinate_pair(text: &str) -> Option<GeoPoint> {
    static PAIR: OnceLock<Regex> = OnceLock::new();
    let regex = PAIR.get_or_init(|| {
        Regex::new(r"^\s*(-?\d+(?:\.\d+)?)\s*[,; ]\s*(-?\d+(?:\.\d+)?)\s*$").unwrap()
    });
    let caps = regex.captures(text)?;
    let lat = caps[1].parse().ok()?;
    let lng = caps[2].parse().ok()?;
    GeoPoint::new(lat, lng)
}

/// Parse a list of `[lat, lng]` pairs, given either as JSON or as JSON text
///
/// Invalid vertices invalidate the whole ring.
pub fn parse_ring(value: &Value) -> Option<Vec<GeoPoint>> {
    let parsed;
    let value = match value {
        Value::String(text) => {
            parsed = serde_json::from_str::<Value>(text).ok()?;
            &parsed
        }
        other => other,
    };
    let items = value.as_array()?;
    let ring: Option<Vec<GeoPoint>> = items
        .iter()
        .map(|pair| {
            let pair = pair.as_array()?;
            if pair.len() < 2 {
                return None;
            }
            let lat = FieldValue::from_json(&pair[0]).as_f64()?;
            let lng = FieldValue::from_json(&pair[1]).as_f64()?;
            GeoPoint::new(lat, lng)
        })
        .collect();
    ring.filter(|points| !points.is_empty())
}

/// First numeric value among `keys`
pub fn first_number(object: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| FieldValue::from_json(value).as_f64())
}

/// First non-empty string form among `keys`
pub fn first_string(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(|value| FieldValue::from_json(value).to_attribute())
}

/// Position from a pair of numeric fields, or from a combined "lat,lng" field
pub fn extract_point(
    object: &Map<String, Value>,
    lat_keys: &[&str],
    lng_keys: &[&str],
) -> Option<GeoPoint> {
    match (first_number(object, lat_keys), first_number(object, lng_keys)) {
        (Some(lat), Some(lng)) => GeoPoint::new(lat, lng),
        _ => lat_keys
            .iter()
            .filter_map(|key| object.get(*key).and_then(Value::as_str))
            .find_map(parse_coordinate_pair),
    }
}

/// Stringify every non-empty field except `skip`
pub fn attributes_from_object(object: &Map<String, Value>, skip: &[&str]) -> IndexMap<String, String> {
    object
        .iter()
        .filter(|(key, _)| !skip.contains(&key.as_str()))
        .filter_map(|(key, value)| {
            FieldValue::from_json(value)
                .to_attribute()
                .map(|text| (key.clone(), text))
        })
        .collect()
}
