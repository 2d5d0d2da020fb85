//! The normalized entity model shared by every backend adapter

use crate::core::error::ValidationError;
use crate::core::geometry::{BoundsRect, GeoPoint, centroid};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend a [`GeoEntity`] was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSystem {
    /// Bitrix24 CRM (smart-process items and deals)
    Crm,
    /// Userside network inventory
    Userside,
    /// UTM5 billing
    Utm5,
    /// Process-local store
    Local,
}

impl SourceSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceSystem::Crm => "crm",
            SourceSystem::Userside => "userside",
            SourceSystem::Utm5 => "utm5",
            SourceSystem::Local => "local",
        }
    }
}

impl fmt::Display for SourceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceSystem {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crm" => Ok(SourceSystem::Crm),
            "userside" | "us" => Ok(SourceSystem::Userside),
            "utm5" => Ok(SourceSystem::Utm5),
            "local" => Ok(SourceSystem::Local),
            other => Err(ValidationError::FieldError {
                field: "source".to_string(),
                message: format!("unknown source system '{}'", other),
            }),
        }
    }
}

/// Geometric kind of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Point,
    Polygon,
    Line,
    Node,
}

/// Extended geometry carried next to the representative position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates", rename_all = "snake_case")]
pub enum Shape {
    Polygon(Vec<GeoPoint>),
    Line(Vec<GeoPoint>),
    Bounds(BoundsRect),
}

impl Shape {
    /// Representative position of the shape
    pub fn center(&self) -> Option<GeoPoint> {
        match self {
            Shape::Polygon(points) | Shape::Line(points) => centroid(points),
            Shape::Bounds(rect) => GeoPoint::new(
                (rect.north + rect.south) / 2.0,
                (rect.east + rect.west) / 2.0,
            ),
        }
    }
}

/// A geo-referenced business record normalized from one backend
///
/// Entities without a valid position are still valid entities: they are
/// kept for listing and CRUD but never take part in spatial queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoEntity {
    /// Identifier within the source system
    pub id: String,
    pub source_system: SourceSystem,
    pub kind: EntityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_shape: Option<Shape>,
    /// Standard and custom backend fields, stringified
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
}

impl GeoEntity {
    pub fn new(id: impl Into<String>, source_system: SourceSystem, kind: EntityKind) -> Self {
        Self {
            id: id.into(),
            source_system,
            kind,
            latitude: None,
            longitude: None,
            bounding_shape: None,
            attributes: IndexMap::new(),
        }
    }

    /// Set the position; out-of-range or NaN coordinates are dropped
    pub fn with_location(mut self, lat: f64, lng: f64) -> Self {
        if let Some(point) = GeoPoint::new(lat, lng) {
            self.latitude = Some(point.lat);
            self.longitude = Some(point.lng);
        } else {
            tracing::debug!(id = %self.id, source = %self.source_system, lat, lng, "dropping invalid coordinates");
        }
        self
    }

    pub fn with_point(self, point: Option<GeoPoint>) -> Self {
        match point {
            Some(p) => self.with_location(p.lat, p.lng),
            None => self,
        }
    }

    /// Attach a shape; an entity without a position takes the shape's center
    pub fn with_shape(mut self, shape: Shape) -> Self {
        if self.location().is_none() {
            if let Some(center) = shape.center() {
                self.latitude = Some(center.lat);
                self.longitude = Some(center.lng);
            }
        }
        self.bounding_shape = Some(shape);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: IndexMap<String, String>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Validated position, `None` when either coordinate is missing or out of range
    pub fn location(&self) -> Option<GeoPoint> {
        GeoPoint::new(self.latitude?, self.longitude?)
    }

    pub fn is_located(&self) -> bool {
        self.location().is_some()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Human-readable label, falling back to the id
    pub fn title(&self) -> &str {
        self.attribute("title")
            .or_else(|| self.attribute("name"))
            .unwrap_or(&self.id)
    }
}

/// Payload for creating or updating an entity through an adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDraft {
    #[serde(default)]
    pub kind: Option<EntityKind>,
    #[serde(default)]
    pub title: Option<String>,
    /// Backend category (CRM smart-process category)
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub shape: Option<Shape>,
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
}

impl EntityDraft {
    /// Writes surface malformed coordinates instead of dropping them
    pub fn validate(&self) -> Result<(), ValidationError> {
        match (self.latitude, self.longitude) {
            (None, None) => Ok(()),
            (Some(lat), Some(lng)) => GeoPoint::new(lat, lng).map(|_| ()).ok_or_else(|| {
                ValidationError::InvalidCoordinates {
                    latitude: lat,
                    longitude: lng,
                }
            }),
            (Some(_), None) => Err(ValidationError::MissingArgument {
                argument: "longitude".to_string(),
            }),
            (None, Some(_)) => Err(ValidationError::MissingArgument {
                argument: "latitude".to_string(),
            }),
        }
    }

    pub fn location(&self) -> Option<GeoPoint> {
        GeoPoint::new(self.latitude?, self.longitude?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_location_is_dropped() {
        let entity = GeoEntity::new("1", SourceSystem::Crm, EntityKind::Point).with_location(91.0, 10.0);
        assert_eq!(entity.latitude, None);
        assert!(!entity.is_located());
    }

    #[test]
    fn test_shape_supplies_missing_location() {
        let ring = vec![
            GeoPoint::new(54.0, 36.0).unwrap(),
            GeoPoint::new(54.0, 38.0).unwrap(),
            GeoPoint::new(56.0, 38.0).unwrap(),
            GeoPoint::new(56.0, 36.0).unwrap(),
        ];
        let entity = GeoEntity::new("7", SourceSystem::Crm, EntityKind::Polygon)
            .with_shape(Shape::Polygon(ring));
        assert_eq!(entity.location(), GeoPoint::new(55.0, 37.0));
    }

    #[test]
    fn test_shape_keeps_explicit_location() {
        let entity = GeoEntity::new("7", SourceSystem::Crm, EntityKind::Polygon)
            .with_location(10.0, 10.0)
            .with_shape(Shape::Bounds(BoundsRect::new(1.0, 0.0, 1.0, 0.0).unwrap()));
        assert_eq!(entity.location(), GeoPoint::new(10.0, 10.0));
    }

    #[test]
    fn test_title_fallbacks() {
        let entity = GeoEntity::new("42", SourceSystem::Utm5, EntityKind::Point);
        assert_eq!(entity.title(), "42");
        let entity = entity.with_attribute("name", "Node A");
        assert_eq!(entity.title(), "Node A");
    }

    #[test]
    fn test_source_system_parse() {
        assert_eq!("CRM".parse::<SourceSystem>().unwrap(), SourceSystem::Crm);
        assert_eq!("us".parse::<SourceSystem>().unwrap(), SourceSystem::Userside);
        assert!("ldap".parse::<SourceSystem>().is_err());
    }

    #[test]
    fn test_draft_validation() {
        assert!(EntityDraft::default().validate().is_ok());

        let draft = EntityDraft {
            latitude: Some(55.0),
            longitude: Some(37.0),
            ..Default::default()
        };
        assert!(draft.validate().is_ok());

        let draft = EntityDraft {
            latitude: Some(120.0),
            longitude: Some(37.0),
            ..Default::default()
        };
        assert!(matches!(
            draft.validate(),
            Err(ValidationError::InvalidCoordinates { .. })
        ));

        let draft = EntityDraft {
            latitude: Some(55.0),
            ..Default::default()
        };
        assert!(draft.validate().is_err());
    }

    #[test]
    fn test_entity_json_shape() {
        let entity = GeoEntity::new("3", SourceSystem::Userside, EntityKind::Node)
            .with_location(55.0, 37.0)
            .with_attribute("name", "N3");
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["source_system"], "userside");
        assert_eq!(json["kind"], "node");
        assert_eq!(json["attributes"]["name"], "N3");
        assert!(json.get("bounding_shape").is_none());
    }
}
