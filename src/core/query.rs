//! Filters passed to adapters and the aggregator

use crate::core::error::ValidationError;
use crate::core::geometry::{BoundsRect, GeoPoint};
use serde::{Deserialize, Serialize};

/// Backend-neutral filter, translated by each adapter into its own request shape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoFilter {
    /// Category / type id (CRM smart-process category)
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub bounds: Option<BoundsRect>,
    /// Free-text query (address, title)
    #[serde(default)]
    pub text: Option<String>,
}

impl GeoFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn category(category_id: i64) -> Self {
        Self {
            category_id: Some(category_id),
            ..Default::default()
        }
    }

    pub fn with_bounds(mut self, bounds: BoundsRect) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Free text with surrounding whitespace removed, `None` when blank
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// Great-circle radius around a center point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RadiusFilter {
    pub center: GeoPoint,
    pub radius_km: f64,
}

impl RadiusFilter {
    pub fn new(center: GeoPoint, radius_km: f64) -> Result<Self, ValidationError> {
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(ValidationError::FieldError {
                field: "radius_km".to_string(),
                message: format!("must be a non-negative number, got {}", radius_km),
            });
        }
        Ok(Self { center, radius_km })
    }

    /// Inclusive: a point exactly `radius_km` away is inside
    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.center.distance_km(point) <= self.radius_km
    }
}

/// Everything one aggregation needs besides credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateRequest {
    #[serde(default)]
    pub filter: GeoFilter,
    #[serde(default)]
    pub radius: Option<RadiusFilter>,
    /// Provider names to query; `None` queries every registered provider
    #[serde(default)]
    pub providers: Option<Vec<String>>,
}

impl AggregateRequest {
    pub fn new(filter: GeoFilter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    pub fn with_radius(mut self, radius: RadiusFilter) -> Self {
        self.radius = Some(radius);
        self
    }

    pub fn with_providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers = Some(providers.into_iter().map(Into::into).collect());
        self
    }

    /// True when the request narrows results spatially
    pub fn is_spatial(&self) -> bool {
        self.filter.bounds.is_some() || self.radius.is_some()
    }
}

/// Query string accepted by `GET /entities`
///
/// # Example
/// ```text
/// GET /entities?north=56&south=54&east=38&west=36
/// GET /entities?lat=55.75&lng=37.62&radius_km=5&sources=crm,utm5
/// GET /entities?category_id=61&q=Tverskaya
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EntityQueryParams {
    pub north: Option<f64>,
    pub south: Option<f64>,
    pub east: Option<f64>,
    pub west: Option<f64>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
    pub category_id: Option<i64>,
    pub q: Option<String>,
    /// Comma-separated provider names
    pub sources: Option<String>,
}

impl EntityQueryParams {
    /// All four edges or none of them
    pub fn bounds(&self) -> Result<Option<BoundsRect>, ValidationError> {
        match (self.north, self.south, self.east, self.west) {
            (None, None, None, None) => Ok(None),
            (Some(n), Some(s), Some(e), Some(w)) => BoundsRect::new(n, s, e, w)
                .map(Some)
                .ok_or_else(|| ValidationError::FieldError {
                    field: "bounds".to_string(),
                    message: "north must not be below south".to_string(),
                }),
            _ => Err(ValidationError::FieldError {
                field: "bounds".to_string(),
                message: "north, south, east and west must be given together".to_string(),
            }),
        }
    }

    pub fn radius(&self) -> Result<Option<RadiusFilter>, ValidationError> {
        match (self.lat, self.lng, self.radius_km) {
            (None, None, None) => Ok(None),
            (Some(lat), Some(lng), Some(radius_km)) => {
                let center = GeoPoint::new(lat, lng).ok_or(ValidationError::InvalidCoordinates {
                    latitude: lat,
                    longitude: lng,
                })?;
                RadiusFilter::new(center, radius_km).map(Some)
            }
            _ => Err(ValidationError::FieldError {
                field: "radius".to_string(),
                message: "lat, lng and radius_km must be given together".to_string(),
            }),
        }
    }

    pub fn providers(&self) -> Option<Vec<String>> {
        let names: Vec<String> = self
            .sources
            .as_deref()?
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() { None } else { Some(names) }
    }

    pub fn into_request(self) -> Result<AggregateRequest, ValidationError> {
        let filter = GeoFilter {
            category_id: self.category_id,
            bounds: self.bounds()?,
            text: self.q.clone(),
        };
        Ok(AggregateRequest {
            filter,
            radius: self.radius()?,
            providers: self.providers(),
        })
    }
}
