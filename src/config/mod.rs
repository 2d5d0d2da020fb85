//! Configuration loading and management

use crate::core::error::ConfigError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

pub const ENV_USERSIDE_BASE_URL: &str = "MAPGEO_US_BASE_URL";
pub const ENV_UTM5_BASE_URL: &str = "MAPGEO_UTM5_BASE_URL";
pub const ENV_DADATA_TOKEN: &str = "MAPGEO_DADATA_TOKEN";
pub const ENV_YANDEX_API_KEY: &str = "MAPGEO_YANDEX_API_KEY";
pub const ENV_BIND: &str = "MAPGEO_BIND";

pub const DEFAULT_DADATA_ENDPOINT: &str =
    "https://suggestions.dadata.ru/suggestions/api/4_1/rs/suggest/address";
pub const DEFAULT_YANDEX_ENDPOINT: &str = "https://geocode-maps.yandex.ru/1.x/";

/// Field names holding geometry on CRM records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GeoFieldNames {
    /// Latitude candidates, first non-empty wins
    #[validate(length(min = 1))]
    pub latitude: Vec<String>,
    #[validate(length(min = 1))]
    pub longitude: Vec<String>,
    /// Polygon ring as JSON `[[lat, lng], ...]`
    pub geometry: Vec<String>,
}

impl Default for GeoFieldNames {
    fn default() -> Self {
        Self {
            latitude: vec![
                "ufCrmLatitude".to_string(),
                "UF_CRM_LATITUDE".to_string(),
                "latitude".to_string(),
            ],
            longitude: vec![
                "ufCrmLongitude".to_string(),
                "UF_CRM_LONGITUDE".to_string(),
                "longitude".to_string(),
            ],
            geometry: vec![
                "ufCrmGeometry".to_string(),
                "UF_CRM_GEOMETRY".to_string(),
                "geometry".to_string(),
            ],
        }
    }
}

impl GeoFieldNames {
    pub fn latitude_keys(&self) -> Vec<&str> {
        self.latitude.iter().map(String::as_str).collect()
    }

    pub fn longitude_keys(&self) -> Vec<&str> {
        self.longitude.iter().map(String::as_str).collect()
    }

    pub fn geometry_keys(&self) -> Vec<&str> {
        self.geometry.iter().map(String::as_str).collect()
    }
}

/// CRM deal listing used as the customer layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DealsConfig {
    pub enabled: bool,
    #[validate(nested)]
    pub fields: GeoFieldNames,
}

impl Default for DealsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            fields: GeoFieldNames {
                latitude: vec!["UF_CRM_LATITUDE".to_string(), "latitude".to_string()],
                longitude: vec!["UF_CRM_LONGITUDE".to_string(), "longitude".to_string()],
                geometry: Vec::new(),
            },
        }
    }
}

/// CRM smart-process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CrmConfig {
    pub enabled: bool,
    /// Smart-process entity type id
    #[validate(range(min = 1))]
    pub smart_process_id: i64,
    pub polygon_category_id: i64,
    pub point_category_id: i64,
    #[validate(nested)]
    pub fields: GeoFieldNames,
    #[validate(nested)]
    pub deals: DealsConfig,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            smart_process_id: 139,
            polygon_category_id: 61,
            point_category_id: 65,
            fields: GeoFieldNames::default(),
            deals: DealsConfig::default(),
        }
    }
}

/// A JSON-over-POST backend (Userside, UTM5)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BackendConfig {
    #[validate(url)]
    pub base_url: String,
}

/// DaData suggestion API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct DadataConfig {
    #[validate(length(min = 1))]
    pub token: String,
    #[serde(default = "default_dadata_endpoint")]
    #[validate(url)]
    pub endpoint: String,
    #[serde(default = "default_dadata_count")]
    #[validate(range(min = 1, max = 20))]
    pub count: u32,
}

fn default_dadata_endpoint() -> String {
    DEFAULT_DADATA_ENDPOINT.to_string()
}

fn default_dadata_count() -> u32 {
    10
}

/// Yandex HTTP geocoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct YandexConfig {
    #[validate(length(min = 1))]
    pub api_key: String,
    #[serde(default = "default_yandex_endpoint")]
    #[validate(url)]
    pub endpoint: String,
}

fn default_yandex_endpoint() -> String {
    DEFAULT_YANDEX_ENDPOINT.to_string()
}

/// Fan-out limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AggregatorSettings {
    /// Per-provider deadline
    #[validate(range(min = 1, max = 600000))]
    pub timeout_ms: u64,
    #[validate(range(min = 1, max = 64))]
    pub max_concurrency: usize,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            max_concurrency: 4,
        }
    }
}

impl AggregatorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Outgoing HTTP client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HttpSettings {
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
    #[validate(length(min = 1))]
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: crate::transport::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerSettings {
    #[validate(length(min = 1))]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Complete configuration for the map backend
///
/// Every section is optional in YAML; missing backends are simply not
/// registered.
///
/// ```yaml
/// crm:
///   smart_process_id: 139
/// userside:
///   base_url: https://us.example.net/api
/// dadata:
///   token: abc
/// aggregator:
///   timeout_ms: 5000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MapGeoConfig {
    #[validate(nested)]
    pub crm: CrmConfig,
    #[validate(nested)]
    pub userside: Option<BackendConfig>,
    #[validate(nested)]
    pub utm5: Option<BackendConfig>,
    #[validate(nested)]
    pub dadata: Option<DadataConfig>,
    #[validate(nested)]
    pub yandex: Option<YandexConfig>,
    #[validate(nested)]
    pub aggregator: AggregatorSettings,
    #[validate(nested)]
    pub http: HttpSettings,
    #[validate(nested)]
    pub server: ServerSettings,
}

impl MapGeoConfig {
    /// Load configuration from a YAML file
    ///
    /// Environment overrides are applied and the result is validated.
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_string(),
            }
            .into());
        }
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content, Some(path))?;
        config.apply_env_overrides();
        config.check()?;
        Ok(config)
    }

    /// Load configuration from a YAML string
    ///
    /// No environment overrides are applied here.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config = Self::parse(yaml, None)?;
        config.check()?;
        Ok(config)
    }

    fn parse(yaml: &str, file: Option<&str>) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError {
            file: file.map(str::to_string),
            message: e.to_string(),
        })
    }

    fn check(&self) -> Result<(), ConfigError> {
        self.validate().map_err(|e| ConfigError::Invalid {
            message: e.to_string(),
        })
    }

    /// Apply `MAPGEO_*` variables from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary lookup
    pub fn apply_env_overrides_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(base_url) = lookup(ENV_USERSIDE_BASE_URL) {
            self.userside = Some(BackendConfig { base_url });
        }
        if let Some(base_url) = lookup(ENV_UTM5_BASE_URL) {
            self.utm5 = Some(BackendConfig { base_url });
        }
        if let Some(token) = lookup(ENV_DADATA_TOKEN) {
            match &mut self.dadata {
                Some(dadata) => dadata.token = token,
                None => {
                    self.dadata = Some(DadataConfig {
                        token,
                        endpoint: default_dadata_endpoint(),
                        count: default_dadata_count(),
                    })
                }
            }
        }
        if let Some(api_key) = lookup(ENV_YANDEX_API_KEY) {
            match &mut self.yandex {
                Some(yandex) => yandex.api_key = api_key,
                None => {
                    self.yandex = Some(YandexConfig {
                        api_key,
                        endpoint: default_yandex_endpoint(),
                    })
                }
            }
        }
        if let Some(bind) = lookup(ENV_BIND) {
            self.server.bind = bind;
        }
    }

    /// Create a default configuration for testing
    pub fn default_config() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_portal_layout() {
        let config = MapGeoConfig::default_config();
        assert_eq!(config.crm.smart_process_id, 139);
        assert_eq!(config.crm.polygon_category_id, 61);
        assert_eq!(config.crm.point_category_id, 65);
        assert!(config.userside.is_none());
        assert_eq!(config.aggregator.max_concurrency, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_str() {
        let yaml = r#"
crm:
  smart_process_id: 150
  fields:
    latitude: [ufCrm5Lat]
    longitude: [ufCrm5Lng]
userside:
  base_url: https://us.example.net/api
dadata:
  token: secret
aggregator:
  timeout_ms: 2500
"#;
        let config = MapGeoConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.crm.smart_process_id, 150);
        assert_eq!(config.crm.point_category_id, 65);
        assert_eq!(config.crm.fields.latitude, vec!["ufCrm5Lat"]);
        assert_eq!(config.userside.unwrap().base_url, "https://us.example.net/api");
        let dadata = config.dadata.unwrap();
        assert_eq!(dadata.count, 10);
        assert_eq!(dadata.endpoint, DEFAULT_DADATA_ENDPOINT);
        assert_eq!(config.aggregator.timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(MapGeoConfig::from_yaml_str("userside:\n  base_url: not a url\n").is_err());
        assert!(MapGeoConfig::from_yaml_str("aggregator:\n  max_concurrency: 0\n").is_err());
        assert!(MapGeoConfig::from_yaml_str("dadata:\n  token: ''\n").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_USERSIDE_BASE_URL, "https://us.local"),
            (ENV_DADATA_TOKEN, "tok"),
            (ENV_BIND, "0.0.0.0:8080"),
            (ENV_UTM5_BASE_URL, "   "),
        ]);
        let mut config = MapGeoConfig::default_config();
        config.apply_env_overrides_with(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.userside.unwrap().base_url, "https://us.local");
        assert!(config.utm5.is_none());
        assert_eq!(config.dadata.unwrap().token, "tok");
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert!(config.yandex.is_none());
    }
}
