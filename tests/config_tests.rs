//! Tests for loading configuration from YAML files
//!
//! Environment overrides are exercised through `apply_env_overrides_with`
//! so tests never touch the process environment.

use mapgeo::config::{ENV_BIND, ENV_YANDEX_API_KEY, MapGeoConfig};
use mapgeo::core::ConfigError;
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_yaml(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write yaml");
    file
}

#[test]
fn test_load_full_file() {
    let file = write_yaml(
        r#"
crm:
  smart_process_id: 139
  polygon_category_id: 61
  point_category_id: 65
  deals:
    enabled: true
userside:
  base_url: https://us.example.net/api
utm5:
  base_url: https://utm.example.net/api
yandex:
  api_key: ya-key
aggregator:
  timeout_ms: 4000
  max_concurrency: 3
http:
  timeout_secs: 15
server:
  bind: 0.0.0.0:9000
"#,
    );

    let config = MapGeoConfig::from_yaml_file(file.path().to_str().unwrap()).unwrap();

    assert!(config.crm.enabled);
    assert!(config.crm.deals.enabled);
    assert_eq!(config.utm5.unwrap().base_url, "https://utm.example.net/api");
    assert_eq!(config.yandex.unwrap().api_key, "ya-key");
    assert_eq!(config.aggregator.timeout(), Duration::from_millis(4000));
    assert_eq!(config.aggregator.max_concurrency, 3);
    assert_eq!(config.http.timeout(), Duration::from_secs(15));
    assert!(config.dadata.is_none());
}

#[test]
fn test_empty_file_gives_defaults() {
    let file = write_yaml("{}\n");
    let config = MapGeoConfig::from_yaml_file(file.path().to_str().unwrap()).unwrap();

    assert_eq!(config.crm.smart_process_id, 139);
    assert!(config.userside.is_none());
}

#[test]
fn test_missing_file() {
    let err = MapGeoConfig::from_yaml_file("/nonexistent/mapgeo.yaml").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::FileNotFound { .. })
    ));
}

#[test]
fn test_malformed_yaml_names_the_file() {
    let file = write_yaml("crm: [unclosed\n");
    let path = file.path().to_str().unwrap().to_string();

    let err = MapGeoConfig::from_yaml_file(&path).unwrap_err();
    match err.downcast_ref::<ConfigError>() {
        Some(ConfigError::ParseError { file, .. }) => assert_eq!(file.as_deref(), Some(path.as_str())),
        other => panic!("expected parse error, got {:?}", other),
    }
}

#[test]
fn test_invalid_values_rejected() {
    let file = write_yaml("crm:\n  smart_process_id: 0\n");
    let err = MapGeoConfig::from_yaml_file(file.path().to_str().unwrap()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::Invalid { .. })
    ));
}

#[test]
fn test_env_overrides_extend_file_values() {
    let file = write_yaml("yandex:\n  api_key: from-file\n  endpoint: https://geo.example.net/\n");
    let mut config = MapGeoConfig::from_yaml_str(&std::fs::read_to_string(file.path()).unwrap())
        .unwrap();

    let env = HashMap::from([(ENV_YANDEX_API_KEY, "from-env"), (ENV_BIND, "127.0.0.1:9999")]);
    config.apply_env_overrides_with(|name| env.get(name).map(|v| v.to_string()));

    let yandex = config.yandex.unwrap();
    assert_eq!(yandex.api_key, "from-env");
    assert_eq!(yandex.endpoint, "https://geo.example.net/");
    assert_eq!(config.server.bind, "127.0.0.1:9999");
}
