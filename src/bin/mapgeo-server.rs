//! MapGeo server
//!
//! Configuration is read from the path in `MAPGEO_CONFIG`, or the first
//! argument. Without either, defaults plus `MAPGEO_*` overrides are used.

use anyhow::Result;
use mapgeo::prelude::*;
use tracing_subscriber::EnvFilter;

const ENV_CONFIG_PATH: &str = "MAPGEO_CONFIG";

fn load_config() -> Result<MapGeoConfig> {
    let path = std::env::var(ENV_CONFIG_PATH)
        .ok()
        .or_else(|| std::env::args().nth(1));

    match path {
        Some(path) => {
            tracing::info!(path = %path, "loading configuration");
            MapGeoConfig::from_yaml_file(&path)
        }
        None => {
            tracing::info!("no configuration file, using defaults");
            let mut config = MapGeoConfig::default_config();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mapgeo=info,tower_http=info")),
        )
        .init();

    let config = load_config()?;
    let builder = ServerBuilder::from_config(&config)?;

    println!("🚀 Starting mapgeo v{}", env!("CARGO_PKG_VERSION"));
    println!("\n🌐 Server running on http://{}", config.server.bind);
    println!("\n📚 Routes:");
    println!("    GET    /health                          - Liveness and providers");
    println!("    GET    /entities                        - Aggregated entities");
    println!("    POST   /entities/{{source}}               - Create an entity");
    println!("    PUT    /entities/{{source}}/{{id}}          - Update an entity");
    println!("    DELETE /entities/{{source}}/{{id}}          - Delete an entity");
    println!("    GET    /geocode/{{provider}}?q=           - Address suggestions");
    println!("    GET    /crm/stages/{{category_id}}        - Smart-process stages");

    builder.serve(&config.server.bind).await
}
