//! Query server for no-swim zone containment lookups.
//!
//! Serves point-in-zone queries over the published zone collection, with a
//! reload endpoint to pick up a newly published artifact.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use noswim::config::Config;
use noswim::models::{CollectionMetadata, ZoneCollection};
use noswim::pip::{ContainmentService, LookupResult, LookupStrategy};
use noswim::publish::{read_object, FsStore, ObjectStore};

#[derive(Parser, Debug)]
#[command(name = "query")]
#[command(about = "No-swim zone lookup server")]
struct Args {
    /// TOML config file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root directory of the primary store, overriding the config
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Listen address, overriding the config
    #[arg(short, long)]
    listen: Option<String>,
}

/// Application state shared across handlers
struct AppState {
    store: Arc<dyn ObjectStore>,
    zones_key: String,
    strategy: LookupStrategy,
    service: RwLock<Arc<ContainmentService>>,
}

impl AppState {
    async fn load(&self) -> Result<ContainmentService> {
        let bytes = read_object(self.store.as_ref(), &self.zones_key, None)
            .await
            .with_context(|| format!("Failed to read '{}'", self.zones_key))?
            .with_context(|| format!("Zone artifact '{}' does not exist", self.zones_key))?;

        let collection = ZoneCollection::from_geojson_bytes(&bytes)
            .context("Failed to parse zone artifact")?;
        info!("Loaded {} zones from '{}'", collection.len(), self.zones_key);

        Ok(ContainmentService::from_collection(collection, self.strategy))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = &args.data_dir {
        config = config.with_data_dir(dir);
    }
    config.validate()?;

    let listen = args.listen.unwrap_or_else(|| config.query.listen.clone());

    info!("No-swim zone query server");
    info!("Zone artifact: {}", config.storage.zones_key);

    let empty = ContainmentService::from_collection(
        ZoneCollection::new(vec![], CollectionMetadata::default()),
        config.query.strategy,
    );
    let state = Arc::new(AppState {
        store: Arc::new(FsStore::new(&config.storage.root)),
        zones_key: config.storage.zones_key.clone(),
        strategy: config.query.strategy,
        service: RwLock::new(Arc::new(empty)),
    });

    // Serve even without an artifact; /v1/reload picks it up once published.
    match state.load().await {
        Ok(service) => *state.service.write().await = Arc::new(service),
        Err(e) => warn!("Starting without zones: {:#}", e),
    }

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/v1/lookup", get(lookup_get_handler).post(lookup_post_handler))
        .route("/v1/reload", post(reload_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("Starting server on {}", listen);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    zones: usize,
}

/// Health check endpoint
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let zones = state.service.read().await.len();
    Json(HealthResponse {
        status: "ok",
        zones,
    })
}

#[derive(Deserialize)]
struct LookupQueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Deserialize)]
struct LookupBody {
    latitude: f64,
    longitude: f64,
}

async fn lookup(
    state: &AppState,
    lat: f64,
    lon: f64,
) -> Result<Json<LookupResult>, (StatusCode, String)> {
    let service = Arc::clone(&*state.service.read().await);
    service
        .query(lat, lon)
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

/// `GET /v1/lookup?lat=..&lon=..`
async fn lookup_get_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<LookupQueryParams>, QueryRejection>,
) -> Result<Json<LookupResult>, (StatusCode, String)> {
    let Query(params) = params.map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;
    lookup(&state, params.lat, params.lon).await
}

/// `POST /v1/lookup` with `{"latitude": .., "longitude": ..}`
async fn lookup_post_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LookupBody>, JsonRejection>,
) -> Result<Json<LookupResult>, (StatusCode, String)> {
    let Json(body) = body.map_err(|e| (StatusCode::BAD_REQUEST, e.body_text()))?;
    lookup(&state, body.latitude, body.longitude).await
}

#[derive(Serialize)]
struct ReloadResponse {
    zones: usize,
}

/// Re-read the zone artifact from the store
async fn reload_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReloadResponse>, (StatusCode, String)> {
    let service = state.load().await.map_err(|e| {
        tracing::error!("Reload failed: {:#}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
    })?;

    let zones = service.len();
    *state.service.write().await = Arc::new(service);
    Ok(Json(ReloadResponse { zones }))
}
