use std::sync::Arc;

use tracing_subscriber::EnvFilter;

mod analytics;
mod api;
mod camera;
mod config;
mod frame;
mod recording;
mod session;
mod storage;

use analytics::DetectorPlan;
use api::AppState;
use config::Config;
use session::{DeviceFactory, SessionController};
use storage::FileIncidentStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("watchpost=debug".parse()?))
        .init();

    let config = Config::load()?;
    tracing::info!(
        camera = %config.camera.input,
        sensitivity = %config.surveillance.sensitivity,
        data_dir = %config.storage.data_dir.display(),
        "configuration loaded"
    );

    let store = FileIncidentStore::open(config.storage.incidents_dir())?;

    let plan = DetectorPlan::resolve(&config.detection);
    if plan.is_empty() {
        tracing::warn!("no detectors available, incidents need a detector to fire");
    }
    tracing::info!(detectors = %plan, "detectors resolved");

    let config = Arc::new(config);
    let factory = Arc::new(DeviceFactory::new(&config, plan));
    let controller = Arc::new(SessionController::new(
        Arc::clone(&config),
        factory,
        Arc::new(store.clone()),
    ));
    let heartbeat = controller.spawn_heartbeat();

    let state = AppState {
        controller: Arc::clone(&controller),
        store,
        list_limit: config.storage.list_limit,
        uploads_dir: config.storage.uploads_dir(),
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
        }
        tracing::info!("shutdown signal received");
    };

    let served = api::start_server(state, config.http.port, shutdown).await;

    heartbeat.abort();
    controller.stop().await;
    tracing::info!("shutdown complete");

    served?;
    Ok(())
}
