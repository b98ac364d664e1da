use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod store;

use config::Config;
use dbus_interface::InvigilService;
use invigil_checkpoint::RemoteCheckpoint;
use invigil_hw::Camera;
use store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("invigild starting");

    let config = Config::from_env();

    let store = Store::open(config.db_path.clone(), config.stills_dir.clone()).await?;
    tracing::info!(db = %config.db_path.display(), "store opened");

    // Fail fast: a missing camera means no flow in this daemon can work.
    let camera = Camera::open(&config.camera_device)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        "camera opened"
    );

    let checkpoint = RemoteCheckpoint::new(
        config.checkpoint_url.clone(),
        Duration::from_secs(config.checkpoint_timeout_secs),
    )?;
    tracing::info!(url = %config.checkpoint_url, "checkpoint client ready");

    let handle = engine::spawn_engine(store, checkpoint, camera, config.confidence_threshold);

    let _conn = zbus::connection::Builder::session()?
        .name("org.academicverse.Invigil1")?
        .serve_at(
            "/org/academicverse/Invigil1",
            InvigilService::new(handle, config.quiz_duration_secs),
        )?
        .build()
        .await?;

    tracing::info!("invigild ready on org.academicverse.Invigil1");

    tokio::signal::ctrl_c().await?;
    tracing::info!("invigild shutting down");

    Ok(())
}
