use anyhow::{Context, Result};
use rollcalld::{spawn_engine, AttendanceBus, AttendanceService, BusKind, Config, BUS_NAME, OBJECT_PATH};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("failed to load configuration")?;
    let bus = config.bus;
    tracing::info!(
        db = %config.db_path.display(),
        images = %config.image_dir.display(),
        extractor = %config.extractor_command,
        threshold = config.recognition_threshold,
        "configuration loaded"
    );

    let service = AttendanceService::open(config).context("failed to open attendance service")?;
    let engine = spawn_engine(service)?;

    let builder = match bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, AttendanceBus::new(engine))?
        .build()
        .await
        .with_context(|| format!("failed to register {BUS_NAME} on the {bus:?} bus"))?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
