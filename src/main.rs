use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use scsi_target::lu::{DefaultLogicalUnit, device_task_factory};
use scsi_target::{TargetConfig, TaskRouter};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = TargetConfig::parse();
    let router = TaskRouter::new(&config);
    let factory = Arc::new(device_task_factory(config.device_identity()));
    for lun in 0..config.logical_units {
        let unit = DefaultLogicalUnit::new(
            lun,
            config.lu_queue_length,
            config.lu_workers,
            factory.clone(),
        );
        router.register_logical_unit(lun, Arc::new(unit)).await;
    }

    router.start().await;
    info!(luns = ?router.logical_units(), "target ready");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    router.stop().await;

    Ok(())
}
