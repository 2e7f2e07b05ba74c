mod archive;
mod config;
mod keeper;
mod sense;
#[cfg(test)]
mod test_support;

use crate::archive::{Archive, RrdTool};
use crate::config::Config;
use crate::keeper::SessionKeeper;
use crate::sense::{RealtimeStream, SenseSession};
use anyhow::{Context, Result};
use std::sync::Arc;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sense_logger=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

/// One-off account summary; failures here never stop the logger.
async fn log_startup_report(session: &SenseSession) {
    match session.labs_report().await {
        Ok(report) => tracing::info!(
            fault_sections = ?report.fault_sections(),
            power_quality_window = ?report.power_quality_window(),
            power_quality_csv = report.has_attachment("power_quality_raw_csv"),
            "labs report"
        ),
        Err(err) => tracing::warn!(error=%err, "failed to fetch labs report"),
    }

    for device in session.registry().snapshot() {
        match session.device_details(&device.id).await {
            Ok(details) => tracing::info!(
                device_id=%device.id,
                name=%details.device.name,
                avg_monthly_kwh = details.usage("avg_monthly_KWH"),
                yearly_kwh = details.usage("yearly_KWH"),
                yearly_cost = details.usage("yearly_cost"),
                "device usage"
            ),
            Err(err) => {
                tracing::warn!(device_id=%device.id, error=%err, "failed to fetch device details")
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing()?;

    let engine = Arc::new(RrdTool::new(config.rrdtool_bin.clone()));
    let archive = Arc::new(Archive::open(config.output_dir.clone(), engine)?);

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("failed to build HTTP client")?;
    let mut session = SenseSession::new(http, config.endpoints.clone());
    session
        .login(&config.username, &config.password)
        .await
        .context("Sense login failed")?;

    let named = archive
        .update_device_names(&session.registry().snapshot())
        .context("failed to update device name table")?;
    if config.startup_report {
        log_startup_report(&session).await;
    }
    tracing::info!(
        output_dir=%archive.directory().display(),
        devices = session.registry().device_count(),
        named_devices = named,
        "sense-logger started"
    );

    let stream = RealtimeStream::new(
        &config.endpoints.realtime_base,
        session.registry(),
        config.watchdog_interval,
    );
    let mut keeper = SessionKeeper::new(session, stream, archive, config.refresh_margin);

    let outcome = tokio::select! {
        result = keeper.run() => Some(result),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            None
        }
    };
    keeper.shutdown().await;

    if let Some(result) = outcome {
        result?;
    }
    Ok(())
}
