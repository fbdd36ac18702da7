use anyhow::{Context, Result};
use ericspeed_engine::{
    EndpointCatalog, MeasurementConfig, MeasurementStatus, ProgressEvent, SpeedTestEngine,
};
use std::path::Path;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => MeasurementConfig::load(Path::new(&path))
            .with_context(|| format!("reading config {}", path))?,
        None => MeasurementConfig::load_default(),
    };
    let catalog = match &config.catalog_path {
        Some(path) => EndpointCatalog::load(path)?,
        None => EndpointCatalog::builtin(),
    };

    let engine = SpeedTestEngine::http(catalog)?;
    let (progress_tx, mut progress_rx) = mpsc::channel(64);
    engine.start_measurement_with_progress(config, progress_tx)?;

    // The channel closes once the run has finished and dropped its sender.
    loop {
        tokio::select! {
            event = progress_rx.recv() => match event {
                Some(event) => print_progress(&event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nCancelling...");
                engine.cancel();
            }
        }
    }
    eprintln!();

    match engine.wait().await {
        Some(Ok(_)) => {
            let report = engine.report().context("completed run left no result")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(Err(e)) => Err(e.into()),
        None => anyhow::bail!("no measurement was started"),
    }
}

fn print_progress(event: &ProgressEvent) {
    match event {
        ProgressEvent::Status(MeasurementStatus::Complete) => {}
        ProgressEvent::Status(status) => eprintln!("\n{}...", status),
        ProgressEvent::Latency {
            endpoint_id,
            rtt_ms,
        } => eprint!("\r  server {}: {:.1} ms      ", endpoint_id, rtt_ms),
        ProgressEvent::Throughput {
            direction,
            bytes,
            mbps,
        } => eprint!(
            "\r  {}: {:.1} MB, {:.2} Mbps      ",
            direction,
            *bytes as f64 / 1_000_000.0,
            mbps
        ),
    }
}
