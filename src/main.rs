//! tollc capture demo: reads the newest frames from the configured source
//! until Ctrl-C or a fatal capture error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollc::{Acquire, CaptureSession, Config, SourceBackend, TerminalReason};

const REPORT_INTERVAL: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tollc=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("tollc launching...");

    // Load configuration
    let config_path = std::env::var_os("TOLLC_CONFIG").map(PathBuf::from);
    let mut config = Config::load(config_path.as_deref())?;
    resolve_device(&mut config)?;
    info!("Capture source: {:?}", config.capture.source);

    let session = Arc::new(CaptureSession::<SourceBackend>::open(&config)?);
    let timeout = Duration::from_millis(config.pipeline.read_timeout_ms);

    // Closing the session wakes the reader with a closed outcome
    let closer = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C received, closing session");
                tokio::task::block_in_place(|| session.close());
            }
        })
    };

    let frames = {
        let session = Arc::clone(&session);
        tokio::task::spawn_blocking(move || read_loop(&session, timeout)).await?
    };
    closer.abort();
    session.close();

    let status = session.status();
    let stats = session.stats();
    info!(
        frames,
        published = stats.published,
        dropped = stats.dropped,
        transient_errors = stats.transient_errors,
        "tollc shutting down"
    );

    match status.terminal {
        Some(TerminalReason::BackendFatal(reason)) => Err(eyre!("capture failed: {}", reason)),
        Some(TerminalReason::ProducerPanicked) => Err(eyre!("capture thread panicked")),
        _ => Ok(()),
    }
}

fn read_loop(session: &CaptureSession<SourceBackend>, timeout: Duration) -> u64 {
    let mut frames = 0u64;
    let mut window_frames = 0u32;
    let mut window_start = Instant::now();

    loop {
        match session.acquire(timeout) {
            Acquire::Fresh(frame) => {
                frames += 1;
                window_frames += 1;

                let elapsed = window_start.elapsed();
                if elapsed >= REPORT_INTERVAL {
                    let stats = session.stats();
                    info!(
                        fps = %format!("{:.1}", window_frames as f64 / elapsed.as_secs_f64()),
                        sequence = frame.sequence,
                        latency_ms = %format!("{:.2}", frame.age().as_secs_f64() * 1000.0),
                        dropped = stats.dropped,
                        "{}x{}x{} frames",
                        frame.width(),
                        frame.height(),
                        frame.channels()
                    );
                    window_frames = 0;
                    window_start = Instant::now();
                }
            }
            Acquire::TimedOut => warn!("No frame within {:?}", timeout),
            Acquire::Closed => break,
        }
    }

    frames
}

/// Fill in a missing V4L2 device from the probed ones
#[cfg(feature = "v4l2-probe")]
fn resolve_device(config: &mut Config) -> Result<()> {
    if let tollc::CaptureSource::V4l2 { device } = &mut config.capture.source {
        if device.is_none() {
            let found = tollc::utils::auto_detect_device()
                .ok_or_else(|| eyre!("No suitable capture device found"))?;
            *device = Some(found.path);
        }
    }
    Ok(())
}

#[cfg(not(feature = "v4l2-probe"))]
fn resolve_device(_config: &mut Config) -> Result<()> {
    Ok(())
}
