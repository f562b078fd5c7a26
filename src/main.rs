use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;

use dazzo_monitor::classifier::ActivityClassifier;
use dazzo_monitor::config::{Args, TransportKind};
use dazzo_monitor::pipeline::ActivityPipeline;
use dazzo_monitor::shutdown::{self, Shutdown};
use dazzo_monitor::stream::tcp::TcpTransport;
use dazzo_monitor::stream::{StreamConfig, StreamEvent, StreamManager, Transport};

#[cfg(feature = "ble")]
use dazzo_monitor::stream::ble::BleTransport;
#[cfg(feature = "ble")]
use dazzo_monitor::stream::{Backoff, BackoffConfig};

const EVENT_QUEUE: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = args.into_config().context("Invalid configuration")?;
    log::info!("dazzo_monitor {} starting", env!("CARGO_PKG_VERSION"));
    config.log_summary();

    let classifier = ActivityClassifier::new(config.classifier.clone())?;
    let pipeline = ActivityPipeline::new(config.pipeline.clone(), classifier, config.build_sinks())?;

    let (events_tx, events_rx) = mpsc::channel::<StreamEvent>(EVENT_QUEUE);
    let (trigger, shutdown) = shutdown::channel();

    let pipeline_handle = tokio::spawn(pipeline.run(events_rx, shutdown.clone()));
    let signal_handle = tokio::spawn(async move {
        wait_for_signal().await;
        log::info!("Shutdown requested");
        trigger.trigger();
    });

    match config.transport {
        TransportKind::Tcp => {
            let transport = TcpTransport::new(config.peers.clone());
            run_stream(transport, config.stream.clone(), events_tx, &shutdown).await;
        }
        TransportKind::Ble => {
            #[cfg(feature = "ble")]
            {
                if let Some(transport) = open_ble(&config.stream.backoff, &shutdown).await {
                    run_stream(transport, config.stream.clone(), events_tx, &shutdown).await;
                }
            }
            #[cfg(not(feature = "ble"))]
            anyhow::bail!("ble transport requires the `ble` feature");
        }
    }

    let status = pipeline_handle.await.context("Pipeline task failed")?;
    signal_handle.abort();

    log::info!(
        "Stopped after {} session(s), {} classification(s)",
        status.sessions,
        status.classifications
    );
    Ok(())
}

async fn run_stream<T: Transport>(
    transport: T,
    config: StreamConfig,
    events: mpsc::Sender<StreamEvent>,
    shutdown: &Shutdown,
) {
    let mut manager = StreamManager::new(transport, config, events);
    manager.run(shutdown).await;
}

/// The adapter may come up after the process, keep trying until shutdown.
#[cfg(feature = "ble")]
async fn open_ble(backoff: &BackoffConfig, shutdown: &Shutdown) -> Option<BleTransport> {
    let mut backoff = Backoff::new(backoff.clone());
    loop {
        match BleTransport::new().await {
            Ok(transport) => return Some(transport),
            Err(e) => {
                let delay = backoff.next_delay();
                log::warn!("{}, retrying in {:.1}s", e, delay.as_secs_f64());
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return None,
                }
            }
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => log::warn!("SIGTERM handler unavailable: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Ctrl-C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}
