mod cli;
mod config;
mod core;
mod input;
mod sdp;
mod session_controller;
mod signaling;
mod stats;
mod webrtc_bridge;

use std::sync::Arc;
use std::time::Duration;

use gfn_protocol::StreamingOptions;
use input::{run_capture_loop, spawn_capture_thread, CapturedInput};
use tracing::{error, info, warn};

use crate::core::{LoggingStatsObserver, StreamingCore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = cli::parse_args()?;

    let client_config = config::load_config(&args.config_path)?;
    if let Err(issues) = client_config.validate() {
        let has_errors = issues.iter().any(|i| i.starts_with("ERROR:"));
        for issue in &issues {
            if issue.starts_with("ERROR:") {
                error!("{issue}");
            } else {
                warn!("{issue}");
            }
        }
        if has_errors {
            error!("Configuration has {} issue(s). Fix the ERROR(s) above and restart.", issues.len());
            std::process::exit(1);
        }
    }

    let base_url = args.base_url.clone().unwrap_or_else(|| client_config.api.base_url.clone());
    info!(base_url = %base_url, app_id = args.app_id, "starting gfn-client");

    let token = args.token.clone().unwrap_or_default();
    let request_timeout = Duration::from_millis(client_config.api.request_timeout_ms);
    let session_controller = session_controller::SessionController::new(&base_url, token, request_timeout);

    let options = StreamingOptions {
        app_id: args.app_id,
        store_type: args.store_type.clone(),
        store_id: args.store_id.clone(),
        preferred_server: args.preferred_server.clone(),
        width: args.width,
        height: args.height,
        fps: args.framerate,
        codec: args.codec,
        max_bitrate_mbps: args.max_bitrate_mbps,
        reflex: args.reflex,
    };

    let (streaming_core, mut signaling_events, _cmd_tx) =
        StreamingCore::connect(session_controller, &options, &client_config.ice, &client_config.tls).await?;
    info!(session_id = %streaming_core.session.session_id, "session connected, arming input and stats");

    let (capture_tx, capture_rx) = tokio::sync::mpsc::unbounded_channel::<CapturedInput>();
    // rdev::listen blocks in its own OS event loop with no stop handle; the
    // thread is left running and reaped by process exit (§4.5 limitation).
    let _capture_handle = spawn_capture_thread(Arc::clone(&streaming_core.input_pipeline), capture_tx);

    let stats_observer = LoggingStatsObserver;
    let stats_sampler = Arc::clone(&streaming_core.stats);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = run_capture_loop(Arc::clone(&streaming_core.input_pipeline), capture_rx) => {}

        _ = stats_sampler.run(&stats_observer) => {}

        _ = async {
            while let Some(event) = signaling_events.recv().await {
                warn!(?event, "unexpected post-handshake signaling event");
            }
        } => {}

        _ = tokio::signal::ctrl_c() => {
            info!("received SIGINT, shutting down");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
    }

    streaming_core.stats.stop();
    streaming_core.terminate().await;

    info!("gfn-client shutdown complete");
    Ok(())
}
