//! Echem Session - Main Entry Point
//!
//! Runs the measurement UI against the simulated instrument. The main thread
//! is the UI thread: it creates the marshal, runs eframe and finally tears the
//! session down.

use echem_session::{
    config::{default_config_path, ensure_app_data_dir, AppConfig, AppState},
    frontend::EchemApp,
    instrument::SimulatedInstrument,
    marshal, MeasurementSession,
};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> anyhow::Result<()> {
    // Log to stderr and to a daily file in the data directory
    let (file_layer, _log_guard) = match ensure_app_data_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), "echem-session.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,echem_session=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    tracing::info!("Starting Echem Session");

    // An explicit path on the command line wins over the data directory
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(default_config_path);
    let config = config_path
        .map(AppConfig::load_or_default)
        .unwrap_or_default();
    let app_state = AppState::load_or_default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("echem-worker")
        .build()?;

    let client = Arc::new(SimulatedInstrument::new(config.simulator.clone()));

    // The waker needs the egui context, which only exists once eframe starts
    let egui_ctx: Arc<OnceLock<egui::Context>> = Arc::new(OnceLock::new());
    let waker_ctx = egui_ctx.clone();
    let (ui_marshal, pump) = marshal::channel_with_waker(Arc::new(move || {
        if let Some(ctx) = waker_ctx.get() {
            ctx.request_repaint();
        }
    }));

    let session = MeasurementSession::builder(client, Arc::new(ui_marshal))
        .name("main")
        .config(config.session.clone())
        .build();

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_min_inner_size([900.0, 600.0])
            .with_title("Echem Session"),
        ..Default::default()
    };

    let handle = runtime.handle().clone();
    let app_session = session.clone();
    let result = eframe::run_native(
        "Echem Session",
        native_options,
        Box::new(move |cc| {
            Ok(Box::new(EchemApp::new(
                cc,
                handle,
                app_session,
                pump,
                egui_ctx,
                config,
                app_state,
            )))
        }),
    );

    // The pump is gone: session jobs run inline here, client events are dropped
    tracing::info!("Shutting down...");
    if let Err(e) = runtime.block_on(session.disconnect()) {
        tracing::debug!("Disconnect on exit: {}", e);
    }
    runtime.shutdown_timeout(std::time::Duration::from_secs(1));

    result.map_err(|e| anyhow::anyhow!("UI error: {}", e))
}
