use smartpark_flow::history::SessionHistory;
use smartpark_flow::history::store::JsonFileStore;
use smartpark_flow::runtime::{
    COMMAND_CHANNEL_CAPACITY, Runtime, RuntimeCommand, TokioScheduler, spawn_source_thread,
};
use smartpark_flow::sensor::serial::SerialSource;
use smartpark_flow::state::AppState;
use smartpark_flow::tracker::SessionTracker;
use smartpark_flow::tracker::timer::SystemClock;
use smartpark_flow::{api, config};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

fn init_tracing(level: tracing::Level) {
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(config.log_level());
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        hourly_rate = config.hourly_rate(),
        "smartpark-flow starting"
    );

    let state = Arc::new(RwLock::new(AppState::new(config.hourly_rate())));
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

    let history_dir = config.history_dir();
    tracing::info!(dir = %history_dir.display(), "Opening session history");
    let history = SessionHistory::open(JsonFileStore::new(history_dir));
    let tracker = SessionTracker::new(
        SystemClock,
        TokioScheduler::new(commands_tx.clone()),
        config.tracker_settings(),
    );
    let runtime = Runtime::new(tracker, history, Arc::clone(&state))?;
    let runtime_handle = tokio::spawn(runtime.run(commands_rx, config.tick_interval()));

    // Occupancy source: serial device if configured, manual toggle otherwise
    let stop_flag = Arc::new(AtomicBool::new(false));
    let _source_handle = match config.serial_path() {
        Some(path) => match SerialSource::open(path) {
            Ok(source) => {
                tracing::info!(path = %path.display(), "Reading occupancy from serial device");
                Some(spawn_source_thread(
                    source,
                    commands_tx.clone(),
                    Arc::clone(&stop_flag),
                ))
            }
            Err(err) => {
                tracing::error!(
                    path = %path.display(),
                    error = %err,
                    "Failed to open serial device, manual toggle only"
                );
                None
            }
        },
        None => {
            tracing::warn!("No serial device configured in [source].serial_path, manual toggle only");
            None
        }
    };

    let app = api::router(Arc::clone(&state), commands_tx.clone());
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;

    stop_flag.store(true, Ordering::Relaxed);
    let _ = commands_tx.send(RuntimeCommand::Shutdown).await;
    let _ = runtime_handle.await;

    Ok(())
}
