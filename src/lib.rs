// Module declarations for the application's core components
pub mod config;    // Configuration management
pub mod error;     // Error handling and types
pub mod keba;      // KEBA UDP protocol implementation
pub mod options;   // Command line options parsing
pub mod prelude;   // Common imports and types
pub mod scheduler; // Periodic charger polling

// Get the package version from Cargo.toml
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use log::LevelFilter;
use std::sync::Arc;

/// Manages all application components and their lifecycle
#[derive(Clone)]
pub struct Components {
    pub dispatcher: Arc<Dispatcher>,   // Shared UDP listener
    pub chargers: Vec<Arc<Charger>>,   // One per enabled charger
    pub scheduler: Arc<Scheduler>,     // Status polling
}

impl Components {
    /// Gracefully stops all components in the correct order
    ///
    /// Chargers are closed first so in-flight roundtrips end before the
    /// dispatcher stops delivering to them.
    pub async fn stop(&mut self) {
        info!("Stopping all components...");

        for charger in &self.chargers {
            charger.close();
        }
        self.dispatcher.stop().await;

        info!("Shutdown complete");
    }
}

/// Initialise env_logger. Until a config is loaded only info and above is
/// shown; RUST_LOG, when set, always wins.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(LevelFilter::Info);
    }
}

/// Apply the configured log level, unless RUST_LOG overrides it.
pub fn set_loglevel(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }

    match LevelFilter::from_str(level) {
        Ok(level) => log::set_max_level(level),
        Err(_) => warn!("Unknown loglevel {:?}, keeping {}", level, log::max_level()),
    }
}

/// Main application entry point
///
/// Binds the dispatcher, builds a charger per enabled config entry and polls
/// them until a shutdown signal arrives.
pub async fn app(mut shutdown_rx: broadcast::Receiver<()>, options: Options) -> Result<()> {
    init_logging();

    info!("Starting keba-bridge {} with config file: {}", CARGO_PKG_VERSION, options.config_file);

    // Load and validate configuration
    let config = ConfigWrapper::new(options.config_file)?;
    set_loglevel(&config.loglevel());

    info!("Initializing components...");

    info!("  Creating Dispatcher...");
    let dispatcher = Arc::new(Dispatcher::listen(config.listen_port()).await?);
    dispatcher.start()?;

    info!("  Creating Chargers...");
    let mut chargers = Vec::new();
    for charger in config.enabled_chargers() {
        match Charger::from_config(&dispatcher, &charger).await {
            Ok(charger) => chargers.push(Arc::new(charger)),
            Err(e) => error!("charger {}: {}", charger.name(), e),
        }
    }
    if chargers.is_empty() {
        dispatcher.stop().await;
        bail!("no usable chargers configured");
    }
    info!("    Created {} chargers", chargers.len());

    info!("  Creating Scheduler...");
    let scheduler = Arc::new(Scheduler::new(config.clone(), chargers.clone()));
    let scheduler_clone = scheduler.clone();
    let scheduler_rx = shutdown_rx.resubscribe();
    let scheduler_handle = tokio::spawn(async move {
        if let Err(e) = scheduler_clone.start(scheduler_rx).await {
            error!("Scheduler task failed: {}", e);
        }
    });

    // Wait for shutdown signal
    info!("Waiting for shutdown signal...");
    let _ = shutdown_rx.recv().await;

    info!("Shutdown signal received, stopping components...");
    let mut components = Components {
        dispatcher,
        chargers,
        scheduler,
    };
    components.stop().await;

    if let Err(e) = scheduler_handle.await {
        error!("Error waiting for scheduler task: {}", e);
    }

    info!("Application shutdown complete");
    Ok(())
}
