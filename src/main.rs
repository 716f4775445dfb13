use clap::Parser;
use log::{error, info, warn};
use statuswatch::config::{validate_poll_interval, Config};
use statuswatch::error::ConfigError;
use statuswatch::render::ConsoleRenderer;
use statuswatch::{EventBus, MonitorRegistry};
use std::io::IsTerminal;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Command-line arguments for the status page watcher
#[derive(Parser)]
#[command(
    name = "statuswatch",
    about = "Status page watcher - streams incident changes from status-page feeds",
    long_about = "Polls the JSON API of one or more status pages, detects new, updated and \
                  resolved incidents, and prints every change to the terminal as it happens."
)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Configuration file path (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(
        short,
        long,
        help = "Enable verbose logging output (sets RUST_LOG=debug)"
    )]
    verbose: bool,

    /// Override every provider's poll interval
    #[arg(
        short,
        long,
        value_name = "SECONDS",
        help = "Poll interval in seconds applied to every provider"
    )]
    interval: Option<f64>,

    /// Disable the console renderer
    #[arg(long, help = "Do not print events to the terminal (log only)")]
    no_console: bool,
}

impl Cli {
    /// Validate the CLI arguments
    fn validate(&self) -> Result<(), String> {
        if let Some(ref config_path) = self.config {
            // Missing files fall back to defaults in load_config
            if config_path.exists() {
                if !config_path.is_file() {
                    return Err(format!(
                        "Configuration path is not a file: {}",
                        config_path.display()
                    ));
                }

                if let Some(extension) = config_path.extension() {
                    if extension != "toml" {
                        warn!(
                            "Configuration file does not have .toml extension: {}",
                            config_path.display()
                        );
                    }
                }
            }
        }

        if let Some(seconds) = self.interval {
            validate_poll_interval(seconds).map_err(|e| e.to_string())?;
        }

        Ok(())
    }
}

/// Load configuration from file or use defaults
///
/// A missing or invalid file is reported and replaced by the default
/// configuration.
fn load_config(config_path: Option<&PathBuf>) -> Config {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            match Config::from_file(path) {
                Ok(config) => config,
                Err(ConfigError::ReadError(_)) => {
                    warn!(
                        "Configuration file '{}' not found or unreadable, using defaults",
                        path.display()
                    );
                    Config::default()
                }
                Err(e) => {
                    error!("Configuration error in '{}': {}", path.display(), e);
                    warn!("Using default configuration due to invalid config file");
                    Config::default()
                }
            }
        }
        None => {
            info!("Using default configuration");
            Config::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    } else if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    info!("Starting status page watcher");

    if let Err(e) = cli.validate() {
        error!("Invalid arguments: {}", e);
        std::process::exit(1);
    }

    let config = load_config(cli.config.as_ref()).with_poll_interval_override(cli.interval);

    let bus = EventBus::with_capacity(config.queue_capacity);
    let mut registry = match MonitorRegistry::from_config(&config, bus.clone()) {
        Ok(registry) => registry,
        Err(e) => {
            error!("Failed to register monitors: {}", e);
            std::process::exit(1);
        }
    };

    // Subscribe before any poller runs so the first tick's events are seen
    let console = if cli.no_console {
        None
    } else {
        let renderer = ConsoleRenderer::new(std::io::stdout().is_terminal());
        Some(tokio::spawn(renderer.run(bus.stream())))
    };

    if let Err(e) = registry.start_all() {
        error!("Failed to start monitors: {}", e);
        std::process::exit(1);
    }

    let (shutdown_sender, mut shutdown_receiver) = mpsc::unbounded_channel();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received interrupt signal (SIGINT), shutting down gracefully...");
        if let Err(e) = shutdown_sender.send(()) {
            error!("Failed to send shutdown signal: {}", e);
        }
    }) {
        error!("Failed to install SIGINT handler: {}", e);
        registry.stop_all().await;
        std::process::exit(1);
    }

    info!(
        "Watching {} providers ({}). Press Ctrl+C to stop.",
        registry.monitor_count(),
        registry.provider_names().join(", ")
    );

    shutdown_receiver.recv().await;

    if let Some(console) = console {
        console.abort();
        let _ = console.await;
    }
    registry.stop_all().await;

    for summary in registry.get_summaries() {
        info!(
            "[{}] {} ({} active incidents)",
            summary.provider,
            summary.status_description,
            summary.active_incidents.len()
        );
    }

    info!("Status page watcher shutdown complete");
}
