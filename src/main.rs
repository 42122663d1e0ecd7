use clap::{Parser, Subcommand};
use statewall::config::{self, Config};
use statewall::dataplane::StatefulFirewall;
use statewall::event::LineSource;
use statewall::report::ConsoleReporter;
use statewall::runtime;
use statewall::telemetry::init_logging;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "statewall")]
#[command(about = "A connection-tracking firewall")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Process packet events
    Run {
        /// Path to statewall.toml (built-in defaults if omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Read events from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate statewall.toml
    Validate {
        /// Path to statewall.toml
        #[arg(short, long, default_value = "statewall.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Config { action }) => match action {
            ConfigAction::Validate {
                config: config_path,
            } => cmd_config_validate(&config_path),
        },
        Some(Commands::Run { config, input }) => cmd_run(config.as_deref(), input.as_deref()),
        // Default: built-in policy, events from stdin
        None => cmd_run(None, None),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_run(config_path: Option<&Path>, input: Option<&Path>) -> Result<(), String> {
    use tokio::io::BufReader;
    use tokio::runtime::Runtime;

    let (config, warnings) = match config_path {
        Some(path) => {
            let (config, validation) = config::load_validated(path)
                .map_err(|e| format!("Failed to load {}: {}", path.display(), e))?;
            (config, validation.warnings)
        }
        None => (Config::default(), Vec::new()),
    };

    init_logging(Some(&config.log_config()))
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;
    for warning in &warnings {
        warn!("{}", warning);
    }

    // Create Tokio runtime
    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    let result = rt.block_on(async {
        let firewall = Arc::new(StatefulFirewall::new(
            config.policy(),
            config.flow_table_config(),
        ));
        info!(
            "Stateful firewall is running: allowed ports {:?}, max flows {:?}, idle timeout {:?}",
            firewall.policy().ports().collect::<Vec<_>>(),
            firewall.flow_table().capacity(),
            firewall.flow_table().config().idle_timeout,
        );

        if let Some(path) = config_path {
            spawn_policy_reload(firewall.clone(), path.to_path_buf());
        }

        let mut reporter = ConsoleReporter::stdout();
        let sweep_interval = config.sweep_interval();

        let summary = match input {
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| format!("Failed to open {}: {}", path.display(), e))?;
                let mut source = LineSource::new(BufReader::new(file));
                runtime::run(
                    &firewall,
                    &mut source,
                    &mut reporter,
                    sweep_interval,
                    shutdown_signal(),
                )
                .await
            }
            None => {
                let mut source = LineSource::new(BufReader::new(tokio::io::stdin()));
                runtime::run(
                    &firewall,
                    &mut source,
                    &mut reporter,
                    sweep_interval,
                    shutdown_signal(),
                )
                .await
            }
        }
        .map_err(|e| format!("Event loop failed: {}", e))?;

        info!(
            "Processed {} events ({} rejected, {} flows expired)",
            summary.events, summary.invalid_input, summary.expired
        );
        for (name, value) in firewall.metrics().export() {
            info!("  {} = {}", name, value);
        }
        Ok::<(), String>(())
    });

    // A pending stdin read must not hold the process open
    rt.shutdown_background();
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Reload the admission policy from the config file on SIGHUP
#[cfg(unix)]
fn spawn_policy_reload(firewall: Arc<StatefulFirewall>, path: PathBuf) {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::error;

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Policy reload on SIGHUP unavailable: {}", e);
                return;
            }
        };

        while hangup.recv().await.is_some() {
            info!("Reloading policy from {}...", path.display());
            match config::load_validated(&path) {
                Ok((config, _)) => firewall.reload_policy(config.policy()),
                Err(e) => error!("Policy reload failed, keeping current policy: {}", e),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_policy_reload(_firewall: Arc<StatefulFirewall>, _path: PathBuf) {}

fn cmd_config_validate(config_path: &Path) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        Err("Validation failed".to_string())
    } else {
        println!("[INFO] Configuration is valid");
        Ok(())
    }
}
