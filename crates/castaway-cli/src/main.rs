// Castaway command-line entry point.
//
// Startup sequence:
// 1. Parse the command line
// 2. Load config (copying defaults/ into config/ on first run)
// 3. Initialize tracing (log to file, not terminal)
// 4. Open the database and build the engine
// 5. Run the command

use castaway_cli::commands::{self, Cli};
use castaway_cli::config::{self, Config};
use castaway_core::Engine;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};

fn main() -> anyhow::Result<()> {
    // 1. Parse the command line
    let cli = Cli::parse();

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;

    // 3. Initialize tracing
    init_tracing(&config)?;
    info!("castaway starting: {:?}", cli.command);
    for key in &config.ignored_scoring_keys {
        warn!("ignoring unknown scoring key '{}' in config", key);
    }

    // 4. Open the database
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db_path_str = db_path
        .to_str()
        .with_context(|| format!("database path is not valid UTF-8: {}", db_path.display()))?;
    let engine = Engine::open(db_path_str, config.engine_settings())
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    info!("Database opened at {}", db_path.display());

    // 5. Run the command
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = commands::run(&engine, cli.command, &mut out) {
        error!("command failed: {:#}", e);
        return Err(e);
    }

    info!("castaway finished");
    Ok(())
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = config.log_directory(&std::env::current_dir()?);
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("castaway.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
