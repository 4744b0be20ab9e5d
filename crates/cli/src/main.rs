mod browser_commands;
mod config_commands;
mod generate_commands;
mod session_commands;

use std::{path::PathBuf, process::ExitCode};

use {
    clap::{Parser, Subcommand},
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "mirage", version, about = "Mirage: image generation through a logged-in browser")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides default ~/.config/mirage/).
    #[arg(long, global = true, env = "MIRAGE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a prompt and download the generated images.
    Generate(generate_commands::GenerateArgs),
    /// Inspect or replace the stored login session.
    Session {
        #[command(subcommand)]
        action: session_commands::SessionAction,
    },
    /// Browser discovery.
    Browser {
        #[command(subcommand)]
        action: browser_commands::BrowserAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

/// Logs go to stderr; stdout is reserved for command output.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "mirage starting");

    if let Some(ref dir) = cli.config_dir {
        mirage_config::set_config_dir(dir.clone());
    }

    match cli.command {
        Commands::Generate(args) => generate_commands::handle_generate(args).await,
        Commands::Session { action } => session_commands::handle_session(action),
        Commands::Browser { action } => browser_commands::handle_browser(action),
        Commands::Config { action } => config_commands::handle_config(action),
    }
}
