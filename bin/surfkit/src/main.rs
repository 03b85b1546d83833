mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "surfkit")]
#[command(about = "Stateless browser actions over persisted sessions", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the action gateway (long-running daemon)
    Serve {
        /// Port to listen on (overrides config gateway.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config gateway.host)
        #[arg(long)]
        host: Option<String>,
    },

    /// Execute a single browser action and print the result envelope
    Run {
        /// Action name (open, snapshot, click, fill, type, get_text,
        /// screenshot, wait, press_key, close)
        action: String,

        /// Action arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Write a screenshot payload to this file (decoded from base64)
        #[arg(long)]
        output: Option<std::path::PathBuf>,
    },

    /// Run environment diagnostics
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Serve { port, host } => {
            commands::gateway::run(host, port).await?;
        }
        Commands::Run { action, args, output } => {
            commands::run_cmd::run(&action, &args, output).await?;
        }
        Commands::Doctor => {
            commands::doctor::run().await?;
        }
    }

    Ok(())
}
