use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;

use previewbox_cli::config::Config;

#[derive(Parser)]
#[command(name = "previewbox")]
#[command(about = "Previewbox - live previews of generated web projects in Docker sandboxes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sandbox API server
    Serve {
        #[arg(long, help = "Bind address (overrides PREVIEWBOX_API_HOST)")]
        host: Option<String>,
        #[arg(long, help = "API port (overrides PREVIEWBOX_API_PORT)")]
        port: Option<u16>,
        #[arg(long, help = "Directory holding sandbox trees")]
        sandbox_root: Option<PathBuf>,
        #[arg(long, help = "Container image for new sandboxes")]
        image: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    if let Err(e) = handle_command(cli.command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Serve {
            host,
            port,
            sandbox_root,
            image,
        } => {
            let mut config = Config::from_env()?;
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                if port == 0 {
                    anyhow::bail!("--port must be between 1 and 65535");
                }
                config.port = port;
            }
            if let Some(root) = sandbox_root {
                config.sandbox_root = root;
            }
            if let Some(image) = image {
                config.image = image;
            }

            println!(
                "{} Starting previewbox on {}:{} with image {}",
                "🚀".green(),
                config.host,
                config.port,
                config.image.cyan()
            );

            previewbox_cli::run_server(config)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            Ok(())
        }
    }
}
