use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use binkit::cli::{Cli, Command};
use binkit::config::Config;
use binkit::{download, which};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing on stderr so a child's stdout stays clean
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    match cli.command {
        Command::Which { command } => match which::which_async(&command).await {
            Some(path) => println!("{}", path.display()),
            None => {
                tracing::debug!("{} not found on PATH", command);
                std::process::exit(1);
            }
        },
        Command::Fetch(args) => {
            let options = args.request_options()?;
            let extraction = download::fetch_and_extract(
                &args.url,
                args.dest.as_deref(),
                &options,
                args.strip,
            )
            .await
            .with_context(|| format!("Failed to fetch {}", args.url))?;
            tracing::info!(
                "Extracted {} files (sha256 {})",
                extraction.files,
                extraction.sha256
            );
            println!("{}", extraction.path.display());
        }
        Command::Install { binary, quiet } => {
            let options = binary.request_options(&config)?;
            let binary = binary.binary(&config)?;
            binary.install(&options, quiet).await;
        }
        Command::Run { binary, args } => {
            let options = binary.request_options(&config)?;
            let binary = binary.binary(&config)?;
            binary.run(&options, args).await;
        }
        Command::Status { binary } => {
            let binary = binary.binary(&config)?;
            println!("name:      {}", binary.name());
            println!("version:   {}", binary.version());
            println!("path:      {}", binary.binary_path().display());
            println!("installed: {}", binary.exists());
            println!("complete:  {}", binary.is_complete());
            if let Some(receipt) = binary.receipt() {
                println!("sha256:    {}", receipt.sha256);
            }
        }
    }

    Ok(())
}
