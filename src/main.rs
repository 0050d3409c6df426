use clap::Parser;
use tickvault::cli::{Cli, Commands};
use tickvault::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
        eprintln!("Using default configuration");
        toml::from_str(include_str!("../config.toml.example")).expect("Invalid default config")
    });

    // Initialize telemetry
    let _guard = tickvault::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Collect(args) => {
            tracing::info!("Starting collection");
            args.execute(&config).await?;
        }
        Commands::Aggregate(args) => {
            tracing::info!("Starting aggregation");
            args.execute(&config).await?;
        }
        Commands::Compact(args) => {
            tracing::info!("Starting compaction");
            args.execute(&config).await?;
        }
        Commands::Verify(args) => {
            args.execute(&config).await?;
        }
        Commands::Status(args) => {
            args.execute(&config).await?;
        }
    }

    Ok(())
}
