use clap::Parser;
use perp_guard::cli::{render_config, show_status, Cli, Commands};
use perp_guard::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Warning: Could not load config from {}: {}", cli.config, e);
            eprintln!("Using default configuration");
            toml::from_str(include_str!("../config.toml.example"))?
        }
    };

    // Initialize telemetry
    perp_guard::telemetry::init_telemetry(&config.telemetry)?;

    // Configuration errors are fatal before any trading starts
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    match cli.command {
        Commands::Run(args) => args.execute(&config).await?,
        Commands::Parse(args) => args.execute(&config).await?,
        Commands::Status => show_status(&config).await?,
        Commands::Config => print!("{}", render_config(&config)?),
    }

    Ok(())
}
