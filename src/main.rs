use clap::Parser;
use hl_signalbot::cli::{self, Cli, Commands};
use hl_signalbot::config::Config;
use hl_signalbot::risk::create_sizer;

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
    let _telemetry = hl_signalbot::telemetry::init_telemetry(&config.telemetry)?;

    match cli.command {
        Commands::Run(args) => {
            args.execute(config).await?;
        }
        Commands::Close => {
            cli::close::execute(config).await?;
        }
        Commands::Status => {
            cli::status::execute(&config)?;
        }
        Commands::Config => {
            println!("Current configuration:");
            println!(
                "  Market: {} ({})",
                config.market.coin,
                config.market.perp_symbol()
            );
            println!(
                "  Execution: {:?} orders, {:?} market data",
                config.execution.mode, config.execution.data_source
            );
            println!("  Poll: every {}s", config.signal.poll_secs);
            println!(
                "  Sizing: {} (max leverage {})",
                create_sizer(&config.risk).mode_name(),
                config.risk.max_leverage
            );
            println!("  Daily loss cap: {} USD", config.risk.max_daily_loss_usd);
            println!("  TP ladder: {} rungs", config.exits.tp.len());
            println!("  Data dir: {}", config.data.dir.display());
        }
    }

    Ok(())
}
