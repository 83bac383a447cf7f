use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hintbatch::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "hintbatch",
    version,
    about = "Annotate programming exercises with Gemini using a rotating pool of API keys",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process one input file and exit
    Run {
        /// Input CSV file
        #[arg(short, long)]
        input: PathBuf,

        /// Directory for the output file (defaults to output.dir)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Poll the input directory and process new files until stopped
    Watch,

    /// Validate configuration, API keys, prompt template and input header
    Check {
        /// Input CSV file to check the field mapping against
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    match cli.command {
        Commands::Run { input, output_dir } => {
            tracing::info!(
                input = %input.display(),
                output_dir = ?output_dir,
                "Starting run command"
            );
            commands::run(config, input, output_dir).await?;
        }

        Commands::Watch => {
            tracing::info!(
                input_dir = %config.service.input_dir.display(),
                "Starting watch command"
            );
            commands::watch(config).await?;
        }

        Commands::Check { input } => {
            commands::check(config, input)?;
        }
    }

    tracing::info!("hintbatch completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let default_filter = if verbose {
        "hintbatch=debug,info".to_string()
    } else {
        format!("hintbatch={level},warn")
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}
