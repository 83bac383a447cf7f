use anyhow::Result;
use std::path::PathBuf;

use hintbatch::config::Config;

use super::{build_runner, print_summary, shutdown_signal};

/// Process one input file and exit
pub async fn run(config: Config, input: PathBuf, output_dir: Option<PathBuf>) -> Result<()> {
    let output_dir = output_dir.unwrap_or_else(|| config.output.dir.clone());

    println!("Starting batch");
    println!("==============");
    println!("Input: {}", input.display());
    println!("Output directory: {}", output_dir.display());

    let mut runner = build_runner(&config, shutdown_signal())?;
    println!("API keys: {}", runner.pool().len());

    let stats = runner
        .run_pass(&input, &output_dir, chrono::Local::now())
        .await?;

    print_summary(&stats);
    Ok(())
}
