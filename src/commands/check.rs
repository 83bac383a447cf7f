use anyhow::{Context, Result};
use std::path::PathBuf;

use hintbatch::config::Config;
use hintbatch::credentials::CredentialPool;
use hintbatch::input::RowSource;
use hintbatch::prompt::PromptTemplate;

/// Validate configuration, keys, template and (optionally) the input header
pub fn check(config: Config, input: Option<PathBuf>) -> Result<()> {
    println!("Configuration Check");
    println!("===================");

    let pool = CredentialPool::from_env(config.credentials.max_numbered_keys)
        .context("No API keys configured (set API_KEY_1.. or GEMINI_API_KEY)")?;
    println!("API keys: {}", pool.len());
    for usage in pool.usage() {
        println!("  {}", usage.identity);
    }

    PromptTemplate::load(config.prompt.template_path.as_deref())
        .context("Prompt template is invalid")?;
    match &config.prompt.template_path {
        Some(path) => println!("Prompt template: {}", path.display()),
        None => println!("Prompt template: built-in"),
    }

    println!("Model: {}", config.gemini.model);
    println!("Endpoint: {}", config.gemini.generate_url());

    let input = input.unwrap_or_else(|| config.service.input_path());
    if input.exists() {
        let source = RowSource::open(&input, &config.input)
            .with_context(|| format!("Input {} does not match the field mapping", input.display()))?;
        let headers = source.headers();
        println!("Input: {}", input.display());
        for (field, column) in source.mapping().columns() {
            let header = headers.get(column).map(String::as_str).unwrap_or("");
            println!("  {field} -> column {} ({header})", column + 1);
        }
    } else {
        println!("Input: {} (not present, mapping not checked)", input.display());
    }

    if !config.input.skip_rows.is_empty() {
        let rows: Vec<String> = config.input.skip_rows.iter().map(ToString::to_string).collect();
        println!("Skipped rows: {}", rows.join(", "));
    }

    println!("\nConfiguration OK");
    Ok(())
}
