use crate::output::print_json;
use anyhow::{Context, Result};
use clap::Subcommand;
use serverpal_core::config::{Config, ConfigKey, WarnLevel};
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a default config file if none exists
    Init {
        /// Overwrite an existing file with defaults
        #[arg(long)]
        force: bool,
    },

    /// Show every setting
    Show,

    /// Print one setting
    Get {
        /// Setting name (snake_case, e.g. backup_before_update)
        key: String,
    },

    /// Change one setting
    Set {
        /// Setting name (snake_case, e.g. backup_before_update)
        key: String,
        value: String,
    },

    /// Validate the config for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config_path: &Path, subcmd: ConfigSubcommand, json: bool) -> Result<()> {
    match subcmd {
        ConfigSubcommand::Init { force } => init(config_path, force),
        ConfigSubcommand::Show => show(config_path, json),
        ConfigSubcommand::Get { key } => get(config_path, &key, json),
        ConfigSubcommand::Set { key, value } => set(config_path, &key, &value),
        ConfigSubcommand::Validate => validate(config_path, json),
    }
}

fn load(config_path: &Path) -> Result<Config> {
    Config::load(config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))
}

// ---------------------------------------------------------------------------
// init / show / get / set
// ---------------------------------------------------------------------------

fn init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }
    Config::default()
        .save(config_path)
        .context("failed to write config")?;
    println!("Wrote default config to {}", config_path.display());
    Ok(())
}

fn show(config_path: &Path, json: bool) -> Result<()> {
    let config = load(config_path)?;
    if json {
        return print_json(&config);
    }
    println!("config: {}", config_path.display());
    for key in ConfigKey::ALL {
        let value = config.get(key);
        let shown = if value.is_empty() { "(not set)" } else { value.as_str() };
        println!("  {key}: {shown}");
    }
    Ok(())
}

fn get(config_path: &Path, key: &str, json: bool) -> Result<()> {
    let key: ConfigKey = key.parse()?;
    let value = load(config_path)?.get(key);
    if json {
        print_json(&serde_json::json!({ "key": key.as_str(), "value": value }))?;
    } else {
        println!("{value}");
    }
    Ok(())
}

fn set(config_path: &Path, key: &str, value: &str) -> Result<()> {
    let key: ConfigKey = key.parse()?;
    let mut config = load(config_path)?;
    config.set(key, value)?;
    config.save(config_path).context("failed to write config")?;
    println!("{key} = {}", config.get(key));
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(config_path: &Path, json: bool) -> Result<()> {
    let config = load(config_path)?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}
