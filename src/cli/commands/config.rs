//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{IndexerError, IndexerResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;

const VALID_KEYS: [&str; 8] = [
    "general.log_format",
    "arena.root",
    "gc.enabled",
    "gc.interval_secs",
    "gc.batch_size",
    "gc.migrate_on_start",
    "manifest.delete_interval_start_secs",
    "manifest.delete_interval_duration_secs",
];

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    manager: &ConfigManager,
    config: &Config,
) -> IndexerResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, config, &key, &value).await?,
    }

    Ok(())
}

fn show_config(config: &Config) -> IndexerResult<()> {
    let toml = toml::to_string_pretty(config)?;
    println!("{}", toml);
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> IndexerResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());

    Ok(())
}

async fn set_value(
    manager: &ConfigManager,
    config: &Config,
    key: &str,
    value: &str,
) -> IndexerResult<()> {
    let ctx = UiContext::detect();
    let mut config = config.clone();

    let parts: Vec<&str> = key.split('.').collect();
    match parts.as_slice() {
        ["general", "log_format"] => config.general.log_format = parse_log_format(value)?,

        ["arena", "root"] => config.arena.root = Some(PathBuf::from(value)),

        ["gc", "enabled"] => config.gc.enabled = parse_bool(value)?,
        ["gc", "interval_secs"] => config.gc.interval_secs = parse_u64(value)?,
        ["gc", "batch_size"] => config.gc.batch_size = Some(parse_u64(value)? as usize),
        ["gc", "migrate_on_start"] => config.gc.migrate_on_start = parse_bool(value)?,

        ["manifest", "delete_interval_start_secs"] => {
            config.manifest.delete_interval_start_secs = parse_u64(value)?
        }
        ["manifest", "delete_interval_duration_secs"] => {
            config.manifest.delete_interval_duration_secs = parse_u64(value)?
        }

        _ => {
            ui::step_error_detail(&ctx, "Unknown config key", key);
            ui::remark(&ctx, "Valid keys:");
            for key in VALID_KEYS {
                ui::remark(&ctx, &format!("  {key}"));
            }
            return Err(IndexerError::User(format!("Unknown config key: {key}")));
        }
    }

    manager.save(&config).await?;
    ui::step_ok(&ctx, &format!("Set {} = {}", key, value));

    Ok(())
}

fn parse_log_format(value: &str) -> IndexerResult<String> {
    match value {
        "text" | "json" => Ok(value.to_string()),
        _ => Err(IndexerError::User(format!(
            "Invalid log format: {value}. Use text or json"
        ))),
    }
}

fn parse_bool(value: &str) -> IndexerResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(IndexerError::User(format!(
            "Invalid boolean value: {value}. Use true/false"
        ))),
    }
}

fn parse_u64(value: &str) -> IndexerResult<u64> {
    value
        .parse()
        .map_err(|_| IndexerError::User(format!("Invalid number: {value}")))
}
