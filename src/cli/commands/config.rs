//! Config command - show or edit configuration

use super::CommandContext;
use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{KilnError, KilnResult};
use crate::ui::{self, UiContext};
use std::path::PathBuf;

const VALID_KEYS: &[&str] = &[
    "general.log_format",
    "cache.root",
    "build.shell",
    "build.show_logs",
];

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    ctx: &CommandContext,
    manager: &ConfigManager,
) -> KilnResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(&ctx.config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => {
            let mut config = ctx.config.clone();
            set_value(&mut config, &key, &value)?;
            manager.save(&config).await?;
            ui::step_ok(&UiContext::detect(), &format!("Set {} = {}", key, value));
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> KilnResult<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> KilnResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn(
            &ctx,
            &format!(
                "Config already exists at {} (use --force to overwrite)",
                path.display()
            ),
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());
    Ok(())
}

fn set_value(config: &mut Config, key: &str, value: &str) -> KilnResult<()> {
    match key {
        "general.log_format" => match value {
            "text" | "json" => config.general.log_format = value.to_string(),
            _ => {
                return Err(KilnError::User(format!(
                    "Invalid log format: {}. Use text or json",
                    value
                )))
            }
        },
        "cache.root" => {
            config.cache.root = (!value.is_empty()).then(|| PathBuf::from(value));
        }
        "build.shell" => config.build.shell = value.to_string(),
        "build.show_logs" => config.build.show_logs = parse_bool(value)?,
        _ => {
            return Err(KilnError::User(format!(
                "Unknown config key: {}. Valid keys: {}",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }
    Ok(())
}

fn parse_bool(value: &str) -> KilnResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(KilnError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}
