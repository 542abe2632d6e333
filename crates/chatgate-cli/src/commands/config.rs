//! Configuration management commands.

use chatgate_core::config::IssueSeverity;
use chatgate_core::Config;

use crate::ConfigAction;

pub fn handle(action: ConfigAction, config: &Config) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let mut shown = config.clone();
            if shown.provider.api_key.is_some() {
                shown.provider.api_key = Some("<redacted>".to_string());
            }
            print!("{}", shown.to_toml()?);
        }
        ConfigAction::Validate => {
            let result = config.validate();
            if result.issues.is_empty() {
                println!("Configuration is valid.");
            }
            for issue in &result.issues {
                let level = match issue.severity {
                    IssueSeverity::Error => "error",
                    IssueSeverity::Warning => "warning",
                };
                println!("{}: {}: {}", level, issue.field, issue.message);
            }
            if !result.is_ok() {
                anyhow::bail!("{} configuration error(s)", result.errors().len());
            }
        }
        ConfigAction::Path => {
            println!("Config file: {}", Config::config_dir().join("config.toml").display());
            println!("Project file: .chatgate/config.toml");
            println!("Database:    {}", config.storage.database_path().display());
        }
    }
    Ok(())
}
