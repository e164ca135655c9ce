//! Config command handlers

use anyhow::{bail, Context, Result};

use chatsync_core::Config;

use crate::output::{Output, OutputFormat};

/// Keys accepted by `config set`
const VALID_KEYS: &str = "data_dir, remote_url, remote_token, sync_enabled, \
    background_sync_delay_ms, history.page_size, history.max_pages, \
    retry.base_delay_ms, retry.max_delay_ms, retry.max_attempts, retry.auto_retry";

/// Show current configuration
pub fn show(output: &Output) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            // The token is a credential; only report whether one is set
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "remote_url": config.remote_url,
                    "remote_token_set": config.remote_token.is_some(),
                    "sync_enabled": config.sync_enabled,
                    "background_sync_delay_ms": config.background_sync_delay_ms,
                    "history": config.history,
                    "retry": config.retry,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:                 {}", config.data_dir.display());
            println!(
                "  remote_url:               {}",
                config.remote_url.as_deref().unwrap_or("(not set)")
            );
            println!(
                "  remote_token:             {}",
                if config.remote_token.is_some() {
                    "(set)"
                } else {
                    "(not set)"
                }
            );
            println!("  sync_enabled:             {}", config.sync_enabled);
            println!(
                "  background_sync_delay_ms: {}",
                config.background_sync_delay_ms
            );
            println!("  history.page_size:        {}", config.history.page_size);
            println!("  history.max_pages:        {}", config.history.max_pages);
            println!("  retry.base_delay_ms:      {}", config.retry.base_delay_ms);
            println!("  retry.max_delay_ms:       {}", config.retry.max_delay_ms);
            println!("  retry.max_attempts:       {}", config.retry.max_attempts);
            println!("  retry.auto_retry:         {}", config.retry.auto_retry);
            println!();
            println!("Config file: {}", Config::config_file_path().display());
        }
    }

    Ok(())
}

/// Apply `key = value` to a configuration
pub fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    let optional = |value: &str| {
        if value.is_empty() || value == "none" {
            None
        } else {
            Some(value.to_string())
        }
    };
    let invalid = || format!("Invalid value for {}: '{}'", key, value);

    match key {
        "data_dir" => config.data_dir = value.into(),
        "remote_url" => config.remote_url = optional(value),
        "remote_token" => config.remote_token = optional(value),
        "sync_enabled" => {
            config.sync_enabled = value
                .parse()
                .context("Invalid value for sync_enabled. Use 'true' or 'false'.")?;
        }
        "background_sync_delay_ms" => {
            config.background_sync_delay_ms = value.parse().with_context(invalid)?;
        }
        "history.page_size" => {
            let size: usize = value.parse().with_context(invalid)?;
            if size == 0 {
                bail!("history.page_size must be at least 1");
            }
            config.history.page_size = size;
        }
        "history.max_pages" => config.history.max_pages = value.parse().with_context(invalid)?,
        "retry.base_delay_ms" => config.retry.base_delay_ms = value.parse().with_context(invalid)?,
        "retry.max_delay_ms" => config.retry.max_delay_ms = value.parse().with_context(invalid)?,
        "retry.max_attempts" => config.retry.max_attempts = value.parse().with_context(invalid)?,
        "retry.auto_retry" => config.retry.auto_retry = value.parse().with_context(invalid)?,
        _ => {
            bail!(
                "Unknown configuration key: '{}'\nValid keys: {}",
                key,
                VALID_KEYS
            );
        }
    }
    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, output: &Output) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    apply(&mut config, &key, &value)?;
    config.save().context("Failed to save configuration")?;

    let shown = if key == "remote_token" { "***" } else { value.as_str() };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_known_keys() {
        let mut config = Config::default();

        apply(&mut config, "remote_url", "https://api.example.com").unwrap();
        apply(&mut config, "sync_enabled", "true").unwrap();
        apply(&mut config, "history.page_size", "25").unwrap();
        apply(&mut config, "retry.auto_retry", "true").unwrap();

        assert_eq!(config.remote_url.as_deref(), Some("https://api.example.com"));
        assert!(config.remote_enabled());
        assert_eq!(config.history.page_size, 25);
        assert!(config.retry.auto_retry);

        apply(&mut config, "remote_url", "none").unwrap();
        assert!(config.remote_url.is_none());
    }

    #[test]
    fn test_apply_rejects_bad_input() {
        let mut config = Config::default();
        assert!(apply(&mut config, "colour", "blue").is_err());
        assert!(apply(&mut config, "sync_enabled", "maybe").is_err());
        assert!(apply(&mut config, "history.page_size", "0").is_err());
        assert!(apply(&mut config, "retry.max_attempts", "-1").is_err());
    }
}
