use crate::config::types::{
    CheckpointConfig, Config, ControllerConfig, FrontierConfig, SeedEntry,
};
use crate::uri::normalize_uri;
use crate::{ConfigError, ConfigResult};

/// Validates the entire configuration
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_controller_config(&config.controller)?;
    validate_frontier_config(&config.frontier)?;
    validate_checkpoint_config(&config.checkpoint)?;
    validate_seeds(&config.seeds)?;
    Ok(())
}

/// Validates controller configuration
fn validate_controller_config(config: &ControllerConfig) -> ConfigResult<()> {
    if config.max_workers < 1 || config.max_workers > 1000 {
        return Err(ConfigError::Validation(format!(
            "max_workers must be between 1 and 1000, got {}",
            config.max_workers
        )));
    }

    if config.pause_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "pause_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.reserve_blocks > 0 && config.reserve_block_bytes == 0 {
        return Err(ConfigError::Validation(
            "reserve_block_bytes must be > 0 when reserve_blocks is set".to_string(),
        ));
    }

    Ok(())
}

/// Validates frontier configuration
fn validate_frontier_config(config: &FrontierConfig) -> ConfigResult<()> {
    if config.min_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "min_delay_ms ({}) cannot exceed max_delay_ms ({})",
            config.min_delay_ms, config.max_delay_ms
        )));
    }

    if !config.delay_factor.is_finite() || config.delay_factor < 0.0 {
        return Err(ConfigError::Validation(format!(
            "delay_factor must be a non-negative number, got {}",
            config.delay_factor
        )));
    }

    if let Some(path) = &config.queue_store {
        if path.is_empty() {
            return Err(ConfigError::Validation(
                "queue_store cannot be empty when set".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates checkpoint configuration
fn validate_checkpoint_config(config: &CheckpointConfig) -> ConfigResult<()> {
    if config.checkpoints_dir.is_empty() {
        return Err(ConfigError::Validation(
            "checkpoints_dir cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates seed entries
fn validate_seeds(seeds: &[SeedEntry]) -> ConfigResult<()> {
    for seed in seeds {
        normalize_uri(&seed.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed.url, e))
        })?;
    }
    Ok(())
}
