//! Configuration module for Sumi-Engine
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section is optional and falls back to its defaults.
//!
//! # Example
//!
//! ```no_run
//! use sumi_engine::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("engine.toml")).unwrap();
//! println!("Crawl will use {} workers", config.controller.max_workers);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{CheckpointConfig, Config, ControllerConfig, FrontierConfig, SeedEntry};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
