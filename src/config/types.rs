use serde::Deserialize;

/// Main configuration structure for Sumi-Engine
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub frontier: FrontierConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default, rename = "seed")]
    pub seeds: Vec<SeedEntry>,
}

/// Crawl controller and worker pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of workers in the pool
    #[serde(rename = "max-workers")]
    pub max_workers: usize,

    /// Enter PAUSED instead of RUNNING when the crawl starts
    #[serde(rename = "pause-at-start")]
    pub pause_at_start: bool,

    /// Pause instead of stopping when the frontier runs out of work
    #[serde(rename = "pause-at-finish")]
    pub pause_at_finish: bool,

    /// Stay in EMPTY instead of stopping when the frontier runs out of work
    #[serde(rename = "run-while-empty")]
    pub run_while_empty: bool,

    /// Upper bound for reaching PAUSED before a checkpoint (seconds)
    #[serde(rename = "pause-timeout-secs")]
    pub pause_timeout_secs: u64,

    /// Number of emergency memory blocks held in reserve
    #[serde(rename = "reserve-blocks")]
    pub reserve_blocks: usize,

    /// Size of each emergency memory block (bytes)
    #[serde(rename = "reserve-block-bytes")]
    pub reserve_block_bytes: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_workers: 25,
            pause_at_start: false,
            pause_at_finish: false,
            run_while_empty: false,
            pause_timeout_secs: 300,
            reserve_blocks: 1,
            reserve_block_bytes: 6 * 1024 * 1024,
        }
    }
}

/// Frontier scheduling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrontierConfig {
    /// Minimum delay between two fetches from one group (milliseconds)
    #[serde(rename = "min-delay-ms")]
    pub min_delay_ms: u64,

    /// Maximum delay between two fetches from one group (milliseconds)
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,

    /// Multiple of the last fetch duration to wait before the next fetch
    #[serde(rename = "delay-factor")]
    pub delay_factor: f64,

    /// Delay before retrying a URI after a connection failure (seconds)
    #[serde(rename = "retry-delay-secs")]
    pub retry_delay_secs: u64,

    /// Maximum number of attempts for a retryable URI
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Path of the SQLite queue store; in-memory queues when absent
    #[serde(rename = "queue-store")]
    pub queue_store: Option<String>,
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 3000,
            max_delay_ms: 30_000,
            delay_factor: 5.0,
            retry_delay_secs: 900,
            max_retries: 30,
            queue_store: None,
        }
    }
}

/// Checkpoint configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory holding one subdirectory per checkpoint
    #[serde(rename = "checkpoints-dir")]
    pub checkpoints_dir: String,

    /// Interval between automatic checkpoints (minutes); 0 disables them
    #[serde(rename = "interval-minutes")]
    pub interval_minutes: u64,

    /// Delete the previous checkpoint after each successful one
    #[serde(rename = "forget-all-but-latest")]
    pub forget_all_but_latest: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            checkpoints_dir: "./checkpoints".to_string(),
            interval_minutes: 0,
            forget_all_but_latest: false,
        }
    }
}

/// Seed URI entry
#[derive(Debug, Clone, Deserialize)]
pub struct SeedEntry {
    /// The seed URI
    pub url: String,
}
