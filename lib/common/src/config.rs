//! Configuration parameters for the collector metrics binding.

use config::{ConfigBuilder, Environment, File, FileFormat};
use getset::Getters;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use typed_builder::TypedBuilder;

/// Prefix for environment variable overrides (e.g. `GCMETRICS__TAG_CAUSE=false`).
pub const ENV_PREFIX: &str = "GCMETRICS";

/// Upper bounds (in milliseconds) of the default timer histogram buckets. Anything
/// slower than the last bound lands in the overflow bucket.
pub const DEFAULT_HISTOGRAM_BUCKETS_MS: [u64; 8] = [1, 5, 10, 50, 100, 500, 1_000, 5_000];

/// Name fragments identifying young-generation pools. Matched case-insensitively,
/// which covers `PS Eden Space`, `G1 Survivor Space` and `nursery-allocate` alike.
pub const DEFAULT_YOUNG_POOL_PATTERNS: [&str; 3] = ["Eden Space", "Survivor Space", "Nursery"];

/// Heap pools that belong to collectors with a single logical generation.
pub const DEFAULT_NON_GENERATIONAL_POOLS: [&str; 2] = ["Shenandoah", "ZHeap"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GcConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Tunables for naming and classification. Defaults reproduce the pool naming
/// used by the common HotSpot and OpenJ9 collectors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters, TypedBuilder)]
#[getset(get = "pub")]
#[serde(default)]
pub struct GcMetricsConfig {
    /// Optional prefix prepended to every instrument name (`jvm` gives `jvm.gc.pause`).
    #[builder(default, setter(strip_option, into))]
    name_prefix: Option<String>,
    /// Whether pause and concurrent timers carry a `cause` tag.
    #[builder(default = true)]
    tag_cause: bool,
    #[builder(default = DEFAULT_YOUNG_POOL_PATTERNS.iter().map(|p| p.to_string()).collect())]
    young_pool_patterns: Vec<String>,
    #[builder(default = DEFAULT_NON_GENERATIONAL_POOLS.iter().map(|p| p.to_string()).collect())]
    non_generational_pools: Vec<String>,
    #[builder(default = DEFAULT_HISTOGRAM_BUCKETS_MS.to_vec())]
    histogram_buckets_ms: Vec<u64>,
}

impl Default for GcMetricsConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl GcMetricsConfig {
    /// Loads the configuration from an optional TOML file, overlaid with
    /// `GCMETRICS__*` environment variables (a `.env` file is honoured too).
    pub fn load_from_file_and_env(file_path: &str) -> Result<Self, GcConfigError> {
        dotenv::dotenv().ok();

        let settings = ConfigBuilder::<config::builder::DefaultState>::default()
            .add_source(File::new(file_path, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| GcConfigError::Load(e.to_string()))?;

        let config = settings
            .try_deserialize::<GcMetricsConfig>()
            .map_err(|e| GcConfigError::Load(e.to_string()))?;

        config.validate()?;
        debug!(?config, path = file_path, "Loaded collector metrics configuration");

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GcConfigError> {
        if self
            .histogram_buckets_ms
            .windows(2)
            .any(|pair| pair[0] >= pair[1])
        {
            return Err(GcConfigError::Invalid(format!(
                "histogram buckets must be strictly increasing, got {:?}",
                self.histogram_buckets_ms
            )));
        }

        if self.young_pool_patterns.iter().any(|p| p.trim().is_empty()) {
            return Err(GcConfigError::Invalid(
                "young pool patterns must not be blank".to_string(),
            ));
        }

        Ok(())
    }

    /// Resolves an instrument name against the configured prefix.
    pub fn metric_name(&self, base: &str) -> String {
        match self.name_prefix.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, base),
            _ => base.to_string(),
        }
    }
}
