//! Configuration System
//!
//! Hierarchical configuration loading from:
//! - abduce.toml (default configuration)
//! - Environment variables (ABDUCE_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # abduce.toml
//! [kb]
//! max_distance = 9.0
//! threads = 4
//! stop_words = ["be/2"]
//!
//! [inference]
//! lhs = "bfs"
//! sol = "exhaustive"
//! max_depth = 3
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! ABDUCE_KB__MAX_DISTANCE=12
//! ABDUCE_INFERENCE__LHS=astar
//! ```

use crate::kb::CompileConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Main configuration struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub kb: CompileConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Inference defaults; CLI `-c`/`-p` settings override these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_lhs")]
    pub lhs: String,
    #[serde(default = "default_ilp")]
    pub ilp: String,
    #[serde(default = "default_sol")]
    pub sol: String,
    #[serde(default = "default_dist")]
    pub dist: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: i32,
    #[serde(default = "default_true")]
    pub economize: bool,
    #[serde(default = "default_true")]
    pub keep_validity_on_timeout: bool,
}

impl Default for InferenceConfig {
    fn default() -> InferenceConfig {
        InferenceConfig {
            lhs: default_lhs(),
            ilp: default_ilp(),
            sol: default_sol(),
            dist: default_dist(),
            max_depth: default_max_depth(),
            economize: true,
            keep_validity_on_timeout: true,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> LoggingConfig {
        LoggingConfig {
            level: default_level(),
        }
    }
}

fn default_lhs() -> String {
    "bfs".to_string()
}

fn default_ilp() -> String {
    "uniform".to_string()
}

fn default_sol() -> String {
    "exhaustive".to_string()
}

fn default_dist() -> String {
    "basic".to_string()
}

fn default_max_depth() -> i32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load `abduce.toml` (when present) with `ABDUCE_*` overrides.
    pub fn load() -> Result<Config, figment::Error> {
        Figment::new()
            .merge(Toml::file("abduce.toml"))
            .merge(Env::prefixed("ABDUCE_").split("__"))
            .extract()
    }
}
