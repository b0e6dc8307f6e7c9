//! Simulation parameters as consumed by the surrounding tools.

use serde::Deserialize;
use thiserror::Error;

use crate::Clock;

/// A parameter failed validation at construction time.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A count or width parameter that must be at least one was zero.
    #[error("{0} must be at least 1")]
    MustBePositive(&'static str),
    /// The address array is shorter than the transaction templates require.
    #[error("transaction templates need {required} addresses but only {available} were provided")]
    NotEnoughAddresses {
        /// Addresses the templates will consume.
        required: usize,
        /// Addresses actually supplied.
        available: usize,
    },
}

fn one() -> usize {
    1
}

/// Recognized options for one batch of simulation runs.
///
/// This is the programmatic face of the tool configuration: external
/// drivers deserialize it (unknown keys are ignored), validate it once, and
/// then derive sources, schedulers, and set factories from it. The fields
/// the core consumes directly are the scheduler and set parameters; the
/// generation-side fields (`mem_size`, `n`, `zipf_param`, `repeats`) are
/// carried for the external transaction generator.
#[derive(Clone, Debug, Deserialize)]
pub struct SimConfig {
    /// Cardinality of the address pool.
    pub mem_size: usize,
    /// Total number of transactions per run.
    pub n: usize,
    /// Maximum `|pending|`; `None` means unbounded.
    #[serde(default)]
    pub pool_size: Option<usize>,
    /// Maximum `|scheduled|`; `None` means unbounded.
    #[serde(default)]
    pub queue_size: Option<usize>,
    /// Number of execution cores.
    pub core_count: usize,
    /// Cycles per scheduler step.
    #[serde(default)]
    pub op_time: Clock,
    /// Zipf parameter of the address-popularity distribution; 0 is uniform.
    #[serde(default)]
    pub zipf_param: f64,
    /// Runs per configuration.
    #[serde(default = "one")]
    pub repeats: usize,
    /// Tournament scheduler: whether merge rounds are pipelined.
    #[serde(default)]
    pub is_pipelined: bool,
    /// Maximal scheduler: how many of the largest batches to keep.
    #[serde(default = "one")]
    pub n_schedules: usize,
    /// Approximate/renaming sets: bit-vector width. `None` selects the
    /// ideal variant.
    #[serde(default, alias = "size")]
    pub set_size: Option<usize>,
    /// Approximate/renaming sets: number of hash functions.
    #[serde(default = "one")]
    pub n_hash_funcs: usize,
}

impl SimConfig {
    /// Check every parameter, reporting the first illegal one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mem_size == 0 {
            return Err(ConfigError::MustBePositive("mem_size"));
        }
        if self.core_count == 0 {
            return Err(ConfigError::MustBePositive("core_count"));
        }
        if self.pool_size == Some(0) {
            return Err(ConfigError::MustBePositive("pool_size"));
        }
        if self.queue_size == Some(0) {
            return Err(ConfigError::MustBePositive("queue_size"));
        }
        if self.n_schedules == 0 {
            return Err(ConfigError::MustBePositive("n_schedules"));
        }
        if self.set_size == Some(0) {
            return Err(ConfigError::MustBePositive("size"));
        }
        if self.n_hash_funcs == 0 {
            return Err(ConfigError::MustBePositive("n_hash_funcs"));
        }
        Ok(())
    }
}
