use crate::core::error::ClearingError;
use crate::core::numeric::DEFAULT_EPSILON;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a default floor carried over from the previous macro iteration is
/// applied to the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CarryPolicy {
    /// Carried nodes start at their floor ratio and can never pay more
    /// than it during this iteration.
    #[default]
    CarryRatio,
    /// Carried nodes stay in the defaulting set, but their ratio is
    /// re-evaluated from a full-payment assumption.
    CarryStatus,
    /// The floor is ignored; every node starts solvent.
    Reevaluate,
}

impl CarryPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CarryRatio => "carry-ratio",
            Self::CarryStatus => "carry-status",
            Self::Reevaluate => "reevaluate",
        }
    }
}

impl fmt::Display for CarryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CarryPolicy {
    type Err = ClearingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "carry-ratio" => Ok(Self::CarryRatio),
            "carry-status" => Ok(Self::CarryStatus),
            "reevaluate" => Ok(Self::Reevaluate),
            other => Err(ClearingError::InvalidConfig(format!(
                "unknown carry policy '{other}'"
            ))),
        }
    }
}

/// Scenario parameters for one clearing engine.
///
/// Passed explicitly at construction; the engine keeps no process-wide
/// state.
///
/// # Examples
///
/// ```
/// use cascade_clearing::core::config::{CarryPolicy, ClearingConfig};
///
/// let config = ClearingConfig::default()
///     .with_epsilon(1e-6)
///     .with_max_rounds(500)
///     .with_carry_policy(CarryPolicy::Reevaluate);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClearingConfig {
    /// Threshold below full payment at which a node counts as defaulted.
    /// Also the relative tolerance for obligation/edge-sum consistency.
    pub epsilon: f64,
    /// Round cap; exceeding it is a non-convergence error.
    pub max_rounds: u32,
    /// Largest per-round ratio change accepted as "no drift" once the
    /// defaulting set is stable.
    pub ratio_tolerance: f64,
    pub carry_policy: CarryPolicy,
    /// 0 uses the global rayon pool, 1 runs rounds sequentially, n > 1
    /// builds a dedicated pool of n workers.
    pub worker_threads: usize,
    /// Networks smaller than this are cleared sequentially.
    pub parallel_threshold: usize,
}

impl Default for ClearingConfig {
    fn default() -> Self {
        Self {
            epsilon: DEFAULT_EPSILON,
            max_rounds: 10_000,
            ratio_tolerance: 1e-12,
            carry_policy: CarryPolicy::default(),
            worker_threads: 0,
            parallel_threshold: 4_096,
        }
    }
}

impl ClearingConfig {
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_ratio_tolerance(mut self, tolerance: f64) -> Self {
        self.ratio_tolerance = tolerance;
        self
    }

    pub fn with_carry_policy(mut self, policy: CarryPolicy) -> Self {
        self.carry_policy = policy;
        self
    }

    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Reject parameter combinations the engine cannot honour.
    pub fn validate(&self) -> Result<(), ClearingError> {
        if !(self.epsilon.is_finite() && self.epsilon >= 0.0 && self.epsilon < 1.0) {
            return Err(ClearingError::InvalidConfig(format!(
                "epsilon must be in [0, 1), got {}",
                self.epsilon
            )));
        }
        if !(self.ratio_tolerance.is_finite() && self.ratio_tolerance >= 0.0) {
            return Err(ClearingError::InvalidConfig(format!(
                "ratio tolerance must be finite and non-negative, got {}",
                self.ratio_tolerance
            )));
        }
        if self.max_rounds == 0 {
            return Err(ClearingError::InvalidConfig(
                "max_rounds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
