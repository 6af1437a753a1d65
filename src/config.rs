//! Configuration for extraction, search and analysis.
//!
//! Every component takes its section by value in its constructor; nothing is
//! read from process-wide state. Defaults follow the values the search was
//! tuned with.
//!
//! ```
//! use cmf_search::config::Config;
//!
//! let config = Config::from_json_str(r#"{ "search": { "parallel": true } }"#).unwrap();
//! assert!(config.search.parallel);
//! assert_eq!(config.extractor.max_expansions, 3);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SearchError, SearchResult};

/// Geometric shape used to generate lattice point sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    /// Integer grid in `[-length, length]^dim`.
    Cube,
    /// Cube points with Euclidean norm `<= length`.
    Sphere,
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shape::Cube => write!(f, "cube"),
            Shape::Sphere => write!(f, "sphere"),
        }
    }
}

/// Shard extractor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Hyperplane values with `|value| < tolerance` count as on-plane.
    pub tolerance: f64,
    /// Half edge of the initial start-point box, `(2k+1)^dim` points.
    pub initial_radius: i64,
    /// Number of unit shells to expand beyond the initial box.
    pub max_expansions: usize,
    /// Upper bound on intermediate constraints during cell feasibility
    /// checks; a check exceeding it is treated as feasible.
    pub max_feasibility_constraints: usize,
    /// A hyperplane crossing at `t >= -graze_tolerance` rejects a direction.
    pub graze_tolerance: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            initial_radius: 1,
            max_expansions: 3,
            max_feasibility_constraints: 4096,
            graze_tolerance: 1e-4,
        }
    }
}

/// Optional sub-computations of a pair evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    /// Compute the numeric limit in oracle mode (always computed otherwise).
    pub limit: bool,
    /// Compute trajectory matrix eigenvalues.
    pub eigenvalues: bool,
    /// Compute the gcd slope.
    pub gcd_slope: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            limit: true,
            eigenvalues: true,
            gcd_slope: true,
        }
    }
}

impl FeatureFlags {
    /// Flags for shallow analysis: nothing beyond what scoring needs.
    pub fn shallow() -> Self {
        Self {
            limit: false,
            eigenvalues: false,
            gcd_slope: false,
        }
    }
}

/// Search orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Delegate identification to the external oracle instead of the engine.
    pub use_oracle: bool,
    /// Dispatch pair evaluations (and trajectory filtering) to the worker pool.
    pub parallel: bool,
    /// Pairs per worker chunk.
    pub chunk_size: usize,
    /// Directions per chunk when filtering trajectories in parallel.
    pub validation_chunk: usize,
    /// Default fraction of generated trajectories searched per start.
    pub partial_search_factor: f64,
    /// Iterations used for the numeric limit.
    pub limit_iterations: usize,
    /// Steps walked before inverting for oracle identification values.
    pub walk_steps: usize,
    /// Seed for trajectory sampling; `None` draws from OS entropy.
    pub sampling_seed: Option<u64>,
    /// Abandon a pair evaluation after this many milliseconds.
    pub pair_timeout_ms: Option<u64>,
    /// Optional sub-computations.
    pub features: FeatureFlags,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            use_oracle: false,
            parallel: false,
            chunk_size: 8,
            validation_chunk: 15,
            partial_search_factor: 1.0,
            limit_iterations: 2000,
            walk_steps: 100,
            sampling_seed: Some(42),
            pair_timeout_ms: None,
            features: FeatureFlags::default(),
        }
    }
}

/// Shallow analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Keep a shard only if its identified fraction exceeds this value.
    pub identification_threshold: f64,
    /// Number of delta buckets over `[-1, 1]` (at least 3).
    pub ranks: usize,
    /// Desired trajectory count is `trajectory_base ^ dim`.
    pub trajectory_base: u64,
    /// Shape of the trajectory set.
    pub shape: Shape,
    /// Fraction of trajectories searched per shard.
    pub partial_search_factor: f64,
    /// Delegate identification to the oracle during analysis.
    pub use_oracle: bool,
    /// Log a summary for every analyzed space.
    pub log_every_space: bool,
    /// Warn for every shard skipped for lack of a start point.
    pub warn_on_empty_shards: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            identification_threshold: -1.0,
            ranks: 3,
            trajectory_base: 10,
            shape: Shape::Sphere,
            partial_search_factor: 0.3,
            use_oracle: true,
            log_every_space: true,
            warn_on_empty_shards: false,
        }
    }
}

impl AnalysisConfig {
    /// Number of trajectories to analyze in a space of dimension `dim`.
    pub fn trajectories_for_dim(&self, dim: usize) -> u64 {
        self.trajectory_base.saturating_pow(dim as u32)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub extractor: ExtractorConfig,
    pub search: SearchConfig,
    pub analysis: AnalysisConfig,
    /// Constant names to run when the caller supplies none.
    pub constants: Vec<String>,
}

impl Config {
    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json_str(src: &str) -> SearchResult<Self> {
        let config: Config = serde_json::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SearchResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Reject values outside their meaningful ranges.
    pub fn validate(&self) -> SearchResult<()> {
        let ex = &self.extractor;
        if !(ex.tolerance >= 0.0 && ex.tolerance.is_finite()) {
            return Err(SearchError::InvalidConfig(format!(
                "extractor.tolerance must be finite and >= 0, got {}",
                ex.tolerance
            )));
        }
        if !(ex.graze_tolerance >= 0.0 && ex.graze_tolerance.is_finite()) {
            return Err(SearchError::InvalidConfig(format!(
                "extractor.graze_tolerance must be finite and >= 0, got {}",
                ex.graze_tolerance
            )));
        }
        if ex.initial_radius < 0 {
            return Err(SearchError::InvalidConfig(format!(
                "extractor.initial_radius must be >= 0, got {}",
                ex.initial_radius
            )));
        }

        let s = &self.search;
        check_fraction("search.partial_search_factor", s.partial_search_factor)?;
        if s.chunk_size == 0 || s.validation_chunk == 0 {
            return Err(SearchError::InvalidConfig(
                "search chunk sizes must be positive".to_string(),
            ));
        }
        if s.limit_iterations == 0 || s.walk_steps == 0 {
            return Err(SearchError::InvalidConfig(
                "search.limit_iterations and search.walk_steps must be positive".to_string(),
            ));
        }

        let a = &self.analysis;
        check_fraction("analysis.partial_search_factor", a.partial_search_factor)?;
        if a.trajectory_base < 2 {
            return Err(SearchError::InvalidConfig(format!(
                "analysis.trajectory_base must be >= 2, got {}",
                a.trajectory_base
            )));
        }
        Ok(())
    }
}

fn check_fraction(name: &str, value: f64) -> SearchResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SearchError::InvalidConfig(format!(
            "{} must be in [0, 1], got {}",
            name, value
        )))
    }
}
