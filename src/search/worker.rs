//! Per-pair evaluation
//!
//! Evaluating a (start, trajectory) pair is a pure function of the pair, the
//! field, the target constant and the feature flags. Workers share nothing
//! mutable; the orchestrator merges their outcomes.
//!
//! # Algorithm
//!
//! 1. Build the trajectory matrix. The limit is computed in direct mode, or
//!    in oracle mode when enabled. Failing either discards the pair.
//! 2. Eigenvalues and gcd slope are optional; their failures are recorded.
//! 3. Direct mode takes delta and initial values from the engine's limit.
//! 4. Oracle mode walks the matrix, inverts it exactly, and sends the
//!    constant followed by the normalized first column of the inverse
//!    transpose to the oracle. The returned closed form is evaluated exactly
//!    and scored by `delta = -1 - ln|estimate - c| / ln(denominator)`.

use std::f64::consts::LN_2;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};

use super::data_manager::{FailureStage, SearchData, SearchVector};
use crate::config::{FeatureFlags, SearchConfig};
use crate::constants::Constant;
use crate::engine::{EngineError, IdentificationOracle, MatrixField, TrajectoryMatrix, WalkSpec};

/// What became of one pair.
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    /// The pair was scored (possibly with partial failures).
    Scored(SearchData),
    /// The pair cannot be scored and is left out of the results.
    Discarded { vector: SearchVector, reason: String },
}

/// Everything a worker needs to evaluate pairs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PairEvaluator {
    field: Arc<dyn MatrixField>,
    constant: Constant,
    oracle: Option<Arc<dyn IdentificationOracle>>,
    use_oracle: bool,
    limit_walk: WalkSpec,
    identification_walk: WalkSpec,
    features: FeatureFlags,
}

impl PairEvaluator {
    pub fn new(
        field: Arc<dyn MatrixField>,
        constant: Constant,
        oracle: Option<Arc<dyn IdentificationOracle>>,
        config: &SearchConfig,
        features: FeatureFlags,
    ) -> Self {
        Self {
            field,
            constant,
            oracle,
            use_oracle: config.use_oracle,
            limit_walk: WalkSpec::new(config.limit_iterations),
            identification_walk: WalkSpec::new(config.walk_steps),
            features,
        }
    }

    /// Evaluate, giving up after `timeout` if one is set.
    ///
    /// A timed-out evaluation keeps running on its detached thread until the
    /// engine returns; its result is dropped.
    pub fn run(&self, vector: &SearchVector, timeout: Option<Duration>) -> PairOutcome {
        match timeout {
            None => self.evaluate(vector),
            Some(limit) => self.evaluate_with_timeout(vector, limit),
        }
    }

    pub fn evaluate_with_timeout(&self, vector: &SearchVector, timeout: Duration) -> PairOutcome {
        let (tx, rx) = mpsc::channel();
        let evaluator = self.clone();
        let pair = vector.clone();
        thread::spawn(move || {
            // The receiver is gone if we already timed out
            let _ = tx.send(evaluator.evaluate(&pair));
        });
        match rx.recv_timeout(timeout) {
            Ok(outcome) => outcome,
            Err(_) => PairOutcome::Discarded {
                vector: vector.clone(),
                reason: EngineError::Timeout {
                    millis: timeout.as_millis() as u64,
                }
                .to_string(),
            },
        }
    }

    /// Evaluate one pair on the calling thread.
    pub fn evaluate(&self, vector: &SearchVector) -> PairOutcome {
        let discard = |reason: String| PairOutcome::Discarded {
            vector: vector.clone(),
            reason,
        };

        let matrix = match self.field.trajectory_matrix(&vector.trajectory, &vector.start) {
            Ok(m) => m,
            Err(e) => return discard(format!("trajectory matrix: {}", e)),
        };
        let mut data = SearchData::new(vector.clone());

        // Step 1: limit
        let limit = if !self.use_oracle || self.features.limit {
            let result = matrix
                .limit(&self.limit_walk)
                .and_then(|l| l.as_f64().map(|v| (l, v)));
            match result {
                Ok((l, value)) => {
                    data.limit = Some(value);
                    Some(l)
                }
                Err(e) => return discard(format!("limit: {}", e)),
            }
        } else {
            None
        };

        // Step 2: optional statistics
        if self.features.eigenvalues {
            match matrix.eigenvalues() {
                Ok(ev) => data.eigenvalues = ev,
                Err(e) => data.record_error(FailureStage::Eigenvalues, e),
            }
        }
        if self.features.gcd_slope {
            match matrix.gcd_slope() {
                Ok(slope) => data.gcd_slope = Some(slope),
                Err(e) => data.record_error(FailureStage::GcdSlope, e),
            }
        }

        // Step 3: direct identification
        if !self.use_oracle {
            if let Some(limit) = limit {
                match limit.delta(&self.constant) {
                    Ok(d) => data.delta = Some(d),
                    Err(e) => data.record_error(FailureStage::Delta, e),
                }
                match limit.identify(&self.constant) {
                    Ok(iv) => data.initial_values = iv,
                    Err(e) => data.record_error(FailureStage::InitialValues, e),
                }
            }
            return PairOutcome::Scored(data);
        }

        // Step 4: oracle identification
        self.identify_with_oracle(matrix.as_ref(), &mut data);
        PairOutcome::Scored(data)
    }

    fn identify_with_oracle(&self, matrix: &dyn TrajectoryMatrix, data: &mut SearchData) {
        let fail_both = |data: &mut SearchData, msg: String| {
            data.record_error(FailureStage::Delta, &msg);
            data.record_error(FailureStage::InitialValues, &msg);
        };

        let oracle = match &self.oracle {
            Some(o) => o,
            None => return fail_both(data, "no identification oracle configured".to_string()),
        };
        let values = match identification_values(matrix, &self.identification_walk) {
            Ok(v) => v,
            Err(msg) => return fail_both(data, msg),
        };

        let constant = self.constant.as_rational();
        let query: Vec<BigRational> = std::iter::once(constant.clone())
            .chain(values.iter().cloned())
            .collect();
        let form = match oracle.identify(&query) {
            Ok(Some(form)) => form,
            Ok(None) => return fail_both(data, "could not identify".to_string()),
            Err(e) => return fail_both(data, e.to_string()),
        };
        data.oracle_identified = true;

        match form.evaluate(&values) {
            Some(estimate) => match delta_of_estimate(&estimate, &constant) {
                Ok(d) => data.delta = Some(d),
                Err(msg) => data.record_error(FailureStage::Delta, msg),
            },
            None => data.record_error(
                FailureStage::Delta,
                format!("closed form '{}' does not evaluate", form.expression),
            ),
        }
        match form.as_matrix() {
            Ok(m) => data.initial_values = Some(m),
            Err(e) => data.record_error(FailureStage::InitialValues, e),
        }
    }
}

/// Normalized tail of the first column of the walked matrix's inverse
/// transpose.
pub fn identification_values(matrix: &dyn TrajectoryMatrix, walk: &WalkSpec) -> Result<Vec<BigRational>, String> {
    let walked = matrix.walk(walk).map_err(|e| format!("walk: {}", e))?;
    let inverse_t = walked.inverse().map_err(|e| e.to_string())?.transpose();
    let head = inverse_t
        .get(0, 0)
        .filter(|h| !h.is_zero())
        .ok_or_else(|| "walked inverse has a zero head entry".to_string())?
        .clone();
    Ok((1..inverse_t.nrows())
        .filter_map(|i| inverse_t.get(i, 0))
        .map(|v| v / &head)
        .collect())
}

/// `-1 - ln|estimate - constant| / ln(denominator(estimate))`
///
/// An exact match scores `+inf`. An integral estimate has no meaningful
/// denominator and is an error.
pub fn delta_of_estimate(estimate: &BigRational, constant: &BigRational) -> Result<f64, String> {
    let denom = estimate.denom();
    if denom.is_one() {
        return Err(format!("estimate {} has denominator 1", estimate));
    }
    let error = (estimate - constant).abs();
    if error.is_zero() {
        return Ok(f64::INFINITY);
    }
    let ln_error = ln_big(error.numer()) - ln_big(error.denom());
    Ok(-1.0 - ln_error / ln_big(denom))
}

/// Natural log of a positive big integer without overflowing `f64`.
fn ln_big(x: &BigInt) -> f64 {
    if let Some(v) = x.to_f64().filter(|v| v.is_finite() && *v > 0.0) {
        return v.ln();
    }
    let shift = x.bits().saturating_sub(64);
    let top = (x >> shift).to_f64().unwrap_or(f64::NAN);
    top.ln() + shift as f64 * LN_2
}
