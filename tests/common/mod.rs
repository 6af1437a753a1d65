//! Deterministic algebra engine and oracle doubles shared by the
//! integration tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cmf_search::constants::Constant;
use cmf_search::engine::{
    ClosedForm, EngineError, EngineResult, IdentificationOracle, LimitResult, MatrixField, RationalMatrix,
    TrajectoryMatrix, WalkSpec,
};
use cmf_search::geometry::{AffineForm, Position};
use num_bigint::BigInt;
use num_rational::BigRational;

/// A field whose singular loci are fixed affine forms.
///
/// Trajectory matrices behave as follows for a direction `d`:
/// - the limit diverges when `d[0] < 0`
/// - `delta = 1 - 1 / ‖d‖₁`, so longer directions score higher
/// - the limit is identified when `‖d‖₁` is even
/// - eigenvalues are always `{"1": dim}`
#[derive(Debug, Clone)]
pub struct MockField {
    pub dim: usize,
    pub loci: Vec<AffineForm>,
    pub delay: Option<Duration>,
}

#[allow(dead_code)]
impl MockField {
    pub fn new(dim: usize, loci: Vec<AffineForm>) -> Self {
        Self { dim, loci, delay: None }
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl MatrixField for MockField {
    fn axes(&self) -> Vec<String> {
        (0..self.dim).map(|i| format!("x{}", i)).collect()
    }

    fn zero_determinant_loci(&self, axis: usize) -> EngineResult<Vec<AffineForm>> {
        // Report every locus once, through the first axis
        if axis == 0 {
            Ok(self.loci.clone())
        } else {
            Ok(Vec::new())
        }
    }

    fn pole_loci(&self, _axis: usize) -> EngineResult<Vec<AffineForm>> {
        Ok(Vec::new())
    }

    fn trajectory_matrix(&self, direction: &Position, _start: &Position) -> EngineResult<Box<dyn TrajectoryMatrix>> {
        let d: Vec<i64> = direction.as_f64().iter().map(|x| x.round() as i64).collect();
        Ok(Box::new(MockMatrix {
            direction: d,
            delay: self.delay,
        }))
    }
}

pub struct MockMatrix {
    direction: Vec<i64>,
    delay: Option<Duration>,
}

impl TrajectoryMatrix for MockMatrix {
    fn limit(&self, _walk: &WalkSpec) -> EngineResult<Box<dyn LimitResult>> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if self.direction.first().map_or(false, |&x| x < 0) {
            return Err(EngineError::Diverged("negative leading coordinate".into()));
        }
        let l1: i64 = self.direction.iter().map(|x| x.abs()).sum();
        Ok(Box::new(MockLimit { l1 }))
    }

    fn eigenvalues(&self) -> EngineResult<BTreeMap<String, usize>> {
        let mut ev = BTreeMap::new();
        ev.insert("1".to_string(), self.direction.len());
        Ok(ev)
    }

    fn gcd_slope(&self) -> EngineResult<f64> {
        Ok(self.direction.iter().map(|x| x.abs()).sum::<i64>() as f64)
    }

    fn walk(&self, _walk: &WalkSpec) -> EngineResult<RationalMatrix> {
        let a = self.direction.first().copied().unwrap_or(0);
        RationalMatrix::from_ints(&[vec![1, a], vec![0, 1]]).map_err(|e| EngineError::Other(e.to_string()))
    }
}

struct MockLimit {
    l1: i64,
}

impl LimitResult for MockLimit {
    fn as_f64(&self) -> EngineResult<f64> {
        Ok(self.l1 as f64)
    }

    fn delta(&self, _constant: &Constant) -> EngineResult<f64> {
        Ok(1.0 - 1.0 / self.l1.max(1) as f64)
    }

    fn identify(&self, _constant: &Constant) -> EngineResult<Option<RationalMatrix>> {
        if self.l1 % 2 == 0 {
            Ok(Some(RationalMatrix::identity(2)))
        } else {
            Ok(None)
        }
    }
}

/// Oracle answering every query with the constant closed form `1/2`.
#[derive(Debug)]
pub struct HalfOracle;

impl IdentificationOracle for HalfOracle {
    fn identify(&self, values: &[BigRational]) -> EngineResult<Option<ClosedForm>> {
        let k = values.len();
        let int = |n: i64| BigRational::from_integer(BigInt::from(n));
        let mut numerator = vec![int(1)];
        let mut denominator = vec![int(2)];
        numerator.resize(k, int(0));
        denominator.resize(k, int(0));
        Ok(Some(ClosedForm {
            expression: "1/2".to_string(),
            numerator,
            denominator,
        }))
    }
}

/// `x0 = 1/2` splitting the plane into two half planes.
#[allow(dead_code)]
pub fn half_plane() -> Arc<dyn MatrixField> {
    Arc::new(MockField::new(2, vec![AffineForm::from_ints(&[2, 0], -1)]))
}

/// Lines `x0 = 1/3`, `x1 = 1/3` and `x0 + x1 = 3/4`: seven cells.
#[allow(dead_code)]
pub fn triangle() -> Arc<dyn MatrixField> {
    Arc::new(MockField::new(
        2,
        vec![
            AffineForm::from_ints(&[3, 0], -1),
            AffineForm::from_ints(&[0, 3], -1),
            AffineForm::from_ints(&[4, 4], -3),
        ],
    ))
}

#[allow(dead_code)]
pub fn half() -> Constant {
    Constant::new("half", "0.5").expect("valid decimal")
}
