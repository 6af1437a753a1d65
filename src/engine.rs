//! Interface to the external algebra engine.
//!
//! The search never evaluates matrix fields itself. Everything it needs from
//! the engine (singular loci, trajectory matrices, limits, eigenvalues and
//! identification) goes through the object-safe traits in this module, so an
//! engine binding or a test double can be plugged in behind an `Arc`.
//!
//! Exact rational matrices ([`RationalMatrix`]) are the only engine data the
//! crate manipulates directly: walked matrices are inverted here for oracle
//! identification, and identified initial values are stored as 2×k matrices.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::constants::Constant;
use crate::error::{SearchError, SearchResult};
use crate::geometry::{AffineForm, Position};

/// Result type for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures reported by the algebra engine or identification oracle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Computation diverged: {0}")]
    Diverged(String),

    #[error("Numeric failure: {0}")]
    Numeric(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Timed out after {millis} ms")]
    Timeout { millis: u64 },

    #[error("{0}")]
    Other(String),
}

/// How a trajectory matrix is walked: `iterations` steps with the walk
/// variable starting at `initial` and advancing by `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkSpec {
    pub iterations: usize,
    pub step: i64,
    pub initial: i64,
}

impl WalkSpec {
    /// Unit-step walk from zero.
    pub fn new(iterations: usize) -> Self {
        Self {
            iterations,
            step: 1,
            initial: 0,
        }
    }
}

/// A matrix field indexed by integer lattice points.
///
/// Only the singular structure and trajectory matrices are consumed; the
/// field's symbolic content stays inside the engine.
pub trait MatrixField: Send + Sync + fmt::Debug {
    /// Names of the lattice axes, one per dimension.
    fn axes(&self) -> Vec<String>;

    fn dim(&self) -> usize {
        self.axes().len()
    }

    /// Loci where the determinant of the generator matrix for `axis` vanishes.
    fn zero_determinant_loci(&self, axis: usize) -> EngineResult<Vec<AffineForm>>;

    /// Loci where any entry of the generator matrix for `axis` has a
    /// vanishing denominator.
    fn pole_loci(&self, axis: usize) -> EngineResult<Vec<AffineForm>>;

    /// The matrix obtained by walking the field from `start` along `direction`.
    fn trajectory_matrix(
        &self,
        direction: &Position,
        start: &Position,
    ) -> EngineResult<Box<dyn TrajectoryMatrix>>;
}

/// A trajectory matrix as produced by [`MatrixField::trajectory_matrix`].
pub trait TrajectoryMatrix: Send {
    fn limit(&self, walk: &WalkSpec) -> EngineResult<Box<dyn LimitResult>>;

    /// Eigenvalues (rendered by the engine) with multiplicities.
    fn eigenvalues(&self) -> EngineResult<BTreeMap<String, usize>>;

    /// Growth rate of the gcd of the walked matrix entries.
    fn gcd_slope(&self) -> EngineResult<f64>;

    /// The product matrix after walking, with exact entries.
    fn walk(&self, walk: &WalkSpec) -> EngineResult<RationalMatrix>;
}

/// A computed limit of a trajectory matrix.
pub trait LimitResult: Send {
    fn as_f64(&self) -> EngineResult<f64>;

    /// Convergence rate of the limit towards `constant`.
    fn delta(&self, constant: &Constant) -> EngineResult<f64>;

    /// Initial values expressing the limit in terms of `constant`, if any.
    fn identify(&self, constant: &Constant) -> EngineResult<Option<RationalMatrix>>;
}

/// External closed-form identification service.
pub trait IdentificationOracle: Send + Sync + fmt::Debug {
    /// Try to find an integer relation for `values`, where `values[0]` is the
    /// target constant and the rest are identification values.
    fn identify(&self, values: &[BigRational]) -> EngineResult<Option<ClosedForm>>;
}

/// A closed form `(n·[1, v1..vk]) / (d·[1, v1..vk])` returned by the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedForm {
    /// Human readable rendering from the oracle.
    pub expression: String,
    pub numerator: Vec<BigRational>,
    pub denominator: Vec<BigRational>,
}

impl ClosedForm {
    /// Evaluate exactly at `values` (without the leading 1).
    ///
    /// Returns `None` on a length mismatch or a vanishing denominator.
    pub fn evaluate(&self, values: &[BigRational]) -> Option<BigRational> {
        let k = values.len() + 1;
        if self.numerator.len() != k || self.denominator.len() != k {
            return None;
        }
        let eval = |coeffs: &[BigRational]| -> BigRational {
            coeffs[1..]
                .iter()
                .zip(values)
                .fold(coeffs[0].clone(), |acc, (c, v)| acc + c * v)
        };
        let den = eval(&self.denominator);
        if den.is_zero() {
            return None;
        }
        Some(eval(&self.numerator) / den)
    }

    /// Numerator and denominator as a 2×k matrix.
    pub fn as_matrix(&self) -> SearchResult<RationalMatrix> {
        RationalMatrix::new(vec![self.numerator.clone(), self.denominator.clone()])
    }
}

/// Dense matrix over exact rationals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RationalMatrix {
    rows: Vec<Vec<BigRational>>,
}

impl RationalMatrix {
    /// # Errors
    ///
    /// `MalformedField` if the rows have different lengths.
    pub fn new(rows: Vec<Vec<BigRational>>) -> SearchResult<Self> {
        if let Some(first) = rows.first() {
            let cols = first.len();
            if rows.iter().any(|r| r.len() != cols) {
                return Err(SearchError::MalformedField(
                    "matrix rows have different lengths".to_string(),
                ));
            }
        }
        Ok(Self { rows })
    }

    pub fn from_ints(rows: &[Vec<i64>]) -> SearchResult<Self> {
        Self::new(
            rows.iter()
                .map(|r| {
                    r.iter()
                        .map(|&x| BigRational::from_integer(BigInt::from(x)))
                        .collect()
                })
                .collect(),
        )
    }

    pub fn identity(n: usize) -> Self {
        let rows = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| if i == j { BigRational::one() } else { BigRational::zero() })
                    .collect()
            })
            .collect();
        Self { rows }
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn ncols(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    pub fn rows(&self) -> &[Vec<BigRational>] {
        &self.rows
    }

    pub fn row(&self, i: usize) -> Option<&[BigRational]> {
        self.rows.get(i).map(Vec::as_slice)
    }

    pub fn get(&self, i: usize, j: usize) -> Option<&BigRational> {
        self.rows.get(i).and_then(|r| r.get(j))
    }

    pub fn transpose(&self) -> Self {
        let rows = (0..self.ncols())
            .map(|j| self.rows.iter().map(|r| r[j].clone()).collect())
            .collect();
        Self { rows }
    }

    /// Exact inverse by Gauss–Jordan elimination.
    ///
    /// # Errors
    ///
    /// `SingularMatrix` if the matrix is not square or not invertible.
    pub fn inverse(&self) -> SearchResult<Self> {
        let n = self.nrows();
        if n == 0 || self.ncols() != n {
            return Err(SearchError::SingularMatrix(format!(
                "cannot invert a {}x{} matrix",
                n,
                self.ncols()
            )));
        }

        // Augment [A | I]
        let mut aug: Vec<Vec<BigRational>> = self
            .rows
            .iter()
            .zip(Self::identity(n).rows)
            .map(|(r, id)| r.iter().cloned().chain(id).collect())
            .collect();

        for col in 0..n {
            let pivot = (col..n)
                .find(|&r| !aug[r][col].is_zero())
                .ok_or_else(|| SearchError::SingularMatrix(format!("no pivot in column {}", col)))?;
            aug.swap(col, pivot);

            let inv_pivot = aug[col][col].recip();
            aug[col].iter_mut().for_each(|x| *x = &*x * &inv_pivot);

            for r in 0..n {
                if r == col || aug[r][col].is_zero() {
                    continue;
                }
                let factor = aug[r][col].clone();
                for c in 0..2 * n {
                    let delta = &factor * &aug[col][c];
                    aug[r][c] -= delta;
                }
            }
        }

        let rows = aug.into_iter().map(|r| r[n..].to_vec()).collect();
        Ok(Self { rows })
    }
}

impl fmt::Display for RationalMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[")?;
            for (j, x) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", x)?;
            }
            write!(f, "]")?;
        }
        write!(f, "]")
    }
}

/// A matrix field paired with the lattice shift it is searched under.
#[derive(Debug, Clone)]
pub struct Construction {
    pub name: String,
    pub field: Arc<dyn MatrixField>,
    pub shift: Position,
}

impl Construction {
    /// # Errors
    ///
    /// `DimensionMismatch` if the shift does not match the field's dimension.
    pub fn new(
        name: impl Into<String>,
        field: Arc<dyn MatrixField>,
        shift: Position,
    ) -> SearchResult<Self> {
        let dim = field.dim();
        if shift.dim() != dim {
            return Err(SearchError::DimensionMismatch {
                expected: dim,
                actual: shift.dim(),
            });
        }
        Ok(Self {
            name: name.into(),
            field,
            shift,
        })
    }

    /// Construction with a zero shift.
    pub fn unshifted(name: impl Into<String>, field: Arc<dyn MatrixField>) -> Self {
        let shift = Position::zeros(field.dim());
        Self {
            name: name.into(),
            field,
            shift,
        }
    }

    pub fn dim(&self) -> usize {
        self.field.dim()
    }
}

impl fmt::Display for Construction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} shifted by {}", self.name, self.shift)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn ratio(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    #[test]
    fn test_inverse_exact() {
        let m = RationalMatrix::from_ints(&[vec![2, 1], vec![7, 4]]).unwrap();
        let inv = m.inverse().unwrap();
        assert_eq!(inv, RationalMatrix::from_ints(&[vec![4, -1], vec![-7, 2]]).unwrap());

        let h = RationalMatrix::from_ints(&[vec![1, 2], vec![3, 4]]).unwrap();
        let inv = h.inverse().unwrap();
        assert_eq!(inv.get(0, 0), Some(&ratio(-2, 1)));
        assert_eq!(inv.get(1, 0), Some(&ratio(3, 2)));
        assert_eq!(inv.get(1, 1), Some(&ratio(-1, 2)));
    }

    #[test]
    fn test_inverse_needs_pivoting() {
        let m = RationalMatrix::from_ints(&[vec![0, 1], vec![1, 0]]).unwrap();
        assert_eq!(m.inverse().unwrap(), m);
    }

    #[test]
    fn test_singular_rejected() {
        let m = RationalMatrix::from_ints(&[vec![1, 2], vec![2, 4]]).unwrap();
        assert!(matches!(m.inverse(), Err(SearchError::SingularMatrix(_))));
        let rect = RationalMatrix::from_ints(&[vec![1, 2, 3]]).unwrap();
        assert!(rect.inverse().is_err());
    }

    #[test]
    fn test_ragged_rows_rejected() {
        assert!(RationalMatrix::from_ints(&[vec![1, 2], vec![3]]).is_err());
    }

    #[test]
    fn test_transpose() {
        let m = RationalMatrix::from_ints(&[vec![1, 2, 3], vec![4, 5, 6]]).unwrap();
        let t = m.transpose();
        assert_eq!(t.nrows(), 3);
        assert_eq!(t.row(2).unwrap(), &[ratio(3, 1), ratio(6, 1)]);
    }

    #[test]
    fn test_closed_form_evaluate() {
        // (1 + 2*v1) / (3)
        let form = ClosedForm {
            expression: "(1 + 2*c1)/3".into(),
            numerator: vec![ratio(1, 1), ratio(2, 1)],
            denominator: vec![ratio(3, 1), ratio(0, 1)],
        };
        assert_eq!(form.evaluate(&[ratio(1, 2)]), Some(ratio(2, 3)));
        assert_eq!(form.evaluate(&[]), None);
        assert_eq!(form.as_matrix().unwrap().nrows(), 2);
    }

    #[test]
    fn test_construction_checks_shift() {
        let field: Arc<dyn MatrixField> = Arc::new(testing::PlaneField::new(2, vec![]));
        assert!(Construction::new("f", field.clone(), Position::zeros(3)).is_err());
        let c = Construction::new("f", field, Position::from_ints(&[1, 0])).unwrap();
        assert_eq!(c.dim(), 2);
        assert_eq!(c.to_string(), "f shifted by (1, 0)");
    }
}
