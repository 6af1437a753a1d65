//! Hyperplanes of the singular arrangement.
//!
//! A hyperplane is stored as an exact affine form `a·x + c` normalized to
//! primitive integer coefficients whose first non-zero entry is positive, so
//! the same locus reported twice (possibly scaled) compares equal. The float
//! normal and representative point are derived once and only used for fast
//! ray intersection tests.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use num_bigint::BigInt;
use num_integer::Integer;
use num_rational::BigRational;
use num_traits::{One, Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use super::position::Position;
use crate::error::{SearchError, SearchResult};

/// Dot products smaller than this mean the ray is parallel to the plane.
const PARALLEL_EPS: f64 = 1e-10;

/// An affine form `Σ coeffs[i]·x_i + constant` as reported by the field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffineForm {
    pub coeffs: Vec<BigRational>,
    pub constant: BigRational,
}

impl AffineForm {
    pub fn new(coeffs: Vec<BigRational>, constant: BigRational) -> Self {
        Self { coeffs, constant }
    }

    /// Integer form, convenient for tests and hand-built fields.
    pub fn from_ints(coeffs: &[i64], constant: i64) -> Self {
        Self {
            coeffs: coeffs
                .iter()
                .map(|&c| BigRational::from_integer(BigInt::from(c)))
                .collect(),
            constant: BigRational::from_integer(BigInt::from(constant)),
        }
    }

    /// The locus `x_axis = value`, i.e. the form `x_axis - value`.
    pub fn axis_equals(dim: usize, axis: usize, value: BigRational) -> Self {
        let mut coeffs = vec![BigRational::zero(); dim];
        if axis < dim {
            coeffs[axis] = BigRational::one();
        }
        Self {
            coeffs,
            constant: -value,
        }
    }

    pub fn dim(&self) -> usize {
        self.coeffs.len()
    }
}

/// A singular hyperplane with frozen exact identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hyperplane {
    coeffs: Vec<BigInt>,
    constant: BigInt,
    normal: Vec<f64>,
    point: Vec<f64>,
}

impl Hyperplane {
    /// Build a hyperplane from an affine form.
    ///
    /// Returns `Ok(None)` when the form has no locus (all coefficients zero
    /// and a non-zero constant).
    ///
    /// # Errors
    ///
    /// `MalformedField` if the form is identically zero, since that would make
    /// every lattice point singular.
    pub fn from_form(form: &AffineForm) -> SearchResult<Option<Self>> {
        if form.coeffs.iter().all(Zero::is_zero) {
            if form.constant.is_zero() {
                return Err(SearchError::MalformedField(
                    "singular locus covers the whole lattice".to_string(),
                ));
            }
            return Ok(None);
        }

        // Clear denominators
        let lcm = form
            .coeffs
            .iter()
            .chain(std::iter::once(&form.constant))
            .fold(BigInt::one(), |acc, c| acc.lcm(c.denom()));
        let scale = |c: &BigRational| -> BigInt { (c * BigRational::from_integer(lcm.clone())).to_integer() };
        let mut coeffs: Vec<BigInt> = form.coeffs.iter().map(scale).collect();
        let mut constant = scale(&form.constant);

        // Primitive content
        let g = coeffs
            .iter()
            .chain(std::iter::once(&constant))
            .fold(BigInt::zero(), |acc, c| acc.gcd(c));
        if !g.is_zero() && !g.is_one() {
            coeffs.iter_mut().for_each(|c| *c /= &g);
            constant /= &g;
        }

        // Orientation: first non-zero coefficient positive
        if coeffs.iter().find(|c| !c.is_zero()).map_or(false, |c| c.is_negative()) {
            coeffs.iter_mut().for_each(|c| *c = -c.clone());
            constant = -constant;
        }

        let (normal, point) = Self::calc_normal(&coeffs, &constant);
        Ok(Some(Self {
            coeffs,
            constant,
            normal,
            point,
        }))
    }

    /// Float normal and a point on the plane (all other coordinates zero).
    fn calc_normal(coeffs: &[BigInt], constant: &BigInt) -> (Vec<f64>, Vec<f64>) {
        let normal: Vec<f64> = coeffs.iter().map(|c| c.to_f64().unwrap_or(0.0)).collect();
        let mut point = vec![0.0; coeffs.len()];
        if let Some(i) = coeffs.iter().position(|c| !c.is_zero()) {
            let c = constant.to_f64().unwrap_or(0.0);
            point[i] = -c / normal[i];
        }
        (normal, point)
    }

    pub fn dim(&self) -> usize {
        self.coeffs.len()
    }

    pub fn coeffs(&self) -> &[BigInt] {
        &self.coeffs
    }

    pub fn constant(&self) -> &BigInt {
        &self.constant
    }

    pub fn normal(&self) -> &[f64] {
        &self.normal
    }

    /// A representative point on the plane.
    pub fn point(&self) -> &[f64] {
        &self.point
    }

    /// Exact value of the form at `position`.
    pub fn evaluate(&self, position: &Position) -> SearchResult<BigRational> {
        if position.dim() != self.dim() {
            return Err(SearchError::DimensionMismatch {
                expected: self.dim(),
                actual: position.dim(),
            });
        }
        let value = self
            .coeffs
            .iter()
            .zip(position.coords())
            .fold(BigRational::from_integer(self.constant.clone()), |acc, (a, x)| {
                acc + x * BigRational::from_integer(a.clone())
            });
        Ok(value)
    }

    /// Parameter `t` at which the ray `start + t·direction` meets the plane,
    /// or `None` if the ray is parallel to it.
    pub fn intersection_with_line_coeff(&self, start: &Position, direction: &Position) -> Option<f64> {
        let dir = direction.as_f64();
        let dot: f64 = self.normal.iter().zip(&dir).map(|(n, d)| n * d).sum();
        if dot.abs() <= PARALLEL_EPS {
            return None;
        }
        let s = start.as_f64();
        let num: f64 = self
            .point
            .iter()
            .zip(&s)
            .zip(&self.normal)
            .map(|((p, x), n)| (p - x) * n)
            .sum();
        Some(num / dot)
    }

    fn key(&self) -> (&[BigInt], &BigInt) {
        (&self.coeffs, &self.constant)
    }
}

impl PartialEq for Hyperplane {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Hyperplane {}

impl Hash for Hyperplane {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Hyperplane {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hyperplane {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for Hyperplane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (i, c) in self.coeffs.iter().enumerate() {
            if c.is_zero() {
                continue;
            }
            let sign = if c.is_negative() { "-" } else { "+" };
            let abs = c.abs();
            if first {
                if c.is_negative() {
                    write!(f, "-")?;
                }
            } else {
                write!(f, " {} ", sign)?;
            }
            if abs.is_one() {
                write!(f, "x{}", i)?;
            } else {
                write!(f, "{}*x{}", abs, i)?;
            }
            first = false;
        }
        if !self.constant.is_zero() {
            let sign = if self.constant.is_negative() { "-" } else { "+" };
            write!(f, " {} {}", sign, self.constant.abs())?;
        }
        write!(f, " = 0")
    }
}
