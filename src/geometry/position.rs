//! Exact lattice positions.
//!
//! A [`Position`] is an ordered tuple of rationals, one per lattice axis.
//! It serves both as a point (possibly shifted off the integer lattice) and
//! as a direction vector. Equality and hashing are exact.

use std::fmt;
use std::ops::{Add, Neg, Sub};

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::error::{SearchError, SearchResult};

/// An integer lattice point as produced by the point generators.
pub type Point = Vec<i64>;

/// Immutable exact position in the lattice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position(Vec<BigRational>);

impl Position {
    pub fn new(coords: Vec<BigRational>) -> Self {
        Self(coords)
    }

    /// Position with integer coordinates.
    pub fn from_ints(coords: &[i64]) -> Self {
        Self(
            coords
                .iter()
                .map(|&c| BigRational::from_integer(BigInt::from(c)))
                .collect(),
        )
    }

    /// Position from `(numerator, denominator)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if any denominator is zero.
    pub fn from_fractions(coords: &[(i64, i64)]) -> SearchResult<Self> {
        coords
            .iter()
            .map(|&(n, d)| {
                if d == 0 {
                    Err(SearchError::InvalidConfig(format!(
                        "zero denominator in position coordinate {}/{}",
                        n, d
                    )))
                } else {
                    Ok(BigRational::new(BigInt::from(n), BigInt::from(d)))
                }
            })
            .collect::<SearchResult<Vec<_>>>()
            .map(Self)
    }

    /// The origin of a `dim`-dimensional lattice.
    pub fn zeros(dim: usize) -> Self {
        Self(vec![BigRational::zero(); dim])
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn coords(&self) -> &[BigRational] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(Zero::is_zero)
    }

    /// Whether every coordinate is an integer.
    pub fn is_integral(&self) -> bool {
        self.0.iter().all(|c| c.is_integer())
    }

    /// Lossy float view used by the fast intersection tests.
    pub fn as_f64(&self) -> Vec<f64> {
        self.0.iter().map(|c| c.to_f64().unwrap_or(f64::NAN)).collect()
    }

    /// Euclidean norm in floating point.
    pub fn norm(&self) -> f64 {
        self.as_f64().iter().map(|x| x * x).sum::<f64>().sqrt()
    }

    /// Exact dot product.
    pub fn dot(&self, other: &Position) -> SearchResult<BigRational> {
        self.check_dim(other)?;
        Ok(self
            .0
            .iter()
            .zip(&other.0)
            .fold(BigRational::zero(), |acc, (a, b)| acc + a * b))
    }

    /// Coordinate-wise sum, checking dimensions.
    pub fn checked_add(&self, other: &Position) -> SearchResult<Position> {
        self.check_dim(other)?;
        Ok(Self(self.0.iter().zip(&other.0).map(|(a, b)| a + b).collect()))
    }

    /// Sum with an integer offset, as used when shifting generated points.
    pub fn offset_by(&self, point: &[i64]) -> SearchResult<Position> {
        if point.len() != self.dim() {
            return Err(SearchError::DimensionMismatch {
                expected: self.dim(),
                actual: point.len(),
            });
        }
        Ok(Self(
            self.0
                .iter()
                .zip(point)
                .map(|(a, &b)| a + BigRational::from_integer(BigInt::from(b)))
                .collect(),
        ))
    }

    /// Largest absolute coordinate, as a float.
    pub fn max_abs(&self) -> f64 {
        self.0
            .iter()
            .map(|c| c.abs().to_f64().unwrap_or(f64::INFINITY))
            .fold(0.0, f64::max)
    }

    fn check_dim(&self, other: &Position) -> SearchResult<()> {
        if self.dim() != other.dim() {
            return Err(SearchError::DimensionMismatch {
                expected: self.dim(),
                actual: other.dim(),
            });
        }
        Ok(())
    }
}

impl From<Point> for Position {
    fn from(point: Point) -> Self {
        Self::from_ints(&point)
    }
}

impl From<&[i64]> for Position {
    fn from(point: &[i64]) -> Self {
        Self::from_ints(point)
    }
}

impl Add for &Position {
    type Output = Position;

    /// # Panics
    ///
    /// Panics on dimension mismatch; use [`Position::checked_add`] for
    /// untrusted input.
    fn add(self, other: &Position) -> Position {
        assert_eq!(self.dim(), other.dim(), "Position dimensions must match");
        Position(self.0.iter().zip(&other.0).map(|(a, b)| a + b).collect())
    }
}

impl Add for Position {
    type Output = Position;

    fn add(self, other: Position) -> Position {
        &self + &other
    }
}

impl Sub for &Position {
    type Output = Position;

    fn sub(self, other: &Position) -> Position {
        assert_eq!(self.dim(), other.dim(), "Position dimensions must match");
        Position(self.0.iter().zip(&other.0).map(|(a, b)| a - b).collect())
    }
}

impl Neg for &Position {
    type Output = Position;

    fn neg(self) -> Position {
        Position(self.0.iter().map(|c| -c).collect())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}
