//! Exact feasibility of strict linear systems
//!
//! Decides whether `{ x ∈ ℚ^n : a_i·x + c_i > 0 for all i }` is non-empty.
//! Used to enumerate the open cells of a hyperplane arrangement without
//! relying on lattice sampling.
//!
//! # Algorithm
//!
//! Fourier–Motzkin elimination over the integers. Eliminating `x_j`, every
//! constraint with a positive `x_j` coefficient is combined with every one
//! with a negative coefficient so that `x_j` cancels; the sum of two strict
//! inequalities with positive weights is strict. When no variable is left,
//! the system is feasible iff every remaining constant is positive.
//!
//! Rows are reduced by their content and deduplicated after each step, which
//! keeps the blowup manageable for the small dimensions searched here. If the
//! row count still exceeds the configured cap, the system is reported as
//! feasible: a spurious cell only costs a shard that never receives a point.

use std::collections::BTreeSet;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{One, Signed, Zero};

/// `coeffs·x + constant > 0`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StrictInequality {
    pub coeffs: Vec<BigInt>,
    pub constant: BigInt,
}

impl StrictInequality {
    pub fn new(coeffs: Vec<BigInt>, constant: BigInt) -> Self {
        Self { coeffs, constant }
    }

    /// The opposite open half-space, `-(coeffs·x + constant) > 0`.
    pub fn negated(&self) -> Self {
        Self {
            coeffs: self.coeffs.iter().map(|c| -c).collect(),
            constant: -&self.constant,
        }
    }

    /// Divide through by the positive gcd of all entries.
    fn reduced(mut self) -> Self {
        let g = self
            .coeffs
            .iter()
            .chain(std::iter::once(&self.constant))
            .fold(BigInt::zero(), |acc, c| acc.gcd(c));
        if !g.is_zero() && !g.is_one() {
            self.coeffs.iter_mut().for_each(|c| *c /= &g);
            self.constant /= &g;
        }
        self
    }
}

/// Outcome of a feasibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feasibility {
    Feasible,
    Infeasible,
    /// Row cap exceeded; treated as feasible by callers.
    Undecided,
}

impl Feasibility {
    pub fn is_possible(self) -> bool {
        !matches!(self, Feasibility::Infeasible)
    }
}

/// Statistics for a feasibility check
#[derive(Debug, Clone, Default)]
pub struct EliminationStats {
    pub variables_eliminated: usize,
    pub peak_rows: usize,
}

/// Decide whether a strict system in `dim` variables has a solution.
///
/// # Arguments
///
/// * `constraints` - rows `a·x + c > 0`, each with `dim` coefficients
/// * `dim` - number of variables
/// * `max_rows` - abandon elimination once a step produces more rows
pub fn check_strict_system(
    constraints: &[StrictInequality],
    dim: usize,
    max_rows: usize,
) -> (Feasibility, EliminationStats) {
    let mut stats = EliminationStats::default();
    let mut rows: BTreeSet<StrictInequality> = constraints
        .iter()
        .cloned()
        .map(StrictInequality::reduced)
        .collect();
    stats.peak_rows = rows.len();

    for var in 0..dim {
        // Rows no longer touching any variable are decided now
        if rows
            .iter()
            .any(|r| r.coeffs.iter().all(Zero::is_zero) && !r.constant.is_positive())
        {
            return (Feasibility::Infeasible, stats);
        }

        let mut positive = Vec::new();
        let mut negative = Vec::new();
        let mut next = BTreeSet::new();
        for row in rows {
            let a = &row.coeffs[var];
            if a.is_positive() {
                positive.push(row);
            } else if a.is_negative() {
                negative.push(row);
            } else {
                next.insert(row);
            }
        }

        // A variable bounded on one side only can always be pushed far enough
        if !positive.is_empty() && !negative.is_empty() {
            for p in &positive {
                for n in &negative {
                    let wp = -&n.coeffs[var];
                    let wn = &p.coeffs[var];
                    let coeffs: Vec<BigInt> = p
                        .coeffs
                        .iter()
                        .zip(&n.coeffs)
                        .map(|(a, b)| a * &wp + b * wn)
                        .collect();
                    let constant = &p.constant * &wp + &n.constant * wn;
                    next.insert(StrictInequality::new(coeffs, constant).reduced());
                    if next.len() > max_rows {
                        stats.peak_rows = next.len();
                        return (Feasibility::Undecided, stats);
                    }
                }
            }
        }

        stats.variables_eliminated += 1;
        stats.peak_rows = stats.peak_rows.max(next.len());
        rows = next;
    }

    let feasible = rows.iter().all(|r| r.constant.is_positive());
    let outcome = if feasible {
        Feasibility::Feasible
    } else {
        Feasibility::Infeasible
    };
    (outcome, stats)
}

/// Convenience wrapper returning whether the system may be feasible.
pub fn is_strictly_feasible(constraints: &[StrictInequality], dim: usize, max_rows: usize) -> bool {
    check_strict_system(constraints, dim, max_rows).0.is_possible()
}
