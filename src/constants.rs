//! Named mathematical constants targeted by the search.
//!
//! Values are kept as decimal strings so that exact rational approximations
//! with ~50 significant digits are available for delta computation, well
//! beyond what `f64` can represent.

use std::collections::BTreeMap;
use std::fmt;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};

use crate::error::{SearchError, SearchResult};

/// A target constant: a name and its decimal expansion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constant {
    name: String,
    digits: String,
}

impl Constant {
    /// Create a constant from a decimal string such as `"3.14159"`.
    pub fn new(name: impl Into<String>, digits: impl Into<String>) -> SearchResult<Self> {
        let name = name.into();
        let digits = digits.into();
        parse_decimal(&digits).ok_or_else(|| {
            SearchError::InvalidConfig(format!(
                "constant '{}' has malformed decimal value '{}'",
                name, digits
            ))
        })?;
        Ok(Self { name, digits })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Decimal expansion as given.
    pub fn digits(&self) -> &str {
        &self.digits
    }

    /// Nearest `f64`.
    pub fn as_f64(&self) -> f64 {
        self.digits.parse::<f64>().unwrap_or(f64::NAN)
    }

    /// Exact rational value of the stored decimal expansion.
    pub fn as_rational(&self) -> BigRational {
        // Validated in `new`
        parse_decimal(&self.digits).unwrap_or_else(BigRational::zero)
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Parse `[-]int[.frac]` into an exact rational.
fn parse_decimal(s: &str) -> Option<BigRational> {
    let s = s.trim();
    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }

    let all_digits = format!("{}{}", int_part, frac_part);
    let numer = BigInt::parse_bytes(all_digits.as_bytes(), 10)?;
    let mut denom = BigInt::one();
    for _ in 0..frac_part.len() {
        denom *= 10;
    }
    let value = BigRational::new(numer, denom);
    Some(if negative { -value } else { value })
}

/// Lookup table from constant name to value.
///
/// Replaces the hard-wired name table: callers construct (or extend) a
/// catalog and pass it where constants are resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstantCatalog {
    constants: BTreeMap<String, Constant>,
}

impl Default for ConstantCatalog {
    fn default() -> Self {
        let known = [
            ("pi", "3.14159265358979323846264338327950288419716939937510"),
            ("E", "2.71828182845904523536028747135266249775724709369995"),
            ("EulerGamma", "0.57721566490153286060651209008240243104215933593992"),
            ("Catalan", "0.91596559417721901505460351493238411077414937428167"),
            ("GoldenRatio", "1.61803398874989484820458683436563811772030917980576"),
            ("log2", "0.69314718055994530941723212145817656807550013436025"),
            ("zeta-2", "1.64493406684822643647241516664602518921894990120679"),
            ("zeta-3", "1.20205690315959428539973816151144999076498629234049"),
            ("zeta-5", "1.03692775514336992633136548645703416805708091950191"),
        ];
        let constants = known
            .iter()
            .map(|(name, digits)| {
                (
                    name.to_string(),
                    Constant {
                        name: name.to_string(),
                        digits: digits.to_string(),
                    },
                )
            })
            .collect();
        Self { constants }
    }
}

impl ConstantCatalog {
    /// Catalog with no constants.
    pub fn empty() -> Self {
        Self {
            constants: BTreeMap::new(),
        }
    }

    /// Add or replace a constant.
    pub fn insert(&mut self, constant: Constant) {
        self.constants.insert(constant.name.clone(), constant);
    }

    /// Resolve a constant by name.
    pub fn get(&self, name: &str) -> SearchResult<Constant> {
        self.constants
            .get(name)
            .cloned()
            .ok_or_else(|| SearchError::UnknownConstant(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constants.contains_key(name)
    }

    /// Resolve several names, failing on the first unknown one.
    pub fn resolve_all<S: AsRef<str>>(&self, names: &[S]) -> SearchResult<Vec<Constant>> {
        names.iter().map(|n| self.get(n.as_ref())).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constants.keys().map(String::as_str)
    }
}
