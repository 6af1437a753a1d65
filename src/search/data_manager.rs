//! Per-space search results.
//!
//! A [`DataManager`] maps each searched (start, trajectory) pair to its
//! [`SearchData`]. Summary statistics are computed from the current contents
//! on every call, so they are meaningful while a search is still filling the
//! manager.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::RationalMatrix;
use crate::error::SearchResult;
use crate::geometry::Position;

/// A (start, trajectory) pair: the key of a search result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SearchVector {
    pub start: Position,
    pub trajectory: Position,
}

impl SearchVector {
    pub fn new(start: Position, trajectory: Position) -> Self {
        Self { start, trajectory }
    }
}

impl fmt::Display for SearchVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "start {} trajectory {}", self.start, self.trajectory)
    }
}

/// Sub-computation of a pair evaluation that failed without discarding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Eigenvalues,
    GcdSlope,
    Delta,
    InitialValues,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureStage::Eigenvalues => "eigenvalues",
            FailureStage::GcdSlope => "gcd_slope",
            FailureStage::Delta => "delta",
            FailureStage::InitialValues => "initial_values",
        };
        write!(f, "{}", name)
    }
}

/// Full result record for one search vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchData {
    pub vector: SearchVector,
    pub limit: Option<f64>,
    /// Convergence rate; may be infinite for an exact match.
    #[serde(default, with = "extended_float")]
    pub delta: Option<f64>,
    pub eigenvalues: BTreeMap<String, usize>,
    pub gcd_slope: Option<f64>,
    pub initial_values: Option<RationalMatrix>,
    pub oracle_identified: bool,
    pub errors: BTreeMap<FailureStage, String>,
}

impl SearchData {
    pub fn new(vector: SearchVector) -> Self {
        Self {
            vector,
            limit: None,
            delta: None,
            eigenvalues: BTreeMap::new(),
            gcd_slope: None,
            initial_values: None,
            oracle_identified: false,
            errors: BTreeMap::new(),
        }
    }

    pub fn record_error(&mut self, stage: FailureStage, error: impl fmt::Display) {
        self.errors.insert(stage, error.to_string());
    }
}

/// JSON has no infinities; write them as strings.
mod extended_float {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) if v.is_finite() => Some(Repr::Number(*v)),
            Some(v) => Some(Repr::Text(v.to_string())),
            None => None,
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
        match Option::<Repr>::deserialize(deserializer)? {
            Some(Repr::Number(v)) => Ok(Some(v)),
            Some(Repr::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

/// Results of searching one space.
#[derive(Debug, Clone, Default)]
pub struct DataManager {
    use_oracle: bool,
    entries: BTreeMap<SearchVector, SearchData>,
}

impl DataManager {
    pub fn new(use_oracle: bool) -> Self {
        Self {
            use_oracle,
            entries: BTreeMap::new(),
        }
    }

    pub fn use_oracle(&self) -> bool {
        self.use_oracle
    }

    /// Insert a record unless its vector is already present.
    ///
    /// Returns whether the record was inserted.
    pub fn insert(&mut self, data: SearchData) -> bool {
        if self.entries.contains_key(&data.vector) {
            return false;
        }
        self.entries.insert(data.vector.clone(), data);
        true
    }

    pub fn contains(&self, vector: &SearchVector) -> bool {
        self.entries.contains_key(vector)
    }

    pub fn get(&self, vector: &SearchVector) -> Option<&SearchData> {
        self.entries.get(vector)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SearchVector, &SearchData)> {
        self.entries.iter()
    }

    /// All records in key order.
    pub fn results(&self) -> Vec<&SearchData> {
        self.entries.values().collect()
    }

    /// Fraction of records counted as identified.
    ///
    /// In oracle mode a record counts when the oracle found a closed form;
    /// otherwise when initial values are present. An empty manager reports
    /// 1.0: no evidence against the space.
    pub fn identified_fraction(&self) -> f64 {
        if self.entries.is_empty() {
            return 1.0;
        }
        let identified = self
            .entries
            .values()
            .filter(|d| {
                if self.use_oracle {
                    d.oracle_identified
                } else {
                    d.initial_values.is_some()
                }
            })
            .count();
        identified as f64 / self.entries.len() as f64
    }

    /// The record with the largest delta.
    ///
    /// Ties keep the first record in key order. Returns `None` when no record
    /// has a delta.
    pub fn best_result(&self) -> Option<&SearchData> {
        let mut best: Option<(&SearchData, f64)> = None;
        for data in self.entries.values() {
            let delta = match data.delta {
                Some(d) if !d.is_nan() => d,
                _ => continue,
            };
            if best.map_or(true, |(_, b)| delta > b) {
                best = Some((data, delta));
            }
        }
        best.map(|(data, _)| data)
    }

    /// Best delta and the vector it was found on.
    pub fn best_delta(&self) -> Option<(f64, &SearchVector)> {
        self.best_result()
            .and_then(|d| d.delta.map(|delta| (delta, &d.vector)))
    }

    /// Number of recorded failures per stage.
    pub fn failure_counts(&self) -> BTreeMap<FailureStage, usize> {
        let mut counts = BTreeMap::new();
        for data in self.entries.values() {
            for stage in data.errors.keys() {
                *counts.entry(*stage).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Take records from `other` whose vectors are not present yet.
    pub fn merge(&mut self, other: DataManager) -> usize {
        let mut added = 0;
        for data in other.entries.into_values() {
            if self.insert(data) {
                added += 1;
            }
        }
        added
    }

    /// Export records as JSON. Not a stable persistence format.
    pub fn to_json(&self) -> SearchResult<String> {
        #[derive(Serialize)]
        struct Export<'a> {
            use_oracle: bool,
            identified_fraction: f64,
            results: Vec<&'a SearchData>,
        }
        let export = Export {
            use_oracle: self.use_oracle,
            identified_fraction: self.identified_fraction(),
            results: self.results(),
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(start: &[i64], trajectory: &[i64]) -> SearchVector {
        SearchVector::new(Position::from_ints(start), Position::from_ints(trajectory))
    }

    fn data(t: &[i64], delta: Option<f64>) -> SearchData {
        let mut d = SearchData::new(vector(&[0, 0], t));
        d.delta = delta;
        d
    }

    #[test]
    fn test_empty_manager_fully_identified() {
        assert_eq!(DataManager::new(true).identified_fraction(), 1.0);
        assert_eq!(DataManager::new(false).identified_fraction(), 1.0);
    }

    #[test]
    fn test_best_result_none_without_deltas() {
        let mut dm = DataManager::new(false);
        assert!(dm.best_result().is_none());
        dm.insert(data(&[1, 0], None));
        dm.insert(data(&[0, 1], None));
        assert!(dm.best_result().is_none());
        assert!(dm.best_delta().is_none());
    }

    #[test]
    fn test_best_result_max_and_ties() {
        let mut dm = DataManager::new(false);
        dm.insert(data(&[2, 1], Some(0.5)));
        dm.insert(data(&[1, 1], Some(0.5)));
        dm.insert(data(&[1, 2], Some(-0.2)));
        dm.insert(data(&[3, 1], None));
        let (delta, v) = dm.best_delta().unwrap();
        assert_eq!(delta, 0.5);
        // [1, 1] sorts before [2, 1]
        assert_eq!(v, &vector(&[0, 0], &[1, 1]));
    }

    #[test]
    fn test_identified_fraction_modes() {
        let mut direct = DataManager::new(false);
        let mut a = data(&[1, 0], None);
        a.initial_values = Some(RationalMatrix::identity(2));
        direct.insert(a);
        direct.insert(data(&[0, 1], None));
        assert_eq!(direct.identified_fraction(), 0.5);

        let mut oracle = DataManager::new(true);
        let mut b = data(&[1, 0], None);
        b.oracle_identified = true;
        oracle.insert(b);
        for t in [[0, 1], [1, 1], [2, 1]] {
            oracle.insert(data(&t, None));
        }
        assert_eq!(oracle.identified_fraction(), 0.25);
    }

    #[test]
    fn test_insert_keeps_first() {
        let mut dm = DataManager::new(false);
        assert!(dm.insert(data(&[1, 0], Some(0.1))));
        assert!(!dm.insert(data(&[1, 0], Some(0.9))));
        assert_eq!(dm.len(), 1);
        assert_eq!(dm.get(&vector(&[0, 0], &[1, 0])).unwrap().delta, Some(0.1));
    }

    #[test]
    fn test_failure_counts_and_merge() {
        let mut dm = DataManager::new(false);
        let mut a = data(&[1, 0], None);
        a.record_error(FailureStage::Eigenvalues, "unsupported");
        a.record_error(FailureStage::Delta, "diverged");
        let mut b = data(&[0, 1], None);
        b.record_error(FailureStage::Delta, "diverged");
        dm.insert(a);

        let mut other = DataManager::new(false);
        other.insert(b);
        other.insert(data(&[1, 0], None));
        assert_eq!(dm.merge(other), 1);

        let counts = dm.failure_counts();
        assert_eq!(counts[&FailureStage::Delta], 2);
        assert_eq!(counts[&FailureStage::Eigenvalues], 1);
        assert!(!counts.contains_key(&FailureStage::GcdSlope));
    }

    #[test]
    fn test_json_export_keeps_infinity() {
        let mut dm = DataManager::new(false);
        dm.insert(data(&[1, 0], Some(f64::INFINITY)));
        let json = dm.to_json().unwrap();
        assert!(json.contains("\"inf\""));

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let record: SearchData = serde_json::from_value(value["results"][0].clone()).unwrap();
        assert_eq!(record.delta, Some(f64::INFINITY));
    }
}
