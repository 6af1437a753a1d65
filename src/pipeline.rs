//! End-to-end runs: analysis, consensus, and optional deep search.
//!
//! ```text
//! constants ──► ConstructionSource ──► AnalysisModule × n ──► consensus
//!                                                                │
//!                                    RunMode::AnalyzeAndSearch ──► DeepSearcher
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::{aggregate_by_constant, AnalysisModule, RankedSpace, ShallowAnalysis, SpaceId};
use crate::config::Config;
use crate::constants::{Constant, ConstantCatalog};
use crate::engine::{Construction, IdentificationOracle};
use crate::error::{SearchError, SearchResult};
use crate::search::{DataManager, DeepSearcher, SearchVector};

/// Supplies the constructions to analyze for a constant.
pub trait ConstructionSource: Send + Sync {
    fn constructions(&self, constant: &Constant) -> SearchResult<Vec<Construction>>;
}

/// Constructions listed by constant name. Unlisted constants have none.
impl ConstructionSource for BTreeMap<String, Vec<Construction>> {
    fn constructions(&self, constant: &Constant) -> SearchResult<Vec<Construction>> {
        Ok(self.get(constant.name()).cloned().unwrap_or_default())
    }
}

/// What a run does after ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Stop at the consensus ranking.
    Analyze,
    /// Deep-search the consensus order, optionally only its first spaces.
    AnalyzeAndSearch { max_spaces: Option<usize> },
}

/// Best scored pair found for a constant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestResult {
    pub delta: f64,
    pub vector: SearchVector,
    pub space: SpaceId,
}

/// Outcome for one constant.
#[derive(Debug, Clone, Default)]
pub struct ConstantReport {
    /// Consensus order, best first.
    pub consensus: Vec<SpaceId>,
    /// Deep-search results in consensus order; empty in analysis-only runs.
    pub searched: Vec<(SpaceId, DataManager)>,
    pub best: Option<BestResult>,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub constants: BTreeMap<String, ConstantReport>,
}

impl RunReport {
    pub fn best(&self, constant: &str) -> Option<&BestResult> {
        self.constants.get(constant).and_then(|r| r.best.as_ref())
    }
}

/// Runs the whole search for a set of constants.
pub struct System {
    config: Config,
    catalog: ConstantCatalog,
    source: Box<dyn ConstructionSource>,
    modules: Vec<Box<dyn AnalysisModule>>,
    oracle: Option<Arc<dyn IdentificationOracle>>,
}

impl System {
    /// A system with the shallow analysis module.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration does not validate, or oracle
    /// mode is enabled without an oracle.
    pub fn new(
        config: Config,
        catalog: ConstantCatalog,
        source: Box<dyn ConstructionSource>,
        oracle: Option<Arc<dyn IdentificationOracle>>,
    ) -> SearchResult<Self> {
        config.validate()?;
        if (config.analysis.use_oracle || config.search.use_oracle) && oracle.is_none() {
            return Err(SearchError::InvalidConfig(
                "oracle mode is enabled but no identification oracle was provided".to_string(),
            ));
        }
        let shallow = ShallowAnalysis::new(
            config.extractor.clone(),
            config.analysis.clone(),
            config.search.clone(),
            oracle.clone(),
        );
        Ok(Self {
            config,
            catalog,
            source,
            modules: vec![Box::new(shallow)],
            oracle,
        })
    }

    /// Add another analysis module whose ranking takes part in consensus.
    pub fn with_module(mut self, module: Box<dyn AnalysisModule>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `constants`, or the configured constant list when empty.
    ///
    /// # Errors
    ///
    /// Unknown constants, construction errors and preference cycles.
    pub fn run(&self, constants: &[String], mode: RunMode) -> SearchResult<RunReport> {
        let names = if constants.is_empty() {
            self.config.constants.as_slice()
        } else {
            constants
        };
        let constants = self.catalog.resolve_all(names)?;

        let mut sources: BTreeMap<String, Vec<Construction>> = BTreeMap::new();
        for constant in &constants {
            sources.insert(constant.name().to_string(), self.source.constructions(constant)?);
        }

        // Spaces stay reachable through their ranked entries until the run ends
        let mut spaces: BTreeMap<(String, SpaceId), RankedSpace> = BTreeMap::new();
        let mut outputs = Vec::with_capacity(self.modules.len());
        for module in &self.modules {
            let mut queues: BTreeMap<String, Vec<SpaceId>> = BTreeMap::new();
            for constant in &constants {
                let ranked = module.execute(constant, &sources[constant.name()])?;
                info!(
                    module = module.name(),
                    constant = %constant.name(),
                    spaces = ranked.len(),
                    "analysis finished"
                );
                let ids: Vec<SpaceId> = ranked.iter().map(|r| r.id.clone()).collect();
                for r in ranked {
                    spaces.entry((constant.name().to_string(), r.id.clone())).or_insert(r);
                }
                queues.insert(constant.name().to_string(), ids);
            }
            outputs.push(queues);
        }
        let consensus = aggregate_by_constant(&outputs)?;

        let mut report = RunReport::default();
        for constant in &constants {
            let order = consensus.get(constant.name()).cloned().unwrap_or_default();
            let entry = self.dispatch(mode, constant, order, &spaces)?;
            report.constants.insert(constant.name().to_string(), entry);
        }
        Ok(report)
    }

    fn dispatch(
        &self,
        mode: RunMode,
        constant: &Constant,
        order: Vec<SpaceId>,
        spaces: &BTreeMap<(String, SpaceId), RankedSpace>,
    ) -> SearchResult<ConstantReport> {
        match mode {
            RunMode::Analyze => Ok(ConstantReport {
                consensus: order,
                ..ConstantReport::default()
            }),
            RunMode::AnalyzeAndSearch { max_spaces } => {
                let limit = max_spaces.unwrap_or(order.len());
                let selected: Vec<_> = order
                    .iter()
                    .take(limit)
                    .filter_map(|id| spaces.get(&(constant.name().to_string(), id.clone())))
                    .map(RankedSpace::space)
                    .collect();
                let deep = DeepSearcher::new(
                    self.config.search.clone(),
                    self.config.analysis.clone(),
                    self.oracle.clone(),
                );
                let searched = deep.execute(&selected, constant)?;
                let best = best_of(&searched);
                match &best {
                    Some(b) => info!(
                        constant = %constant.name(),
                        best_delta = b.delta,
                        vector = %b.vector,
                        space = %b.space,
                        "best result"
                    ),
                    None => warn!(constant = %constant.name(), "no delta found in any searched space"),
                }
                Ok(ConstantReport {
                    consensus: order,
                    searched,
                    best,
                })
            }
        }
    }
}

/// Largest delta over all managers; earlier spaces win ties.
fn best_of(searched: &[(SpaceId, DataManager)]) -> Option<BestResult> {
    let mut best: Option<BestResult> = None;
    for (id, dm) in searched {
        if let Some((delta, vector)) = dm.best_delta() {
            if best.as_ref().map_or(true, |b| delta > b.delta) {
                best = Some(BestResult {
                    delta,
                    vector: vector.clone(),
                    space: id.clone(),
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::engine::testing::PlaneField;
    use crate::geometry::AffineForm;
    use crate::search::SearchData;

    fn config() -> Config {
        Config {
            analysis: AnalysisConfig {
                use_oracle: false,
                partial_search_factor: 1.0,
                trajectory_base: 3,
                log_every_space: false,
                ..AnalysisConfig::default()
            },
            constants: vec!["half".to_string()],
            ..Config::default()
        }
    }

    fn system() -> System {
        let mut catalog = ConstantCatalog::empty();
        catalog.insert(Constant::new("half", "0.5").unwrap());
        let field = Arc::new(PlaneField::new(2, vec![AffineForm::from_ints(&[2, 0], -1)]));
        let mut source = BTreeMap::new();
        source.insert("half".to_string(), vec![Construction::unshifted("half-plane", field)]);
        System::new(config(), catalog, Box::new(source), None).expect("Failed to build system")
    }

    #[test]
    fn test_analyze_only() {
        let report = system().run(&[], RunMode::Analyze).unwrap();
        let half = &report.constants["half"];
        assert_eq!(half.consensus.len(), 2);
        assert!(half.searched.is_empty());
        assert!(report.best("half").is_none());
    }

    #[test]
    fn test_analyze_and_search_reports_best() {
        let report = system()
            .run(&[], RunMode::AnalyzeAndSearch { max_spaces: Some(1) })
            .unwrap();
        let half = &report.constants["half"];
        assert_eq!(half.searched.len(), 1);
        assert_eq!(half.searched[0].0, half.consensus[0]);
        let best = report.best("half").expect("no best result");
        assert_eq!(best.space, half.consensus[0]);
    }

    #[test]
    fn test_oracle_mode_without_oracle_rejected_at_construction() {
        let field = Arc::new(PlaneField::new(2, vec![AffineForm::from_ints(&[2, 0], -1)]));
        let mut source = BTreeMap::new();
        source.insert("half".to_string(), vec![Construction::unshifted("half-plane", field)]);
        let err = System::new(Config::default(), ConstantCatalog::empty(), Box::new(source), None)
            .err()
            .expect("oracle mode without an oracle must be rejected");
        assert!(matches!(err, SearchError::InvalidConfig(_)));
    }

    #[test]
    fn test_unknown_constant() {
        let err = system().run(&["tau".to_string()], RunMode::Analyze).unwrap_err();
        assert!(matches!(err, SearchError::UnknownConstant(_)));
    }

    #[test]
    fn test_best_of_prefers_earlier_on_tie() {
        let a = SpaceId::new(
            "f",
            crate::geometry::Position::zeros(1),
            crate::subspaces::ShardVector::from_signs(&[1]).unwrap(),
        );
        let b = SpaceId::new(
            "f",
            crate::geometry::Position::zeros(1),
            crate::subspaces::ShardVector::from_signs(&[-1]).unwrap(),
        );
        let manager = |delta: f64| {
            let mut dm = DataManager::new(false);
            let mut d = SearchData::new(SearchVector::new(
                crate::geometry::Position::from_ints(&[1]),
                crate::geometry::Position::from_ints(&[1]),
            ));
            d.delta = Some(delta);
            dm.insert(d);
            dm
        };
        let best = best_of(&[(a.clone(), manager(0.5)), (b, manager(0.5))]).unwrap();
        assert_eq!(best.space, a);
    }
}
