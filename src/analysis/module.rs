//! Analysis modules: one ranking of spaces per constant.

use std::cmp::Reverse;
use std::sync::Arc;

use tracing::info;

use super::analyzer::{Analyzer, RankedSpace};
use crate::config::{AnalysisConfig, ExtractorConfig, SearchConfig};
use crate::constants::Constant;
use crate::engine::{Construction, IdentificationOracle};
use crate::error::SearchResult;

/// Produces a priority queue of spaces for a constant.
///
/// Several modules may run on the same input; their queues are combined by
/// [`aggregate`](super::consensus::aggregate).
pub trait AnalysisModule: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, constant: &Constant, constructions: &[Construction]) -> SearchResult<Vec<RankedSpace>>;
}

/// Shallow search of every shard of every construction.
///
/// Queues from all constructions are merged and ordered by descending delta
/// rank, then ascending dimension. The sort is stable, so ties keep
/// construction order.
pub struct ShallowAnalysis {
    extractor: ExtractorConfig,
    analysis: AnalysisConfig,
    search: SearchConfig,
    oracle: Option<Arc<dyn IdentificationOracle>>,
}

impl ShallowAnalysis {
    pub fn new(
        extractor: ExtractorConfig,
        analysis: AnalysisConfig,
        search: SearchConfig,
        oracle: Option<Arc<dyn IdentificationOracle>>,
    ) -> Self {
        Self {
            extractor,
            analysis,
            search,
            oracle,
        }
    }
}

impl AnalysisModule for ShallowAnalysis {
    fn name(&self) -> &str {
        "shallow"
    }

    fn execute(&self, constant: &Constant, constructions: &[Construction]) -> SearchResult<Vec<RankedSpace>> {
        let mut queue = Vec::new();
        for construction in constructions {
            info!(constant = %constant.name(), construction = %construction, "analyzing construction");
            let analyzer = Analyzer::new(
                constant.clone(),
                construction.clone(),
                self.extractor.clone(),
                self.analysis.clone(),
                self.search.clone(),
                self.oracle.clone(),
            )?;
            queue.extend(analyzer.analyze()?);
        }
        queue.sort_by_key(|r| (Reverse(r.delta_rank), r.dim));
        Ok(queue)
    }
}
