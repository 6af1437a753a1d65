//! Full search over spaces selected by analysis.

use std::sync::Arc;

use tracing::{info, warn};

use super::data_manager::DataManager;
use super::serial::SerialSearcher;
use crate::config::{AnalysisConfig, SearchConfig};
use crate::constants::Constant;
use crate::engine::IdentificationOracle;
use crate::error::SearchResult;
use crate::geometry::calc_sphere_radius;
use crate::subspaces::{Searchable, SpaceId};

/// Searches every trajectory of a space, with all optional features on.
///
/// Trajectory sets are sized so that about `trajectory_base ^ dim` primitive
/// directions are generated per space.
pub struct DeepSearcher {
    config: SearchConfig,
    analysis: AnalysisConfig,
    oracle: Option<Arc<dyn IdentificationOracle>>,
}

impl DeepSearcher {
    pub fn new(config: SearchConfig, analysis: AnalysisConfig, oracle: Option<Arc<dyn IdentificationOracle>>) -> Self {
        Self {
            config,
            analysis,
            oracle,
        }
    }

    /// Shape side/radius used for a space of dimension `dim`.
    pub fn trajectory_length(&self, dim: usize) -> i64 {
        calc_sphere_radius(self.analysis.trajectories_for_dim(dim), dim)
    }

    pub fn search_space(&self, space: Arc<dyn Searchable>, constant: &Constant) -> SearchResult<DataManager> {
        let length = self.trajectory_length(space.dim());
        let id = space.id();
        let mut searcher = SerialSearcher::new(space, constant.clone(), self.config.clone(), self.oracle.clone())?;
        if searcher.generate_trajectories(self.analysis.shape, length, true)? == 0 {
            warn!(space = %id, "no valid trajectories, nothing to search");
            return Ok(searcher.into_data_manager());
        }
        searcher.search(None, 1.0, self.config.features)?;
        let dm = searcher.into_data_manager();
        match dm.best_delta() {
            Some((delta, vector)) => info!(space = %id, results = dm.len(), best_delta = delta, %vector, "deep search done"),
            None => info!(space = %id, results = dm.len(), "deep search done, no delta"),
        }
        Ok(dm)
    }

    /// Search each space in turn, keeping the input order.
    pub fn execute(
        &self,
        spaces: &[Arc<dyn Searchable>],
        constant: &Constant,
    ) -> SearchResult<Vec<(SpaceId, DataManager)>> {
        spaces
            .iter()
            .map(|space| Ok((space.id(), self.search_space(Arc::clone(space), constant)?)))
            .collect()
    }
}
