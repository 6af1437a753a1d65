//! Shallow analysis of one construction.
//!
//! The analyzer partitions the construction's lattice into shards, runs a
//! small sampled search in each one, drops shards whose identified fraction
//! is at or below the threshold, and buckets the rest by best delta.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{AnalysisConfig, ExtractorConfig, FeatureFlags, SearchConfig, Shape};
use crate::constants::Constant;
use crate::engine::{Construction, IdentificationOracle};
use crate::error::{SearchError, SearchResult};
use crate::geometry::calc_sphere_radius;
use crate::search::{DataManager, SerialSearcher};
use crate::subspaces::{Searchable, Shard, ShardExtractor};

pub use crate::subspaces::SpaceId;

/// Fewest buckets `prioritize` works with.
const MIN_RANKS: usize = 3;

/// A shard kept by analysis, with its priority.
#[derive(Debug, Clone)]
pub struct RankedSpace {
    pub id: SpaceId,
    pub shard: Shard,
    /// Bucket of the best delta, higher is better.
    pub delta_rank: usize,
    pub dim: usize,
    pub best_delta: f64,
    // Shards only hold a weak handle; this keeps the cell registry alive
    extractor: Arc<ShardExtractor>,
}

impl RankedSpace {
    /// The shard as a searchable space.
    pub fn space(&self) -> Arc<dyn Searchable> {
        Arc::new(self.shard.clone())
    }

    pub fn extractor(&self) -> &Arc<ShardExtractor> {
        &self.extractor
    }
}

/// Bucket `value` into one of `n` equal-width intervals over `[-1, 1]`.
///
/// Buckets are numbered from 1. Values at or below -1 land in bucket 1; the
/// top bucket `n + 1` takes everything above the last interior boundary,
/// including values above 1.
pub fn match_rank(n: usize, value: f64) -> usize {
    let n = n.max(1);
    let step = 2.0 / n as f64;
    let boundaries: Vec<f64> = (0..=n).map(|k| -1.0 + k as f64 * step).collect();
    let (mut l, mut r) = (0, boundaries.len() - 1);
    while l < r {
        let mid = (l + r) / 2;
        if value > boundaries[mid] {
            l = mid + 1;
        } else {
            r = mid;
        }
    }
    l + 1
}

pub struct Analyzer {
    constant: Constant,
    extractor: Arc<ShardExtractor>,
    analysis: AnalysisConfig,
    search: SearchConfig,
    oracle: Option<Arc<dyn IdentificationOracle>>,
}

impl Analyzer {
    /// Build the extractor for `construction` and populate every shard,
    /// expanding the full bound.
    ///
    /// # Errors
    ///
    /// Construction errors from the extractor, and `InvalidConfig` when
    /// analysis asks for the oracle but none is given.
    pub fn new(
        constant: Constant,
        construction: Construction,
        extractor_config: ExtractorConfig,
        analysis: AnalysisConfig,
        search: SearchConfig,
        oracle: Option<Arc<dyn IdentificationOracle>>,
    ) -> SearchResult<Self> {
        if analysis.use_oracle && oracle.is_none() {
            return Err(SearchError::InvalidConfig(
                "analysis.use_oracle is set but no identification oracle was provided".to_string(),
            ));
        }
        let extractor = ShardExtractor::new(construction, extractor_config)?;
        extractor.populate_start_points(true)?;
        Ok(Self {
            constant,
            extractor,
            analysis,
            search,
            oracle,
        })
    }

    pub fn extractor(&self) -> &Arc<ShardExtractor> {
        &self.extractor
    }

    pub fn dim(&self) -> usize {
        self.extractor.dim()
    }

    /// Shallow-search every shard that has a start point.
    ///
    /// Returns the kept shards with their results, in shard order.
    pub fn search(&self, shape: Shape, length: i64) -> SearchResult<Vec<(Shard, DataManager)>> {
        let shards = self.extractor.shards();
        let mut bad_shards = 0;
        for shard in &shards {
            if !shard.has_start_points()? {
                bad_shards += 1;
            }
        }
        if bad_shards > 0 {
            warn!(
                construction = %self.extractor.name(),
                bad_shards,
                total = shards.len(),
                "could not find valid start points for some shards, try increasing max_expansions or changing the shift"
            );
        }

        let config = SearchConfig {
            use_oracle: self.analysis.use_oracle,
            ..self.search.clone()
        };
        let mut kept = Vec::new();
        for shard in shards {
            let start = match shard.choose_start_point()? {
                Some(s) => s,
                None => {
                    if self.analysis.warn_on_empty_shards {
                        warn!(shard = %shard, "no valid start point, skipping shard");
                    }
                    continue;
                }
            };
            let mut searcher = SerialSearcher::new(
                Arc::new(shard.clone()),
                self.constant.clone(),
                config.clone(),
                self.oracle.clone(),
            )?;
            searcher.generate_trajectories(shape, length, false)?;
            searcher.search(Some(vec![start]), self.analysis.partial_search_factor, FeatureFlags::shallow())?;
            let dm = searcher.into_data_manager();

            let identified = dm.identified_fraction();
            if self.analysis.log_every_space {
                match dm.best_delta() {
                    Some((delta, _)) => info!(shard = %shard, identified, best_delta = delta, "analyzed shard"),
                    None => info!(shard = %shard, identified, "analyzed shard, no delta"),
                }
            }
            if identified > self.analysis.identification_threshold {
                kept.push((shard, dm));
            } else {
                info!(
                    shard = %shard,
                    identified,
                    threshold = self.analysis.identification_threshold,
                    "ignoring shard"
                );
            }
        }
        Ok(kept)
    }

    /// Rank searched shards by best delta. Shards without a delta are dropped.
    pub fn prioritize(&self, managers: &[(Shard, DataManager)]) -> Vec<RankedSpace> {
        let mut ranks = self.analysis.ranks;
        if ranks < MIN_RANKS {
            info!(ranks, "prioritization ranks must be >= 3, using 3");
            ranks = MIN_RANKS;
        }
        managers
            .iter()
            .filter_map(|(shard, dm)| {
                let (best_delta, _) = dm.best_delta()?;
                Some(RankedSpace {
                    id: shard.id(),
                    shard: shard.clone(),
                    delta_rank: match_rank(ranks, best_delta),
                    dim: self.dim(),
                    best_delta,
                    extractor: Arc::clone(&self.extractor),
                })
            })
            .collect()
    }

    /// Search with the configured shape, sized for the construction's
    /// dimension, and rank the result.
    pub fn analyze(&self) -> SearchResult<Vec<RankedSpace>> {
        let dim = self.dim();
        let length = calc_sphere_radius(self.analysis.trajectories_for_dim(dim), dim);
        let managers = self.search(self.analysis.shape, length)?;
        Ok(self.prioritize(&managers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::PlaneField;
    use crate::geometry::AffineForm;

    fn direct_analysis() -> AnalysisConfig {
        AnalysisConfig {
            use_oracle: false,
            partial_search_factor: 1.0,
            trajectory_base: 3,
            log_every_space: false,
            ..AnalysisConfig::default()
        }
    }

    fn analyzer(analysis: AnalysisConfig) -> Analyzer {
        let field = Arc::new(PlaneField::new(2, vec![AffineForm::from_ints(&[2, 0], -1)]));
        Analyzer::new(
            Constant::new("half", "0.5").unwrap(),
            Construction::unshifted("half", field),
            ExtractorConfig::default(),
            analysis,
            SearchConfig::default(),
            None,
        )
        .expect("Failed to build analyzer")
    }

    #[test]
    fn test_match_rank_buckets() {
        assert_eq!(match_rank(3, -1.0), 1);
        assert_eq!(match_rank(3, -0.5), 2);
        assert_eq!(match_rank(3, 0.0), 3);
        assert_eq!(match_rank(3, 0.9), 4);
        assert_eq!(match_rank(3, 1.5), 4);
        assert_eq!(match_rank(3, f64::INFINITY), 4);
        assert_eq!(match_rank(4, 0.25), 4);
    }

    #[test]
    fn test_match_rank_monotone() {
        let values = [-2.0, -0.9, -0.1, 0.2, 0.6, 1.0, 3.0];
        let ranks: Vec<usize> = values.iter().map(|&v| match_rank(5, v)).collect();
        assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_oracle_required_when_configured() {
        let field = Arc::new(PlaneField::new(1, vec![]));
        let err = Analyzer::new(
            Constant::new("half", "0.5").unwrap(),
            Construction::unshifted("line", field),
            ExtractorConfig::default(),
            AnalysisConfig::default(),
            SearchConfig::default(),
            None,
        );
        assert!(matches!(err, Err(SearchError::InvalidConfig(_))));
    }

    #[test]
    fn test_analyze_ranks_both_half_planes() {
        let a = analyzer(direct_analysis());
        let ranked = a.analyze().unwrap();
        assert_eq!(ranked.len(), 2);
        for r in &ranked {
            assert_eq!(r.dim, 2);
            assert_eq!(r.delta_rank, match_rank(3, r.best_delta));
            assert!(r.space().choose_start_point().unwrap().is_some());
        }
    }

    #[test]
    fn test_threshold_drops_shards() {
        // Only even coordinate sums identify, so no shard reaches 100%
        let a = analyzer(AnalysisConfig {
            identification_threshold: 0.99,
            ..direct_analysis()
        });
        assert!(a.analyze().unwrap().is_empty());
    }

    #[test]
    fn test_ranked_space_outlives_analyzer() {
        let ranked = analyzer(direct_analysis()).analyze().unwrap();
        let space = ranked[0].space();
        assert!(space.has_start_points().unwrap());
    }
}
