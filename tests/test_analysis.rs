// tests/test_analysis.rs

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use cmf_search::analysis::{aggregate, match_rank, Analyzer, AnalysisModule, ShallowAnalysis, SpaceId, StableHash};
use cmf_search::config::{AnalysisConfig, Config, ExtractorConfig, SearchConfig};
use cmf_search::constants::ConstantCatalog;
use cmf_search::engine::{Construction, IdentificationOracle};
use cmf_search::geometry::Position;
use cmf_search::pipeline::{RunMode, System};
use cmf_search::subspaces::ShardVector;

use common::{half, half_plane, triangle, HalfOracle};

fn space(name: &str, signs: &[i8]) -> SpaceId {
    SpaceId::new(name, Position::zeros(2), ShardVector::from_signs(signs).expect("bad signs"))
}

fn direct_analysis() -> AnalysisConfig {
    AnalysisConfig {
        use_oracle: false,
        partial_search_factor: 1.0,
        trajectory_base: 3,
        log_every_space: false,
        ..AnalysisConfig::default()
    }
}

#[test]
fn test_consensus_of_identical_rankings() {
    let ranking = vec![space("f", &[1, 1]), space("g", &[-1]), space("f", &[-1, 1])];
    let out = aggregate("pi", &[ranking.clone(), ranking.clone()]).unwrap();
    assert_eq!(out, ranking);
}

#[test]
fn test_consensus_tie_is_deterministic() {
    let a = space("f", &[1]);
    let b = space("f", &[-1]);
    let rankings = [vec![a.clone(), b.clone()], vec![b.clone(), a.clone()]];
    let first = aggregate("pi", &rankings).unwrap();
    for _ in 0..10 {
        assert_eq!(aggregate("pi", &rankings).unwrap(), first);
    }
    let winner = if a.stable_hash() > b.stable_hash() { a } else { b };
    assert_eq!(first[0], winner);
}

#[test]
fn test_analyzer_with_oracle() {
    let oracle: Arc<dyn IdentificationOracle> = Arc::new(HalfOracle);
    let analyzer = Analyzer::new(
        half(),
        Construction::unshifted("half-plane", half_plane()),
        ExtractorConfig::default(),
        AnalysisConfig {
            use_oracle: true,
            identification_threshold: 0.5,
            ..direct_analysis()
        },
        SearchConfig::default(),
        Some(oracle),
    )
    .unwrap();
    let ranked = analyzer.analyze().unwrap();
    assert!(!ranked.is_empty());
    for r in &ranked {
        assert!(r.best_delta.is_infinite());
        assert_eq!(r.delta_rank, match_rank(3, f64::INFINITY));
    }
}

#[test]
fn test_shallow_analysis_skips_empty_cells() {
    let module = ShallowAnalysis::new(ExtractorConfig::default(), direct_analysis(), SearchConfig::default(), None);
    let ranked = module
        .execute(&half(), &[Construction::unshifted("triangle", triangle())])
        .unwrap();
    // The bounded cell between the three lines holds no lattice point
    assert!(ranked.len() < 7);
    for r in &ranked {
        assert!(r.space().has_start_points().unwrap());
    }
}

#[test]
fn test_pipeline_with_two_modules() {
    let config = Config {
        analysis: direct_analysis(),
        constants: vec!["half".to_string()],
        ..Config::default()
    };
    let mut catalog = ConstantCatalog::default();
    catalog.insert(half());
    let mut source = BTreeMap::new();
    source.insert(
        "half".to_string(),
        vec![
            Construction::unshifted("half-plane", half_plane()),
            Construction::unshifted("triangle", triangle()),
        ],
    );
    let second = ShallowAnalysis::new(
        ExtractorConfig::default(),
        direct_analysis(),
        SearchConfig::default(),
        None,
    );
    let system = System::new(config, catalog, Box::new(source), None)
        .unwrap()
        .with_module(Box::new(second));

    let report = system
        .run(&[], RunMode::AnalyzeAndSearch { max_spaces: Some(3) })
        .unwrap();
    let entry = &report.constants["half"];
    assert!(!entry.consensus.is_empty());
    assert_eq!(entry.searched.len(), entry.consensus.len().min(3));
    let best = report.best("half").expect("no best result");
    assert!(entry.consensus.contains(&best.space));
}

#[test]
fn test_pipeline_rejects_invalid_config() {
    let mut config = Config::default();
    config.analysis.partial_search_factor = 2.0;
    let result = System::new(config, ConstantCatalog::default(), Box::new(BTreeMap::<String, Vec<Construction>>::new()), None);
    assert!(result.is_err());
}

#[test]
fn test_pipeline_keeps_shards_of_each_shift() {
    let config = Config {
        analysis: direct_analysis(),
        constants: vec!["half".to_string()],
        ..Config::default()
    };
    let mut catalog = ConstantCatalog::empty();
    catalog.insert(half());
    let mut source = BTreeMap::new();
    source.insert(
        "half".to_string(),
        vec![
            Construction::new("f", half_plane(), Position::from_ints(&[0, 0])).unwrap(),
            Construction::new("f", half_plane(), Position::from_ints(&[0, 5])).unwrap(),
        ],
    );
    let system = System::new(config, catalog, Box::new(source), None).unwrap();

    let report = system.run(&[], RunMode::Analyze).unwrap();
    let consensus = &report.constants["half"].consensus;
    // Two shards per shift
    assert_eq!(consensus.len(), 4);
    let shifts: std::collections::BTreeSet<_> = consensus.iter().map(|id| id.shift.clone()).collect();
    assert_eq!(shifts.len(), 2);
}
