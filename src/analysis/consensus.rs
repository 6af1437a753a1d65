//! Consensus over several priority queues.
//!
//! Every pair of items gets one directed edge from the item ranked behind
//! more often to the one ranked ahead more often. Pairs with equal tallies
//! are decided by a content hash that is stable across runs and platforms,
//! so the same inputs always produce the same order. The consensus is the
//! reverse topological order of the resulting tournament.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use sha2::{Digest, Sha256};

use super::analyzer::SpaceId;
use crate::error::{SearchError, SearchResult};

/// Hash of an item's identity that does not depend on process state.
pub trait StableHash {
    fn stable_hash(&self) -> [u8; 32];
}

impl StableHash for SpaceId {
    fn stable_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.construction.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.shift.to_string().as_bytes());
        hasher.update([0u8]);
        for s in self.vector.signs() {
            hasher.update(s.to_be_bytes());
        }
        hasher.finalize().into()
    }
}

impl StableHash for str {
    fn stable_hash(&self) -> [u8; 32] {
        Sha256::digest(self.as_bytes()).into()
    }
}

impl StableHash for String {
    fn stable_hash(&self) -> [u8; 32] {
        self.as_str().stable_hash()
    }
}

/// Whether `a` beats `b` on a tied tally.
fn wins_tie<T: StableHash + Ord>(a: &T, b: &T) -> bool {
    match a.stable_hash().cmp(&b.stable_hash()) {
        std::cmp::Ordering::Equal => a > b,
        ord => ord.is_gt(),
    }
}

/// Combine rankings of one constant into a single order, best first.
///
/// Items missing from some rankings only take part in the comparisons of
/// the rankings that list them.
///
/// # Errors
///
/// `PreferenceCycle` if the majority preferences are not transitive.
pub fn aggregate<T>(constant: &str, rankings: &[Vec<T>]) -> SearchResult<Vec<T>>
where
    T: StableHash + Ord + Clone,
{
    let items: Vec<T> = rankings
        .iter()
        .flatten()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let index: BTreeMap<&T, usize> = items.iter().enumerate().map(|(i, t)| (t, i)).collect();

    // prefs[(a, b)]: number of rankings with a ahead of b
    let mut prefs: HashMap<(usize, usize), usize> = HashMap::new();
    for ranking in rankings {
        let positions: Vec<usize> = ranking.iter().map(|t| index[t]).collect();
        for (i, &a) in positions.iter().enumerate() {
            for &b in &positions[i + 1..] {
                if a != b {
                    *prefs.entry((a, b)).or_insert(0) += 1;
                }
            }
        }
    }

    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(items.len(), items.len() * items.len() / 2);
    let nodes: Vec<NodeIndex> = (0..items.len()).map(|i| graph.add_node(i)).collect();
    for a in 0..items.len() {
        for b in a + 1..items.len() {
            let ab = prefs.get(&(a, b)).copied().unwrap_or(0);
            let ba = prefs.get(&(b, a)).copied().unwrap_or(0);
            let a_wins = match ab.cmp(&ba) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => wins_tie(&items[a], &items[b]),
            };
            let (loser, winner) = if a_wins { (b, a) } else { (a, b) };
            graph.add_edge(nodes[loser], nodes[winner], ());
        }
    }

    let order = toposort(&graph, None).map_err(|_| SearchError::PreferenceCycle {
        constant: constant.to_string(),
    })?;
    Ok(order.into_iter().rev().map(|n| items[graph[n]].clone()).collect())
}

/// Aggregate the outputs of several analysis modules, each mapping constant
/// names to a ranking, into one ranking per constant.
pub fn aggregate_by_constant(
    module_outputs: &[BTreeMap<String, Vec<SpaceId>>],
) -> SearchResult<BTreeMap<String, Vec<SpaceId>>> {
    let constants: BTreeSet<&String> = module_outputs.iter().flat_map(|m| m.keys()).collect();
    constants
        .into_iter()
        .map(|constant| {
            let rankings: Vec<Vec<SpaceId>> = module_outputs
                .iter()
                .filter_map(|m| m.get(constant).cloned())
                .collect();
            Ok((constant.clone(), aggregate(constant, &rankings)?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Position;
    use crate::subspaces::ShardVector;

    fn id(name: &str, signs: &[i8]) -> SpaceId {
        SpaceId::new(name, Position::zeros(2), ShardVector::from_signs(signs).expect("bad signs"))
    }

    fn s(items: &[&str]) -> Vec<String> {
        items.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn test_identical_rankings_preserved() {
        let ranking = s(&["c", "a", "d", "b"]);
        let out = aggregate("pi", &[ranking.clone(), ranking.clone(), ranking.clone()]).unwrap();
        assert_eq!(out, ranking);
    }

    #[test]
    fn test_majority_wins() {
        let out = aggregate("pi", &[s(&["a", "b"]), s(&["a", "b"]), s(&["b", "a"])]).unwrap();
        assert_eq!(out, s(&["a", "b"]));
    }

    #[test]
    fn test_opposite_rankings_decided_by_hash() {
        let a = id("f", &[1, -1]);
        let b = id("f", &[-1, 1]);
        let first = aggregate("pi", &[vec![a.clone(), b.clone()], vec![b.clone(), a.clone()]]).unwrap();
        let second = aggregate("pi", &[vec![b.clone(), a.clone()], vec![a.clone(), b.clone()]]).unwrap();
        assert_eq!(first, second);

        let expected_first = if a.stable_hash() > b.stable_hash() { &a } else { &b };
        assert_eq!(&first[0], expected_first);
    }

    #[test]
    fn test_condorcet_cycle_is_fatal() {
        let rankings = [s(&["a", "b", "c"]), s(&["b", "c", "a"]), s(&["c", "a", "b"])];
        assert!(matches!(
            aggregate("pi", &rankings),
            Err(SearchError::PreferenceCycle { .. })
        ));
    }

    #[test]
    fn test_partial_rankings_merge() {
        let out = aggregate("pi", &[s(&["a", "b", "c"]), s(&["b", "c"])]).unwrap();
        assert_eq!(out.len(), 3);
        let pos = |x: &str| out.iter().position(|y| y == x).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn test_stable_hash_distinguishes_vectors() {
        assert_ne!(id("f", &[1, 1]).stable_hash(), id("f", &[1, -1]).stable_hash());
        assert_ne!(id("f", &[1]).stable_hash(), id("g", &[1]).stable_hash());
        assert_eq!(id("f", &[1]).stable_hash(), id("f", &[1]).stable_hash());
    }

    #[test]
    fn test_shifted_constructions_are_distinct_items() {
        let vector = ShardVector::from_signs(&[1]).unwrap();
        let a = SpaceId::new("f", Position::zeros(2), vector.clone());
        let b = SpaceId::new("f", Position::from_ints(&[5, 0]), vector);
        assert_ne!(a, b);
        assert_ne!(a.stable_hash(), b.stable_hash());
        let out = aggregate("pi", &[vec![a.clone(), b.clone()]]).unwrap();
        assert_eq!(out, vec![a, b]);
    }

    #[test]
    fn test_aggregate_by_constant() {
        let a = id("f", &[1]);
        let b = id("f", &[-1]);
        let mut m1 = BTreeMap::new();
        m1.insert("pi".to_string(), vec![a.clone(), b.clone()]);
        let mut m2 = BTreeMap::new();
        m2.insert("pi".to_string(), vec![a.clone(), b.clone()]);
        m2.insert("E".to_string(), vec![b.clone()]);

        let out = aggregate_by_constant(&[m1, m2]).unwrap();
        assert_eq!(out["pi"], vec![a, b.clone()]);
        assert_eq!(out["E"], vec![b]);
    }
}
