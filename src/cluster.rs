//! # Ancestor Clustering
//!
//! Groups root persons whose ancestor sets overlap. Two strategies are
//! provided:
//! - `Greedy`: one pass in input order; each person joins the group it would
//!   shrink least, or starts a new one.
//! - `OverlapMerge`: start from singletons and repeatedly merge the pair of
//!   groups sharing the most ancestors until no pair shares any.
//!
//! Overlap merging scans all pairs each round (O(groups²) per round, at most
//! O(groups) rounds). That is fine for tens of roots and is not meant to scale
//! beyond that.

use crate::model::{AncestorSet, PersonId};
use crate::store::PersonStore;
use crate::utils::{intersection, intersection_len};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterStrategy {
    Greedy,
    #[default]
    OverlapMerge,
}

/// Persons sharing common ancestry, with the ancestors they all share.
#[derive(Debug, Clone, PartialEq)]
pub struct AncestorGroup {
    members: Vec<PersonId>,
    ancestors: AncestorSet,
}

impl AncestorGroup {
    pub fn new(member: PersonId, ancestors: AncestorSet) -> Self {
        Self {
            members: vec![member],
            ancestors,
        }
    }

    pub fn members(&self) -> &[PersonId] {
        &self.members
    }

    /// Intersection of every member's ancestor set.
    pub fn ancestors(&self) -> &AncestorSet {
        &self.ancestors
    }

    /// Shared ancestors left if a person with `ancestors` joined.
    pub fn size_after_merge(&self, ancestors: &AncestorSet) -> usize {
        intersection_len(&self.ancestors, ancestors)
    }

    pub fn merge_person(&mut self, member: PersonId, ancestors: &AncestorSet) {
        self.members.push(member);
        self.ancestors = intersection(&self.ancestors, ancestors);
    }

    pub fn merge_group(&mut self, other: AncestorGroup) {
        self.members.extend(other.members);
        self.ancestors = intersection(&self.ancestors, &other.ancestors);
    }
}

/// Group `roots` with the chosen strategy. Roots that are not in the store are
/// skipped.
pub fn cluster(store: &PersonStore, roots: &[PersonId], strategy: ClusterStrategy) -> Vec<AncestorGroup> {
    let roots = known_roots(store, roots);
    match strategy {
        ClusterStrategy::Greedy => group_greedy(roots),
        ClusterStrategy::OverlapMerge => group_by_overlap(roots),
    }
}

fn known_roots(store: &PersonStore, roots: &[PersonId]) -> Vec<(PersonId, AncestorSet)> {
    roots
        .iter()
        .filter_map(|id| match store.get(id) {
            Some(person) => Some((id.clone(), person.ancestor_set())),
            None => {
                warn!(person = %id, "root not in store, skipping");
                None
            }
        })
        .collect()
}

/// Single pass in input order.
pub fn group_greedy(roots: Vec<(PersonId, AncestorSet)>) -> Vec<AncestorGroup> {
    let mut groups: Vec<AncestorGroup> = Vec::new();
    for (person, ancestors) in roots {
        let chosen = choose_group(&groups, &ancestors);
        debug!(%person, ?chosen, "greedy assignment");
        match chosen {
            Some(index) => groups[index].merge_person(person, &ancestors),
            None => groups.push(AncestorGroup::new(person, ancestors)),
        }
    }
    groups
}

/// Index of the group whose shared set would shrink least, ignoring groups
/// the person shares nothing with. Ties go to the earliest group.
fn choose_group(groups: &[AncestorGroup], ancestors: &AncestorSet) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for (index, group) in groups.iter().enumerate() {
        let size_after = group.size_after_merge(ancestors);
        if size_after == 0 {
            continue;
        }
        let shrinkage = group.ancestors().len() - size_after;
        if best.map_or(true, |(_, smallest)| shrinkage < smallest) {
            best = Some((index, shrinkage));
        }
    }
    best.map(|(index, _)| index)
}

/// Merge pairs by largest overlap until no two groups share an ancestor.
pub fn group_by_overlap(roots: Vec<(PersonId, AncestorSet)>) -> Vec<AncestorGroup> {
    let groups = roots
        .into_iter()
        .map(|(person, ancestors)| AncestorGroup::new(person, ancestors))
        .collect();
    merge_overlapping(groups)
}

/// Repeatedly merge the pair with the strictly largest positive overlap; ties
/// go to the first pair in scan order. The absorbed group is removed.
pub fn merge_overlapping(mut groups: Vec<AncestorGroup>) -> Vec<AncestorGroup> {
    while let Some((keep, absorb)) = best_pair(&groups) {
        debug!(
            keep = %groups[keep].members[0],
            absorb = %groups[absorb].members[0],
            "merging overlapping groups"
        );
        let absorbed = groups.remove(absorb);
        groups[keep].merge_group(absorbed);
    }
    debug!(groups = groups.len(), "overlap merge finished");
    groups
}

fn best_pair(groups: &[AncestorGroup]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    let mut max_overlap = 0;
    for first in 0..groups.len() {
        for second in first + 1..groups.len() {
            let overlap = intersection_len(groups[first].ancestors(), groups[second].ancestors());
            if overlap > max_overlap {
                max_overlap = overlap;
                best = Some((first, second));
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> AncestorSet {
        ids.iter().map(|id| PersonId::from(*id)).collect()
    }

    fn root(id: &str, ancestors: &[&str]) -> (PersonId, AncestorSet) {
        (PersonId::from(id), set(ancestors))
    }

    fn member_ids(group: &AncestorGroup) -> Vec<&str> {
        group.members().iter().map(PersonId::as_str).collect()
    }

    #[test]
    fn test_greedy_disjoint_sets_split() {
        let groups = group_greedy(vec![root("a", &["x", "y"]), root("b", &["z", "w"])]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_greedy_identical_sets_join() {
        let groups = group_greedy(vec![root("a", &["x", "y"]), root("b", &["x", "y"])]);
        assert_eq!(groups.len(), 1);
        assert_eq!(member_ids(&groups[0]), vec!["a", "b"]);
        assert_eq!(groups[0].ancestors(), &set(&["x", "y"]));
    }

    #[test]
    fn test_greedy_prefers_least_shrinkage() {
        let groups = group_greedy(vec![
            root("a", &["p", "q"]),
            root("b", &["r", "s", "t"]),
            // Shares one with a (shrink 1) and two with b (shrink 1): tie, first wins.
            root("c", &["p", "s", "t"]),
            // Overlaps only b's group.
            root("d", &["s", "t", "u"]),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(member_ids(&groups[0]), vec!["a", "c"]);
        assert_eq!(groups[0].ancestors(), &set(&["p"]));
        assert_eq!(member_ids(&groups[1]), vec!["b", "d"]);
        assert_eq!(groups[1].ancestors(), &set(&["s", "t"]));
    }

    #[test]
    fn test_greedy_person_without_ancestors_stands_alone() {
        let groups = group_greedy(vec![root("a", &["x"]), root("b", &[]), root("c", &["x"])]);
        assert_eq!(groups.len(), 2);
        assert_eq!(member_ids(&groups[0]), vec!["a", "c"]);
        assert_eq!(member_ids(&groups[1]), vec!["b"]);
    }

    #[test]
    fn test_overlap_merge_example() {
        let groups = vec![
            AncestorGroup::new(PersonId::from("A"), set(&["x", "y"])),
            AncestorGroup::new(PersonId::from("B"), set(&["x"])),
            AncestorGroup::new(PersonId::from("C"), set(&["z"])),
        ];
        assert_eq!(best_pair(&groups), Some((0, 1)));

        let merged = merge_overlapping(groups);
        assert_eq!(merged.len(), 2);
        assert_eq!(member_ids(&merged[0]), vec!["A", "B"]);
        assert_eq!(merged[0].ancestors(), &set(&["x"]));
        assert_eq!(member_ids(&merged[1]), vec!["C"]);
    }

    #[test]
    fn test_overlap_merge_picks_largest_overlap() {
        let groups = group_by_overlap(vec![
            root("a", &["p", "q"]),
            root("b", &["p", "r", "s"]),
            root("c", &["p", "r", "s", "t"]),
        ]);
        // b and c share three, merge first; then a joins on p.
        assert_eq!(groups.len(), 1);
        assert_eq!(member_ids(&groups[0]), vec!["a", "b", "c"]);
        assert_eq!(groups[0].ancestors(), &set(&["p"]));
    }

    #[test]
    fn test_shared_set_never_grows() {
        let mut groups = vec![
            AncestorGroup::new(PersonId::from("a"), set(&["1", "2", "3", "4"])),
            AncestorGroup::new(PersonId::from("b"), set(&["2", "3", "4", "5"])),
            AncestorGroup::new(PersonId::from("c"), set(&["3", "4", "6"])),
            AncestorGroup::new(PersonId::from("d"), set(&["4", "7"])),
        ];
        let mut count = groups.len();
        while let Some((keep, absorb)) = best_pair(&groups) {
            let before = groups[keep].ancestors().len().min(groups[absorb].ancestors().len());
            let absorbed = groups.remove(absorb);
            groups[keep].merge_group(absorbed);
            assert!(groups[keep].ancestors().len() <= before);
            assert_eq!(groups.len(), count - 1);
            count = groups.len();
        }
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].ancestors(), &set(&["4"]));
    }

    #[test]
    fn test_merges_in_any_order_only_shrink() {
        use rand::rngs::StdRng;
        use rand::seq::SliceRandom;
        use rand::{Rng, SeedableRng};

        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut roots: Vec<(PersonId, AncestorSet)> = (0..6)
                .map(|n| {
                    let ancestors = (0..12)
                        .filter(|_| rng.random_bool(0.6))
                        .map(|a| PersonId::new(format!("a{a}")))
                        .collect();
                    (PersonId::new(format!("r{n}")), ancestors)
                })
                .collect();
            roots.shuffle(&mut rng);

            let everyone = roots
                .iter()
                .skip(1)
                .fold(roots[0].1.clone(), |shared, (_, ancestors)| intersection(&shared, ancestors));

            let (first, first_ancestors) = roots[0].clone();
            let mut group = AncestorGroup::new(first, first_ancestors);
            for (member, ancestors) in roots.into_iter().skip(1) {
                let before = group.ancestors().clone();
                if rng.random_bool(0.5) {
                    group.merge_person(member, &ancestors);
                } else {
                    group.merge_group(AncestorGroup::new(member, ancestors.clone()));
                }
                assert!(group.ancestors().len() <= before.len(), "seed {seed}");
                assert!(group.ancestors().is_subset(&before), "seed {seed}");
                assert_eq!(group.ancestors(), &intersection(&before, &ancestors), "seed {seed}");
            }
            assert_eq!(group.members().len(), 6);
            assert_eq!(group.ancestors(), &everyone, "seed {seed}");
        }
    }

    #[test]
    fn test_cluster_skips_unknown_roots() {
        let store = PersonStore::new();
        let groups = cluster(&store, &[PersonId::from("ghost")], ClusterStrategy::Greedy);
        assert!(groups.is_empty());
    }
}
