//! # Frontier Pruning
//!
//! Reduces a group's shared ancestors to the most specific ones: those that
//! are not themselves an ancestor of another shared ancestor.

use crate::model::{AncestorSet, Person};
use crate::store::PersonStore;
use crate::utils::{difference, is_subset, union_into};
use tracing::{debug, warn};

/// Shared ancestors minus everything implied by another shared ancestor's
/// own ancestry. Falls back to the full input when nothing would remain.
pub fn frontier(store: &PersonStore, shared: &AncestorSet) -> AncestorSet {
    let mut redundant = AncestorSet::default();
    for id in shared {
        match store.get(id).and_then(Person::ancestors) {
            Some(ancestors) => union_into(&mut redundant, ancestors),
            None if !store.contains(id) => warn!(person = %id, "shared ancestor not in store"),
            None => {}
        }
    }

    if !is_subset(&redundant, shared) {
        // Upstream inconsistency, not a pruning failure.
        warn!(
            redundant = redundant.len(),
            shared = shared.len(),
            "ancestors of shared ancestors are missing from the shared set"
        );
    }

    let edge = difference(shared, &redundant);
    if edge.is_empty() {
        debug!(shared = shared.len(), "no frontier ancestors, keeping full set");
        return shared.clone();
    }
    edge
}

/// [`frontier`] resolved to person records, ordered by id.
pub fn frontier_persons<'a>(store: &'a PersonStore, shared: &AncestorSet) -> Vec<&'a Person> {
    let mut persons: Vec<&Person> = frontier(store, shared)
        .iter()
        .filter_map(|id| store.get(id))
        .collect();
    persons.sort_by(|a, b| a.id().cmp(b.id()));
    persons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PersonId;
    use serde_json::json;

    fn set(ids: &[&str]) -> AncestorSet {
        ids.iter().map(|id| PersonId::from(*id)).collect()
    }

    /// X and Y (parents of Z), Z and W (parents of V).
    fn store() -> PersonStore {
        let mut store = PersonStore::new();
        store.insert(Person::new("X", json!({"birth": 0, "gender": "male"})));
        store.insert(Person::new("Y", json!({"birth": 0, "gender": "female"})));
        store.insert(Person::new("Z", json!({"birth": 1, "father": "X", "mother": "Y", "gender": "male"})));
        store.insert(Person::new("W", json!({"birth": 1, "gender": "female"})));
        store.insert(Person::new("V", json!({"birth": 2, "father": "Z", "mother": "W"})));
        store.compute_all_ancestors();
        store
    }

    #[test]
    fn test_unrelated_ancestors_kept() {
        let store = store();
        assert_eq!(frontier(&store, &set(&["X", "Y"])), set(&["X", "Y"]));
    }

    #[test]
    fn test_implied_ancestors_removed() {
        let store = store();
        // X and Y are implied by Z.
        assert_eq!(frontier(&store, &set(&["X", "Y", "Z", "W"])), set(&["Z", "W"]));
        assert_eq!(frontier(&store, &set(&["X", "Y", "Z"])), set(&["Z"]));
    }

    #[test]
    fn test_empty_result_falls_back_to_input() {
        let mut store = PersonStore::new();
        store.insert(Person::new("A", json!({})));
        store.insert(Person::new("B", json!({})));
        store.set_father(&PersonId::from("A"), &PersonId::from("B")).unwrap();
        store.set_father(&PersonId::from("B"), &PersonId::from("A")).unwrap();
        store.compute_all_ancestors();
        // Each implies the other; nothing would remain.
        let shared = set(&["A", "B"]);
        assert_eq!(frontier(&store, &shared), shared);
    }

    #[test]
    fn test_non_subset_is_tolerated() {
        let store = store();
        // Z's parents are not in the shared set; still prunes nothing wrongly.
        assert_eq!(frontier(&store, &set(&["Z", "W"])), set(&["Z", "W"]));
    }

    #[test]
    fn test_unknown_ids_pass_through() {
        let store = store();
        assert_eq!(frontier(&store, &set(&["ghost", "Z", "X"])), set(&["ghost", "Z"]));
    }

    #[test]
    fn test_frontier_persons() {
        let store = store();
        let persons = frontier_persons(&store, &set(&["X", "Y", "Z", "W"]));
        let ids: Vec<&str> = persons.iter().map(|p| p.id().as_str()).collect();
        assert_eq!(ids, vec!["W", "Z"]);
    }
}
