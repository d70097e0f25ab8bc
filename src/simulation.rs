//! Synthetic family trees for checking how well common-ancestor search
//! recovers the origin of an inherited marker.
//!
//! Birth year doubles as the generation index: progenitors are born in year
//! 0, their children in year 1, and so on.

use crate::config::DEFAULT_MARKER_INHERIT_PROBABILITY;
use crate::model::{AncestorSet, Gender, Person, PersonId};
use crate::store::{GenderFilter, PersonStore};
use crate::utils::intersection;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Marker placed on the first male progenitor.
pub const PROGENITOR_MARKER: &str = "Mark";

#[derive(Debug, Clone, PartialEq)]
pub struct TreeShape {
    /// Progenitors; half male, half female
    pub starting_population: usize,
    /// Generations including the progenitors
    pub generations: u32,
    pub children_per_couple: usize,
    /// Chance that a child inherits each of a parent's markers
    pub inherit_probability: f64,
}

impl Default for TreeShape {
    fn default() -> Self {
        Self {
            starting_population: 20,
            generations: 6,
            children_per_couple: 3,
            inherit_probability: DEFAULT_MARKER_INHERIT_PROBABILITY,
        }
    }
}

/// What the marked persons of the last generation have in common.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerOutcome {
    /// Nobody in the last generation carries the marker.
    DiedOut,
    /// Fewer than two carriers; nothing to intersect.
    TooFew(usize),
    Candidates {
        marked: usize,
        /// Ancestors shared by every carrier
        candidates: AncestorSet,
    },
}

/// Build a tree of the given shape. The same seed gives the same tree.
pub fn build_test_tree(shape: &TreeShape, seed: u64) -> PersonStore {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut store = PersonStore::new();

    for i in 1..=shape.starting_population / 2 {
        for (prefix, gender) in [("progM", "male"), ("progF", "female")] {
            let name = format!("{prefix}{i}");
            store.insert(Person::new(
                name.as_str(),
                json!({"name": &name, "gender": gender, "birth": 0}),
            ));
        }
    }
    if let Some(person) = store.get_mut(&PersonId::from("progM1")) {
        person.markers.insert(PROGENITOR_MARKER.to_string());
    }

    for generation in 1..shape.generations {
        add_generation(&mut store, &mut rng, shape, generation as i32);
    }
    info!(persons = store.len(), generations = shape.generations, "test tree built");
    store
}

fn add_generation(store: &mut PersonStore, rng: &mut StdRng, shape: &TreeShape, generation: i32) {
    let ids = |store: &PersonStore, gender| -> Vec<PersonId> {
        store
            .with_birth_year_and_gender(generation - 1, GenderFilter::Only(gender))
            .into_iter()
            .map(|person| person.id().clone())
            .collect()
    };
    let mut fathers = ids(&*store, Gender::Male);
    let mut mothers = ids(&*store, Gender::Female);
    fathers.shuffle(rng);
    mothers.shuffle(rng);
    debug!(generation, couples = fathers.len().min(mothers.len()), "adding generation");

    let probability = shape.inherit_probability.clamp(0.0, 1.0);
    let mut child_number = 1;
    for (father, mother) in fathers.iter().zip(&mothers) {
        let parent_markers: Vec<String> = [father, mother]
            .into_iter()
            .filter_map(|id| store.get(id))
            .flat_map(|parent| parent.markers.iter().cloned())
            .collect();

        for _ in 0..shape.children_per_couple {
            let name = format!("gen{generation}child{child_number}");
            let gender = if child_number % 2 == 0 { "female" } else { "male" };
            let markers: BTreeSet<String> = parent_markers
                .iter()
                .filter(|_| rng.random_bool(probability))
                .cloned()
                .collect();
            let child = store.insert(Person::new(
                name.as_str(),
                json!({
                    "name": &name,
                    "birth": generation,
                    "father": father.as_str(),
                    "mother": mother.as_str(),
                    "gender": gender,
                }),
            ));
            child.markers = markers;
            child_number += 1;
        }
    }
}

/// Intersect the ancestor sets of everyone in the last generation carrying
/// `marker`. Computes missing ancestor sets first.
pub fn marker_candidates(store: &mut PersonStore, generations: u32, marker: &str) -> MarkerOutcome {
    store.compute_all_ancestors();
    let last_generation = generations as i32 - 1;
    let marked: Vec<&Person> = store
        .with_birth_year_and_gender(last_generation, GenderFilter::All)
        .into_iter()
        .filter(|person| person.markers.contains(marker))
        .collect();

    match marked.as_slice() {
        [] => MarkerOutcome::DiedOut,
        [_] => MarkerOutcome::TooFew(1),
        [first, rest @ ..] => {
            let candidates = rest.iter().fold(first.ancestor_set(), |shared, person| {
                intersection(&shared, &person.ancestor_set())
            });
            MarkerOutcome::Candidates {
                marked: marked.len(),
                candidates,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(population: usize, generations: u32, children: usize, probability: f64) -> TreeShape {
        TreeShape {
            starting_population: population,
            generations,
            children_per_couple: children,
            inherit_probability: probability,
        }
    }

    #[test]
    fn test_tree_size_and_naming() {
        let store = build_test_tree(&shape(4, 3, 2, 0.45), 7);
        // 4 progenitors, then 2 couples x 2 children in each later generation.
        assert_eq!(store.len(), 12);
        assert!(store.contains(&PersonId::from("progF2")));
        let child = store.get(&PersonId::from("gen2child4")).unwrap();
        assert_eq!(child.birth_year(), Some(2));
        assert_eq!(child.gender(), Gender::Female);
        assert!(child.father().unwrap().as_str().starts_with("gen1child"));
    }

    #[test]
    fn test_same_seed_same_tree() {
        let a = build_test_tree(&shape(6, 4, 2, 0.5), 99).to_snapshot();
        let b = build_test_tree(&shape(6, 4, 2, 0.5), 99).to_snapshot();
        assert_eq!(a, b);
    }

    #[test]
    fn test_marker_dies_without_inheritance() {
        let mut store = build_test_tree(&shape(4, 3, 2, 0.0), 1);
        assert!(store
            .get(&PersonId::from("progM1"))
            .unwrap()
            .markers
            .contains(PROGENITOR_MARKER));
        assert_eq!(marker_candidates(&mut store, 3, PROGENITOR_MARKER), MarkerOutcome::DiedOut);
    }

    #[test]
    fn test_single_carrier_is_too_few() {
        let mut store = build_test_tree(&shape(2, 2, 1, 1.0), 1);
        assert_eq!(marker_candidates(&mut store, 2, PROGENITOR_MARKER), MarkerOutcome::TooFew(1));
    }

    #[test]
    fn test_carriers_share_progenitor() {
        let mut store = build_test_tree(&shape(2, 3, 2, 1.0), 3);
        let outcome = marker_candidates(&mut store, 3, PROGENITOR_MARKER);
        let expected: AncestorSet = ["progM1", "progF1", "gen1child1", "gen1child2"]
            .into_iter()
            .map(PersonId::from)
            .collect();
        assert_eq!(
            outcome,
            MarkerOutcome::Candidates {
                marked: 2,
                candidates: expected
            }
        );
    }
}
