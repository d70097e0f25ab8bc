//! # Utilities Module
//!
//! Set operations shared by clustering and frontier pruning.
//!
//! Written against `hashbrown::HashSet<T, S>` for any hashable id so the
//! ancestor-set code never depends on a concrete element type.

use hashbrown::HashSet;
use std::hash::{BuildHasher, Hash};

/// Elements present in both sets.
pub fn intersection<T, S>(left: &HashSet<T, S>, right: &HashSet<T, S>) -> HashSet<T, S>
where
    T: Eq + Hash + Clone,
    S: BuildHasher + Default,
{
    // Iterate the smaller side.
    let (small, large) = if left.len() <= right.len() {
        (left, right)
    } else {
        (right, left)
    };
    small
        .iter()
        .filter(|item| large.contains(*item))
        .cloned()
        .collect()
}

/// Size of the intersection without materializing it.
pub fn intersection_len<T, S>(left: &HashSet<T, S>, right: &HashSet<T, S>) -> usize
where
    T: Eq + Hash,
    S: BuildHasher,
{
    let (small, large) = if left.len() <= right.len() {
        (left, right)
    } else {
        (right, left)
    };
    small.iter().filter(|item| large.contains(*item)).count()
}

/// Add every element of `other` to `target`.
pub fn union_into<T, S>(target: &mut HashSet<T, S>, other: &HashSet<T, S>)
where
    T: Eq + Hash + Clone,
    S: BuildHasher,
{
    target.extend(other.iter().cloned());
}

/// Elements of `left` that are not in `right`.
pub fn difference<T, S>(left: &HashSet<T, S>, right: &HashSet<T, S>) -> HashSet<T, S>
where
    T: Eq + Hash + Clone,
    S: BuildHasher + Default,
{
    left.iter()
        .filter(|item| !right.contains(*item))
        .cloned()
        .collect()
}

pub fn is_subset<T, S>(inner: &HashSet<T, S>, outer: &HashSet<T, S>) -> bool
where
    T: Eq + Hash,
    S: BuildHasher,
{
    inner.len() <= outer.len() && inner.iter().all(|item| outer.contains(item))
}
