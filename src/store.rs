//! # Store Module
//!
//! Owns every [`Person`], indexes them by primary id and by the source's
//! alternate id, and computes memoized ancestor sets.

use crate::model::{AncestorSet, Gender, Person, PersonEntry, PersonId};
use anyhow::{anyhow, Result};
use hashbrown::hash_map::Entry;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Store handle shared between the tree builder and its concurrent branches.
/// Guards are never held across an `.await`.
pub type SharedStore = Arc<Mutex<PersonStore>>;

/// Filter for [`PersonStore::with_birth_year_and_gender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenderFilter {
    All,
    Only(Gender),
}

/// Full-store snapshot: `{"persons": {<id>: {...}}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub persons: BTreeMap<PersonId, PersonEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct PersonStore {
    persons: HashMap<PersonId, Person>,
    /// Alternate (source) id -> primary id
    by_ext_id: HashMap<String, PersonId>,
}

impl PersonStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(Mutex::new(self))
    }

    pub fn len(&self) -> usize {
        self.persons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.persons.is_empty()
    }

    pub fn clear(&mut self) {
        self.persons.clear();
        self.by_ext_id.clear();
    }

    /// Add a person, replacing any record with the same primary id. Parent
    /// links naming records that are not in the store are dropped.
    pub fn insert(&mut self, mut person: Person) -> &mut Person {
        let (father, mother) = self.dangling_links(&person);
        if father {
            warn!(person = %person.id(), "father not in store, dropping link");
            person.clear_father();
        }
        if mother {
            warn!(person = %person.id(), "mother not in store, dropping link");
            person.clear_mother();
        }
        self.insert_unchecked(person)
    }

    fn insert_unchecked(&mut self, person: Person) -> &mut Person {
        // The replaced record's own alternate id no longer names this person.
        let stale = self
            .persons
            .get(person.id())
            .and_then(Person::ext_id)
            .filter(|old| person.ext_id() != Some(*old))
            .map(str::to_string);
        if let Some(old) = stale {
            if self.by_ext_id.get(&old) == Some(person.id()) {
                self.by_ext_id.remove(&old);
            }
        }
        if let Some(ext_id) = person.ext_id() {
            self.by_ext_id
                .insert(ext_id.to_string(), person.id().clone());
        }
        match self.persons.entry(person.id().clone()) {
            Entry::Occupied(mut slot) => {
                slot.insert(person);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(person),
        }
    }

    /// Insert a record built from `attributes` unless one with the same
    /// alternate id already exists. Returns the primary id of the stored record
    /// and whether it was newly inserted.
    pub fn insert_or_get_by_ext_id(&mut self, id: PersonId, attributes: Value) -> (PersonId, bool) {
        let person = Person::new(id, attributes);
        if let Some(existing) = person.ext_id().and_then(|ext_id| self.by_ext_id.get(ext_id)) {
            return (existing.clone(), false);
        }
        if let Some(existing) = self.persons.get(person.id()) {
            return (existing.id().clone(), false);
        }
        let id = person.id().clone();
        self.insert(person);
        (id, true)
    }

    /// Map an additional alternate id (e.g. a merged-away profile) onto an
    /// existing record.
    pub fn add_ext_alias(&mut self, ext_id: impl Into<String>, id: &PersonId) -> bool {
        if !self.persons.contains_key(id) {
            return false;
        }
        self.by_ext_id.insert(ext_id.into(), id.clone());
        true
    }

    pub fn get(&self, id: &PersonId) -> Option<&Person> {
        self.persons.get(id)
    }

    pub fn get_mut(&mut self, id: &PersonId) -> Option<&mut Person> {
        self.persons.get_mut(id)
    }

    pub fn contains(&self, id: &PersonId) -> bool {
        self.persons.contains_key(id)
    }

    pub fn get_by_ext_id(&self, ext_id: &str) -> Option<&Person> {
        self.by_ext_id
            .get(ext_id)
            .and_then(|id| self.persons.get(id))
    }

    pub fn id_for_ext_id(&self, ext_id: &str) -> Option<PersonId> {
        self.get_by_ext_id(ext_id).map(|person| person.id().clone())
    }

    pub fn persons(&self) -> impl Iterator<Item = &Person> {
        self.persons.values()
    }

    /// Link `father` as the father of `child`. Both records must exist.
    pub fn set_father(&mut self, child: &PersonId, father: &PersonId) -> Result<()> {
        if !self.persons.contains_key(father) {
            return Err(anyhow!("father {father} is not in the store"));
        }
        let person = self
            .persons
            .get_mut(child)
            .ok_or_else(|| anyhow!("child {child} is not in the store"))?;
        person.set_father(father.clone());
        Ok(())
    }

    /// Link `mother` as the mother of `child`. Both records must exist.
    pub fn set_mother(&mut self, child: &PersonId, mother: &PersonId) -> Result<()> {
        if !self.persons.contains_key(mother) {
            return Err(anyhow!("mother {mother} is not in the store"));
        }
        let person = self
            .persons
            .get_mut(child)
            .ok_or_else(|| anyhow!("child {child} is not in the store"))?;
        person.set_mother(mother.clone());
        Ok(())
    }

    pub fn set_parents(&mut self, id: &PersonId, parents: Vec<String>) -> Result<()> {
        let person = self
            .persons
            .get_mut(id)
            .ok_or_else(|| anyhow!("person {id} is not in the store"))?;
        person.set_parents(parents);
        Ok(())
    }

    /// Ancestor set of `id`, computing (and memoizing) it if needed.
    pub fn ensure_ancestors(&mut self, id: &PersonId) -> Option<&AncestorSet> {
        let mut in_progress = HashSet::new();
        self.fill_ancestors(id, &mut in_progress);
        self.persons.get(id).and_then(Person::ancestors)
    }

    /// Owned ancestor set of `id`; empty when unknown or not yet computed.
    pub fn ancestors(&self, id: &PersonId) -> AncestorSet {
        self.persons
            .get(id)
            .map(Person::ancestor_set)
            .unwrap_or_default()
    }

    /// Compute ancestor sets for every record that lacks one. Returns how many
    /// records were filled in.
    pub fn compute_all_ancestors(&mut self) -> usize {
        let pending: Vec<PersonId> = self
            .persons
            .values()
            .filter(|person| person.ancestors().is_none())
            .map(|person| person.id().clone())
            .collect();
        debug!(pending = pending.len(), "computing ancestor sets");

        let mut in_progress = HashSet::new();
        for id in &pending {
            self.fill_ancestors(id, &mut in_progress);
        }
        pending.len()
    }

    /// Depth-first over father then mother. A record met again while its own
    /// computation is still running (a cycle in corrupt data) contributes
    /// nothing.
    fn fill_ancestors(&mut self, id: &PersonId, in_progress: &mut HashSet<PersonId>) {
        let (father, mother) = match self.persons.get(id) {
            Some(person) if person.ancestors().is_none() => {
                (person.father().cloned(), person.mother().cloned())
            }
            _ => return,
        };
        if !in_progress.insert(id.clone()) {
            return;
        }

        let mut ancestors = AncestorSet::default();
        for parent_id in [father, mother].into_iter().flatten() {
            self.fill_ancestors(&parent_id, in_progress);
            if let Some(parent) = self.persons.get(&parent_id) {
                if let Some(parent_ancestors) = parent.ancestors() {
                    ancestors.extend(parent_ancestors.iter().cloned());
                }
                ancestors.insert(parent_id);
            }
        }

        in_progress.remove(id);
        if let Some(person) = self.persons.get_mut(id) {
            person.set_ancestors(ancestors);
        }
    }

    /// Every record with the given birth year and gender.
    pub fn with_birth_year_and_gender(&self, year: i32, filter: GenderFilter) -> Vec<&Person> {
        let mut result: Vec<&Person> = self
            .persons
            .values()
            .filter(|person| person.birth_year() == Some(year))
            .filter(|person| match filter {
                GenderFilter::All => true,
                GenderFilter::Only(gender) => person.gender() == gender,
            })
            .collect();
        result.sort_by(|a, b| a.id().cmp(b.id()));
        result
    }

    pub fn to_snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            persons: self
                .persons
                .iter()
                .map(|(id, person)| (id.clone(), person.to_entry()))
                .collect(),
        }
    }

    /// Add every record in `snapshot` to this store. Links to records absent
    /// from both the snapshot and the store are dropped.
    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        for (id, entry) in snapshot.persons {
            self.insert_unchecked(Person::from_entry(id, entry));
        }

        let dangling: Vec<(PersonId, bool, bool)> = self
            .persons
            .values()
            .map(|person| {
                let (father, mother) = self.dangling_links(person);
                (person.id().clone(), father, mother)
            })
            .filter(|(_, father, mother)| *father || *mother)
            .collect();
        for (id, father, mother) in dangling {
            warn!(person = %id, father, mother, "snapshot names missing parents, dropping links");
            if let Some(person) = self.persons.get_mut(&id) {
                if father {
                    person.clear_father();
                }
                if mother {
                    person.clear_mother();
                }
            }
        }
    }

    /// Whether `person`'s father and mother links name missing records.
    fn dangling_links(&self, person: &Person) -> (bool, bool) {
        let missing = |parent: Option<&PersonId>| {
            parent.is_some_and(|parent| !self.persons.contains_key(parent))
        };
        (missing(person.father()), missing(person.mother()))
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let mut store = Self::new();
        store.restore(snapshot);
        store
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_snapshot())?)
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        let snapshot: StoreSnapshot = serde_json::from_str(data)?;
        Ok(Self::from_snapshot(snapshot))
    }
}
