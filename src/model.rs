//! # Data Model
//!
//! Person records as they are fetched from the genealogy source or built for
//! synthetic trees, plus the identifiers and sets the rest of the crate passes
//! around.

use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Set of person identifiers; used for ancestor sets and group intersections.
pub type AncestorSet = hashbrown::HashSet<PersonId, FxBuildHasher>;

/// Primary identifier of a person (the source's `guid`, or a caller-chosen id
/// for synthetic records).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub String);

impl PersonId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PersonId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PersonId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Gender {
    fn from_attribute(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("male") => Gender::Male,
            Some("female") => Gender::Female,
            _ => Gender::Unknown,
        }
    }
}

/// A person node in the parentage graph.
///
/// Owned by [`crate::store::PersonStore`]; other components refer to persons
/// by [`PersonId`] only.
#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    id: PersonId,
    ext_id: Option<String>,
    name: String,
    birth_year: Option<i32>,
    gender: Gender,
    father: Option<PersonId>,
    mother: Option<PersonId>,
    /// Raw payload from the source, passed through unchanged apart from the
    /// mirrored `father`/`mother` keys.
    attributes: Value,
    /// External parent references, once resolved from the person's unions.
    parents: Option<Vec<String>>,
    /// Memoized ancestor set. Computed once; never invalidated.
    ancestors: Option<AncestorSet>,
    /// Markers for synthetic-tree experiments.
    pub markers: BTreeSet<String>,
}

impl Person {
    /// Build a person from a raw attribute payload.
    pub fn new(id: impl Into<PersonId>, attributes: Value) -> Self {
        let ext_id = attributes
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let name = attributes
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let father = attributes
            .get("father")
            .and_then(Value::as_str)
            .map(PersonId::from);
        let mother = attributes
            .get("mother")
            .and_then(Value::as_str)
            .map(PersonId::from);

        Self {
            id: id.into(),
            ext_id,
            name,
            birth_year: birth_year_of(&attributes),
            gender: Gender::from_attribute(attributes.get("gender")),
            father,
            mother,
            attributes,
            parents: None,
            ancestors: None,
            markers: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> &PersonId {
        &self.id
    }

    /// The source's own identifier (`profile-…`), used for de-duplication.
    pub fn ext_id(&self) -> Option<&str> {
        self.ext_id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn birth_year(&self) -> Option<i32> {
        self.birth_year
    }

    pub fn gender(&self) -> Gender {
        self.gender
    }

    pub fn father(&self) -> Option<&PersonId> {
        self.father.as_ref()
    }

    pub fn mother(&self) -> Option<&PersonId> {
        self.mother.as_ref()
    }

    pub fn has_known_parent(&self) -> bool {
        self.father.is_some() || self.mother.is_some()
    }

    pub fn attributes(&self) -> &Value {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Union references listed on the record, in source order.
    pub fn unions(&self) -> Vec<String> {
        self.attributes
            .get("unions")
            .and_then(Value::as_array)
            .map(|unions| {
                unions
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn parents(&self) -> Option<&[String]> {
        self.parents.as_deref()
    }

    pub fn set_parents(&mut self, parents: Vec<String>) {
        self.parents = Some(parents);
    }

    /// Link a father. Callers go through [`crate::store::PersonStore::set_father`],
    /// which checks that the referenced record exists.
    pub(crate) fn set_father(&mut self, father: PersonId) {
        self.write_attribute("father", Value::String(father.0.clone()));
        self.father = Some(father);
    }

    pub(crate) fn set_mother(&mut self, mother: PersonId) {
        self.write_attribute("mother", Value::String(mother.0.clone()));
        self.mother = Some(mother);
    }

    /// Drop the father link, e.g. when it names a record that does not exist.
    pub(crate) fn clear_father(&mut self) {
        self.remove_attribute("father");
        self.father = None;
    }

    pub(crate) fn clear_mother(&mut self) {
        self.remove_attribute("mother");
        self.mother = None;
    }

    /// The memoized ancestor set, or `None` if it has not been computed yet.
    /// An uncomputed set reads as empty everywhere it is consumed.
    pub fn ancestors(&self) -> Option<&AncestorSet> {
        self.ancestors.as_ref()
    }

    /// Owned copy of the ancestor set; empty when not computed.
    pub fn ancestor_set(&self) -> AncestorSet {
        self.ancestors.clone().unwrap_or_default()
    }

    pub(crate) fn set_ancestors(&mut self, ancestors: AncestorSet) {
        self.ancestors = Some(ancestors);
    }

    pub fn to_entry(&self) -> PersonEntry {
        PersonEntry {
            id: self.id.clone(),
            parents: self.parents.clone(),
            attributes: self.attributes.clone(),
            markers: self.markers.clone(),
        }
    }

    pub fn from_entry(id: PersonId, entry: PersonEntry) -> Self {
        let mut person = Person::new(id, entry.attributes);
        person.parents = entry.parents;
        person.markers = entry.markers;
        person
    }

    fn remove_attribute(&mut self, key: &str) {
        if let Some(object) = self.attributes.as_object_mut() {
            object.remove(key);
        }
    }

    fn write_attribute(&mut self, key: &str, value: Value) {
        if !self.attributes.is_object() {
            self.attributes = Value::Object(Map::new());
        }
        if let Some(object) = self.attributes.as_object_mut() {
            object.insert(key.to_string(), value);
        }
    }
}

/// Serialized form of a person inside a store snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonEntry {
    pub id: PersonId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<String>>,
    #[serde(default)]
    pub attributes: Value,
    #[serde(default)]
    pub markers: BTreeSet<String>,
}

/// `birth.date.year` on source records; a bare number on synthetic ones.
fn birth_year_of(attributes: &Value) -> Option<i32> {
    let birth = attributes.get("birth")?;
    if let Some(year) = birth.as_i64() {
        return i32::try_from(year).ok();
    }
    let year = birth.get("date")?.get("year")?;
    match year {
        Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
