//! # Relations Module
//!
//! Reading parentage out of the source's union records. A union lists its
//! `partners` and `children` as API references; a person's parents are the
//! partners of the union that lists them as a biological child.

use crate::source::API_PREFIX;
use serde_json::Value;

/// Last path segment of an API or web reference, without query string.
///
/// `https://www.geni.com/people/Anna-Berg/6000000012?through=1` → `6000000012`
pub fn isolate_id(reference: &str) -> &str {
    let base = reference.split('?').next().unwrap_or(reference);
    let base = base.trim_end_matches('/');
    base.rsplit('/').next().unwrap_or(base)
}

/// Numeric part of a union reference: `…/union-123` → `123`.
pub fn union_number(reference: &str) -> &str {
    let id = isolate_id(reference);
    match id.split_once('-') {
        Some((_, number)) => number.split('-').next().unwrap_or(number),
        None => id,
    }
}

/// API reference for a profile's alternate id.
pub fn profile_reference(ext_id: &str) -> String {
    format!("{API_PREFIX}{ext_id}")
}

/// Where a merged profile now lives, if it was merged away.
pub fn redirect_target(record: &Value) -> Option<&str> {
    record
        .get("merged_into")
        .and_then(Value::as_str)
        .filter(|target| !target.is_empty())
}

/// Unions in a `/union` reply. Batched replies carry a `results` array; a
/// single union may come back bare.
pub fn union_list(response: &Value) -> Option<Vec<Value>> {
    if let Some(results) = response.get("results").and_then(Value::as_array) {
        return Some(results.clone());
    }
    if response.get("partners").is_some() || response.get("children").is_some() {
        return Some(vec![response.clone()]);
    }
    None
}

/// Partner references of the first union in which `ext_id` is a child that is
/// neither adopted nor fostered.
pub fn resolve_parents(ext_id: &str, unions: &[Value]) -> Option<Vec<String>> {
    let reference = profile_reference(ext_id);
    unions
        .iter()
        .find(|union| {
            lists(union, "children", &reference)
                && !lists(union, "adopted_children", &reference)
                && !lists(union, "foster_children", &reference)
        })
        .map(|union| string_list(union, "partners"))
}

fn lists(union: &Value, key: &str, reference: &str) -> bool {
    union
        .get(key)
        .and_then(Value::as_array)
        .is_some_and(|entries| entries.iter().any(|entry| entry.as_str() == Some(reference)))
}

fn string_list(union: &Value, key: &str) -> Vec<String> {
    union
        .get(key)
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
