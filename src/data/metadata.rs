//! Metadata recovered from scan file paths and file headers.
//!
//! Instrument software encodes scan settings in file and directory names,
//! e.g. `.../Ind_3_30K_2Dscan_MirrorY_MirrorZ.dat`. Path tokens are matched
//! against [`FilepathKeywords`] rules; header lines of the form
//! `key: value` add further entries.

use std::collections::BTreeMap;

use crate::config::{FilepathKeywords, InsideElementRule};
use crate::data::model::Value;

/// Tag → value pairs describing one file.
pub type Metadata = BTreeMap<String, Value>;

/// Apply the keyword rules to the tokens of `filepath`.
///
/// The path is split on `_` after mapping path separators (`/` and `\`)
/// to `__`, spaces to `_` and `.dat` to `_`. The result also carries the path itself under
/// `Filepath`.
pub fn analyze_scan_filepath(filepath: &str, keywords: &FilepathKeywords) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("Filepath".to_string(), Value::from(filepath));

    let normalized = filepath
        .replace(['\\', '/'], "__")
        .replace(' ', "_")
        .replace(".dat", "_");

    let mut pending_tags: Vec<String> = Vec::new();
    for element in normalized.split('_') {
        if !pending_tags.is_empty() {
            let tag = pending_tags.remove(0);
            metadata.insert(tag, next_element_value(element, keywords));
        } else if let Some(rule) = keywords.next_element.iter().rev().find(|r| r.key == element) {
            pending_tags = rule.tags.clone();
        }

        for rule in &keywords.this_element {
            if rule.key == element {
                metadata.insert(rule.tag.clone(), rule.value.clone());
            }
        }

        // longest contained key wins: "0Vcm" is 0 "Vcm", not 0 "V" + "cm"
        let best = keywords
            .inside_element
            .iter()
            .filter(|r| !r.key.is_empty() && element.contains(r.key.as_str()))
            .fold(None, |best: Option<&InsideElementRule>, r| match best {
                Some(b) if b.key.len() >= r.key.len() => Some(b),
                _ => Some(r),
            });
        if let Some(rule) = best {
            if let Ok(v) = element.replace(rule.key.as_str(), "").parse::<f64>() {
                metadata.insert(rule.tag.clone(), Value::Float(v));
            }
        }
    }
    metadata
}

/// Value of a token following a `next_element` keyword: numeric if it
/// parses, possibly after removing a unit suffix known to the
/// `inside_element` rules; the raw token otherwise.
fn next_element_value(element: &str, keywords: &FilepathKeywords) -> Value {
    if let Ok(v) = element.parse::<f64>() {
        return Value::Float(v);
    }
    let mut stripped = element;
    for rule in &keywords.inside_element {
        if let Some(rest) = element.strip_suffix(rule.key.as_str()) {
            stripped = rest;
        }
    }
    match stripped.parse::<f64>() {
        Ok(v) => Value::Float(v),
        Err(_) => Value::from(element),
    }
}

/// Collect `key: value` pairs from header text.
///
/// Only lines with exactly one colon count; keys and values are trimmed and
/// kept as strings.
pub fn analyze_header(text: &str) -> Metadata {
    let mut metadata = Metadata::new();
    merge_header(text, &mut metadata);
    metadata
}

/// Like [`analyze_header`], adding to (and overwriting in) `metadata`.
pub fn merge_header(text: &str, metadata: &mut Metadata) {
    for line in text.lines() {
        let mut parts = line.split(':');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        metadata.insert(key.to_string(), Value::from(value.trim()));
    }
}
