//! Normalization of the user's `entry` field.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{Error, Result};

/// Entry names mapped to the files they bundle.
pub type EntryMap = BTreeMap<String, Vec<String>>;

/// Name given to a single unnamed entry.
pub const DEFAULT_ENTRY_NAME: &str = "main";

/// The `entry` field as described by the config loader.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum RawEntry {
    Path(String),
    List(Vec<String>),
    Map(BTreeMap<String, EntryPoint>),
    /// Result of invoking a producer function once. `None` when it produced nothing.
    Deferred(Option<Box<RawEntry>>),
    /// Any other shape; carries the JS type name.
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum EntryPoint {
    One(String),
    Many(Vec<String>),
}

impl EntryPoint {
    fn into_paths(self) -> Vec<String> {
        match self {
            EntryPoint::One(path) => vec![path],
            EntryPoint::Many(paths) => paths,
        }
    }
}

/// Convert the user's entry into a name → paths map.
pub fn normalize(entry: Option<RawEntry>) -> Result<EntryMap> {
    let entry = match entry {
        None => return Ok(EntryMap::new()),
        Some(RawEntry::Deferred(None)) => return Ok(EntryMap::new()),
        Some(RawEntry::Deferred(Some(resolved))) => *resolved,
        Some(entry) => entry,
    };

    match entry {
        RawEntry::Path(path) => Ok(EntryMap::from([(DEFAULT_ENTRY_NAME.to_string(), vec![path])])),
        RawEntry::List(paths) => Ok(EntryMap::from([(DEFAULT_ENTRY_NAME.to_string(), paths)])),
        RawEntry::Map(points) => Ok(points
            .into_iter()
            .map(|(name, point)| (name, point.into_paths()))
            .collect()),
        RawEntry::Deferred(_) => Err(Error::UnsupportedEntryType("function".to_string())),
        RawEntry::Other(kind) => Err(Error::UnsupportedEntryType(kind)),
    }
}
