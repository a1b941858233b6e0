//! Deserialization helpers for list-valued settings.
//!
//! Every list in the configuration file may be written either as a TOML
//! array or as a single comma-separated string:
//!
//! ```toml
//! table_names = ["sensor_a", "sensor_b"]
//! table_names = "sensor_a, sensor_b"
//! ```
//!
//! Both forms produce the same trimmed sequence. Empty items are dropped.

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    Joined(String),
    List(Vec<String>),
}

/// Split a comma-separated string into trimmed, non-empty items.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Deserialize a list from either a TOML array or a comma-separated string.
pub fn string_or_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let items = match StringOrList::deserialize(deserializer)? {
        StringOrList::Joined(raw) => split_list(&raw),
        StringOrList::List(items) => items
            .iter()
            .map(|item| item.trim())
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
    };

    Ok(items.into_iter().map(T::from).collect())
}
