/*!
 * Ordered-fallback field lookup
 *
 * Input tables and GeoJSON properties name the same field in several ways
 * (`postcode` / `postal_code`, `LSOA21CD` / `LSOA11CD` / `code`, ...). Every
 * such lookup goes through [`first_present`]: the first alias that yields a
 * non-blank value wins.
 */

use std::collections::HashMap;
use csv::StringRecord;
use serde_json::{Map, Value};

/// Ordered list of accepted spellings for one field
pub type FieldAliases = &'static [&'static str];

/// Return the first non-blank value produced by `get` for `keys`, in order
///
/// Values are trimmed before the blank check and returned trimmed.
pub fn first_present<'a, K, F>(keys: &[K], get: F) -> Option<&'a str>
where
    K: AsRef<str>,
    F: FnMut(&str) -> Option<&'a str>,
{
    first_present_raw(keys, get).map(str::trim)
}

/// Like [`first_present`] but returns the winning value as written
pub fn first_present_raw<'a, K, F>(keys: &[K], mut get: F) -> Option<&'a str>
where
    K: AsRef<str>,
    F: FnMut(&str) -> Option<&'a str>,
{
    keys.iter()
        .filter_map(|key| get(key.as_ref()))
        .find(|value| !value.trim().is_empty())
}

/// Header-name index for a CSV file
#[derive(Debug, Clone, Default)]
pub struct RecordFields {
    index: HashMap<String, usize>,
}

impl RecordFields {
    /// Build from a header row; leading BOMs and surrounding whitespace are ignored
    pub fn from_headers(headers: &StringRecord) -> Self {
        let index = headers.iter()
            .enumerate()
            .map(|(i, name)| (name.trim_start_matches('\u{feff}').trim().to_string(), i))
            .collect();
        Self { index }
    }

    /// Whether any alias is present as a column
    pub fn has_any(&self, aliases: FieldAliases) -> bool {
        aliases.iter().any(|alias| self.index.contains_key(*alias))
    }

    /// First non-blank value among the aliases
    pub fn get<'r>(&self, record: &'r StringRecord, aliases: FieldAliases) -> Option<&'r str> {
        first_present(aliases, |alias| {
            self.index.get(alias).and_then(|&i| record.get(i))
        })
    }

    /// First non-blank value among the aliases, untrimmed
    pub fn get_raw<'r>(&self, record: &'r StringRecord, aliases: FieldAliases) -> Option<&'r str> {
        first_present_raw(aliases, |alias| {
            self.index.get(alias).and_then(|&i| record.get(i))
        })
    }

    /// Like [`get`](Self::get) but owned
    pub fn get_string(&self, record: &StringRecord, aliases: FieldAliases) -> Option<String> {
        self.get(record, aliases).map(str::to_string)
    }
}

/// First non-blank string property among the aliases
///
/// Only JSON strings count; numbers and other values are skipped.
pub fn json_string(props: &Map<String, Value>, aliases: FieldAliases) -> Option<String> {
    first_present(aliases, |alias| props.get(alias).and_then(Value::as_str))
        .map(str::to_string)
}

/// First property among the aliases that reads as a float (number or numeric string)
pub fn json_f64(props: &Map<String, Value>, aliases: FieldAliases) -> Option<f64> {
    aliases.iter().find_map(|alias| match props.get(*alias)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}
