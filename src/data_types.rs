/*!
 * Data type definitions for practice, population and area records
 *
 * Raw rows are parsed once at the input boundary into the `*Row` types below;
 * everything downstream works on these typed values.
 */

use std::collections::HashMap;
use std::fmt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::constants::UNKNOWN;

/// Normalise a postcode: uppercase with all whitespace removed
///
/// Idempotent: `normalize_postcode(&normalize_postcode(x)) == normalize_postcode(x)`.
pub fn normalize_postcode(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Tri-state availability flag for a patient group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    Yes,
    No,
    #[default]
    Unknown,
}

impl Availability {
    /// Parse a free-text flag; anything unrecognised is `Unknown`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "yes" | "y" | "true" | "1" => Availability::Yes,
            "no" | "n" | "false" | "0" => Availability::No,
            _ => Availability::Unknown,
        }
    }

    /// Whether the flag carries information
    pub fn is_known(&self) -> bool {
        !matches!(self, Availability::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Availability::Yes => "yes",
            Availability::No => "no",
            Availability::Unknown => UNKNOWN,
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the practice directory
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PracticeRow {
    pub practice_id: String,
    pub practice_name: String,
    pub address: String,
    pub postcode: String,
    pub lat: Option<String>,
    pub lon: Option<String>,
    /// Source-supplied area hint, usually a namespaced fine-area code
    pub area_code: Option<String>,
}

/// One row of the availability table
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityRow {
    pub practice_id: String,
    pub accepting_adults: Availability,
    pub accepting_children: Availability,
}

/// Availability rows indexed by practice id (later rows win)
#[derive(Debug, Clone, Default)]
pub struct AvailabilityIndex {
    by_practice: HashMap<String, AvailabilityRow>,
}

impl AvailabilityIndex {
    pub fn from_rows<I: IntoIterator<Item = AvailabilityRow>>(rows: I) -> Self {
        let by_practice = rows.into_iter()
            .map(|row| (row.practice_id.trim().to_string(), row))
            .collect();
        Self { by_practice }
    }

    pub fn get(&self, practice_id: &str) -> Option<&AvailabilityRow> {
        self.by_practice.get(practice_id)
    }

    pub fn len(&self) -> usize {
        self.by_practice.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_practice.is_empty()
    }
}

/// Population counts of one fine area
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PopulationRow {
    /// Fine-area code, usually namespaced (`LSOA::E01000001`)
    pub area_code: String,
    /// Fine-area display name (`Wandsworth 026B`)
    pub area_name: String,
    pub population_total: u64,
    pub population_adults: u64,
    pub population_children: u64,
}

/// Deprivation decile of one fine area
#[derive(Debug, Clone, PartialEq)]
pub struct DeprivationRow {
    pub area_code: String,
    /// 1 = most deprived, 10 = least deprived
    pub imd_decile: u8,
}

/// One row of the bulk postcode lookup table
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRow {
    pub postcode: String,
    pub lat: f64,
    pub lon: f64,
    pub area_code: String,
}

/// A boundary feature as read from a GeoJSON file
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryRow {
    pub code: Option<String>,
    pub name: Option<String>,
    pub geometry: serde_json::Value,
}

/// Where a practice's coordinates came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeOrigin {
    /// Coordinates supplied on the practice row itself
    Source,
    Cache,
    BulkLookup,
    LiveLookup,
}

/// A successful geocode
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeHit {
    pub lat: f64,
    pub lon: f64,
    /// Canonical fine-area key, or the raw source hint when it is not canonical
    pub area_code: Option<String>,
    pub origin: GeocodeOrigin,
}

/// An accepted dental practice
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Practice {
    pub practice_id: String,
    pub practice_name: String,
    pub address: String,
    /// Trimmed, uppercased postcode as supplied
    pub postcode: String,
    /// Uppercased, whitespace-free postcode
    pub postcode_norm: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub area_code: Option<String>,
    pub geocode_failed: bool,
    pub accepting_adults: Availability,
    pub accepting_children: Availability,
}

impl Practice {
    /// Coordinates when geocoding succeeded
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        if self.geocode_failed {
            return None;
        }
        self.lat.zip(self.lon)
    }

    pub fn is_geocoded(&self) -> bool {
        self.coordinates().is_some()
    }

    /// At least one availability flag is `yes` or `no`
    pub fn has_known_availability(&self) -> bool {
        self.accepting_adults.is_known() || self.accepting_children.is_known()
    }
}

/// Population-weighted deprivation decile, or the `"unknown"` sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decile {
    Known(u8),
    #[default]
    Unknown,
}

impl Decile {
    pub fn value(&self) -> Option<u8> {
        match self {
            Decile::Known(d) => Some(*d),
            Decile::Unknown => None,
        }
    }
}

impl fmt::Display for Decile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decile::Known(d) => write!(f, "{}", d),
            Decile::Unknown => f.write_str(UNKNOWN),
        }
    }
}

impl Serialize for Decile {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Decile::Known(d) => serializer.serialize_u8(*d),
            Decile::Unknown => serializer.serialize_str(UNKNOWN),
        }
    }
}

impl<'de> Deserialize<'de> for Decile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u8),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(d) => Ok(Decile::Known(d)),
            Raw::Text(text) => match text.trim().parse::<u8>() {
                Ok(d) => Ok(Decile::Known(d)),
                Err(_) => Ok(Decile::Unknown),
            },
        }
    }
}

/// Statistics for one coarse reporting area
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaMetric {
    /// Namespaced coarse-area key (`MSOA::E02000001` or `MSOA::Wandsworth 026`)
    pub area_code: String,
    pub area_name: String,
    pub population_total: u64,
    pub population_adults: u64,
    pub population_children: u64,
    pub practice_count: usize,
    pub accepting_adults_count: usize,
    pub accepting_children_count: usize,
    pub practices_per_10k: f64,
    pub accepting_adults_per_10k_adults: f64,
    pub accepting_children_per_10k_children: f64,
    pub imd_decile: Decile,
}

/// A coarse-area boundary ready for output
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryFeature {
    /// Feature id: the source code when there is one, else the area key
    pub id: String,
    pub area_code: String,
    pub area_name: String,
    pub imd_decile: Decile,
    pub geometry: serde_json::Value,
}

impl Serialize for BoundaryFeature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Properties<'a> {
            area_code: &'a str,
            area_name: &'a str,
            imd_decile: Decile,
        }

        #[derive(Serialize)]
        struct Feature<'a> {
            #[serde(rename = "type")]
            kind: &'static str,
            id: &'a str,
            properties: Properties<'a>,
            geometry: &'a serde_json::Value,
        }

        Feature {
            kind: "Feature",
            id: &self.id,
            properties: Properties {
                area_code: &self.area_code,
                area_name: &self.area_name,
                imd_decile: self.imd_decile,
            },
            geometry: &self.geometry,
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_postcode() {
        assert_eq!(normalize_postcode(" sw1a 1aa "), "SW1A1AA");
        assert_eq!(normalize_postcode("M1\t1AE"), "M11AE");
        assert_eq!(normalize_postcode("   "), "");
    }

    #[test]
    fn test_normalize_postcode_idempotent() {
        for raw in ["sw1a 1aa", " EC1A  1BB", "w1a0ax", "", "b33 8th\n", "ß 1"] {
            let once = normalize_postcode(raw);
            assert_eq!(normalize_postcode(&once), once);
        }
    }

    #[test]
    fn test_availability_parse() {
        assert_eq!(Availability::parse("Yes"), Availability::Yes);
        assert_eq!(Availability::parse(" no "), Availability::No);
        assert_eq!(Availability::parse("true"), Availability::Yes);
        assert_eq!(Availability::parse("maybe"), Availability::Unknown);
        assert_eq!(Availability::parse(""), Availability::Unknown);
    }

    #[test]
    fn test_decile_serializes_sentinel() {
        assert_eq!(serde_json::to_string(&Decile::Known(5)).unwrap(), "5");
        assert_eq!(serde_json::to_string(&Decile::Unknown).unwrap(), "\"unknown\"");
        let back: Decile = serde_json::from_str("\"unknown\"").unwrap();
        assert_eq!(back, Decile::Unknown);
        let back: Decile = serde_json::from_str("7").unwrap();
        assert_eq!(back, Decile::Known(7));
    }

    #[test]
    fn test_practice_coordinates_require_success() {
        let mut practice = Practice {
            practice_id: "P1".into(),
            practice_name: "A".into(),
            address: String::new(),
            postcode: "SW1A 1AA".into(),
            postcode_norm: "SW1A1AA".into(),
            lat: Some(51.5),
            lon: Some(-0.1),
            area_code: None,
            geocode_failed: false,
            accepting_adults: Availability::Unknown,
            accepting_children: Availability::No,
        };
        assert_eq!(practice.coordinates(), Some((51.5, -0.1)));
        assert!(practice.has_known_availability());
        practice.geocode_failed = true;
        assert!(!practice.is_geocoded());
    }

    #[test]
    fn test_boundary_feature_serializes_as_geojson() {
        let feature = BoundaryFeature {
            id: "E02000001".into(),
            area_code: "MSOA::E02000001".into(),
            area_name: "City of London 001".into(),
            imd_decile: Decile::Unknown,
            geometry: serde_json::json!({"type": "Polygon", "coordinates": []}),
        };
        let value = serde_json::to_value(&feature).unwrap();
        assert_eq!(value["type"], "Feature");
        assert_eq!(value["properties"]["area_code"], "MSOA::E02000001");
        assert_eq!(value["properties"]["imd_decile"], "unknown");
        assert_eq!(value["geometry"]["type"], "Polygon");
    }
}
