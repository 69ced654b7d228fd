/*!
 * Schema definitions for the input tables
 *
 * Each column lists the header spellings accepted for it, in preference
 * order. Required columns must be present under at least one spelling.
 */

use crate::{DesertError, Result};
use crate::fields::{FieldAliases, RecordFields};

/// One logical column and its accepted header names
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub aliases: FieldAliases,
    pub required: bool,
}

/// A named set of columns
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub table: &'static str,
    pub columns: &'static [ColumnSpec],
}

impl TableSchema {
    /// Aliases for a logical column
    pub fn aliases(&self, name: &str) -> FieldAliases {
        self.columns.iter()
            .find(|c| c.name == name)
            .map(|c| c.aliases)
            .unwrap_or(&[])
    }

    /// Names of required columns that have no accepted header
    pub fn missing_columns(&self, fields: &RecordFields) -> Vec<String> {
        self.columns.iter()
            .filter(|c| c.required && !fields.has_any(c.aliases))
            .map(|c| c.name.to_string())
            .collect()
    }

    /// Validate a header row against the schema
    pub fn validate_headers(&self, fields: &RecordFields) -> Result<()> {
        let missing = self.missing_columns(fields);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(DesertError::missing_columns(self.table, missing))
        }
    }
}

macro_rules! column {
    ($name:literal, required, [$($alias:literal),+ $(,)?]) => {
        ColumnSpec { name: $name, aliases: &[$($alias),+], required: true }
    };
    ($name:literal, optional, [$($alias:literal),+ $(,)?]) => {
        ColumnSpec { name: $name, aliases: &[$($alias),+], required: false }
    };
}

pub mod columns {
    pub const PRACTICE_ID: &str = "practice_id";
    pub const PRACTICE_NAME: &str = "practice_name";
    pub const ADDRESS: &str = "address";
    pub const POSTCODE: &str = "postcode";
    pub const LAT: &str = "lat";
    pub const LON: &str = "lon";
    pub const AREA_CODE: &str = "area_code";
    pub const AREA_NAME: &str = "area_name";
    pub const ACCEPTING_ADULTS: &str = "accepting_adults";
    pub const ACCEPTING_CHILDREN: &str = "accepting_children";
    pub const POPULATION_TOTAL: &str = "population_total";
    pub const POPULATION_ADULTS: &str = "population_adults";
    pub const POPULATION_CHILDREN: &str = "population_children";
    pub const IMD_DECILE: &str = "imd_decile";
}

/// Practice directory (`practices.csv`)
pub const PRACTICES: TableSchema = TableSchema {
    table: "practices",
    columns: &[
        column!("practice_id", required, ["practice_id", "id", "organisation_code"]),
        column!("practice_name", required, ["practice_name", "name", "organisation_name"]),
        column!("address", optional, ["address", "address_line", "full_address"]),
        column!("postcode", required, ["postcode", "postal_code", "post_code"]),
        column!("lat", optional, ["lat", "latitude"]),
        column!("lon", optional, ["lon", "lng", "longitude"]),
        column!("area_code", optional, ["area_code", "lsoa_code", "lsoa"]),
    ],
};

/// Availability snapshot (`availability.csv`)
pub const AVAILABILITY: TableSchema = TableSchema {
    table: "availability",
    columns: &[
        column!("practice_id", required, ["practice_id", "id", "organisation_code"]),
        column!("accepting_adults", optional, [
            "accepting_adults",
            "acceptingAdults",
            "AcceptingAdults",
            "accepting_new_adult_patients",
            "acceptingAdultNhsPatients",
            "AcceptingNewNHSAdultPatients",
        ]),
        column!("accepting_children", optional, [
            "accepting_children",
            "acceptingChildren",
            "AcceptingChildren",
            "accepting_new_child_patients",
            "acceptingChildNhsPatients",
            "AcceptingNewNHSChildPatients",
        ]),
    ],
};

/// Fine-area population (`population.csv`)
pub const POPULATION: TableSchema = TableSchema {
    table: "population",
    columns: &[
        column!("area_code", required, ["area_code", "GEOGRAPHY_CODE", "lsoa_code"]),
        column!("area_name", optional, ["area_name", "GEOGRAPHY_NAME", "lsoa_name"]),
        column!("population_total", required, ["population_total"]),
        column!("population_adults", required, ["population_adults"]),
        column!("population_children", required, ["population_children"]),
    ],
};

/// Fine-area deprivation deciles (`imd.csv`)
pub const DEPRIVATION: TableSchema = TableSchema {
    table: "deprivation",
    columns: &[
        column!("area_code", required, ["area_code", "LSOA code (2021)", "lsoa_code"]),
        column!("imd_decile", required, [
            "imd_decile",
            "Index of Multiple Deprivation (IMD) Decile (where 1 is most deprived 10% of LSOAs)",
        ]),
    ],
};

/// Bulk postcode lookup (`postcode_lookup.csv`)
pub const POSTCODE_LOOKUP: TableSchema = TableSchema {
    table: "postcode_lookup",
    columns: &[
        column!("postcode", required, ["postcode", "postal_code"]),
        column!("lat", required, ["lat", "latitude"]),
        column!("lon", required, ["lon", "lng", "longitude"]),
        column!("area_code", optional, ["area_code", "lsoa_code", "lsoa"]),
    ],
};

/// Property names of coarse (MSOA) boundary features
pub const COARSE_BOUNDARY_CODE_KEYS: FieldAliases = &["MSOA11CD", "MSOA21CD", "msoa_code", "code", "area_code"];
pub const COARSE_BOUNDARY_NAME_KEYS: FieldAliases = &["MSOA11NM", "MSOA21NM", "msoa_name", "name", "area_name"];

/// Property names of fine (LSOA) boundary features
pub const FINE_BOUNDARY_CODE_KEYS: FieldAliases = &["LSOA11CD", "LSOA21CD", "lsoa_code", "code", "area_code"];
pub const FINE_BOUNDARY_NAME_KEYS: FieldAliases = &["LSOA11NM", "LSOA21NM", "lsoa_name", "name", "area_name"];
