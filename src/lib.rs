/*!
 * # Dental Deserts Data Library
 *
 * Fuses dental-practice listings, small-area population counts and
 * deprivation deciles into per-area statistics and map geometry used to
 * spot areas where NHS dental care is scarce.
 *
 * ## Pipeline
 *
 * 1. **Practices**: rows are deduplicated, postcode-validated and geocoded
 *    (source coordinates, then cache, then bulk lookup, then live lookup).
 * 2. **Aggregation**: fine areas (LSOAs) roll up into coarse reporting areas
 *    (MSOAs); population is summed and deprivation is population-weighted.
 * 3. **Boundaries**: coarse polygons, else merged fine polygons, else a
 *    synthetic polygon around the practice centroid.
 * 4. **QA**: geocoding success, warning tallies and inter-practice distances.
 *
 * ## Quick Start
 *
 * ```no_run
 * use dental_deserts::prelude::*;
 *
 * # fn main() -> Result<()> {
 * let output = DesertPipeline::from_directory("data/raw")?
 *     .cache_path("data/cache/postcodes.json")
 *     .run()?;
 *
 * println!("{} practices, {} areas", output.practices.len(), output.metrics.len());
 * println!("geocoding success: {}%", output.qa.geocoding_success_rate);
 *
 * OutputWriter::new("data/processed").write_all(&output)?;
 * # Ok(())
 * # }
 * ```
 *
 * ## Working with the stages directly
 *
 * ```
 * use dental_deserts::prelude::*;
 *
 * let config = DesertConfig::offline();
 * let codec = AreaKeyCodec::from_config(&config);
 *
 * let rows = vec![PracticeRow {
 *     practice_id: "P001".into(),
 *     practice_name: "High Street Dental".into(),
 *     address: "1 High Street".into(),
 *     postcode: "sw1a 1aa".into(),
 *     lat: Some("51.501".into()),
 *     lon: Some("-0.141".into()),
 *     area_code: Some("LSOA::E01004736".into()),
 * }];
 *
 * let mut cache = GeocodeCache::new();
 * let lookup = PostcodeLookup::default();
 * let build = PracticeBuilder::new(&codec)
 *     .build(&rows, &AvailabilityIndex::default(), &mut cache, &lookup, &NoLiveLookup);
 *
 * assert_eq!(build.practices.len(), 1);
 * assert_eq!(build.practices[0].postcode_norm, "SW1A1AA");
 * ```
 */

// Re-export error types from root
pub use error::{DesertError, Result, ErrorContext};

// Public modules
pub mod data_types;
pub mod fields;
pub mod area_key;
pub mod schema;
pub mod reader;
pub mod error;
pub mod geocode;
pub mod practice;
pub mod aggregate;
pub mod boundary;
pub mod qa;
pub mod pipeline;
pub mod export;
pub mod config;
#[cfg(feature = "live-lookup")]
pub mod live;

/// Prelude module for convenient imports
///
/// Import everything you need with:
/// ```
/// use dental_deserts::prelude::*;
/// ```
pub mod prelude {
    pub use crate::data_types::*;
    pub use crate::area_key::{AreaKey, AreaKeyCodec, CoarseKey, FineAreaCode};
    pub use crate::reader::{InputReader, BoundarySource};
    pub use crate::error::{DesertError, Result};
    pub use crate::geocode::{
        GeocodeCache, GeocodeRequest, GeocodeResolver, LiveLookup, NoLiveLookup, PostcodeLookup,
    };
    pub use crate::practice::{PracticeBuilder, PracticeBuild, WarningKind, WarningTally};
    pub use crate::aggregate::{AreaAggregator, Aggregation, AreaMetrics, CoarseNameHints, FineToCoarseMajority};
    pub use crate::boundary::BoundaryResolver;
    pub use crate::qa::{QaReport, QaReporter, DistanceSummary};
    pub use crate::pipeline::{DesertPipeline, PipelineOutput};
    pub use crate::export::{OutputWriter, practice_points};
    pub use crate::config::{ConfigBuilder, DesertConfig};
}

/// Data constants
pub mod constants {
    /// Leading letter of English statistical-area codes
    pub const DEFAULT_IN_SCOPE_PREFIX: &str = "E";

    /// Namespace of fine-area (LSOA) keys
    pub const DEFAULT_FINE_NAMESPACE: &str = "LSOA::";

    /// Namespace of coarse-area (MSOA) keys
    pub const DEFAULT_COARSE_NAMESPACE: &str = "MSOA::";

    /// Single-postcode endpoint of postcodes.io
    pub const DEFAULT_LIVE_ENDPOINT: &str = "https://api.postcodes.io/postcodes";

    /// UK postcode, normalised (uppercase, no whitespace)
    pub const POSTCODE_PATTERN: &str = r"^[A-Z]{1,2}[0-9][A-Z0-9]?[0-9][A-Z]{2}$";

    /// England and Wales LSOA code
    pub const FINE_AREA_PATTERN: &str = r"^[EW]010\d{5}$";

    /// Mean Earth radius used for great-circle distances
    pub const EARTH_RADIUS_KM: f64 = 6371.0;

    /// Population scale of per-area rates
    pub const RATE_PER: f64 = 10_000.0;

    /// Kilometres per degree of latitude
    pub const KM_PER_DEGREE_LAT: f64 = 111.0;

    /// Lower clamp for cos(latitude) when widening synthetic polygons
    pub const MIN_LON_SCALE: f64 = 0.25;

    /// Sentinel written for an area with no deprivation weight
    pub const UNKNOWN: &str = "unknown";

    /// Area label for practices with no area at all
    pub const UNASSIGNED_AREA: &str = "unassigned";

    /// Standard input file names inside a raw data directory
    pub const PRACTICES_FILE: &str = "practices.csv";
    pub const AVAILABILITY_FILE: &str = "availability.csv";
    pub const POPULATION_FILE: &str = "population.csv";
    pub const DEPRIVATION_FILE: &str = "imd.csv";
    pub const POSTCODE_LOOKUP_FILE: &str = "postcode_lookup.csv";
    pub const FINE_BOUNDARIES_FILE: &str = "lsoa_boundaries.geojson";
    pub const COARSE_BOUNDARIES_FILES: &[&str] = &[
        "msoa_boundaries.geojson",
        "Middle_layer_Super_Output_Areas_December_2021_Boundaries_EW_BGC_V3_4916445166053426.geojson",
    ];

    /// Standard output file names
    pub const PRACTICES_OUTPUT: &str = "practices.geojson";
    pub const AREAS_OUTPUT: &str = "areas.geojson";
    pub const METRICS_OUTPUT: &str = "area_metrics.json";
    pub const QA_OUTPUT: &str = "qa_report.json";
}

/// Round half to even at a fixed number of decimal places
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(10.0, 4), 10.0);
        assert_eq!(round_to(2.0 / 3.0, 2), 0.67);
        assert_eq!(round_to(1.23456, 3), 1.235);
        assert_eq!(round_to(0.5, 0), 0.0);
        assert_eq!(round_to(1.5, 0), 2.0);
    }
}
