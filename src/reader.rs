/*!
 * Input reader for the raw data directory
 *
 * Reads each input kind once into typed records. In the default lenient mode
 * a missing file, a header mismatch or an unparseable JSON document is logged
 * and treated as empty, and malformed rows are skipped. With strict inputs
 * enabled the same conditions become errors.
 */

use std::fs::File;
use std::path::Path;
use std::time::Instant;
use csv::{ReaderBuilder, StringRecord};
use serde_json::{Map, Value};

use crate::{
    DesertError, ErrorContext, Result,
    config::DesertConfig,
    data_types::*,
    fields::{json_string, RecordFields},
    geocode::{GeocodeCache, PostcodeLookup},
    aggregate::CoarseNameHints,
    schema::{self, columns, TableSchema},
};

/// Number of skipped-row warnings logged per file before going quiet
const MAX_LOGGED_SKIPS: usize = 10;

/// Why one input row could not be parsed
#[derive(Debug)]
struct RowIssue {
    column: Option<&'static str>,
    value: Option<String>,
    message: String,
}

impl RowIssue {
    fn invalid(column: &'static str, value: &str, message: String) -> Self {
        Self { column: Some(column), value: Some(value.to_string()), message }
    }
}

impl From<String> for RowIssue {
    fn from(message: String) -> Self {
        Self { column: None, value: None, message }
    }
}

impl From<&str> for RowIssue {
    fn from(message: &str) -> Self {
        Self::from(message.to_string())
    }
}

/// Which level of the geography a boundary file describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryLevel {
    Coarse,
    Fine,
}

/// Boundary features available to the boundary resolver
#[derive(Debug, Clone, Default)]
pub struct BoundarySource {
    pub coarse: Vec<BoundaryRow>,
    pub fine: Vec<BoundaryRow>,
}

impl BoundarySource {
    pub fn is_empty(&self) -> bool {
        self.coarse.is_empty() && self.fine.is_empty()
    }

    /// `(name, code)` pairs of coarse features carrying both
    pub fn coarse_name_code_pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.coarse.iter().filter_map(|row| {
            Some((row.name.as_deref()?, row.code.as_deref()?))
        })
    }
}

/// Reader for all tabular and JSON inputs
#[derive(Debug, Clone, Default)]
pub struct InputReader {
    strict: bool,
}

impl InputReader {
    /// Create a lenient reader
    pub fn new() -> Self {
        Self { strict: false }
    }

    /// Create a reader following the configured strictness
    pub fn from_config(config: &DesertConfig) -> Self {
        Self { strict: config.strict_inputs }
    }

    /// Enable or disable strict input handling
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Return the error in strict mode, log it otherwise
    fn degrade(&self, error: DesertError) -> Result<()> {
        if self.strict {
            Err(error)
        } else {
            log::warn!("{}; treating as empty", error);
            Ok(())
        }
    }

    fn check_exists(&self, path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(true);
        }
        self.degrade(DesertError::file_not_found_with_suggestion(path.to_path_buf()))?;
        Ok(false)
    }

    fn read_table<T, F>(&self, path: &Path, schema: &TableSchema, mut parse: F) -> Result<Vec<T>>
    where
        F: FnMut(&RecordFields, &StringRecord) -> std::result::Result<T, RowIssue>,
    {
        if !self.check_exists(path)? {
            return Ok(Vec::new());
        }

        let start_time = Instant::now();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                self.degrade(DesertError::from(e).in_file(path))?;
                return Ok(Vec::new());
            }
        };
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let fields = match reader.headers() {
            Ok(headers) => RecordFields::from_headers(headers),
            Err(e) => {
                self.degrade(DesertError::from(e).in_file(path))?;
                return Ok(Vec::new());
            }
        };
        if let Err(e) = schema.validate_headers(&fields) {
            self.degrade(e)?;
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let mut skipped = 0;

        for (idx, result) in reader.records().enumerate() {
            let line = idx + 2; // header + 1-based
            let outcome = result
                .map_err(|e| RowIssue::from(e.to_string()))
                .and_then(|record| parse(&fields, &record));

            match outcome {
                Ok(record) => records.push(record),
                Err(issue) => {
                    let error = DesertError::DataValidation {
                        message: format!("{} row {}: {}", schema.table, line, issue.message),
                        field: issue.column.map(str::to_string),
                        value: issue.value,
                        context: ErrorContext::for_file(path).at_line(line).in_column(issue.column),
                    };
                    if self.strict {
                        return Err(error);
                    }
                    skipped += 1;
                    if skipped <= MAX_LOGGED_SKIPS {
                        log::warn!("Skipping invalid record: {}", error);
                    }
                }
            }
        }

        log::info!(
            "Loaded {} {} records from {} in {:.2}s",
            records.len(),
            schema.table,
            path.display(),
            start_time.elapsed().as_secs_f64()
        );
        if skipped > 0 {
            log::warn!("Skipped {} invalid {} records", skipped, schema.table);
        }

        Ok(records)
    }

    /// Load the practice directory
    pub fn load_practices<P: AsRef<Path>>(&self, path: P) -> Result<Vec<PracticeRow>> {
        let s = &schema::PRACTICES;
        self.read_table(path.as_ref(), s, |fields, record| {
            let get = |name: &str| fields.get_string(record, s.aliases(name));
            Ok(PracticeRow {
                practice_id: get(columns::PRACTICE_ID).unwrap_or_default(),
                practice_name: get(columns::PRACTICE_NAME).unwrap_or_default(),
                address: get(columns::ADDRESS).unwrap_or_default(),
                postcode: fields.get_raw(record, s.aliases(columns::POSTCODE))
                    .map(str::to_string)
                    .unwrap_or_default(),
                lat: get(columns::LAT),
                lon: get(columns::LON),
                area_code: get(columns::AREA_CODE),
            })
        })
    }

    /// Load the availability snapshot
    pub fn load_availability<P: AsRef<Path>>(&self, path: P) -> Result<Vec<AvailabilityRow>> {
        let s = &schema::AVAILABILITY;
        self.read_table(path.as_ref(), s, |fields, record| {
            let practice_id = fields.get_string(record, s.aliases(columns::PRACTICE_ID))
                .ok_or("missing practice_id")?;
            let flag = |name: &str| {
                fields.get(record, s.aliases(name))
                    .map(Availability::parse)
                    .unwrap_or_default()
            };
            Ok(AvailabilityRow {
                practice_id,
                accepting_adults: flag(columns::ACCEPTING_ADULTS),
                accepting_children: flag(columns::ACCEPTING_CHILDREN),
            })
        })
    }

    /// Load fine-area population counts
    pub fn load_population<P: AsRef<Path>>(&self, path: P) -> Result<Vec<PopulationRow>> {
        let s = &schema::POPULATION;
        self.read_table(path.as_ref(), s, |fields, record| {
            let count = |name: &'static str| -> std::result::Result<u64, RowIssue> {
                let raw = fields.get(record, s.aliases(name)).unwrap_or("0");
                raw.parse::<u64>()
                    .map_err(|_| RowIssue::invalid(name, raw, format!("{} is not a count: '{}'", name, raw)))
            };
            Ok(PopulationRow {
                area_code: fields.get_string(record, s.aliases(columns::AREA_CODE))
                    .ok_or("missing area_code")?,
                area_name: fields.get_string(record, s.aliases(columns::AREA_NAME)).unwrap_or_default(),
                population_total: count(columns::POPULATION_TOTAL)?,
                population_adults: count(columns::POPULATION_ADULTS)?,
                population_children: count(columns::POPULATION_CHILDREN)?,
            })
        })
    }

    /// Load fine-area deprivation deciles
    pub fn load_deprivation<P: AsRef<Path>>(&self, path: P) -> Result<Vec<DeprivationRow>> {
        let s = &schema::DEPRIVATION;
        self.read_table(path.as_ref(), s, |fields, record| {
            let area_code = fields.get_string(record, s.aliases(columns::AREA_CODE))
                .ok_or("missing area_code")?;
            let raw = fields.get(record, s.aliases(columns::IMD_DECILE)).unwrap_or("");
            let imd_decile = raw.parse::<u8>()
                .ok()
                .filter(|d| (1..=10).contains(d))
                .ok_or_else(|| {
                    RowIssue::invalid(columns::IMD_DECILE, raw, format!("imd_decile must be 1-10, got '{}'", raw))
                })?;
            Ok(DeprivationRow { area_code, imd_decile })
        })
    }

    /// Load the bulk postcode lookup table
    pub fn load_postcode_lookup<P: AsRef<Path>>(&self, path: P) -> Result<PostcodeLookup> {
        let s = &schema::POSTCODE_LOOKUP;
        let rows = self.read_table(path.as_ref(), s, |fields, record| {
            let postcode = fields.get(record, s.aliases(columns::POSTCODE))
                .map(normalize_postcode)
                .filter(|p| !p.is_empty())
                .ok_or("missing postcode")?;
            let coord = |name: &'static str| -> std::result::Result<f64, RowIssue> {
                let raw = fields.get(record, s.aliases(name)).unwrap_or("");
                raw.parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| RowIssue::invalid(name, raw, format!("{} is not a number", name)))
            };
            Ok(LookupRow {
                postcode,
                lat: coord(columns::LAT)?,
                lon: coord(columns::LON)?,
                area_code: fields.get_string(record, s.aliases(columns::AREA_CODE)).unwrap_or_default(),
            })
        })?;
        Ok(PostcodeLookup::from_rows(rows))
    }

    fn read_json(&self, path: &Path) -> Result<Option<Value>> {
        if !self.check_exists(path)? {
            return Ok(None);
        }
        let parsed = std::fs::read_to_string(path)
            .map_err(DesertError::from)
            .and_then(|text| serde_json::from_str::<Value>(&text).map_err(DesertError::from));
        match parsed {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                self.degrade(e.in_file(path))?;
                Ok(None)
            }
        }
    }

    fn read_json_object(&self, path: &Path) -> Result<Map<String, Value>> {
        match self.read_json(path)? {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => {
                self.degrade(DesertError::Serialization {
                    message: format!("{} is not a JSON object", path.display()),
                    context: ErrorContext::for_file(path),
                })?;
                Ok(Map::new())
            }
            None => Ok(Map::new()),
        }
    }

    /// Load boundary features from a GeoJSON `FeatureCollection`
    pub fn load_boundaries<P: AsRef<Path>>(&self, path: P, level: BoundaryLevel) -> Result<Vec<BoundaryRow>> {
        let path = path.as_ref();
        let Some(payload) = self.read_json(path)? else {
            return Ok(Vec::new());
        };

        let (code_keys, name_keys) = match level {
            BoundaryLevel::Coarse => (schema::COARSE_BOUNDARY_CODE_KEYS, schema::COARSE_BOUNDARY_NAME_KEYS),
            BoundaryLevel::Fine => (schema::FINE_BOUNDARY_CODE_KEYS, schema::FINE_BOUNDARY_NAME_KEYS),
        };

        let features = payload.get("features")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let rows: Vec<BoundaryRow> = features.iter()
            .filter_map(|feature| {
                let props = feature.get("properties")?.as_object()?;
                let code = json_string(props, code_keys);
                let name = json_string(props, name_keys);
                let keep = match level {
                    BoundaryLevel::Fine => code.is_some(),
                    BoundaryLevel::Coarse => code.is_some() || name.is_some(),
                };
                keep.then(|| BoundaryRow {
                    code,
                    name,
                    geometry: feature.get("geometry").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();

        log::info!(
            "Loaded {} {:?} boundary features (of {}) from {}",
            rows.len(),
            level,
            features.len(),
            path.display()
        );
        Ok(rows)
    }

    /// Load coarse and fine boundaries; absent paths contribute nothing
    pub fn load_boundary_source(&self, coarse: Option<&Path>, fine: Option<&Path>) -> Result<BoundarySource> {
        Ok(BoundarySource {
            coarse: match coarse {
                Some(path) => self.load_boundaries(path, BoundaryLevel::Coarse)?,
                None => Vec::new(),
            },
            fine: match fine {
                Some(path) => self.load_boundaries(path, BoundaryLevel::Fine)?,
                None => Vec::new(),
            },
        })
    }

    /// Load the persistent geocode cache
    pub fn load_geocode_cache<P: AsRef<Path>>(&self, path: P) -> Result<GeocodeCache> {
        let map = self.read_json_object(path.as_ref())?;
        let cache = GeocodeCache::from_json_map(map);
        log::info!("Loaded {} geocode cache entries from {}", cache.len(), path.as_ref().display());
        Ok(cache)
    }

    /// Load the postcode -> coarse-name hint cache
    pub fn load_coarse_hints<P: AsRef<Path>>(&self, path: P) -> Result<CoarseNameHints> {
        let map = self.read_json_object(path.as_ref())?;
        Ok(CoarseNameHints::from_json_map(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_practices_with_optional_columns() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "practices.csv",
            "practice_id,practice_name,address,postcode,lat,lon,area_code\n\
             P001,Smile Dental,1 High St,SW1A 1AA,51.5,-0.14,LSOA::E01004736\n\
             P002,Tooth Co,2 Low Rd,M1 1AE,,,\n");

        let rows = InputReader::new().load_practices(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].lat.as_deref(), Some("51.5"));
        assert_eq!(rows[0].area_code.as_deref(), Some("LSOA::E01004736"));
        assert_eq!(rows[1].lat, None);
        assert_eq!(rows[1].area_code, None);
    }

    #[test]
    fn test_missing_file_is_empty_when_lenient() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("population.csv");
        assert!(InputReader::new().load_population(&path).unwrap().is_empty());
        assert!(matches!(
            InputReader::new().with_strict(true).load_population(&path),
            Err(DesertError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_population_skips_bad_rows() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "population.csv",
            "area_code,area_name,population_total,population_adults,population_children\n\
             LSOA::E01000001,City of London 001A,1500,1200,300\n\
             LSOA::E01000002,City of London 001B,lots,1,1\n");

        let rows = InputReader::new().load_population(&path).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].population_total, 1500);

        let strict = InputReader::new().with_strict(true).load_population(&path);
        assert!(matches!(strict, Err(DesertError::DataValidation { .. })));
    }

    #[test]
    fn test_deprivation_rejects_out_of_range() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "imd.csv",
            "area_code,imd_decile\nLSOA::E01000001,3\nLSOA::E01000002,11\nLSOA::E01000003,\n");
        let rows = InputReader::new().load_deprivation(&path).unwrap();
        assert_eq!(rows, vec![DeprivationRow { area_code: "LSOA::E01000001".into(), imd_decile: 3 }]);
    }

    #[test]
    fn test_header_mismatch_degrades() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "availability.csv", "foo,bar\n1,2\n");
        assert!(InputReader::new().load_availability(&path).unwrap().is_empty());
        assert!(matches!(
            InputReader::new().with_strict(true).load_availability(&path),
            Err(DesertError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_load_boundaries_with_key_variants() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "msoa.geojson", r#"{
            "type": "FeatureCollection",
            "features": [
                {"type": "Feature", "properties": {"MSOA21CD": "E02000001", "MSOA21NM": "City of London 001"},
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]]}},
                {"type": "Feature", "properties": {"msoa_name": "Nameless 002"}, "geometry": null},
                {"type": "Feature", "properties": {"other": 1}, "geometry": null},
                {"type": "Feature", "properties": null, "geometry": null}
            ]
        }"#);

        let rows = InputReader::new().load_boundaries(&path, BoundaryLevel::Coarse).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].code.as_deref(), Some("E02000001"));
        assert_eq!(rows[1].code, None);
        assert_eq!(rows[1].name.as_deref(), Some("Nameless 002"));

        let fine = InputReader::new().load_boundaries(&path, BoundaryLevel::Fine).unwrap();
        assert!(fine.is_empty());
    }

    #[test]
    fn test_malformed_json_degrades() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "postcodes.json", "{not json");
        let cache = InputReader::new().load_geocode_cache(&path).unwrap();
        assert!(cache.is_empty());
        assert!(InputReader::new().with_strict(true).load_geocode_cache(&path).is_err());
    }

    #[test]
    fn test_non_utf8_cache_degrades() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("postcodes.json");
        std::fs::write(&path, [0xff, 0xfe, b'{', b'}']).unwrap();

        let cache = InputReader::new().load_geocode_cache(&path).unwrap();
        assert!(cache.is_empty());
        match InputReader::new().with_strict(true).load_geocode_cache(&path) {
            Err(DesertError::Io { context, .. }) => assert_eq!(context.file_path, Some(path.clone())),
            other => panic!("expected an I/O error, got {:?}", other.map(|c| c.len())),
        }
    }

    #[test]
    fn test_non_utf8_header_degrades() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("population.csv");
        let mut bytes = b"area_code,area_name,population_total,population_adults,population_\xff\n".to_vec();
        bytes.extend_from_slice(b"LSOA::E01000001,City of London 001A,1500,1200,300\n");
        std::fs::write(&path, bytes).unwrap();

        assert!(InputReader::new().load_population(&path).unwrap().is_empty());
        assert!(matches!(
            InputReader::new().with_strict(true).load_population(&path),
            Err(DesertError::CsvParse { .. })
        ));
    }

    #[test]
    fn test_row_errors_name_the_column() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "imd.csv", "area_code,imd_decile\nLSOA::E01000001,12\n");
        match InputReader::new().with_strict(true).load_deprivation(&path) {
            Err(DesertError::DataValidation { field, value, context, .. }) => {
                assert_eq!(field.as_deref(), Some("imd_decile"));
                assert_eq!(value.as_deref(), Some("12"));
                assert_eq!(context.column_name.as_deref(), Some("imd_decile"));
                assert_eq!(context.line_number, Some(2));
            }
            other => panic!("expected a validation error, got {:?}", other.map(|rows| rows.len())),
        }
    }

    #[test]
    fn test_practice_postcode_kept_as_written() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "practices.csv",
            "practice_id,practice_name,address,postcode\nP001,Smile Dental,1 High St,\" sw1a 1aa \"\n");
        let rows = InputReader::new().load_practices(&path).unwrap();
        assert_eq!(rows[0].postcode, " sw1a 1aa ");
    }

    #[test]
    fn test_load_postcode_lookup_normalises_keys() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "postcode_lookup.csv",
            "postcode,lat,lon,area_code\nsw1a 1aa,51.5,-0.14,LSOA::E01004736\nBAD,x,y,\n");
        let lookup = InputReader::new().load_postcode_lookup(&path).unwrap();
        assert_eq!(lookup.len(), 1);
        assert!(lookup.get("SW1A1AA").is_some());
    }
}
