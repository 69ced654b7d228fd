/*!
 * Postcode geocoding with caching and multi-source fallback
 *
 * A normalised postcode resolves through, in order: coordinates supplied on
 * the practice row, the persistent cache, the bulk lookup table and finally
 * the live single-postcode lookup. Every success is written back into the
 * in-memory cache, which the pipeline persists once at the end of a run.
 */

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{
    Result,
    area_key::AreaKeyCodec,
    data_types::{normalize_postcode, GeocodeHit, GeocodeOrigin, LookupRow, PracticeRow},
};

/// Coordinates and fine area recorded for one postcode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodePoint {
    #[serde(deserialize_with = "lenient_f64")]
    pub lat: f64,
    #[serde(deserialize_with = "lenient_f64")]
    pub lon: f64,
    /// Namespaced fine-area key
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub area_code: Option<String>,
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
    .ok_or_else(|| serde::de::Error::custom("expected a finite number or numeric string"))
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

/// Persistent postcode -> point cache
#[derive(Debug, Clone, Default)]
pub struct GeocodeCache {
    entries: HashMap<String, GeocodePoint>,
    written: usize,
}

impl GeocodeCache {
    /// Empty in-memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a parsed JSON object; entries that do not parse are dropped
    pub fn from_json_map(map: Map<String, Value>) -> Self {
        let total = map.len();
        let entries: HashMap<String, GeocodePoint> = map.into_iter()
            .filter_map(|(postcode, value)| {
                let point = serde_json::from_value::<GeocodePoint>(value).ok()?;
                Some((normalize_postcode(&postcode), point))
            })
            .collect();

        if entries.len() < total {
            log::debug!("Dropped {} unreadable geocode cache entries", total - entries.len());
        }
        Self { entries, written: 0 }
    }

    pub fn get(&self, postcode_norm: &str) -> Option<&GeocodePoint> {
        self.entries.get(postcode_norm)
    }

    /// Record a point, replacing any previous entry
    pub fn insert(&mut self, postcode_norm: impl Into<String>, point: GeocodePoint) {
        self.entries.insert(postcode_norm.into(), point);
        self.written += 1;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of inserts since the cache was loaded
    pub fn writes(&self) -> usize {
        self.written
    }

    /// Write the whole cache to `path` via a temporary file and rename
    ///
    /// Keys are written in sorted order so repeated runs produce stable files.
    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let ordered: BTreeMap<&str, &GeocodePoint> = self.entries.iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect();
        let payload = serde_json::to_vec(&ordered)?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, payload)?;
        fs::rename(&tmp_path, path)?;

        log::info!(
            "Persisted {} geocode cache entries ({} written this run) to {}",
            self.entries.len(),
            self.written,
            path.display()
        );
        Ok(())
    }
}

/// Bulk postcode lookup table
#[derive(Debug, Clone, Default)]
pub struct PostcodeLookup {
    entries: HashMap<String, GeocodePoint>,
}

impl PostcodeLookup {
    /// Build from lookup rows; keys are normalised and later rows win
    pub fn from_rows<I: IntoIterator<Item = LookupRow>>(rows: I) -> Self {
        let entries = rows.into_iter()
            .map(|row| {
                let point = GeocodePoint {
                    lat: row.lat,
                    lon: row.lon,
                    area_code: Some(row.area_code).filter(|a| !a.trim().is_empty()),
                };
                (normalize_postcode(&row.postcode), point)
            })
            .collect();
        Self { entries }
    }

    /// Build from practice rows that carry their own coordinates
    pub fn from_practice_rows(rows: &[PracticeRow]) -> Self {
        let entries = rows.iter()
            .filter_map(|row| {
                let (lat, lon) = parse_coordinates(row.lat.as_deref(), row.lon.as_deref())?;
                let postcode = normalize_postcode(&row.postcode);
                if postcode.is_empty() {
                    return None;
                }
                let area_code = row.area_code.as_deref()
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(str::to_string);
                Some((postcode, GeocodePoint { lat, lon, area_code }))
            })
            .collect();
        Self { entries }
    }

    /// Add entries from `other` for postcodes this table does not know
    pub fn extend_missing(&mut self, other: PostcodeLookup) {
        for (postcode, point) in other.entries {
            self.entries.entry(postcode).or_insert(point);
        }
    }

    pub fn get(&self, postcode_norm: &str) -> Option<&GeocodePoint> {
        self.entries.get(postcode_norm)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Single-postcode fetch used when cache and lookup table both miss
///
/// Implementations return `None` on any failure; the resolver never retries.
pub trait LiveLookup {
    fn lookup(&self, postcode_norm: &str) -> Option<GeocodePoint>;
}

/// Live lookup that never finds anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLiveLookup;

impl LiveLookup for NoLiveLookup {
    fn lookup(&self, _postcode_norm: &str) -> Option<GeocodePoint> {
        None
    }
}

impl<F> LiveLookup for F
where
    F: Fn(&str) -> Option<GeocodePoint>,
{
    fn lookup(&self, postcode_norm: &str) -> Option<GeocodePoint> {
        self(postcode_norm)
    }
}

/// One geocoding request
#[derive(Debug, Clone, Copy, Default)]
pub struct GeocodeRequest<'a> {
    pub postcode_norm: &'a str,
    pub source_lat: Option<&'a str>,
    pub source_lon: Option<&'a str>,
    /// Area hint supplied with the practice row
    pub source_area: Option<&'a str>,
}

/// Parse a coordinate pair; both must be present and finite
fn parse_coordinates(lat: Option<&str>, lon: Option<&str>) -> Option<(f64, f64)> {
    let parse = |v: Option<&str>| v?.trim().parse::<f64>().ok().filter(|v| v.is_finite());
    Some((parse(lat)?, parse(lon)?))
}

/// Resolves postcodes against source coordinates, cache, lookup table and live lookup
pub struct GeocodeResolver<'a> {
    codec: &'a AreaKeyCodec,
    cache: &'a mut GeocodeCache,
    lookup: &'a PostcodeLookup,
    live: &'a dyn LiveLookup,
}

impl<'a> GeocodeResolver<'a> {
    pub fn new(
        codec: &'a AreaKeyCodec,
        cache: &'a mut GeocodeCache,
        lookup: &'a PostcodeLookup,
        live: &'a dyn LiveLookup,
    ) -> Self {
        Self { codec, cache, lookup, live }
    }

    /// Resolve one request, writing any success into the cache
    pub fn resolve(&mut self, request: &GeocodeRequest<'_>) -> Option<GeocodeHit> {
        let source_area = request.source_area
            .map(str::trim)
            .filter(|a| !a.is_empty());

        let hit = if let Some((lat, lon)) = parse_coordinates(request.source_lat, request.source_lon) {
            let area_code = source_area.map(|raw| {
                self.codec.canonical_fine_key(raw).unwrap_or_else(|| raw.to_string())
            });
            GeocodeHit { lat, lon, area_code, origin: GeocodeOrigin::Source }
        } else {
            let (point, origin) = self.find_point(request.postcode_norm)?;
            let area_code = source_area
                .and_then(|raw| self.codec.canonical_fine_key(raw))
                .or_else(|| {
                    point.area_code.as_deref().and_then(|raw| self.codec.canonical_fine_key(raw))
                })
                .or_else(|| source_area.map(str::to_string));
            GeocodeHit { lat: point.lat, lon: point.lon, area_code, origin }
        };

        self.cache.insert(request.postcode_norm, GeocodePoint {
            lat: hit.lat,
            lon: hit.lon,
            area_code: hit.area_code.clone(),
        });
        Some(hit)
    }

    fn find_point(&self, postcode_norm: &str) -> Option<(GeocodePoint, GeocodeOrigin)> {
        if let Some(point) = self.cache.get(postcode_norm) {
            return Some((point.clone(), GeocodeOrigin::Cache));
        }
        if let Some(point) = self.lookup.get(postcode_norm) {
            return Some((point.clone(), GeocodeOrigin::BulkLookup));
        }
        let point = self.live.lookup(postcode_norm)?;
        log::debug!("Live lookup resolved {}", postcode_norm);
        Some((point, GeocodeOrigin::LiveLookup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use serde_json::json;

    fn point(lat: f64, lon: f64, area: Option<&str>) -> GeocodePoint {
        GeocodePoint { lat, lon, area_code: area.map(str::to_string) }
    }

    fn request<'a>(postcode: &'a str) -> GeocodeRequest<'a> {
        GeocodeRequest { postcode_norm: postcode, ..Default::default() }
    }

    #[test]
    fn test_source_coordinates_win() {
        let codec = AreaKeyCodec::default();
        let mut cache = GeocodeCache::new();
        cache.insert("SW1A1AA", point(1.0, 1.0, Some("LSOA::E01000009")));
        let lookup = PostcodeLookup::default();

        let mut resolver = GeocodeResolver::new(&codec, &mut cache, &lookup, &NoLiveLookup);
        let hit = resolver.resolve(&GeocodeRequest {
            postcode_norm: "SW1A1AA",
            source_lat: Some("51.5"),
            source_lon: Some(" -0.14 "),
            source_area: Some("E01004736"),
        }).unwrap();

        assert_eq!(hit.origin, GeocodeOrigin::Source);
        assert_eq!((hit.lat, hit.lon), (51.5, -0.14));
        assert_eq!(hit.area_code.as_deref(), Some("LSOA::E01004736"));
        assert_eq!(cache.get("SW1A1AA").unwrap().lat, 51.5);
    }

    #[test]
    fn test_half_coordinates_fall_through_to_cache() {
        let codec = AreaKeyCodec::default();
        let mut cache = GeocodeCache::new();
        cache.insert("M11AE", point(53.48, -2.23, Some("LSOA::E01005070")));
        let lookup = PostcodeLookup::default();

        let mut resolver = GeocodeResolver::new(&codec, &mut cache, &lookup, &NoLiveLookup);
        let hit = resolver.resolve(&GeocodeRequest {
            postcode_norm: "M11AE",
            source_lat: Some("53.0"),
            source_lon: Some("nan"),
            source_area: None,
        }).unwrap();
        assert_eq!(hit.origin, GeocodeOrigin::Cache);
        assert_eq!(hit.area_code.as_deref(), Some("LSOA::E01005070"));
    }

    #[test]
    fn test_lookup_then_live_order() {
        let codec = AreaKeyCodec::default();
        let mut cache = GeocodeCache::new();
        let lookup = PostcodeLookup::from_rows(vec![LookupRow {
            postcode: "b33 8th".into(),
            lat: 52.48,
            lon: -1.78,
            area_code: "E01009400".into(),
        }]);
        let calls = Cell::new(0);
        let live = |pc: &str| {
            calls.set(calls.get() + 1);
            (pc == "CR26XH").then(|| point(51.33, -0.06, Some("not-a-code")))
        };

        let mut resolver = GeocodeResolver::new(&codec, &mut cache, &lookup, &live);
        let bulk = resolver.resolve(&request("B338TH")).unwrap();
        assert_eq!(bulk.origin, GeocodeOrigin::BulkLookup);
        assert_eq!(bulk.area_code.as_deref(), Some("LSOA::E01009400"));
        assert_eq!(calls.get(), 0);

        let live_hit = resolver.resolve(&request("CR26XH")).unwrap();
        assert_eq!(live_hit.origin, GeocodeOrigin::LiveLookup);
        assert_eq!(live_hit.area_code, None);

        assert!(resolver.resolve(&request("DN551PT")).is_none());
        assert_eq!(calls.get(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_source_area_preferred_over_lookup_area() {
        let codec = AreaKeyCodec::default();
        let mut cache = GeocodeCache::new();
        cache.insert("EC1A1BB", point(51.52, -0.1, Some("LSOA::E01000001")));
        let lookup = PostcodeLookup::default();

        let mut resolver = GeocodeResolver::new(&codec, &mut cache, &lookup, &NoLiveLookup);
        let hit = resolver.resolve(&GeocodeRequest {
            source_area: Some("LSOA::E01000005"),
            ..request("EC1A1BB")
        }).unwrap();
        assert_eq!(hit.area_code.as_deref(), Some("LSOA::E01000005"));
        assert_eq!(cache.get("EC1A1BB").unwrap().area_code.as_deref(), Some("LSOA::E01000005"));
    }

    #[test]
    fn test_cache_accepts_string_numbers() {
        let value = json!({
            "sw1a 1aa": {"lat": "51.5", "lon": -0.14, "area_code": "LSOA::E01004736"},
            "M11AE": {"lat": "north", "lon": 1.0},
            "B338TH": {"lat": 52.4, "lon": "-1.7", "area_code": null}
        });
        let Value::Object(map) = value else { unreachable!() };
        let cache = GeocodeCache::from_json_map(map);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("SW1A1AA").unwrap().lat, 51.5);
        assert_eq!(cache.get("B338TH").unwrap().area_code, None);
    }

    #[test]
    fn test_persist_writes_sorted_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("postcodes.json");
        let mut cache = GeocodeCache::new();
        cache.insert("SW1A1AA", point(51.5, -0.14, None));
        cache.insert("B338TH", point(52.4, -1.7, Some("LSOA::E01009400")));
        cache.persist(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.find("B338TH").unwrap() < text.find("SW1A1AA").unwrap());
        assert!(!path.with_extension("json.tmp").exists());

        let Value::Object(map) = serde_json::from_str(&text).unwrap() else { unreachable!() };
        assert_eq!(GeocodeCache::from_json_map(map).len(), 2);
    }

    #[test]
    fn test_lookup_from_practice_rows() {
        let rows = vec![
            PracticeRow { postcode: "SW1A 1AA".into(), lat: Some("51.5".into()), lon: Some("-0.14".into()), ..Default::default() },
            PracticeRow { postcode: "M1 1AE".into(), lat: Some("53.4".into()), lon: None, ..Default::default() },
        ];
        let mut lookup = PostcodeLookup::from_practice_rows(&rows);
        assert_eq!(lookup.len(), 1);
        lookup.extend_missing(PostcodeLookup::from_rows(vec![LookupRow {
            postcode: "SW1A1AA".into(), lat: 0.0, lon: 0.0, area_code: String::new(),
        }]));
        assert_eq!(lookup.get("SW1A1AA").unwrap().lat, 51.5);
    }
}
