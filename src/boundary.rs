/*!
 * Boundary geometry for coarse areas
 *
 * The first available source wins for the whole run: coarse boundaries,
 * then fine boundaries merged per coarse area, then a synthetic regular
 * polygon around each area's practice centroid.
 */

use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    aggregate::AreaMetrics,
    area_key::{AreaKeyCodec, CoarseKey},
    config::DesertConfig,
    constants::{KM_PER_DEGREE_LAT, MIN_LON_SCALE},
    data_types::{AreaMetric, BoundaryFeature, BoundaryRow},
    reader::BoundarySource,
};

/// Which source produced the emitted boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryOrigin {
    Coarse,
    Fine,
    Synthetic,
}

/// Boundary features ready for output as a GeoJSON `FeatureCollection`
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryCollection {
    pub features: Vec<BoundaryFeature>,
    pub origin: BoundaryOrigin,
}

impl Serialize for BoundaryCollection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct FeatureCollection<'a> {
            #[serde(rename = "type")]
            kind: &'static str,
            features: &'a [BoundaryFeature],
        }

        FeatureCollection { kind: "FeatureCollection", features: &self.features }.serialize(serializer)
    }
}

/// Closed regular polygon around a centre, as a GeoJSON `Polygon`
///
/// Vertices are `[lon, lat]`; the ring holds `vertices` points plus a closing
/// copy of the first. Longitude spacing widens with latitude, clamped so the
/// polygon stays finite near the poles.
pub fn synthetic_polygon(center_lat: f64, center_lon: f64, radius_km: f64, vertices: usize) -> Value {
    let dlat = radius_km / KM_PER_DEGREE_LAT;
    let dlon = dlat / center_lat.to_radians().cos().max(MIN_LON_SCALE);

    let mut ring: Vec<[f64; 2]> = (0..vertices)
        .map(|step| {
            let angle = 2.0 * PI * (step as f64 / vertices as f64);
            [center_lon + dlon * angle.cos(), center_lat + dlat * angle.sin()]
        })
        .collect();
    if let Some(first) = ring.first().copied() {
        ring.push(first);
    }

    json!({"type": "Polygon", "coordinates": [ring]})
}

/// Attaches geometry to coarse-area metrics
pub struct BoundaryResolver<'a> {
    codec: &'a AreaKeyCodec,
    radius_km: f64,
    vertices: usize,
}

impl<'a> BoundaryResolver<'a> {
    pub fn new(codec: &'a AreaKeyCodec) -> Self {
        Self::from_config(codec, &DesertConfig::default())
    }

    pub fn from_config(codec: &'a AreaKeyCodec, config: &DesertConfig) -> Self {
        Self {
            codec,
            radius_km: config.synthetic_radius_km,
            vertices: config.synthetic_vertices,
        }
    }

    fn feature(&self, id: String, key: &CoarseKey, metric: &AreaMetric, geometry: Value) -> BoundaryFeature {
        BoundaryFeature {
            id,
            area_code: self.codec.coarse_key_string(key),
            area_name: metric.area_name.clone(),
            imd_decile: metric.imd_decile,
            geometry,
        }
    }

    /// Metric key for a coarse name: display-name match first, then code-first resolution
    fn key_for_name(&self, name: &str, by_name: &HashMap<String, CoarseKey>, metrics: &AreaMetrics) -> Option<CoarseKey> {
        by_name.get(&name.trim().to_uppercase())
            .cloned()
            .or_else(|| Some(self.codec.resolve_coarse(name)).filter(|key| metrics.contains(key)))
    }

    /// Resolve one boundary feature per coarse area
    pub fn resolve(
        &self,
        metrics: &AreaMetrics,
        centroids: &HashMap<CoarseKey, (f64, f64)>,
        source: &BoundarySource,
    ) -> BoundaryCollection {
        let (features, origin) = if !source.coarse.is_empty() {
            (self.from_coarse(metrics, &source.coarse), BoundaryOrigin::Coarse)
        } else if !source.fine.is_empty() {
            (self.from_fine(metrics, &source.fine), BoundaryOrigin::Fine)
        } else {
            (Vec::new(), BoundaryOrigin::Synthetic)
        };

        if !features.is_empty() {
            log::info!("Resolved {} boundaries from {:?} features", features.len(), origin);
            return BoundaryCollection { features, origin };
        }

        if origin != BoundaryOrigin::Synthetic {
            log::warn!("{:?} boundaries matched no area; using synthetic polygons", origin);
        }
        BoundaryCollection {
            features: self.synthetic(metrics, centroids),
            origin: BoundaryOrigin::Synthetic,
        }
    }

    fn from_coarse(&self, metrics: &AreaMetrics, rows: &[BoundaryRow]) -> Vec<BoundaryFeature> {
        let by_name = metrics.keys_by_name();
        let mut emitted: HashSet<CoarseKey> = HashSet::new();
        let mut features = Vec::new();

        for row in rows {
            let code = row.code.as_deref().map(str::trim).filter(|c| !c.is_empty());
            let name = row.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

            let key = match code {
                Some(code) => {
                    let key = self.codec.coarse_key_from_code(code);
                    if !self.codec.is_in_scope_coarse(&key) {
                        continue;
                    }
                    Some(key).filter(|k| metrics.contains(k))
                }
                None => None,
            };
            let key = key.or_else(|| self.key_for_name(name?, &by_name, metrics));

            let Some(key) = key else { continue };
            let Some(metric) = metrics.get(&key) else { continue };
            if !emitted.insert(key.clone()) {
                continue;
            }

            let id = code.map(str::to_string).unwrap_or_else(|| self.codec.coarse_key_string(&key));
            features.push(self.feature(id, &key, metric, row.geometry.clone()));
        }

        features
    }

    fn from_fine(&self, metrics: &AreaMetrics, rows: &[BoundaryRow]) -> Vec<BoundaryFeature> {
        let by_name = metrics.keys_by_name();
        let mut order: Vec<CoarseKey> = Vec::new();
        let mut polygons: HashMap<CoarseKey, Vec<Value>> = HashMap::new();

        for row in rows {
            let in_scope = row.code.as_deref()
                .and_then(|c| self.codec.fine_code_from_area(c))
                .is_some_and(|fine| self.codec.is_in_scope_fine(&fine));
            if !in_scope {
                continue;
            }

            let Some(coarse_name) = row.name.as_deref().and_then(|n| self.codec.derive_coarse_name(n)) else {
                continue;
            };
            let Some(key) = self.key_for_name(&coarse_name, &by_name, metrics) else { continue };

            let parts = polygon_parts(&row.geometry);
            if parts.is_empty() {
                continue;
            }
            polygons.entry(key.clone())
                .or_insert_with(|| {
                    order.push(key.clone());
                    Vec::new()
                })
                .extend(parts);
        }

        order.into_iter()
            .filter_map(|key| {
                let metric = metrics.get(&key)?;
                let parts = polygons.remove(&key)?;
                let geometry = json!({"type": "MultiPolygon", "coordinates": parts});
                Some(self.feature(self.codec.coarse_key_string(&key), &key, metric, geometry))
            })
            .collect()
    }

    fn synthetic(&self, metrics: &AreaMetrics, centroids: &HashMap<CoarseKey, (f64, f64)>) -> Vec<BoundaryFeature> {
        let features: Vec<BoundaryFeature> = metrics.iter()
            .enumerate()
            .map(|(i, (key, metric))| {
                let offset = i as f64 * 0.02;
                let (lat, lon) = centroids.get(key).copied().unwrap_or((51.0 + offset, -1.0 - offset));
                let geometry = synthetic_polygon(lat, lon, self.radius_km, self.vertices);
                self.feature(self.codec.coarse_key_string(key), key, metric, geometry)
            })
            .collect();

        log::info!("Synthesised {} boundaries", features.len());
        features
    }
}

/// Polygon coordinate arrays of a Polygon or MultiPolygon geometry
fn polygon_parts(geometry: &Value) -> Vec<Value> {
    let coordinates = geometry.get("coordinates");
    match geometry.get("type").and_then(Value::as_str) {
        Some("Polygon") => coordinates.cloned().into_iter().collect(),
        Some("MultiPolygon") => coordinates
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}
