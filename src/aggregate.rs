/*!
 * Fine-to-coarse area aggregation
 *
 * Phase A rolls fine-area population and deprivation up to coarse areas and
 * records which coarse area each fine area belongs to. Phase B joins the
 * accepted practices onto those coarse areas. Coarse keys are always resolved
 * code-first through [`AreaKeyCodec::resolve_coarse`].
 */

use std::collections::HashMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Value};

use crate::{
    area_key::{AreaKey, AreaKeyCodec, CoarseKey, FineAreaCode},
    constants::RATE_PER,
    data_types::*,
    round_to,
};

/// Postcode -> coarse-area name hints from an earlier lookup run
#[derive(Debug, Clone, Default)]
pub struct CoarseNameHints {
    by_postcode: HashMap<String, String>,
}

impl CoarseNameHints {
    /// Build from a JSON object of `postcode -> {"msoa": name, ...}`
    pub fn from_json_map(map: Map<String, Value>) -> Self {
        let by_postcode = map.into_iter()
            .filter_map(|(postcode, entry)| {
                let name = entry.get("msoa")?.as_str()?.trim();
                (!name.is_empty()).then(|| (normalize_postcode(&postcode), name.to_string()))
            })
            .collect();
        Self { by_postcode }
    }

    pub fn insert(&mut self, postcode: &str, coarse_name: &str) {
        self.by_postcode.insert(normalize_postcode(postcode), coarse_name.trim().to_string());
    }

    pub fn get(&self, postcode_norm: &str) -> Option<&str> {
        self.by_postcode.get(postcode_norm).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_postcode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_postcode.is_empty()
    }
}

/// Fine area -> most frequent coarse-area name among practices in it
#[derive(Debug, Clone, Default)]
pub struct FineToCoarseMajority {
    by_fine: HashMap<FineAreaCode, String>,
}

impl FineToCoarseMajority {
    /// Tally coarse names per fine area over raw practice rows
    ///
    /// Ties go to the name seen first for that fine area.
    pub fn from_practice_rows(rows: &[PracticeRow], hints: &CoarseNameHints, codec: &AreaKeyCodec) -> Self {
        if hints.is_empty() {
            return Self::default();
        }

        let mut tallies: HashMap<FineAreaCode, Vec<(String, usize)>> = HashMap::new();
        for row in rows {
            let postcode = normalize_postcode(&row.postcode);
            let Some(name) = hints.get(&postcode) else { continue };
            let Some(fine) = row.area_code.as_deref().and_then(|a| codec.fine_code_from_area(a)) else {
                continue;
            };

            let tally = tallies.entry(fine).or_default();
            match tally.iter_mut().find(|(seen, _)| seen.as_str() == name) {
                Some((_, count)) => *count += 1,
                None => tally.push((name.to_string(), 1)),
            }
        }

        let by_fine = tallies.into_iter()
            .filter_map(|(fine, tally)| {
                let mut best: Option<(String, usize)> = None;
                for (name, count) in tally {
                    if best.as_ref().map_or(true, |(_, top)| count > *top) {
                        best = Some((name, count));
                    }
                }
                best.map(|(name, _)| (fine, name))
            })
            .collect();

        Self { by_fine }
    }

    pub fn from_pairs<I, S>(pairs: I, codec: &AreaKeyCodec) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: AsRef<str>,
    {
        let by_fine = pairs.into_iter()
            .filter_map(|(fine, name)| {
                Some((codec.fine_code_from_area(fine.as_ref())?, name.as_ref().trim().to_string()))
            })
            .collect();
        Self { by_fine }
    }

    pub fn get(&self, fine: &FineAreaCode) -> Option<&str> {
        self.by_fine.get(fine).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_fine.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_fine.is_empty()
    }
}

/// Coarse-area metrics in first-observed order
#[derive(Debug, Clone, Default)]
pub struct AreaMetrics {
    keys: Vec<CoarseKey>,
    metrics: Vec<AreaMetric>,
    index: HashMap<CoarseKey, usize>,
}

impl AreaMetrics {
    fn push(&mut self, key: CoarseKey, metric: AreaMetric) {
        self.index.insert(key.clone(), self.keys.len());
        self.keys.push(key);
        self.metrics.push(metric);
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn get(&self, key: &CoarseKey) -> Option<&AreaMetric> {
        self.index.get(key).map(|&i| &self.metrics[i])
    }

    pub fn contains(&self, key: &CoarseKey) -> bool {
        self.index.contains_key(key)
    }

    /// Position of a key in output order
    pub fn position(&self, key: &CoarseKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Metric by namespaced area code (`MSOA::...`)
    pub fn get_by_area_code(&self, area_code: &str) -> Option<&AreaMetric> {
        self.metrics.iter().find(|m| m.area_code == area_code)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CoarseKey, &AreaMetric)> {
        self.keys.iter().zip(self.metrics.iter())
    }

    pub fn values(&self) -> impl Iterator<Item = &AreaMetric> {
        self.metrics.iter()
    }

    /// Uppercased display name -> key; later areas win on duplicate names
    pub fn keys_by_name(&self) -> HashMap<String, CoarseKey> {
        self.iter()
            .map(|(key, metric)| (metric.area_name.trim().to_uppercase(), key.clone()))
            .collect()
    }
}

impl Serialize for AreaMetrics {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.metrics.len()))?;
        for metric in &self.metrics {
            map.serialize_entry(&metric.area_code, metric)?;
        }
        map.end()
    }
}

/// Result of [`AreaAggregator::aggregate`]
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
    pub metrics: AreaMetrics,
    /// Mean (lat, lon) of geocoded practices per coarse area
    pub centroids: HashMap<CoarseKey, (f64, f64)>,
    /// Fine -> coarse mapping derived from the population table
    pub fine_to_coarse: HashMap<FineAreaCode, CoarseKey>,
}

#[derive(Debug, Default)]
struct PopulationSum {
    total: u64,
    adults: u64,
    children: u64,
    weighted_decile: f64,
    weight: u64,
}

#[derive(Debug, Default)]
struct PracticeCounts {
    total: usize,
    adults_yes: usize,
    children_yes: usize,
    lat_sum: f64,
    lon_sum: f64,
    located: usize,
}

/// Rolls fine areas up into coarse areas and joins practices
pub struct AreaAggregator<'a> {
    codec: &'a AreaKeyCodec,
    rate_per: f64,
}

impl<'a> AreaAggregator<'a> {
    pub fn new(codec: &'a AreaKeyCodec) -> Self {
        Self { codec, rate_per: RATE_PER }
    }

    /// Override the population scale of per-area rates
    pub fn with_rate_per(mut self, rate_per: f64) -> Self {
        self.rate_per = rate_per;
        self
    }

    fn rate(&self, count: usize, population: u64) -> f64 {
        if population == 0 {
            0.0
        } else {
            round_to(count as f64 / population as f64 * self.rate_per, 4)
        }
    }

    /// In-scope fine code for a raw table key; coarse-namespaced keys are skipped
    fn in_scope_fine(&self, raw: &str) -> Option<FineAreaCode> {
        let key = self.codec.classify(raw)?;
        if !self.codec.is_in_scope(&key) {
            return None;
        }
        match key {
            AreaKey::Fine(code) => Some(code),
            AreaKey::Coarse(_) => None,
        }
    }

    /// In-scope coarse key for a coarse name
    fn in_scope_coarse(&self, name: &str) -> Option<CoarseKey> {
        let key = self.codec.resolve_coarse(name);
        self.codec.is_in_scope_coarse(&key).then_some(key)
    }

    /// Run both phases and derive the per-area metrics
    pub fn aggregate(
        &self,
        population: &[PopulationRow],
        deprivation: &[DeprivationRow],
        majority: &FineToCoarseMajority,
        practices: &[Practice],
    ) -> Aggregation {
        let deciles: HashMap<&str, u8> = deprivation.iter()
            .map(|row| (row.area_code.trim(), row.imd_decile))
            .collect();

        let mut order: Vec<CoarseKey> = Vec::new();
        let mut names: HashMap<CoarseKey, String> = HashMap::new();
        let mut sums: HashMap<CoarseKey, PopulationSum> = HashMap::new();
        let mut fine_to_coarse: HashMap<FineAreaCode, CoarseKey> = HashMap::new();

        // Phase A: population and deprivation
        for row in population {
            let raw_area = row.area_code.trim();
            let Some(fine) = self.in_scope_fine(raw_area) else { continue };

            let coarse_name = majority.get(&fine)
                .map(str::to_string)
                .or_else(|| self.codec.derive_coarse_name(&row.area_name));
            let Some(coarse_name) = coarse_name else { continue };

            let Some(key) = self.in_scope_coarse(&coarse_name) else { continue };

            names.insert(key.clone(), coarse_name);
            let sum = sums.entry(key.clone()).or_insert_with(|| {
                order.push(key.clone());
                PopulationSum::default()
            });
            sum.total += row.population_total;
            sum.adults += row.population_adults;
            sum.children += row.population_children;

            let fine_key = self.codec.fine_key(&fine);
            let decile = deciles.get(raw_area)
                .or_else(|| deciles.get(fine.as_str()))
                .or_else(|| deciles.get(fine_key.as_str()));
            if let Some(&decile) = decile {
                if row.population_total > 0 {
                    sum.weighted_decile += decile as f64 * row.population_total as f64;
                    sum.weight += row.population_total;
                }
            }

            fine_to_coarse.insert(fine, key);
        }

        // Phase B: practice join
        let mut counts: HashMap<CoarseKey, PracticeCounts> = HashMap::new();
        let mut practice_only: Vec<CoarseKey> = Vec::new();
        for practice in practices {
            let Some(fine) = practice.area_code.as_deref().and_then(|a| self.in_scope_fine(a)) else {
                continue;
            };

            let key = match fine_to_coarse.get(&fine) {
                Some(key) => key.clone(),
                None => {
                    let Some(name) = majority.get(&fine) else { continue };
                    let Some(key) = self.in_scope_coarse(name) else { continue };
                    names.entry(key.clone()).or_insert_with(|| name.to_string());
                    key
                }
            };

            let entry = counts.entry(key.clone()).or_insert_with(|| {
                if !sums.contains_key(&key) {
                    practice_only.push(key.clone());
                }
                PracticeCounts::default()
            });
            entry.total += 1;
            if practice.accepting_adults == Availability::Yes {
                entry.adults_yes += 1;
            }
            if practice.accepting_children == Availability::Yes {
                entry.children_yes += 1;
            }
            if let Some((lat, lon)) = practice.coordinates() {
                entry.lat_sum += lat;
                entry.lon_sum += lon;
                entry.located += 1;
            }
        }

        let mut metrics = AreaMetrics::default();
        let empty_sum = PopulationSum::default();
        let empty_counts = PracticeCounts::default();
        for key in order.into_iter().chain(practice_only) {
            let sum = sums.get(&key).unwrap_or(&empty_sum);
            let count = counts.get(&key).unwrap_or(&empty_counts);
            let imd_decile = if sum.weight > 0 {
                let mean = (sum.weighted_decile / sum.weight as f64).round_ties_even();
                Decile::Known(mean.clamp(1.0, 10.0) as u8)
            } else {
                Decile::Unknown
            };

            let metric = AreaMetric {
                area_code: self.codec.coarse_key_string(&key),
                area_name: names.get(&key).cloned().unwrap_or_else(|| key.value().to_string()),
                population_total: sum.total,
                population_adults: sum.adults,
                population_children: sum.children,
                practice_count: count.total,
                accepting_adults_count: count.adults_yes,
                accepting_children_count: count.children_yes,
                practices_per_10k: self.rate(count.total, sum.total),
                accepting_adults_per_10k_adults: self.rate(count.adults_yes, sum.adults),
                accepting_children_per_10k_children: self.rate(count.children_yes, sum.children),
                imd_decile,
            };
            metrics.push(key, metric);
        }

        let centroids = counts.iter()
            .filter(|(_, c)| c.located > 0)
            .map(|(key, c)| {
                let n = c.located as f64;
                (key.clone(), (c.lat_sum / n, c.lon_sum / n))
            })
            .collect();

        log::info!(
            "Aggregated {} fine areas into {} coarse areas ({} from practices only)",
            fine_to_coarse.len(),
            metrics.len(),
            metrics.len() - sums.len()
        );

        Aggregation { metrics, centroids, fine_to_coarse }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pop(code: &str, name: &str, total: u64, adults: u64, children: u64) -> PopulationRow {
        PopulationRow {
            area_code: code.into(),
            area_name: name.into(),
            population_total: total,
            population_adults: adults,
            population_children: children,
        }
    }

    fn practice(id: &str, area: &str, adults: Availability, children: Availability) -> Practice {
        Practice {
            practice_id: id.into(),
            practice_name: id.into(),
            address: String::new(),
            postcode: "SW1A 1AA".into(),
            postcode_norm: "SW1A1AA".into(),
            lat: Some(51.0),
            lon: Some(-0.5),
            area_code: Some(area.into()),
            geocode_failed: false,
            accepting_adults: adults,
            accepting_children: children,
        }
    }

    #[test]
    fn test_weighted_decile() {
        let codec = AreaKeyCodec::default();
        let population = vec![
            pop("LSOA::E01000001", "Fooborough 026A", 100, 80, 20),
            pop("LSOA::E01000002", "Fooborough 026B", 300, 200, 100),
        ];
        let deprivation = vec![
            DeprivationRow { area_code: "LSOA::E01000001".into(), imd_decile: 2 },
            DeprivationRow { area_code: "E01000002".into(), imd_decile: 6 },
        ];
        let out = AreaAggregator::new(&codec)
            .aggregate(&population, &deprivation, &FineToCoarseMajority::default(), &[]);

        assert_eq!(out.metrics.len(), 1);
        let metric = out.metrics.get(&CoarseKey::Name("Fooborough 026".into())).unwrap();
        assert_eq!(metric.area_code, "MSOA::Fooborough 026");
        assert_eq!(metric.population_total, 400);
        assert_eq!(metric.imd_decile, Decile::Known(5));
    }

    #[test]
    fn test_zero_population_rates() {
        let codec = AreaKeyCodec::default();
        let population = vec![pop("LSOA::E01000001", "Empty 001A", 0, 0, 0)];
        let practices = vec![practice("P1", "LSOA::E01000001", Availability::Yes, Availability::Yes)];
        let out = AreaAggregator::new(&codec)
            .aggregate(&population, &[], &FineToCoarseMajority::default(), &practices);

        let metric = out.metrics.values().next().unwrap();
        assert_eq!(metric.practice_count, 1);
        assert_eq!(metric.practices_per_10k, 0.0);
        assert_eq!(metric.accepting_adults_per_10k_adults, 0.0);
        assert_eq!(metric.imd_decile, Decile::Unknown);
    }

    #[test]
    fn test_practice_join_rates() {
        let codec = AreaKeyCodec::default();
        let population = vec![pop("LSOA::E01000001", "X 001A", 1500, 1000, 500)];
        let practices = vec![
            practice("P1", "LSOA::E01000001", Availability::Yes, Availability::No),
            practice("P2", "E01000001", Availability::No, Availability::Yes),
        ];
        let out = AreaAggregator::new(&codec)
            .aggregate(&population, &[], &FineToCoarseMajority::default(), &practices);

        let metric = out.metrics.values().next().unwrap();
        assert_eq!(metric.accepting_adults_count, 1);
        assert_eq!(metric.accepting_children_count, 1);
        assert_eq!(metric.accepting_adults_per_10k_adults, 10.0);
        assert_eq!(metric.accepting_children_per_10k_children, 20.0);
        assert_eq!(metric.practices_per_10k, round_to(2.0 / 1500.0 * 10_000.0, 4));
        assert_eq!(out.centroids[&CoarseKey::Name("X 001".into())], (51.0, -0.5));
    }

    #[test]
    fn test_out_of_scope_excluded() {
        let codec = AreaKeyCodec::default();
        let population = vec![
            pop("LSOA::W01000001", "Cardiff 001A", 1000, 800, 200),
            pop("LSOA::E01000001", "Leeds 001A", 1000, 800, 200),
        ];
        let practices = vec![practice("P1", "LSOA::W01000001", Availability::Yes, Availability::Yes)];
        let out = AreaAggregator::new(&codec)
            .aggregate(&population, &[], &FineToCoarseMajority::default(), &practices);

        assert_eq!(out.metrics.len(), 1);
        let metric = out.metrics.values().next().unwrap();
        assert_eq!(metric.area_name, "Leeds 001");
        assert_eq!(metric.practice_count, 0);
    }

    #[test]
    fn test_coarse_namespaced_rows_are_skipped() {
        let codec = AreaKeyCodec::default();
        let population = vec![
            pop("MSOA::E02000001", "Leeds 001", 5000, 4000, 1000),
            pop("LSOA::E01000001", "Leeds 002A", 1000, 800, 200),
        ];
        let practices = vec![
            practice("P1", "MSOA::E02000001", Availability::Yes, Availability::Yes),
            practice("P2", "LSOA::E01000001", Availability::Yes, Availability::No),
        ];
        let out = AreaAggregator::new(&codec)
            .aggregate(&population, &[], &FineToCoarseMajority::default(), &practices);

        assert_eq!(out.metrics.len(), 1);
        let metric = out.metrics.get(&CoarseKey::Name("Leeds 002".into())).unwrap();
        assert_eq!(metric.population_total, 1000);
        assert_eq!(metric.practice_count, 1);
    }

    #[test]
    fn test_code_first_keys_and_majority_fallback() {
        let codec = AreaKeyCodec::default()
            .with_coarse_codes([("Leeds 001", "E02000001"), ("Leeds 002", "E02000002")]);
        let majority = FineToCoarseMajority::from_pairs(
            [("LSOA::E01000001", "LEEDS 001"), ("LSOA::E01000009", "Leeds 002")],
            &codec,
        );
        let population = vec![pop("LSOA::E01000001", "Something Else 005C", 500, 400, 100)];
        let practices = vec![
            practice("P1", "LSOA::E01000001", Availability::Yes, Availability::Unknown),
            practice("P2", "LSOA::E01000009", Availability::Unknown, Availability::Unknown),
        ];
        let out = AreaAggregator::new(&codec).aggregate(&population, &[], &majority, &practices);

        let keys: Vec<&CoarseKey> = out.metrics.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![
            &CoarseKey::Code("E02000001".into()),
            &CoarseKey::Code("E02000002".into()),
        ]);
        let practice_only = out.metrics.get(&CoarseKey::Code("E02000002".into())).unwrap();
        assert_eq!(practice_only.population_total, 0);
        assert_eq!(practice_only.practice_count, 1);
        assert_eq!(practice_only.area_name, "Leeds 002");
        assert_eq!(practice_only.imd_decile, Decile::Unknown);
    }

    #[test]
    fn test_majority_ties_go_to_first_seen() {
        let codec = AreaKeyCodec::default();
        let mut hints = CoarseNameHints::default();
        hints.insert("SW1A 1AA", "Westminster 018");
        hints.insert("SW1A 2AA", "Westminster 019");
        hints.insert("SW1A 3AA", "Westminster 019");

        let row = |postcode: &str, area: &str| PracticeRow {
            postcode: postcode.into(),
            area_code: Some(area.into()),
            ..Default::default()
        };
        let rows = vec![
            row("SW1A1AA", "LSOA::E01000001"),
            row("SW1A2AA", "LSOA::E01000001"),
            row("SW1A1AA", "LSOA::E01000002"),
            row("SW1A2AA", "LSOA::E01000002"),
            row("SW1A3AA", "LSOA::E01000002"),
        ];
        let majority = FineToCoarseMajority::from_practice_rows(&rows, &hints, &codec);
        let code = |c: &str| codec.fine_code_from_area(c).unwrap();
        assert_eq!(majority.get(&code("E01000001")), Some("Westminster 018"));
        assert_eq!(majority.get(&code("E01000002")), Some("Westminster 019"));
    }

    #[test]
    fn test_metrics_serialize_as_ordered_map() {
        let codec = AreaKeyCodec::default();
        let population = vec![
            pop("LSOA::E01000010", "Zeta 001A", 10, 5, 5),
            pop("LSOA::E01000020", "Alpha 001A", 10, 5, 5),
        ];
        let out = AreaAggregator::new(&codec)
            .aggregate(&population, &[], &FineToCoarseMajority::default(), &[]);
        let text = serde_json::to_string(&out.metrics).unwrap();
        assert!(text.find("MSOA::Zeta 001").unwrap() < text.find("MSOA::Alpha 001").unwrap());
        assert!(text.contains("\"imd_decile\":\"unknown\""));
    }
}
