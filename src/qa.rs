/*!
 * Dataset quality reporting
 *
 * A pure summary over the accepted practices and the warnings raised while
 * building them: geocoding success, warning tallies, the first warnings for
 * sampling, areas with the most geocoding gaps and pairwise distance stats.
 */

use std::collections::HashMap;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::{
    config::DesertConfig,
    constants::{EARTH_RADIUS_KM, UNASSIGNED_AREA},
    data_types::Practice,
    practice::WarningTally,
    round_to,
};

/// Great-circle distance in kilometres
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// Min, median and max of the pairwise distances; all `None` under two points
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DistanceSummary {
    pub min_km: Option<f64>,
    pub median_km: Option<f64>,
    pub max_km: Option<f64>,
}

impl DistanceSummary {
    pub fn from_distances(mut distances: Vec<f64>) -> Self {
        if distances.is_empty() {
            return Self::default();
        }
        distances.sort_by(f64::total_cmp);

        let n = distances.len();
        let mid = n / 2;
        let median = if n % 2 == 1 {
            distances[mid]
        } else {
            (distances[mid - 1] + distances[mid]) / 2.0
        };

        Self {
            min_km: Some(round_to(distances[0], 3)),
            median_km: Some(round_to(median, 3)),
            max_km: Some(round_to(distances[n - 1], 3)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaCounts {
    pub practices_total: usize,
    pub practices_geocoded: usize,
    /// Geocoded practices with at least one `yes`/`no` availability flag
    pub practices_availability_known: usize,
}

/// The QA report written as `qa_report.json`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaReport {
    pub generated_at_utc: DateTime<Utc>,
    pub counts: QaCounts,
    /// Percentage of practices geocoded, two decimals
    pub geocoding_success_rate: f64,
    pub warning_counts: WarningTally,
    pub top_missing_data_examples: Vec<String>,
    /// `(area, count)` for practices without coordinates or area, most common first
    pub top_areas_with_missing_data: Vec<(String, usize)>,
    pub distance_summary_between_practices: DistanceSummary,
}

impl QaReport {
    /// Print a short human-readable summary
    pub fn print_summary(&self) {
        println!("=== Dental Deserts QA Report ===");
        println!("Generated: {}", self.generated_at_utc.to_rfc3339());
        println!("Practices: {}", self.counts.practices_total);
        println!("  Geocoded: {} ({:.2}%)", self.counts.practices_geocoded, self.geocoding_success_rate);
        println!("  Availability known: {}", self.counts.practices_availability_known);

        if self.warning_counts.total() > 0 {
            println!("Warnings:");
            for (kind, count) in self.warning_counts.iter() {
                println!("  {}: {}", kind.as_str(), count);
            }
        }

        let d = &self.distance_summary_between_practices;
        match (d.min_km, d.median_km, d.max_km) {
            (Some(min), Some(median), Some(max)) => {
                println!("Distance between practices: min {:.3} km, median {:.3} km, max {:.3} km", min, median, max);
            }
            _ => println!("Distance between practices: n/a (fewer than two geocoded practices)"),
        }

        if !self.top_areas_with_missing_data.is_empty() {
            println!("Areas with missing data:");
            for (area, count) in &self.top_areas_with_missing_data {
                println!("  {}: {}", area, count);
            }
        }
    }
}

/// Builds [`QaReport`]s
#[derive(Debug, Clone)]
pub struct QaReporter {
    top_n: usize,
    parallel: bool,
}

impl Default for QaReporter {
    fn default() -> Self {
        Self { top_n: 10, parallel: true }
    }
}

impl QaReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &DesertConfig) -> Self {
        Self {
            top_n: config.top_n,
            parallel: config.parallel_distances,
        }
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Report stamped with the current time
    pub fn report(&self, practices: &[Practice], warning_counts: &WarningTally, warnings: &[String]) -> QaReport {
        self.report_at(practices, warning_counts, warnings, Utc::now())
    }

    /// Report stamped with `generated_at`
    pub fn report_at(
        &self,
        practices: &[Practice],
        warning_counts: &WarningTally,
        warnings: &[String],
        generated_at: DateTime<Utc>,
    ) -> QaReport {
        let points: Vec<(f64, f64)> = practices.iter().filter_map(Practice::coordinates).collect();
        let availability_known = practices.iter()
            .filter(|p| p.is_geocoded() && p.has_known_availability())
            .count();

        let geocoding_success_rate = if practices.is_empty() {
            0.0
        } else {
            round_to(points.len() as f64 / practices.len() as f64 * 100.0, 2)
        };

        QaReport {
            generated_at_utc: generated_at,
            counts: QaCounts {
                practices_total: practices.len(),
                practices_geocoded: points.len(),
                practices_availability_known: availability_known,
            },
            geocoding_success_rate,
            warning_counts: warning_counts.clone(),
            top_missing_data_examples: warnings.iter().take(self.top_n).cloned().collect(),
            top_areas_with_missing_data: self.areas_with_missing_data(practices),
            distance_summary_between_practices: DistanceSummary::from_distances(self.pairwise_distances(&points)),
        }
    }

    fn areas_with_missing_data(&self, practices: &[Practice]) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for practice in practices {
            if !(practice.geocode_failed || practice.area_code.is_none()) {
                continue;
            }
            let area = practice.area_code.as_deref().unwrap_or(UNASSIGNED_AREA);
            match index.get(area) {
                Some(&i) => counts[i].1 += 1,
                None => {
                    index.insert(area, counts.len());
                    counts.push((area.to_string(), 1));
                }
            }
        }

        // Stable sort keeps encounter order among equal counts
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.truncate(self.top_n);
        counts
    }

    fn pairwise_distances(&self, points: &[(f64, f64)]) -> Vec<f64> {
        let row = |i: usize| -> Vec<f64> {
            let (lat1, lon1) = points[i];
            points[i + 1..].iter()
                .map(|&(lat2, lon2)| haversine_km(lat1, lon1, lat2, lon2))
                .collect()
        };

        #[cfg(feature = "parallel")]
        {
            if self.parallel {
                return (0..points.len()).into_par_iter().flat_map_iter(row).collect();
            }
        }

        (0..points.len()).flat_map(row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::Availability;
    use crate::practice::WarningKind;
    use chrono::TimeZone;

    /// Degrees of latitude spanning `km` along a meridian
    fn lat_for_km(km: f64) -> f64 {
        (km / EARTH_RADIUS_KM).to_degrees()
    }

    fn practice(id: &str, coords: Option<(f64, f64)>, area: Option<&str>) -> Practice {
        Practice {
            practice_id: id.into(),
            practice_name: id.into(),
            address: String::new(),
            postcode: "SW1A 1AA".into(),
            postcode_norm: "SW1A1AA".into(),
            lat: coords.map(|c| c.0),
            lon: coords.map(|c| c.1),
            area_code: area.map(Into::into),
            geocode_failed: coords.is_none(),
            accepting_adults: Availability::Unknown,
            accepting_children: Availability::Unknown,
        }
    }

    #[test]
    fn test_haversine_known_distance() {
        // London to Paris, roughly 343.5 km
        let d = haversine_km(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((d - 343.5).abs() < 1.0, "{d}");
        assert_eq!(haversine_km(10.0, 10.0, 10.0, 10.0), 0.0);
    }

    #[test]
    fn test_median_odd_and_even() {
        let odd = DistanceSummary::from_distances(vec![3.0, 1.0, 2.0]);
        assert_eq!(odd.median_km, Some(2.0));
        assert_eq!(odd.min_km, Some(1.0));
        assert_eq!(odd.max_km, Some(3.0));

        let even = DistanceSummary::from_distances(vec![1.0, 3.0]);
        assert_eq!(even.median_km, Some(2.0));

        assert_eq!(DistanceSummary::from_distances(Vec::new()), DistanceSummary::default());
    }

    #[test]
    fn test_three_practices_on_a_meridian() {
        let practices = vec![
            practice("A", Some((0.0, 0.0)), None),
            practice("B", Some((lat_for_km(1.0), 0.0)), None),
            practice("C", Some((lat_for_km(3.0), 0.0)), None),
        ];
        for parallel in [false, true] {
            let report = QaReporter::new()
                .with_parallel(parallel)
                .report(&practices, &WarningTally::default(), &[]);
            let d = report.distance_summary_between_practices;
            assert_eq!(d.min_km, Some(1.0));
            assert_eq!(d.median_km, Some(2.0));
            assert_eq!(d.max_km, Some(3.0));
        }
    }

    #[test]
    fn test_fewer_than_two_geocoded() {
        let practices = vec![practice("A", Some((51.0, 0.0)), None), practice("B", None, None)];
        let report = QaReporter::new().report(&practices, &WarningTally::default(), &[]);
        assert_eq!(report.distance_summary_between_practices.median_km, None);
        assert_eq!(report.geocoding_success_rate, 50.0);

        let value = serde_json::to_value(&report).unwrap();
        assert!(value["distance_summary_between_practices"]["min_km"].is_null());
    }

    #[test]
    fn test_success_rate_rounding_and_empty() {
        let practices = vec![
            practice("A", Some((51.0, 0.0)), None),
            practice("B", Some((52.0, 0.0)), None),
            practice("C", None, None),
        ];
        let report = QaReporter::new().report(&practices, &WarningTally::default(), &[]);
        assert_eq!(report.geocoding_success_rate, 66.67);

        let empty = QaReporter::new().report(&[], &WarningTally::default(), &[]);
        assert_eq!(empty.geocoding_success_rate, 0.0);
        assert_eq!(empty.counts.practices_total, 0);
    }

    #[test]
    fn test_top_lists() {
        let practices = vec![
            practice("A", None, Some("LSOA::E01000002")),
            practice("B", None, None),
            practice("C", None, Some("LSOA::E01000002")),
            practice("D", Some((51.0, 0.0)), None),
            practice("E", Some((51.1, 0.0)), Some("LSOA::E01000003")),
            practice("F", None, Some("LSOA::E01000004")),
        ];
        let warnings: Vec<String> = (0..15).map(|i| format!("P{}: missing postcode", i)).collect();
        let mut tally = WarningTally::default();
        tally.record(WarningKind::GeocodeFailed);

        let generated = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let report = QaReporter::new().report_at(&practices, &tally, &warnings, generated);

        assert_eq!(report.top_missing_data_examples.len(), 10);
        assert_eq!(report.top_missing_data_examples[0], "P0: missing postcode");
        assert_eq!(report.top_areas_with_missing_data, vec![
            ("LSOA::E01000002".to_string(), 2),
            ("unassigned".to_string(), 2),
            ("LSOA::E01000004".to_string(), 1),
        ]);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["generated_at_utc"], "2024-05-01T12:00:00Z");
        assert_eq!(value["warning_counts"]["geocode_failed"], 1);
        assert_eq!(value["top_areas_with_missing_data"][0][0], "LSOA::E01000002");
    }
}
