/*!
 * Practice validation, deduplication and geocoding
 *
 * Each raw practice row is deduplicated on (lowercased name, normalised
 * postcode), postcode-checked, joined to its availability flags and
 * geocoded. Rows failing the postcode checks are rejected; availability and
 * geocoding gaps only produce warnings.
 */

use std::collections::{BTreeMap, HashSet};
use serde::Serialize;

#[cfg(feature = "progress")]
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    area_key::AreaKeyCodec,
    data_types::*,
    geocode::{GeocodeCache, GeocodeRequest, GeocodeResolver, LiveLookup, PostcodeLookup},
};

/// Warning categories tallied while building practices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    DeduplicatedPractices,
    MissingPostcode,
    InvalidPostcode,
    MissingAvailability,
    GeocodeFailed,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::DeduplicatedPractices => "deduplicated_practices",
            WarningKind::MissingPostcode => "missing_postcode",
            WarningKind::InvalidPostcode => "invalid_postcode",
            WarningKind::MissingAvailability => "missing_availability",
            WarningKind::GeocodeFailed => "geocode_failed",
        }
    }
}

/// Count per warning category; categories never seen are absent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct WarningTally(BTreeMap<WarningKind, usize>);

impl WarningTally {
    pub fn record(&mut self, kind: WarningKind) {
        *self.0.entry(kind).or_insert(0) += 1;
    }

    pub fn get(&self, kind: WarningKind) -> usize {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WarningKind, usize)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

/// Why a row was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Duplicate,
    MissingPostcode,
    InvalidPostcode,
}

/// A dropped practice row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub practice_id: String,
    pub reason: RejectReason,
}

/// Output of [`PracticeBuilder::build`]
#[derive(Debug, Clone, Default)]
pub struct PracticeBuild {
    /// Accepted practices in input order, geocoded or not
    pub practices: Vec<Practice>,
    pub warning_counts: WarningTally,
    /// Human-readable warnings in the order they were raised
    pub warnings: Vec<String>,
    pub rejections: Vec<Rejection>,
}

impl PracticeBuild {
    fn reject(&mut self, row: &PracticeRow, reason: RejectReason, kind: WarningKind, message: Option<String>) {
        self.warning_counts.record(kind);
        self.warnings.extend(message);
        self.rejections.push(Rejection {
            practice_id: row.practice_id.clone(),
            reason,
        });
    }
}

/// Validates, deduplicates and geocodes practice rows
pub struct PracticeBuilder<'a> {
    codec: &'a AreaKeyCodec,
    show_progress: bool,
}

impl<'a> PracticeBuilder<'a> {
    pub fn new(codec: &'a AreaKeyCodec) -> Self {
        Self { codec, show_progress: false }
    }

    /// Show a progress bar while building (needs the `progress` feature)
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    #[cfg(feature = "progress")]
    fn progress_bar(&self, len: usize) -> Option<ProgressBar> {
        if !self.show_progress {
            return None;
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} practices ({eta})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Some(pb)
    }

    /// Build accepted practices from raw rows
    pub fn build(
        &self,
        rows: &[PracticeRow],
        availability: &AvailabilityIndex,
        cache: &mut GeocodeCache,
        lookup: &PostcodeLookup,
        live: &dyn LiveLookup,
    ) -> PracticeBuild {
        let mut resolver = GeocodeResolver::new(self.codec, cache, lookup, live);
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut build = PracticeBuild::default();

        #[cfg(feature = "progress")]
        let progress = self.progress_bar(rows.len());

        for row in rows {
            #[cfg(feature = "progress")]
            {
                if let Some(pb) = &progress {
                    pb.inc(1);
                }
            }

            let practice_id = row.practice_id.trim();
            let postcode_norm = normalize_postcode(&row.postcode);

            // Dedup runs before validation so blank postcodes collapse too
            let dedup_key = (row.practice_name.trim().to_lowercase(), postcode_norm.clone());
            if !seen.insert(dedup_key) {
                build.reject(row, RejectReason::Duplicate, WarningKind::DeduplicatedPractices, None);
                continue;
            }

            if postcode_norm.is_empty() {
                let message = format!("{}: missing postcode", practice_id);
                build.reject(row, RejectReason::MissingPostcode, WarningKind::MissingPostcode, Some(message));
                continue;
            }

            if !self.codec.is_valid_postcode(&postcode_norm) {
                let message = format!("{}: invalid postcode '{}'", practice_id, row.postcode);
                build.reject(row, RejectReason::InvalidPostcode, WarningKind::InvalidPostcode, Some(message));
                continue;
            }

            let (accepting_adults, accepting_children) = match availability.get(practice_id) {
                Some(flags) => (flags.accepting_adults, flags.accepting_children),
                None => {
                    build.warning_counts.record(WarningKind::MissingAvailability);
                    (Availability::Unknown, Availability::Unknown)
                }
            };

            let source_area = row.area_code.as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty());
            let hit = resolver.resolve(&GeocodeRequest {
                postcode_norm: &postcode_norm,
                source_lat: row.lat.as_deref(),
                source_lon: row.lon.as_deref(),
                source_area,
            });

            // An unlocated practice is not assigned to any area
            let (lat, lon, area_code) = match hit {
                Some(hit) => (Some(hit.lat), Some(hit.lon), hit.area_code),
                None => {
                    build.warning_counts.record(WarningKind::GeocodeFailed);
                    build.warnings.push(format!("{}: geocode lookup failed for {}", practice_id, postcode_norm));
                    (None, None, None)
                }
            };

            build.practices.push(Practice {
                practice_id: practice_id.to_string(),
                practice_name: row.practice_name.trim().to_string(),
                address: row.address.trim().to_string(),
                postcode: row.postcode.trim().to_uppercase(),
                postcode_norm,
                lat,
                lon,
                area_code,
                geocode_failed: lat.is_none(),
                accepting_adults,
                accepting_children,
            });
        }

        #[cfg(feature = "progress")]
        {
            if let Some(pb) = progress {
                pb.finish_and_clear();
            }
        }

        log::info!(
            "Accepted {} of {} practice rows ({} rejected, {} warnings)",
            build.practices.len(),
            rows.len(),
            build.rejections.len(),
            build.warning_counts.total()
        );
        build
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::NoLiveLookup;

    fn row(id: &str, name: &str, postcode: &str) -> PracticeRow {
        PracticeRow {
            practice_id: id.into(),
            practice_name: name.into(),
            address: format!("{} High Street", id),
            postcode: postcode.into(),
            lat: Some("51.5".into()),
            lon: Some("-0.1".into()),
            area_code: Some("LSOA::E01000001".into()),
        }
    }

    fn build(rows: &[PracticeRow], availability: &AvailabilityIndex) -> PracticeBuild {
        let codec = AreaKeyCodec::default();
        let mut cache = GeocodeCache::new();
        PracticeBuilder::new(&codec)
            .build(rows, availability, &mut cache, &PostcodeLookup::default(), &NoLiveLookup)
    }

    #[test]
    fn test_dedup_keeps_first() {
        let rows = vec![
            row("P1", "Smile Dental", "SW1A 1AA"),
            row("P2", "  smile dental ", "sw1a1aa"),
            row("P3", "Smile Dental", "M1 1AE"),
        ];
        let out = build(&rows, &AvailabilityIndex::default());
        let ids: Vec<&str> = out.practices.iter().map(|p| p.practice_id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P3"]);
        assert_eq!(out.warning_counts.get(WarningKind::DeduplicatedPractices), 1);
        assert_eq!(out.rejections[0].practice_id, "P2");
    }

    #[test]
    fn test_postcode_rejections() {
        let rows = vec![
            row("P1", "A", "   "),
            row("P2", "B", "NOT A CODE"),
            row("P3", "C", "SW1A 1AA"),
        ];
        let out = build(&rows, &AvailabilityIndex::default());
        assert_eq!(out.practices.len(), 1);
        assert_eq!(out.warning_counts.get(WarningKind::MissingPostcode), 1);
        assert_eq!(out.warning_counts.get(WarningKind::InvalidPostcode), 1);
        assert_eq!(out.warnings, vec![
            "P1: missing postcode".to_string(),
            "P2: invalid postcode 'NOT A CODE'".to_string(),
        ]);
    }

    #[test]
    fn test_invalid_postcode_warning_shows_field_as_given() {
        let rows = vec![row("P1", "A", " NOT A PC ")];
        let out = build(&rows, &AvailabilityIndex::default());
        assert!(out.practices.is_empty());
        assert_eq!(out.warnings, vec!["P1: invalid postcode ' NOT A PC '".to_string()]);
    }

    #[test]
    fn test_missing_availability_is_soft() {
        let availability = AvailabilityIndex::from_rows(vec![AvailabilityRow {
            practice_id: "P1".into(),
            accepting_adults: Availability::Yes,
            accepting_children: Availability::No,
        }]);
        let rows = vec![row("P1", "A", "SW1A 1AA"), row("P2", "B", "M1 1AE")];
        let out = build(&rows, &availability);
        assert_eq!(out.practices.len(), 2);
        assert_eq!(out.practices[0].accepting_adults, Availability::Yes);
        assert_eq!(out.practices[1].accepting_children, Availability::Unknown);
        assert_eq!(out.warning_counts.get(WarningKind::MissingAvailability), 1);
    }

    #[test]
    fn test_geocode_failure_keeps_practice() {
        let mut failing = row("P9", "Nowhere Dental", "DN55 1PT");
        failing.lat = None;
        failing.lon = None;
        failing.area_code = Some("E01000002".into());

        let out = build(&[failing], &AvailabilityIndex::default());
        let practice = &out.practices[0];
        assert!(practice.geocode_failed);
        assert_eq!(practice.lat, None);
        assert_eq!(practice.area_code, None);
        assert_eq!(out.warnings, vec!["P9: geocode lookup failed for DN551PT".to_string()]);
        assert_eq!(out.warning_counts.get(WarningKind::GeocodeFailed), 1);
    }

    #[test]
    fn test_tally_serializes_snake_case() {
        let mut tally = WarningTally::default();
        tally.record(WarningKind::GeocodeFailed);
        tally.record(WarningKind::GeocodeFailed);
        let value = serde_json::to_value(&tally).unwrap();
        assert_eq!(value, serde_json::json!({"geocode_failed": 2}));
    }
}
