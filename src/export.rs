/*!
 * Output artifacts
 *
 * Writes the four processed files into an output directory: practice
 * points, area metrics, area boundaries and the QA report. Output is compact
 * JSON unless pretty printing is requested.
 */

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use serde::Serialize;

use crate::{
    Result, DesertError, ErrorContext,
    aggregate::AreaMetrics,
    area_key::AreaKeyCodec,
    boundary::BoundaryCollection,
    constants::{AREAS_OUTPUT, METRICS_OUTPUT, PRACTICES_OUTPUT, QA_OUTPUT},
    data_types::{Availability, Practice},
    pipeline::PipelineOutput,
    qa::QaReport,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
struct PointGeometry {
    #[serde(rename = "type")]
    kind: &'static str,
    /// `[lon, lat]`
    coordinates: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct PracticeProperties {
    practice_id: String,
    practice_name: String,
    address: String,
    postcode: String,
    area_code: Option<String>,
    accepting_adults: Availability,
    accepting_children: Availability,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PracticeFeature {
    #[serde(rename = "type")]
    kind: &'static str,
    id: String,
    geometry: PointGeometry,
    properties: PracticeProperties,
}

/// Geocoded practices as a GeoJSON `FeatureCollection` of points
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PracticePoints {
    #[serde(rename = "type")]
    kind: &'static str,
    pub features: Vec<PracticeFeature>,
}

impl PracticePoints {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Point features for geocoded practices
///
/// Practices whose area is a well-formed fine code outside the in-scope
/// country are left out.
pub fn practice_points(practices: &[Practice], codec: &AreaKeyCodec) -> PracticePoints {
    let features = practices.iter()
        .filter_map(|p| {
            let (lat, lon) = p.coordinates()?;
            let out_of_scope = p.area_code.as_deref()
                .and_then(|a| codec.canonicalize_fine_area(a))
                .is_some_and(|code| !codec.is_in_scope_fine(&code));
            if out_of_scope {
                return None;
            }

            Some(PracticeFeature {
                kind: "Feature",
                id: p.practice_id.clone(),
                geometry: PointGeometry { kind: "Point", coordinates: [lon, lat] },
                properties: PracticeProperties {
                    practice_id: p.practice_id.clone(),
                    practice_name: p.practice_name.clone(),
                    address: p.address.clone(),
                    postcode: p.postcode.clone(),
                    area_code: p.area_code.clone(),
                    accepting_adults: p.accepting_adults,
                    accepting_children: p.accepting_children,
                },
            })
        })
        .collect();

    PracticePoints { kind: "FeatureCollection", features }
}

/// JSON file writer
#[derive(Debug, Clone, Default)]
pub struct JsonExporter {
    /// Whether to pretty-print the JSON
    pub pretty_print: bool,
}

impl JsonExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.pretty_print = pretty;
        self
    }

    /// Serialize `value` to `path`
    pub fn export<T: Serialize + ?Sized>(&self, value: &T, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| DesertError::Io {
            message: format!("cannot create {}: {}", path.display(), e),
            source: e,
            context: ErrorContext::for_file(path),
        })?;
        let mut writer = BufWriter::new(file);

        if self.pretty_print {
            serde_json::to_writer_pretty(&mut writer, value)?;
        } else {
            serde_json::to_writer(&mut writer, value)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Writes processed artifacts into one directory
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
    exporter: JsonExporter,
}

impl OutputWriter {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            exporter: JsonExporter::new(),
        }
    }

    pub fn with_pretty_print(mut self, pretty: bool) -> Self {
        self.exporter = self.exporter.with_pretty_print(pretty);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        self.exporter.export(value, &path)?;
        log::debug!("Wrote {}", path.display());
        Ok(path)
    }

    pub fn write_practices(&self, points: &PracticePoints) -> Result<PathBuf> {
        self.write(PRACTICES_OUTPUT, points)
    }

    pub fn write_metrics(&self, metrics: &AreaMetrics) -> Result<PathBuf> {
        self.write(METRICS_OUTPUT, metrics)
    }

    pub fn write_areas(&self, boundaries: &BoundaryCollection) -> Result<PathBuf> {
        self.write(AREAS_OUTPUT, boundaries)
    }

    pub fn write_qa(&self, report: &QaReport) -> Result<PathBuf> {
        self.write(QA_OUTPUT, report)
    }

    /// Write every artifact of a pipeline run
    pub fn write_all(&self, output: &PipelineOutput) -> Result<Vec<PathBuf>> {
        let paths = vec![
            self.write_practices(&output.practice_points)?,
            self.write_areas(&output.boundaries)?,
            self.write_metrics(&output.metrics)?,
            self.write_qa(&output.qa)?,
        ];
        log::info!("Wrote {} artifacts to {}", paths.len(), self.dir.display());
        Ok(paths)
    }
}
