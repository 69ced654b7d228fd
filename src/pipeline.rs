/*!
 * End-to-end pipeline
 *
 * Reads every input once, builds practices, aggregates areas, resolves
 * boundaries and produces the QA report. The geocode cache is loaded at the
 * start and persisted exactly once at the end of a successful run.
 */

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::{
    Result, DesertError,
    aggregate::{AreaAggregator, AreaMetrics, CoarseNameHints, FineToCoarseMajority},
    area_key::{AreaKeyCodec, CoarseKey},
    boundary::{BoundaryCollection, BoundaryResolver},
    config::{global_config, DesertConfig},
    constants::*,
    data_types::*,
    export::{practice_points, PracticePoints},
    geocode::{GeocodeCache, LiveLookup, NoLiveLookup, PostcodeLookup},
    practice::{PracticeBuilder, Rejection, WarningTally},
    qa::{QaReport, QaReporter},
    reader::{BoundarySource, InputReader},
};

/// Every input of one run, already parsed
#[derive(Debug, Clone, Default)]
pub struct PipelineInputs {
    pub practices: Vec<PracticeRow>,
    pub availability: AvailabilityIndex,
    pub population: Vec<PopulationRow>,
    pub deprivation: Vec<DeprivationRow>,
    pub lookup: PostcodeLookup,
    pub coarse_hints: CoarseNameHints,
    pub boundaries: BoundarySource,
}

/// Everything a run produces
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub practices: Vec<Practice>,
    pub warning_counts: WarningTally,
    pub warnings: Vec<String>,
    pub rejections: Vec<Rejection>,
    pub metrics: AreaMetrics,
    pub centroids: HashMap<CoarseKey, (f64, f64)>,
    pub boundaries: BoundaryCollection,
    pub practice_points: PracticePoints,
    pub qa: QaReport,
}

/// Fuse parsed inputs into the pipeline outputs
///
/// Never fails: gaps in the inputs surface as warnings, sentinels and
/// synthetic geometry. Newly resolved postcodes are written into `cache`.
pub fn run_with_inputs(
    config: &DesertConfig,
    inputs: PipelineInputs,
    cache: &mut GeocodeCache,
    live: &dyn LiveLookup,
) -> PipelineOutput {
    let PipelineInputs {
        practices: rows,
        availability,
        population,
        deprivation,
        mut lookup,
        coarse_hints,
        boundaries,
    } = inputs;

    let codec = AreaKeyCodec::from_config(config)
        .with_coarse_codes(boundaries.coarse_name_code_pairs());
    log::debug!("Known coarse area codes: {}", codec.known_coarse_codes());

    lookup.extend_missing(PostcodeLookup::from_practice_rows(&rows));
    let majority = FineToCoarseMajority::from_practice_rows(&rows, &coarse_hints, &codec);

    let build = PracticeBuilder::new(&codec)
        .with_progress(config.enable_progress_bar)
        .build(&rows, &availability, cache, &lookup, live);

    let aggregation = AreaAggregator::new(&codec)
        .with_rate_per(config.rate_per)
        .aggregate(&population, &deprivation, &majority, &build.practices);

    let boundaries = BoundaryResolver::from_config(&codec, config)
        .resolve(&aggregation.metrics, &aggregation.centroids, &boundaries);

    let practice_points = practice_points(&build.practices, &codec);
    let qa = QaReporter::from_config(config)
        .report(&build.practices, &build.warning_counts, &build.warnings);

    PipelineOutput {
        practices: build.practices,
        warning_counts: build.warning_counts,
        warnings: build.warnings,
        rejections: build.rejections,
        metrics: aggregation.metrics,
        centroids: aggregation.centroids,
        boundaries,
        practice_points,
        qa,
    }
}

#[cfg(feature = "live-lookup")]
fn live_client(config: &DesertConfig) -> Result<Option<Box<dyn LiveLookup>>> {
    let client = crate::live::PostcodesIoClient::from_config(config)?;
    Ok(Some(Box::new(client)))
}

#[cfg(not(feature = "live-lookup"))]
fn live_client(_config: &DesertConfig) -> Result<Option<Box<dyn LiveLookup>>> {
    log::warn!("Live lookup requested but the live-lookup feature is disabled; continuing offline");
    Ok(None)
}

/// File-backed pipeline over a raw data directory
pub struct DesertPipeline {
    config: DesertConfig,
    practices_path: Option<PathBuf>,
    availability_path: Option<PathBuf>,
    population_path: Option<PathBuf>,
    deprivation_path: Option<PathBuf>,
    postcode_lookup_path: Option<PathBuf>,
    coarse_boundaries_path: Option<PathBuf>,
    fine_boundaries_path: Option<PathBuf>,
    cache_path: Option<PathBuf>,
    coarse_hints_path: Option<PathBuf>,
    persist_cache: bool,
    live: Option<Box<dyn LiveLookup>>,
}

impl Default for DesertPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl DesertPipeline {
    /// Pipeline with no inputs set, using the global configuration
    pub fn new() -> Self {
        Self {
            config: global_config(),
            practices_path: None,
            availability_path: None,
            population_path: None,
            deprivation_path: None,
            postcode_lookup_path: None,
            coarse_boundaries_path: None,
            fine_boundaries_path: None,
            cache_path: None,
            coarse_hints_path: None,
            persist_cache: true,
            live: None,
        }
    }

    /// Pipeline over the standard file names in `dir`
    ///
    /// Cache files default to `<dir>/../cache/postcodes.json` and
    /// `<dir>/../cache/postcode_lsoa.json`. Boundary files are used only if
    /// present.
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(DesertError::FileNotFound {
                path: dir.to_path_buf(),
                suggestion: "Point --data-dir at the directory holding practices.csv and the other raw inputs".to_string(),
            });
        }

        let existing = |name: &str| Some(dir.join(name)).filter(|p| p.exists());
        let cache_dir = dir.parent().unwrap_or(dir).join("cache");

        let mut pipeline = Self::new();
        pipeline.practices_path = Some(dir.join(PRACTICES_FILE));
        pipeline.availability_path = Some(dir.join(AVAILABILITY_FILE));
        pipeline.population_path = Some(dir.join(POPULATION_FILE));
        pipeline.deprivation_path = Some(dir.join(DEPRIVATION_FILE));
        pipeline.postcode_lookup_path = existing(POSTCODE_LOOKUP_FILE);
        pipeline.coarse_boundaries_path = COARSE_BOUNDARIES_FILES.iter().find_map(|name| existing(name));
        pipeline.fine_boundaries_path = existing(FINE_BOUNDARIES_FILE);
        pipeline.cache_path = Some(cache_dir.join("postcodes.json"));
        pipeline.coarse_hints_path = Some(cache_dir.join("postcode_lsoa.json"));
        Ok(pipeline)
    }

    pub fn config(mut self, config: DesertConfig) -> Self {
        self.config = config;
        self
    }

    pub fn practices<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.practices_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn availability<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.availability_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn population<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.population_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn deprivation<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.deprivation_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn postcode_lookup<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.postcode_lookup_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn coarse_boundaries<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.coarse_boundaries_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn fine_boundaries<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.fine_boundaries_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Geocode cache file, loaded at start and persisted at the end
    pub fn cache_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.cache_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Postcode -> coarse-name hint file
    pub fn coarse_hints_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.coarse_hints_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Whether the cache file is rewritten after the run
    pub fn persist_cache(mut self, persist: bool) -> Self {
        self.persist_cache = persist;
        self
    }

    /// Use a specific live lookup instead of the configured one
    pub fn live_lookup(mut self, live: Box<dyn LiveLookup>) -> Self {
        self.live = Some(live);
        self
    }

    /// Read every configured input
    pub fn load_inputs(&self) -> Result<PipelineInputs> {
        let reader = InputReader::from_config(&self.config);

        let practices = match &self.practices_path {
            Some(path) => reader.load_practices(path)?,
            None => Vec::new(),
        };
        let availability = match &self.availability_path {
            Some(path) => AvailabilityIndex::from_rows(reader.load_availability(path)?),
            None => AvailabilityIndex::default(),
        };
        let population = match &self.population_path {
            Some(path) => reader.load_population(path)?,
            None => Vec::new(),
        };
        let deprivation = match &self.deprivation_path {
            Some(path) => reader.load_deprivation(path)?,
            None => Vec::new(),
        };
        let lookup = match &self.postcode_lookup_path {
            Some(path) => reader.load_postcode_lookup(path)?,
            None => PostcodeLookup::default(),
        };
        let coarse_hints = match &self.coarse_hints_path {
            Some(path) if path.exists() => reader.load_coarse_hints(path)?,
            _ => CoarseNameHints::default(),
        };
        let boundaries = reader.load_boundary_source(
            self.coarse_boundaries_path.as_deref(),
            self.fine_boundaries_path.as_deref(),
        )?;

        Ok(PipelineInputs {
            practices,
            availability,
            population,
            deprivation,
            lookup,
            coarse_hints,
            boundaries,
        })
    }

    /// Live lookup from configuration, when enabled
    fn configured_live(&self) -> Result<Option<Box<dyn LiveLookup>>> {
        if !self.config.enable_live_lookup {
            return Ok(None);
        }
        live_client(&self.config)
    }

    /// Run the whole pipeline
    pub fn run(&self) -> Result<PipelineOutput> {
        let start_time = Instant::now();
        let reader = InputReader::from_config(&self.config);
        let inputs = self.load_inputs()?;

        let mut cache = match &self.cache_path {
            Some(path) if path.exists() => reader.load_geocode_cache(path)?,
            _ => GeocodeCache::new(),
        };

        let configured = match &self.live {
            Some(_) => None,
            None => self.configured_live()?,
        };
        let live: &dyn LiveLookup = match (self.live.as_deref(), configured.as_deref()) {
            (Some(live), _) | (None, Some(live)) => live,
            (None, None) => &NoLiveLookup,
        };

        let output = run_with_inputs(&self.config, inputs, &mut cache, live);

        if self.persist_cache {
            if let Some(path) = &self.cache_path {
                cache.persist(path)?;
            }
        }

        log::info!(
            "Pipeline finished in {:.2}s: {} practices, {} areas, {:?} boundaries",
            start_time.elapsed().as_secs_f64(),
            output.practices.len(),
            output.metrics.len(),
            output.boundaries.origin
        );
        Ok(output)
    }
}
