use crate::aggregator::PixelAggregator;
use crate::config::Config;
use crate::filename_date::DateScheme;
use crate::grouping::{group_files, single_bucket, Granularity};
use crate::sink::{ExportSink, FrameSource};
use crate::types::*;
use chrono::Datelike;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// What happened to one (tier, year) pass.
#[derive(Debug)]
pub struct TierYearOutcome {
    pub tier: Tier,
    pub year: i32,
    /// Keys of buckets whose exports were written.
    pub written: Vec<String>,
    pub file_failures: Vec<FileFailure>,
    pub bucket_failures: Vec<BucketFailure>,
    /// Set when the whole pass was skipped.
    pub error: Option<AodError>,
}

impl TierYearOutcome {
    fn new(tier: Tier, year: i32) -> Self {
        Self {
            tier,
            year,
            written: Vec::new(),
            file_failures: Vec::new(),
            bucket_failures: Vec::new(),
            error: None,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error.is_none() && self.file_failures.is_empty() && self.bucket_failures.is_empty()
    }
}

/// One failed (tier, year, bucket) combination, for the end-of-run report.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedCombination {
    pub tier: Tier,
    pub year: i32,
    /// `None` when the failure covers the whole tier-year or a single file.
    pub bucket: Option<String>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub outcomes: Vec<TierYearOutcome>,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(|o| !o.is_clean())
    }

    pub fn buckets_written(&self) -> usize {
        self.outcomes.iter().map(|o| o.written.len()).sum()
    }

    pub fn outcome(&self, tier: Tier, year: i32) -> Option<&TierYearOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.tier == tier && o.year == year)
    }

    pub fn failed_combinations(&self) -> Vec<FailedCombination> {
        let mut failed = Vec::new();
        for outcome in &self.outcomes {
            let entry = |bucket: Option<String>, reason: String| FailedCombination {
                tier: outcome.tier,
                year: outcome.year,
                bucket,
                reason,
            };
            if let Some(error) = &outcome.error {
                failed.push(entry(None, error.to_string()));
            }
            for file in &outcome.file_failures {
                failed.push(entry(
                    None,
                    format!("{}: {}", file.path.display(), file.reason),
                ));
            }
            for bucket in &outcome.bucket_failures {
                failed.push(entry(Some(bucket.key.clone()), bucket.reason.clone()));
            }
        }
        failed
    }

    pub fn log(&self) {
        log::info!(
            "Run finished: {} tier-year passes, {} buckets written",
            self.outcomes.len(),
            self.buckets_written()
        );
        for failure in self.failed_combinations() {
            match &failure.bucket {
                Some(bucket) => log::error!(
                    "FAILED {} {} bucket {}: {}",
                    failure.tier,
                    failure.year,
                    bucket,
                    failure.reason
                ),
                None => log::error!("FAILED {} {}: {}", failure.tier, failure.year, failure.reason),
            }
        }
    }
}

/// Runs the day, month and year tiers over the configured years.
///
/// A tier only ever reads what the tier before it exported; missing inputs are
/// reported, never recomputed.
pub struct Orchestrator<'a, S: FrameSource + ?Sized, K: ExportSink + ?Sized> {
    config: &'a Config,
    source: &'a S,
    sink: &'a K,
}

impl<'a, S: FrameSource + ?Sized, K: ExportSink + ?Sized> Orchestrator<'a, S, K> {
    pub fn new(config: &'a Config, source: &'a S, sink: &'a K) -> Self {
        Self {
            config,
            source,
            sink,
        }
    }

    /// Every configured tier in day, month, year order, each over every
    /// configured year. A tier is finished for all years before the next
    /// starts.
    pub fn run(&self) -> RunSummary {
        let mut tiers = self.config.tiers.clone();
        tiers.sort();
        tiers.dedup();

        let mut summary = RunSummary::default();
        for tier in tiers {
            for &year in &self.config.years {
                summary.outcomes.push(self.run_tier_year(tier, year));
            }
        }
        summary
    }

    pub fn run_tier_year(&self, tier: Tier, year: i32) -> TierYearOutcome {
        log::info!("Aggregating {} maxima for {}", tier, year);
        let mut outcome = TierYearOutcome::new(tier, year);
        if let Err(e) = self.aggregate(&mut outcome) {
            log::error!("{} {} skipped: {}", tier, year, e);
            outcome.error = Some(e);
        }
        outcome
    }

    fn aggregate(&self, outcome: &mut TierYearOutcome) -> Result<(), AodError> {
        let (tier, year) = (outcome.tier, outcome.year);
        let dir = self.config.input_dir(tier, year);
        let no_data = || match tier.prerequisite() {
            Some(prerequisite) => AodError::MissingPrerequisite {
                tier,
                prerequisite,
                year,
                dir: dir.clone(),
            },
            None => AodError::NoInput {
                tier,
                year,
                dir: dir.clone(),
            },
        };

        let paths = list_rasters(&dir)?;
        if paths.is_empty() {
            return Err(no_data());
        }

        let scheme = DateScheme::for_tier(tier, self.config.day_input_scheme);
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = scheme.source_file(&path).and_then(|file| {
                let found = file.timestamp.year();
                if found == year {
                    Ok(file)
                } else {
                    Err(AodError::OutOfYear {
                        path: file.path,
                        expected: year,
                        found,
                    })
                }
            });
            match parsed {
                Ok(file) => files.push(file),
                Err(e) => {
                    log::warn!("Skipping {}: {}", path.display(), e);
                    outcome.file_failures.push(FileFailure {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        if files.is_empty() {
            return Err(no_data());
        }
        files.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));

        let buckets = match tier {
            Tier::Day => group_files(files, Granularity::Day)?,
            Tier::Month => group_files(files, Granularity::Month)?,
            Tier::Year => single_bucket(files, year.to_string()),
        };

        let reference = self.source.read_reference(&self.config.reference_raster)?;
        let shape = self.config.grids.for_tier(tier);
        if reference.size != shape.dim() {
            log::warn!(
                "Reference raster {} is {}x{}, {} grids are {}",
                self.config.reference_raster.display(),
                reference.size.0,
                reference.size.1,
                tier,
                shape
            );
        }

        log::info!("{} {}: {} buckets", tier, year, buckets.len());
        let pb = self.progress_bar(buckets.len());
        let results: Vec<Result<String, BucketFailure>> = buckets
            .par_iter()
            .map(|bucket| {
                let result = self
                    .export_bucket(tier, year, bucket, &reference)
                    .map_err(|e| {
                        log::warn!("{} {} bucket {} failed: {}", tier, year, bucket.key, e);
                        BucketFailure {
                            key: bucket.key.clone(),
                            reason: e.to_string(),
                        }
                    });
                pb.inc(1);
                result
            })
            .collect();
        pb.finish_and_clear();

        for result in results {
            match result {
                Ok(key) => outcome.written.push(key),
                Err(failure) => outcome.bucket_failures.push(failure),
            }
        }
        Ok(())
    }

    fn export_bucket(
        &self,
        tier: Tier,
        year: i32,
        bucket: &Bucket,
        reference: &GeoReference,
    ) -> Result<String, AodError> {
        let config = self.config;
        let mut aggregator =
            PixelAggregator::new(tier, config.grids.for_tier(tier), config.fill_value);
        for member in &bucket.members {
            let frame = self.source.read_frame(&member.path)?;
            aggregator.fold(&member.path, frame)?;
        }
        let result = aggregator.finish(bucket.key.as_str());

        let raster_path = config.raster_path(tier, year, &result.key);
        let count_path = config.count_path(tier, year, &result.key);
        let exported = (|| {
            self.sink.write_raster(&result.max, reference, &raster_path)?;
            if config.write_counts {
                self.sink
                    .write_count_raster(&result.count, reference, &count_path)?;
            }
            self.sink.write_image(
                &result.max,
                config.display_range,
                &config.title(tier, year, &result.key),
                &config.image_path(tier, year, &result.key),
            )
        })();
        if let Err(e) = exported {
            // a bucket with any failed export must not look like input to the next tier
            remove_partial(&raster_path);
            remove_partial(&count_path);
            return Err(e);
        }

        log::debug!(
            "{} {} bucket {}: {} frames, {} valid cells, peak {:?}",
            tier,
            year,
            result.key,
            result.frames,
            result.valid_cells(),
            result.peak()
        );
        Ok(result.key)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.config.progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb
    }
}

/// `*.tif` files directly inside `dir`, sorted by path. A missing directory
/// has no rasters.
pub fn list_rasters(dir: &Path) -> Result<Vec<PathBuf>, AodError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let pattern = format!(
        "{}/*.tif",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let mut paths = Vec::new();
    for entry in glob::glob(&pattern)? {
        match entry {
            Ok(path) if path.is_file() => paths.push(path),
            Ok(_) => {}
            Err(e) => log::warn!("Cannot read {}: {}", e.path().display(), e.error()),
        }
    }
    paths.sort();
    Ok(paths)
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            log::warn!("Could not remove partial output {}: {}", path.display(), e);
        }
    }
}
