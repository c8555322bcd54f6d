//! Monthly mosaic composites built with the GDAL utilities.

use crate::config::{Config, MosaicConfig};
use crate::external::{GdalUtil, MergeNodata, ToolRunner};
use crate::types::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Minimum and maximum reported for one band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
}

/// Band statistics from `gdalinfo -stats` output, in band order. Minimum and
/// maximum entries are paired by position; unparseable values are skipped.
pub fn parse_statistics(gdalinfo: &str) -> Vec<BandStatistics> {
    let value = |line: &str, key: &str| -> Option<f64> {
        line.trim()
            .strip_prefix(key)
            .and_then(|v| v.trim().trim_matches('"').parse().ok())
    };
    let mut mins = Vec::new();
    let mut maxs = Vec::new();
    for line in gdalinfo.lines() {
        if let Some(v) = value(line, "STATISTICS_MINIMUM=") {
            mins.push(v);
        } else if let Some(v) = value(line, "STATISTICS_MAXIMUM=") {
            maxs.push(v);
        }
    }
    mins.into_iter()
        .zip(maxs)
        .map(|(min, max)| BandStatistics { min, max })
        .collect()
}

/// Inputs and destination of one month's composite.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthMosaic {
    pub year: i32,
    /// Lower-cased month directory name.
    pub month: String,
    pub inputs: Vec<PathBuf>,
    pub output: PathBuf,
}

pub struct MosaicBuilder<'a> {
    config: &'a Config,
    runner: ToolRunner,
}

impl<'a> MosaicBuilder<'a> {
    pub fn new(config: &'a Config, runner: ToolRunner) -> Self {
        Self { config, runner }
    }

    fn settings(&self) -> &MosaicConfig {
        &self.config.mosaic
    }

    /// One entry per month directory of `year`, inputs found recursively.
    pub fn plan(&self, year: i32) -> Result<Vec<MonthMosaic>, AodError> {
        let settings = self.settings();
        let year_dir = settings.input_root.join(year.to_string());
        if !year_dir.is_dir() {
            log::warn!("No mosaic inputs for {}: {} is missing", year, year_dir.display());
            return Ok(Vec::new());
        }

        let mut month_dirs = Vec::new();
        for entry in std::fs::read_dir(&year_dir)? {
            let path = entry?.path();
            if path.is_dir() {
                month_dirs.push(path);
            }
        }
        month_dirs.sort();

        let mut plan = Vec::new();
        for dir in month_dirs {
            let month = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let mut inputs: Vec<PathBuf> = WalkDir::new(&dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| e.file_name().to_string_lossy().ends_with(&settings.suffix))
                .map(|e| e.into_path())
                .collect();
            inputs.sort();
            let output = settings
                .output_root
                .join(year.to_string())
                .join(format!("planet_{}.tif", month));
            plan.push(MonthMosaic {
                year,
                month,
                inputs,
                output,
            });
        }
        Ok(plan)
    }

    pub async fn run(&self, years: &[i32]) -> Result<StageReport, AodError> {
        std::fs::create_dir_all(&self.config.temp_root)?;
        let mut report = StageReport::default();
        for &year in years {
            for mosaic in self.plan(year)? {
                if mosaic.inputs.is_empty() {
                    log::warn!("{} {}: no *{} files", year, mosaic.month, self.settings().suffix);
                    report.skipped.push(format!("{} {}", year, mosaic.month));
                    continue;
                }
                log::info!(
                    "Mosaic {} from {} files",
                    mosaic.output.display(),
                    mosaic.inputs.len()
                );
                match self.build(&mosaic).await {
                    Ok(()) => report.produced.push(mosaic.output),
                    Err(e) => {
                        log::warn!("Mosaic {} failed: {}", mosaic.output.display(), e);
                        report.failures.push(FileFailure {
                            path: mosaic.output,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(report)
    }

    /// Merge, tile, add overviews and optionally copy band statistics from
    /// the first input. The merge temporary is always removed; a failed build
    /// leaves no output.
    pub async fn build(&self, mosaic: &MonthMosaic) -> Result<(), AodError> {
        let tmp = self
            .config
            .temp_root
            .join(format!("{}_{}_tmp.tif", mosaic.year, mosaic.month));
        if let Some(parent) = mosaic.output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let result = self.build_steps(mosaic, &tmp).await;
        let _ = std::fs::remove_file(&tmp);
        if result.is_err() {
            let _ = std::fs::remove_file(&mosaic.output);
        }
        result
    }

    async fn build_steps(&self, mosaic: &MonthMosaic, tmp: &Path) -> Result<(), AodError> {
        let settings = self.settings();
        let nodata = if settings.preserve_stats {
            MergeNodata::Zero
        } else {
            MergeNodata::Nan
        };
        let out = &mosaic.output;

        self.runner
            .run(&GdalUtil::merge(&mosaic.inputs, nodata, tmp))
            .await?;
        self.runner
            .run(&GdalUtil::tile(tmp, settings.block_size, out))
            .await?;
        self.runner
            .run(&GdalUtil::overviews(out, &settings.overview_levels))
            .await?;

        if settings.preserve_stats {
            if let Some(first) = mosaic.inputs.first() {
                let info = self.runner.run(&GdalUtil::statistics(first)).await?;
                let stats = parse_statistics(&info.stdout);
                if stats.is_empty() {
                    log::warn!("{} reports no band statistics", first.display());
                }
                for (i, band) in stats.iter().enumerate() {
                    self.runner
                        .run(&GdalUtil::set_statistics(out, i + 1, band.min, band.max))
                        .await?;
                }
            }
        }
        Ok(())
    }
}
