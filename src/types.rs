use chrono::NaiveDateTime;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Aggregation granularity. Each tier reads the exports of the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Day,
    Month,
    Year,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Day, Tier::Month, Tier::Year];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Day => "day",
            Tier::Month => "month",
            Tier::Year => "year",
        }
    }

    /// The tier whose exports feed this one.
    pub fn prerequisite(&self) -> Option<Tier> {
        match self {
            Tier::Day => None,
            Tier::Month => Some(Tier::Day),
            Tier::Year => Some(Tier::Month),
        }
    }

    /// Raw sensor rasters carry a fill sentinel; aggregates are already clean.
    pub fn fill_policy(&self, sentinel: f32) -> FillPolicy {
        match self {
            Tier::Day => FillPolicy::Translate(sentinel),
            Tier::Month | Tier::Year => FillPolicy::PreCleaned,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillPolicy {
    Translate(f32),
    PreCleaned,
}

/// One raster file plus the timestamp parsed from its name.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub timestamp: NaiveDateTime,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, timestamp: NaiveDateTime) -> Self {
        Self {
            path: path.into(),
            timestamp,
        }
    }
}

/// Files sharing one truncated timestamp, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    pub key: String,
    pub members: Vec<SourceFile>,
}

impl Bucket {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A single-band grid read from one file. NaN marks a missing cell.
pub type RasterFrame = Array2<f32>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub rows: usize,
    pub cols: usize,
}

impl GridShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

impl fmt::Display for GridShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.cols)
    }
}

/// Coordinate metadata copied verbatim from a reference raster.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoReference {
    pub transform: [f64; 6],
    pub projection: String,
    pub size: (usize, usize),
}

#[derive(Debug, Clone)]
pub struct RasterData {
    pub data: Array2<f32>,
    pub transform: [f64; 6],
    pub projection: String,
    pub no_data_value: Option<f32>,
}

/// Per-pixel maximum and valid-sample count for one bucket.
#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub tier: Tier,
    pub key: String,
    pub max: Array2<f32>,
    pub count: Array2<u32>,
    pub frames: usize,
}

impl AggregateResult {
    pub fn valid_cells(&self) -> usize {
        self.count.iter().filter(|&&c| c > 0).count()
    }

    pub fn peak(&self) -> Option<f32> {
        self.max
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| Some(acc.map_or(v, |m: f32| m.max(v))))
    }
}

#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct BucketFailure {
    pub key: String,
    pub reason: String,
}

/// Per-item results of one of the tool-driven stages (clip, mosaic).
#[derive(Debug, Default)]
pub struct StageReport {
    pub produced: Vec<PathBuf>,
    pub skipped: Vec<String>,
    pub failures: Vec<FileFailure>,
}

impl StageReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn log(&self, stage: &str) {
        log::info!(
            "{}: {} produced, {} skipped, {} failed",
            stage,
            self.produced.len(),
            self.skipped.len(),
            self.failures.len()
        );
        for failure in &self.failures {
            log::error!("{} FAILED {}: {}", stage, failure.path.display(), failure.reason);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AodError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),
    #[error("Malformed filename {}: {reason}", .path.display())]
    MalformedFilename { path: PathBuf, reason: String },
    #[error("{} belongs to {found}, not {expected}", .path.display())]
    OutOfYear {
        path: PathBuf,
        expected: i32,
        found: i32,
    },
    #[error("Input not sorted by timestamp at {}", .path.display())]
    UnsortedInput { path: PathBuf },
    #[error("Grid of {} is {found}, expected {expected}", .path.display())]
    DimensionMismatch {
        path: PathBuf,
        expected: GridShape,
        found: GridShape,
    },
    #[error("No data for year {year} at tier {tier}: {} has no {prerequisite} exports", .dir.display())]
    MissingPrerequisite {
        tier: Tier,
        prerequisite: Tier,
        year: i32,
        dir: PathBuf,
    },
    #[error("No input rasters for year {year} at tier {tier} in {}", .dir.display())]
    NoInput { tier: Tier, year: i32, dir: PathBuf },
    #[error("`{command}` exited with {status}: {stderr}")]
    ExternalTool {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("`{command}` timed out after {timeout:?}")]
    ToolTimeout {
        command: String,
        timeout: std::time::Duration,
    },
    #[error("Archive error: {0}")]
    Archive(String),
}
