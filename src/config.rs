use crate::filename_date::DateScheme;
use crate::types::{AodError, GridShape, Tier};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Run configuration. Every field has a default so a partial JSON file is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub temp_root: PathBuf,
    pub reference_raster: PathBuf,
    pub product_label: String,
    pub years: Vec<i32>,
    pub tiers: Vec<Tier>,
    /// Name scheme of the day tier's inputs. Must match what the clip stage
    /// writes: `Netcdf` clips keep the `sYYYYDDDHHMMSSf` start token
    /// (`NetcdfStart`), `Geotiff` clips keep the imagery date and time tokens
    /// (`ImageryDateTime`).
    pub day_input_scheme: DateScheme,
    pub grids: TierGrids,
    pub fill_value: f32,
    pub display_range: DisplayRange,
    pub image_scale: u32,
    pub font_path: Option<PathBuf>,
    pub write_counts: bool,
    pub threads: Option<usize>,
    pub progress: bool,
    pub tool_timeout_secs: u64,
    pub region: RegionConfig,
    pub mosaic: MosaicConfig,
    pub depot: DepotConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("/data/tmp/AOD_average/geotiff"),
            output_root: PathBuf::from("/data/tmp/AOD_average/maximum"),
            temp_root: PathBuf::from("/data/tmp/AOD_average/tmp"),
            reference_raster: PathBuf::from("data/ref/ref_AOD.tif"),
            product_label: "CG_ABI-L2-AODC-max-M6_G16".to_string(),
            years: (2018..=2023).collect(),
            tiers: Tier::ALL.to_vec(),
            day_input_scheme: DateScheme::NetcdfStart,
            grids: TierGrids::default(),
            fill_value: -32768.0,
            display_range: DisplayRange::default(),
            image_scale: 4,
            font_path: None,
            write_counts: false,
            threads: None,
            progress: true,
            tool_timeout_secs: 1800,
            region: RegionConfig::default(),
            mosaic: MosaicConfig::default(),
            depot: DepotConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TierGrids {
    pub day: GridShape,
    pub month: GridShape,
    pub year: GridShape,
}

impl Default for TierGrids {
    fn default() -> Self {
        let aod = GridShape::new(97, 118);
        Self {
            day: aod,
            month: aod,
            year: aod,
        }
    }
}

impl TierGrids {
    pub fn for_tier(&self, tier: Tier) -> GridShape {
        match tier {
            Tier::Day => self.day,
            Tier::Month => self.month,
            Tier::Year => self.year,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayRange {
    pub min: f32,
    pub max: f32,
}

impl Default for DisplayRange {
    fn default() -> Self {
        Self {
            min: -0.05,
            max: 5.00,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipSource {
    /// NetCDF scenes converted with `gdal_translate` before warping.
    Netcdf,
    /// Per-day directories of GeoTIFF scenes, warped directly.
    Geotiff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub source: ClipSource,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub variable: String,
    pub target_srs: String,
    /// xmin, ymin, xmax, ymax in the target SRS.
    pub bbox: Option<[f64; 4]>,
    /// Vector file whose first layer's extent becomes the clip box.
    pub boundary: Option<PathBuf>,
    pub min_hour: u32,
}

impl ClipSource {
    /// Scheme of the names this source's clipped scenes carry.
    pub fn output_scheme(&self) -> DateScheme {
        match self {
            ClipSource::Netcdf => DateScheme::NetcdfStart,
            ClipSource::Geotiff => DateScheme::ImageryDateTime,
        }
    }
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            source: ClipSource::Netcdf,
            input_dir: PathBuf::from("/data/tmp/AOD_average/netcdf"),
            output_dir: PathBuf::from("/data/tmp/AOD_average/geotiff"),
            variable: "AOD".to_string(),
            target_srs: "EPSG:32614".to_string(),
            bbox: None,
            boundary: Some(PathBuf::from("data/region/Municipios/Municipios_MM.shp")),
            min_hour: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MosaicConfig {
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub years: Vec<i32>,
    pub suffix: String,
    pub preserve_stats: bool,
    pub block_size: u32,
    pub overview_levels: Vec<u32>,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            input_root: PathBuf::from("/datawork/AOD_average/input/planet_images"),
            output_root: PathBuf::from("/datawork/AOD_average/output/mosaics"),
            years: (2019..=2023).collect(),
            suffix: "harmonized_clip.tif".to_string(),
            preserve_stats: true,
            block_size: 512,
            overview_levels: vec![2, 4, 8, 16, 32],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DepotConfig {
    pub root: PathBuf,
    pub sensor: String,
    pub level: String,
    pub domain: String,
    pub products: Vec<String>,
    pub dest_dir: PathBuf,
}

impl Default for DepotConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/depot/goes16"),
            sensor: "abi".to_string(),
            level: "l2".to_string(),
            domain: "conus".to_string(),
            products: vec!["AOD".to_string()],
            dest_dir: PathBuf::from("/data/tmp/AOD_average"),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, AodError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AodError> {
        for tier in Tier::ALL {
            let shape = self.grids.for_tier(tier);
            if shape.rows == 0 || shape.cols == 0 {
                return Err(AodError::Config(format!(
                    "{} grid must be non-empty, got {}",
                    tier, shape
                )));
            }
        }
        if !(self.display_range.min < self.display_range.max) {
            return Err(AodError::Config(format!(
                "display range {} .. {} is empty",
                self.display_range.min, self.display_range.max
            )));
        }
        if self.years.is_empty() {
            return Err(AodError::Config("no years configured".to_string()));
        }
        if self.tool_timeout_secs == 0 {
            return Err(AodError::Config("tool timeout must be positive".to_string()));
        }
        if self.image_scale == 0 {
            return Err(AodError::Config("image scale must be positive".to_string()));
        }
        Ok(())
    }

    pub fn get_thread_count(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Directory holding the rasters a tier consumes for one year.
    pub fn input_dir(&self, tier: Tier, year: i32) -> PathBuf {
        match tier.prerequisite() {
            None => self.input_root.join(year.to_string()),
            Some(previous) => self.tier_dir(previous, year).join("geotiff"),
        }
    }

    pub fn tier_dir(&self, tier: Tier, year: i32) -> PathBuf {
        self.output_root.join(tier.as_str()).join(year.to_string())
    }

    fn output_stem(&self, tier: Tier, year: i32, key: &str) -> String {
        match tier {
            Tier::Year => format!("{}_{}", self.product_label, year),
            Tier::Day | Tier::Month => format!("{}_{}{}", self.product_label, year, key),
        }
    }

    pub fn raster_path(&self, tier: Tier, year: i32, key: &str) -> PathBuf {
        self.tier_dir(tier, year)
            .join("geotiff")
            .join(format!("{}.tif", self.output_stem(tier, year, key)))
    }

    pub fn image_path(&self, tier: Tier, year: i32, key: &str) -> PathBuf {
        self.tier_dir(tier, year)
            .join("png")
            .join(format!("{}.png", self.output_stem(tier, year, key)))
    }

    pub fn count_path(&self, tier: Tier, year: i32, key: &str) -> PathBuf {
        self.tier_dir(tier, year)
            .join("count")
            .join(format!("{}.tif", self.output_stem(tier, year, key)))
    }

    pub fn title(&self, tier: Tier, year: i32, key: &str) -> String {
        match tier {
            Tier::Year => format!("Maximum AOD {}", year),
            Tier::Day | Tier::Month => format!("Maximum AOD {} {}", year, key),
        }
    }
}
