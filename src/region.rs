//! Clip sensor scenes to the study region, producing the day-tier inputs.
//!
//! Each scene is reprojected to the target SRS and cut to a fixed box with
//! `gdalwarp`; NetCDF scenes are converted to GeoTIFF first.

use crate::config::{ClipSource, Config, RegionConfig};
use crate::external::{GdalUtil, ToolRunner};
use crate::orchestrator::list_rasters;
use crate::types::*;
use chrono::Timelike;
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::LayerAccess;
use gdal::Dataset;
use std::path::{Path, PathBuf};

/// Extent of the first layer of a vector file, in `target_srs`, as
/// `[xmin, ymin, xmax, ymax]`.
pub fn boundary_extent(path: &Path, target_srs: &str) -> Result<[f64; 4], AodError> {
    let dataset = Dataset::open(path)?;
    let layer = dataset.layer(0)?;
    let envelope = layer.get_extent()?;
    let bounds = [envelope.MinX, envelope.MinY, envelope.MaxX, envelope.MaxY];

    let source = layer.spatial_ref().ok_or_else(|| {
        AodError::Config(format!("{} has no spatial reference", path.display()))
    })?;
    let target = SpatialRef::from_definition(target_srs)?;
    // keep x = easting/longitude on both sides
    source.set_axis_mapping_strategy(
        gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
    );
    target.set_axis_mapping_strategy(
        gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
    );

    let transform = CoordTransform::new(&source, &target)?;
    Ok(transform.transform_bounds(&bounds, 21)?)
}

/// Scenes before `min_hour` UTC are not used.
pub fn keep_scene(scene: &SourceFile, min_hour: u32) -> bool {
    scene.timestamp.hour() >= min_hour
}

pub struct RegionClipper<'a> {
    config: &'a Config,
    runner: ToolRunner,
}

impl<'a> RegionClipper<'a> {
    pub fn new(config: &'a Config, runner: ToolRunner) -> Self {
        Self { config, runner }
    }

    fn region(&self) -> &RegionConfig {
        &self.config.region
    }

    pub fn clip_box(&self) -> Result<[f64; 4], AodError> {
        let region = self.region();
        if let Some(bbox) = region.bbox {
            return Ok(bbox);
        }
        match &region.boundary {
            Some(boundary) => {
                let bbox = boundary_extent(boundary, &region.target_srs)?;
                log::info!("Bounding box from {}: {:?}", boundary.display(), bbox);
                Ok(bbox)
            }
            None => Err(AodError::Config(
                "region needs either a bbox or a boundary file".to_string(),
            )),
        }
    }

    /// Scene files for one year in the configured source layout, sorted by
    /// time. Names that do not parse come back as failures.
    pub fn scenes(&self, year: i32) -> Result<(Vec<SourceFile>, Vec<FileFailure>), AodError> {
        let region = self.region();
        let year_dir = region.input_dir.join(year.to_string());
        let paths = match region.source {
            ClipSource::Netcdf => list_files(&year_dir, "nc")?,
            ClipSource::Geotiff => {
                let mut paths = Vec::new();
                for dir in subdirectories(&year_dir)? {
                    paths.extend(list_rasters(&dir)?);
                }
                paths
            }
        };
        let scheme = region.source.output_scheme();

        let mut scenes = Vec::new();
        let mut failures = Vec::new();
        for path in paths {
            match scheme.source_file(&path) {
                Ok(scene) => scenes.push(scene),
                Err(e) => failures.push(FileFailure {
                    path,
                    reason: e.to_string(),
                }),
            }
        }
        scenes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok((scenes, failures))
    }

    pub fn output_path(&self, scene: &Path, year: i32) -> PathBuf {
        let stem = scene
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.region()
            .output_dir
            .join(year.to_string())
            .join(format!("{}.tif", stem))
    }

    pub async fn run(&self, years: &[i32]) -> Result<StageReport, AodError> {
        let bbox = self.clip_box()?;
        std::fs::create_dir_all(&self.config.temp_root)?;

        let mut report = StageReport::default();
        for &year in years {
            let (scenes, failures) = self.scenes(year)?;
            report.failures.extend(failures);
            log::info!("Clipping {} scenes for {}", scenes.len(), year);

            for scene in scenes {
                if !keep_scene(&scene, self.region().min_hour) {
                    report.skipped.push(scene.path.display().to_string());
                    continue;
                }
                match self.clip_scene(&scene.path, year, bbox).await {
                    Ok(out) => report.produced.push(out),
                    Err(e) => {
                        log::warn!("Clip of {} failed: {}", scene.path.display(), e);
                        report.failures.push(FileFailure {
                            path: scene.path,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(report)
    }

    /// Convert (NetCDF only), reproject and clip one scene. Temporaries are
    /// removed either way; a failed clip leaves no output behind.
    pub async fn clip_scene(
        &self,
        scene: &Path,
        year: i32,
        bbox: [f64; 4],
    ) -> Result<PathBuf, AodError> {
        let region = self.region();
        let stem = scene
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "scene".to_string());
        let converted = self.config.temp_root.join(format!("{}_AOD.tif", stem));
        let warped = self.config.temp_root.join(format!("{}_AOD_warp.tif", stem));
        let output = self.output_path(scene, year);
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let result = async {
            let warp_input = match region.source {
                ClipSource::Netcdf => {
                    self.runner
                        .run(&GdalUtil::netcdf_to_geotiff(scene, &region.variable, &converted))
                        .await?;
                    converted.as_path()
                }
                ClipSource::Geotiff => scene,
            };
            self.runner
                .run(&GdalUtil::reproject(warp_input, &region.target_srs, &warped))
                .await?;
            self.runner
                .run(&GdalUtil::clip(&warped, bbox, &output))
                .await?;
            Ok::<(), AodError>(())
        }
        .await;

        for tmp in [&converted, &warped] {
            let _ = std::fs::remove_file(tmp);
        }
        match result {
            Ok(()) => Ok(output),
            Err(e) => {
                let _ = std::fs::remove_file(&output);
                Err(e)
            }
        }
    }
}

fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, AodError> {
    if !dir.is_dir() {
        log::warn!("{} does not exist", dir.display());
        return Ok(Vec::new());
    }
    let pattern = format!(
        "{}/*.{}",
        glob::Pattern::escape(&dir.to_string_lossy()),
        extension
    );
    let mut paths: Vec<PathBuf> = glob::glob(&pattern)?.filter_map(Result::ok).collect();
    paths.sort();
    Ok(paths)
}

fn subdirectories(dir: &Path) -> Result<Vec<PathBuf>, AodError> {
    if !dir.is_dir() {
        log::warn!("{} does not exist", dir.display());
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filename_date::DateScheme;

    fn config_for(source: ClipSource, input: &Path, output: &Path) -> Config {
        Config {
            region: RegionConfig {
                source,
                input_dir: input.to_path_buf(),
                output_dir: output.to_path_buf(),
                bbox: Some([0.0, 0.0, 1.0, 1.0]),
                ..RegionConfig::default()
            },
            ..Config::default()
        }
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn netcdf_scenes_are_listed_in_time_order() {
        let input = tempfile::tempdir().unwrap();
        let year_dir = input.path().join("2020");
        touch(&year_dir.join("OR_ABI-L2-AODC-M6_G16_s20201001800000_e1_c1.nc"));
        touch(&year_dir.join("OR_ABI-L2-AODC-M6_G16_s20201001300000_e1_c1.nc"));
        touch(&year_dir.join("OR_ABI-L2-AODC-M6_G16_broken.nc"));
        touch(&year_dir.join("readme.txt"));

        let config = config_for(ClipSource::Netcdf, input.path(), Path::new("/out"));
        let clipper = RegionClipper::new(&config, ToolRunner::from_secs(1));
        let (scenes, failures) = clipper.scenes(2020).unwrap();

        assert_eq!(scenes.len(), 2);
        assert!(scenes[0].timestamp < scenes[1].timestamp);
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn geotiff_scenes_come_from_day_directories() {
        let input = tempfile::tempdir().unwrap();
        let year_dir = input.path().join("2023");
        touch(&year_dir.join("20230102/CG_ABI-L2-AODC-M6_G16_x_s20230102_e_f_1400UTC.tif"));
        touch(&year_dir.join("20230101/CG_ABI-L2-AODC-M6_G16_x_s20230101_e_f_0900UTC.tif"));

        let config = config_for(ClipSource::Geotiff, input.path(), Path::new("/out"));
        let clipper = RegionClipper::new(&config, ToolRunner::from_secs(1));
        let (scenes, failures) = clipper.scenes(2023).unwrap();

        assert!(failures.is_empty());
        assert_eq!(scenes.len(), 2);
        assert!(!keep_scene(&scenes[0], 12));
        assert!(keep_scene(&scenes[1], 12));
    }

    #[test]
    fn output_keeps_scene_stem_under_year() {
        let config = config_for(ClipSource::Netcdf, Path::new("/in"), Path::new("/geo"));
        let clipper = RegionClipper::new(&config, ToolRunner::from_secs(1));
        assert_eq!(
            clipper.output_path(Path::new("/in/2020/OR_x_s20201001800000.nc"), 2020),
            PathBuf::from("/geo/2020/OR_x_s20201001800000.tif")
        );
    }

    #[test]
    fn default_clip_output_parses_as_day_input() {
        let config = Config::default();
        let clipper = RegionClipper::new(&config, ToolRunner::from_secs(1));
        let scene = Path::new("/nc/2020/OR_ABI-L2-AODC-M6_G16_s20201001812345_e1_c1.nc");
        let clipped = clipper.output_path(scene, 2020);

        let scheme = DateScheme::for_tier(Tier::Day, config.day_input_scheme);
        let ts = scheme.extract(&clipped).unwrap();
        assert_eq!(ts, DateScheme::NetcdfStart.extract(scene).unwrap());
        assert!(clipped.starts_with(config.input_dir(Tier::Day, 2020)));
    }

    #[test]
    fn configured_bbox_wins_over_boundary() {
        let config = config_for(ClipSource::Netcdf, Path::new("/in"), Path::new("/geo"));
        let clipper = RegionClipper::new(&config, ToolRunner::from_secs(1));
        assert_eq!(clipper.clip_box().unwrap(), [0.0, 0.0, 1.0, 1.0]);
    }

    #[tokio::test]
    async fn failed_tool_leaves_no_output_or_temporaries() {
        let temp = tempfile::tempdir().unwrap();
        let scene = temp.path().join("in/2020/OR_x_s20201001800000.nc");
        touch(&scene);
        let mut config = config_for(
            ClipSource::Netcdf,
            &temp.path().join("in"),
            &temp.path().join("geo"),
        );
        config.temp_root = temp.path().join("tmp");
        config.region.variable = "NOT_A_VARIABLE".to_string();
        std::fs::create_dir_all(&config.temp_root).unwrap();

        let clipper = RegionClipper::new(&config, ToolRunner::from_secs(30));
        let report = clipper.run(&[2020]).await.unwrap();

        assert!(report.produced.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(!clipper.output_path(&scene, 2020).exists());
        assert_eq!(std::fs::read_dir(&config.temp_root).unwrap().count(), 0);
    }
}
