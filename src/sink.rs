//! Where frames come from and where aggregates go.
//!
//! The orchestrator only sees these two traits; GDAL and PNG output are one
//! implementation of them, and tests plug in in-memory ones.

use crate::config::DisplayRange;
use crate::raster_io::RasterIO;
use crate::render::ImageRenderer;
use crate::types::*;
use ndarray::Array2;
use std::path::Path;

pub trait FrameSource: Sync {
    /// Band 1 of the raster at `path`, NaN where the file has no value.
    fn read_frame(&self, path: &Path) -> Result<RasterFrame, AodError>;

    fn read_reference(&self, path: &Path) -> Result<GeoReference, AodError>;
}

pub trait ExportSink: Sync {
    fn write_raster(
        &self,
        grid: &Array2<f32>,
        reference: &GeoReference,
        path: &Path,
    ) -> Result<(), AodError>;

    fn write_count_raster(
        &self,
        count: &Array2<u32>,
        reference: &GeoReference,
        path: &Path,
    ) -> Result<(), AodError>;

    fn write_image(
        &self,
        grid: &Array2<f32>,
        range: DisplayRange,
        title: &str,
        path: &Path,
    ) -> Result<(), AodError>;
}

pub struct GdalSource;

impl FrameSource for GdalSource {
    fn read_frame(&self, path: &Path) -> Result<RasterFrame, AodError> {
        let raster = RasterIO::read_raster(path)?;
        let mut data = raster.data;
        // a declared band no-data other than NaN becomes NaN; the product's
        // own fill sentinel is left for the aggregator to translate
        if let Some(no_data) = raster.no_data_value.filter(|v| !v.is_nan()) {
            data.mapv_inplace(|v| if v == no_data { f32::NAN } else { v });
        }
        Ok(data)
    }

    fn read_reference(&self, path: &Path) -> Result<GeoReference, AodError> {
        RasterIO::read_reference(path)
    }
}

/// GeoTIFF rasters through GDAL, PNG images through [`ImageRenderer`].
pub struct GdalSink {
    renderer: ImageRenderer,
}

impl GdalSink {
    pub fn new(renderer: ImageRenderer) -> Self {
        Self { renderer }
    }
}

impl ExportSink for GdalSink {
    fn write_raster(
        &self,
        grid: &Array2<f32>,
        reference: &GeoReference,
        path: &Path,
    ) -> Result<(), AodError> {
        RasterIO::write_geotiff(path, grid, reference, "maximum AOD", Some(f64::NAN))
    }

    fn write_count_raster(
        &self,
        count: &Array2<u32>,
        reference: &GeoReference,
        path: &Path,
    ) -> Result<(), AodError> {
        RasterIO::write_geotiff(path, count, reference, "valid samples", None)
    }

    fn write_image(
        &self,
        grid: &Array2<f32>,
        range: DisplayRange,
        title: &str,
        path: &Path,
    ) -> Result<(), AodError> {
        self.renderer.write_png(grid, range, title, path)
    }
}
