use crate::types::*;
use gdal::raster::{Buffer, GdalType, ResampleAlg};
use gdal::Metadata;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

pub struct RasterIO;

impl RasterIO {
    /// Read band 1 of a raster as `f32`, with its georeferencing.
    pub fn read_raster(path: &Path) -> Result<RasterData, AodError> {
        let dataset = Dataset::open(path)?;
        let transform = dataset.geo_transform()?;
        let projection = dataset.projection();

        let band = dataset.rasterband(1)?;
        let no_data_value = band.no_data_value();
        let (width, height) = band.size();

        let mut data = vec![0f32; width * height];
        band.read_into_slice(
            (0, 0),
            (width, height),
            (width, height),
            &mut data,
            Some(ResampleAlg::NearestNeighbour),
        )?;

        let array = Array2::from_shape_vec((height, width), data)
            .map_err(|e| AodError::Config(format!("Failed to create array: {}", e)))?;

        Ok(RasterData {
            data: array,
            transform,
            projection,
            no_data_value: no_data_value.map(|v| v as f32),
        })
    }

    /// Coordinate reference and affine transform of a reference raster.
    pub fn read_reference(path: &Path) -> Result<GeoReference, AodError> {
        let dataset = Dataset::open(path)?;
        let (width, height) = dataset.raster_size();
        Ok(GeoReference {
            transform: dataset.geo_transform()?,
            projection: dataset.projection(),
            size: (height, width),
        })
    }

    /// Write a single-band GeoTIFF on the reference grid, creating parent
    /// directories as needed.
    pub fn write_geotiff<T: GdalType + Copy>(
        path: &Path,
        data: &Array2<T>,
        reference: &GeoReference,
        description: &str,
        no_data: Option<f64>,
    ) -> Result<(), AodError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = data.dim();

        let mut dataset =
            driver.create_with_band_type::<T, _>(path, width as isize, height as isize, 1)?;
        dataset.set_geo_transform(&reference.transform)?;
        dataset.set_projection(&reference.projection)?;

        let mut band = dataset.rasterband(1)?;
        band.set_description(description)?;
        if no_data.is_some() {
            band.set_no_data_value(no_data)?;
        }

        let values: Vec<T> = data.iter().copied().collect();
        let buffer = Buffer::new((width, height), values);
        band.write((0, 0), (width, height), &buffer)?;

        Ok(())
    }
}
