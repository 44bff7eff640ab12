use anyhow::{Context, Result};
use gdal::raster::Buffer;
use gdal::{DriverManager, Metadata};
use std::path::Path;

use crate::model::{RasterGrid, NODATA_VALUE};

#[derive(Default)]
pub struct GeoTiffWriter {}

impl GeoTiffWriter {
    pub fn new() -> Self {
        Self {}
    }

    /// Writes a single-band float32 GeoTIFF. Cells the grid flags as
    /// nodata (or NaN) are written as the grid's nodata value.
    pub fn write(&self, grid: &RasterGrid, output_path: &Path) -> Result<()> {
        let driver =
            DriverManager::get_driver_by_name("GTiff").context("Failed to get GTiff driver")?;

        let (rows, cols) = grid.shape();
        if grid.values.len() != rows * cols {
            anyhow::bail!(
                "grid holds {} values for a {}x{} shape",
                grid.values.len(),
                cols,
                rows
            );
        }
        let mut dataset = driver
            .create_with_band_type::<f32, _>(output_path, cols, rows, 1)
            .with_context(|| format!("Failed to create {}", output_path.display()))?;

        dataset
            .set_geo_transform(&grid.geo_transform)
            .context("Failed to set geo transform")?;

        if grid.projection.is_empty() {
            tracing::warn!(
                path = %output_path.display(),
                "raster has no coordinate system; written without projection"
            );
        } else {
            dataset
                .set_projection(&grid.projection)
                .context("Failed to set projection")?;
        }

        let nodata = grid.nodata.unwrap_or(NODATA_VALUE);
        let mut band = dataset.rasterband(1).context("Failed to get raster band")?;
        band.set_no_data_value(Some(nodata as f64))
            .context("Failed to set no data value")?;

        // GDAL expects row-major order from the top-left cell.
        let values: Vec<f32> = grid
            .values
            .iter()
            .map(|&v| if grid.is_nodata(v) { nodata } else { v })
            .collect();
        let mut buffer = Buffer::new((cols, rows), values);
        band.write((0, 0), (cols, rows), &mut buffer)
            .context("Failed to write raster data")?;

        dataset
            .set_metadata_item("AREA_OR_POINT", "Area", "")
            .context("Failed to set AREA_OR_POINT metadata")?;

        tracing::debug!(path = %output_path.display(), cols, rows, "GeoTIFF written");
        Ok(())
    }
}
