//! Derived rasters.

use crate::error::{ExportError, Result};
use crate::model::{RasterGrid, NODATA_VALUE};

/// `depth = max(0, wse - dem)` cell by cell on the DEM's lattice.
///
/// Cells that are nodata in either input stay nodata. The two grids must
/// share shape and transform.
pub fn water_depth(dem: &RasterGrid, wse: &RasterGrid) -> Result<RasterGrid> {
    if !dem.is_aligned_with(wse) {
        return Err(ExportError::derivation(
            crate::catalog::WATER_DEPTH_ID,
            format!(
                "DEM {}x{} and water surface {}x{} do not share a cell lattice",
                dem.rows, dem.cols, wse.rows, wse.cols
            ),
        ));
    }

    let nodata = dem.nodata.unwrap_or(NODATA_VALUE);
    let values = dem
        .values
        .iter()
        .zip(wse.values.iter())
        .map(|(&ground, &surface)| {
            if dem.is_nodata(ground) || wse.is_nodata(surface) {
                nodata
            } else {
                (surface - ground).max(0.0)
            }
        })
        .collect();

    Ok(RasterGrid {
        rows: dem.rows,
        cols: dem.cols,
        geo_transform: dem.geo_transform,
        projection: dem.projection.clone(),
        nodata: Some(nodata),
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(values: Vec<f32>) -> RasterGrid {
        RasterGrid {
            rows: 1,
            cols: values.len(),
            geo_transform: [0.0, 1.0, 0.0, 10.0, 0.0, -1.0],
            projection: String::new(),
            nodata: Some(NODATA_VALUE),
            values,
        }
    }

    #[test]
    fn test_depth_is_surface_minus_ground() {
        let depth = water_depth(&grid(vec![10.0]), &grid(vec![12.0])).unwrap();
        assert_eq!(depth.values, vec![2.0]);
    }

    #[test]
    fn test_depth_is_never_negative() {
        let depth = water_depth(&grid(vec![10.0, 10.0]), &grid(vec![8.0, 10.0])).unwrap();
        assert_eq!(depth.values, vec![0.0, 0.0]);
    }

    #[test]
    fn test_nodata_propagates() {
        let depth = water_depth(
            &grid(vec![NODATA_VALUE, 5.0]),
            &grid(vec![7.0, NODATA_VALUE]),
        )
        .unwrap();
        assert_eq!(depth.values, vec![NODATA_VALUE, NODATA_VALUE]);
    }

    #[test]
    fn test_misaligned_grids_fail_derivation() {
        let mut wse = grid(vec![1.0, 2.0]);
        wse.geo_transform[0] = 0.5;
        let err = water_depth(&grid(vec![1.0, 2.0]), &wse).unwrap_err();
        assert!(matches!(err, ExportError::DerivationFailed { .. }));
    }
}
