//! Post-export repairs of stage attributes and breakline Z values.

use std::path::Path;

use tracing::{info, warn};

use crate::accessor::OutputStore;
use crate::catalog::{StageType, FIELD_CHANNEL, FIELD_EXTENT_TYPE};
use crate::error::{ExportError, Result};

/// Column synthesised for a stage type, with the value its single feature gets.
pub fn stage_attribute(stage_type: StageType) -> Option<(&'static str, &'static str)> {
    match stage_type {
        StageType::Centerline => Some((FIELD_CHANNEL, "Main")),
        StageType::Extent => Some((FIELD_EXTENT_TYPE, "Channel")),
        StageType::CrossSections | StageType::Islands => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeRepair {
    /// Column already present; nothing touched.
    Present,
    /// Column created on the single feature.
    Synthesized { field: String, value: String },
}

/// Adds `field = value` to a shapefile that lacks the column, but only when
/// it holds exactly one feature. Any other count is [`ExportError::RepairSkipped`]
/// and the file is left as it was.
pub fn ensure_single_feature_attribute(
    store: &dyn OutputStore,
    path: &Path,
    dataset: &str,
    field: &str,
    value: &str,
) -> Result<AttributeRepair> {
    if store.has_field(path, field)? {
        return Ok(AttributeRepair::Present);
    }

    let count = store.feature_count(path)?;
    if count != 1 {
        warn!(dataset, field, count, "cannot pick a single feature to tag");
        return Err(ExportError::repair_skipped(
            dataset,
            format!("{field} column missing and {count} features present; expected exactly one"),
        ));
    }

    store.add_text_field(path, field)?;
    store.fill_text_field(path, field, value)?;
    info!(dataset, field, value, "synthesized missing attribute column");
    Ok(AttributeRepair::Synthesized {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Snaps vertex Z to the first point found within `tolerance` (planar distance).
/// Returns how many vertices changed.
pub fn snap_vertices(vertices: &mut [(f64, f64, f64)], points: &[(f64, f64, f64)], tolerance: f64) -> usize {
    let tol_sq = tolerance * tolerance;
    let mut updated = 0;
    for vertex in vertices.iter_mut() {
        let hit = points.iter().find(|p| {
            let dx = p.0 - vertex.0;
            let dy = p.1 - vertex.1;
            dx * dx + dy * dy <= tol_sq
        });
        if let Some(point) = hit {
            vertex.2 = point.2;
            updated += 1;
        }
    }
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::ZSnapReport;
    use crate::model::RasterGrid;
    use std::cell::RefCell;
    use std::path::PathBuf;

    struct FakeShapefile {
        fields: RefCell<Vec<String>>,
        count: u64,
        filled: RefCell<Vec<(String, String)>>,
    }

    impl FakeShapefile {
        fn new(fields: &[&str], count: u64) -> Self {
            Self {
                fields: RefCell::new(fields.iter().map(|f| f.to_string()).collect()),
                count,
                filled: RefCell::new(Vec::new()),
            }
        }
    }

    impl OutputStore for FakeShapefile {
        fn write_raster(&self, _grid: &RasterGrid, _path: &Path) -> Result<()> {
            Ok(())
        }

        fn has_field(&self, _path: &Path, field: &str) -> Result<bool> {
            Ok(self.fields.borrow().iter().any(|f| f == field))
        }

        fn feature_count(&self, _path: &Path) -> Result<u64> {
            Ok(self.count)
        }

        fn add_text_field(&self, _path: &Path, field: &str) -> Result<()> {
            self.fields.borrow_mut().push(field.to_string());
            Ok(())
        }

        fn fill_text_field(&self, _path: &Path, field: &str, value: &str) -> Result<()> {
            self.filled
                .borrow_mut()
                .push((field.to_string(), value.to_string()));
            Ok(())
        }

        fn snap_z(&self, _: &Path, _: &[PathBuf], _: f64) -> Result<ZSnapReport> {
            Ok(ZSnapReport::default())
        }
    }

    #[test]
    fn test_single_centerline_gets_main() {
        let shp = FakeShapefile::new(&["CLID"], 1);
        let (field, value) = stage_attribute(StageType::Centerline).unwrap();
        let result =
            ensure_single_feature_attribute(&shp, Path::new("CenterLine.shp"), "wetted_centerline", field, value)
                .unwrap();

        assert_eq!(
            result,
            AttributeRepair::Synthesized {
                field: "Channel".into(),
                value: "Main".into()
            }
        );
        assert_eq!(
            shp.filled.borrow().as_slice(),
            &[("Channel".to_string(), "Main".to_string())]
        );
    }

    #[test]
    fn test_single_extent_gets_channel() {
        let shp = FakeShapefile::new(&[], 1);
        let (field, value) = stage_attribute(StageType::Extent).unwrap();
        ensure_single_feature_attribute(&shp, Path::new("WaterExtent.shp"), "wetted_extent", field, value)
            .unwrap();
        assert!(shp.fields.borrow().contains(&"ExtentType".to_string()));
        assert_eq!(shp.filled.borrow()[0].1, "Channel");
    }

    #[test]
    fn test_multiple_features_leave_column_absent() {
        for count in [0, 2, 5] {
            let shp = FakeShapefile::new(&["CLID"], count);
            let err = ensure_single_feature_attribute(
                &shp,
                Path::new("BankfullCL.shp"),
                "bankfull_centerline",
                "Channel",
                "Main",
            )
            .unwrap_err();
            assert!(matches!(err, ExportError::RepairSkipped { .. }));
            assert!(!shp.fields.borrow().contains(&"Channel".to_string()));
            assert!(shp.filled.borrow().is_empty());
        }
    }

    #[test]
    fn test_existing_column_is_untouched() {
        let shp = FakeShapefile::new(&["Channel", "CLID"], 3);
        let result =
            ensure_single_feature_attribute(&shp, Path::new("x.shp"), "x", "Channel", "Main").unwrap();
        assert_eq!(result, AttributeRepair::Present);
        assert!(shp.filled.borrow().is_empty());
    }

    #[test]
    fn test_only_centerline_and_extent_are_repaired() {
        assert!(stage_attribute(StageType::CrossSections).is_none());
        assert!(stage_attribute(StageType::Islands).is_none());
    }

    #[test]
    fn test_snap_vertices() {
        let mut line = vec![(0.0, 0.0, 0.0), (1.0, 1.0, 0.0), (5.0, 5.0, 0.0)];
        let points = vec![(0.05, 0.0, 101.2), (1.0, 1.08, 102.4), (9.0, 9.0, 99.0)];
        let updated = snap_vertices(&mut line, &points, 0.1);

        assert_eq!(updated, 2);
        assert_eq!(line[0].2, 101.2);
        assert_eq!(line[1].2, 102.4);
        assert_eq!(line[2].2, 0.0);
    }
}
