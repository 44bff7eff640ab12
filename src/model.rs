use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

pub const NODATA_VALUE: f32 = -9999.0;

/// Single-band raster held in memory, row-major from the top-left cell.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    pub rows: usize,
    pub cols: usize,
    /// GDAL-style affine transform.
    pub geo_transform: [f64; 6],
    /// WKT of the coordinate system; empty when unknown.
    pub projection: String,
    pub nodata: Option<f32>,
    pub values: Vec<f32>,
}

impl RasterGrid {
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn is_nodata(&self, value: f32) -> bool {
        value.is_nan() || self.nodata.is_some_and(|nd| value == nd)
    }

    pub fn extents(&self) -> RasterExtents {
        let [origin_x, cell_w, _, origin_y, _, cell_h] = self.geo_transform;
        let far_x = origin_x + cell_w * self.cols as f64;
        let far_y = origin_y + cell_h * self.rows as f64;
        RasterExtents {
            left: origin_x.min(far_x),
            right: origin_x.max(far_x),
            top: origin_y.max(far_y),
            bottom: origin_y.min(far_y),
            cellsize: cell_w.abs(),
        }
    }

    /// Two grids share a cell lattice when shape and transform agree.
    pub fn is_aligned_with(&self, other: &RasterGrid) -> bool {
        self.shape() == other.shape()
            && self
                .geo_transform
                .iter()
                .zip(other.geo_transform.iter())
                .all(|(a, b)| (a - b).abs() < 1e-9)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterExtents {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
    pub cellsize: f64,
}

impl RasterExtents {
    pub fn to_metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("left".to_string(), self.left.to_string()),
            ("right".to_string(), self.right.to_string()),
            ("top".to_string(), self.top.to_string()),
            ("bottom".to_string(), self.bottom.to_string()),
            ("cellsize".to_string(), self.cellsize.to_string()),
        ])
    }
}

/// Attribute value read from a geodatabase table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Integer(v) => write!(f, "{v}"),
            Cell::Real(v) => write!(f, "{v}"),
            Cell::Text(v) => f.write_str(v),
        }
    }
}

/// Columns that never leave the geodatabase.
pub const DERIVED_COLUMNS: &[&str] = &["OBJECTID", "ZminProj", "ZmaxProj", "ZrangeProj"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl TableRows {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Drops the derived/internal columns listed in [`DERIVED_COLUMNS`].
    pub fn without_derived(self) -> Self {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| !DERIVED_COLUMNS.contains(&c.as_str()))
            .collect();
        let columns = self
            .columns
            .into_iter()
            .zip(keep.iter())
            .filter_map(|(c, k)| k.then_some(c))
            .collect();
        let rows = self
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(keep.iter())
                    .filter_map(|(v, k)| k.then_some(v))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    /// `(field, value)` pairs, row by row.
    pub fn field_values(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.rows.iter().flat_map(move |row| {
            self.columns
                .iter()
                .map(String::as_str)
                .zip(row.iter())
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Surveyed point with its CAD-style attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyPoint {
    pub number: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub description: String,
}

/// One exported file as recorded in the project manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArtifact {
    pub id: String,
    pub display_name: String,
    /// Path relative to the project root.
    pub path: PathBuf,
    pub dataset_type: String,
    pub attributes: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, String>,
}

impl OutputArtifact {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        path: impl Into<PathBuf>,
        dataset_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            path: path.into(),
            dataset_type: dataset_type.into(),
            attributes: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Manifest path with forward slashes, independent of the host OS.
    pub fn manifest_path(&self) -> String {
        manifest_path(&self.path)
    }
}

pub fn manifest_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> RasterGrid {
        RasterGrid {
            rows: 2,
            cols: 3,
            geo_transform: [500.0, 0.5, 0.0, 1000.0, 0.0, -0.5],
            projection: String::new(),
            nodata: Some(NODATA_VALUE),
            values: vec![1.0, 2.0, 3.0, 4.0, NODATA_VALUE, 6.0],
        }
    }

    #[test]
    fn test_extents() {
        let e = grid().extents();
        assert_eq!(e.left, 500.0);
        assert_eq!(e.right, 501.5);
        assert_eq!(e.top, 1000.0);
        assert_eq!(e.bottom, 999.0);
        assert_eq!(e.cellsize, 0.5);
        assert_eq!(e.to_metadata().len(), 5);
    }

    #[test]
    fn test_nodata_detection() {
        let g = grid();
        assert!(g.is_nodata(NODATA_VALUE));
        assert!(g.is_nodata(f32::NAN));
        assert!(!g.is_nodata(0.0));
    }

    #[test]
    fn test_without_derived_columns() {
        let mut table = TableRows::new(vec![
            "OBJECTID".into(),
            "Name".into(),
            "ZrangeProj".into(),
        ]);
        table.rows.push(vec![
            Cell::Integer(1),
            Cell::Text("a".into()),
            Cell::Real(0.2),
        ]);
        let table = table.without_derived();
        assert_eq!(table.columns, vec!["Name".to_string()]);
        assert_eq!(table.rows, vec![vec![Cell::Text("a".into())]]);
    }

    #[test]
    fn test_manifest_path_uses_forward_slashes() {
        let p = Path::new("Topography").join("TIN0001").join("DEM.tif");
        assert_eq!(manifest_path(&p), "Topography/TIN0001/DEM.tif");
    }
}
