//! GDAL backend: reads the survey geodatabase through the OpenFileGDB
//! driver and writes ESRI shapefiles and GeoTIFFs.
//!
//! Internals work on `anyhow::Result` with context; the trait methods map
//! every failure to [`ExportError::Conversion`] for the dataset at hand.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gdal::vector::{
    FieldDefn, FieldValue, Geometry, LayerAccess, LayerOptions, OGRFieldType, OGRwkbGeometryType,
};
use gdal::{Dataset, DatasetOptions, DriverManager, GdalOpenFlags};
use tracing::{debug, warn};

use super::{ExportOptions, OutputStore, ResourceAccessor, VectorWrite, ZSnapReport};
use crate::catalog::{
    self, file_name, DatasetDescriptor, FieldType, StorageKind, FIELD_DESCRIPTION,
    FIELD_POINT_NUMBER,
};
use crate::error::{self, ExportError};
use crate::model::{Cell, RasterGrid, SurveyPoint, TableRows, DERIVED_COLUMNS};
use crate::repair::snap_vertices;
use crate::writer::GeoTiffWriter;

const WKB_25D_BIT: u32 = 0x8000_0000;
/// dBASE column names are capped at ten characters.
const SHAPEFILE_FIELD_LEN: usize = 10;
const SHAPEFILE_SIDECARS: &[&str] = &["shp", "shx", "dbf", "prj", "cpg", "sbn", "sbx"];

/// Whether a geometry type code carries Z, in either the 2.5D or the ISO
/// numbering.
pub fn geometry_type_has_z(ty: OGRwkbGeometryType::Type) -> bool {
    ty & WKB_25D_BIT != 0 || matches!((ty % 4000) / 1000, 1 | 3)
}

fn flatten(ty: OGRwkbGeometryType::Type) -> OGRwkbGeometryType::Type {
    (ty & !WKB_25D_BIT) % 1000
}

/// Rebuilds `geometry` with explicit Z, vertex by vertex, letting `vertex`
/// rewrite each coordinate triple of a simple part.
fn rebuild_3d(
    geometry: &Geometry,
    vertex: &mut dyn FnMut(&mut Vec<(f64, f64, f64)>),
) -> Result<Geometry> {
    let mut out = Geometry::empty(flatten(geometry.geometry_type()))?;
    let parts = geometry.geometry_count();
    if parts == 0 {
        let mut points = geometry.get_point_vec();
        vertex(&mut points);
        for point in points {
            out.add_point(point);
        }
    } else {
        for i in 0..parts {
            let part = geometry.get_geometry(i);
            out.add_geometry(rebuild_3d(&part, vertex)?)?;
        }
    }
    Ok(out)
}

/// Same geometry, written 3-D. 2-D sources get Z = 0.
pub fn promote_z(geometry: &Geometry) -> Result<Geometry> {
    rebuild_3d(geometry, &mut |_: &mut Vec<(f64, f64, f64)>| {})
}

fn all_vertices(geometry: &Geometry, out: &mut Vec<(f64, f64, f64)>) {
    let parts = geometry.geometry_count();
    if parts == 0 {
        out.extend(geometry.get_point_vec());
    } else {
        for i in 0..parts {
            all_vertices(&geometry.get_geometry(i), out);
        }
    }
}

fn to_cell(value: Option<FieldValue>) -> Cell {
    match value {
        None => Cell::Null,
        Some(FieldValue::IntegerValue(v)) => Cell::Integer(v as i64),
        Some(FieldValue::Integer64Value(v)) => Cell::Integer(v),
        Some(FieldValue::RealValue(v)) => Cell::Real(v),
        Some(FieldValue::StringValue(v)) => Cell::Text(v),
        Some(other) => other.into_string().map(Cell::Text).unwrap_or(Cell::Null),
    }
}

fn open_vector(path: &Path, update: bool) -> Result<Dataset> {
    let open_flags = if update {
        GdalOpenFlags::GDAL_OF_VECTOR | GdalOpenFlags::GDAL_OF_UPDATE
    } else {
        GdalOpenFlags::GDAL_OF_VECTOR
    };
    Dataset::open_ex(
        path,
        DatasetOptions {
            open_flags,
            ..DatasetOptions::default()
        },
    )
    .with_context(|| format!("Failed to open {}", path.display()))
}

/// Deletes an existing shapefile and its sidecars so the driver can
/// create it afresh.
fn remove_shapefile(path: &Path) -> Result<()> {
    for ext in SHAPEFILE_SIDECARS {
        let sidecar = path.with_extension(ext);
        if sidecar.is_file() {
            fs::remove_file(&sidecar)
                .with_context(|| format!("Failed to remove {}", sidecar.display()))?;
        }
    }
    Ok(())
}

/// One output column of a shapefile being written.
struct Column {
    source: String,
    output: String,
    field_type: OGRFieldType::Type,
    width: i32,
}

fn output_columns(
    descriptor: &DatasetDescriptor,
    source_fields: Vec<(String, OGRFieldType::Type, i32)>,
    rename: bool,
) -> Vec<Column> {
    source_fields
        .into_iter()
        .filter(|(name, _, _)| !DERIVED_COLUMNS.contains(&name.as_str()))
        .map(|(name, field_type, width)| {
            let spec = descriptor.fields.iter().find(|f| f.source == name);
            let output = if rename {
                descriptor.output_field(&name)
            } else {
                name.as_str()
            };
            let output: String = output.chars().take(SHAPEFILE_FIELD_LEN).collect();
            let width = match spec.map(|s| s.ty) {
                Some(FieldType::Text(len)) => i32::from(len),
                _ => width,
            };
            Column {
                source: name,
                output,
                field_type,
                width,
            }
        })
        .collect()
}

/// A survey geodatabase opened read-only.
pub struct GdalArchive {
    path: PathBuf,
    dataset: Dataset,
}

impl GdalArchive {
    pub fn open(path: impl AsRef<Path>) -> error::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ExportError::input_missing("survey geodatabase", path));
        }
        let dataset = Dataset::open_ex(
            path,
            DatasetOptions {
                open_flags: GdalOpenFlags::GDAL_OF_VECTOR,
                allowed_drivers: Some(&["OpenFileGDB"][..]),
                ..DatasetOptions::default()
            },
        )
        .map_err(|e| ExportError::conversion(path.display().to_string(), e))?;
        debug!(path = %path.display(), "survey geodatabase opened");
        Ok(Self {
            path: path.to_path_buf(),
            dataset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// GDAL connection string of a raster inside the geodatabase.
    fn raster_path(&self, descriptor: &DatasetDescriptor) -> String {
        format!("OpenFileGDB:{}:{}", self.path.display(), descriptor.name)
    }

    fn write_shapefile(
        &self,
        descriptor: &DatasetDescriptor,
        target_dir: &Path,
        output_name: &str,
        options: &ExportOptions,
    ) -> Result<VectorWrite> {
        let mut source = self
            .dataset
            .layer_by_name(descriptor.name)
            .with_context(|| format!("Layer {} not found", descriptor.name))?;
        let srs = source.spatial_ref();
        let source_fields: Vec<(String, OGRFieldType::Type, i32)> = source
            .defn()
            .fields()
            .map(|f| (f.name(), f.field_type(), f.width()))
            .collect();
        let columns = output_columns(descriptor, source_fields, options.rename_fields);

        let features: Vec<(Option<Geometry>, Vec<(String, Option<FieldValue>)>)> = source
            .features()
            .map(|f| (f.geometry().cloned(), f.fields().collect()))
            .collect();

        let first_type = features
            .iter()
            .find_map(|(g, _)| g.as_ref().map(|g| g.geometry_type()));
        let has_z = first_type.is_some_and(geometry_type_has_z);
        let z_promoted = options.force_z && !has_z && first_type.is_some();
        let layer_type = match first_type {
            Some(ty) if has_z || z_promoted => flatten(ty) | WKB_25D_BIT,
            Some(ty) => ty,
            None => OGRwkbGeometryType::wkbUnknown,
        };

        let path = target_dir.join(file_name(output_name, "shp"));
        remove_shapefile(&path)?;
        let driver = DriverManager::get_driver_by_name("ESRI Shapefile")
            .context("Failed to get ESRI Shapefile driver")?;
        let mut out = driver
            .create_vector_only(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        let mut layer = out
            .create_layer(LayerOptions {
                name: output_name,
                srs: srs.as_ref(),
                ty: layer_type,
                options: None,
            })
            .context("Failed to create layer")?;

        for column in &columns {
            let defn = FieldDefn::new(&column.output, column.field_type)?;
            if column.width > 0 {
                defn.set_width(column.width);
            }
            defn.add_to_layer(&layer)
                .with_context(|| format!("Failed to add field {}", column.output))?;
        }

        let mut skipped = 0usize;
        for (geometry, fields) in features {
            let Some(geometry) = geometry else {
                skipped += 1;
                continue;
            };
            let geometry = if z_promoted {
                promote_z(&geometry)?
            } else {
                geometry
            };
            let mut names = Vec::with_capacity(columns.len());
            let mut values = Vec::with_capacity(columns.len());
            for (name, value) in fields {
                let Some(value) = value else { continue };
                if let Some(column) = columns.iter().find(|c| c.source == name) {
                    names.push(column.output.as_str());
                    values.push(value);
                }
            }
            layer
                .create_feature_fields(geometry, &names, &values)
                .context("Failed to write feature")?;
        }
        if skipped > 0 {
            warn!(
                dataset = descriptor.name,
                skipped, "features without geometry were not written"
            );
        }

        debug!(dataset = descriptor.name, path = %path.display(), z_promoted, "shapefile written");
        Ok(VectorWrite { path, z_promoted })
    }

    fn read_grid(&self, descriptor: &DatasetDescriptor) -> Result<RasterGrid> {
        let path = self.raster_path(descriptor);
        let dataset = Dataset::open(&path).with_context(|| format!("Failed to open {path}"))?;
        let (cols, rows) = dataset.raster_size();
        let band = dataset.rasterband(1).context("Failed to get raster band")?;
        let buffer = band
            .read_as::<f32>((0, 0), (cols, rows), (cols, rows), None)
            .context("Failed to read raster data")?;
        let (_, values) = buffer.into_shape_and_vec();
        Ok(RasterGrid {
            rows,
            cols,
            geo_transform: dataset.geo_transform().context("Failed to read geo transform")?,
            projection: dataset.projection(),
            nodata: band.no_data_value().map(|v| v as f32),
            values,
        })
    }

    fn read_rows(&self, descriptor: &DatasetDescriptor) -> Result<TableRows> {
        let mut layer = self
            .dataset
            .layer_by_name(descriptor.name)
            .with_context(|| format!("Table {} not found", descriptor.name))?;
        let mut table = TableRows::new(layer.defn().fields().map(|f| f.name()).collect());
        for feature in layer.features() {
            table
                .rows
                .push(feature.fields().map(|(_, value)| to_cell(value)).collect());
        }
        Ok(table)
    }

    fn read_survey_points(&self, descriptor: &DatasetDescriptor) -> Result<Vec<SurveyPoint>> {
        let mut layer = self
            .dataset
            .layer_by_name(descriptor.name)
            .with_context(|| format!("Layer {} not found", descriptor.name))?;
        let mut points = Vec::new();
        for feature in layer.features() {
            let vertices = feature
                .geometry()
                .map(|g| g.get_point_vec())
                .unwrap_or_default();
            let Some(&(x, y, z)) = vertices.first() else {
                continue;
            };
            let mut number = String::new();
            let mut description = String::new();
            for (name, value) in feature.fields() {
                let text = to_cell(value).to_string();
                if name == FIELD_POINT_NUMBER {
                    number = text;
                } else if name == FIELD_DESCRIPTION {
                    description = text;
                }
            }
            points.push(SurveyPoint {
                number,
                x,
                y,
                z,
                description,
            });
        }
        Ok(points)
    }
}

fn converted<T>(dataset: &str, result: Result<T>) -> error::Result<T> {
    result.map_err(|e| ExportError::conversion(dataset, format!("{e:#}")))
}

impl ResourceAccessor for GdalArchive {
    fn exists(&self, descriptor: &DatasetDescriptor) -> bool {
        match descriptor.kind {
            StorageKind::Vector { .. } | StorageKind::Table => {
                self.dataset.layer_by_name(descriptor.name).is_ok()
            }
            StorageKind::Raster => Dataset::open(self.raster_path(descriptor)).is_ok(),
            StorageKind::File => false,
        }
    }

    fn has_unprojected(&self) -> bool {
        catalog::survey_datasets(false).any(|d| self.exists(d))
    }

    fn write_vector(
        &self,
        descriptor: &DatasetDescriptor,
        target_dir: &Path,
        output_name: &str,
        options: &ExportOptions,
    ) -> error::Result<VectorWrite> {
        converted(
            descriptor.id,
            self.write_shapefile(descriptor, target_dir, output_name, options),
        )
    }

    fn read_raster(&self, descriptor: &DatasetDescriptor) -> error::Result<RasterGrid> {
        converted(descriptor.id, self.read_grid(descriptor))
    }

    fn read_table(&self, descriptor: &DatasetDescriptor) -> error::Result<TableRows> {
        converted(descriptor.id, self.read_rows(descriptor))
    }

    fn read_points(&self, descriptor: &DatasetDescriptor) -> error::Result<Vec<SurveyPoint>> {
        converted(descriptor.id, self.read_survey_points(descriptor))
    }
}

/// Writes GeoTIFFs and edits exported shapefiles in place.
#[derive(Default)]
pub struct GdalOutputStore {
    writer: GeoTiffWriter,
}

impl GdalOutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn fill_field(&self, path: &Path, field: &str, value: &str) -> Result<()> {
        let dataset = open_vector(path, true)?;
        let mut layer = dataset.layer(0).context("Failed to get layer")?;
        let fids: Vec<u64> = layer.features().filter_map(|f| f.fid()).collect();
        for fid in fids {
            let Some(mut feature) = layer.feature(fid) else {
                continue;
            };
            let index = feature.field_index(field)?;
            feature.set_field_string(index, value)?;
            layer.set_feature(feature)?;
        }
        Ok(())
    }

    fn snap_lines(&self, line_path: &Path, point_paths: &[PathBuf], tolerance: f64) -> Result<ZSnapReport> {
        let mut points = Vec::new();
        for path in point_paths {
            let dataset = open_vector(path, false)?;
            let mut layer = dataset.layer(0).context("Failed to get layer")?;
            for feature in layer.features() {
                if let Some(geometry) = feature.geometry() {
                    all_vertices(geometry, &mut points);
                }
            }
        }

        let dataset = open_vector(line_path, true)?;
        let mut layer = dataset.layer(0).context("Failed to get layer")?;
        let fids: Vec<u64> = layer.features().filter_map(|f| f.fid()).collect();
        let mut report = ZSnapReport::default();
        for fid in fids {
            let Some(mut feature) = layer.feature(fid) else {
                continue;
            };
            let Some(geometry) = feature.geometry() else {
                report.null_geometries += 1;
                continue;
            };
            let mut updated = 0;
            let snapped = rebuild_3d(geometry, &mut |vertices: &mut Vec<(f64, f64, f64)>| {
                updated += snap_vertices(vertices, &points, tolerance);
            })?;
            feature.set_geometry(snapped)?;
            layer.set_feature(feature)?;
            report.lines += 1;
            report.vertices_updated += updated;
        }
        Ok(report)
    }
}

impl OutputStore for GdalOutputStore {
    fn write_raster(&self, grid: &RasterGrid, path: &Path) -> error::Result<()> {
        converted(&path.display().to_string(), self.writer.write(grid, path))
    }

    fn has_field(&self, path: &Path, field: &str) -> error::Result<bool> {
        let found = open_vector(path, false).and_then(|dataset| {
            let layer = dataset.layer(0).context("Failed to get layer")?;
            let found = layer
                .defn()
                .fields()
                .any(|f| f.name().eq_ignore_ascii_case(field));
            Ok(found)
        });
        converted(&path.display().to_string(), found)
    }

    fn feature_count(&self, path: &Path) -> error::Result<u64> {
        let count = open_vector(path, false).and_then(|dataset| {
            let layer = dataset.layer(0).context("Failed to get layer")?;
            Ok(layer.feature_count())
        });
        converted(&path.display().to_string(), count)
    }

    fn add_text_field(&self, path: &Path, field: &str) -> error::Result<()> {
        let added = open_vector(path, true).and_then(|dataset| {
            let layer = dataset.layer(0).context("Failed to get layer")?;
            let defn = FieldDefn::new(field, OGRFieldType::OFTString)?;
            defn.set_width(254);
            defn.add_to_layer(&layer)
                .with_context(|| format!("Failed to add field {field}"))?;
            Ok(())
        });
        converted(&path.display().to_string(), added)
    }

    fn fill_text_field(&self, path: &Path, field: &str, value: &str) -> error::Result<()> {
        converted(&path.display().to_string(), self.fill_field(path, field, value))
    }

    fn snap_z(
        &self,
        line_path: &Path,
        point_paths: &[PathBuf],
        tolerance: f64,
    ) -> error::Result<ZSnapReport> {
        converted(
            &line_path.display().to_string(),
            self.snap_lines(line_path, point_paths, tolerance),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shapefile_available() -> bool {
        DriverManager::get_driver_by_name("ESRI Shapefile").is_ok()
    }

    fn write_test_shapefile(path: &Path, ty: OGRwkbGeometryType::Type, wkts: &[&str]) {
        let driver = DriverManager::get_driver_by_name("ESRI Shapefile").unwrap();
        let mut dataset = driver.create_vector_only(path).unwrap();
        let mut layer = dataset
            .create_layer(LayerOptions {
                name: "test",
                ty,
                ..Default::default()
            })
            .unwrap();
        for wkt in wkts {
            layer
                .create_feature_fields(Geometry::from_wkt(wkt).unwrap(), &[], &[])
                .unwrap();
        }
    }

    #[test]
    fn test_geometry_type_has_z() {
        assert!(!geometry_type_has_z(OGRwkbGeometryType::wkbLineString));
        assert!(geometry_type_has_z(OGRwkbGeometryType::wkbLineString25D));
        assert!(geometry_type_has_z(OGRwkbGeometryType::wkbLineStringZM));
        assert!(geometry_type_has_z(1002));
        assert!(!geometry_type_has_z(2002));
        assert_eq!(flatten(OGRwkbGeometryType::wkbPoint25D), OGRwkbGeometryType::wkbPoint);
    }

    #[test]
    fn test_promote_z_keeps_vertices() {
        let line = Geometry::from_wkt("MULTILINESTRING ((0 0, 1 1), (2 2, 3 3))").unwrap();
        let promoted = promote_z(&line).unwrap();
        assert!(geometry_type_has_z(promoted.geometry_type()));
        let mut vertices = Vec::new();
        all_vertices(&promoted, &mut vertices);
        assert_eq!(vertices.len(), 4);
        assert_eq!(vertices[3], (3.0, 3.0, 0.0));
    }

    #[test]
    fn test_store_synthesizes_field() {
        if !shapefile_available() {
            eprintln!("Skipping test: ESRI Shapefile driver not available");
            return;
        }
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("CenterLine.shp");
        write_test_shapefile(&path, OGRwkbGeometryType::wkbLineString, &["LINESTRING (0 0, 5 5)"]);

        let store = GdalOutputStore::new();
        assert_eq!(store.feature_count(&path).unwrap(), 1);
        assert!(!store.has_field(&path, "Channel").unwrap());
        store.add_text_field(&path, "Channel").unwrap();
        store.fill_text_field(&path, "Channel", "Main").unwrap();
        assert!(store.has_field(&path, "Channel").unwrap());

        let dataset = Dataset::open(&path).unwrap();
        let mut layer = dataset.layer(0).unwrap();
        let values: Vec<Option<String>> = layer
            .features()
            .flat_map(|f| f.fields().map(|(_, v)| v.and_then(FieldValue::into_string)).collect::<Vec<_>>())
            .collect();
        assert_eq!(values, vec![Some("Main".to_string())]);
    }

    #[test]
    fn test_snap_z_from_points() {
        if !shapefile_available() {
            eprintln!("Skipping test: ESRI Shapefile driver not available");
            return;
        }
        let temp = TempDir::new().unwrap();
        let lines = temp.path().join("Breaklines.shp");
        let points = temp.path().join("Topo_Points.shp");
        write_test_shapefile(
            &lines,
            OGRwkbGeometryType::wkbLineString25D,
            &["LINESTRING Z (0 0 0, 10 0 0)"],
        );
        write_test_shapefile(
            &points,
            OGRwkbGeometryType::wkbPoint25D,
            &["POINT Z (0.05 0 101.5)", "POINT Z (50 50 99)"],
        );

        let report = GdalOutputStore::new()
            .snap_z(&lines, &[points], 0.1)
            .unwrap();
        assert_eq!(report.lines, 1);
        assert_eq!(report.vertices_updated, 1);
        assert_eq!(report.null_geometries, 0);

        let dataset = Dataset::open(&lines).unwrap();
        let mut layer = dataset.layer(0).unwrap();
        let feature = layer.features().next().unwrap();
        let vertices = feature.geometry().unwrap().get_point_vec();
        assert_eq!(vertices[0].2, 101.5);
        assert_eq!(vertices[1].2, 0.0);
    }
}
