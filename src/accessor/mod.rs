//! Uniform existence-check / export operations against one survey archive.
//!
//! [`ResourceAccessor`] is the read side (the survey geodatabase) and
//! [`OutputStore`] the write side (files already exported into the project).
//! Generic per-kind behaviour lives in [`SurveyDataset::export`] so backends
//! only implement the format-specific primitives.

#[cfg(feature = "gdal")]
pub mod gdal;

use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog::{file_name, DatasetDescriptor, StorageKind};
use crate::error::{ExportError, Result};
use crate::model::{RasterExtents, RasterGrid, SurveyPoint, TableRows};
use crate::xml::XmlDoc;

/// Recognised export options.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Replaces the descriptor's output base name.
    pub output_name: Option<String>,
    /// Require 3-D geometry on write.
    pub force_z: bool,
    /// Apply the descriptor's field map.
    pub rename_fields: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            output_name: None,
            force_z: false,
            rename_fields: true,
        }
    }
}

impl ExportOptions {
    pub fn force_z() -> Self {
        Self {
            force_z: true,
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            output_name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Result of writing one vector dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorWrite {
    pub path: PathBuf,
    /// Z was promoted to a placeholder because the source had none.
    pub z_promoted: bool,
}

/// What an export produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFile {
    pub path: PathBuf,
    /// The written geometry needs its Z values repaired.
    pub needs_z_repair: bool,
    /// Set for rasters.
    pub extents: Option<RasterExtents>,
}

/// Read access to one survey geodatabase.
pub trait ResourceAccessor {
    /// Absence is a normal outcome; implementations must not fail here.
    fn exists(&self, descriptor: &DatasetDescriptor) -> bool;

    /// Whether the archive carries an unprojected data area.
    fn has_unprojected(&self) -> bool;

    /// Converts a vector dataset to `<target_dir>/<output_name>.shp`.
    ///
    /// With `force_z` and a 2-D source, geometry is written 3-D with
    /// placeholder Z and `z_promoted` is set. A writer that cannot keep Z
    /// must fail with [`ExportError::Conversion`].
    fn write_vector(
        &self,
        descriptor: &DatasetDescriptor,
        target_dir: &Path,
        output_name: &str,
        options: &ExportOptions,
    ) -> Result<VectorWrite>;

    fn read_raster(&self, descriptor: &DatasetDescriptor) -> Result<RasterGrid>;

    fn read_table(&self, descriptor: &DatasetDescriptor) -> Result<TableRows>;

    /// Point geometry plus number/description, for CAD-style CSV output.
    fn read_points(&self, descriptor: &DatasetDescriptor) -> Result<Vec<SurveyPoint>>;
}

/// Line vertex Z repair summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZSnapReport {
    pub lines: usize,
    pub vertices_updated: usize,
    pub null_geometries: usize,
}

/// Operations on files already written into the project tree.
pub trait OutputStore {
    fn write_raster(&self, grid: &RasterGrid, path: &Path) -> Result<()>;

    fn has_field(&self, path: &Path, field: &str) -> Result<bool>;

    fn feature_count(&self, path: &Path) -> Result<u64>;

    fn add_text_field(&self, path: &Path, field: &str) -> Result<()>;

    /// Sets `field` to `value` on every feature.
    fn fill_text_field(&self, path: &Path, field: &str, value: &str) -> Result<()>;

    /// Replaces each line vertex's Z with the Z of a point within `tolerance`.
    fn snap_z(&self, line_path: &Path, point_paths: &[PathBuf], tolerance: f64)
        -> Result<ZSnapReport>;
}

/// A catalog descriptor bound to one archive for the duration of a run.
pub struct SurveyDataset<'a> {
    pub descriptor: &'static DatasetDescriptor,
    accessor: &'a dyn ResourceAccessor,
}

impl<'a> SurveyDataset<'a> {
    pub fn new(descriptor: &'static DatasetDescriptor, accessor: &'a dyn ResourceAccessor) -> Self {
        Self {
            descriptor,
            accessor,
        }
    }

    pub fn exists(&self) -> bool {
        self.accessor.exists(self.descriptor)
    }

    pub fn output_file_name(&self, options: &ExportOptions) -> String {
        match &options.output_name {
            Some(name) => file_name(name, self.descriptor.extension()),
            None => self.descriptor.output_file_name(),
        }
    }

    /// Exports into `target_dir`, which must already exist.
    pub fn export(
        &self,
        target_dir: &Path,
        options: &ExportOptions,
        store: &dyn OutputStore,
    ) -> Result<ExportedFile> {
        let d = self.descriptor;
        let base = options.output_name.as_deref().unwrap_or(d.output_name);
        match d.kind {
            StorageKind::Vector { .. } => {
                let written = self.accessor.write_vector(d, target_dir, base, options)?;
                Ok(ExportedFile {
                    path: written.path,
                    needs_z_repair: written.z_promoted,
                    extents: None,
                })
            }
            StorageKind::Raster => {
                let grid = self.accessor.read_raster(d)?;
                let path = target_dir.join(file_name(base, "tif"));
                store.write_raster(&grid, &path)?;
                Ok(ExportedFile {
                    path,
                    needs_z_repair: false,
                    extents: Some(grid.extents()),
                })
            }
            StorageKind::Table => {
                let rows = self.accessor.read_table(d)?.without_derived();
                let path = target_dir.join(file_name(base, "xml"));
                write_table_xml(d.name, &rows, &path)?;
                Ok(ExportedFile {
                    path,
                    needs_z_repair: false,
                    extents: None,
                })
            }
            StorageKind::File => Err(ExportError::conversion(
                d.id,
                "file resources are copied from their input path",
            )),
        }
    }
}

/// Serializes table rows as `<Table name><Row><Field>value</Field>...`.
pub fn write_table_xml(name: &str, table: &TableRows, path: &Path) -> Result<()> {
    let mut doc = XmlDoc::new();
    doc.start("Table", &[("name", name)])?;
    for row in &table.rows {
        doc.start("Row", &[])?;
        for (column, value) in table.columns.iter().zip(row.iter()) {
            doc.text_element(column, &[], &value.to_string())?;
        }
        doc.end("Row")?;
    }
    doc.end("Table")?;
    doc.save(path)
}

/// Copies a file (or a directory, e.g. an Esri TIN) byte for byte into
/// `target_dir`, keeping the basename unless `output_name` is given.
pub fn copy_file_resource(
    source: &Path,
    target_dir: &Path,
    output_name: Option<&str>,
) -> Result<PathBuf> {
    let name = match output_name {
        Some(n) => n.to_string(),
        None => source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ExportError::input_missing("file name", source))?,
    };
    let target = target_dir.join(name);
    if source.is_dir() {
        copy_dir_recursive(source, &target)?;
    } else if source.is_file() {
        fs::copy(source, &target)?;
    } else {
        return Err(ExportError::input_missing("file resource", source));
    }
    Ok(target)
}

pub fn copy_dir_recursive(source: &Path, target: &Path) -> Result<()> {
    fs::create_dir_all(target)?;
    let mut entries: Vec<_> = fs::read_dir(source)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let from = entry.path();
        let to = target.join(entry.file_name());
        if from.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Copies a shapefile together with its sidecar files (`.dbf`, `.shx`, ...).
pub fn copy_shapefile(source: &Path, target_dir: &Path) -> Result<PathBuf> {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| ExportError::input_missing("shapefile", source))?;
    let parent = source.parent().unwrap_or_else(|| Path::new("."));
    let mut copied = None;
    for entry in fs::read_dir(parent)? {
        let path = entry?.path();
        let same_stem = path
            .file_stem()
            .is_some_and(|s| s.to_string_lossy() == stem);
        if same_stem && path.is_file() {
            let target = copy_file_resource(&path, target_dir, None)?;
            if path == source {
                copied = Some(target);
            }
        }
    }
    copied.ok_or_else(|| ExportError::input_missing("shapefile", source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cell;
    use tempfile::TempDir;

    #[test]
    fn test_copy_file_resource_renames() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("survey.dxf");
        fs::write(&src, b"0\nSECTION\n").unwrap();
        let out = temp.path().join("out");
        fs::create_dir(&out).unwrap();

        let kept = copy_file_resource(&src, &out, None).unwrap();
        assert_eq!(kept, out.join("survey.dxf"));
        let renamed = copy_file_resource(&src, &out, Some("Breaklines.dxf")).unwrap();
        assert_eq!(fs::read(renamed).unwrap(), b"0\nSECTION\n");
    }

    #[test]
    fn test_copy_tin_directory() {
        let temp = TempDir::new().unwrap();
        let tin = temp.path().join("tin");
        fs::create_dir(&tin).unwrap();
        fs::write(tin.join("tnxy.adf"), b"xy").unwrap();
        fs::write(tin.join("tnz.adf"), b"z").unwrap();
        let out = temp.path().join("out");
        fs::create_dir(&out).unwrap();

        let copied = copy_file_resource(&tin, &out, None).unwrap();
        assert!(copied.join("tnxy.adf").is_file());
        assert_eq!(fs::read(copied.join("tnz.adf")).unwrap(), b"z");
    }

    #[test]
    fn test_copy_missing_resource_is_input_missing() {
        let temp = TempDir::new().unwrap();
        let err = copy_file_resource(&temp.path().join("nope"), temp.path(), None).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_copy_shapefile_sidecars() {
        let temp = TempDir::new().unwrap();
        for ext in ["shp", "shx", "dbf", "prj"] {
            fs::write(temp.path().join(format!("lines.{ext}")), ext).unwrap();
        }
        fs::write(temp.path().join("other.shp"), "x").unwrap();
        let out = temp.path().join("out");
        fs::create_dir(&out).unwrap();

        let copied = copy_shapefile(&temp.path().join("lines.shp"), &out).unwrap();
        assert_eq!(copied, out.join("lines.shp"));
        assert!(out.join("lines.dbf").is_file());
        assert!(!out.join("other.shp").exists());
    }

    #[test]
    fn test_write_table_xml() {
        let temp = TempDir::new().unwrap();
        let mut table = TableRows::new(vec!["Name".into(), "Value".into()]);
        table
            .rows
            .push(vec![Cell::Text("rmse".into()), Cell::Real(0.25)]);
        let path = temp.path().join("QaQcTIN.xml");
        write_table_xml("QaQcTIN", &table, &path).unwrap();

        let xml = fs::read_to_string(path).unwrap();
        assert!(xml.contains(r#"<Table name="QaQcTIN">"#));
        assert!(xml.contains("<Name>rmse</Name>"));
        assert!(xml.contains("<Value>0.25</Value>"));
    }
}
