//! Output tree layout and manifest bookkeeping for one project.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info};

use crate::accessor::copy_dir_recursive;
use crate::config::ExportConfig;
use crate::error::Result;
use crate::manifest::{self, ProjectManifest};
use crate::model::{Cell, OutputArtifact, TableRows};
use crate::qa::{QualityDatabase, QA_DB_FILE, QA_DB_ID};
use crate::xml::XmlDoc;

pub const INPUTS_DIR: &str = "Inputs";
pub const SURVEY_DATA_DIR: &str = "SurveyData";
pub const SURVEY_EXTENTS_DIR: &str = "SurveyExtents";
pub const UNPROJECTED_DIR: &str = "SurveyDataUnProjected";
pub const TOPOGRAPHY_DIR: &str = "Topography";
pub const TIN_DIR: &str = "TIN0001";
pub const STAGES_DIR: &str = "Stages";
pub const ASSOC_SURFACES_DIR: &str = "AssocSurfaces";
pub const MAP_IMAGES_DIR: &str = "MapImages";
pub const REPORTS_DIR: &str = "Reports";
pub const LOG_FILE: &str = "log.xml";
pub const MAP_IMAGES_INDEX: &str = "mapimages.xml";

/// `Topography/TIN0001`, relative to the project root.
pub fn topography_base() -> PathBuf {
    Path::new(TOPOGRAPHY_DIR).join(TIN_DIR)
}

/// Identity of the surveyed visit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitInfo {
    pub site: String,
    pub visit_id: String,
    pub watershed: String,
    pub year: String,
}

/// Survey-info rows split by destination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurveyInfo {
    /// Copied onto the instrument file inputs.
    pub instrument_tags: Vec<(String, String)>,
    /// Project metadata, already carrying their final names.
    pub project_metadata: Vec<(String, String)>,
}

const INSTRUMENT_FIELDS: &[&str] = &["InstrumentType", "InstrumentModel"];
const CREW_FIELDS: &[&str] = &["Watershed", "Site", "Year", "Visit", "VisitID", "SiteID"];

pub fn partition_survey_info(table: &TableRows) -> SurveyInfo {
    let mut info = SurveyInfo::default();
    for (field, value) in table.field_values() {
        let value = value.to_string();
        if INSTRUMENT_FIELDS.contains(&field) {
            info.instrument_tags.push((field.to_string(), value));
        } else if CREW_FIELDS.contains(&field) {
            info.project_metadata
                .push((format!("CrewSpecified{field}"), value));
        } else {
            info.project_metadata.push((field.to_string(), value));
        }
    }
    info
}

/// A freshly started project.
pub struct ProjectStart {
    pub manifest: ProjectManifest,
    pub qa: QualityDatabase,
    pub instrument_tags: Vec<(String, String)>,
}

pub struct ProjectAssembler<'c> {
    root: PathBuf,
    config: &'c ExportConfig,
}

impl<'c> ProjectAssembler<'c> {
    pub fn new(root: impl Into<PathBuf>, config: &'c ExportConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates `<root>/<relative>` and returns the absolute path.
    pub fn ensure_dir(&self, relative: &Path) -> Result<PathBuf> {
        let dir = self.root.join(relative);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Creates the project root, `Inputs/` and the QA database, and seeds
    /// project metadata from the visit and the archive's survey info.
    pub fn begin_project(&self, visit: &VisitInfo, survey_info: Option<&TableRows>) -> Result<ProjectStart> {
        fs::create_dir_all(&self.root)?;
        let inputs = self.ensure_dir(Path::new(INPUTS_DIR))?;

        let name = if visit.site.is_empty() {
            "CHaMP Topo Survey"
        } else {
            visit.site.as_str()
        };
        let mut manifest =
            ProjectManifest::new(name, &self.config.project_type, &self.config.tool_version);
        manifest.set_metadata("Site", &visit.site);
        manifest.set_metadata("Visit", &visit.visit_id);
        manifest.set_metadata("Watershed", &visit.watershed);
        manifest.set_metadata("Year", &visit.year);
        manifest.set_metadata("Region", &self.config.region);
        manifest.set_metadata("ExportTool", &self.config.tool_name);
        manifest.set_metadata("ExportToolVersion", &self.config.tool_version);

        let partitioned = survey_info.map(partition_survey_info).unwrap_or_default();
        for (name, value) in partitioned.project_metadata {
            manifest.set_metadata(name, value);
        }

        let qa = QualityDatabase::create(
            &inputs.join(QA_DB_FILE),
            self.config.qa_template.as_deref(),
        )?;
        qa.set_info("Site", &visit.site)?;
        qa.set_info("Visit", &visit.visit_id)?;
        qa.set_info("Watershed", &visit.watershed)?;
        qa.set_info("Year", &visit.year)?;
        manifest.add_input_dataset(OutputArtifact::new(
            QA_DB_ID,
            "Survey Quality Database",
            Path::new(INPUTS_DIR).join(QA_DB_FILE),
            QA_DB_ID,
        ))?;

        info!(root = %self.root.display(), project = name, "project started");
        Ok(ProjectStart {
            manifest,
            qa,
            instrument_tags: partitioned.instrument_tags,
        })
    }

    /// Validates and writes the manifest to the project root.
    pub fn finalize(&self, manifest: &ProjectManifest) -> Result<PathBuf> {
        manifest.validate()?;
        let xml = manifest::render(manifest, Utc::now())?;
        let path = self.root.join(&self.config.project_file);
        fs::write(&path, xml)?;
        info!(path = %path.display(), "project manifest written");
        Ok(path)
    }

    /// Copies `*.png`/`*.jpg` from `source` into `MapImages/` and writes the
    /// index. Rows of the archive's MapImages table are matched by file name.
    pub fn copy_map_images(&self, source: &Path, table: Option<&TableRows>) -> Result<Vec<String>> {
        let target = self.ensure_dir(Path::new(MAP_IMAGES_DIR))?;
        let mut images: Vec<String> = fs::read_dir(source)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_map_image(path))
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        images.sort();

        for image in &images {
            fs::copy(source.join(image), target.join(image))?;
        }
        write_map_images_index(&target.join(MAP_IMAGES_INDEX), &images, table)?;
        debug!(count = images.len(), "map images copied");
        Ok(images)
    }

    /// Copies `<source>/Reports` verbatim, when present.
    pub fn copy_reports(&self, map_images_folder: &Path) -> Result<Option<PathBuf>> {
        let reports = map_images_folder.join(REPORTS_DIR);
        if !reports.is_dir() {
            return Ok(None);
        }
        let target = self.root.join(REPORTS_DIR);
        copy_dir_recursive(&reports, &target)?;
        Ok(Some(target))
    }
}

fn is_map_image(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| e == "png" || e == "jpg")
}

/// File name of a `FilePath` cell, whichever separator the crew used.
fn image_key(file_path: &str) -> &str {
    file_path
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(file_path)
}

fn write_map_images_index(path: &Path, images: &[String], table: Option<&TableRows>) -> Result<()> {
    let lookup = |image: &str, column: &str| -> String {
        let Some(table) = table else {
            return String::new();
        };
        let (Some(key_idx), Some(col_idx)) =
            (table.column_index("FilePath"), table.column_index(column))
        else {
            return String::new();
        };
        table
            .rows
            .iter()
            .find(|row| {
                row.get(key_idx)
                    .is_some_and(|c| matches!(c, Cell::Text(t) if image_key(t) == image))
            })
            .and_then(|row| row.get(col_idx))
            .map(|c| c.to_string())
            .unwrap_or_default()
    };

    let mut doc = XmlDoc::new();
    doc.start("MapImages", &[])?;
    for image in images {
        let created = lookup(image, "TIMESTAMP");
        doc.start("MapImage", &[("dateCreated", created.as_str())])?;
        doc.text_element("Title", &[], &lookup(image, "Title"))?;
        doc.text_element("Path", &[], &format!("{MAP_IMAGES_DIR}/{image}"))?;
        doc.text_element("Context", &[], &lookup(image, "Context"))?;
        doc.text_element("ImageCode", &[], &lookup(image, "ImageCode"))?;
        doc.text_element("Comments", &[], &lookup(image, "Comments"))?;
        doc.end("MapImage")?;
    }
    doc.end("MapImages")?;
    doc.save(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn survey_info() -> TableRows {
        let mut table = TableRows::new(vec![
            "InstrumentType".into(),
            "InstrumentModel".into(),
            "Site".into(),
            "VisitID".into(),
            "Crew".into(),
        ]);
        table.rows.push(vec![
            Cell::Text("Total Station".into()),
            Cell::Text("Nikon".into()),
            Cell::Text("CBW05583".into()),
            Cell::Integer(1234),
            Cell::Text("A".into()),
        ]);
        table
    }

    #[test]
    fn test_partition_survey_info() {
        let info = partition_survey_info(&survey_info());
        assert_eq!(
            info.instrument_tags,
            vec![
                ("InstrumentType".to_string(), "Total Station".to_string()),
                ("InstrumentModel".to_string(), "Nikon".to_string())
            ]
        );
        assert_eq!(
            info.project_metadata,
            vec![
                ("CrewSpecifiedSite".to_string(), "CBW05583".to_string()),
                ("CrewSpecifiedVisitID".to_string(), "1234".to_string()),
                ("Crew".to_string(), "A".to_string())
            ]
        );
    }

    #[test]
    fn test_begin_project_seeds_metadata() {
        let temp = TempDir::new().unwrap();
        let config = ExportConfig::default();
        let assembler = ProjectAssembler::new(temp.path().join("project"), &config);
        let visit = VisitInfo {
            site: "CBW05583-028079".into(),
            visit_id: "1234".into(),
            watershed: "Entiat".into(),
            year: "2014".into(),
        };
        let start = assembler.begin_project(&visit, Some(&survey_info())).unwrap();

        let m = &start.manifest;
        assert_eq!(m.name, "CBW05583-028079");
        assert_eq!(m.metadata_value("Region"), Some("CRB"));
        assert_eq!(m.metadata_value("CrewSpecifiedSite"), Some("CBW05583"));
        assert_eq!(m.inputs[0].id, "SurveyQualityDB");
        assert_eq!(start.instrument_tags.len(), 2);
        assert!(temp.path().join("project/Inputs/SurveyQualityDB.sqlite").is_file());
    }

    #[test]
    fn test_map_images_index() {
        let temp = TempDir::new().unwrap();
        let images = temp.path().join("MapImages");
        fs::create_dir_all(images.join("Reports")).unwrap();
        fs::write(images.join("b.jpg"), b"jpg").unwrap();
        fs::write(images.join("a.PNG"), b"png").unwrap();
        fs::write(images.join("notes.txt"), b"x").unwrap();
        fs::write(images.join("Reports").join("r.pdf"), b"pdf").unwrap();

        let mut table = TableRows::new(vec!["FilePath".into(), "Title".into()]);
        table.rows.push(vec![
            Cell::Text("..\\MapImages\\b.jpg".into()),
            Cell::Text("Overview".into()),
        ]);

        let config = ExportConfig::default();
        let assembler = ProjectAssembler::new(temp.path().join("out"), &config);
        let copied = assembler.copy_map_images(&images, Some(&table)).unwrap();
        assert_eq!(copied, vec!["a.PNG".to_string(), "b.jpg".to_string()]);

        let xml = fs::read_to_string(temp.path().join("out/MapImages/mapimages.xml")).unwrap();
        assert!(xml.contains("<Title>Overview</Title>"));
        assert!(xml.contains("<Path>MapImages/b.jpg</Path>"));

        let reports = assembler.copy_reports(&images).unwrap().unwrap();
        assert!(reports.join("r.pdf").is_file());
    }
}
