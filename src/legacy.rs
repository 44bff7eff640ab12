//! Flat-folder export: every enabled dataset side by side in one folder,
//! plus CAD point lists and a run summary. No project manifest.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::accessor::{ExportOptions, OutputStore, ResourceAccessor, SurveyDataset};
use crate::audit::RunLog;
use crate::catalog::{self, StorageKind, CONTROL_POINTS_NAME, TOPO_POINTS_NAME};
use crate::config::ExportConfig;
use crate::error::Result;
use crate::model::SurveyPoint;
use crate::orchestrator::{check_output_writable, clean_output_folder};
use crate::xml::XmlDoc;

pub const SUMMARY_FILE: &str = "SurveyExportMetadata.xml";
pub const TOPO_POINTS_CSV: &str = "SurveyTopographyPoints.csv";
pub const CONTROL_POINTS_CSV: &str = "ControlNetworkPoints.csv";

/// One row of a CAD point list.
#[derive(Debug, Serialize)]
struct CadPoint<'a> {
    #[serde(rename = "PNTNO")]
    number: &'a str,
    #[serde(rename = "Y")]
    y: f64,
    #[serde(rename = "X")]
    x: f64,
    #[serde(rename = "ELEV")]
    z: f64,
    #[serde(rename = "DESC")]
    description: &'a str,
}

pub fn write_points_csv(points: &[SurveyPoint], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for p in points {
        writer.serialize(CadPoint {
            number: &p.number,
            y: p.y,
            x: p.x,
            z: p.z,
            description: &p.description,
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct FolderMessage {
    pub level: &'static str,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct FolderReport {
    pub outputs: Vec<(String, PathBuf)>,
    pub messages: Vec<FolderMessage>,
}

impl FolderReport {
    fn message(&mut self, level: &'static str, text: String) {
        self.messages.push(FolderMessage { level, text });
    }

    /// Carries warnings and failures of a run log into the summary.
    fn absorb(&mut self, log: &RunLog) {
        for entry in log.entries() {
            let level = match entry.status.as_str() {
                "Warning" => "Warning",
                "Error" => "Error",
                _ => continue,
            };
            self.message(level, entry.message.clone());
        }
    }

    pub fn has_warnings(&self) -> bool {
        self.messages.iter().any(|m| m.level != "Info")
    }
}

pub struct FolderExport<'a> {
    config: &'a ExportConfig,
    accessor: &'a dyn ResourceAccessor,
    store: &'a dyn OutputStore,
}

impl<'a> FolderExport<'a> {
    pub fn new(
        config: &'a ExportConfig,
        accessor: &'a dyn ResourceAccessor,
        store: &'a dyn OutputStore,
    ) -> Self {
        Self {
            config,
            accessor,
            store,
        }
    }

    pub fn run(&self, survey_gdb: &Path, output: &Path) -> Result<FolderReport> {
        check_output_writable(output)?;
        fs::create_dir_all(output)?;
        let mut report = FolderReport::default();
        if self.config.clean_output {
            let mut log = RunLog::new(&self.config.tool_name);
            clean_output_folder(output, &mut log);
            report.absorb(&log);
        }

        let exportable = catalog::by_capability(|d| d.export_enabled && d.kind != StorageKind::File);
        for descriptor in exportable {
            let dataset = SurveyDataset::new(descriptor, self.accessor);
            if !dataset.exists() {
                report.message("Warning", format!("{} does not exist.", descriptor.name));
                continue;
            }
            // Unprojected layers keep their geodatabase name so they do not
            // overwrite the projected ones.
            let options = if descriptor.projected() == Some(false) {
                ExportOptions::named(descriptor.name)
            } else {
                ExportOptions::default()
            };
            match dataset.export(output, &options, self.store) {
                Ok(exported) => {
                    info!(dataset = descriptor.name, "exported");
                    report
                        .outputs
                        .push((descriptor.name.to_string(), exported.path));
                }
                Err(err) => {
                    warn!(dataset = descriptor.name, "{err}");
                    report.message("Error", err.to_string());
                }
            }
        }

        for (name, file) in [
            (TOPO_POINTS_NAME, TOPO_POINTS_CSV),
            (CONTROL_POINTS_NAME, CONTROL_POINTS_CSV),
        ] {
            let Some(descriptor) = catalog::by_name(name) else {
                continue;
            };
            if !self.accessor.exists(descriptor) {
                continue;
            }
            let path = output.join(file);
            let written = self
                .accessor
                .read_points(descriptor)
                .and_then(|points| write_points_csv(&points, &path));
            match written {
                Ok(()) => report.outputs.push((file.to_string(), path)),
                Err(err) => report.message("Error", format!("Cannot write {file}: {err}")),
            }
        }

        self.write_summary(survey_gdb, output, &report)?;
        Ok(report)
    }

    fn write_summary(&self, survey_gdb: &Path, output: &Path, report: &FolderReport) -> Result<()> {
        let created = Utc::now().to_rfc3339();
        let mut doc = XmlDoc::new();
        doc.start(
            "Run",
            &[
                ("tool", self.config.tool_name.as_str()),
                ("version", self.config.tool_version.as_str()),
                ("created", created.as_str()),
            ],
        )?;
        doc.start("Parameters", &[])?;
        doc.text_element(
            "Param",
            &[("name", "Input Survey GDB")],
            &survey_gdb.display().to_string(),
        )?;
        doc.text_element("Param", &[("name", "Output Path")], &output.display().to_string())?;
        doc.end("Parameters")?;

        doc.start("Outputs", &[])?;
        for (name, path) in &report.outputs {
            doc.text_element("Output", &[("name", name.as_str())], &path.display().to_string())?;
        }
        doc.end("Outputs")?;

        doc.start("Messages", &[])?;
        for message in &report.messages {
            doc.text_element("Message", &[("level", message.level)], &message.text)?;
        }
        doc.end("Messages")?;
        doc.end("Run")?;
        doc.save(&output.join(SUMMARY_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_points_csv_uses_cad_columns() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(TOPO_POINTS_CSV);
        let points = vec![SurveyPoint {
            number: "101".into(),
            x: 500.25,
            y: 1000.5,
            z: 99.75,
            description: "tp".into(),
        }];
        write_points_csv(&points, &path).unwrap();

        let text = fs::read_to_string(path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("PNTNO,Y,X,ELEV,DESC"));
        assert_eq!(lines.next(), Some("101,1000.5,500.25,99.75,tp"));
    }

    #[test]
    fn test_cleanup_warnings_reach_the_summary() {
        let mut log = RunLog::new("export");
        log.note(None, "nothing to see");
        log.warning(None, "could not remove /out/stale.tif: busy");

        let mut report = FolderReport::default();
        report.absorb(&log);
        assert_eq!(
            report.messages,
            vec![FolderMessage {
                level: "Warning",
                text: "could not remove /out/stale.tif: busy".into(),
            }]
        );
        assert!(report.has_warnings());
    }
}
