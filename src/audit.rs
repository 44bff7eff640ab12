//! Per-visit audit trail, written as `log.xml` in the project root.

use std::path::Path;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::{ExportError, Result};
use crate::model::{Cell, TableRows};
use crate::xml::XmlDoc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    Info,
    Warning,
    Error,
    Complete,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Info => "Info",
            LogStatus::Warning => "Warning",
            LogStatus::Error => "Error",
            LogStatus::Complete => "Complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub created: String,
    pub tool: String,
    /// Free text for rows carried over from the archive.
    pub status: String,
    pub dataset: Option<String>,
    pub kind: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunLog {
    tool: String,
    entries: Vec<LogEntry>,
    warnings: usize,
    failures: usize,
}

fn now() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

impl RunLog {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            entries: Vec::new(),
            warnings: 0,
            failures: 0,
        }
    }

    /// Carries over the rows of the archive's own `Log` table
    /// (`TIMESTAMP`, `ToolName`, `Status`, `Message`), ahead of anything
    /// this run appends.
    pub fn import_archive_rows(&mut self, table: &TableRows) {
        let column = |row: &[Cell], name: &str| {
            table
                .column_index(name)
                .and_then(|i| row.get(i))
                .map(|c| c.to_string())
                .unwrap_or_default()
        };
        let carried: Vec<LogEntry> = table
            .rows
            .iter()
            .map(|row| LogEntry {
                created: column(row, "TIMESTAMP"),
                tool: column(row, "ToolName"),
                status: column(row, "Status"),
                dataset: None,
                kind: None,
                message: column(row, "Message"),
            })
            .collect();
        self.entries.splice(0..0, carried);
    }

    fn push(&mut self, status: LogStatus, dataset: Option<&str>, kind: Option<&str>, message: String) {
        self.entries.push(LogEntry {
            created: now(),
            tool: self.tool.clone(),
            status: status.as_str().to_string(),
            dataset: dataset.map(str::to_string),
            kind: kind.map(str::to_string),
            message,
        });
    }

    pub fn note(&mut self, dataset: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        info!(dataset = dataset.unwrap_or(""), "{message}");
        self.push(LogStatus::Info, dataset, None, message);
    }

    pub fn warning(&mut self, dataset: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        warn!(dataset = dataset.unwrap_or(""), "{message}");
        self.warnings += 1;
        self.push(LogStatus::Warning, dataset, None, message);
    }

    /// Records a caught error. Repair and derivation problems count as
    /// warnings, everything else as a failure.
    pub fn record_error(&mut self, dataset: &str, err: &ExportError) {
        let kind = err.kind();
        let status = match kind {
            crate::error::ErrorKind::DerivationFailed | crate::error::ErrorKind::RepairSkipped => {
                self.warnings += 1;
                LogStatus::Warning
            }
            _ => {
                self.failures += 1;
                LogStatus::Error
            }
        };
        warn!(dataset, kind = kind.as_str(), "{err}");
        self.push(status, Some(dataset), Some(kind.as_str()), err.to_string());
    }

    pub fn complete(&mut self, tool_name: &str, version: &str) {
        self.push(
            LogStatus::Complete,
            None,
            None,
            format!("Exported by {tool_name} version {version}"),
        );
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn warnings(&self) -> usize {
        self.warnings
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn has_problems(&self) -> bool {
        self.warnings + self.failures > 0
    }

    /// Entries about one dataset.
    pub fn for_dataset<'a>(&'a self, dataset: &'a str) -> impl Iterator<Item = &'a LogEntry> {
        self.entries
            .iter()
            .filter(move |e| e.dataset.as_deref() == Some(dataset))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut doc = XmlDoc::new();
        doc.start("Messages", &[])?;
        for entry in &self.entries {
            let mut attrs = vec![
                ("created", entry.created.as_str()),
                ("tool", entry.tool.as_str()),
                ("status", entry.status.as_str()),
            ];
            if let Some(dataset) = &entry.dataset {
                attrs.push(("dataset", dataset.as_str()));
            }
            if let Some(kind) = &entry.kind {
                attrs.push(("kind", kind.as_str()));
            }
            doc.text_element("Message", &attrs, &entry.message)?;
        }
        doc.end("Messages")?;
        doc.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_archive_rows_come_first() {
        let mut log = RunLog::new("export");
        log.note(None, "Added WaterDepth raster on export");

        let mut table = TableRows::new(vec![
            "TIMESTAMP".into(),
            "ToolName".into(),
            "Status".into(),
            "Message".into(),
        ]);
        table.rows.push(vec![
            Cell::Text("2014-07-30 10:00:00".into()),
            Cell::Text("Topo Toolbar".into()),
            Cell::Text("Success".into()),
            Cell::Text("TIN created".into()),
        ]);
        log.import_archive_rows(&table);

        assert_eq!(log.entries()[0].tool, "Topo Toolbar");
        assert_eq!(log.entries()[0].message, "TIN created");
        assert_eq!(log.entries()[1].message, "Added WaterDepth raster on export");
    }

    #[test]
    fn test_error_classification() {
        let mut log = RunLog::new("export");
        log.record_error("QaQcTIN", &ExportError::conversion("QaQcTIN", "unreadable"));
        log.record_error(
            "bankfull_centerline",
            &ExportError::repair_skipped("bankfull_centerline", "2 features"),
        );
        assert_eq!(log.failures(), 1);
        assert_eq!(log.warnings(), 1);
        assert!(log.has_problems());
        let entry = log.for_dataset("QaQcTIN").next().unwrap();
        assert_eq!(entry.kind.as_deref(), Some("Conversion"));
        assert_eq!(entry.status, "Error");
    }

    #[test]
    fn test_save_writes_messages() {
        let temp = TempDir::new().unwrap();
        let mut log = RunLog::new("CHaMP Survey Data Project Export");
        log.warning(Some("breaklines"), "Enabled Z Values on Export");
        log.complete("CHaMP Survey Data Project Export", "0.2.0");
        let path = temp.path().join("log.xml");
        log.save(&path).unwrap();

        let xml = fs::read_to_string(path).unwrap();
        assert!(xml.contains("<Messages>"));
        assert!(xml.contains(r#"status="Warning" dataset="breaklines">Enabled Z Values on Export</Message>"#));
        assert!(xml.contains(
            r#"status="Complete">Exported by CHaMP Survey Data Project Export version 0.2.0</Message>"#
        ));
    }
}
