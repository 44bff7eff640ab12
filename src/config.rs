//! Run configuration, loaded from TOML. Every field has a default so an
//! empty file (or no file at all) is valid.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};

pub const DEFAULT_TOOL_NAME: &str = "CHaMP Survey Data Project Export";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub tool_name: String,
    pub tool_version: String,
    pub project_type: String,
    pub region: String,
    /// Manifest file name written in the project root.
    pub project_file: String,
    /// SQLite file copied as the QA database; the embedded schema is used
    /// when unset.
    pub qa_template: Option<PathBuf>,
    /// Planar distance (map units) for breakline Z snapping.
    pub zsnap_tolerance: f64,
    pub clean_output: bool,
    pub package_zip: bool,
    /// Sub-folder of each visit used by the batch `folder` mode.
    pub output_folder_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            tool_name: DEFAULT_TOOL_NAME.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            project_type: "Topo".to_string(),
            region: "CRB".to_string(),
            project_file: "project.rs.xml".to_string(),
            qa_template: None,
            zsnap_tolerance: 0.1,
            clean_output: true,
            package_zip: false,
            output_folder_name: "GISLayers".to_string(),
        }
    }
}

impl ExportConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: ExportConfig = toml::from_str(contents)
            .map_err(|e| ExportError::Config(format!("failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            ExportError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.zsnap_tolerance.is_finite() && self.zsnap_tolerance >= 0.0) {
            return Err(ExportError::Config(format!(
                "zsnap_tolerance must be a non-negative number, got {}",
                self.zsnap_tolerance
            )));
        }
        if self.project_file.trim().is_empty() {
            return Err(ExportError::Config("project_file must not be empty".into()));
        }
        if let Some(template) = &self.qa_template {
            if !template.is_file() {
                return Err(ExportError::Config(format!(
                    "qa_template {} does not exist",
                    template.display()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = ExportConfig::from_toml_str("").unwrap();
        assert_eq!(config, ExportConfig::default());
        assert_eq!(config.project_file, "project.rs.xml");
        assert_eq!(config.zsnap_tolerance, 0.1);
        assert!(config.clean_output);
    }

    #[test]
    fn test_partial_override() {
        let config = ExportConfig::from_toml_str(
            r#"
            region = "PNW"
            zsnap_tolerance = 0.25
            package_zip = true
            "#,
        )
        .unwrap();
        assert_eq!(config.region, "PNW");
        assert_eq!(config.zsnap_tolerance, 0.25);
        assert!(config.package_zip);
        assert_eq!(config.tool_name, DEFAULT_TOOL_NAME);
    }

    #[test]
    fn test_rejects_unknown_and_invalid() {
        assert!(ExportConfig::from_toml_str("regoin = \"x\"").is_err());
        assert!(ExportConfig::from_toml_str("zsnap_tolerance = -1.0").is_err());
        assert!(ExportConfig::from_toml_str("qa_template = \"/nonexistent/q.sqlite\"").is_err());
    }
}
