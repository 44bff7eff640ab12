use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification used by the propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InputMissing,
    OutputUnwritable,
    Conversion,
    DerivationFailed,
    RepairSkipped,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputMissing => "InputMissing",
            ErrorKind::OutputUnwritable => "OutputUnwritable",
            ErrorKind::Conversion => "Conversion",
            ErrorKind::DerivationFailed => "DerivationFailed",
            ErrorKind::RepairSkipped => "RepairSkipped",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("required input is missing: {what} ({path})")]
    InputMissing { what: String, path: PathBuf },

    #[error("output folder is not writable: {path}: {reason}")]
    OutputUnwritable { path: PathBuf, reason: String },

    #[error("failed to export {dataset}: {message}")]
    Conversion { dataset: String, message: String },

    #[error("could not derive {dataset}: {message}")]
    DerivationFailed { dataset: String, message: String },

    #[error("repair skipped for {dataset}: {message}")]
    RepairSkipped { dataset: String, message: String },

    #[error("manifest conflict: {0}")]
    Manifest(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl ExportError {
    pub fn conversion(dataset: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ExportError::Conversion {
            dataset: dataset.into(),
            message: message.to_string(),
        }
    }

    pub fn derivation(dataset: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ExportError::DerivationFailed {
            dataset: dataset.into(),
            message: message.to_string(),
        }
    }

    pub fn repair_skipped(dataset: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ExportError::RepairSkipped {
            dataset: dataset.into(),
            message: message.to_string(),
        }
    }

    pub fn input_missing(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        ExportError::InputMissing {
            what: what.into(),
            path: path.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::InputMissing { .. } => ErrorKind::InputMissing,
            ExportError::OutputUnwritable { .. } => ErrorKind::OutputUnwritable,
            ExportError::Conversion { .. }
            | ExportError::Io(_)
            | ExportError::Xml(_)
            | ExportError::Database(_)
            | ExportError::Csv(_)
            | ExportError::Zip(_) => ErrorKind::Conversion,
            ExportError::DerivationFailed { .. } => ErrorKind::DerivationFailed,
            ExportError::RepairSkipped { .. } => ErrorKind::RepairSkipped,
            ExportError::Manifest(_) | ExportError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Only these abort a visit; everything else is downgraded to a log entry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InputMissing | ErrorKind::OutputUnwritable
        )
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(ExportError::input_missing("survey geodatabase", "/x.gdb").is_fatal());
        assert!(ExportError::OutputUnwritable {
            path: "/out".into(),
            reason: "read-only".into()
        }
        .is_fatal());
        assert!(!ExportError::conversion("DEM", "corrupt").is_fatal());
        assert!(!ExportError::derivation("WaterDepth", "no WSEDEM").is_fatal());
        assert!(!ExportError::repair_skipped("BankfullCL", "2 features").is_fatal());
    }

    #[test]
    fn test_io_errors_are_conversion() {
        let err: ExportError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(err.kind(), ErrorKind::Conversion);
    }
}
