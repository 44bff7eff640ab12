pub mod accessor;
pub mod assembler;
pub mod audit;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod derive;
pub mod error;
pub mod legacy;
pub mod manifest;
pub mod model;
pub mod orchestrator;
pub mod package;
pub mod qa;
pub mod repair;
#[cfg(feature = "gdal")]
pub mod writer;
pub mod xml;

pub use accessor::{OutputStore, ResourceAccessor, SurveyDataset};
#[cfg(feature = "gdal")]
pub use accessor::gdal::{GdalArchive, GdalOutputStore};
pub use catalog::DatasetDescriptor;
pub use config::ExportConfig;
pub use error::{ExportError, Result};
pub use legacy::FolderExport;
pub use manifest::ProjectManifest;
pub use model::{OutputArtifact, RasterGrid, TableRows};
pub use orchestrator::{ExportOrchestrator, VisitReport, VisitRequest, VisitStatus};
#[cfg(feature = "gdal")]
pub use writer::GeoTiffWriter;
