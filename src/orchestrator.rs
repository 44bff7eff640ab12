//! Drives one visit's export: validation, every catalog family, inputs,
//! derived rasters, repairs, and the final manifest.
//!
//! Only [`ExportError::InputMissing`] and [`ExportError::OutputUnwritable`]
//! abort a visit. Everything that goes wrong for a single dataset is written
//! to the run log and the export moves on.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::accessor::{
    copy_file_resource, copy_shapefile, ExportOptions, OutputStore, ResourceAccessor,
    SurveyDataset,
};
use crate::assembler::{
    topography_base, ProjectAssembler, VisitInfo, ASSOC_SURFACES_DIR, INPUTS_DIR, LOG_FILE,
    STAGES_DIR, SURVEY_DATA_DIR, SURVEY_EXTENTS_DIR, UNPROJECTED_DIR,
};
use crate::audit::RunLog;
use crate::catalog::{
    self, DatasetDescriptor, Family, Stage, BREAKLINES_NAME, DEM_ID, EDGE_OF_WATER_NAME,
    LOG_TABLE, MAP_IMAGES_TABLE, RAW_POINTS_NAME, STREAM_FEATURES_NAME, SURVEY_INFO_TABLE,
    TOPO_POINTS_NAME, TRANSFORMATIONS_TABLE, WATER_DEPTH_ID, WSEDEM_ID,
};
use crate::config::ExportConfig;
use crate::derive::water_depth;
use crate::error::{ExportError, Result};
use crate::manifest::{add_artifact, ProjectManifest, Realization, Slot};
use crate::model::{OutputArtifact, TableRows};
use crate::package::zip_directory;
use crate::qa::QualityDatabase;
use crate::repair::{ensure_single_feature_attribute, stage_attribute, AttributeRepair};

pub const SURVEY_DATA_PROJECTED_KEY: &str = "survey_data_projected";
pub const SURVEY_DATA_UNPROJECTED_KEY: &str = "survey_data_unprojected";
pub const TOPOGRAPHY_KEY: &str = "topography";
pub const WATER_SURFACE_TIN_ID: &str = "WaterSurfaceTIN";

/// Everything the caller knows about one visit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VisitRequest {
    pub survey_gdb: PathBuf,
    pub topo_tin: PathBuf,
    pub ws_tin: Option<PathBuf>,
    pub channel_units_csv: Option<PathBuf>,
    pub output_folder: PathBuf,
    pub visit: VisitInfo,
    pub raw_instrument_files: Vec<PathBuf>,
    pub aux_instrument_files: Vec<PathBuf>,
    pub dxf_file: Option<PathBuf>,
    pub map_images_folder: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum VisitStatus {
    Success,
    Error,
    Exception,
    Warning,
}

impl VisitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisitStatus::Success => "Success",
            VisitStatus::Error => "Error",
            VisitStatus::Exception => "Exception",
            VisitStatus::Warning => "Warning",
        }
    }

    /// Outcome of a visit that escaped with `err`.
    pub fn from_error(err: &ExportError) -> Self {
        if err.is_fatal() {
            VisitStatus::Error
        } else {
            VisitStatus::Exception
        }
    }
}

#[derive(Debug)]
pub struct VisitReport {
    pub status: VisitStatus,
    pub manifest_path: PathBuf,
    pub manifest: ProjectManifest,
    pub log: RunLog,
    pub package: Option<PathBuf>,
}

impl VisitReport {
    pub fn summary(&self) -> String {
        format!(
            "{} realizations, {} warnings, {} failures",
            self.manifest.realizations.len(),
            self.log.warnings(),
            self.log.failures()
        )
    }
}

/// Fails fast when a named input is absent. Nothing is written here.
pub fn validate_inputs(request: &VisitRequest) -> Result<()> {
    if !request.survey_gdb.exists() {
        return Err(ExportError::input_missing(
            "survey geodatabase",
            &request.survey_gdb,
        ));
    }
    if !request.topo_tin.exists() {
        return Err(ExportError::input_missing("topo TIN", &request.topo_tin));
    }
    let optional = [
        ("water surface TIN", request.ws_tin.as_ref()),
        ("channel units CSV", request.channel_units_csv.as_ref()),
        ("breakline DXF", request.dxf_file.as_ref()),
    ];
    for (what, path) in optional {
        if let Some(path) = path.filter(|p| !p.exists()) {
            return Err(ExportError::input_missing(what, path));
        }
    }
    let instrument_files = request
        .raw_instrument_files
        .iter()
        .chain(request.aux_instrument_files.iter());
    if let Some(path) = instrument_files.into_iter().find(|p| !p.is_file()) {
        return Err(ExportError::input_missing("instrument file", path));
    }
    Ok(())
}

/// Checks that `output` can be written, probing the nearest existing
/// ancestor when the folder does not exist yet.
pub fn check_output_writable(output: &Path) -> Result<()> {
    let unwritable = |reason: String| ExportError::OutputUnwritable {
        path: output.to_path_buf(),
        reason,
    };
    if output.exists() && !output.is_dir() {
        return Err(unwritable("exists and is not a directory".into()));
    }
    let probe_dir = output
        .ancestors()
        .map(|p| if p.as_os_str().is_empty() { Path::new(".") } else { p })
        .find(|p| p.is_dir())
        .ok_or_else(|| unwritable("no existing parent directory".into()))?;
    let probe = probe_dir.join(".champ-topo-write-probe");
    fs::write(&probe, b"").map_err(|e| unwritable(e.to_string()))?;
    fs::remove_file(&probe).map_err(|e| unwritable(e.to_string()))?;
    Ok(())
}

/// Removes everything inside `output`, keeping the folder itself.
pub fn clean_output_folder(output: &Path, log: &mut RunLog) {
    let Ok(entries) = fs::read_dir(output) else {
        return;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => debug!(path = %path.display(), "removed existing output"),
            Err(e) => log.warning(None, format!("could not remove {}: {e}", path.display())),
        }
    }
}

/// Runs `f`, downgrading any error to a run-log entry against `dataset`.
fn attempt<T>(log: &mut RunLog, dataset: &str, f: impl FnOnce(&mut RunLog) -> Result<T>) -> Option<T> {
    match f(log) {
        Ok(value) => Some(value),
        Err(err) => {
            log.record_error(dataset, &err);
            None
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub struct ExportOrchestrator<'a> {
    config: &'a ExportConfig,
    accessor: &'a dyn ResourceAccessor,
    store: &'a dyn OutputStore,
}

/// Mutable state of one run.
struct RunState {
    manifest: ProjectManifest,
    qa: QualityDatabase,
    instrument_tags: Vec<(String, String)>,
    log: RunLog,
}

impl<'a> ExportOrchestrator<'a> {
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

    fn dataset(&self, descriptor: &'static DatasetDescriptor) -> SurveyDataset<'a> {
        SurveyDataset::new(descriptor, self.accessor)
    }

    fn read_optional_table(&self, name: &str, log: &mut RunLog) -> Option<TableRows> {
        let descriptor = catalog::by_name(name)?;
        if !self.accessor.exists(descriptor) {
            return None;
        }
        attempt(log, descriptor.id, |_| {
            Ok(self.accessor.read_table(descriptor)?.without_derived())
        })
    }

    pub fn run(&self, request: &VisitRequest) -> Result<VisitReport> {
        validate_inputs(request)?;
        check_output_writable(&request.output_folder)?;

        let root = &request.output_folder;
        info!(
            visit = request.visit.visit_id.as_str(),
            site = request.visit.site.as_str(),
            output = %root.display(),
            "starting project export"
        );

        let mut log = RunLog::new(&self.config.tool_name);
        fs::create_dir_all(root).map_err(|e| ExportError::OutputUnwritable {
            path: root.clone(),
            reason: e.to_string(),
        })?;
        if self.config.clean_output {
            clean_output_folder(root, &mut log);
        }

        let assembler = ProjectAssembler::new(root, self.config);
        let survey_info = self.read_optional_table(SURVEY_INFO_TABLE, &mut log);
        let start = assembler.begin_project(&request.visit, survey_info.as_ref())?;
        let mut state = RunState {
            manifest: start.manifest,
            qa: start.qa,
            instrument_tags: start.instrument_tags,
            log,
        };

        self.export_qa_tables(&mut state);
        self.export_inputs(&assembler, request, &mut state);
        self.export_survey_data_unprojected(&assembler, &mut state);
        self.export_survey_data_projected(&assembler, &mut state);
        self.export_topography(&assembler, request, &mut state)?;

        let manifest_path = assembler.finalize(&state.manifest)?;

        if let Some(folder) = request.map_images_folder.as_deref() {
            self.export_map_images(&assembler, folder, &mut state.log);
        }

        if let Some(archive_log) = self.read_optional_table(LOG_TABLE, &mut state.log) {
            state.log.import_archive_rows(&archive_log);
        }
        state
            .log
            .complete(&self.config.tool_name, &self.config.tool_version);
        let log_path = root.join(LOG_FILE);
        state.log.save(&log_path)?;

        let package = if self.config.package_zip {
            let target = root.with_extension("zip");
            let packaged = attempt(&mut state.log, "package", |_| {
                zip_directory(root, &target).map(|_| target.clone())
            });
            // The zip already holds log.xml; a failure still has to reach the one on disk.
            if packaged.is_none() {
                state.log.save(&log_path)?;
            }
            packaged
        } else {
            None
        };

        let status = if state.log.has_problems() {
            VisitStatus::Warning
        } else {
            VisitStatus::Success
        };
        info!(
            visit = request.visit.visit_id.as_str(),
            status = status.as_str(),
            "project export finished"
        );
        Ok(VisitReport {
            status,
            manifest_path,
            manifest: state.manifest,
            log: state.log,
            package,
        })
    }

    fn export_qa_tables(&self, state: &mut RunState) {
        for descriptor in catalog::by_family(Some(Family::Qa)) {
            if !self.accessor.exists(descriptor) {
                continue;
            }
            let qa = &mut state.qa;
            attempt(&mut state.log, descriptor.id, |_| {
                let rows = self.accessor.read_table(descriptor)?.without_derived();
                let count = qa.append_table(descriptor.name, &rows)?;
                debug!(table = descriptor.name, rows = count, "QA rows appended");
                Ok(())
            });
        }
    }

    fn export_inputs(&self, assembler: &ProjectAssembler, request: &VisitRequest, state: &mut RunState) {
        let inputs_rel = Path::new(INPUTS_DIR);
        let inputs = assembler.root().join(INPUTS_DIR);
        let RunState {
            manifest,
            instrument_tags,
            log,
            ..
        } = state;

        for (i, raw) in request.raw_instrument_files.iter().enumerate() {
            let id = if i == 0 {
                "RawFile".to_string()
            } else {
                format!("RawFile{}", i + 1)
            };
            attempt(log, &id, |_| {
                copy_file_resource(raw, &inputs, None)?;
                let mut artifact = OutputArtifact::new(
                    &id,
                    "Instrument File",
                    inputs_rel.join(file_name_of(raw)),
                    "InstrumentFile",
                )
                .with_metadata("Type", "RawFile");
                for (name, value) in instrument_tags.iter() {
                    artifact = artifact.with_metadata(name, value);
                }
                manifest.add_input_dataset(artifact)
            });
        }

        for (i, aux) in request.aux_instrument_files.iter().enumerate() {
            let id = format!("AuxFile{}", i + 1);
            attempt(log, &id, |_| {
                copy_file_resource(aux, &inputs, None)?;
                manifest.add_input_dataset(OutputArtifact::new(
                    &id,
                    format!("Auxiliary Instrument File {}", i + 1),
                    inputs_rel.join(file_name_of(aux)),
                    "AuxInstrumentFile",
                ))
            });
        }

        if let Some(descriptor) = catalog::by_name(RAW_POINTS_NAME) {
            let dataset = self.dataset(descriptor);
            if dataset.exists() {
                attempt(log, descriptor.id, |_| {
                    let exported = dataset.export(&inputs, &ExportOptions::default(), self.store)?;
                    manifest.add_input_dataset(OutputArtifact::new(
                        descriptor.id,
                        descriptor.display_name,
                        inputs_rel.join(file_name_of(&exported.path)),
                        descriptor.manifest_type(),
                    ))
                });
            }
        }

        if let Some(dxf) = request.dxf_file.as_deref() {
            attempt(log, "BreaklineDXF", |_| {
                let is_dxf = dxf
                    .extension()
                    .is_some_and(|e| e.eq_ignore_ascii_case("dxf"));
                let artifact = if is_dxf {
                    copy_file_resource(dxf, &inputs, None)?;
                    OutputArtifact::new(
                        "BreaklineDXF",
                        "Breaklines",
                        inputs_rel.join(file_name_of(dxf)),
                        "DXF",
                    )
                    .with_metadata("FeatureClassName", "Polyline")
                } else {
                    copy_shapefile(dxf, &inputs)?;
                    OutputArtifact::new(
                        "BreaklineDXF",
                        "Breaklines",
                        inputs_rel.join(file_name_of(dxf)),
                        "Vector",
                    )
                    .with_metadata("FeatureClassType", "Shapefile")
                };
                manifest.add_input_dataset(artifact)
            });
        }

        if let Some(csv) = request.channel_units_csv.as_deref() {
            attempt(log, "channelunitcsv", |_| {
                copy_file_resource(csv, &inputs, None)?;
                manifest.add_input_dataset(OutputArtifact::new(
                    "channelunitcsv",
                    "Channel Units CSV",
                    inputs_rel.join(file_name_of(csv)),
                    "CSV",
                ))
            });
        }
    }

    /// Exports one survey dataset into `<rel_dir>` and returns its artifact.
    fn export_artifact(
        &self,
        assembler: &ProjectAssembler,
        descriptor: &'static DatasetDescriptor,
        rel_dir: &Path,
        options: &ExportOptions,
    ) -> Result<(OutputArtifact, crate::accessor::ExportedFile)> {
        let target = assembler.ensure_dir(rel_dir)?;
        let exported = self.dataset(descriptor).export(&target, options, self.store)?;
        let artifact = OutputArtifact::new(
            descriptor.id,
            descriptor.display_name,
            rel_dir.join(file_name_of(&exported.path)),
            descriptor.manifest_type(),
        );
        Ok((artifact, exported))
    }

    fn export_survey_data_unprojected(&self, assembler: &ProjectAssembler, state: &mut RunState) {
        if !self.accessor.has_unprojected() {
            debug!("archive has no unprojected survey data");
            return;
        }
        let rel = Path::new(UNPROJECTED_DIR);
        let mut realization = Realization::survey_data(
            SURVEY_DATA_UNPROJECTED_KEY,
            "Survey Data Unprojected",
            &self.config.tool_version,
            false,
        );

        for descriptor in catalog::survey_datasets(false).filter(|d| d.export_enabled) {
            if !self.accessor.exists(descriptor) {
                continue;
            }
            attempt(&mut state.log, descriptor.id, |_| {
                let (artifact, _) =
                    self.export_artifact(assembler, descriptor, rel, &ExportOptions::default())?;
                add_artifact(&mut realization, Slot::Datasets, artifact)
            });
        }

        if let Some(transformations) = catalog::by_name(TRANSFORMATIONS_TABLE) {
            if self.accessor.exists(transformations) {
                attempt(&mut state.log, transformations.id, |_| {
                    let target = assembler.ensure_dir(rel)?;
                    self.dataset(transformations)
                        .export(&target, &ExportOptions::default(), self.store)
                        .map(|_| ())
                });
            }
        }

        state
            .manifest
            .add_realization(realization, SURVEY_DATA_UNPROJECTED_KEY);
    }

    fn export_survey_data_projected(&self, assembler: &ProjectAssembler, state: &mut RunState) {
        let rel = Path::new(SURVEY_DATA_DIR);
        let mut realization = Realization::survey_data(
            SURVEY_DATA_PROJECTED_KEY,
            "Survey Data Projected",
            &self.config.tool_version,
            true,
        );
        realization.promoted = true;
        let mut breaklines_pending = None;

        for descriptor in catalog::survey_datasets(true).filter(|d| d.export_enabled) {
            if !self.accessor.exists(descriptor) {
                continue;
            }
            let exported = attempt(&mut state.log, descriptor.id, |_| {
                let (artifact, exported) =
                    self.export_artifact(assembler, descriptor, rel, &ExportOptions::force_z())?;
                Ok((artifact, exported.needs_z_repair))
            });
            let Some((artifact, needs_z)) = exported else {
                continue;
            };
            if needs_z && descriptor.name == BREAKLINES_NAME {
                breaklines_pending = Some(artifact);
                continue;
            }
            if needs_z {
                state
                    .log
                    .note(Some(descriptor.id), "source has no Z; written with placeholder Z");
            }
            attempt(&mut state.log, descriptor.id, |_| {
                add_artifact(&mut realization, Slot::Datasets, artifact)
            });
        }

        // Snap after the loop so every point layer has been exported.
        if let Some(mut artifact) = breaklines_pending {
            self.repair_breakline_z(assembler, &mut artifact, &mut state.log);
            let id = artifact.id.clone();
            attempt(&mut state.log, &id, |_| {
                add_artifact(&mut realization, Slot::Datasets, artifact)
            });
        }

        for descriptor in catalog::by_family(Some(Family::SurveyExtents)) {
            if !self.accessor.exists(descriptor) {
                if descriptor.required {
                    state
                        .log
                        .warning(Some(descriptor.id), format!("{} not found in archive", descriptor.name));
                }
                continue;
            }
            let extents_rel = rel.join(SURVEY_EXTENTS_DIR);
            attempt(&mut state.log, descriptor.id, |_| {
                let (artifact, _) = self.export_artifact(
                    assembler,
                    descriptor,
                    &extents_rel,
                    &ExportOptions::default(),
                )?;
                add_artifact(
                    &mut realization,
                    Slot::SurveyExtents,
                    artifact.with_attribute("active", "true"),
                )
            });
        }

        state
            .manifest
            .add_realization(realization, SURVEY_DATA_PROJECTED_KEY);
    }

    fn repair_breakline_z(&self, assembler: &ProjectAssembler, artifact: &mut OutputArtifact, log: &mut RunLog) {
        let folder = assembler.root().join(SURVEY_DATA_DIR);
        let line_path = assembler.root().join(&artifact.path);
        let point_paths: Vec<PathBuf> = [TOPO_POINTS_NAME, EDGE_OF_WATER_NAME, STREAM_FEATURES_NAME]
            .iter()
            .filter_map(|name| catalog::by_name(name))
            .map(|d| folder.join(d.output_file_name()))
            .filter(|p| p.is_file())
            .collect();

        let id = artifact.id.clone();
        let repaired = attempt(log, &id, |_| {
            if point_paths.is_empty() {
                return Err(ExportError::repair_skipped(
                    &id,
                    "no exported survey points to take Z values from",
                ));
            }
            self.store
                .snap_z(&line_path, &point_paths, self.config.zsnap_tolerance)
                .map_err(|e| ExportError::repair_skipped(&id, e))
        });

        if let Some(report) = repaired {
            if report.null_geometries > 0 {
                log.warning(
                    Some(id.as_str()),
                    format!("{} lines with null geometry skipped", report.null_geometries),
                );
            }
            artifact
                .metadata
                .insert("ExportNote".into(), "Enabled Z Values on Export".into());
            log.note(
                Some(id.as_str()),
                format!(
                    "Breaklines: Enabled Z Values on Export ({} vertices snapped)",
                    report.vertices_updated
                ),
            );
        }
    }

    fn export_topography(
        &self,
        assembler: &ProjectAssembler,
        request: &VisitRequest,
        state: &mut RunState,
    ) -> Result<()> {
        let base = topography_base();
        let topo_dir = assembler.ensure_dir(&base)?;

        // The primary TIN is required; a failed copy ends the visit.
        let tin_name = file_name_of(&request.topo_tin);
        copy_file_resource(&request.topo_tin, &topo_dir, None)?;
        let tin = OutputArtifact::new(&tin_name, "TopoTIN", base.join(&tin_name), "TIN")
            .with_attribute("active", "true");
        let mut realization = Realization::topography(
            TOPOGRAPHY_KEY,
            "Topography Realization",
            &self.config.tool_version,
            tin,
        );

        for stage in [Stage::Wetted, Stage::Bankfull] {
            assembler.ensure_dir(&base.join(STAGES_DIR).join(stage.folder()))?;
        }
        for descriptor in catalog::by_family(Some(Family::Stage)).filter(|d| d.export_enabled) {
            if !self.accessor.exists(descriptor) {
                continue;
            }
            let Some(info) = descriptor.stage else {
                continue;
            };
            let rel = base.join(STAGES_DIR).join(info.stage.folder());
            attempt(&mut state.log, descriptor.id, |log| {
                let (artifact, exported) =
                    self.export_artifact(assembler, descriptor, &rel, &ExportOptions::default())?;
                if let Some((field, value)) = stage_attribute(info.stage_type) {
                    let repaired = ensure_single_feature_attribute(
                        self.store,
                        &exported.path,
                        descriptor.id,
                        field,
                        value,
                    );
                    match repaired {
                        Ok(AttributeRepair::Synthesized { field, value }) => log.note(
                            Some(descriptor.id),
                            format!(
                                "Added {field} field to {} and set its one feature to '{value}'",
                                descriptor.output_file_name()
                            ),
                        ),
                        Ok(AttributeRepair::Present) => {}
                        Err(err) => log.record_error(descriptor.id, &err),
                    }
                }
                add_artifact(
                    &mut realization,
                    Slot::Stages,
                    artifact
                        .with_attribute("stage", info.stage.as_str())
                        .with_attribute("type", info.stage_type.as_str()),
                )
            });
        }

        for descriptor in catalog::by_family(Some(Family::Topography)).filter(|d| d.export_enabled) {
            if self.accessor.exists(descriptor) {
                attempt(&mut state.log, descriptor.id, |_| {
                    let (mut artifact, exported) =
                        self.export_artifact(assembler, descriptor, &base, &ExportOptions::default())?;
                    if descriptor.id == DEM_ID {
                        if let Some(extents) = exported.extents {
                            artifact.metadata.extend(extents.to_metadata());
                        }
                    }
                    add_artifact(&mut realization, Slot::Topography, artifact)
                });
            } else if descriptor.id == WATER_DEPTH_ID {
                attempt(&mut state.log, descriptor.id, |log| {
                    if let Some(artifact) = self.derive_water_depth(descriptor, &topo_dir, &base)? {
                        log.note(Some(descriptor.id), "Added WaterDepth raster on export");
                        add_artifact(&mut realization, Slot::Topography, artifact)?;
                    }
                    Ok(())
                });
            }
        }

        if let Some(ws_tin) = request.ws_tin.as_deref() {
            attempt(&mut state.log, WATER_SURFACE_TIN_ID, |_| {
                copy_file_resource(ws_tin, &topo_dir, None)?;
                let name = file_name_of(ws_tin);
                add_artifact(
                    &mut realization,
                    Slot::Topography,
                    OutputArtifact::new(
                        WATER_SURFACE_TIN_ID,
                        "Water Surface TIN",
                        base.join(name),
                        WATER_SURFACE_TIN_ID,
                    )
                    .with_attribute("active", "true"),
                )
            });
        }

        let assoc_rel = base.join(ASSOC_SURFACES_DIR);
        assembler.ensure_dir(&assoc_rel)?;
        for descriptor in catalog::by_family(Some(Family::Surfaces)).filter(|d| d.export_enabled) {
            if !self.accessor.exists(descriptor) {
                continue;
            }
            attempt(&mut state.log, descriptor.id, |_| {
                let (artifact, _) =
                    self.export_artifact(assembler, descriptor, &assoc_rel, &ExportOptions::default())?;
                add_artifact(&mut realization, Slot::AssocSurfaces, artifact)
            });
        }

        state.manifest.add_realization(realization, TOPOGRAPHY_KEY);
        Ok(())
    }

    /// `None` when either elevation surface is missing; there is nothing
    /// to derive from and the omission is not an error.
    fn derive_water_depth(
        &self,
        descriptor: &'static DatasetDescriptor,
        topo_dir: &Path,
        base: &Path,
    ) -> Result<Option<OutputArtifact>> {
        let (Some(dem), Some(wse)) = (catalog::by_id(DEM_ID), catalog::by_id(WSEDEM_ID)) else {
            return Ok(None);
        };
        if !self.accessor.exists(dem) || !self.accessor.exists(wse) {
            debug!("water depth not derived: DEM or water surface DEM missing");
            return Ok(None);
        }
        let dem_grid = self
            .accessor
            .read_raster(dem)
            .map_err(|e| ExportError::derivation(descriptor.id, e))?;
        let wse_grid = self
            .accessor
            .read_raster(wse)
            .map_err(|e| ExportError::derivation(descriptor.id, e))?;
        let depth = water_depth(&dem_grid, &wse_grid)?;

        let file = descriptor.output_file_name();
        self.store
            .write_raster(&depth, &topo_dir.join(&file))
            .map_err(|e| ExportError::derivation(descriptor.id, e))?;
        Ok(Some(OutputArtifact::new(
            descriptor.id,
            descriptor.display_name,
            base.join(file),
            descriptor.manifest_type(),
        )))
    }

    fn export_map_images(&self, assembler: &ProjectAssembler, folder: &Path, log: &mut RunLog) {
        if !folder.is_dir() {
            warn!(folder = %folder.display(), "map images folder not found");
            return;
        }
        let table = self.read_optional_table(MAP_IMAGES_TABLE, log);
        attempt(log, "MapImages", |log| {
            let images = assembler.copy_map_images(folder, table.as_ref())?;
            log.note(None, format!("Copied {} map images", images.len()));
            Ok(())
        });
        attempt(log, "Reports", |_| assembler.copy_reports(folder).map(|_| ()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_gdb_is_input_missing() {
        let temp = TempDir::new().unwrap();
        let request = VisitRequest {
            survey_gdb: temp.path().join("SurveyGDB.gdb"),
            topo_tin: temp.path().join("tin"),
            output_folder: temp.path().join("out"),
            ..VisitRequest::default()
        };
        let err = validate_inputs(&request).unwrap_err();
        assert!(matches!(err, ExportError::InputMissing { .. }));
        assert_eq!(VisitStatus::from_error(&err), VisitStatus::Error);
    }

    #[test]
    fn test_named_optional_input_must_exist() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("SurveyGDB.gdb")).unwrap();
        fs::create_dir(temp.path().join("tin")).unwrap();
        let request = VisitRequest {
            survey_gdb: temp.path().join("SurveyGDB.gdb"),
            topo_tin: temp.path().join("tin"),
            ws_tin: Some(temp.path().join("wsetin")),
            output_folder: temp.path().join("out"),
            ..VisitRequest::default()
        };
        assert!(validate_inputs(&request).is_err());
    }

    #[test]
    fn test_output_that_is_a_file_is_unwritable() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("out");
        fs::write(&file, b"x").unwrap();
        let err = check_output_writable(&file).unwrap_err();
        assert!(matches!(err, ExportError::OutputUnwritable { .. }));
        assert!(check_output_writable(&temp.path().join("new/nested")).is_ok());
        assert!(!temp.path().join("new").exists());
    }

    #[test]
    fn test_clean_output_keeps_root() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("old/sub")).unwrap();
        fs::write(temp.path().join("stale.xml"), b"x").unwrap();
        let mut log = RunLog::new("t");
        clean_output_folder(temp.path(), &mut log);
        assert!(temp.path().is_dir());
        assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
        assert!(!log.has_problems());
    }

    #[test]
    fn test_attempt_records_failure() {
        let mut log = RunLog::new("t");
        let result: Option<()> = attempt(&mut log, "QaQcTIN", |_| {
            Err(ExportError::conversion("QaQcTIN", "table is corrupt"))
        });
        assert!(result.is_none());
        assert_eq!(log.failures(), 1);
    }
}
