//! Batch discovery over the standard visit tree
//! `{root}/{year}/{watershed}/{site}/VISIT_{id}/Topo/` and a parallel
//! driver that records one status row per visit.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::assembler::VisitInfo;
use crate::error::{ExportError, Result};
use crate::orchestrator::{VisitRequest, VisitStatus};

pub const VISIT_PREFIX: &str = "VISIT_";
pub const TOPO_DIR: &str = "Topo";
pub const CHANNEL_UNITS_CSV: &str = "ChannelUnits.csv";
pub const MAP_IMAGES_FOLDER: &str = "MapImages";

/// One visit found in the input tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitSource {
    pub year: String,
    pub watershed: String,
    pub site: String,
    pub visit_id: String,
    /// The visit's `Topo` folder.
    pub topo_dir: PathBuf,
}

impl VisitSource {
    pub fn visit_info(&self) -> VisitInfo {
        VisitInfo {
            site: self.site.clone(),
            visit_id: self.visit_id.clone(),
            watershed: self.watershed.clone(),
            year: self.year.clone(),
        }
    }

    /// `{output_root}/{year}/{watershed}/{site}/VISIT_{id}/Topo/{folder}`, or
    /// `{topo_dir}/{folder}` when no separate output root is given.
    pub fn output_dir(&self, output_root: Option<&Path>, folder: &str) -> PathBuf {
        match output_root {
            Some(root) => root
                .join(&self.year)
                .join(&self.watershed)
                .join(&self.site)
                .join(format!("{VISIT_PREFIX}{}", self.visit_id))
                .join(TOPO_DIR)
                .join(folder),
            None => self.topo_dir.join(folder),
        }
    }
}

fn sorted_dirs(path: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(path)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Walks the visit tree. Plain files at any level are ignored, as are
/// visit folders without a `Topo` sub-folder.
pub fn discover_visits(root: &Path) -> Result<Vec<VisitSource>> {
    if !root.is_dir() {
        return Err(ExportError::input_missing("batch input folder", root));
    }
    let mut visits = Vec::new();
    for year in sorted_dirs(root)? {
        for watershed in sorted_dirs(&year)? {
            for site in sorted_dirs(&watershed)? {
                for visit in sorted_dirs(&site)? {
                    let folder = name_of(&visit);
                    let visit_id = folder
                        .strip_prefix(VISIT_PREFIX)
                        .unwrap_or(&folder)
                        .to_string();
                    let topo_dir = visit.join(TOPO_DIR);
                    if !topo_dir.is_dir() {
                        debug!(visit = visit_id.as_str(), "no Topo folder");
                        continue;
                    }
                    visits.push(VisitSource {
                        year: name_of(&year),
                        watershed: name_of(&watershed),
                        site: name_of(&site),
                        visit_id,
                        topo_dir,
                    });
                }
            }
        }
    }
    info!(root = %root.display(), visits = visits.len(), "visits discovered");
    Ok(visits)
}

/// Visit ids listed in a filter CSV. Every cell counts; there is no header.
pub fn read_visit_filter(path: &Path) -> Result<HashSet<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut ids = HashSet::new();
    for record in reader.records() {
        for cell in record?.iter() {
            let cell = cell.trim();
            if !cell.is_empty() {
                ids.insert(cell.to_string());
            }
        }
    }
    Ok(ids)
}

/// Keeps the visits whose id is in `filter`.
pub fn apply_filter(visits: Vec<VisitSource>, filter: &HashSet<String>) -> Vec<VisitSource> {
    visits
        .into_iter()
        .filter(|v| {
            let keep = filter.contains(&v.visit_id);
            if !keep {
                debug!(visit = v.visit_id.as_str(), "not run due to filter");
            }
            keep
        })
        .collect()
}

/// Inputs found in one `Topo` folder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocatedInputs {
    pub survey_gdbs: Vec<PathBuf>,
    pub tins: Vec<PathBuf>,
    pub ws_tins: Vec<PathBuf>,
    pub channel_units_csv: Option<PathBuf>,
    pub dxf_files: Vec<PathBuf>,
    pub raw_instrument_file: Option<PathBuf>,
    pub aux_instrument_file: Option<PathBuf>,
    pub map_images_folder: Option<PathBuf>,
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Scans a `Topo` folder for the files a project export needs.
///
/// A `.job` file makes the `.raw` file the raw instrument file and the job
/// the auxiliary one; with an `.mjf` file it is the other way round.
pub fn locate_inputs(topo_dir: &Path) -> Result<LocatedInputs> {
    let mut entries: Vec<PathBuf> = fs::read_dir(topo_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    let mut found = LocatedInputs::default();
    let mut jobs = Vec::new();
    let mut mjfs = Vec::new();
    let mut raws = Vec::new();
    for path in entries {
        let name = name_of(&path);
        let lower = name.to_ascii_lowercase();
        if has_extension(&path, "gdb") {
            found.survey_gdbs.push(path);
        } else if lower.starts_with("wsetin") {
            found.ws_tins.push(path);
        } else if lower.starts_with("tin") {
            found.tins.push(path);
        } else if name.eq_ignore_ascii_case(CHANNEL_UNITS_CSV) {
            found.channel_units_csv = Some(path);
        } else if has_extension(&path, "dxf") {
            found.dxf_files.push(path);
        } else if has_extension(&path, "job") {
            jobs.push(path);
        } else if has_extension(&path, "mjf") {
            mjfs.push(path);
        } else if has_extension(&path, "raw") {
            raws.push(path);
        } else if name.eq_ignore_ascii_case(MAP_IMAGES_FOLDER) && path.is_dir() {
            found.map_images_folder = Some(path);
        }
    }

    if let Some(job) = jobs.into_iter().next() {
        found.raw_instrument_file = raws.into_iter().next();
        found.aux_instrument_file = Some(job);
    } else if let Some(mjf) = mjfs.into_iter().next() {
        found.raw_instrument_file = Some(mjf);
        found.aux_instrument_file = raws.into_iter().next();
    }
    Ok(found)
}

fn exactly_one(found: &[PathBuf], what: &str, topo_dir: &Path) -> Result<PathBuf> {
    match found {
        [one] => Ok(one.clone()),
        [] => Err(ExportError::input_missing(what, topo_dir)),
        many => Err(ExportError::input_missing(
            format!("a single {what} ({} found)", many.len()),
            topo_dir,
        )),
    }
}

/// The one geodatabase of a visit, for the flat-folder export.
pub fn single_survey_gdb(visit: &VisitSource, inputs: &LocatedInputs) -> Result<PathBuf> {
    exactly_one(&inputs.survey_gdbs, "survey geodatabase", &visit.topo_dir)
}

fn single(found: &[PathBuf]) -> Option<PathBuf> {
    match found {
        [one] => Some(one.clone()),
        _ => None,
    }
}

/// Builds the project request for a visit. A project needs exactly one
/// geodatabase and one TIN; the water surface TIN and DXF are used when a
/// single candidate exists.
pub fn project_request(
    visit: &VisitSource,
    inputs: &LocatedInputs,
    output_folder: PathBuf,
) -> Result<VisitRequest> {
    let survey_gdb = exactly_one(&inputs.survey_gdbs, "survey geodatabase", &visit.topo_dir)?;
    let topo_tin = exactly_one(&inputs.tins, "topo TIN", &visit.topo_dir)?;
    Ok(VisitRequest {
        survey_gdb,
        topo_tin,
        ws_tin: single(&inputs.ws_tins),
        channel_units_csv: inputs.channel_units_csv.clone(),
        output_folder,
        visit: visit.visit_info(),
        raw_instrument_files: inputs.raw_instrument_file.iter().cloned().collect(),
        aux_instrument_files: inputs.aux_instrument_file.iter().cloned().collect(),
        dxf_file: single(&inputs.dxf_files),
        map_images_folder: inputs.map_images_folder.clone(),
    })
}

/// One row of the batch status log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    pub timestamp: String,
    pub year: String,
    pub watershed: String,
    pub site: String,
    #[serde(rename = "visitId")]
    pub visit_id: String,
    pub status: VisitStatus,
    pub message: String,
}

impl StatusRecord {
    pub fn new(visit: &VisitSource, status: VisitStatus, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            year: visit.year.clone(),
            watershed: visit.watershed.clone(),
            site: visit.site.clone(),
            visit_id: visit.visit_id.clone(),
            status,
            message: message.into(),
        }
    }
}

/// Append-only CSV status log shared by all visits of a batch.
pub struct StatusLog<W: io::Write> {
    writer: Mutex<csv::Writer<W>>,
}

impl StatusLog<File> {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self::from_writer(File::create(path)?))
    }
}

impl<W: io::Write> StatusLog<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            writer: Mutex::new(csv::Writer::from_writer(writer)),
        }
    }

    pub fn record(&self, record: &StatusRecord) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| ExportError::Io(io::Error::other("status log lock poisoned")))?;
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Result<W> {
        let writer = self
            .writer
            .into_inner()
            .map_err(|_| ExportError::Io(io::Error::other("status log lock poisoned")))?;
        writer
            .into_inner()
            .map_err(|e| ExportError::Io(io::Error::other(e.to_string())))
    }
}

/// Runs every visit in parallel. `runner` returns the visit's status and
/// message; an escaped error is mapped through [`VisitStatus::from_error`].
/// Records come back in input order.
pub fn run_batch<F, W>(
    visits: &[VisitSource],
    status_log: Option<&StatusLog<W>>,
    runner: F,
) -> Vec<StatusRecord>
where
    F: Fn(&VisitSource) -> Result<(VisitStatus, String)> + Sync,
    W: io::Write + Send,
{
    visits
        .par_iter()
        .map(|visit| {
            info!(
                visit = visit.visit_id.as_str(),
                site = visit.site.as_str(),
                "visit started"
            );
            let record = match runner(visit) {
                Ok((status, message)) => StatusRecord::new(visit, status, message),
                Err(err) => {
                    error!(visit = visit.visit_id.as_str(), "{err}");
                    StatusRecord::new(visit, VisitStatus::from_error(&err), err.to_string())
                }
            };
            if let Some(log) = status_log {
                if let Err(err) = log.record(&record) {
                    warn!(visit = visit.visit_id.as_str(), "cannot write status row: {err}");
                }
            }
            record
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn visit_tree(root: &Path) -> PathBuf {
        let topo = root
            .join("2014")
            .join("Entiat")
            .join("CBW05583-028079")
            .join("VISIT_1234")
            .join(TOPO_DIR);
        fs::create_dir_all(&topo).unwrap();
        topo
    }

    #[test]
    fn test_discover_skips_files_and_incomplete_visits() {
        let temp = TempDir::new().unwrap();
        visit_tree(temp.path());
        fs::write(temp.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir_all(temp.path().join("2014/Entiat/CBW05583-028079/VISIT_99")).unwrap();

        let visits = discover_visits(temp.path()).unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].visit_id, "1234");
        assert_eq!(visits[0].watershed, "Entiat");

        let out = visits[0].output_dir(Some(Path::new("/out")), "GISLayers");
        assert_eq!(
            out,
            Path::new("/out/2014/Entiat/CBW05583-028079/VISIT_1234/Topo/GISLayers")
        );
    }

    #[test]
    fn test_visit_filter() {
        let temp = TempDir::new().unwrap();
        let filter_csv = temp.path().join("filter.csv");
        fs::write(&filter_csv, "1234,5678\n91011\n").unwrap();
        let filter = read_visit_filter(&filter_csv).unwrap();
        assert_eq!(filter.len(), 3);

        visit_tree(temp.path());
        let visits = apply_filter(discover_visits(temp.path()).unwrap(), &filter);
        assert_eq!(visits.len(), 1);
        let none = apply_filter(visits, &HashSet::from(["1".to_string()]));
        assert!(none.is_empty());
    }

    #[test]
    fn test_locate_inputs_job_pairing() {
        let temp = TempDir::new().unwrap();
        let topo = visit_tree(temp.path());
        for dir in ["SurveyGDB.gdb", "tin", "wsetin", MAP_IMAGES_FOLDER] {
            fs::create_dir(topo.join(dir)).unwrap();
        }
        for file in ["ChannelUnits.csv", "survey.dxf", "visit.job", "visit.raw"] {
            fs::write(topo.join(file), b"x").unwrap();
        }

        let found = locate_inputs(&topo).unwrap();
        assert_eq!(found.tins, vec![topo.join("tin")]);
        assert_eq!(found.ws_tins, vec![topo.join("wsetin")]);
        assert_eq!(found.raw_instrument_file, Some(topo.join("visit.raw")));
        assert_eq!(found.aux_instrument_file, Some(topo.join("visit.job")));

        let visit = &discover_visits(temp.path()).unwrap()[0];
        let request = project_request(visit, &found, temp.path().join("out")).unwrap();
        assert_eq!(request.survey_gdb, topo.join("SurveyGDB.gdb"));
        assert_eq!(request.dxf_file, Some(topo.join("survey.dxf")));
        assert_eq!(request.visit.visit_id, "1234");
    }

    #[test]
    fn test_locate_inputs_mjf_pairing() {
        let temp = TempDir::new().unwrap();
        let topo = visit_tree(temp.path());
        fs::write(topo.join("visit.mjf"), b"x").unwrap();
        fs::write(topo.join("visit.raw"), b"x").unwrap();
        let found = locate_inputs(&topo).unwrap();
        assert_eq!(found.raw_instrument_file, Some(topo.join("visit.mjf")));
        assert_eq!(found.aux_instrument_file, Some(topo.join("visit.raw")));
    }

    #[test]
    fn test_project_request_needs_gdb_and_tin() {
        let temp = TempDir::new().unwrap();
        visit_tree(temp.path());
        let visit = &discover_visits(temp.path()).unwrap()[0];
        let err = project_request(visit, &LocatedInputs::default(), temp.path().join("out"))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_run_batch_records_statuses() {
        let temp = TempDir::new().unwrap();
        let visits: Vec<VisitSource> = ["1", "2", "3"]
            .iter()
            .map(|id| VisitSource {
                year: "2014".into(),
                watershed: "Entiat".into(),
                site: "site".into(),
                visit_id: id.to_string(),
                topo_dir: temp.path().to_path_buf(),
            })
            .collect();
        let log = StatusLog::from_writer(Vec::new());

        let records = run_batch(&visits, Some(&log), |visit| match visit.visit_id.as_str() {
            "1" => Ok((VisitStatus::Success, "done".to_string())),
            "2" => Err(ExportError::input_missing("survey geodatabase", "x.gdb")),
            _ => Err(ExportError::conversion("DEM", "bad raster")),
        });

        let statuses: Vec<VisitStatus> = records.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![VisitStatus::Success, VisitStatus::Error, VisitStatus::Exception]
        );

        let csv = String::from_utf8(log.into_inner().unwrap()).unwrap();
        assert!(csv.starts_with("timestamp,year,watershed,site,visitId,status,message"));
        assert_eq!(csv.lines().count(), 4);
    }
}
