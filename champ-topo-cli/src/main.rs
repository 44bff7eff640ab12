use anyhow::{Context, Result};
use champ_topo::assembler::VisitInfo;
use champ_topo::batch::{self, StatusLog, VisitSource};
use champ_topo::legacy::FolderExport;
use champ_topo::{
    ExportConfig, ExportOrchestrator, GdalArchive, GdalOutputStore, VisitRequest, VisitStatus,
};
use clap::{Args, Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Level};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML run configuration
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Parallel visits in batch mode (default: CPU cores)
    #[arg(short, long, global = true)]
    threads: Option<usize>,

    /// Zip each finished project next to its folder
    #[arg(long, global = true)]
    package: bool,

    /// Keep whatever is already in the output folder
    #[arg(long, global = true)]
    keep_existing: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Export one visit as a Riverscapes project
    Project(ProjectArgs),
    /// Export every visit under a Year/Watershed/Site/VISIT_id/Topo tree
    Batch(BatchArgs),
    /// Export one geodatabase flat into a folder
    Folder(FolderArgs),
}

#[derive(Args, Debug)]
struct ProjectArgs {
    #[arg(long, value_name = "GDB")]
    survey_gdb: PathBuf,
    #[arg(long, value_name = "TIN")]
    topo_tin: PathBuf,
    /// Water surface TIN ("None" for absent)
    #[arg(long, value_name = "TIN")]
    ws_tin: Option<String>,
    /// Channel units CSV ("None" for absent)
    #[arg(long, value_name = "CSV")]
    channel_units: Option<String>,
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,
    #[arg(long)]
    visit_id: String,
    #[arg(long)]
    site: String,
    #[arg(long)]
    watershed: String,
    #[arg(long)]
    year: String,
    /// Comma-separated raw instrument files
    #[arg(long, value_name = "FILES")]
    raw_files: Option<String>,
    /// Comma-separated auxiliary instrument files
    #[arg(long, value_name = "FILES")]
    aux_files: Option<String>,
    /// Breakline DXF or shapefile ("None" for absent)
    #[arg(long, value_name = "FILE")]
    dxf: Option<String>,
    /// Map images folder ("None" for absent)
    #[arg(long, value_name = "DIR")]
    map_images: Option<String>,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Root of the visit tree
    #[arg(value_name = "INPUT")]
    input: PathBuf,
    /// Output root (default: inside each visit's Topo folder)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,
    /// CSV of visit ids to run
    #[arg(long, value_name = "CSV")]
    filter_csv: Option<PathBuf>,
    /// CSV status log, one row per visit
    #[arg(long, value_name = "CSV")]
    status_log: Option<PathBuf>,
    /// Sub-folder created in each visit for the export
    #[arg(long, value_name = "NAME")]
    folder_name: Option<String>,
    /// Export Riverscapes projects instead of flat folders
    #[arg(long)]
    project: bool,
}

#[derive(Args, Debug)]
struct FolderArgs {
    #[arg(long, value_name = "GDB")]
    survey_gdb: PathBuf,
    #[arg(short, long, value_name = "DIR")]
    output: PathBuf,
}

/// Treats "None" and empty strings as an absent path.
fn optional_path(value: Option<String>) -> Option<PathBuf> {
    value
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("none"))
        .map(PathBuf::from)
}

fn path_list(value: Option<String>) -> Vec<PathBuf> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty() && !p.eq_ignore_ascii_case("none"))
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}

fn load_config(cli: &Cli) -> Result<ExportConfig> {
    let mut config = match &cli.config {
        Some(path) => ExportConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ExportConfig::default(),
    };
    if cli.package {
        config.package_zip = true;
    }
    if cli.keep_existing {
        config.clean_output = false;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let start_time = std::time::Instant::now();

    if let Some(threads) = cli.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("Failed to build thread pool")?;
    }

    let config = load_config(&cli)?;
    match cli.command {
        Command::Project(args) => run_project_command(&config, args)?,
        Command::Batch(args) => run_batch_command(config, args)?,
        Command::Folder(args) => {
            let (status, message) = export_folder(&config, &args.survey_gdb, &args.output)?;
            info!(status = status.as_str(), "{message}");
        }
    }

    info!("Total processing time: {:?}", start_time.elapsed());
    Ok(())
}

fn export_project(
    config: &ExportConfig,
    request: &VisitRequest,
) -> champ_topo::Result<(VisitStatus, String)> {
    let archive = GdalArchive::open(&request.survey_gdb)?;
    let store = GdalOutputStore::new();
    let report = ExportOrchestrator::new(config, &archive, &store).run(request)?;
    info!(manifest = %report.manifest_path.display(), "{}", report.summary());
    Ok((report.status, report.summary()))
}

fn export_folder(
    config: &ExportConfig,
    survey_gdb: &Path,
    output: &Path,
) -> champ_topo::Result<(VisitStatus, String)> {
    let archive = GdalArchive::open(survey_gdb)?;
    let store = GdalOutputStore::new();
    let report = FolderExport::new(config, &archive, &store).run(survey_gdb, output)?;
    let status = if report.has_warnings() {
        VisitStatus::Warning
    } else {
        VisitStatus::Success
    };
    let message = format!(
        "{} outputs, {} messages",
        report.outputs.len(),
        report.messages.len()
    );
    Ok((status, message))
}

fn run_project_command(config: &ExportConfig, args: ProjectArgs) -> Result<()> {
    let request = VisitRequest {
        survey_gdb: args.survey_gdb,
        topo_tin: args.topo_tin,
        ws_tin: optional_path(args.ws_tin),
        channel_units_csv: optional_path(args.channel_units),
        output_folder: args.output,
        visit: VisitInfo {
            site: args.site,
            visit_id: args.visit_id,
            watershed: args.watershed,
            year: args.year,
        },
        raw_instrument_files: path_list(args.raw_files),
        aux_instrument_files: path_list(args.aux_files),
        dxf_file: optional_path(args.dxf),
        map_images_folder: optional_path(args.map_images),
    };
    let (status, message) = export_project(config, &request)?;
    info!(status = status.as_str(), "{message}");
    Ok(())
}

fn run_batch_command(mut config: ExportConfig, args: BatchArgs) -> Result<()> {
    if let Some(name) = args.folder_name {
        config.output_folder_name = name;
    }

    let mut visits = batch::discover_visits(&args.input)?;
    if let Some(filter_csv) = &args.filter_csv {
        let filter = batch::read_visit_filter(filter_csv)
            .with_context(|| format!("Failed to read filter {}", filter_csv.display()))?;
        visits = batch::apply_filter(visits, &filter);
    }
    info!(visits = visits.len(), project = args.project, "Start of batch export");

    let status_log = args
        .status_log
        .as_deref()
        .map(StatusLog::<File>::create)
        .transpose()?;
    let output_root = args.output.as_deref();

    let runner = |visit: &VisitSource| -> champ_topo::Result<(VisitStatus, String)> {
        let output = visit.output_dir(output_root, &config.output_folder_name);
        let inputs = batch::locate_inputs(&visit.topo_dir)?;
        if args.project {
            let request = batch::project_request(visit, &inputs, output)?;
            export_project(&config, &request)
        } else {
            let survey_gdb = batch::single_survey_gdb(visit, &inputs)?;
            export_folder(&config, &survey_gdb, &output)
        }
    };
    let records = batch::run_batch(&visits, status_log.as_ref(), runner);

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in &records {
        *counts.entry(record.status.as_str()).or_default() += 1;
        match record.status {
            VisitStatus::Success => {}
            VisitStatus::Warning => warn!(visit = record.visit_id.as_str(), "{}", record.message),
            VisitStatus::Error | VisitStatus::Exception => {
                error!(visit = record.visit_id.as_str(), "{}", record.message)
            }
        }
    }
    info!(?counts, "Batch complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_strings_are_absent() {
        assert_eq!(optional_path(Some("None".into())), None);
        assert_eq!(optional_path(Some(String::new())), None);
        assert_eq!(
            optional_path(Some("wsetin".into())),
            Some(PathBuf::from("wsetin"))
        );
    }

    #[test]
    fn test_path_list_splits_commas() {
        let files = path_list(Some("a.raw, b.raw,None".into()));
        assert_eq!(files, vec![PathBuf::from("a.raw"), PathBuf::from("b.raw")]);
        assert!(path_list(None).is_empty());
    }

    #[test]
    fn test_cli_parses_project() {
        let cli = Cli::try_parse_from([
            "champ-topo",
            "--verbose",
            "project",
            "--survey-gdb",
            "SurveyGDB.gdb",
            "--topo-tin",
            "tin",
            "--ws-tin",
            "None",
            "-o",
            "out",
            "--visit-id",
            "1234",
            "--site",
            "CBW05583-028079",
            "--watershed",
            "Entiat",
            "--year",
            "2014",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Project(args) = cli.command else {
            panic!("expected project subcommand");
        };
        assert_eq!(optional_path(args.ws_tin), None);
        assert_eq!(args.visit_id, "1234");
    }
}
