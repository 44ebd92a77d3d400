use std::io::{self, Write};
use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::TimeDelta;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use sat_collocate::config::{CollocateConfig, ConfigLoader};
use sat_collocate::csw::{self, HttpCswConnection, SearchOptions};
use sat_collocate::dap::HttpDapClient;
use sat_collocate::domain::{CoverageBound, SelectionRelation};
use sat_collocate::download::Downloader;
use sat_collocate::engine::CollocationEngine;
use sat_collocate::error::CollocateError;
use sat_collocate::families::{DatasetFamily, model_urls_for_scene};
use sat_collocate::filter::{self, SearchFilter};

#[derive(Parser)]
#[command(name = "sat-collocate")]
#[command(about = "Find model datasets collocated in time with a satellite scene")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Print model dataset URLs matching a scene filename")]
    Scene(SceneArgs),
    #[command(about = "Search the catalogue for datasets near the reference time")]
    Search(SearchArgs),
    #[command(about = "Resolve the OPeNDAP URL of the nearest dataset")]
    Nearest(NearestArgs),
    #[command(about = "Download a dataset file over HTTP")]
    Download(DownloadArgs),
}

#[derive(Args)]
struct SceneArgs {
    filename: String,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    download: bool,
}

#[derive(Args)]
struct SearchArgs {
    seed: String,

    #[arg(long)]
    filename: bool,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    text: Option<String>,

    #[arg(long)]
    title: Option<String>,

    #[arg(long, default_value_t = filter::DEFAULT_WINDOW_HOURS)]
    dt: i64,

    #[arg(long, default_value_t = csw::DEFAULT_PAGE_SIZE)]
    page_size: usize,

    #[arg(long, default_value_t = csw::DEFAULT_MAX_RECORDS)]
    max_records: usize,
}

#[derive(Args)]
struct NearestArgs {
    seed: String,

    #[arg(long)]
    filename: bool,

    #[arg(long)]
    config: Option<String>,

    #[arg(long, value_enum)]
    family: Option<DatasetFamily>,

    #[arg(long)]
    subset: Option<String>,

    #[arg(long, value_enum, default_value_t = SelectionRelation::Any)]
    relation: SelectionRelation,

    #[arg(long)]
    use_end: bool,

    #[arg(long)]
    text: Option<String>,

    #[arg(long, default_value_t = filter::DEFAULT_WINDOW_HOURS)]
    dt: i64,

    #[arg(long, default_value_t = csw::DEFAULT_PAGE_SIZE)]
    page_size: usize,

    #[arg(long, default_value_t = csw::DEFAULT_MAX_RECORDS)]
    max_records: usize,
}

#[derive(Args)]
struct DownloadArgs {
    url: String,

    #[arg(long, default_value = ".")]
    output: Utf8PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CollocateError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CollocateError) -> u8 {
    match error {
        CollocateError::NoAvailableDatasets
        | CollocateError::NoDatasetsBefore { .. }
        | CollocateError::NoDatasetsAfter { .. } => 2,
        CollocateError::CswHttp(_)
        | CollocateError::CswStatus { .. }
        | CollocateError::CswResponse(_)
        | CollocateError::DapHttp(_)
        | CollocateError::CannotOpen { .. }
        | CollocateError::Unavailable { .. }
        | CollocateError::DownloadHttp(_)
        | CollocateError::DownloadStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scene(args) => run_scene(args),
        Commands::Search(args) => run_search(args),
        Commands::Nearest(args) => run_nearest(args),
        Commands::Download(args) => run_download(args),
    }
}

fn run_scene(args: SceneArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let urls = model_urls_for_scene(&args.filename, &config)?;

    if !args.download {
        return print_json(&urls).into_diagnostic();
    }

    let downloader = Downloader::new()?;
    let downloads = SceneDownloads {
        norkyst: downloader
            .fetch(&urls.norkyst, &output_dir(config.norkyst_output.as_deref()))?
            .into_string(),
        met_nordic: downloader
            .fetch(
                &urls.met_nordic,
                &output_dir(config.met_nordic_output.as_deref()),
            )?
            .into_string(),
    };
    print_json(&downloads).into_diagnostic()
}

fn run_search(args: SearchArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let engine = build_engine(&args.seed, args.filename, &config)?;
    let options = SearchOptions {
        page_size: args.page_size,
        max_records: args.max_records,
    };

    let mut extra = Vec::new();
    if let Some(text) = args.text.as_deref() {
        extra.push(SearchFilter::free_text(text));
    }
    if let Some(title) = args.title.as_deref() {
        extra.push(SearchFilter::title(title));
    }

    let records = engine.collocate(&extra, TimeDelta::hours(args.dt), &options)?;
    let summaries: Vec<RecordSummary> = records
        .values()
        .map(|record| RecordSummary {
            identifier: record.identifier.clone(),
            title: record.title.clone(),
            opendap_url: record.opendap_url().map(str::to_string),
        })
        .collect();
    print_json(&summaries).into_diagnostic()
}

fn run_nearest(args: NearestArgs) -> miette::Result<()> {
    let config = ConfigLoader::resolve(args.config.as_deref())?;
    let engine = build_engine(&args.seed, args.filename, &config)?;
    let options = SearchOptions {
        page_size: args.page_size,
        max_records: args.max_records,
    };
    let dt = TimeDelta::hours(args.dt);
    let bound = if args.use_end {
        CoverageBound::End
    } else {
        CoverageBound::Start
    };

    let url = match args.family {
        Some(family) => engine.family_nearest_url(
            family,
            args.subset.as_deref(),
            dt,
            bound,
            args.relation,
            &options,
            &config,
        )?,
        None => {
            let mut extra = Vec::new();
            if let Some(text) = args.text.as_deref() {
                extra.push(SearchFilter::free_text(text));
            }
            engine.resolve_nearest(&extra, dt, bound, args.relation, &options)?
        }
    };
    print_json(&NearestResult { url }).into_diagnostic()
}

fn run_download(args: DownloadArgs) -> miette::Result<()> {
    let downloader = Downloader::new()?;
    let path = downloader.fetch(&args.url, &args.output)?;
    print_json(&DownloadResult {
        path: path.into_string(),
    })
    .into_diagnostic()
}

fn build_engine(
    seed: &str,
    from_filename: bool,
    config: &CollocateConfig,
) -> miette::Result<CollocationEngine<HttpCswConnection, HttpDapClient>> {
    let connection = HttpCswConnection::new(&config.endpoint)?;
    let dap = HttpDapClient::new()?;
    let engine = if from_filename {
        CollocationEngine::from_scene_filename(seed, connection, dap)?
    } else {
        CollocationEngine::from_dataset(seed, connection, dap)?
    };
    Ok(engine)
}

fn output_dir(configured: Option<&str>) -> Utf8PathBuf {
    Utf8PathBuf::from(configured.unwrap_or("."))
}

#[derive(Serialize)]
struct RecordSummary {
    identifier: String,
    title: String,
    opendap_url: Option<String>,
}

#[derive(Serialize)]
struct NearestResult {
    url: Option<String>,
}

#[derive(Serialize)]
struct SceneDownloads {
    norkyst: String,
    met_nordic: String,
}

#[derive(Serialize)]
struct DownloadResult {
    path: String,
}

fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
    let mut stdout = io::stdout();
    stdout.write_all(json.as_bytes())?;
    stdout.write_all(b"\n")?;
    Ok(())
}
