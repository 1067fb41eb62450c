use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ncbi_shard_etl::app::{BatchOutcome, Etl, RunOptions, RunReport};
use ncbi_shard_etl::config::{ConfigLoader, ResolvedConfig};
use ncbi_shard_etl::dedup::GraphHttpClient;
use ncbi_shard_etl::domain::ExclusionPolicy;
use ncbi_shard_etl::error::EtlError;
use ncbi_shard_etl::output::{HumanOutput, JsonOutput, OutputMode};
use ncbi_shard_etl::scratch::{ScratchDir, default_scratch_parent};
use ncbi_shard_etl::source::{LocalObjectSource, ObjectSource, S3PublicClient};
use ncbi_shard_etl::submit::IndexdHttpClient;

#[derive(Parser)]
#[command(name = "ncbi-shard")]
#[command(about = "Split SRA annotation files into per-accession shards and index them in a data commons")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Ingest one or more file variants")]
    Run(RunArgs),
    #[command(about = "List known file variants")]
    Variants,
}

#[derive(Args)]
struct RunArgs {
    variants: Vec<String>,

    #[arg(long, conflicts_with = "variants")]
    all: bool,

    #[arg(long, env = "COMMONS_URL")]
    commons_url: Option<String>,

    #[arg(long, env = "ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    #[arg(long)]
    work_dir: Option<Utf8PathBuf>,

    #[arg(long, conflicts_with = "s3_endpoint")]
    source_dir: Option<Utf8PathBuf>,

    #[arg(long)]
    s3_endpoint: Option<String>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    queue_capacity: Option<usize>,

    #[arg(long)]
    exclusion: Option<ExclusionPolicy>,
}

enum Outcome {
    Done,
    FailedShards,
}

fn main() -> ExitCode {
    match run() {
        Ok(Outcome::Done) => ExitCode::SUCCESS,
        Ok(Outcome::FailedShards) => ExitCode::from(5),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<EtlError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &EtlError) -> u8 {
    match error {
        EtlError::UnknownVariant(_)
        | EtlError::MissingConfig(_)
        | EtlError::ConfigRead(_)
        | EtlError::ConfigParse(_)
        | EtlError::InvalidNodeName(_) => 2,
        EtlError::QueryHttp(_)
        | EtlError::Query { .. }
        | EtlError::QueryShape { .. }
        | EtlError::Upload(_)
        | EtlError::UploadStatus { .. }
        | EtlError::ObjectHttp(_)
        | EtlError::ObjectStatus { .. }
        | EtlError::ObjectRead(_) => 3,
        EtlError::Format(_) | EtlError::InvalidAccession(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<Outcome> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Variants => {
            let variants = config.catalog.iter().collect::<Vec<_>>();
            match output_mode {
                OutputMode::Json => JsonOutput::print_variants(&variants),
                OutputMode::Human => HumanOutput::print_variants(&variants),
            }
            .into_diagnostic()?;
            Ok(Outcome::Done)
        }
        Commands::Run(args) => run_variants(args, config, output_mode),
    }
}

fn run_variants(
    args: RunArgs,
    config: ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<Outcome> {
    let names = if args.all {
        config.catalog.names()
    } else if !args.variants.is_empty() {
        args.variants.clone()
    } else {
        config.selected.clone()
    };
    if names.is_empty() {
        return Err(miette::Report::msg(
            "no variants selected (name them, pass --all, or list them in ncbi-shard.json)",
        ));
    }
    for name in &names {
        config.catalog.get(name)?;
    }

    let commons_url = args
        .commons_url
        .clone()
        .or_else(|| config.commons_url.clone())
        .ok_or_else(|| miette::Report::msg("--commons-url or COMMONS_URL is required"))?;
    let token = args.access_token.as_deref();

    let mut options = RunOptions::from(&config);
    if let Some(workers) = args.workers {
        options.workers = workers.max(1);
    }
    if let Some(capacity) = args.queue_capacity {
        options.queue_capacity = capacity.max(1);
    }
    if let Some(exclusion) = args.exclusion {
        options.exclusion = exclusion;
    }

    let metadata = GraphHttpClient::new(&commons_url, token)?;
    let files = IndexdHttpClient::new(&commons_url, token)?;

    let outcome = if let Some(dir) = &args.source_dir {
        let etl = Etl::new(metadata, LocalObjectSource::new(dir.as_std_path()), files, options);
        run_all(&etl, &config, &names, args.work_dir.as_ref())
    } else {
        let mut objects = S3PublicClient::new()?;
        if let Some(endpoint) = args.s3_endpoint.as_deref().or(config.s3_endpoint.as_deref()) {
            objects = objects.with_endpoint(endpoint);
        }
        let etl = Etl::new(metadata, objects, files, options);
        run_all(&etl, &config, &names, args.work_dir.as_ref())
    };
    let BatchOutcome { reports, error } = outcome;

    if error.is_none() || !reports.is_empty() {
        match output_mode {
            OutputMode::Json => JsonOutput::print_reports(&reports),
            OutputMode::Human => HumanOutput::print_reports(&reports),
        }
        .into_diagnostic()?;
    }
    if let Some(err) = error {
        return Err(err.into());
    }

    if reports.iter().all(RunReport::is_success) {
        Ok(Outcome::Done)
    } else {
        Ok(Outcome::FailedShards)
    }
}

fn run_all<O: ObjectSource>(
    etl: &Etl<GraphHttpClient, O, IndexdHttpClient>,
    config: &ResolvedConfig,
    names: &[String],
    work_dir: Option<&Utf8PathBuf>,
) -> BatchOutcome {
    etl.upload_and_index_all(&config.catalog, names, |_| match work_dir {
        Some(dir) => ScratchDir::persistent(dir.clone()),
        None => ScratchDir::temporary(&default_scratch_parent()?),
    })
}
