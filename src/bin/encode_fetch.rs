use std::io::IsTerminal;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use encode_fetch::app::{App, RunRequest, Selection};
use encode_fetch::assay::AssayKind;
use encode_fetch::config::{ConfigLoader, ResolvedConfig};
use encode_fetch::domain::{FileType, Perturbed, parse_accession_list};
use encode_fetch::download::{DownloadOptions, HttpRangeSource};
use encode_fetch::encode::{EncodeHttpClient, SearchQuery};
use encode_fetch::error::FetchError;
use encode_fetch::flatten::FileFilter;
use encode_fetch::output::{JsonOutput, OutputMode, render_summary};
use encode_fetch::progress::TerminalProgress;
use encode_fetch::sheet::SheetFormat;

#[derive(Parser)]
#[command(name = "encode-fetch")]
#[command(
    about = "Retrieve matched case/control experiments and standardized metadata from ENCODE"
)]
#[command(version, author)]
struct Cli {
    /// Comma-separated experiment accessions; skips the search.
    #[arg(long)]
    accessions: Option<String>,

    #[arg(long, default_value = "Histone ChIP-seq")]
    assay_title: String,

    /// Target label(s); repeat or comma-separate.
    #[arg(long)]
    target_label: Vec<String>,

    /// Organism scientific name.
    #[arg(long)]
    organism: Option<String>,

    /// File formats to include; all formats when omitted.
    #[arg(long = "file-type", value_enum, ignore_case = true)]
    file_type: Vec<FileType>,

    /// Use the assay's default file types when no --file-type is given.
    #[arg(long)]
    assay_defaults: bool,

    #[arg(long)]
    assembly: Option<String>,

    /// Experiment and file status filter.
    #[arg(long, default_value = "released")]
    status: String,

    #[arg(long, value_enum, ignore_case = true)]
    perturbed: Option<Perturbed>,

    #[arg(long)]
    outdir: Option<String>,

    #[arg(long)]
    download: bool,

    /// Workers for metadata resolution.
    #[arg(long)]
    threads: Option<usize>,

    #[arg(long)]
    download_threads: Option<usize>,

    /// Attempts per file during download.
    #[arg(long)]
    max_retries: Option<usize>,

    /// Download chunk size in bytes.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Only write manifest and metadata; skip downloads.
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    auth_token: Option<String>,

    #[arg(long)]
    no_progress: bool,

    /// Print the run summary as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Write the assay's nf-core sample sheet.
    #[arg(long)]
    nfcore: bool,

    /// Write the assay's Snakemake sample sheet.
    #[arg(long)]
    snakemake: bool,

    /// Extra sample sheets by id, e.g. nfcore_rnaseq.
    #[arg(long)]
    sheet: Vec<String>,

    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<FetchError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &FetchError) -> u8 {
    match error {
        FetchError::InvalidAccession(_)
        | FetchError::UnknownAssay(_)
        | FetchError::UnknownSheet(_)
        | FetchError::MissingConfig(_)
        | FetchError::ConfigRead(_)
        | FetchError::ConfigParse(_) => 2,
        error if error.is_remote() => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let output_mode = if cli.json || cli.no_progress || !std::io::stderr().is_terminal() {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let progress = (output_mode == OutputMode::Interactive).then(TerminalProgress::new);
    init_tracing(progress.as_ref());

    let config = apply_overrides(ConfigLoader::resolve(cli.config.as_deref())?, &cli)?;
    let request = build_request(&cli, &config)?;

    let client = EncodeHttpClient::new(&config)?;
    let source = HttpRangeSource::new(&config)?;
    let app = App::new(client, source);

    let summary = match &progress {
        Some(progress) => app.run(&request, progress, progress)?,
        None => app.run(&request, &JsonOutput, &JsonOutput)?,
    };

    if cli.json {
        JsonOutput::print_summary(&summary).into_diagnostic()?;
    } else {
        eprint!("{}", render_summary(&summary));
    }
    Ok(())
}

/// Log lines share stderr with the progress bars when they are drawn.
fn init_tracing(progress: Option<&TerminalProgress>) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false);
    match progress {
        Some(progress) => builder.with_writer(progress.log_writer()).init(),
        None => builder.with_writer(std::io::stderr).init(),
    }
}

fn apply_overrides(mut config: ResolvedConfig, cli: &Cli) -> Result<ResolvedConfig, FetchError> {
    if let Some(token) = cli.auth_token.as_deref().map(str::trim) {
        if !token.is_empty() {
            config.auth_token = Some(token.to_string());
        }
    }
    if let Some(outdir) = &cli.outdir {
        config.outdir = outdir.clone();
    }
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if let Some(threads) = cli.download_threads {
        config.download_threads = threads;
    }
    if let Some(retries) = cli.max_retries {
        config.max_retries = retries;
    }
    if let Some(chunk) = cli.chunk_size {
        config.chunk_size = chunk;
    }
    config.validate()?;
    Ok(config)
}

fn build_request(cli: &Cli, config: &ResolvedConfig) -> Result<RunRequest, FetchError> {
    let assay = AssayKind::for_title(Some(&cli.assay_title));

    let file_types = if !cli.file_type.is_empty() {
        cli.file_type.clone()
    } else if cli.assay_defaults {
        cli.assay_title.parse::<AssayKind>()?.default_file_types()
    } else {
        Vec::new()
    };
    let filter = FileFilter::new(
        file_types.iter().map(ToString::to_string),
        cli.assembly.clone(),
        Some(cli.status.clone()),
    );

    let selection = match &cli.accessions {
        Some(list) => Selection::Accessions(parse_accession_list(list)?),
        None => Selection::Search(SearchQuery {
            assay_title: Some(cli.assay_title.clone()),
            target_labels: cli.target_label.clone(),
            organism: cli.organism.clone(),
            status: Some(cli.status.clone()),
            perturbed: cli.perturbed.unwrap_or_default(),
            ..SearchQuery::default()
        }),
    };

    let mut sheets = Vec::new();
    if cli.nfcore {
        sheets.push(assay.nfcore_sheet());
    }
    if cli.snakemake {
        sheets.push(assay.snakemake_sheet());
    }
    for id in &cli.sheet {
        let sheet: SheetFormat = id.parse()?;
        if !sheets.contains(&sheet) {
            sheets.push(sheet);
        }
    }

    Ok(RunRequest {
        selection,
        assay,
        filter,
        outdir: Utf8PathBuf::from(config.outdir.as_str()),
        base_url: config.base_url.clone(),
        threads: config.threads,
        download: cli.download,
        dry_run: cli.dry_run,
        download_threads: config.download_threads,
        download_options: DownloadOptions::from(config),
        sheets,
    })
}
