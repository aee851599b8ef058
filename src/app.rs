use std::collections::HashSet;
use std::fs;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::assay::AssayKind;
use crate::domain::ExperimentAccession;
use crate::download::{
    DownloadOptions, DownloadOutcome, DownloadTask, Downloader, RangeSource, TransferProgress,
};
use crate::encode::{EncodeClient, SearchQuery};
use crate::error::FetchError;
use crate::flatten::FileFilter;
use crate::manifest::{
    FileLayout, MANIFEST_FILE, METADATA_FILE, ManifestRow, SUMMARY_FILE, apply_local_paths,
    write_json, write_manifest, write_metadata,
};
use crate::resolve::{FetchFailure, ResolveOptions, Resolver};
use crate::sheet::SheetFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Phase,
    /// Number of units the following `Advance` events count towards.
    Total(usize),
    Advance,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub kind: EventKind,
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            elapsed: None,
        }
    }

    pub fn phase(message: impl Into<String>) -> Self {
        Self::new(EventKind::Phase, message)
    }
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// How case experiments are chosen.
#[derive(Debug, Clone)]
pub enum Selection {
    Accessions(Vec<ExperimentAccession>),
    Search(SearchQuery),
}

impl Selection {
    fn mode(&self) -> &'static str {
        match self {
            Selection::Accessions(_) => "accessions",
            Selection::Search(_) => "search",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub selection: Selection,
    pub assay: AssayKind,
    pub filter: FileFilter,
    pub outdir: Utf8PathBuf,
    pub base_url: String,
    pub threads: usize,
    pub download: bool,
    pub dry_run: bool,
    pub download_threads: usize,
    pub download_options: DownloadOptions,
    pub sheets: Vec<SheetFormat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDownload {
    pub label: String,
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    /// Tasks that would run; set in dry-run mode too.
    pub planned: usize,
    pub completed: usize,
    /// Destinations that already existed.
    pub skipped: usize,
    pub failed: Vec<FailedDownload>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub tool: String,
    pub started_at: String,
    pub finished_at: String,
    pub mode: String,
    pub assay: String,
    pub matched: bool,
    pub dry_run: bool,
    pub cases: usize,
    pub records: usize,
    pub rows: usize,
    pub case_failures: Vec<FetchFailure>,
    pub control_failures: Vec<FetchFailure>,
    pub downloads: DownloadSummary,
    pub outputs: Vec<String>,
}

pub struct App<C: EncodeClient, S: RangeSource> {
    client: C,
    source: S,
}

impl<C: EncodeClient, S: RangeSource> App<C, S> {
    pub fn new(client: C, source: S) -> Self {
        Self { client, source }
    }

    pub fn run(
        &self,
        request: &RunRequest,
        sink: &dyn ProgressSink,
        transfer: &dyn TransferProgress,
    ) -> Result<RunSummary, FetchError> {
        let started_at = iso_timestamp();
        let start = Instant::now();
        let mut summary = RunSummary {
            tool: format!("encode-fetch/{}", env!("CARGO_PKG_VERSION")),
            started_at,
            finished_at: String::new(),
            mode: request.selection.mode().to_string(),
            assay: request.assay.name().to_string(),
            matched: false,
            dry_run: request.dry_run,
            cases: 0,
            records: 0,
            rows: 0,
            case_failures: Vec::new(),
            control_failures: Vec::new(),
            downloads: DownloadSummary::default(),
            outputs: Vec::new(),
        };

        let accessions = self.select(&request.selection, sink)?;

        sink.event(ProgressEvent::phase("phase=Resolve; fetching experiments"));
        let resolver = Resolver::new(
            &self.client,
            ResolveOptions {
                filter: request.filter.clone(),
                concurrency: request.threads,
                base_url: request.base_url.clone(),
            },
        );
        let resolution = resolver.resolve(&accessions, sink);
        summary.cases = resolution.cases;
        summary.records = resolution.records.len();
        summary.case_failures = resolution.case_failures.clone();
        summary.control_failures = resolution.control_failures.clone();

        if resolution.is_empty() {
            tracing::info!("no files matched the filters");
            sink.event(ProgressEvent::new(
                EventKind::Warning,
                "no files matched your filters",
            ));
            summary.finished_at = iso_timestamp();
            return Ok(summary);
        }
        summary.matched = true;

        let rows: Vec<ManifestRow> = resolution
            .records
            .iter()
            .cloned()
            .map(ManifestRow::new)
            .collect();
        let mut rows = request.assay.normalize(rows);
        summary.rows = rows.len();

        fs::create_dir_all(request.outdir.as_std_path())
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        let manifest_path = request.outdir.join(MANIFEST_FILE);
        let metadata_path = request.outdir.join(METADATA_FILE);

        sink.event(ProgressEvent::phase("phase=Store; writing manifest"));
        write_manifest(&manifest_path, &rows)?;
        write_metadata(&metadata_path, &resolution.discovered)?;
        summary.outputs.push(manifest_path.to_string());
        summary.outputs.push(metadata_path.to_string());

        if request.download {
            let layout = FileLayout::new(&request.outdir);
            let (tasks, skipped) = plan_downloads(&rows, &layout);
            summary.downloads.planned = tasks.len();
            summary.downloads.skipped = skipped;

            if request.dry_run {
                sink.event(ProgressEvent::phase(format!(
                    "phase=Download; dry run, {} file(s) would be fetched",
                    tasks.len()
                )));
            } else {
                if !tasks.is_empty() {
                    sink.event(ProgressEvent::phase(format!(
                        "phase=Download; fetching {} file(s)",
                        tasks.len()
                    )));
                    let downloader =
                        Downloader::new(&self.source, request.download_options.clone());
                    let results =
                        downloader.download_all(tasks, request.download_threads, transfer);
                    for (task, outcome) in results {
                        match outcome {
                            DownloadOutcome::Completed { .. } => {
                                summary.downloads.completed += 1;
                            }
                            DownloadOutcome::Failed { error, .. } => {
                                sink.event(ProgressEvent::new(
                                    EventKind::Warning,
                                    format!("download failed: {} ({error})", task.label),
                                ));
                                summary.downloads.failed.push(FailedDownload {
                                    label: task.label,
                                    url: task.url,
                                    error,
                                });
                            }
                        }
                    }
                } else {
                    sink.event(ProgressEvent::phase(
                        "phase=Download; all files already present",
                    ));
                }

                apply_local_paths(&mut rows, &layout);
                write_manifest(&manifest_path, &rows)?;
            }
        }

        for sheet in &request.sheets {
            let path = request.outdir.join(sheet.file_name());
            sheet.write(&rows, &path)?;
            summary.outputs.push(path.to_string());
        }

        let summary_path = request.outdir.join(SUMMARY_FILE);
        summary.outputs.push(summary_path.to_string());
        summary.finished_at = iso_timestamp();
        write_json(&summary_path, &summary)?;

        tracing::info!(
            rows = summary.rows,
            downloads = summary.downloads.completed,
            failed = summary.downloads.failed.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(summary)
    }

    fn select(
        &self,
        selection: &Selection,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<ExperimentAccession>, FetchError> {
        match selection {
            Selection::Accessions(accessions) => Ok(accessions.clone()),
            Selection::Search(query) => {
                sink.event(ProgressEvent::phase("phase=Search; querying ENCODE"));
                let hits = self.client.search(query)?;
                let mut accessions = Vec::with_capacity(hits.len());
                for hit in &hits {
                    let Some(value) = hit.get("accession").and_then(|value| value.as_str()) else {
                        continue;
                    };
                    match value.parse::<ExperimentAccession>() {
                        Ok(accession) => accessions.push(accession),
                        Err(err) => tracing::warn!(error = %err, "skipping search hit"),
                    }
                }
                tracing::info!(hits = hits.len(), experiments = accessions.len(), "search finished");
                Ok(accessions)
            }
        }
    }
}

/// Tasks for every primary file and accepted mate that is not on disk yet.
/// Returns the tasks and the number of destinations already present.
pub fn plan_downloads(rows: &[ManifestRow], layout: &FileLayout) -> (Vec<DownloadTask>, usize) {
    let mut seen = HashSet::new();
    let mut tasks = Vec::new();
    let mut skipped = 0usize;

    for row in rows {
        let record = &row.record;
        let mut wanted = vec![(
            layout.primary(row),
            record.url.clone(),
            record.file_size.clone(),
            record.file_accession.clone(),
        )];
        if let Some(mate) = layout.mate(row) {
            wanted.push((
                mate,
                row.pairing.url_r2.clone(),
                row.pairing.file_size_r2.clone(),
                row.pairing.file_accession_r2.clone(),
            ));
        }

        for (destination, url, size, accession) in wanted {
            if !seen.insert(destination.clone()) {
                continue;
            }
            if destination.as_std_path().exists() {
                skipped += 1;
                continue;
            }
            if url.trim().is_empty() {
                tracing::warn!(file = %accession, "no download URL");
                continue;
            }
            tasks.push(DownloadTask {
                url,
                destination,
                expected_size: size.trim().parse().ok(),
                label: format!("{accession} ({})", record.experiment_accession),
            });
        }
    }
    (tasks, skipped)
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
