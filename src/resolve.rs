use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;

use crate::app::{EventKind, ProgressEvent, ProgressSink};
use crate::domain::ExperimentAccession;
use crate::encode::EncodeClient;
use crate::flatten::{FileFilter, FileRecord, Role, expand_possible_controls, flatten_experiment, sort_records};
use crate::pool::WorkerPool;

#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub filter: FileFilter,
    pub concurrency: usize,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchFailure {
    pub accession: String,
    /// Case that referenced this accession; `None` for a failed case fetch.
    pub case_accession: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Sorted record table.
    pub records: Vec<FileRecord>,
    /// Same records in discovery order. A control shared by several cases
    /// appears once, under its first `(experiment, file)` occurrence.
    pub discovered: Vec<FileRecord>,
    pub cases: usize,
    pub case_failures: Vec<FetchFailure>,
    pub control_failures: Vec<FetchFailure>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
struct CaseOutcome {
    accession: ExperimentAccession,
    records: Vec<FileRecord>,
    failure: Option<FetchFailure>,
    control_failures: Vec<FetchFailure>,
}

pub struct Resolver<C: EncodeClient> {
    client: C,
    options: ResolveOptions,
}

impl<C: EncodeClient> Resolver<C> {
    pub fn new(client: C, options: ResolveOptions) -> Self {
        Self { client, options }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn resolve(
        &self,
        accessions: &[ExperimentAccession],
        sink: &dyn ProgressSink,
    ) -> Resolution {
        let cases = dedup_accessions(accessions);
        let total = cases.len();
        sink.event(ProgressEvent::new(
            EventKind::Total(total),
            format!("resolving {total} experiment(s)"),
        ));

        let start = Instant::now();
        let pool = WorkerPool::new(self.options.concurrency);
        let outcomes = pool.run(
            cases,
            |accession| self.resolve_case(accession),
            |outcome| {
                let message = match &outcome.failure {
                    Some(failure) => format!("{} failed: {}", outcome.accession, failure.error),
                    None => format!("{} ({} file(s))", outcome.accession, outcome.records.len()),
                };
                sink.event(ProgressEvent {
                    kind: EventKind::Advance,
                    message,
                    elapsed: Some(start.elapsed()),
                });
                for failure in &outcome.control_failures {
                    sink.event(ProgressEvent::new(
                        EventKind::Warning,
                        format!("failed to fetch control {}: {}", failure.accession, failure.error),
                    ));
                }
            },
        );

        let mut resolution = Resolution {
            cases: total,
            ..Resolution::default()
        };
        let mut seen = HashSet::new();
        for outcome in outcomes {
            resolution.discovered.extend(outcome.records.into_iter().filter(|record| {
                seen.insert((
                    record.experiment_accession.clone(),
                    record.file_accession.clone(),
                ))
            }));
            resolution.case_failures.extend(outcome.failure);
            resolution.control_failures.extend(outcome.control_failures);
        }
        resolution.records = resolution.discovered.clone();
        sort_records(&mut resolution.records);
        tracing::info!(
            cases = total,
            records = resolution.records.len(),
            failed_cases = resolution.case_failures.len(),
            "resolution finished"
        );
        resolution
    }

    /// One case and, serially, each of its controls. Controls shared between
    /// cases are fetched again for every case that references them.
    fn resolve_case(&self, accession: ExperimentAccession) -> CaseOutcome {
        let filter = &self.options.filter;
        let base_url = &self.options.base_url;

        let experiment = match self.client.fetch_experiment(&accession, true) {
            Ok(experiment) => experiment,
            Err(err) => {
                tracing::warn!(accession = %accession, error = %err, "skipping case experiment");
                return CaseOutcome {
                    failure: Some(FetchFailure {
                        accession: accession.to_string(),
                        case_accession: None,
                        error: err.to_string(),
                    }),
                    accession,
                    records: Vec::new(),
                    control_failures: Vec::new(),
                };
            }
        };

        let controls = expand_possible_controls(&experiment);
        let mut records = flatten_experiment(&experiment, filter, &Role::case(&controls), base_url);
        let mut control_failures = Vec::new();

        for control in &controls {
            let fetched = control
                .parse::<ExperimentAccession>()
                .and_then(|control| self.client.fetch_experiment(&control, true));
            match fetched {
                Ok(control_experiment) => {
                    records.extend(flatten_experiment(
                        &control_experiment,
                        filter,
                        &Role::Control,
                        base_url,
                    ));
                }
                Err(err) => {
                    tracing::warn!(
                        case = %accession,
                        control = %control,
                        error = %err,
                        "failed to fetch control"
                    );
                    control_failures.push(FetchFailure {
                        accession: control.clone(),
                        case_accession: Some(accession.to_string()),
                        error: err.to_string(),
                    });
                }
            }
        }

        CaseOutcome {
            accession,
            records,
            failure: None,
            control_failures,
        }
    }
}

pub fn dedup_accessions(accessions: &[ExperimentAccession]) -> Vec<ExperimentAccession> {
    let mut seen = HashSet::new();
    accessions
        .iter()
        .filter(|accession| seen.insert((*accession).clone()))
        .cloned()
        .collect()
}
