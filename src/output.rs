use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunSummary};
use crate::download::{DownloadTask, TransferProgress, TransferState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

/// Silent sink for `--json` and `--no-progress` runs.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

impl TransferProgress for JsonOutput {
    fn started(&self, _task: &DownloadTask) {}
    fn state(&self, _task: &DownloadTask, _state: TransferState) {}
    fn transferred(&self, _task: &DownloadTask, _bytes: u64) {}
}

/// Plain-text run report for interactive use.
pub fn render_summary(summary: &RunSummary) -> String {
    if !summary.matched {
        return "No files matched your filters.\n".to_string();
    }
    let mut out = String::new();
    out.push_str(&format!(
        "{} case experiment(s), {} file record(s), {} manifest row(s)\n",
        summary.cases, summary.records, summary.rows
    ));
    for failure in &summary.case_failures {
        out.push_str(&format!("skipped case {}: {}\n", failure.accession, failure.error));
    }
    for failure in &summary.control_failures {
        out.push_str(&format!(
            "skipped control {} of {}: {}\n",
            failure.accession,
            failure.case_accession.as_deref().unwrap_or("-"),
            failure.error
        ));
    }
    let downloads = &summary.downloads;
    if summary.dry_run && downloads.planned > 0 {
        out.push_str(&format!("dry run: {} file(s) would be downloaded\n", downloads.planned));
    } else if downloads.planned > 0 || downloads.skipped > 0 {
        out.push_str(&format!(
            "downloads: {} completed, {} failed, {} already present\n",
            downloads.completed,
            downloads.failed.len(),
            downloads.skipped
        ));
        for failed in &downloads.failed {
            out.push_str(&format!("failed {}: {}\n", failed.label, failed.error));
        }
    }
    for path in &summary.outputs {
        out.push_str(&format!("wrote {path}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{DownloadSummary, FailedDownload};
    use crate::resolve::FetchFailure;

    fn summary() -> RunSummary {
        RunSummary {
            tool: "encode-fetch/0.1.0".to_string(),
            started_at: String::new(),
            finished_at: String::new(),
            mode: "accessions".to_string(),
            assay: "ChIP-seq".to_string(),
            matched: true,
            dry_run: false,
            cases: 2,
            records: 5,
            rows: 3,
            case_failures: Vec::new(),
            control_failures: vec![FetchFailure {
                accession: "ENCSR000CTL".to_string(),
                case_accession: Some("ENCSR000AAA".to_string()),
                error: "HTTP 404".to_string(),
            }],
            downloads: DownloadSummary::default(),
            outputs: vec!["out/manifest.tsv".to_string()],
        }
    }

    #[test]
    fn unmatched_run_reports_nothing_found() {
        let mut summary = summary();
        summary.matched = false;
        assert_eq!(render_summary(&summary), "No files matched your filters.\n");
    }

    #[test]
    fn report_lists_counts_failures_and_outputs() {
        let mut summary = summary();
        summary.downloads = DownloadSummary {
            planned: 2,
            completed: 1,
            skipped: 4,
            failed: vec![FailedDownload {
                label: "ENCFF000R1A (ENCSR000AAA)".to_string(),
                url: "https://x/ENCFF000R1A.fastq.gz".to_string(),
                error: "timed out".to_string(),
            }],
        };
        let text = render_summary(&summary);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "2 case experiment(s), 5 file record(s), 3 manifest row(s)",
                "skipped control ENCSR000CTL of ENCSR000AAA: HTTP 404",
                "downloads: 1 completed, 1 failed, 4 already present",
                "failed ENCFF000R1A (ENCSR000AAA): timed out",
                "wrote out/manifest.tsv",
            ]
        );
    }

    #[test]
    fn dry_run_reports_planned_downloads() {
        let mut summary = summary();
        summary.dry_run = true;
        summary.downloads.planned = 3;
        assert!(render_summary(&summary).contains("dry run: 3 file(s) would be downloaded\n"));
    }
}
