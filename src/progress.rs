//! Terminal progress rendering with `indicatif`.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Mutex;

use camino::Utf8PathBuf;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing_subscriber::fmt::MakeWriter;

use crate::app::{EventKind, ProgressEvent, ProgressSink};
use crate::download::{DownloadTask, TransferProgress, TransferState};

const EXPERIMENT_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} experiments {msg}";
const FILE_TEMPLATE: &str =
    "{spinner:.green} {prefix} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ({eta}) {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {prefix} {bytes} {bytes_per_sec} {msg}";

/// Experiments bar for resolution plus one byte bar per file being downloaded.
pub struct TerminalProgress {
    multi: MultiProgress,
    experiments: Mutex<Option<ProgressBar>>,
    files: Mutex<HashMap<Utf8PathBuf, ProgressBar>>,
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            experiments: Mutex::new(None),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Log sink that hides the bars while each line is written.
    pub fn log_writer(&self) -> SuspendingWriter {
        SuspendingWriter {
            multi: self.multi.clone(),
        }
    }

    fn println(&self, line: &str) {
        let _ = self.multi.println(line);
    }

    fn with_file<F: FnOnce(&ProgressBar)>(&self, task: &DownloadTask, f: F) {
        if let Ok(files) = self.files.lock() {
            if let Some(bar) = files.get(&task.destination) {
                f(bar);
            }
        }
    }

    fn remove_file(&self, task: &DownloadTask) -> Option<ProgressBar> {
        self.files
            .lock()
            .ok()
            .and_then(|mut files| files.remove(&task.destination))
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Stderr writer for `tracing` output that keeps bars intact.
#[derive(Clone)]
pub struct SuspendingWriter {
    multi: MultiProgress,
}

impl Write for SuspendingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.multi.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.multi.suspend(|| io::stderr().flush())
    }
}

impl<'a> MakeWriter<'a> for SuspendingWriter {
    type Writer = SuspendingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

impl ProgressSink for TerminalProgress {
    fn event(&self, event: ProgressEvent) {
        match event.kind {
            EventKind::Total(total) => {
                let bar = self.multi.add(ProgressBar::new(total as u64));
                bar.set_style(style(EXPERIMENT_TEMPLATE));
                if let Ok(mut slot) = self.experiments.lock() {
                    if let Some(previous) = slot.replace(bar) {
                        previous.finish_and_clear();
                    }
                }
            }
            EventKind::Advance => {
                if let Ok(slot) = self.experiments.lock() {
                    if let Some(bar) = slot.as_ref() {
                        bar.inc(1);
                        bar.set_message(event.message);
                        if bar.length() == Some(bar.position()) {
                            bar.finish();
                        }
                    }
                }
            }
            EventKind::Phase => self.println(&event.message),
            EventKind::Warning => self.println(&format!("warning: {}", event.message)),
        }
    }
}

impl TransferProgress for TerminalProgress {
    fn started(&self, task: &DownloadTask) {
        let bar = match task.expected_size {
            Some(size) => {
                let bar = ProgressBar::new(size);
                bar.set_style(style(FILE_TEMPLATE));
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(style(SPINNER_TEMPLATE));
                bar
            }
        };
        let bar = self.multi.add(bar);
        bar.set_prefix(task.label.clone());
        if let Ok(mut files) = self.files.lock() {
            files.insert(task.destination.clone(), bar);
        }
    }

    fn state(&self, task: &DownloadTask, state: TransferState) {
        match state {
            TransferState::Pending => self.with_file(task, |bar| bar.set_message("queued")),
            TransferState::Starting => self.with_file(task, |bar| bar.set_message("")),
            TransferState::Resuming { offset } => self.with_file(task, |bar| {
                bar.set_position(offset);
                bar.set_message("resuming");
            }),
            TransferState::Streaming => {}
            TransferState::Retrying { attempt } => self.with_file(task, |bar| {
                bar.set_message(format!("retrying after attempt {attempt}"));
            }),
            TransferState::Completed => {
                if let Some(bar) = self.remove_file(task) {
                    bar.finish_with_message("done");
                }
            }
            TransferState::Failed => {
                if let Some(bar) = self.remove_file(task) {
                    bar.abandon_with_message("failed");
                }
            }
        }
    }

    fn transferred(&self, task: &DownloadTask, bytes: u64) {
        self.with_file(task, |bar| bar.set_position(bytes));
    }
}
