//! Resumable, retrying chunked downloads.
//!
//! Each task streams into `<destination>.part` and is renamed into place only
//! once the body is complete. Every attempt re-reads the length of the part
//! file and asks the remote for the remaining range, so a failed or
//! interrupted transfer continues where it stopped.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, RANGE, USER_AGENT};
use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::error::FetchError;
use crate::pool::WorkerPool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadTask {
    pub url: String,
    pub destination: Utf8PathBuf,
    pub expected_size: Option<u64>,
    pub label: String,
}

impl DownloadTask {
    pub fn part_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{}.part", self.destination))
    }
}

/// Response to a ranged GET: the status and the unread body.
pub struct RemoteBody {
    pub status: u16,
    pub body: Box<dyn Read + Send>,
}

/// Remote file host. `offset > 0` asks for `bytes=<offset>-`.
pub trait RangeSource: Send + Sync {
    fn open(&self, url: &str, offset: u64) -> Result<RemoteBody, FetchError>;
}

impl<S: RangeSource + ?Sized> RangeSource for &S {
    fn open(&self, url: &str, offset: u64) -> Result<RemoteBody, FetchError> {
        (**self).open(url, offset)
    }
}

#[derive(Clone)]
pub struct HttpRangeSource {
    client: Client,
    auth_token: Option<String>,
}

impl HttpRangeSource {
    pub fn new(config: &ResolvedConfig) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("encode-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| FetchError::DownloadHttp(err.to_string()))?,
        );

        // Blocking responses apply the timeout to each read, not the whole body.
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.download_timeout_secs))
            .build()
            .map_err(|err| FetchError::DownloadHttp(err.to_string()))?;

        Ok(Self {
            client,
            auth_token: config.auth_token.clone(),
        })
    }
}

impl RangeSource for HttpRangeSource {
    fn open(&self, url: &str, offset: u64) -> Result<RemoteBody, FetchError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        if let Some(token) = &self.auth_token {
            request = request.basic_auth(token, Some(""));
        }
        let response = request
            .send()
            .map_err(|err| FetchError::DownloadHttp(err.to_string()))?;
        Ok(RemoteBody {
            status: response.status().as_u16(),
            body: Box::new(response),
        })
    }
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    /// Total attempts per task; values below 1 are treated as 1.
    pub max_retries: usize,
    pub chunk_size: usize,
    pub backoff: Duration,
}

impl From<&ResolvedConfig> for DownloadOptions {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            chunk_size: config.chunk_size,
            backoff: Duration::from_millis(config.backoff_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadOutcome {
    Completed { bytes: u64, attempts: usize },
    Failed { attempts: usize, error: String },
}

impl DownloadOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, DownloadOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Starting,
    Resuming { offset: u64 },
    Streaming,
    Retrying { attempt: usize },
    Completed,
    Failed,
}

/// Per-file transfer observer. Called from download workers.
pub trait TransferProgress: Sync {
    fn started(&self, task: &DownloadTask);
    fn state(&self, task: &DownloadTask, state: TransferState);
    /// Cumulative bytes present in the part file.
    fn transferred(&self, task: &DownloadTask, bytes: u64);
}

pub struct Downloader<S: RangeSource> {
    source: S,
    options: DownloadOptions,
}

impl<S: RangeSource> Downloader<S> {
    pub fn new(source: S, options: DownloadOptions) -> Self {
        Self { source, options }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Never returns an error: exhaustion is reported as [`DownloadOutcome::Failed`].
    pub fn download(&self, task: &DownloadTask, progress: &dyn TransferProgress) -> DownloadOutcome {
        let attempts = self.options.max_retries.max(1);
        progress.started(task);
        progress.state(task, TransferState::Pending);

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.attempt(task, progress) {
                Ok(bytes) => {
                    tracing::debug!(file = %task.label, bytes, attempt, "download complete");
                    progress.state(task, TransferState::Completed);
                    return DownloadOutcome::Completed {
                        bytes,
                        attempts: attempt,
                    };
                }
                Err(err) => {
                    tracing::debug!(file = %task.label, attempt, error = %err, "download attempt failed");
                    last_error = err.to_string();
                    if attempt < attempts {
                        progress.state(task, TransferState::Retrying { attempt });
                        thread::sleep(self.options.backoff);
                    }
                }
            }
        }

        tracing::warn!(file = %task.label, url = %task.url, error = %last_error, "download failed");
        progress.state(task, TransferState::Failed);
        DownloadOutcome::Failed {
            attempts,
            error: last_error,
        }
    }

    fn attempt(&self, task: &DownloadTask, progress: &dyn TransferProgress) -> Result<u64, FetchError> {
        let part = task.part_path();
        if let Some(parent) = task.destination.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        }

        let mut offset = part_len(&part)?;
        if task.expected_size.is_some_and(|expected| offset > expected) {
            tracing::debug!(file = %task.label, offset, "discarding oversized part file");
            remove_part(&part)?;
            offset = 0;
        }
        if offset > 0 {
            progress.state(task, TransferState::Resuming { offset });
        } else {
            progress.state(task, TransferState::Starting);
        }

        let remote = self.source.open(&task.url, offset)?;
        let (mut file, mut written) = match remote.status {
            206 if offset > 0 => (open_append(&part)?, offset),
            200 | 206 => (create(&part)?, 0),
            416 if offset > 0 && task.expected_size == Some(offset) => {
                finalize(&part, &task.destination)?;
                progress.transferred(task, offset);
                return Ok(offset);
            }
            status => {
                // The part file no longer lines up with the remote object.
                if status == 416 {
                    remove_part(&part)?;
                }
                return Err(FetchError::DownloadStatus {
                    status,
                    url: task.url.clone(),
                });
            }
        };

        progress.state(task, TransferState::Streaming);
        progress.transferred(task, written);

        let mut body = remote.body;
        let mut buffer = vec![0u8; self.options.chunk_size.max(1)];
        loop {
            let read = match body.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FetchError::DownloadHttp(err.to_string())),
            };
            file.write_all(&buffer[..read])
                .map_err(|err| FetchError::Filesystem(err.to_string()))?;
            written += read as u64;
            progress.transferred(task, written);
        }
        file.flush()
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        drop(file);

        if let Some(expected) = task.expected_size {
            if written != expected {
                // A short body resumes next attempt; an oversized one cannot.
                if written > expected {
                    remove_part(&part)?;
                }
                return Err(FetchError::DownloadHttp(format!(
                    "expected {expected} bytes for {}, received {written}",
                    task.label
                )));
            }
        }

        finalize(&part, &task.destination)?;
        Ok(written)
    }

    /// Runs every task on a pool of `workers` threads. Results come back in
    /// completion order.
    pub fn download_all(
        &self,
        tasks: Vec<DownloadTask>,
        workers: usize,
        progress: &dyn TransferProgress,
    ) -> Vec<(DownloadTask, DownloadOutcome)> {
        let total = tasks.len();
        tracing::info!(files = total, workers, "starting downloads");
        let pool = WorkerPool::new(workers);
        pool.run(
            tasks,
            |task| {
                let outcome = self.download(&task, progress);
                (task, outcome)
            },
            |_| {},
        )
    }
}

fn part_len(part: &Utf8Path) -> Result<u64, FetchError> {
    match fs::metadata(part.as_std_path()) {
        Ok(meta) => Ok(meta.len()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(0),
        Err(err) => Err(FetchError::Filesystem(err.to_string())),
    }
}

fn remove_part(part: &Utf8Path) -> Result<(), FetchError> {
    match fs::remove_file(part.as_std_path()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(FetchError::Filesystem(err.to_string())),
    }
}

fn open_append(part: &Utf8Path) -> Result<File, FetchError> {
    OpenOptions::new()
        .append(true)
        .open(part.as_std_path())
        .map_err(|err| FetchError::Filesystem(err.to_string()))
}

fn create(part: &Utf8Path) -> Result<File, FetchError> {
    File::create(part.as_std_path()).map_err(|err| FetchError::Filesystem(err.to_string()))
}

fn finalize(part: &Utf8Path, destination: &Utf8Path) -> Result<(), FetchError> {
    fs::rename(part.as_std_path(), destination.as_std_path())
        .map_err(|err| FetchError::Filesystem(err.to_string()))
}
