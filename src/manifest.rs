use std::fs;
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::FetchError;
use crate::flatten::FileRecord;

pub const MANIFEST_FILE: &str = "manifest.tsv";
pub const METADATA_FILE: &str = "metadata.jsonl";
pub const SUMMARY_FILE: &str = "run.json";
pub const FILES_DIR: &str = "files";

/// Mate columns filled by pair reconciliation. Empty on non-FASTQ rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Pairing {
    pub fastq_1: String,
    pub fastq_2: String,
    pub url_r2: String,
    pub md5sum_r2: String,
    pub file_size_r2: String,
    pub file_accession_r2: String,
    pub single_end: String,
}

impl Pairing {
    pub const COLUMNS: [&'static str; 7] = [
        "fastq_1",
        "fastq_2",
        "url_r2",
        "md5sum_r2",
        "file_size_r2",
        "file_accession_r2",
        "single_end",
    ];

    pub fn values(&self) -> Vec<String> {
        vec![
            self.fastq_1.clone(),
            self.fastq_2.clone(),
            self.url_r2.clone(),
            self.md5sum_r2.clone(),
            self.file_size_r2.clone(),
            self.file_accession_r2.clone(),
            self.single_end.clone(),
        ]
    }

    pub fn has_mate(&self) -> bool {
        !self.file_accession_r2.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManifestRow {
    pub record: FileRecord,
    pub local_path: String,
    pub pairing: Pairing,
}

impl ManifestRow {
    pub fn new(record: FileRecord) -> Self {
        Self {
            record,
            local_path: String::new(),
            pairing: Pairing::default(),
        }
    }

    /// Local copy when one has been assigned, otherwise the remote URL.
    pub fn path(&self) -> String {
        let local = self.local_path.trim();
        if local.is_empty() {
            self.record.url.clone()
        } else {
            local.to_string()
        }
    }

    pub fn header() -> Vec<&'static str> {
        let mut header = FileRecord::COLUMNS.to_vec();
        header.push("local_path");
        header.extend(Pairing::COLUMNS);
        header
    }

    pub fn values(&self) -> Vec<String> {
        let mut values = self.record.values();
        values.push(self.local_path.clone());
        values.extend(self.pairing.values());
        values
    }
}

/// Presentation order after reconciliation. Stable, so ties keep their input order.
pub fn sort_rows(rows: &mut [ManifestRow]) {
    rows.sort_by(|a, b| {
        (
            a.record.is_control,
            &a.record.experiment_accession,
            &a.record.biological_replicates,
            &a.record.technical_replicates,
        )
            .cmp(&(
                b.record.is_control,
                &b.record.experiment_accession,
                &b.record.biological_replicates,
                &b.record.technical_replicates,
            ))
    });
}

/// Accession-keyed download layout: `files/<case|control>/<experiment>/<file>.<format>`.
#[derive(Debug, Clone)]
pub struct FileLayout {
    root: Utf8PathBuf,
}

impl FileLayout {
    pub fn new(outdir: &Utf8Path) -> Self {
        Self {
            root: outdir.join(FILES_DIR),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn destination(
        &self,
        is_control: bool,
        experiment: &str,
        file_accession: &str,
        file_format: &str,
    ) -> Utf8PathBuf {
        let group = if is_control { "control" } else { "case" };
        let format = file_format.trim().to_lowercase();
        let ext = if format.is_empty() { "dat" } else { format.as_str() };
        self.root
            .join(group)
            .join(experiment)
            .join(format!("{file_accession}.{ext}"))
    }

    pub fn primary(&self, row: &ManifestRow) -> Utf8PathBuf {
        self.destination(
            row.record.is_control,
            &row.record.experiment_accession,
            &row.record.file_accession,
            &row.record.file_format,
        )
    }

    /// Mates belong to the anchor's experiment and share its format.
    pub fn mate(&self, row: &ManifestRow) -> Option<Utf8PathBuf> {
        row.pairing.has_mate().then(|| {
            self.destination(
                row.record.is_control,
                &row.record.experiment_accession,
                &row.pairing.file_accession_r2,
                &row.record.file_format,
            )
        })
    }
}

/// Points rows at files present under `layout`; rows without a local copy
/// keep their remote paths.
pub fn apply_local_paths(rows: &mut [ManifestRow], layout: &FileLayout) {
    for row in rows.iter_mut() {
        let primary = layout.primary(row);
        if primary.as_std_path().is_file() {
            row.local_path = primary.to_string();
            if !row.pairing.fastq_1.is_empty() {
                row.pairing.fastq_1 = primary.to_string();
            }
        } else {
            row.local_path = String::new();
        }
        if let Some(mate) = layout.mate(row) {
            if !row.pairing.fastq_2.is_empty() && mate.as_std_path().is_file() {
                row.pairing.fastq_2 = mate.to_string();
            }
        }
    }
}

pub fn write_manifest(path: &Utf8Path, rows: &[ManifestRow]) -> Result<(), FetchError> {
    write_atomic(path, |out| {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(out);
        writer
            .write_record(ManifestRow::header())
            .map_err(|err| FetchError::Manifest(err.to_string()))?;
        for row in rows {
            writer
                .write_record(row.values())
                .map_err(|err| FetchError::Manifest(err.to_string()))?;
        }
        writer
            .flush()
            .map_err(|err| FetchError::Manifest(err.to_string()))
    })
}

/// One JSON object per record, in the order given.
pub fn write_metadata(path: &Utf8Path, records: &[FileRecord]) -> Result<(), FetchError> {
    write_atomic(path, |out| {
        for record in records {
            serde_json::to_writer(&mut *out, record)
                .map_err(|err| FetchError::Manifest(err.to_string()))?;
            out.write_all(b"\n")
                .map_err(|err| FetchError::Filesystem(err.to_string()))?;
        }
        Ok(())
    })
}

pub fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), FetchError> {
    write_atomic(path, |out| {
        serde_json::to_writer_pretty(&mut *out, value)
            .map_err(|err| FetchError::Manifest(err.to_string()))?;
        out.write_all(b"\n")
            .map_err(|err| FetchError::Filesystem(err.to_string()))
    })
}

/// Writes through a temp file in the target directory, then renames over `path`.
pub fn write_atomic<F>(path: &Utf8Path, write: F) -> Result<(), FetchError>
where
    F: FnOnce(&mut BufWriter<&mut fs::File>) -> Result<(), FetchError>,
{
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| FetchError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".encode-fetch")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| FetchError::Filesystem(err.to_string()))?;
    {
        let mut out = BufWriter::new(temp.as_file_mut());
        write(&mut out)?;
        out.flush()
            .map_err(|err| FetchError::Filesystem(err.to_string()))?;
    }
    temp.persist(path.as_std_path())
        .map_err(|err| FetchError::Filesystem(err.to_string()))?;
    Ok(())
}
