//! Workflow sample sheets derived from the manifest table.

use std::fmt;
use std::str::FromStr;

use camino::Utf8Path;

use crate::error::FetchError;
use crate::manifest::{ManifestRow, write_atomic};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SheetFormat {
    NfcoreChipseq,
    NfcoreAtacseq,
    NfcoreRnaseq,
    SnakemakeChipseq,
    SnakemakeAtacseq,
    SnakemakeRnaseq,
}

impl SheetFormat {
    pub const ALL: [SheetFormat; 6] = [
        SheetFormat::NfcoreChipseq,
        SheetFormat::NfcoreAtacseq,
        SheetFormat::NfcoreRnaseq,
        SheetFormat::SnakemakeChipseq,
        SheetFormat::SnakemakeAtacseq,
        SheetFormat::SnakemakeRnaseq,
    ];

    pub fn id(self) -> &'static str {
        match self {
            SheetFormat::NfcoreChipseq => "nfcore_chipseq",
            SheetFormat::NfcoreAtacseq => "nfcore_atacseq",
            SheetFormat::NfcoreRnaseq => "nfcore_rnaseq",
            SheetFormat::SnakemakeChipseq => "snakemake_chipseq",
            SheetFormat::SnakemakeAtacseq => "snakemake_atacseq",
            SheetFormat::SnakemakeRnaseq => "snakemake_rnaseq",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            SheetFormat::NfcoreChipseq => "nfcore_chipseq_samplesheet.csv",
            SheetFormat::NfcoreAtacseq => "nfcore_atacseq_samplesheet.csv",
            SheetFormat::NfcoreRnaseq => "nfcore_rnaseq_samplesheet.csv",
            SheetFormat::SnakemakeChipseq => "snakemake_chipseq_samples.tsv",
            SheetFormat::SnakemakeAtacseq => "snakemake_atacseq_samples.tsv",
            SheetFormat::SnakemakeRnaseq => "snakemake_rnaseq_samples.tsv",
        }
    }

    fn delimiter(self) -> u8 {
        match self {
            SheetFormat::NfcoreChipseq | SheetFormat::NfcoreAtacseq | SheetFormat::NfcoreRnaseq => {
                b','
            }
            _ => b'\t',
        }
    }

    /// nf-core sheets list reads, so they only take FASTQ rows.
    fn fastq_only(self) -> bool {
        self.delimiter() == b','
    }

    fn header(self) -> &'static [&'static str] {
        match self {
            SheetFormat::NfcoreChipseq => &[
                "sample",
                "fastq_1",
                "fastq_2",
                "single_end",
                "antibody",
                "replicate",
                "control",
                "control_replicate",
            ],
            SheetFormat::NfcoreAtacseq => &["sample", "fastq_1", "fastq_2", "replicate"],
            SheetFormat::NfcoreRnaseq => {
                &["sample", "fastq_1", "fastq_2", "single_end", "strandedness"]
            }
            SheetFormat::SnakemakeChipseq => &["sample", "group", "replicate", "file"],
            SheetFormat::SnakemakeAtacseq => &["sample", "replicate", "file"],
            SheetFormat::SnakemakeRnaseq => &["sample", "file"],
        }
    }

    fn row(self, row: &ManifestRow) -> Vec<String> {
        let record = &row.record;
        let sample = record.experiment_accession.clone();
        let replicate = first_replicate(&record.biological_replicates);
        let pairing = &row.pairing;
        match self {
            SheetFormat::NfcoreChipseq => {
                let (control, control_replicate) = if record.is_control {
                    (String::new(), String::new())
                } else {
                    (record.matched_control_experiments.clone(), replicate.clone())
                };
                vec![
                    sample,
                    pairing.fastq_1.clone(),
                    pairing.fastq_2.clone(),
                    pairing.single_end.clone(),
                    record.target_label.clone(),
                    replicate,
                    control,
                    control_replicate,
                ]
            }
            SheetFormat::NfcoreAtacseq => vec![
                sample,
                pairing.fastq_1.clone(),
                pairing.fastq_2.clone(),
                replicate,
            ],
            SheetFormat::NfcoreRnaseq => vec![
                sample,
                pairing.fastq_1.clone(),
                pairing.fastq_2.clone(),
                pairing.single_end.clone(),
                String::new(),
            ],
            SheetFormat::SnakemakeChipseq => {
                let group = if record.is_control { "control" } else { "case" };
                vec![sample, group.to_string(), replicate, row.path()]
            }
            SheetFormat::SnakemakeAtacseq => vec![sample, replicate, row.path()],
            SheetFormat::SnakemakeRnaseq => vec![sample, row.path()],
        }
    }

    /// Number of data rows `rows` would produce.
    pub fn row_count(self, rows: &[ManifestRow]) -> usize {
        rows.iter()
            .filter(|row| !self.fastq_only() || row.record.is_fastq())
            .count()
    }

    pub fn write(self, rows: &[ManifestRow], path: &Utf8Path) -> Result<(), FetchError> {
        write_atomic(path, |out| {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(self.delimiter())
                .from_writer(out);
            writer
                .write_record(self.header())
                .map_err(|err| FetchError::Manifest(err.to_string()))?;
            for row in rows
                .iter()
                .filter(|row| !self.fastq_only() || row.record.is_fastq())
            {
                writer
                    .write_record(self.row(row))
                    .map_err(|err| FetchError::Manifest(err.to_string()))?;
            }
            writer
                .flush()
                .map_err(|err| FetchError::Manifest(err.to_string()))
        })?;
        tracing::info!(sheet = self.id(), path = %path, "wrote sample sheet");
        Ok(())
    }
}

fn first_replicate(replicates: &str) -> String {
    replicates
        .split(',')
        .next()
        .map(str::trim)
        .filter(|rep| !rep.is_empty())
        .unwrap_or("1")
        .to_string()
}

impl fmt::Display for SheetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for SheetFormat {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|format| format.id() == wanted)
            .ok_or_else(|| FetchError::UnknownSheet(value.to_string()))
    }
}
