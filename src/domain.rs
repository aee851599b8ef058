use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

static EXPERIMENT_ACCESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(ENC|TST)[A-Z]{2}[0-9]{3}[A-Z]{3}$").expect("valid accession pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExperimentAccession(String);

impl ExperimentAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentAccession {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().trim_matches('/').to_uppercase();
        let normalized = normalized
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        if !EXPERIMENT_ACCESSION.is_match(&normalized) {
            return Err(FetchError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Parse a comma separated accession list, skipping blanks.
pub fn parse_accession_list(value: &str) -> Result<Vec<ExperimentAccession>, FetchError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::parse)
        .collect()
}

/// Tri-state `perturbed` search filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Perturbed {
    #[default]
    #[value(skip)]
    Any,
    True,
    False,
}

impl Perturbed {
    pub fn as_param(self) -> Option<&'static str> {
        match self {
            Perturbed::Any => None,
            Perturbed::True => Some("true"),
            Perturbed::False => Some("false"),
        }
    }
}

/// File formats accepted by `--file-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum FileType {
    Fastq,
    Bam,
    Bed,
    BigWig,
    Tsv,
    Bw,
    Bedpe,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileType::Fastq => "fastq",
            FileType::Bam => "bam",
            FileType::Bed => "bed",
            FileType::BigWig => "bigwig",
            FileType::Tsv => "tsv",
            FileType::Bw => "bw",
            FileType::Bedpe => "bedpe",
        };
        write!(f, "{name}")
    }
}
