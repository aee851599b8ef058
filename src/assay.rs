use std::fmt;
use std::str::FromStr;

use crate::domain::FileType;
use crate::error::FetchError;
use crate::manifest::ManifestRow;
use crate::pairs::reconcile;
use crate::sheet::SheetFormat;

/// Assay families with their own sample sheet layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssayKind {
    ChipSeq,
    AtacSeq,
    RnaSeq,
}

impl AssayKind {
    /// Matches portal assay titles case-insensitively.
    pub fn from_title(title: &str) -> Option<Self> {
        match title.trim().to_lowercase().as_str() {
            "chip-seq" | "histone chip-seq" | "tf chip-seq" | "mint-chip-seq" => {
                Some(AssayKind::ChipSeq)
            }
            "atac-seq" => Some(AssayKind::AtacSeq),
            "rna-seq" | "total rna-seq" | "polya plus rna-seq" | "polya minus rna-seq" => {
                Some(AssayKind::RnaSeq)
            }
            _ => None,
        }
    }

    /// Like [`AssayKind::from_title`], falling back to ChIP-seq.
    pub fn for_title(title: Option<&str>) -> Self {
        title
            .and_then(Self::from_title)
            .unwrap_or(AssayKind::ChipSeq)
    }

    pub fn name(self) -> &'static str {
        match self {
            AssayKind::ChipSeq => "ChIP-seq",
            AssayKind::AtacSeq => "ATAC-seq",
            AssayKind::RnaSeq => "RNA-seq",
        }
    }

    /// Collapses paired FASTQ rows when the table has any.
    pub fn normalize(self, rows: Vec<ManifestRow>) -> Vec<ManifestRow> {
        if rows.iter().any(|row| row.record.is_fastq()) {
            reconcile(rows)
        } else {
            rows
        }
    }

    pub fn default_file_types(self) -> Vec<FileType> {
        vec![FileType::Fastq]
    }

    pub fn nfcore_sheet(self) -> SheetFormat {
        match self {
            AssayKind::ChipSeq => SheetFormat::NfcoreChipseq,
            AssayKind::AtacSeq => SheetFormat::NfcoreAtacseq,
            AssayKind::RnaSeq => SheetFormat::NfcoreRnaseq,
        }
    }

    pub fn snakemake_sheet(self) -> SheetFormat {
        match self {
            AssayKind::ChipSeq => SheetFormat::SnakemakeChipseq,
            AssayKind::AtacSeq => SheetFormat::SnakemakeAtacseq,
            AssayKind::RnaSeq => SheetFormat::SnakemakeRnaseq,
        }
    }

    pub fn sheets(self) -> [SheetFormat; 2] {
        [self.nfcore_sheet(), self.snakemake_sheet()]
    }
}

impl fmt::Display for AssayKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AssayKind {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_title(value).ok_or_else(|| FetchError::UnknownAssay(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_map_to_families() {
        assert_eq!(AssayKind::from_title("Histone ChIP-seq"), Some(AssayKind::ChipSeq));
        assert_eq!(AssayKind::from_title("TF ChIP-seq"), Some(AssayKind::ChipSeq));
        assert_eq!(AssayKind::from_title("ATAC-seq"), Some(AssayKind::AtacSeq));
        assert_eq!(AssayKind::from_title("total RNA-seq"), Some(AssayKind::RnaSeq));
        assert_eq!(AssayKind::from_title("polyA plus RNA-seq"), Some(AssayKind::RnaSeq));
        assert_eq!(AssayKind::from_title("DNase-seq"), None);
    }

    #[test]
    fn unknown_titles_fall_back_to_chipseq() {
        assert_eq!(AssayKind::for_title(Some("Hi-C")), AssayKind::ChipSeq);
        assert_eq!(AssayKind::for_title(None), AssayKind::ChipSeq);
        assert_eq!(
            AssayKind::for_title(Some("ATAC-seq")).sheets(),
            [SheetFormat::NfcoreAtacseq, SheetFormat::SnakemakeAtacseq]
        );
    }
}
