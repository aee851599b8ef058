//! Paired-end FASTQ reconciliation.
//!
//! ENCODE lists the two reads of a paired-end run as separate files. Workflow
//! sample sheets want one row per sample, so each R1 (and each single-end
//! FASTQ) becomes an anchor row that carries its mate in the `fastq_2` and
//! `*_r2` columns.
//!
//! Mate resolution order for a paired anchor:
//! 1. the file named by the anchor's own `paired_with` back-reference;
//! 2. otherwise an R2 of the same experiment with identical biological and
//!    technical replicates, preferring one whose back-reference points at the
//!    anchor.
//!
//! A mate is only used when it is not archived.

use std::collections::HashMap;

use crate::manifest::{ManifestRow, Pairing, sort_rows};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    R1,
    R2,
    Unknown,
}

fn read_end(row: &ManifestRow) -> ReadEnd {
    match row.record.paired_end.trim() {
        "1" => ReadEnd::R1,
        "2" => ReadEnd::R2,
        _ => ReadEnd::Unknown,
    }
}

fn is_paired(row: &ManifestRow) -> bool {
    row.record.run_type.to_lowercase().contains("paired")
}

fn is_archived(row: &ManifestRow) -> bool {
    row.record.file_status.trim().eq_ignore_ascii_case("archived")
}

/// Collapses paired FASTQ rows into one row per sample. Tables without FASTQ
/// rows come back unchanged.
pub fn reconcile(rows: Vec<ManifestRow>) -> Vec<ManifestRow> {
    if !rows.iter().any(|row| row.record.is_fastq()) {
        return rows;
    }

    let (fastq, mut combined): (Vec<ManifestRow>, Vec<ManifestRow>) =
        rows.into_iter().partition(|row| row.record.is_fastq());

    let by_accession: HashMap<&str, usize> = fastq
        .iter()
        .enumerate()
        .map(|(index, row)| (row.record.file_accession.as_str(), index))
        .collect();

    let anchors = fastq
        .iter()
        .filter(|row| is_paired(row) && read_end(row) == ReadEnd::R1)
        .chain(fastq.iter().filter(|row| !is_paired(row)));

    let mut collapsed = Vec::new();
    for anchor in anchors {
        let mate = if is_paired(anchor) {
            find_mate(anchor, &fastq, &by_accession)
        } else {
            None
        };
        let mut row = anchor.clone();
        row.pairing = pairing_for(anchor, mate);
        collapsed.push(row);
    }

    combined.extend(collapsed);
    sort_rows(&mut combined);
    combined
}

fn find_mate<'a>(
    anchor: &ManifestRow,
    fastq: &'a [ManifestRow],
    by_accession: &HashMap<&str, usize>,
) -> Option<&'a ManifestRow> {
    let back_reference = anchor.record.paired_accession.as_str();
    if !back_reference.is_empty() {
        if let Some(&index) = by_accession.get(back_reference) {
            return Some(&fastq[index]);
        }
    }

    let candidates: Vec<&ManifestRow> = fastq
        .iter()
        .filter(|row| {
            row.record.experiment_accession == anchor.record.experiment_accession
                && is_paired(row)
                && read_end(row) == ReadEnd::R2
                && row.record.biological_replicates == anchor.record.biological_replicates
                && row.record.technical_replicates == anchor.record.technical_replicates
        })
        .collect();

    candidates
        .iter()
        .find(|row| row.record.paired_accession == anchor.record.file_accession)
        .or_else(|| candidates.first())
        .copied()
}

fn pairing_for(anchor: &ManifestRow, mate: Option<&ManifestRow>) -> Pairing {
    let fastq_1 = anchor.path();
    match mate.filter(|mate| !is_archived(mate)) {
        Some(mate) => Pairing {
            fastq_1,
            fastq_2: mate.path(),
            url_r2: mate.record.url.clone(),
            md5sum_r2: mate.record.md5sum.clone(),
            file_size_r2: mate.record.file_size.clone(),
            file_accession_r2: mate.record.file_accession.clone(),
            single_end: "false".to_string(),
        },
        None => Pairing {
            fastq_1,
            single_end: "true".to_string(),
            ..Pairing::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::FileRecord;

    fn fastq(accession: &str, run_type: &str, end: &str, mate: &str) -> ManifestRow {
        ManifestRow::new(FileRecord {
            experiment_accession: "ENCSR000AAA".to_string(),
            file_accession: accession.to_string(),
            file_format: "fastq".to_string(),
            run_type: run_type.to_string(),
            paired_end: end.to_string(),
            paired_accession: mate.to_string(),
            file_status: "released".to_string(),
            biological_replicates: "1".to_string(),
            technical_replicates: "1_1".to_string(),
            url: format!("https://example.org/{accession}.fastq.gz"),
            ..FileRecord::default()
        })
    }

    #[test]
    fn unknown_paired_end_rows_are_dropped() {
        let rows = vec![
            fastq("ENCFF001AAA", "paired-ended", "1", ""),
            fastq("ENCFF009ZZZ", "paired-ended", "", ""),
        ];
        let out = reconcile(rows);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].record.file_accession, "ENCFF001AAA");
        assert_eq!(out[0].pairing.single_end, "true");
    }

    #[test]
    fn positional_fallback_prefers_back_reference() {
        let rows = vec![
            fastq("ENCFF001AAA", "paired-ended", "1", ""),
            fastq("ENCFF002AAA", "paired-ended", "2", "ENCFF777XXX"),
            fastq("ENCFF003AAA", "paired-ended", "2", "ENCFF001AAA"),
        ];
        let out = reconcile(rows);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pairing.file_accession_r2, "ENCFF003AAA");
    }

    #[test]
    fn positional_fallback_takes_first_candidate() {
        let rows = vec![
            fastq("ENCFF001AAA", "Paired-Ended", "1", ""),
            fastq("ENCFF002AAA", "paired-ended", "2", ""),
            fastq("ENCFF003AAA", "paired-ended", "2", ""),
        ];
        let out = reconcile(rows);
        assert_eq!(out[0].pairing.file_accession_r2, "ENCFF002AAA");
        assert_eq!(out[0].pairing.single_end, "false");
    }
}
