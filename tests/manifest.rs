use std::fs;

use camino::Utf8PathBuf;

use encode_fetch::flatten::FileRecord;
use encode_fetch::manifest::{
    FileLayout, ManifestRow, Pairing, apply_local_paths, write_json, write_manifest,
    write_metadata,
};

fn record(experiment: &str, accession: &str, format: &str, is_control: bool) -> FileRecord {
    FileRecord {
        experiment_accession: experiment.to_string(),
        file_accession: accession.to_string(),
        file_format: format.to_string(),
        is_control,
        description: "K562 \"treated\"\twith tab".to_string(),
        url: format!("https://www.encodeproject.org/files/{accession}/@@download/{accession}.{format}"),
        ..FileRecord::default()
    }
}

fn tempdir_utf8() -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, path)
}

#[test]
fn manifest_is_tab_delimited_with_full_header() {
    let (_temp, dir) = tempdir_utf8();
    let path = dir.join("manifest.tsv");
    let rows = vec![
        ManifestRow::new(record("ENCSR000AAA", "ENCFF000001", "bed", false)),
        ManifestRow::new(record("ENCSR000CTL", "ENCFF000002", "bed", true)),
    ];

    write_manifest(&path, &rows).unwrap();

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(&path)
        .unwrap();
    let header: Vec<String> = reader
        .headers()
        .unwrap()
        .iter()
        .map(str::to_string)
        .collect();
    assert_eq!(header, ManifestRow::header());
    assert_eq!(header.first().map(String::as_str), Some("experiment_accession"));
    assert_eq!(header.last().map(String::as_str), Some("single_end"));

    let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
    assert_eq!(records.len(), 2);
    assert_eq!(&records[0][1], "false");
    assert_eq!(&records[1][1], "true");
    assert_eq!(&records[0][5], "K562 \"treated\"\twith tab");
}

#[test]
fn metadata_has_one_object_per_line() {
    let (_temp, dir) = tempdir_utf8();
    let path = dir.join("nested").join("metadata.jsonl");
    let records = vec![
        record("ENCSR000AAA", "ENCFF000001", "bed", false),
        record("ENCSR000AAA", "ENCFF000002", "bam", false),
    ];

    write_metadata(&path, &records).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let parsed: Vec<FileRecord> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(parsed, records);
}

#[test]
fn json_write_replaces_existing_file() {
    let (_temp, dir) = tempdir_utf8();
    let path = dir.join("run.json");
    fs::write(&path, "stale").unwrap();

    write_json(&path, &serde_json::json!({"matched": true})).unwrap();

    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(value["matched"], true);
    let leftovers = fs::read_dir(&dir)
        .unwrap()
        .filter(|entry| {
            entry
                .as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with(".encode-fetch")
        })
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn local_paths_follow_files_on_disk() {
    let (_temp, dir) = tempdir_utf8();
    let layout = FileLayout::new(&dir);

    let mut paired = ManifestRow::new(record("ENCSR000AAA", "ENCFF000R1A", "fastq", false));
    paired.pairing = Pairing {
        fastq_1: paired.record.url.clone(),
        fastq_2: "https://www.encodeproject.org/files/ENCFF000R2A/@@download/ENCFF000R2A.fastq.gz"
            .to_string(),
        url_r2: "https://www.encodeproject.org/files/ENCFF000R2A/@@download/ENCFF000R2A.fastq.gz"
            .to_string(),
        file_accession_r2: "ENCFF000R2A".to_string(),
        single_end: "false".to_string(),
        ..Pairing::default()
    };
    let missing = ManifestRow::new(record("ENCSR000CTL", "ENCFF000404", "bam", true));
    let mut rows = vec![paired, missing];

    let r1 = layout.primary(&rows[0]);
    let r2 = layout.mate(&rows[0]).unwrap();
    assert_eq!(r2, dir.join("files/case/ENCSR000AAA/ENCFF000R2A.fastq"));
    fs::create_dir_all(r1.parent().unwrap()).unwrap();
    fs::write(&r1, b"r1").unwrap();
    fs::write(&r2, b"r2").unwrap();

    apply_local_paths(&mut rows, &layout);

    assert_eq!(rows[0].local_path, r1.to_string());
    assert_eq!(rows[0].pairing.fastq_1, r1.to_string());
    assert_eq!(rows[0].pairing.fastq_2, r2.to_string());
    assert_eq!(rows[0].path(), r1.to_string());
    assert_eq!(rows[1].local_path, "");
    assert_eq!(rows[1].path(), rows[1].record.url);
    assert_eq!(layout.mate(&rows[1]), None);
}
