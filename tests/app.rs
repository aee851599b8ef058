use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor};
use std::sync::Mutex;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde_json::{Value, json};

use encode_fetch::app::{App, RunRequest, Selection};
use encode_fetch::assay::AssayKind;
use encode_fetch::domain::{ExperimentAccession, parse_accession_list};
use encode_fetch::download::{DownloadOptions, RangeSource, RemoteBody};
use encode_fetch::encode::{EncodeClient, SearchQuery};
use encode_fetch::error::FetchError;
use encode_fetch::flatten::FileFilter;
use encode_fetch::manifest::{MANIFEST_FILE, METADATA_FILE, SUMMARY_FILE};
use encode_fetch::output::JsonOutput;
use encode_fetch::sheet::SheetFormat;

const BASE: &str = "https://encode.test";

#[derive(Default)]
struct MockEncode {
    experiments: HashMap<String, Value>,
    hits: Vec<Value>,
}

impl EncodeClient for MockEncode {
    fn search(&self, _query: &SearchQuery) -> Result<Vec<Value>, FetchError> {
        Ok(self.hits.clone())
    }

    fn fetch_experiment(
        &self,
        accession: &ExperimentAccession,
        _embedded: bool,
    ) -> Result<Value, FetchError> {
        self.experiments
            .get(accession.as_str())
            .cloned()
            .ok_or_else(|| FetchError::EncodeStatus {
                status: 404,
                message: "Not Found".to_string(),
            })
    }
}

/// Serves `files` by URL; unknown URLs get a 404.
#[derive(Default)]
struct MockFiles {
    files: HashMap<String, Vec<u8>>,
    requests: Mutex<Vec<String>>,
}

impl RangeSource for MockFiles {
    fn open(&self, url: &str, offset: u64) -> Result<RemoteBody, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        match self.files.get(url) {
            Some(data) => Ok(RemoteBody {
                status: if offset > 0 { 206 } else { 200 },
                body: Box::new(Cursor::new(data[offset as usize..].to_vec())),
            }),
            None => Ok(RemoteBody {
                status: 404,
                body: Box::new(io::empty()),
            }),
        }
    }
}

fn fastq(accession: &str, end: &str, mate: &str, size: usize) -> Value {
    json!({
        "accession": accession,
        "file_format": "fastq",
        "run_type": "paired-ended",
        "paired_end": end,
        "paired_with": format!("/files/{mate}/"),
        "status": "released",
        "file_size": size,
        "biological_replicates": [1],
        "technical_replicates": ["1_1"],
        "href": format!("/files/{accession}/@@download/{accession}.fastq.gz")
    })
}

fn url(accession: &str) -> String {
    format!("{BASE}/files/{accession}/@@download/{accession}.fastq.gz")
}

fn fixtures() -> (MockEncode, MockFiles) {
    let mut encode = MockEncode::default();
    encode.experiments.insert(
        "ENCSR000AAA".to_string(),
        json!({
            "accession": "ENCSR000AAA",
            "assay_title": "Histone ChIP-seq",
            "target": {"label": "H3K4me3"},
            "possible_controls": [{"accession": "ENCSR000CTL"}],
            "files": [
                fastq("ENCFF000R1A", "1", "ENCFF000R2A", 4),
                fastq("ENCFF000R2A", "2", "ENCFF000R1A", 4)
            ]
        }),
    );
    encode.experiments.insert(
        "ENCSR000CTL".to_string(),
        json!({
            "accession": "ENCSR000CTL",
            "assay_title": "Control ChIP-seq",
            "files": [
                fastq("ENCFF000C1A", "1", "ENCFF000C2A", 5),
                fastq("ENCFF000C2A", "2", "ENCFF000C1A", 5)
            ]
        }),
    );

    let mut files = MockFiles::default();
    files.files.insert(url("ENCFF000R1A"), b"AAAA".to_vec());
    files.files.insert(url("ENCFF000R2A"), b"BBBB".to_vec());
    files.files.insert(url("ENCFF000C1A"), b"CCCCC".to_vec());
    (encode, files)
}

fn request(outdir: Utf8PathBuf, selection: Selection) -> RunRequest {
    RunRequest {
        selection,
        assay: AssayKind::ChipSeq,
        filter: FileFilter::new(Vec::<String>::new(), None, Some("released".to_string())),
        outdir,
        base_url: BASE.to_string(),
        threads: 2,
        download: true,
        dry_run: false,
        download_threads: 2,
        download_options: DownloadOptions {
            max_retries: 2,
            chunk_size: 2,
            backoff: Duration::ZERO,
        },
        sheets: vec![SheetFormat::NfcoreChipseq, SheetFormat::SnakemakeChipseq],
    }
}

fn outdir(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join("results")).unwrap()
}

#[test]
fn accession_run_downloads_pairs_and_writes_outputs() {
    let temp = tempfile::tempdir().unwrap();
    let outdir = outdir(&temp);
    let (encode, files) = fixtures();
    let app = App::new(encode, files);
    let accessions = parse_accession_list("ENCSR000AAA").unwrap();

    let summary = app
        .run(
            &request(outdir.clone(), Selection::Accessions(accessions)),
            &JsonOutput,
            &JsonOutput,
        )
        .unwrap();

    assert!(summary.matched);
    assert_eq!(summary.mode, "accessions");
    assert_eq!(summary.cases, 1);
    assert_eq!(summary.records, 4);
    assert_eq!(summary.rows, 2);
    assert_eq!(summary.downloads.planned, 4);
    assert_eq!(summary.downloads.completed, 3);
    assert_eq!(summary.downloads.failed.len(), 1);
    assert_eq!(summary.downloads.failed[0].url, url("ENCFF000C2A"));

    let case_dir = outdir.join("files/case/ENCSR000AAA");
    assert_eq!(fs::read(case_dir.join("ENCFF000R1A.fastq")).unwrap(), b"AAAA");
    assert_eq!(fs::read(case_dir.join("ENCFF000R2A.fastq")).unwrap(), b"BBBB");
    let control = outdir.join("files/control/ENCSR000CTL/ENCFF000C1A.fastq");
    assert_eq!(fs::read(&control).unwrap(), b"CCCCC");

    let manifest = fs::read_to_string(outdir.join(MANIFEST_FILE)).unwrap();
    assert_eq!(manifest.lines().count(), 3);
    assert!(manifest.contains(case_dir.join("ENCFF000R2A.fastq").as_str()));

    let metadata = fs::read_to_string(outdir.join(METADATA_FILE)).unwrap();
    assert_eq!(metadata.lines().count(), 4);

    let sheet = fs::read_to_string(outdir.join("nfcore_chipseq_samplesheet.csv")).unwrap();
    let case_line = sheet.lines().nth(1).unwrap();
    assert!(case_line.starts_with("ENCSR000AAA,"));
    assert!(case_line.contains("ENCFF000R1A.fastq,"));
    assert!(case_line.ends_with(",false,H3K4me3,1,ENCSR000CTL,1"));
    assert!(outdir.join("snakemake_chipseq_samples.tsv").exists());

    let run: Value =
        serde_json::from_str(&fs::read_to_string(outdir.join(SUMMARY_FILE)).unwrap()).unwrap();
    assert_eq!(run["matched"], true);
    assert_eq!(run["downloads"]["completed"], 3);
    assert!(run["started_at"].as_str().unwrap().contains('T'));
}

#[test]
fn second_run_skips_present_files() {
    let temp = tempfile::tempdir().unwrap();
    let outdir = outdir(&temp);
    let (encode, files) = fixtures();
    let app = App::new(encode, files);
    let accessions = parse_accession_list("ENCSR000AAA").unwrap();
    let request = request(outdir, Selection::Accessions(accessions));

    app.run(&request, &JsonOutput, &JsonOutput).unwrap();
    let summary = app.run(&request, &JsonOutput, &JsonOutput).unwrap();

    assert_eq!(summary.downloads.skipped, 3);
    assert_eq!(summary.downloads.planned, 1);
    assert_eq!(summary.downloads.failed.len(), 1);
}

#[test]
fn dry_run_writes_manifest_without_downloading() {
    let temp = tempfile::tempdir().unwrap();
    let outdir = outdir(&temp);
    let (encode, files) = fixtures();
    let app = App::new(encode, &files);
    let mut request = request(
        outdir.clone(),
        Selection::Accessions(parse_accession_list("ENCSR000AAA").unwrap()),
    );
    request.dry_run = true;

    let summary = app.run(&request, &JsonOutput, &JsonOutput).unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.downloads.planned, 4);
    assert_eq!(summary.downloads.completed, 0);
    assert!(files.requests.lock().unwrap().is_empty());
    assert!(outdir.join(MANIFEST_FILE).exists());
    assert!(!outdir.join("files").exists());
}

#[test]
fn search_run_uses_hit_accessions() {
    let temp = tempfile::tempdir().unwrap();
    let outdir = outdir(&temp);
    let (mut encode, files) = fixtures();
    encode.hits = vec![
        json!({"accession": "ENCSR000AAA"}),
        json!({"@id": "/experiments/no-accession/"}),
        json!({"accession": "garbage"}),
    ];
    let app = App::new(encode, files);
    let mut request = request(outdir, Selection::Search(SearchQuery::default()));
    request.download = false;
    request.sheets.clear();

    let summary = app.run(&request, &JsonOutput, &JsonOutput).unwrap();

    assert_eq!(summary.mode, "search");
    assert_eq!(summary.cases, 1);
    assert_eq!(summary.rows, 2);
    assert_eq!(summary.downloads.planned, 0);
}

#[test]
fn empty_result_writes_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let outdir = outdir(&temp);
    let app = App::new(MockEncode::default(), MockFiles::default());
    let request = request(outdir.clone(), Selection::Search(SearchQuery::default()));

    let summary = app.run(&request, &JsonOutput, &JsonOutput).unwrap();

    assert!(!summary.matched);
    assert!(summary.outputs.is_empty());
    assert!(!outdir.exists());
}

#[test]
fn search_failure_aborts_the_run() {
    struct Down;

    impl EncodeClient for Down {
        fn search(&self, _query: &SearchQuery) -> Result<Vec<Value>, FetchError> {
            Err(FetchError::EncodeStatus {
                status: 503,
                message: "Service Unavailable".to_string(),
            })
        }

        fn fetch_experiment(
            &self,
            _accession: &ExperimentAccession,
            _embedded: bool,
        ) -> Result<Value, FetchError> {
            unreachable!("search failed first")
        }
    }

    let temp = tempfile::tempdir().unwrap();
    let app = App::new(Down, MockFiles::default());
    let request = request(outdir(&temp), Selection::Search(SearchQuery::default()));

    let err = app.run(&request, &JsonOutput, &JsonOutput).unwrap_err();
    assert!(err.is_remote());
}
