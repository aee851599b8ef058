use assert_matches::assert_matches;
use clap::ValueEnum;

use encode_fetch::domain::{ExperimentAccession, FileType, Perturbed, parse_accession_list};
use encode_fetch::error::FetchError;

#[test]
fn parse_accession_valid() {
    let acc: ExperimentAccession = " encsr000eve ".parse().unwrap();
    assert_eq!(acc.as_str(), "ENCSR000EVE");
    assert_eq!(acc.to_string(), "ENCSR000EVE");
}

#[test]
fn parse_accession_from_portal_path() {
    let acc: ExperimentAccession = "/experiments/ENCSR123ABC/".parse().unwrap();
    assert_eq!(acc.as_str(), "ENCSR123ABC");
}

#[test]
fn parse_test_server_accession() {
    let acc: ExperimentAccession = "tstsr123abc".parse().unwrap();
    assert_eq!(acc.as_str(), "TSTSR123ABC");
}

#[test]
fn parse_accession_invalid() {
    let err = "ENCSR12".parse::<ExperimentAccession>().unwrap_err();
    assert_matches!(err, FetchError::InvalidAccession(_));

    let err = "SRR014966".parse::<ExperimentAccession>().unwrap_err();
    assert_matches!(err, FetchError::InvalidAccession(_));
}

#[test]
fn accession_list_skips_blanks() {
    let list = parse_accession_list("ENCSR000AAA, ,encsr000bbb,").unwrap();
    let names: Vec<&str> = list.iter().map(ExperimentAccession::as_str).collect();
    assert_eq!(names, vec!["ENCSR000AAA", "ENCSR000BBB"]);
}

#[test]
fn accession_list_rejects_any_invalid_entry() {
    let err = parse_accession_list("ENCSR000AAA,bogus").unwrap_err();
    assert_matches!(err, FetchError::InvalidAccession(value) if value == "bogus");
}

#[test]
fn file_type_parses_case_insensitively() {
    let parsed = FileType::from_str("bigWig", true).unwrap();
    assert_eq!(parsed, FileType::BigWig);
    assert_eq!(parsed.to_string(), "bigwig");
    assert_eq!(FileType::from_str("BEDPE", true).unwrap(), FileType::Bedpe);
    assert!(FileType::from_str("cram", true).is_err());
}

#[test]
fn perturbed_any_is_not_selectable() {
    assert!(Perturbed::from_str("any", true).is_err());
    assert_eq!(Perturbed::from_str("false", true).unwrap(), Perturbed::False);
    assert_eq!(Perturbed::default().as_param(), None);
}
