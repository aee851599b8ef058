//! Flattening of embedded ENCODE experiments into file-level records.
//!
//! Every nested lookup goes through [`Fields`], which yields an empty value
//! for absent keys or unexpected shapes, so a sparse or malformed experiment
//! produces rows with empty cells rather than errors.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

static NULL: Value = Value::Null;

/// Default-returning view over a JSON value.
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a>(&'a Value);

impl<'a> Fields<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self(value)
    }

    pub fn raw(&self) -> &'a Value {
        self.0
    }

    pub fn get(&self, key: &str) -> Fields<'a> {
        Fields(self.0.get(key).unwrap_or(&NULL))
    }

    pub fn first(&self) -> Fields<'a> {
        Fields(
            self.0
                .as_array()
                .and_then(|items| items.first())
                .unwrap_or(&NULL),
        )
    }

    pub fn items(&self) -> &'a [Value] {
        self.0.as_array().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn text(&self) -> String {
        scalar_text(self.0)
    }

    /// Array elements joined by `sep`, skipping empties. Scalars render as text.
    pub fn joined(&self, sep: &str) -> String {
        match self.0 {
            Value::Array(items) => items
                .iter()
                .map(scalar_text)
                .filter(|item| !item.is_empty())
                .collect::<Vec<_>>()
                .join(sep),
            other => scalar_text(other),
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

/// Accession carried by a reference: a bare accession, an `@id` style path,
/// or an object exposing `accession` or `@id`.
pub fn reference_accession(value: &Value) -> Option<String> {
    let accession = match value {
        Value::String(text) => last_segment(text),
        Value::Object(map) => match map.get("accession").and_then(Value::as_str) {
            Some(accession) if !accession.trim().is_empty() => accession.trim().to_string(),
            _ => map
                .get("@id")
                .and_then(Value::as_str)
                .map(last_segment)
                .unwrap_or_default(),
        },
        _ => String::new(),
    };
    (!accession.is_empty()).then_some(accession)
}

fn last_segment(path: &str) -> String {
    path.trim()
        .trim_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Control accessions referenced by `possible_controls`, deduplicated in
/// first-seen order.
pub fn expand_possible_controls(experiment: &Value) -> Vec<String> {
    let mut controls: Vec<String> = Vec::new();
    for reference in Fields::new(experiment).get("possible_controls").items() {
        if let Some(accession) = reference_accession(reference) {
            if !controls.contains(&accession) {
                controls.push(accession);
            }
        }
    }
    controls
}

/// Status / format / assembly predicate applied to each file of an experiment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileFilter {
    pub formats: BTreeSet<String>,
    pub assembly: Option<String>,
    pub status: Option<String>,
}

impl FileFilter {
    pub fn new<I, S>(formats: I, assembly: Option<String>, status: Option<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            formats: formats
                .into_iter()
                .map(|format| format.as_ref().trim().to_lowercase())
                .filter(|format| !format.is_empty())
                .collect(),
            assembly: assembly.filter(|value| !value.trim().is_empty()),
            status: status.filter(|value| !value.trim().is_empty()),
        }
    }

    /// Raw reads are assembly independent, so the assembly filter skips FASTQ.
    pub fn accepts(&self, file: &Value) -> bool {
        let fields = Fields::new(file);
        if let Some(status) = &self.status {
            if fields.get("status").text() != *status {
                return false;
            }
        }
        let format = fields.get("file_format").text().to_lowercase();
        if !self.formats.is_empty() && !self.formats.contains(&format) {
            return false;
        }
        if let Some(assembly) = &self.assembly {
            if format != "fastq" && fields.get("assembly").text() != *assembly {
                return false;
            }
        }
        true
    }
}

pub fn collect_files<'a>(experiment: &'a Value, filter: &FileFilter) -> Vec<&'a Value> {
    Fields::new(experiment)
        .get("files")
        .items()
        .iter()
        .filter(|file| filter.accepts(file))
        .collect()
}

/// Whether an experiment is flattened as a case (with its matched controls)
/// or as a control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Case { matched_controls: String },
    Control,
}

impl Role {
    pub fn case(controls: &[String]) -> Self {
        Role::Case {
            matched_controls: controls.join(","),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub experiment_accession: String,
    pub is_control: bool,
    pub matched_control_experiments: String,
    pub control_type: String,
    pub assay_title: String,
    pub description: String,
    pub lab: String,
    pub award: String,
    pub date_released: String,
    pub status_exp: String,
    pub dbxrefs: String,
    pub life_stage_age: String,
    pub perturbed: String,
    pub donor_accession: String,
    pub donor_sex: String,
    pub donor_life_stage: String,
    pub donor_age: String,
    pub donor_age_units: String,
    pub donor_ethnicity: String,
    pub organism: String,
    pub biosample_term_id: String,
    pub biosample_term_name: String,
    pub classification: String,
    pub organ_slims: String,
    pub cell_slims: String,
    pub developmental_slims: String,
    pub system_slims: String,
    pub biosample_synonyms: String,
    pub target_label: String,
    pub target_title: String,
    pub file_accession: String,
    pub file_format: String,
    pub output_type: String,
    pub assembly: String,
    pub run_type: String,
    pub paired_end: String,
    pub paired_accession: String,
    pub md5sum: String,
    pub file_status: String,
    pub file_size: String,
    pub platform: String,
    pub bio_replicate_count: String,
    pub tech_replicate_count: String,
    pub biological_replicates: String,
    pub technical_replicates: String,
    pub biological_replicates_formatted: String,
    pub replication_type: String,
    pub url: String,
}

impl FileRecord {
    pub const COLUMNS: [&'static str; 48] = [
        "experiment_accession",
        "is_control",
        "matched_control_experiments",
        "control_type",
        "assay_title",
        "description",
        "lab",
        "award",
        "date_released",
        "status_exp",
        "dbxrefs",
        "life_stage_age",
        "perturbed",
        "donor_accession",
        "donor_sex",
        "donor_life_stage",
        "donor_age",
        "donor_age_units",
        "donor_ethnicity",
        "organism",
        "biosample_term_id",
        "biosample_term_name",
        "classification",
        "organ_slims",
        "cell_slims",
        "developmental_slims",
        "system_slims",
        "biosample_synonyms",
        "target_label",
        "target_title",
        "file_accession",
        "file_format",
        "output_type",
        "assembly",
        "run_type",
        "paired_end",
        "paired_accession",
        "md5sum",
        "file_status",
        "file_size",
        "platform",
        "bio_replicate_count",
        "tech_replicate_count",
        "biological_replicates",
        "technical_replicates",
        "biological_replicates_formatted",
        "replication_type",
        "url",
    ];

    pub fn build(file: &Value, experiment: &Value, role: &Role, base_url: &str) -> Self {
        let exp = Fields::new(experiment);
        let file = Fields::new(file);
        let target = exp.get("target");
        let biosample = exp.get("biosample_ontology");
        let donor = exp
            .get("replicates")
            .first()
            .get("library")
            .get("biosample")
            .get("donor");

        let (is_control, matched_control_experiments) = match role {
            Role::Case { matched_controls } => (false, matched_controls.clone()),
            Role::Control => (true, String::new()),
        };

        let paired_accession = reference_accession(file.get("paired_with").raw())
            .unwrap_or_default();
        let href = file.get("href").text();
        let url = if href.starts_with('/') {
            format!("{}{}", base_url.trim_end_matches('/'), href)
        } else {
            href
        };

        Self {
            experiment_accession: exp.get("accession").text(),
            is_control,
            matched_control_experiments,
            control_type: exp.get("control_type").text(),
            assay_title: exp.get("assay_title").text(),
            description: exp.get("biosample_summary").text(),
            lab: exp.get("lab").get("title").text(),
            award: exp.get("award").get("rfa").text(),
            date_released: exp.get("date_released").text(),
            status_exp: exp.get("status").text(),
            dbxrefs: exp.get("dbxrefs").joined(","),
            life_stage_age: exp.get("life_stage_age").text(),
            perturbed: exp.get("perturbed").text(),
            donor_accession: donor.get("accession").text(),
            donor_sex: donor.get("sex").text(),
            donor_life_stage: donor.get("life_stage").text(),
            donor_age: donor.get("age").text(),
            donor_age_units: donor.get("age_units").text(),
            donor_ethnicity: donor.get("ethnicity").joined(", "),
            organism: donor.get("organism").get("scientific_name").text(),
            biosample_term_id: biosample.get("term_id").text(),
            biosample_term_name: biosample.get("term_name").text(),
            classification: biosample.get("classification").text(),
            organ_slims: biosample.get("organ_slims").joined(","),
            cell_slims: biosample.get("cell_slims").joined(","),
            developmental_slims: biosample.get("developmental_slims").joined(","),
            system_slims: biosample.get("system_slims").joined(","),
            biosample_synonyms: biosample.get("synonyms").joined(","),
            target_label: target.get("label").text(),
            target_title: target.get("title").text(),
            file_accession: file.get("accession").text(),
            file_format: file.get("file_format").text(),
            output_type: file.get("output_type").text(),
            assembly: file.get("assembly").text(),
            run_type: file.get("run_type").text(),
            paired_end: file.get("paired_end").text(),
            paired_accession,
            md5sum: file.get("md5sum").text(),
            file_status: file.get("status").text(),
            file_size: file.get("file_size").text(),
            platform: file.get("platform").get("term_name").text(),
            bio_replicate_count: exp.get("bio_replicate_count").text(),
            tech_replicate_count: exp.get("tech_replicate_count").text(),
            biological_replicates: file.get("biological_replicates").joined(","),
            technical_replicates: file.get("technical_replicates").joined(","),
            biological_replicates_formatted: file.get("biological_replicates_formatted").text(),
            replication_type: exp.get("replication_type").text(),
            url,
        }
    }

    /// Cell values in [`FileRecord::COLUMNS`] order.
    pub fn values(&self) -> Vec<String> {
        vec![
            self.experiment_accession.clone(),
            self.is_control.to_string(),
            self.matched_control_experiments.clone(),
            self.control_type.clone(),
            self.assay_title.clone(),
            self.description.clone(),
            self.lab.clone(),
            self.award.clone(),
            self.date_released.clone(),
            self.status_exp.clone(),
            self.dbxrefs.clone(),
            self.life_stage_age.clone(),
            self.perturbed.clone(),
            self.donor_accession.clone(),
            self.donor_sex.clone(),
            self.donor_life_stage.clone(),
            self.donor_age.clone(),
            self.donor_age_units.clone(),
            self.donor_ethnicity.clone(),
            self.organism.clone(),
            self.biosample_term_id.clone(),
            self.biosample_term_name.clone(),
            self.classification.clone(),
            self.organ_slims.clone(),
            self.cell_slims.clone(),
            self.developmental_slims.clone(),
            self.system_slims.clone(),
            self.biosample_synonyms.clone(),
            self.target_label.clone(),
            self.target_title.clone(),
            self.file_accession.clone(),
            self.file_format.clone(),
            self.output_type.clone(),
            self.assembly.clone(),
            self.run_type.clone(),
            self.paired_end.clone(),
            self.paired_accession.clone(),
            self.md5sum.clone(),
            self.file_status.clone(),
            self.file_size.clone(),
            self.platform.clone(),
            self.bio_replicate_count.clone(),
            self.tech_replicate_count.clone(),
            self.biological_replicates.clone(),
            self.technical_replicates.clone(),
            self.biological_replicates_formatted.clone(),
            self.replication_type.clone(),
            self.url.clone(),
        ]
    }

    pub fn is_fastq(&self) -> bool {
        self.file_format.trim().eq_ignore_ascii_case("fastq")
    }
}

pub fn flatten_experiment(
    experiment: &Value,
    filter: &FileFilter,
    role: &Role,
    base_url: &str,
) -> Vec<FileRecord> {
    collect_files(experiment, filter)
        .into_iter()
        .map(|file| FileRecord::build(file, experiment, role, base_url))
        .collect()
}

/// Assembly order: cases before controls, then experiment, then file.
pub fn sort_records(records: &mut [FileRecord]) {
    records.sort_by(|a, b| {
        (a.is_control, &a.experiment_accession, &a.file_accession).cmp(&(
            b.is_control,
            &b.experiment_accession,
            &b.file_accession,
        ))
    });
}
