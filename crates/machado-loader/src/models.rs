//! Row types of the Chado subset written by the loaders
//!
//! `New*` structs carry the columns of an insert; the plain structs are rows
//! read back with their surrogate `id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Organism
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Organism {
    pub organism_id: i64,
    pub genus: String,
    pub species: String,
    pub infraspecific_name: Option<String>,
    pub abbreviation: Option<String>,
    pub common_name: Option<String>,
    pub comment: Option<String>,
}

impl Organism {
    /// Scientific name as written in job parameters ("Homo sapiens")
    pub fn scientific_name(&self) -> String {
        match &self.infraspecific_name {
            Some(infra) => format!("{} {} {}", self.genus, self.species, infra),
            None => format!("{} {}", self.genus, self.species),
        }
    }
}

/// Organism columns for insert, normalised on construction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrganism {
    pub genus: String,
    pub species: String,
    pub infraspecific_name: Option<String>,
    pub abbreviation: Option<String>,
    pub common_name: Option<String>,
    pub comment: Option<String>,
}

impl NewOrganism {
    /// Genus capitalised, species lower-cased, runs of whitespace collapsed.
    pub fn new(genus: &str, species: &str) -> Self {
        Self {
            genus: capitalize(&collapse_whitespace(genus)),
            species: collapse_whitespace(species).to_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_infraspecific_name(mut self, name: Option<&str>) -> Self {
        self.infraspecific_name = name
            .map(collapse_whitespace)
            .filter(|n| !n.is_empty());
        self
    }

    /// Parse "Genus species [infraspecific name]".
    ///
    /// Returns `None` when fewer than two words are present.
    pub fn parse_name(name: &str) -> Option<Self> {
        let collapsed = collapse_whitespace(name);
        let mut parts = collapsed.splitn(3, ' ');
        let genus = parts.next().filter(|g| !g.is_empty())?;
        let species = parts.next()?;
        Some(Self::new(genus, species).with_infraspecific_name(parts.next()))
    }
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

// ============================================================================
// Controlled vocabularies and cross-references
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cv {
    pub cv_id: i64,
    pub name: String,
    pub definition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Db {
    pub db_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Dbxref {
    pub dbxref_id: i64,
    pub db_id: i64,
    pub accession: String,
    pub description: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewDbxref {
    pub db_id: i64,
    pub accession: String,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl NewDbxref {
    pub fn new(db_id: i64, accession: impl Into<String>) -> Self {
        Self {
            db_id,
            accession: accession.into(),
            ..Default::default()
        }
    }
}

/// A `db:accession` reference as written in input files
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbxrefRef {
    pub db: String,
    pub accession: String,
}

impl DbxrefRef {
    /// Split at the first colon; both halves must be non-empty.
    pub fn parse(value: &str) -> Option<Self> {
        let (db, accession) = value.trim().split_once(':')?;
        let (db, accession) = (db.trim(), accession.trim());
        if db.is_empty() || accession.is_empty() {
            return None;
        }
        Some(Self {
            db: db.to_string(),
            accession: accession.to_string(),
        })
    }
}

impl std::fmt::Display for DbxrefRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.db, self.accession)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cvterm {
    pub cvterm_id: i64,
    pub cv_id: i64,
    pub name: String,
    pub definition: Option<String>,
    pub dbxref_id: i64,
    pub is_obsolete: bool,
    pub is_relationshiptype: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCvterm {
    pub cv_id: i64,
    pub name: String,
    pub definition: Option<String>,
    pub dbxref_id: i64,
    pub is_obsolete: bool,
    pub is_relationshiptype: bool,
}

// ============================================================================
// Features
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Feature {
    pub feature_id: i64,
    pub organism_id: i64,
    pub type_id: i64,
    pub uniquename: String,
    pub name: Option<String>,
    pub dbxref_id: Option<i64>,
    pub residues: Option<String>,
    pub seqlen: Option<i64>,
    pub md5checksum: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewFeature {
    pub organism_id: i64,
    pub type_id: i64,
    pub uniquename: String,
    pub name: Option<String>,
    pub dbxref_id: Option<i64>,
    pub residues: Option<String>,
    pub md5checksum: Option<String>,
}

impl NewFeature {
    pub fn seqlen(&self) -> Option<i64> {
        self.residues.as_ref().map(|r| r.len() as i64)
    }
}

/// Feature lookup keys, tried in the order set by `FeatureLookup`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKey<'a> {
    Uniquename(&'a str),
    Name(&'a str),
    /// Accession of the feature's primary or linked dbxref
    DbxrefAccession(&'a str),
}

impl FeatureKey<'_> {
    pub fn value(&self) -> &str {
        match self {
            FeatureKey::Uniquename(v) | FeatureKey::Name(v) | FeatureKey::DbxrefAccession(v) => v,
        }
    }
}

/// Interval of a feature on its source feature, 0-based half-open
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Featureloc {
    pub feature_id: i64,
    pub srcfeature_id: Option<i64>,
    pub fmin: i64,
    pub fmax: i64,
    pub strand: i16,
    pub phase: Option<i16>,
    pub locgroup: i32,
    pub rank: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Featureprop {
    pub featureprop_id: i64,
    pub feature_id: i64,
    pub type_id: i64,
    pub value: Option<String>,
    pub rank: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureRelationship {
    pub subject_id: i64,
    pub object_id: i64,
    pub type_id: i64,
}

// ============================================================================
// Publications
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Pub {
    pub pub_id: i64,
    pub uniquename: String,
    pub type_id: i64,
    pub title: Option<String>,
    pub pyear: Option<String>,
    pub volume: Option<String>,
    pub series_name: Option<String>,
    pub pages: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPub {
    pub uniquename: String,
    pub type_id: i64,
    pub title: Option<String>,
    pub pyear: Option<String>,
    pub volume: Option<String>,
    pub series_name: Option<String>,
    pub pages: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pubauthor {
    pub pub_id: i64,
    pub rank: i32,
    pub surname: String,
    pub givennames: Option<String>,
}

// ============================================================================
// History
// ============================================================================

/// Lifecycle of a ledger record; `Started` is the only non-terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Started,
    Success,
    Failure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Started => "started",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Started)
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "started" => Ok(JobStatus::Started),
            "success" => Ok(JobStatus::Success),
            "failure" => Ok(JobStatus::Failure),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub history_id: i64,
    pub username: String,
    pub command: String,
    pub params: serde_json::Value,
    pub status: JobStatus,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewHistory {
    pub username: String,
    pub command: String,
    pub params: serde_json::Value,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_organism_name_normalisation() {
        let org = NewOrganism::parse_name("  homo   SAPIENS ").unwrap();
        assert_eq!(org.genus, "Homo");
        assert_eq!(org.species, "sapiens");
        assert_eq!(org.infraspecific_name, None);

        let org = NewOrganism::parse_name("Oryza sativa  subsp. japonica").unwrap();
        assert_eq!(org.species, "sativa");
        assert_eq!(org.infraspecific_name.as_deref(), Some("subsp. japonica"));

        assert!(NewOrganism::parse_name("Homo").is_none());
        assert!(NewOrganism::parse_name("   ").is_none());
    }

    #[test]
    fn test_dbxref_ref_parse() {
        let xref = DbxrefRef::parse("GO:0008150").unwrap();
        assert_eq!(xref.db, "GO");
        assert_eq!(xref.accession, "0008150");
        assert_eq!(xref.to_string(), "GO:0008150");

        // accession keeps any further colons
        let xref = DbxrefRef::parse("URL:http://x.org").unwrap();
        assert_eq!(xref.accession, "http://x.org");

        assert!(DbxrefRef::parse("nocolon").is_none());
        assert!(DbxrefRef::parse(":123").is_none());
    }

    #[test]
    fn test_job_status_round_trip() {
        assert_eq!("failure".parse::<JobStatus>().unwrap(), JobStatus::Failure);
        assert!(JobStatus::Success.is_terminal());
        assert!(!JobStatus::Started.is_terminal());
        assert!("running".parse::<JobStatus>().is_err());
    }
}
