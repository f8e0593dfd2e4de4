//! Format-specific loaders
//!
//! Each loader is built once per job with its resolved context (organism,
//! terms, publication) and then called once per record from the engine's
//! workers. Loaders share the per-job [`ReferenceCache`](crate::cache::ReferenceCache)
//! and the store; they hold no other mutable state.

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod feature;
pub mod ontology;
pub mod organism;
pub mod publication;
pub mod sequence;

pub use feature::{FeatureLoader, FeatureLoaderOptions};
pub use ontology::OntologyLoader;
pub use publication::PublicationLoader;
pub use sequence::{SequenceLoader, SequenceLoaderOptions};

/// What one record did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    /// Already present; nothing written
    Skipped,
}

/// One unit of work per input record
#[async_trait]
pub trait RecordLoader: Send + Sync + 'static {
    type Record: Send + 'static;

    async fn load_record(&self, record: Self::Record) -> Result<Outcome>;
}

/// How a job treats features it cannot resolve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotFoundPolicy {
    /// First unresolved feature fails the job
    #[default]
    Fail,
    /// Unresolved names are listed in the report; the job continues
    Collect,
}

impl NotFoundPolicy {
    pub fn from_ignore_flag(ignore_not_found: bool) -> Self {
        if ignore_not_found {
            NotFoundPolicy::Collect
        } else {
            NotFoundPolicy::Fail
        }
    }
}

/// Order in which feature lookup strategies are tried
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureLookup {
    /// uniquename, then display name, then dbxref accession
    #[default]
    NameFirst,
    /// dbxref accession, then uniquename, then display name
    DbxrefFirst,
}

impl std::str::FromStr for FeatureLookup {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "name_first" | "name" => Ok(FeatureLookup::NameFirst),
            "dbxref_first" | "dbxref" => Ok(FeatureLookup::DbxrefFirst),
            other => Err(IngestError::Validation(format!(
                "unknown feature lookup order '{}'",
                other
            ))),
        }
    }
}

/// What happens to existing properties of the same type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyPolicy {
    #[default]
    Append,
    /// Delete existing values of the type before writing
    Replace,
}
