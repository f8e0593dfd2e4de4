//! FASTA sequence loader

use super::{Outcome, RecordLoader};
use crate::cache::ReferenceCache;
use crate::error::{IngestError, Result};
use crate::models::{Cvterm, Dbxref, FeatureKey, NewDbxref, NewFeature, Organism, Pub};
use crate::parser::FastaRecord;
use crate::store::upsert;
use async_trait::async_trait;
use machado_common::checksum::residues_md5;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Db recording which FASTA file a feature came from
pub const FASTA_SOURCE_DB: &str = "FASTA_SOURCE";

/// Vocabulary of feature types
pub const SEQUENCE_CV: &str = "sequence";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceLoaderOptions {
    /// File name (no directory), stored as the source accession
    pub filename: String,
    /// Sequence Ontology type of every feature, e.g. `chromosome`
    pub soterm: String,
    /// Create features without residues
    pub nosequence: bool,
    pub description: Option<String>,
    pub url: Option<String>,
    pub doi: Option<String>,
}

pub struct SequenceLoader {
    cache: Arc<ReferenceCache>,
    organism: Organism,
    feature_type: Cvterm,
    source: Dbxref,
    publication: Option<Pub>,
    nosequence: bool,
}

impl SequenceLoader {
    /// Resolve the shared context of a FASTA job.
    ///
    /// The type term and the DOI must already exist; either missing fails
    /// construction.
    pub async fn new(cache: Arc<ReferenceCache>, organism: Organism, options: SequenceLoaderOptions) -> Result<Self> {
        let feature_type = cache.resolve_ontology_term(SEQUENCE_CV, &options.soterm).await?;

        let publication = match options.doi.as_deref() {
            Some(doi) => Some(
                cache
                    .store()
                    .find_pub_by_doi(doi)
                    .await?
                    .ok_or_else(|| IngestError::not_found("publication", doi))?,
            ),
            None => None,
        };

        let db = cache.ensure_db(FASTA_SOURCE_DB).await?;
        let source = upsert::ensure_dbxref(
            cache.store(),
            &NewDbxref {
                db_id: db.db_id,
                accession: options.filename.clone(),
                description: options.description.clone(),
                url: options.url.clone(),
            },
        )
        .await?;

        info!(
            organism = %organism.scientific_name(),
            soterm = %options.soterm,
            file = %options.filename,
            nosequence = options.nosequence,
            "Sequence loader ready"
        );

        Ok(Self {
            cache,
            organism,
            feature_type,
            source,
            publication,
            nosequence: options.nosequence,
        })
    }

    async fn link(&self, feature_id: i64) -> Result<()> {
        let store = self.cache.store();
        store.insert_feature_dbxref(feature_id, self.source.dbxref_id).await?;
        if let Some(publication) = &self.publication {
            store.insert_feature_pub(feature_id, publication.pub_id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordLoader for SequenceLoader {
    type Record = FastaRecord;

    async fn load_record(&self, record: FastaRecord) -> Result<Outcome> {
        let store = self.cache.store();
        let existing = store
            .find_features(self.organism.organism_id, FeatureKey::Uniquename(&record.id), None)
            .await?;

        if existing.iter().any(|f| f.type_id == self.feature_type.cvterm_id) {
            debug!(feature = %record.id, "Feature already loaded");
            return Ok(Outcome::Skipped);
        }
        if !existing.is_empty() {
            return Err(IngestError::Conflict(format!(
                "feature '{}' already exists with a type other than '{}'",
                record.id, self.feature_type.name
            )));
        }

        let (residues, md5checksum) = if self.nosequence {
            (None, None)
        } else {
            let md5 = residues_md5(&record.sequence);
            (Some(record.sequence), Some(md5))
        };

        let feature = NewFeature {
            organism_id: self.organism.organism_id,
            type_id: self.feature_type.cvterm_id,
            uniquename: record.id,
            name: record.description,
            dbxref_id: None,
            residues,
            md5checksum,
        };

        match store.insert_feature(&feature).await {
            Ok(created) => {
                self.link(created.feature_id).await?;
                Ok(Outcome::Created)
            },
            // a sibling task loaded the same id
            Err(err) if err.is_duplicate() => Ok(Outcome::Skipped),
            Err(err) => Err(err.into()),
        }
    }
}
