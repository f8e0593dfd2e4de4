//! Organism registration

use crate::error::{IngestError, Result};
use crate::models::{NewOrganism, Organism};
use crate::store::{upsert, Store};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Parameters of an organism registration, as submitted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganismRequest {
    pub genus: String,
    pub species: String,
    pub infraspecific_name: Option<String>,
    pub abbreviation: Option<String>,
    pub common_name: Option<String>,
    pub comment: Option<String>,
}

impl OrganismRequest {
    pub fn new(genus: impl Into<String>, species: impl Into<String>) -> Self {
        Self {
            genus: genus.into(),
            species: species.into(),
            ..Default::default()
        }
    }

    /// Normalised insert row; genus and species must be single words
    pub fn to_new_organism(&self) -> Result<NewOrganism> {
        for (field, value) in [("genus", &self.genus), ("species", &self.species)] {
            let words = value.split_whitespace().count();
            if words != 1 {
                return Err(IngestError::Validation(format!(
                    "{} must be a single word, got '{}'",
                    field, value
                )));
            }
        }

        let optional = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let mut organism = NewOrganism::new(&self.genus, &self.species)
            .with_infraspecific_name(self.infraspecific_name.as_deref());
        organism.abbreviation = optional(&self.abbreviation);
        organism.common_name = optional(&self.common_name);
        organism.comment = optional(&self.comment);
        Ok(organism)
    }
}

/// Create-or-fetch; returns the row and whether it was created now.
///
/// An existing organism is returned unchanged even when the request carries
/// different optional fields.
pub async fn insert_organism(store: &dyn Store, request: &OrganismRequest) -> Result<(Organism, bool)> {
    let organism = request.to_new_organism()?;
    let (row, created) = upsert::ensure_organism(store, &organism).await?;
    if created {
        info!(organism = %row.scientific_name(), id = row.organism_id, "Organism registered");
    } else {
        info!(organism = %row.scientific_name(), id = row.organism_id, "Organism already registered");
    }
    Ok((row, created))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_insert_normalises_and_is_idempotent() {
        let store = MemoryStore::new();
        let request = OrganismRequest {
            common_name: Some("  human ".into()),
            ..OrganismRequest::new("homo", "SAPIENS")
        };

        let (first, created) = insert_organism(&store, &request).await.unwrap();
        assert!(created);
        assert_eq!(first.genus, "Homo");
        assert_eq!(first.species, "sapiens");
        assert_eq!(first.common_name.as_deref(), Some("human"));

        let (second, created) = insert_organism(&store, &OrganismRequest::new("Homo", "sapiens"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.organism_id, second.organism_id);
    }

    #[tokio::test]
    async fn test_infraspecific_name_distinguishes_rows() {
        let store = MemoryStore::new();
        let strain = OrganismRequest {
            infraspecific_name: Some("K-12".into()),
            ..OrganismRequest::new("Escherichia", "coli")
        };
        insert_organism(&store, &OrganismRequest::new("Escherichia", "coli"))
            .await
            .unwrap();
        let (_, created) = insert_organism(&store, &strain).await.unwrap();
        assert!(created);
        assert_eq!(store.snapshot().await.organisms.len(), 2);
    }

    #[test]
    fn test_multi_word_genus_is_rejected() {
        let err = OrganismRequest::new("Homo sapiens", "sapiens")
            .to_new_organism()
            .unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
        assert!(OrganismRequest::new("", "sapiens").to_new_organism().is_err());
    }
}
