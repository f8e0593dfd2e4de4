//! BibTeX publication loader

use super::{Outcome, RecordLoader};
use crate::cache::ReferenceCache;
use crate::error::Result;
use crate::models::{DbxrefRef, NewPub, Pub, Pubauthor};
use crate::parser::BibEntry;
use crate::store::upsert;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Vocabulary of publication types (`article`, `book`, ...)
pub const PUB_CV: &str = "pub";

/// Db under which DOIs are stored; DOI-bearing jobs look publications up here
pub const DOI_DB: &str = "DOI";

pub struct PublicationLoader {
    cache: Arc<ReferenceCache>,
}

impl PublicationLoader {
    pub async fn new(cache: Arc<ReferenceCache>) -> Result<Self> {
        cache.ensure_cv(PUB_CV).await?;
        cache.ensure_db(DOI_DB).await?;
        Ok(Self { cache })
    }

    async fn link_doi(&self, publication: &Pub, doi: &str) -> Result<()> {
        let store = self.cache.store();
        let dbxref = upsert::ensure_dbxref_ref(
            store,
            &DbxrefRef {
                db: DOI_DB.to_string(),
                accession: doi.to_string(),
            },
        )
        .await?;
        store.insert_pub_dbxref(publication.pub_id, dbxref.dbxref_id).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordLoader for PublicationLoader {
    type Record = BibEntry;

    async fn load_record(&self, entry: BibEntry) -> Result<Outcome> {
        let store = self.cache.store();
        let doi = entry.doi().map(str::to_string);
        // keyed by DOI when there is one
        let uniquename = doi.clone().unwrap_or_else(|| entry.key.clone());

        if let Some(doi) = doi.as_deref() {
            if store.find_pub_by_doi(doi).await?.is_some() {
                debug!(doi, "Publication already loaded");
                return Ok(Outcome::Skipped);
            }
        }
        if let Some(existing) = store.find_pub(&uniquename).await? {
            if let Some(doi) = doi.as_deref() {
                self.link_doi(&existing, doi).await?;
            }
            return Ok(Outcome::Skipped);
        }

        let pub_type = self.cache.ensure_term(PUB_CV, &entry.entry_type).await?;
        let new_pub = NewPub {
            uniquename: uniquename.clone(),
            type_id: pub_type.cvterm_id,
            title: entry.field("title").map(str::to_string),
            pyear: entry.field("year").map(str::to_string),
            volume: entry.field("volume").map(str::to_string),
            series_name: entry
                .field("journal")
                .or_else(|| entry.field("booktitle"))
                .map(str::to_string),
            pages: entry.field("pages").map(str::to_string),
        };

        let publication = match store.insert_pub(&new_pub).await {
            Ok(created) => created,
            Err(err) if err.is_duplicate() => return Ok(Outcome::Skipped),
            Err(err) => return Err(err.into()),
        };

        if let Some(doi) = doi.as_deref() {
            self.link_doi(&publication, doi).await?;
        }

        for (rank, (surname, givennames)) in entry.authors().into_iter().enumerate() {
            store
                .insert_pubauthor(&Pubauthor {
                    pub_id: publication.pub_id,
                    rank: rank as i32,
                    surname,
                    givennames,
                })
                .await?;
        }

        Ok(Outcome::Created)
    }
}
