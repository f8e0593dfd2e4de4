//! Persistent store boundary
//!
//! Loaders talk to the schema only through [`Store`]. [`PgStore`] is the
//! PostgreSQL implementation; [`MemoryStore`] keeps the same tables and
//! uniqueness rules in process for tests and dry runs.
//!
//! Every `insert_*` that targets a natural key returns
//! [`StoreError::Duplicate`](crate::error::StoreError::Duplicate) when the key
//! already exists. Callers that want create-or-fetch go through [`upsert`],
//! which turns that error into a re-fetch.

use crate::error::StoreResult;
use crate::models::*;
use async_trait::async_trait;

pub mod memory;
pub mod postgres;
pub mod upsert;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    // ------------------------------------------------------------------
    // Organisms
    // ------------------------------------------------------------------

    async fn find_organism(
        &self,
        genus: &str,
        species: &str,
        infraspecific_name: Option<&str>,
    ) -> StoreResult<Option<Organism>>;

    async fn insert_organism(&self, organism: &NewOrganism) -> StoreResult<Organism>;

    // ------------------------------------------------------------------
    // Vocabularies, databases, terms
    // ------------------------------------------------------------------

    async fn find_cv(&self, name: &str) -> StoreResult<Option<Cv>>;

    async fn insert_cv(&self, name: &str, definition: Option<&str>) -> StoreResult<Cv>;

    async fn find_db(&self, name: &str) -> StoreResult<Option<Db>>;

    async fn insert_db(&self, name: &str) -> StoreResult<Db>;

    async fn find_dbxref(&self, db_id: i64, accession: &str) -> StoreResult<Option<Dbxref>>;

    async fn insert_dbxref(&self, dbxref: &NewDbxref) -> StoreResult<Dbxref>;

    async fn find_cvterm(&self, cv_id: i64, name: &str) -> StoreResult<Option<Cvterm>>;

    async fn insert_cvterm(&self, cvterm: &NewCvterm) -> StoreResult<Cvterm>;

    /// Attach an extra cross-reference; returns false if already attached.
    async fn insert_cvterm_dbxref(&self, cvterm_id: i64, dbxref_id: i64) -> StoreResult<bool>;

    /// Typed edge `subject -type-> object`; returns false if already present.
    async fn insert_cvterm_relationship(
        &self,
        type_id: i64,
        subject_id: i64,
        object_id: i64,
    ) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // Features
    // ------------------------------------------------------------------

    /// Features of one organism matching `key`, optionally of one type.
    async fn find_features(
        &self,
        organism_id: i64,
        key: FeatureKey<'_>,
        type_id: Option<i64>,
    ) -> StoreResult<Vec<Feature>>;

    /// Unique on (organism, uniquename, type).
    async fn insert_feature(&self, feature: &NewFeature) -> StoreResult<Feature>;

    async fn update_feature_residues(
        &self,
        feature_id: i64,
        residues: &str,
        md5checksum: &str,
    ) -> StoreResult<()>;

    async fn insert_featureloc(&self, loc: &Featureloc) -> StoreResult<()>;

    /// Append a property at the next free rank for (feature, type).
    ///
    /// A concurrent append may take the same rank; that surfaces as
    /// `Duplicate` and the caller retries.
    async fn insert_featureprop(
        &self,
        feature_id: i64,
        type_id: i64,
        value: &str,
    ) -> StoreResult<Featureprop>;

    /// Remove every property of one type from a feature; returns the count.
    async fn delete_featureprops(&self, feature_id: i64, type_id: i64) -> StoreResult<u64>;

    async fn insert_feature_relationship(&self, rel: &FeatureRelationship) -> StoreResult<bool>;

    async fn insert_feature_dbxref(&self, feature_id: i64, dbxref_id: i64) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // Publications
    // ------------------------------------------------------------------

    async fn find_pub(&self, uniquename: &str) -> StoreResult<Option<Pub>>;

    /// Publication linked to the dbxref `DOI:<doi>`.
    async fn find_pub_by_doi(&self, doi: &str) -> StoreResult<Option<Pub>>;

    async fn insert_pub(&self, publication: &NewPub) -> StoreResult<Pub>;

    async fn insert_pub_dbxref(&self, pub_id: i64, dbxref_id: i64) -> StoreResult<bool>;

    async fn insert_pubauthor(&self, author: &Pubauthor) -> StoreResult<bool>;

    async fn insert_feature_pub(&self, feature_id: i64, pub_id: i64) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    async fn insert_history(&self, history: &NewHistory) -> StoreResult<History>;

    /// Move a `started` record to a terminal status.
    ///
    /// Fails with `Conflict` when the record is already terminal.
    async fn finish_history(
        &self,
        history_id: i64,
        status: JobStatus,
        description: &str,
    ) -> StoreResult<History>;
}
