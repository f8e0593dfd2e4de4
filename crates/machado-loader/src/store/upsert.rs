//! Create-or-fetch on natural keys
//!
//! Two workers may miss the same key and both insert. The loser gets
//! `StoreError::Duplicate` back and re-reads the winner's row. A duplicate
//! that cannot be re-read was caused by some other constraint and is reported
//! as a conflict.

use super::Store;
use crate::error::{IngestError, Result, StoreError};
use crate::models::*;
use tracing::debug;

/// Attempts for a featureprop append before a rank collision is reported
pub const MAX_RANK_RETRIES: usize = 5;

/// Db holding the accessions of terms created on demand
pub const INTERNAL_DB: &str = "internal";

fn refetched<T>(row: Option<T>, entity: &str, key: &str) -> Result<T> {
    row.ok_or_else(|| {
        IngestError::Conflict(format!(
            "{} '{}' collides with an existing row under a different key",
            entity, key
        ))
    })
}

/// Returns the organism and whether this call created it
pub async fn ensure_organism(store: &dyn Store, organism: &NewOrganism) -> Result<(Organism, bool)> {
    let infra = organism.infraspecific_name.as_deref();
    if let Some(found) = store
        .find_organism(&organism.genus, &organism.species, infra)
        .await?
    {
        return Ok((found, false));
    }

    match store.insert_organism(organism).await {
        Ok(created) => Ok((created, true)),
        Err(err) if err.is_duplicate() => {
            debug!(genus = %organism.genus, species = %organism.species, "Organism insert raced, re-fetching");
            let found = store
                .find_organism(&organism.genus, &organism.species, infra)
                .await?;
            Ok((refetched(found, "organism", &organism.species)?, false))
        },
        Err(err) => Err(err.into()),
    }
}

pub async fn ensure_cv(store: &dyn Store, name: &str) -> Result<Cv> {
    if let Some(cv) = store.find_cv(name).await? {
        return Ok(cv);
    }
    match store.insert_cv(name, None).await {
        Ok(cv) => Ok(cv),
        Err(err) if err.is_duplicate() => refetched(store.find_cv(name).await?, "cv", name),
        Err(err) => Err(err.into()),
    }
}

pub async fn ensure_db(store: &dyn Store, name: &str) -> Result<Db> {
    if let Some(db) = store.find_db(name).await? {
        return Ok(db);
    }
    match store.insert_db(name).await {
        Ok(db) => Ok(db),
        Err(err) if err.is_duplicate() => refetched(store.find_db(name).await?, "db", name),
        Err(err) => Err(err.into()),
    }
}

pub async fn ensure_dbxref(store: &dyn Store, dbxref: &NewDbxref) -> Result<Dbxref> {
    if let Some(found) = store.find_dbxref(dbxref.db_id, &dbxref.accession).await? {
        return Ok(found);
    }
    match store.insert_dbxref(dbxref).await {
        Ok(created) => Ok(created),
        Err(err) if err.is_duplicate() => refetched(
            store.find_dbxref(dbxref.db_id, &dbxref.accession).await?,
            "dbxref",
            &dbxref.accession,
        ),
        Err(err) => Err(err.into()),
    }
}

/// Ensure `db:accession`, creating the db as needed
pub async fn ensure_dbxref_ref(store: &dyn Store, xref: &DbxrefRef) -> Result<Dbxref> {
    let db = ensure_db(store, &xref.db).await?;
    ensure_dbxref(store, &NewDbxref::new(db.db_id, xref.accession.clone())).await
}

/// Fetch (cv, name) or insert `cvterm` as given
pub async fn ensure_cvterm(store: &dyn Store, cvterm: &NewCvterm) -> Result<Cvterm> {
    if let Some(found) = store.find_cvterm(cvterm.cv_id, &cvterm.name).await? {
        return Ok(found);
    }
    match store.insert_cvterm(cvterm).await {
        Ok(created) => Ok(created),
        Err(err) if err.is_duplicate() => refetched(
            store.find_cvterm(cvterm.cv_id, &cvterm.name).await?,
            "cvterm",
            &cvterm.name,
        ),
        Err(err) => Err(err.into()),
    }
}

/// Ensure a plain term in `cv`, identified by the `internal` db
pub async fn ensure_internal_term(store: &dyn Store, cv: &Cv, name: &str) -> Result<Cvterm> {
    if let Some(found) = store.find_cvterm(cv.cv_id, name).await? {
        return Ok(found);
    }
    let db = ensure_db(store, INTERNAL_DB).await?;
    let dbxref = ensure_dbxref(
        store,
        &NewDbxref::new(db.db_id, format!("{}:{}", cv.name, name)),
    )
    .await?;
    ensure_cvterm(
        store,
        &NewCvterm {
            cv_id: cv.cv_id,
            name: name.to_string(),
            dbxref_id: dbxref.dbxref_id,
            ..Default::default()
        },
    )
    .await
}

/// Append a property at the next rank, retrying when a sibling took it
pub async fn append_featureprop(
    store: &dyn Store,
    feature_id: i64,
    type_id: i64,
    value: &str,
) -> Result<Featureprop> {
    let mut last = None;
    for attempt in 1..=MAX_RANK_RETRIES {
        match store.insert_featureprop(feature_id, type_id, value).await {
            Ok(prop) => return Ok(prop),
            Err(err) if err.is_duplicate() => {
                debug!(feature_id, type_id, attempt, "Featureprop rank collision, retrying");
                last = Some(err);
            },
            Err(err) => return Err(err.into()),
        }
    }
    Err(last
        .unwrap_or_else(|| StoreError::duplicate("featureprop rank", feature_id.to_string()))
        .into())
}
