//! PostgreSQL store
//!
//! Natural-key inserts rely on the unique constraints of
//! `migrations/0001_chado_core.sql`; a violation comes back as
//! `StoreError::Duplicate` so callers can re-fetch. Link tables use
//! `ON CONFLICT DO NOTHING` and report whether a row was written.

use super::Store;
use crate::config::DatabaseConfig;
use crate::error::{StoreError, StoreResult};
use crate::models::*;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use std::time::Duration;
use tracing::info;

const FEATURE_COLUMNS: &str = "f.feature_id, f.organism_id, f.type_id, f.uniquename, f.name, \
     f.dbxref_id, f.residues, f.seqlen, f.md5checksum";

const HISTORY_COLUMNS: &str =
    "history_id, username, command, params, status, description, created_at, finished_at";

/// [`Store`] over a sqlx connection pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool sized by `config`, applying migrations when asked to
    pub async fn connect(config: &DatabaseConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Database connection pool created"
        );

        let store = Self::new(pool);
        if config.run_migrations {
            store.migrate().await?;
        }
        Ok(store)
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("Schema migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Error mapping
// ============================================================================

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .is_some_and(|db_err| db_err.is_foreign_key_violation())
}

/// Unique violations become `Duplicate`; everything else stays a database error
fn on_unique(entity: &'static str, key: String) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |error| {
        if is_unique_violation(&error) {
            StoreError::Duplicate { entity, key }
        } else {
            StoreError::Database(error)
        }
    }
}

/// Foreign-key violations on the feature column become `MissingRow`
fn on_missing_feature(feature_id: i64) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |error| {
        if is_foreign_key_violation(&error) {
            StoreError::MissingRow {
                entity: "feature",
                id: feature_id,
            }
        } else if is_unique_violation(&error) {
            StoreError::Duplicate {
                entity: "featureprop rank",
                key: feature_id.to_string(),
            }
        } else {
            StoreError::Database(error)
        }
    }
}

fn history_from_row(row: &PgRow) -> StoreResult<History> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<JobStatus>()
        .map_err(|e| StoreError::Database(sqlx::Error::Decode(e.into())))?;
    Ok(History {
        history_id: row.try_get("history_id")?,
        username: row.try_get("username")?,
        command: row.try_get("command")?,
        params: row.try_get("params")?,
        status,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    // ------------------------------------------------------------------
    // Organisms
    // ------------------------------------------------------------------

    async fn find_organism(
        &self,
        genus: &str,
        species: &str,
        infraspecific_name: Option<&str>,
    ) -> StoreResult<Option<Organism>> {
        let row = sqlx::query_as::<_, Organism>(
            "SELECT organism_id, genus, species, infraspecific_name, abbreviation, common_name, comment
             FROM organism
             WHERE genus = $1 AND species = $2 AND infraspecific_name IS NOT DISTINCT FROM $3",
        )
        .bind(genus)
        .bind(species)
        .bind(infraspecific_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_organism(&self, organism: &NewOrganism) -> StoreResult<Organism> {
        sqlx::query_as::<_, Organism>(
            "INSERT INTO organism (genus, species, infraspecific_name, abbreviation, common_name, comment)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING organism_id, genus, species, infraspecific_name, abbreviation, common_name, comment",
        )
        .bind(&organism.genus)
        .bind(&organism.species)
        .bind(&organism.infraspecific_name)
        .bind(&organism.abbreviation)
        .bind(&organism.common_name)
        .bind(&organism.comment)
        .fetch_one(&self.pool)
        .await
        .map_err(on_unique(
            "organism",
            format!("{} {}", organism.genus, organism.species),
        ))
    }

    // ------------------------------------------------------------------
    // Vocabularies, databases, terms
    // ------------------------------------------------------------------

    async fn find_cv(&self, name: &str) -> StoreResult<Option<Cv>> {
        Ok(
            sqlx::query_as::<_, Cv>("SELECT cv_id, name, definition FROM cv WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn insert_cv(&self, name: &str, definition: Option<&str>) -> StoreResult<Cv> {
        sqlx::query_as::<_, Cv>(
            "INSERT INTO cv (name, definition) VALUES ($1, $2) RETURNING cv_id, name, definition",
        )
        .bind(name)
        .bind(definition)
        .fetch_one(&self.pool)
        .await
        .map_err(on_unique("cv", name.to_string()))
    }

    async fn find_db(&self, name: &str) -> StoreResult<Option<Db>> {
        Ok(sqlx::query_as::<_, Db>("SELECT db_id, name FROM db WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn insert_db(&self, name: &str) -> StoreResult<Db> {
        sqlx::query_as::<_, Db>("INSERT INTO db (name) VALUES ($1) RETURNING db_id, name")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(on_unique("db", name.to_string()))
    }

    async fn find_dbxref(&self, db_id: i64, accession: &str) -> StoreResult<Option<Dbxref>> {
        Ok(sqlx::query_as::<_, Dbxref>(
            "SELECT dbxref_id, db_id, accession, description, url
             FROM dbxref WHERE db_id = $1 AND accession = $2",
        )
        .bind(db_id)
        .bind(accession)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert_dbxref(&self, dbxref: &NewDbxref) -> StoreResult<Dbxref> {
        sqlx::query_as::<_, Dbxref>(
            "INSERT INTO dbxref (db_id, accession, description, url) VALUES ($1, $2, $3, $4)
             RETURNING dbxref_id, db_id, accession, description, url",
        )
        .bind(dbxref.db_id)
        .bind(&dbxref.accession)
        .bind(&dbxref.description)
        .bind(&dbxref.url)
        .fetch_one(&self.pool)
        .await
        .map_err(on_unique("dbxref", dbxref.accession.clone()))
    }

    async fn find_cvterm(&self, cv_id: i64, name: &str) -> StoreResult<Option<Cvterm>> {
        Ok(sqlx::query_as::<_, Cvterm>(
            "SELECT cvterm_id, cv_id, name, definition, dbxref_id, is_obsolete, is_relationshiptype
             FROM cvterm WHERE cv_id = $1 AND name = $2",
        )
        .bind(cv_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert_cvterm(&self, cvterm: &NewCvterm) -> StoreResult<Cvterm> {
        sqlx::query_as::<_, Cvterm>(
            "INSERT INTO cvterm (cv_id, name, definition, dbxref_id, is_obsolete, is_relationshiptype)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING cvterm_id, cv_id, name, definition, dbxref_id, is_obsolete, is_relationshiptype",
        )
        .bind(cvterm.cv_id)
        .bind(&cvterm.name)
        .bind(&cvterm.definition)
        .bind(cvterm.dbxref_id)
        .bind(cvterm.is_obsolete)
        .bind(cvterm.is_relationshiptype)
        .fetch_one(&self.pool)
        .await
        .map_err(on_unique("cvterm", cvterm.name.clone()))
    }

    async fn insert_cvterm_dbxref(&self, cvterm_id: i64, dbxref_id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO cvterm_dbxref (cvterm_id, dbxref_id) VALUES ($1, $2)
             ON CONFLICT (cvterm_id, dbxref_id) DO NOTHING",
        )
        .bind(cvterm_id)
        .bind(dbxref_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_cvterm_relationship(
        &self,
        type_id: i64,
        subject_id: i64,
        object_id: i64,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO cvterm_relationship (type_id, subject_id, object_id) VALUES ($1, $2, $3)
             ON CONFLICT (type_id, subject_id, object_id) DO NOTHING",
        )
        .bind(type_id)
        .bind(subject_id)
        .bind(object_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Features
    // ------------------------------------------------------------------

    async fn find_features(
        &self,
        organism_id: i64,
        key: FeatureKey<'_>,
        type_id: Option<i64>,
    ) -> StoreResult<Vec<Feature>> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM feature f WHERE f.organism_id = ", FEATURE_COLUMNS));
        query.push_bind(organism_id);

        match key {
            FeatureKey::Uniquename(value) => {
                query.push(" AND f.uniquename = ").push_bind(value);
            },
            FeatureKey::Name(value) => {
                query.push(" AND f.name = ").push_bind(value);
            },
            FeatureKey::DbxrefAccession(value) => {
                query
                    .push(
                        " AND (EXISTS (SELECT 1 FROM dbxref x \
                         WHERE x.dbxref_id = f.dbxref_id AND x.accession = ",
                    )
                    .push_bind(value)
                    .push(
                        ") OR EXISTS (SELECT 1 FROM feature_dbxref fd \
                         JOIN dbxref x ON x.dbxref_id = fd.dbxref_id \
                         WHERE fd.feature_id = f.feature_id AND x.accession = ",
                    )
                    .push_bind(value)
                    .push("))");
            },
        }

        if let Some(type_id) = type_id {
            query.push(" AND f.type_id = ").push_bind(type_id);
        }

        Ok(query
            .build_query_as::<Feature>()
            .fetch_all(&self.pool)
            .await?)
    }

    async fn insert_feature(&self, feature: &NewFeature) -> StoreResult<Feature> {
        sqlx::query_as::<_, Feature>(&format!(
            "INSERT INTO feature AS f (organism_id, type_id, uniquename, name, dbxref_id, residues, seqlen, md5checksum)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {}",
            FEATURE_COLUMNS
        ))
        .bind(feature.organism_id)
        .bind(feature.type_id)
        .bind(&feature.uniquename)
        .bind(&feature.name)
        .bind(feature.dbxref_id)
        .bind(&feature.residues)
        .bind(feature.seqlen())
        .bind(&feature.md5checksum)
        .fetch_one(&self.pool)
        .await
        .map_err(on_unique("feature", feature.uniquename.clone()))
    }

    async fn update_feature_residues(
        &self,
        feature_id: i64,
        residues: &str,
        md5checksum: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE feature SET residues = $2, seqlen = $3, md5checksum = $4 WHERE feature_id = $1",
        )
        .bind(feature_id)
        .bind(residues)
        .bind(residues.len() as i64)
        .bind(md5checksum)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRow {
                entity: "feature",
                id: feature_id,
            });
        }
        Ok(())
    }

    async fn insert_featureloc(&self, loc: &Featureloc) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO featureloc (feature_id, srcfeature_id, fmin, fmax, strand, phase, locgroup, rank)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(loc.feature_id)
        .bind(loc.srcfeature_id)
        .bind(loc.fmin)
        .bind(loc.fmax)
        .bind(loc.strand)
        .bind(loc.phase)
        .bind(loc.locgroup)
        .bind(loc.rank)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::duplicate(
                    "featureloc",
                    format!("{}/{}/{}", loc.feature_id, loc.locgroup, loc.rank),
                )
            } else {
                on_missing_feature(loc.feature_id)(e)
            }
        })?;
        Ok(())
    }

    async fn insert_featureprop(
        &self,
        feature_id: i64,
        type_id: i64,
        value: &str,
    ) -> StoreResult<Featureprop> {
        sqlx::query_as::<_, Featureprop>(
            "INSERT INTO featureprop (feature_id, type_id, value, rank)
             SELECT $1, $2, $3, COALESCE(MAX(rank) + 1, 0)
             FROM featureprop WHERE feature_id = $1 AND type_id = $2
             RETURNING featureprop_id, feature_id, type_id, value, rank",
        )
        .bind(feature_id)
        .bind(type_id)
        .bind(value)
        .fetch_one(&self.pool)
        .await
        .map_err(on_missing_feature(feature_id))
    }

    async fn delete_featureprops(&self, feature_id: i64, type_id: i64) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM featureprop WHERE feature_id = $1 AND type_id = $2")
            .bind(feature_id)
            .bind(type_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_feature_relationship(&self, rel: &FeatureRelationship) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO feature_relationship (subject_id, object_id, type_id) VALUES ($1, $2, $3)
             ON CONFLICT (subject_id, object_id, type_id) DO NOTHING",
        )
        .bind(rel.subject_id)
        .bind(rel.object_id)
        .bind(rel.type_id)
        .execute(&self.pool)
        .await
        .map_err(on_missing_feature(rel.object_id))?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_feature_dbxref(&self, feature_id: i64, dbxref_id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO feature_dbxref (feature_id, dbxref_id) VALUES ($1, $2)
             ON CONFLICT (feature_id, dbxref_id) DO NOTHING",
        )
        .bind(feature_id)
        .bind(dbxref_id)
        .execute(&self.pool)
        .await
        .map_err(on_missing_feature(feature_id))?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // Publications
    // ------------------------------------------------------------------

    async fn find_pub(&self, uniquename: &str) -> StoreResult<Option<Pub>> {
        Ok(sqlx::query_as::<_, Pub>(
            "SELECT pub_id, uniquename, type_id, title, pyear, volume, series_name, pages
             FROM pub WHERE uniquename = $1",
        )
        .bind(uniquename)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_pub_by_doi(&self, doi: &str) -> StoreResult<Option<Pub>> {
        Ok(sqlx::query_as::<_, Pub>(
            "SELECT p.pub_id, p.uniquename, p.type_id, p.title, p.pyear, p.volume, p.series_name, p.pages
             FROM pub p
             JOIN pub_dbxref pd ON pd.pub_id = p.pub_id
             JOIN dbxref x ON x.dbxref_id = pd.dbxref_id
             JOIN db ON db.db_id = x.db_id
             WHERE db.name = 'DOI' AND x.accession = $1
             LIMIT 1",
        )
        .bind(doi)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn insert_pub(&self, publication: &NewPub) -> StoreResult<Pub> {
        sqlx::query_as::<_, Pub>(
            "INSERT INTO pub (uniquename, type_id, title, pyear, volume, series_name, pages)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING pub_id, uniquename, type_id, title, pyear, volume, series_name, pages",
        )
        .bind(&publication.uniquename)
        .bind(publication.type_id)
        .bind(&publication.title)
        .bind(&publication.pyear)
        .bind(&publication.volume)
        .bind(&publication.series_name)
        .bind(&publication.pages)
        .fetch_one(&self.pool)
        .await
        .map_err(on_unique("pub", publication.uniquename.clone()))
    }

    async fn insert_pub_dbxref(&self, pub_id: i64, dbxref_id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO pub_dbxref (pub_id, dbxref_id) VALUES ($1, $2)
             ON CONFLICT (pub_id, dbxref_id) DO NOTHING",
        )
        .bind(pub_id)
        .bind(dbxref_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_pubauthor(&self, author: &Pubauthor) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO pubauthor (pub_id, rank, surname, givennames) VALUES ($1, $2, $3, $4)
             ON CONFLICT (pub_id, rank) DO NOTHING",
        )
        .bind(author.pub_id)
        .bind(author.rank)
        .bind(&author.surname)
        .bind(&author.givennames)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_feature_pub(&self, feature_id: i64, pub_id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO feature_pub (feature_id, pub_id) VALUES ($1, $2)
             ON CONFLICT (feature_id, pub_id) DO NOTHING",
        )
        .bind(feature_id)
        .bind(pub_id)
        .execute(&self.pool)
        .await
        .map_err(on_missing_feature(feature_id))?;
        Ok(result.rows_affected() > 0)
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    async fn insert_history(&self, history: &NewHistory) -> StoreResult<History> {
        let row = sqlx::query(&format!(
            "INSERT INTO history (username, command, params, status)
             VALUES ($1, $2, $3, 'started')
             RETURNING {}",
            HISTORY_COLUMNS
        ))
        .bind(&history.username)
        .bind(&history.command)
        .bind(&history.params)
        .fetch_one(&self.pool)
        .await?;
        history_from_row(&row)
    }

    async fn finish_history(
        &self,
        history_id: i64,
        status: JobStatus,
        description: &str,
    ) -> StoreResult<History> {
        // the status guard makes the terminal transition happen at most once
        let row = sqlx::query(&format!(
            "UPDATE history SET status = $2, description = $3, finished_at = NOW()
             WHERE history_id = $1 AND status = 'started'
             RETURNING {}",
            HISTORY_COLUMNS
        ))
        .bind(history_id)
        .bind(status.as_str())
        .bind(description)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => history_from_row(&row),
            None => {
                let current: Option<String> =
                    sqlx::query_scalar("SELECT status FROM history WHERE history_id = $1")
                        .bind(history_id)
                        .fetch_optional(&self.pool)
                        .await?;
                match current {
                    Some(current) => Err(StoreError::Conflict(format!(
                        "history {} already finished with status {}",
                        history_id, current
                    ))),
                    None => Err(StoreError::MissingRow {
                        entity: "history",
                        id: history_id,
                    }),
                }
            },
        }
    }
}
