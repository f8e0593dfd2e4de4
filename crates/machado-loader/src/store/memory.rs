//! In-process store with the same uniqueness rules as the schema

use super::Store;
use crate::error::{StoreError, StoreResult};
use crate::models::*;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

/// Every table of the in-memory store; cloned out by [`MemoryStore::snapshot`]
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub organisms: Vec<Organism>,
    pub cvs: Vec<Cv>,
    pub dbs: Vec<Db>,
    pub dbxrefs: Vec<Dbxref>,
    pub cvterms: Vec<Cvterm>,
    pub cvterm_dbxrefs: Vec<(i64, i64)>,
    /// (type, subject, object)
    pub cvterm_relationships: Vec<(i64, i64, i64)>,
    pub features: Vec<Feature>,
    pub featurelocs: Vec<Featureloc>,
    pub featureprops: Vec<Featureprop>,
    pub feature_relationships: Vec<FeatureRelationship>,
    pub feature_dbxrefs: Vec<(i64, i64)>,
    pub pubs: Vec<Pub>,
    pub pub_dbxrefs: Vec<(i64, i64)>,
    pub pubauthors: Vec<Pubauthor>,
    pub feature_pubs: Vec<(i64, i64)>,
    pub history: Vec<History>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn cv_named(&self, name: &str) -> Option<&Cv> {
        self.cvs.iter().find(|cv| cv.name == name)
    }

    /// Terms of the vocabulary called `cv`
    pub fn cvterms_in(&self, cv: &str) -> Vec<&Cvterm> {
        match self.cv_named(cv) {
            Some(cv) => self.cvterms.iter().filter(|t| t.cv_id == cv.cv_id).collect(),
            None => Vec::new(),
        }
    }

    pub fn cvterm(&self, cvterm_id: i64) -> Option<&Cvterm> {
        self.cvterms.iter().find(|t| t.cvterm_id == cvterm_id)
    }

    pub fn feature(&self, uniquename: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.uniquename == uniquename)
    }

    pub fn featureprops_of(&self, feature_id: i64) -> Vec<&Featureprop> {
        self.featureprops
            .iter()
            .filter(|p| p.feature_id == feature_id)
            .collect()
    }

    fn dbxref_accession(&self, dbxref_id: i64) -> Option<&str> {
        self.dbxrefs
            .iter()
            .find(|x| x.dbxref_id == dbxref_id)
            .map(|x| x.accession.as_str())
    }

    fn feature_has_accession(&self, feature: &Feature, accession: &str) -> bool {
        let primary = feature
            .dbxref_id
            .and_then(|id| self.dbxref_accession(id))
            .is_some_and(|a| a == accession);
        primary
            || self
                .feature_dbxrefs
                .iter()
                .filter(|(feature_id, _)| *feature_id == feature.feature_id)
                .any(|(_, dbxref_id)| self.dbxref_accession(*dbxref_id) == Some(accession))
    }

    fn require_feature(&self, feature_id: i64) -> StoreResult<()> {
        if self.features.iter().any(|f| f.feature_id == feature_id) {
            Ok(())
        } else {
            Err(StoreError::MissingRow {
                entity: "feature",
                id: feature_id,
            })
        }
    }
}

/// [`Store`] backed by plain vectors behind an async mutex
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every table, for assertions
    pub async fn snapshot(&self) -> Tables {
        self.tables.lock().await.clone()
    }
}

fn link(set: &mut Vec<(i64, i64)>, pair: (i64, i64)) -> bool {
    if set.contains(&pair) {
        false
    } else {
        set.push(pair);
        true
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_organism(
        &self,
        genus: &str,
        species: &str,
        infraspecific_name: Option<&str>,
    ) -> StoreResult<Option<Organism>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .organisms
            .iter()
            .find(|o| {
                o.genus == genus
                    && o.species == species
                    && o.infraspecific_name.as_deref() == infraspecific_name
            })
            .cloned())
    }

    async fn insert_organism(&self, organism: &NewOrganism) -> StoreResult<Organism> {
        let mut tables = self.tables.lock().await;
        let exists = tables.organisms.iter().any(|o| {
            o.genus == organism.genus
                && o.species == organism.species
                && o.infraspecific_name == organism.infraspecific_name
        });
        if exists {
            return Err(StoreError::duplicate(
                "organism",
                format!("{} {}", organism.genus, organism.species),
            ));
        }
        let row = Organism {
            organism_id: tables.next_id(),
            genus: organism.genus.clone(),
            species: organism.species.clone(),
            infraspecific_name: organism.infraspecific_name.clone(),
            abbreviation: organism.abbreviation.clone(),
            common_name: organism.common_name.clone(),
            comment: organism.comment.clone(),
        };
        tables.organisms.push(row.clone());
        Ok(row)
    }

    async fn find_cv(&self, name: &str) -> StoreResult<Option<Cv>> {
        Ok(self.tables.lock().await.cv_named(name).cloned())
    }

    async fn insert_cv(&self, name: &str, definition: Option<&str>) -> StoreResult<Cv> {
        let mut tables = self.tables.lock().await;
        if tables.cv_named(name).is_some() {
            return Err(StoreError::duplicate("cv", name));
        }
        let row = Cv {
            cv_id: tables.next_id(),
            name: name.to_string(),
            definition: definition.map(str::to_string),
        };
        tables.cvs.push(row.clone());
        Ok(row)
    }

    async fn find_db(&self, name: &str) -> StoreResult<Option<Db>> {
        let tables = self.tables.lock().await;
        Ok(tables.dbs.iter().find(|db| db.name == name).cloned())
    }

    async fn insert_db(&self, name: &str) -> StoreResult<Db> {
        let mut tables = self.tables.lock().await;
        if tables.dbs.iter().any(|db| db.name == name) {
            return Err(StoreError::duplicate("db", name));
        }
        let row = Db {
            db_id: tables.next_id(),
            name: name.to_string(),
        };
        tables.dbs.push(row.clone());
        Ok(row)
    }

    async fn find_dbxref(&self, db_id: i64, accession: &str) -> StoreResult<Option<Dbxref>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .dbxrefs
            .iter()
            .find(|x| x.db_id == db_id && x.accession == accession)
            .cloned())
    }

    async fn insert_dbxref(&self, dbxref: &NewDbxref) -> StoreResult<Dbxref> {
        let mut tables = self.tables.lock().await;
        if tables
            .dbxrefs
            .iter()
            .any(|x| x.db_id == dbxref.db_id && x.accession == dbxref.accession)
        {
            return Err(StoreError::duplicate("dbxref", dbxref.accession.clone()));
        }
        let row = Dbxref {
            dbxref_id: tables.next_id(),
            db_id: dbxref.db_id,
            accession: dbxref.accession.clone(),
            description: dbxref.description.clone(),
            url: dbxref.url.clone(),
        };
        tables.dbxrefs.push(row.clone());
        Ok(row)
    }

    async fn find_cvterm(&self, cv_id: i64, name: &str) -> StoreResult<Option<Cvterm>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .cvterms
            .iter()
            .find(|t| t.cv_id == cv_id && t.name == name)
            .cloned())
    }

    async fn insert_cvterm(&self, cvterm: &NewCvterm) -> StoreResult<Cvterm> {
        let mut tables = self.tables.lock().await;
        if tables
            .cvterms
            .iter()
            .any(|t| t.cv_id == cvterm.cv_id && t.name == cvterm.name)
        {
            return Err(StoreError::duplicate("cvterm", cvterm.name.clone()));
        }
        if tables.cvterms.iter().any(|t| t.dbxref_id == cvterm.dbxref_id) {
            return Err(StoreError::duplicate(
                "cvterm dbxref",
                cvterm.dbxref_id.to_string(),
            ));
        }
        let row = Cvterm {
            cvterm_id: tables.next_id(),
            cv_id: cvterm.cv_id,
            name: cvterm.name.clone(),
            definition: cvterm.definition.clone(),
            dbxref_id: cvterm.dbxref_id,
            is_obsolete: cvterm.is_obsolete,
            is_relationshiptype: cvterm.is_relationshiptype,
        };
        tables.cvterms.push(row.clone());
        Ok(row)
    }

    async fn insert_cvterm_dbxref(&self, cvterm_id: i64, dbxref_id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        Ok(link(&mut tables.cvterm_dbxrefs, (cvterm_id, dbxref_id)))
    }

    async fn insert_cvterm_relationship(
        &self,
        type_id: i64,
        subject_id: i64,
        object_id: i64,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        let edge = (type_id, subject_id, object_id);
        if tables.cvterm_relationships.contains(&edge) {
            return Ok(false);
        }
        tables.cvterm_relationships.push(edge);
        Ok(true)
    }

    async fn find_features(
        &self,
        organism_id: i64,
        key: FeatureKey<'_>,
        type_id: Option<i64>,
    ) -> StoreResult<Vec<Feature>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .features
            .iter()
            .filter(|f| f.organism_id == organism_id)
            .filter(|f| type_id.is_none_or(|t| f.type_id == t))
            .filter(|f| match key {
                FeatureKey::Uniquename(v) => f.uniquename == v,
                FeatureKey::Name(v) => f.name.as_deref() == Some(v),
                FeatureKey::DbxrefAccession(v) => tables.feature_has_accession(f, v),
            })
            .cloned()
            .collect())
    }

    async fn insert_feature(&self, feature: &NewFeature) -> StoreResult<Feature> {
        let mut tables = self.tables.lock().await;
        if tables.features.iter().any(|f| {
            f.organism_id == feature.organism_id
                && f.uniquename == feature.uniquename
                && f.type_id == feature.type_id
        }) {
            return Err(StoreError::duplicate("feature", feature.uniquename.clone()));
        }
        let row = Feature {
            feature_id: tables.next_id(),
            organism_id: feature.organism_id,
            type_id: feature.type_id,
            uniquename: feature.uniquename.clone(),
            name: feature.name.clone(),
            dbxref_id: feature.dbxref_id,
            residues: feature.residues.clone(),
            seqlen: feature.seqlen(),
            md5checksum: feature.md5checksum.clone(),
        };
        tables.features.push(row.clone());
        Ok(row)
    }

    async fn update_feature_residues(
        &self,
        feature_id: i64,
        residues: &str,
        md5checksum: &str,
    ) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        let feature = tables
            .features
            .iter_mut()
            .find(|f| f.feature_id == feature_id)
            .ok_or(StoreError::MissingRow {
                entity: "feature",
                id: feature_id,
            })?;
        feature.residues = Some(residues.to_string());
        feature.seqlen = Some(residues.len() as i64);
        feature.md5checksum = Some(md5checksum.to_string());
        Ok(())
    }

    async fn insert_featureloc(&self, loc: &Featureloc) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.require_feature(loc.feature_id)?;
        if tables
            .featurelocs
            .iter()
            .any(|l| l.feature_id == loc.feature_id && l.locgroup == loc.locgroup && l.rank == loc.rank)
        {
            return Err(StoreError::duplicate(
                "featureloc",
                format!("{}/{}/{}", loc.feature_id, loc.locgroup, loc.rank),
            ));
        }
        tables.featurelocs.push(loc.clone());
        Ok(())
    }

    async fn insert_featureprop(
        &self,
        feature_id: i64,
        type_id: i64,
        value: &str,
    ) -> StoreResult<Featureprop> {
        let mut tables = self.tables.lock().await;
        tables.require_feature(feature_id)?;
        let rank = tables
            .featureprops
            .iter()
            .filter(|p| p.feature_id == feature_id && p.type_id == type_id)
            .map(|p| p.rank + 1)
            .max()
            .unwrap_or(0);
        let row = Featureprop {
            featureprop_id: tables.next_id(),
            feature_id,
            type_id,
            value: Some(value.to_string()),
            rank,
        };
        tables.featureprops.push(row.clone());
        Ok(row)
    }

    async fn delete_featureprops(&self, feature_id: i64, type_id: i64) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.featureprops.len();
        tables
            .featureprops
            .retain(|p| !(p.feature_id == feature_id && p.type_id == type_id));
        Ok((before - tables.featureprops.len()) as u64)
    }

    async fn insert_feature_relationship(&self, rel: &FeatureRelationship) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        tables.require_feature(rel.subject_id)?;
        tables.require_feature(rel.object_id)?;
        if tables.feature_relationships.contains(rel) {
            return Ok(false);
        }
        tables.feature_relationships.push(*rel);
        Ok(true)
    }

    async fn insert_feature_dbxref(&self, feature_id: i64, dbxref_id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        tables.require_feature(feature_id)?;
        Ok(link(&mut tables.feature_dbxrefs, (feature_id, dbxref_id)))
    }

    async fn find_pub(&self, uniquename: &str) -> StoreResult<Option<Pub>> {
        let tables = self.tables.lock().await;
        Ok(tables.pubs.iter().find(|p| p.uniquename == uniquename).cloned())
    }

    async fn find_pub_by_doi(&self, doi: &str) -> StoreResult<Option<Pub>> {
        let tables = self.tables.lock().await;
        let Some(db) = tables.dbs.iter().find(|db| db.name == "DOI") else {
            return Ok(None);
        };
        let Some(dbxref) = tables
            .dbxrefs
            .iter()
            .find(|x| x.db_id == db.db_id && x.accession == doi)
        else {
            return Ok(None);
        };
        Ok(tables
            .pub_dbxrefs
            .iter()
            .find(|(_, dbxref_id)| *dbxref_id == dbxref.dbxref_id)
            .and_then(|(pub_id, _)| tables.pubs.iter().find(|p| p.pub_id == *pub_id))
            .cloned())
    }

    async fn insert_pub(&self, publication: &NewPub) -> StoreResult<Pub> {
        let mut tables = self.tables.lock().await;
        if tables
            .pubs
            .iter()
            .any(|p| p.uniquename == publication.uniquename)
        {
            return Err(StoreError::duplicate("pub", publication.uniquename.clone()));
        }
        let row = Pub {
            pub_id: tables.next_id(),
            uniquename: publication.uniquename.clone(),
            type_id: publication.type_id,
            title: publication.title.clone(),
            pyear: publication.pyear.clone(),
            volume: publication.volume.clone(),
            series_name: publication.series_name.clone(),
            pages: publication.pages.clone(),
        };
        tables.pubs.push(row.clone());
        Ok(row)
    }

    async fn insert_pub_dbxref(&self, pub_id: i64, dbxref_id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        Ok(link(&mut tables.pub_dbxrefs, (pub_id, dbxref_id)))
    }

    async fn insert_pubauthor(&self, author: &Pubauthor) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        if tables
            .pubauthors
            .iter()
            .any(|a| a.pub_id == author.pub_id && a.rank == author.rank)
        {
            return Ok(false);
        }
        tables.pubauthors.push(author.clone());
        Ok(true)
    }

    async fn insert_feature_pub(&self, feature_id: i64, pub_id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        tables.require_feature(feature_id)?;
        Ok(link(&mut tables.feature_pubs, (feature_id, pub_id)))
    }

    async fn insert_history(&self, history: &NewHistory) -> StoreResult<History> {
        let mut tables = self.tables.lock().await;
        let row = History {
            history_id: tables.next_id(),
            username: history.username.clone(),
            command: history.command.clone(),
            params: history.params.clone(),
            status: JobStatus::Started,
            description: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        tables.history.push(row.clone());
        Ok(row)
    }

    async fn finish_history(
        &self,
        history_id: i64,
        status: JobStatus,
        description: &str,
    ) -> StoreResult<History> {
        let mut tables = self.tables.lock().await;
        let row = tables
            .history
            .iter_mut()
            .find(|h| h.history_id == history_id)
            .ok_or(StoreError::MissingRow {
                entity: "history",
                id: history_id,
            })?;
        if row.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "history {} already finished with status {}",
                history_id, row.status
            )));
        }
        row.status = status;
        row.description = Some(description.to_string());
        row.finished_at = Some(Utc::now());
        Ok(row.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feature_unique_per_organism_uniquename_type() {
        let store = MemoryStore::new();
        let feature = NewFeature {
            organism_id: 1,
            type_id: 2,
            uniquename: "chr1".into(),
            ..Default::default()
        };
        store.insert_feature(&feature).await.unwrap();
        let err = store.insert_feature(&feature).await.unwrap_err();
        assert!(err.is_duplicate());

        // same uniquename under another type is a different row
        let other = NewFeature {
            type_id: 3,
            ..feature
        };
        store.insert_feature(&other).await.unwrap();
        let found = store
            .find_features(1, FeatureKey::Uniquename("chr1"), None)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_featureprop_ranks_append() {
        let store = MemoryStore::new();
        let feature = store
            .insert_feature(&NewFeature {
                organism_id: 1,
                type_id: 2,
                uniquename: "gene1".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let first = store.insert_featureprop(feature.feature_id, 9, "a").await.unwrap();
        let second = store.insert_featureprop(feature.feature_id, 9, "b").await.unwrap();
        assert_eq!((first.rank, second.rank), (0, 1));

        assert_eq!(store.delete_featureprops(feature.feature_id, 9).await.unwrap(), 2);
        let third = store.insert_featureprop(feature.feature_id, 9, "c").await.unwrap();
        assert_eq!(third.rank, 0);
    }

    #[tokio::test]
    async fn test_history_finishes_once() {
        let store = MemoryStore::new();
        let row = store
            .insert_history(&NewHistory {
                username: "admin".into(),
                command: "load_fasta".into(),
                params: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert_eq!(row.status, JobStatus::Started);

        store
            .finish_history(row.history_id, JobStatus::Success, "done")
            .await
            .unwrap();
        let err = store
            .finish_history(row.history_id, JobStatus::Failure, "again")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_find_features_by_linked_dbxref() {
        let store = MemoryStore::new();
        let db = store.insert_db("GenBank").await.unwrap();
        let xref = store
            .insert_dbxref(&NewDbxref::new(db.db_id, "NM_000546"))
            .await
            .unwrap();
        let feature = store
            .insert_feature(&NewFeature {
                organism_id: 1,
                type_id: 2,
                uniquename: "TP53-201".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .insert_feature_dbxref(feature.feature_id, xref.dbxref_id)
            .await
            .unwrap();

        let found = store
            .find_features(1, FeatureKey::DbxrefAccession("NM_000546"), None)
            .await
            .unwrap();
        assert_eq!(found, vec![feature]);
    }
}
