//! Feature loader
//!
//! Attaches annotation to features of one organism: properties, cross
//! references, residues, publications and relationships from two-column tab
//! files, and whole features with locations from GFF3.
//!
//! Every operation first resolves the feature it touches. Resolution tries
//! three keys (uniquename, display name, dbxref accession) in the order set by
//! [`FeatureLookup`]; the first key with any candidate decides. A type
//! qualifier narrows the candidates, and more than one survivor is an
//! [`IngestError::AmbiguousReference`]. No candidate under any key is an
//! [`IngestError::NotFound`] carrying the name, which the engine fails on or
//! collects according to the job's [`NotFoundPolicy`](super::NotFoundPolicy).
//!
//! GFF3 runs in two passes: [`FeatureRecord::GffFeature`] for every ID group,
//! then [`FeatureRecord::GffRelationship`] for every `Parent`, so parents
//! always exist before they are linked. Seqids and `Parent` values are GFF3
//! `ID`s and match uniquenames only.

use super::sequence::SEQUENCE_CV;
use super::{FeatureLookup, Outcome, PropertyPolicy, RecordLoader};
use crate::cache::ReferenceCache;
use crate::error::{IngestError, Result};
use crate::models::*;
use crate::parser::GffFeature;
use crate::store::upsert;
use async_trait::async_trait;
use machado_common::checksum::residues_md5;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Vocabulary of property types created on demand
pub const FEATURE_PROPERTY_CV: &str = "feature_property";

/// Relationship from a GFF3 child to its `Parent`
pub const PART_OF: &str = "part_of";

/// Default db recording which GFF3 file a feature came from
pub const GFF_SOURCE_DB: &str = "GFF_SOURCE";

/// GFF3 attributes stored as columns or links rather than properties
const STRUCTURAL_ATTRIBUTES: &[&str] = &["ID", "Name", "Parent", "Dbxref", "Ontology_term"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLoaderOptions {
    /// Db holding the loaded file's accession
    pub source: String,
    /// File name recorded under `source` and linked to created features
    pub filename: Option<String>,
    pub lookup: FeatureLookup,
    pub property_policy: PropertyPolicy,
    /// GFF3 feature types to leave out
    pub ignore_types: Vec<String>,
    /// Publication linked to every created or annotated feature
    pub doi: Option<String>,
}

impl Default for FeatureLoaderOptions {
    fn default() -> Self {
        Self {
            source: GFF_SOURCE_DB.to_string(),
            filename: None,
            lookup: FeatureLookup::default(),
            property_policy: PropertyPolicy::default(),
            ignore_types: Vec::new(),
            doi: None,
        }
    }
}

/// One line (or GFF3 group) of feature work
#[derive(Debug, Clone)]
pub enum FeatureRecord {
    Annotation {
        feature: String,
        type_term: String,
        property_term: String,
        value: String,
    },
    Dbxref {
        feature: String,
        type_term: String,
        dbxref: DbxrefRef,
    },
    Sequence {
        feature: String,
        type_term: String,
        residues: String,
    },
    Publication {
        feature: String,
        doi: String,
    },
    Relationship {
        subject: String,
        object: String,
        type_term: String,
        relationship_term: String,
    },
    GffFeature(GffFeature),
    GffRelationship {
        child: String,
        child_type: String,
        parent: String,
    },
}

pub struct FeatureLoader {
    cache: Arc<ReferenceCache>,
    organism: Organism,
    lookup: FeatureLookup,
    property_policy: PropertyPolicy,
    ignore_types: HashSet<String>,
    source: Option<Dbxref>,
    publication: Option<Pub>,
    /// (feature, type) pairs whose old properties this job already removed
    replaced: Mutex<HashSet<(i64, i64)>>,
}

impl FeatureLoader {
    pub async fn new(cache: Arc<ReferenceCache>, organism: Organism, options: FeatureLoaderOptions) -> Result<Self> {
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

        let source = match options.filename.as_deref() {
            Some(filename) => {
                let db = cache.ensure_db(&options.source).await?;
                Some(upsert::ensure_dbxref(cache.store(), &NewDbxref::new(db.db_id, filename)).await?)
            },
            None => None,
        };

        info!(
            organism = %organism.scientific_name(),
            source = %options.source,
            lookup = ?options.lookup,
            property_policy = ?options.property_policy,
            "Feature loader ready"
        );

        Ok(Self {
            cache,
            organism,
            lookup: options.lookup,
            property_policy: options.property_policy,
            ignore_types: options.ignore_types.into_iter().collect(),
            source,
            publication,
            replaced: Mutex::new(HashSet::new()),
        })
    }

    pub fn is_ignored(&self, feature_type: &str) -> bool {
        self.ignore_types.contains(feature_type)
    }

    /// Sequence Ontology term by name; jobs call this before loading so a
    /// missing type fails the job up front
    pub async fn sequence_term(&self, name: &str) -> Result<Cvterm> {
        self.cache.resolve_ontology_term(SEQUENCE_CV, name).await
    }

    // ========================================================================
    // Feature resolution
    // ========================================================================

    fn keys<'a>(&self, name: &'a str) -> [FeatureKey<'a>; 3] {
        match self.lookup {
            FeatureLookup::NameFirst => [
                FeatureKey::Uniquename(name),
                FeatureKey::Name(name),
                FeatureKey::DbxrefAccession(name),
            ],
            FeatureLookup::DbxrefFirst => [
                FeatureKey::DbxrefAccession(name),
                FeatureKey::Uniquename(name),
                FeatureKey::Name(name),
            ],
        }
    }

    /// Resolve `name` within the organism, optionally of one type
    pub async fn resolve_feature(&self, name: &str, type_term: Option<&str>) -> Result<Feature> {
        let type_id = match type_term {
            Some(term) => Some(self.sequence_term(term).await?.cvterm_id),
            None => None,
        };

        for key in self.keys(name) {
            let mut candidates = self
                .cache
                .store()
                .find_features(self.organism.organism_id, key, type_id)
                .await?;
            match candidates.len() {
                0 => continue,
                1 => return Ok(candidates.remove(0)),
                n => {
                    return Err(IngestError::AmbiguousReference {
                        kind: "feature",
                        key: name.to_string(),
                        candidates: n,
                    })
                },
            }
        }

        Err(IngestError::not_found("feature", name))
    }

    // ========================================================================
    // Tab-delimited operations
    // ========================================================================

    /// Add `value` as a `property_term` property of the named feature
    pub async fn store_feature_annotation(
        &self,
        feature: &str,
        type_term: &str,
        property_term: &str,
        value: &str,
    ) -> Result<Outcome> {
        let feature = self.resolve_feature(feature, Some(type_term)).await?;
        let property = self.cache.ensure_term(FEATURE_PROPERTY_CV, property_term).await?;
        self.write_property(feature.feature_id, property.cvterm_id, value).await?;
        if let Some(publication) = &self.publication {
            self.cache
                .store()
                .insert_feature_pub(feature.feature_id, publication.pub_id)
                .await?;
        }
        Ok(Outcome::Created)
    }

    pub async fn store_feature_dbxref(&self, feature: &str, type_term: &str, dbxref: &DbxrefRef) -> Result<Outcome> {
        let feature = self.resolve_feature(feature, Some(type_term)).await?;
        let dbxref = upsert::ensure_dbxref_ref(self.cache.store(), dbxref).await?;
        let created = self
            .cache
            .store()
            .insert_feature_dbxref(feature.feature_id, dbxref.dbxref_id)
            .await?;
        Ok(if created { Outcome::Created } else { Outcome::Skipped })
    }

    /// Set residues, length and checksum of an existing feature
    pub async fn store_feature_sequence(&self, feature: &str, type_term: &str, residues: &str) -> Result<Outcome> {
        let feature = self.resolve_feature(feature, Some(type_term)).await?;
        let md5 = residues_md5(residues);
        if feature.md5checksum.as_deref() == Some(md5.as_str()) && feature.residues.is_some() {
            return Ok(Outcome::Skipped);
        }
        self.cache
            .store()
            .update_feature_residues(feature.feature_id, residues, &md5)
            .await?;
        Ok(Outcome::Updated)
    }

    /// Link the named feature to the publication with `doi`
    pub async fn store_feature_publication(&self, feature: &str, doi: &str) -> Result<Outcome> {
        let feature = self.resolve_feature(feature, None).await?;
        let publication = self
            .cache
            .store()
            .find_pub_by_doi(doi)
            .await?
            .ok_or_else(|| IngestError::not_found("publication", doi))?;
        let created = self
            .cache
            .store()
            .insert_feature_pub(feature.feature_id, publication.pub_id)
            .await?;
        Ok(if created { Outcome::Created } else { Outcome::Skipped })
    }

    /// `subject -relationship_term-> object`, both of `type_term`
    pub async fn store_feature_relationship(
        &self,
        subject: &str,
        object: &str,
        type_term: &str,
        relationship_term: &str,
    ) -> Result<Outcome> {
        let relation = self
            .cache
            .resolve_ontology_term(super::ontology::RELATIONSHIP_CV, relationship_term)
            .await?;
        let subject = self.resolve_feature(subject, Some(type_term)).await?;
        let object = self.resolve_feature(object, Some(type_term)).await?;
        self.link_features(subject.feature_id, object.feature_id, relation.cvterm_id)
            .await
    }

    async fn link_features(&self, subject_id: i64, object_id: i64, type_id: i64) -> Result<Outcome> {
        let created = self
            .cache
            .store()
            .insert_feature_relationship(&FeatureRelationship {
                subject_id,
                object_id,
                type_id,
            })
            .await?;
        Ok(if created { Outcome::Created } else { Outcome::Skipped })
    }

    async fn write_property(&self, feature_id: i64, type_id: i64, value: &str) -> Result<()> {
        let store = self.cache.store();
        if self.property_policy == PropertyPolicy::Replace {
            // held across the delete so siblings append only after it
            let mut replaced = self.replaced.lock().await;
            if replaced.insert((feature_id, type_id)) {
                let removed = store.delete_featureprops(feature_id, type_id).await?;
                debug!(feature_id, type_id, removed, "Replaced existing properties");
            }
        }
        upsert::append_featureprop(store, feature_id, type_id, value).await?;
        Ok(())
    }

    // ========================================================================
    // GFF3
    // ========================================================================

    /// Create one feature with one location per line of the group.
    ///
    /// A feature already present with the same uniquename and type is left
    /// untouched.
    pub async fn store_gff_feature(&self, group: &GffFeature) -> Result<Outcome> {
        if self.is_ignored(&group.feature_type) {
            return Ok(Outcome::Skipped);
        }
        let store = self.cache.store();
        let feature_type = self.sequence_term(&group.feature_type).await?;

        let existing = store
            .find_features(
                self.organism.organism_id,
                FeatureKey::Uniquename(&group.uniquename),
                Some(feature_type.cvterm_id),
            )
            .await?;
        if !existing.is_empty() {
            return Ok(Outcome::Skipped);
        }

        let mut sources = Vec::with_capacity(group.lines.len());
        for line in &group.lines {
            sources.push(self.resolve_gff_id(&line.seqid).await?);
        }

        let first = group.first_line();
        let new_feature = NewFeature {
            organism_id: self.organism.organism_id,
            type_id: feature_type.cvterm_id,
            uniquename: group.uniquename.clone(),
            name: first.first("Name").map(str::to_string),
            ..Default::default()
        };
        let feature = match store.insert_feature(&new_feature).await {
            Ok(feature) => feature,
            Err(err) if err.is_duplicate() => return Ok(Outcome::Skipped),
            Err(err) => return Err(err.into()),
        };

        for (rank, (line, source)) in group.lines.iter().zip(&sources).enumerate() {
            store
                .insert_featureloc(&Featureloc {
                    feature_id: feature.feature_id,
                    srcfeature_id: Some(source.feature_id),
                    fmin: line.fmin(),
                    fmax: line.fmax(),
                    strand: line.strand,
                    phase: line.phase,
                    locgroup: 0,
                    rank: rank as i32,
                })
                .await?;
        }

        let mut properties: Vec<(&str, &str)> = Vec::new();
        let mut xrefs: Vec<DbxrefRef> = Vec::new();
        for line in &group.lines {
            for (key, values) in &line.attributes {
                if key == "Dbxref" || key == "Ontology_term" {
                    for xref in values.iter().filter_map(|v| DbxrefRef::parse(v)) {
                        if !xrefs.contains(&xref) {
                            xrefs.push(xref);
                        }
                    }
                } else if !STRUCTURAL_ATTRIBUTES.contains(&key.as_str()) {
                    for value in values {
                        let property = (key.as_str(), value.as_str());
                        if !properties.contains(&property) {
                            properties.push(property);
                        }
                    }
                }
            }
        }

        for (key, value) in properties {
            let term = self.cache.ensure_term(FEATURE_PROPERTY_CV, key).await?;
            upsert::append_featureprop(store, feature.feature_id, term.cvterm_id, value).await?;
        }
        for xref in &xrefs {
            let dbxref = upsert::ensure_dbxref_ref(store, xref).await?;
            store.insert_feature_dbxref(feature.feature_id, dbxref.dbxref_id).await?;
        }
        if let Some(source) = &self.source {
            store.insert_feature_dbxref(feature.feature_id, source.dbxref_id).await?;
        }
        if let Some(publication) = &self.publication {
            store.insert_feature_pub(feature.feature_id, publication.pub_id).await?;
        }

        Ok(Outcome::Created)
    }

    /// `child part_of parent`, the child identified by its exact uniquename
    pub async fn store_gff_relationship(&self, child: &str, child_type: &str, parent: &str) -> Result<Outcome> {
        let part_of = self.cache.ensure_term(SEQUENCE_CV, PART_OF).await?;
        let child_type = self.sequence_term(child_type).await?;
        let child = self
            .cache
            .store()
            .find_features(
                self.organism.organism_id,
                FeatureKey::Uniquename(child),
                Some(child_type.cvterm_id),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| IngestError::not_found("feature", child))?;
        let parent = self.resolve_gff_id(parent).await?;
        self.link_features(child.feature_id, parent.feature_id, part_of.cvterm_id)
            .await
    }

    /// A seqid or `Parent` value: always a GFF3 `ID`, so matched against
    /// uniquenames only, whatever the job's lookup order
    async fn resolve_gff_id(&self, id: &str) -> Result<Feature> {
        let mut candidates = self
            .cache
            .store()
            .find_features(self.organism.organism_id, FeatureKey::Uniquename(id), None)
            .await?;
        match candidates.len() {
            0 => Err(IngestError::not_found("feature", id)),
            1 => Ok(candidates.remove(0)),
            n => Err(IngestError::AmbiguousReference {
                kind: "feature",
                key: id.to_string(),
                candidates: n,
            }),
        }
    }

    /// Second-pass records for a set of groups: one per (child, parent).
    ///
    /// Pairs where either side is an ignored group of the same file are
    /// dropped.
    pub fn gff_relationships(&self, groups: &[GffFeature]) -> Vec<FeatureRecord> {
        let ignored: HashSet<&str> = groups
            .iter()
            .filter(|group| self.is_ignored(&group.feature_type))
            .map(|group| group.uniquename.as_str())
            .collect();

        groups
            .iter()
            .filter(|group| !self.is_ignored(&group.feature_type))
            .flat_map(|group| {
                group
                    .parents()
                    .into_iter()
                    .filter(|parent| !ignored.contains(parent))
                    .map(|parent| FeatureRecord::GffRelationship {
                        child: group.uniquename.clone(),
                        child_type: group.feature_type.clone(),
                        parent: parent.to_string(),
                    })
            })
            .collect()
    }
}

#[async_trait]
impl RecordLoader for FeatureLoader {
    type Record = FeatureRecord;

    async fn load_record(&self, record: FeatureRecord) -> Result<Outcome> {
        match record {
            FeatureRecord::Annotation {
                feature,
                type_term,
                property_term,
                value,
            } => {
                self.store_feature_annotation(&feature, &type_term, &property_term, &value)
                    .await
            },
            FeatureRecord::Dbxref {
                feature,
                type_term,
                dbxref,
            } => self.store_feature_dbxref(&feature, &type_term, &dbxref).await,
            FeatureRecord::Sequence {
                feature,
                type_term,
                residues,
            } => self.store_feature_sequence(&feature, &type_term, &residues).await,
            FeatureRecord::Publication { feature, doi } => {
                self.store_feature_publication(&feature, &doi).await
            },
            FeatureRecord::Relationship {
                subject,
                object,
                type_term,
                relationship_term,
            } => {
                self.store_feature_relationship(&subject, &object, &type_term, &relationship_term)
                    .await
            },
            FeatureRecord::GffFeature(group) => self.store_gff_feature(&group).await,
            FeatureRecord::GffRelationship {
                child,
                child_type,
                parent,
            } => self.store_gff_relationship(&child, &child_type, &parent).await,
        }
    }
}
