//! OBO ontology loader
//!
//! A document is stored in three passes, each run to completion before the
//! next starts: typedefs, then terms, then edges. Edge endpoints are therefore
//! always resolvable, except ids the file references without defining them;
//! those get stub terms named after the id.

use super::{Outcome, RecordLoader};
use crate::cache::ReferenceCache;
use crate::error::{IngestError, Result};
use crate::models::{Cvterm, DbxrefRef, NewCvterm};
use crate::parser::{OboDocument, OboEdge, OboStanza};
use crate::store::upsert;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Vocabulary holding relationship types not declared by the file itself
pub const RELATIONSHIP_CV: &str = "relationship";

/// Db for identifiers without a `PREFIX:` part
pub const GLOBAL_DB: &str = "_global";

/// One unit of ontology work
#[derive(Debug, Clone)]
pub enum OboRecord {
    Typedef(OboStanza),
    Term(OboStanza),
    Edge { subject: String, edge: OboEdge },
}

/// Records of one document, grouped into the passes that must run in order
#[derive(Debug, Default)]
pub struct OboPasses {
    pub typedefs: Vec<OboRecord>,
    pub terms: Vec<OboRecord>,
    pub edges: Vec<OboRecord>,
}

impl OboPasses {
    pub fn from_document(doc: OboDocument) -> Self {
        let mut edges = Vec::with_capacity(doc.edge_count());
        for stanza in doc.typedefs.iter().chain(doc.terms.iter()) {
            edges.extend(stanza.edges.iter().map(|edge| OboRecord::Edge {
                subject: stanza.id.clone(),
                edge: edge.clone(),
            }));
        }
        Self {
            typedefs: doc.typedefs.into_iter().map(OboRecord::Typedef).collect(),
            terms: doc.terms.into_iter().map(OboRecord::Term).collect(),
            edges,
        }
    }
}

/// Where a stanza id ends up: (vocabulary, term name)
type TermIndex = HashMap<String, (String, String)>;

pub struct OntologyLoader {
    cache: Arc<ReferenceCache>,
    vocabulary: String,
    use_namespaces: bool,
    default_namespace: Option<String>,
    index: TermIndex,
    typedef_ids: HashSet<String>,
}

impl OntologyLoader {
    /// Bind a parsed document to `vocabulary`, creating the vocabulary.
    pub async fn new(
        cache: Arc<ReferenceCache>,
        vocabulary: &str,
        doc: &OboDocument,
        use_namespaces: bool,
    ) -> Result<Self> {
        if vocabulary.trim().is_empty() {
            return Err(IngestError::Validation("vocabulary name is empty".into()));
        }
        cache.ensure_cv(vocabulary).await?;

        let mut loader = Self {
            cache,
            vocabulary: vocabulary.to_string(),
            use_namespaces,
            default_namespace: doc.default_namespace.clone(),
            index: HashMap::new(),
            typedef_ids: HashSet::new(),
        };

        for typedef in &doc.typedefs {
            loader.typedef_ids.insert(typedef.id.clone());
            loader.index.insert(
                typedef.id.clone(),
                (loader.vocabulary.clone(), typedef.term_name().to_string()),
            );
        }
        for term in &doc.terms {
            let cv = loader.vocabulary_of(term).to_string();
            loader
                .index
                .insert(term.id.clone(), (cv, term.term_name().to_string()));
        }

        info!(
            vocabulary,
            typedefs = doc.typedefs.len(),
            terms = doc.terms.len(),
            use_namespaces,
            "Ontology loader ready"
        );
        Ok(loader)
    }

    fn vocabulary_of<'a>(&'a self, term: &'a OboStanza) -> &'a str {
        if !self.use_namespaces {
            return &self.vocabulary;
        }
        term.namespace
            .as_deref()
            .or(self.default_namespace.as_deref())
            .unwrap_or(&self.vocabulary)
    }

    async fn store_stanza(&self, stanza: &OboStanza, vocabulary: &str, relationship_type: bool) -> Result<Outcome> {
        let store = self.cache.store();
        let cv = self.cache.ensure_cv(vocabulary).await?;

        let (term, outcome) = match store.find_cvterm(cv.cv_id, stanza.term_name()).await? {
            Some(existing) => (existing, Outcome::Skipped),
            None => {
                let dbxref = upsert::ensure_dbxref_ref(store, &id_dbxref(&stanza.id)).await?;
                let term = upsert::ensure_cvterm(
                    store,
                    &NewCvterm {
                        cv_id: cv.cv_id,
                        name: stanza.term_name().to_string(),
                        definition: stanza.definition.clone(),
                        dbxref_id: dbxref.dbxref_id,
                        is_obsolete: stanza.is_obsolete,
                        is_relationshiptype: relationship_type,
                    },
                )
                .await?;
                (term, Outcome::Created)
            },
        };

        for xref in stanza.xrefs.iter().filter_map(|x| DbxrefRef::parse(x)) {
            let dbxref = upsert::ensure_dbxref_ref(store, &xref).await?;
            store.insert_cvterm_dbxref(term.cvterm_id, dbxref.dbxref_id).await?;
        }

        Ok(outcome)
    }

    /// Term for a stanza id; ids the file never defines become stubs
    async fn endpoint(&self, id: &str) -> Result<Cvterm> {
        if let Some((cv, name)) = self.index.get(id) {
            return self.cache.resolve_ontology_term(cv, name).await;
        }

        debug!(id, vocabulary = %self.vocabulary, "Creating stub term");
        let store = self.cache.store();
        let cv = self.cache.ensure_cv(&self.vocabulary).await?;
        if let Some(existing) = store.find_cvterm(cv.cv_id, id).await? {
            return Ok(existing);
        }
        let dbxref = upsert::ensure_dbxref_ref(store, &id_dbxref(id)).await?;
        upsert::ensure_cvterm(
            store,
            &NewCvterm {
                cv_id: cv.cv_id,
                name: id.to_string(),
                dbxref_id: dbxref.dbxref_id,
                ..Default::default()
            },
        )
        .await
    }

    /// Relationship type: declared in this file, built-in `is_a`, or
    /// already present in the relationship vocabulary
    async fn relation(&self, relation: &str) -> Result<Cvterm> {
        if self.typedef_ids.contains(relation) {
            return self.endpoint(relation).await;
        }
        if relation == "is_a" {
            return self.cache.ensure_term(RELATIONSHIP_CV, "is_a").await;
        }
        self.cache
            .resolve_ontology_term(RELATIONSHIP_CV, relation)
            .await
            .map_err(|err| match err {
                IngestError::NotFound { .. } => IngestError::not_found("relationship type", relation),
                other => other,
            })
    }

    async fn store_edge(&self, subject: &str, edge: &OboEdge) -> Result<Outcome> {
        let relation = self.relation(&edge.relation).await?;
        let subject = self.endpoint(subject).await?;
        let object = self.endpoint(&edge.target).await?;

        let created = self
            .cache
            .store()
            .insert_cvterm_relationship(relation.cvterm_id, subject.cvterm_id, object.cvterm_id)
            .await?;
        Ok(if created { Outcome::Created } else { Outcome::Skipped })
    }
}

#[async_trait]
impl RecordLoader for OntologyLoader {
    type Record = OboRecord;

    async fn load_record(&self, record: OboRecord) -> Result<Outcome> {
        match record {
            OboRecord::Typedef(stanza) => self.store_stanza(&stanza, &self.vocabulary, true).await,
            OboRecord::Term(stanza) => {
                self.store_stanza(&stanza, self.vocabulary_of(&stanza), false)
                    .await
            },
            OboRecord::Edge { subject, edge } => self.store_edge(&subject, &edge).await,
        }
    }
}

/// `SO:0000704` -> (SO, 0000704); bare ids go to the global db whole
fn id_dbxref(id: &str) -> DbxrefRef {
    DbxrefRef::parse(id).unwrap_or_else(|| DbxrefRef {
        db: GLOBAL_DB.to_string(),
        accession: id.to_string(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::parser::obo;
    use crate::store::MemoryStore;

    async fn load(store: Arc<MemoryStore>, content: &str, vocabulary: &str, namespaces: bool) -> Result<()> {
        let doc = obo::parse(content)?;
        let cache = Arc::new(ReferenceCache::new(store));
        let loader = OntologyLoader::new(cache, vocabulary, &doc, namespaces).await?;
        let passes = OboPasses::from_document(doc);
        for pass in [passes.typedefs, passes.terms, passes.edges] {
            for record in pass {
                loader.load_record(record).await?;
            }
        }
        Ok(())
    }

    #[test]
    fn test_id_dbxref() {
        assert_eq!(id_dbxref("SO:0000704").db, "SO");
        assert_eq!(id_dbxref("part_of").db, GLOBAL_DB);
        assert_eq!(id_dbxref("part_of").accession, "part_of");
    }

    #[tokio::test]
    async fn test_forward_reference_resolves_after_terms_pass() {
        let store = Arc::new(MemoryStore::new());
        let content = "[Term]\nid: X:2\nname: child\nis_a: X:1\n\n[Term]\nid: X:1\nname: parent\n";
        load(store.clone(), content, "test", false).await.unwrap();

        let tables = store.snapshot().await;
        let names: Vec<_> = tables.cvterms_in("test").iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, vec!["child", "parent"]);
        assert_eq!(tables.cvterm_relationships.len(), 1);
    }

    #[tokio::test]
    async fn test_undefined_target_becomes_stub() {
        let store = Arc::new(MemoryStore::new());
        load(store.clone(), "[Term]\nid: X:2\nname: child\nis_a: Y:9\n", "test", false)
            .await
            .unwrap();

        let tables = store.snapshot().await;
        assert!(tables.cvterms_in("test").iter().any(|t| t.name == "Y:9"));
    }

    #[tokio::test]
    async fn test_namespaces_split_vocabularies() {
        let store = Arc::new(MemoryStore::new());
        let content = "default-namespace: gene_ontology\n\n[Term]\nid: GO:1\nname: a\nnamespace: biological_process\n\n[Term]\nid: GO:2\nname: b\n";
        load(store.clone(), content, "gene_ontology", true).await.unwrap();

        let tables = store.snapshot().await;
        assert_eq!(tables.cvterms_in("biological_process").len(), 1);
        assert_eq!(tables.cvterms_in("gene_ontology").len(), 1);
    }

    #[tokio::test]
    async fn test_undeclared_relation_type_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let err = load(store, "[Term]\nid: X:1\nrelationship: regulates X:2\n", "test", false)
            .await
            .unwrap_err();
        assert_eq!(err.not_found_key(), Some("regulates"));
    }

    #[tokio::test]
    async fn test_typedefs_are_relationship_types() {
        let store = Arc::new(MemoryStore::new());
        load(store.clone(), "[Typedef]\nid: part_of\nname: part_of\nxref: BFO:0000050\n", "relationship", false)
            .await
            .unwrap();

        let tables = store.snapshot().await;
        let part_of = tables.cvterms_in("relationship")[0].clone();
        assert!(part_of.is_relationshiptype);
        assert_eq!(tables.cvterm_dbxrefs.len(), 1);
    }
}
