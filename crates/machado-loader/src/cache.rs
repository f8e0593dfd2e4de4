//! Per-job reference cache
//!
//! Memoizes organism, vocabulary, database and term rows by natural key for
//! the lifetime of one job. Workers share it through an `Arc`; a new job gets
//! a new cache, so stale entries never cross job boundaries.
//!
//! Misses are not cached. A row created after a failed lookup is picked up by
//! the next lookup of that key.

use crate::error::{IngestError, Result};
use crate::models::{Cv, Cvterm, Db, NewOrganism, Organism};
use crate::store::{upsert, Store};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::trace;

/// Hit/miss counters, logged at the end of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct Memo<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash, V: Clone> Memo<K, V> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, key: &K) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }

    /// First writer wins; later writers get the stored value back.
    async fn insert(&self, key: K, value: V) -> V {
        self.entries.write().await.entry(key).or_insert(value).clone()
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

pub struct ReferenceCache {
    store: Arc<dyn Store>,
    organisms: Memo<String, Organism>,
    cvs: Memo<String, Cv>,
    dbs: Memo<String, Db>,
    terms: Memo<(String, String), Cvterm>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ReferenceCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            organisms: Memo::new(),
            cvs: Memo::new(),
            dbs: Memo::new(),
            terms: Memo::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn lookup<K: Eq + Hash, V: Clone>(&self, memo: &Memo<K, V>, key: &K) -> Option<V> {
        let found = memo.get(key).await;
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Drop every memoized row
    pub async fn invalidate(&self) {
        self.organisms.clear().await;
        self.cvs.clear().await;
        self.dbs.clear().await;
        self.terms.clear().await;
    }

    // ========================================================================
    // Read-only resolution
    // ========================================================================

    /// Resolve "Genus species [infraspecific]" to an existing organism
    pub async fn resolve_organism(&self, name: &str) -> Result<Organism> {
        let key = NewOrganism::parse_name(name)
            .ok_or_else(|| IngestError::not_found("organism", name))?;
        let memo_key = format!(
            "{} {} {}",
            key.genus,
            key.species,
            key.infraspecific_name.as_deref().unwrap_or("")
        );

        if let Some(organism) = self.lookup(&self.organisms, &memo_key).await {
            return Ok(organism);
        }

        let organism = self
            .store
            .find_organism(&key.genus, &key.species, key.infraspecific_name.as_deref())
            .await?
            .ok_or_else(|| IngestError::not_found("organism", name))?;
        trace!(organism = %name, id = organism.organism_id, "Organism resolved");
        Ok(self.organisms.insert(memo_key, organism).await)
    }

    /// Resolve a vocabulary by name
    pub async fn resolve_cv(&self, name: &str) -> Result<Cv> {
        let key = name.to_string();
        if let Some(cv) = self.lookup(&self.cvs, &key).await {
            return Ok(cv);
        }
        let cv = self
            .store
            .find_cv(name)
            .await?
            .ok_or_else(|| IngestError::not_found("cv", name))?;
        Ok(self.cvs.insert(key, cv).await)
    }

    /// Resolve `term` within `vocabulary`
    pub async fn resolve_ontology_term(&self, vocabulary: &str, term: &str) -> Result<Cvterm> {
        let key = (vocabulary.to_string(), term.to_string());
        if let Some(found) = self.lookup(&self.terms, &key).await {
            return Ok(found);
        }

        let cv = self.resolve_cv(vocabulary).await?;
        let found = self
            .store
            .find_cvterm(cv.cv_id, term)
            .await?
            .ok_or_else(|| IngestError::not_found("cvterm", format!("{}:{}", vocabulary, term)))?;
        Ok(self.terms.insert(key, found).await)
    }

    // ========================================================================
    // Create-or-fetch
    // ========================================================================

    pub async fn ensure_cv(&self, name: &str) -> Result<Cv> {
        let key = name.to_string();
        if let Some(cv) = self.lookup(&self.cvs, &key).await {
            return Ok(cv);
        }
        let cv = upsert::ensure_cv(self.store(), name).await?;
        Ok(self.cvs.insert(key, cv).await)
    }

    pub async fn ensure_db(&self, name: &str) -> Result<Db> {
        let key = name.to_string();
        if let Some(db) = self.lookup(&self.dbs, &key).await {
            return Ok(db);
        }
        let db = upsert::ensure_db(self.store(), name).await?;
        Ok(self.dbs.insert(key, db).await)
    }

    /// Term in `vocabulary`, created (with its vocabulary) when missing
    pub async fn ensure_term(&self, vocabulary: &str, term: &str) -> Result<Cvterm> {
        let key = (vocabulary.to_string(), term.to_string());
        if let Some(found) = self.lookup(&self.terms, &key).await {
            return Ok(found);
        }
        let cv = self.ensure_cv(vocabulary).await?;
        let created = upsert::ensure_internal_term(self.store(), &cv, term).await?;
        Ok(self.terms.insert(key, created).await)
    }
}

impl std::fmt::Debug for ReferenceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
