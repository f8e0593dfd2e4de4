//! Job runner
//!
//! One async function per job kind. Each follows the same sequence:
//!
//! 1. ledger `start` with the job parameters
//! 2. validate and read the input file
//! 3. resolve organism / term context and build the loader
//! 4. run every record through the [`IngestionEngine`]
//! 5. ledger `success` or `failure` with the original error text
//!
//! Job failures come back as a [`JobReport`] with status `failure`. The
//! `Err` side of the returned `Result` is reserved for a ledger that cannot be
//! written at all, parameters that do not serialize included.

use crate::cache::ReferenceCache;
use crate::config::LoaderSettings;
use crate::engine::{EngineReport, IngestionEngine};
use crate::error::{IngestError, Result};
use crate::ledger::JobLedger;
use crate::loaders::feature::{FeatureRecord, GFF_SOURCE_DB};
use crate::loaders::ontology::{OboPasses, RELATIONSHIP_CV};
use crate::loaders::organism::{self, OrganismRequest};
use crate::loaders::{
    FeatureLoader, FeatureLoaderOptions, FeatureLookup, NotFoundPolicy, OntologyLoader, PropertyPolicy,
    PublicationLoader, SequenceLoader, SequenceLoaderOptions,
};
use crate::models::{DbxrefRef, JobStatus};
use crate::parser::{bibtex, fasta, gff3, obo, tabular, TabRow};
use crate::store::Store;
use crate::validator;
use machado_common::checksum::compute_file_md5;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument};

// ============================================================================
// Context and report
// ============================================================================

/// Everything a job needs besides its own parameters
#[derive(Clone)]
pub struct JobContext {
    store: Arc<dyn Store>,
    ledger: JobLedger,
    cpu: usize,
    show_progress: bool,
    feature_lookup: FeatureLookup,
}

impl JobContext {
    pub fn new(store: Arc<dyn Store>, user: impl Into<String>) -> Self {
        Self {
            ledger: JobLedger::new(store.clone(), user),
            store,
            cpu: 1,
            show_progress: false,
            feature_lookup: FeatureLookup::default(),
        }
    }

    pub fn from_settings(store: Arc<dyn Store>, settings: &LoaderSettings) -> Self {
        Self::new(store, settings.user.clone())
            .with_cpu(settings.cpu)
            .with_feature_lookup(settings.feature_lookup)
    }

    /// Worker count for jobs that do not set their own
    pub fn with_cpu(mut self, cpu: usize) -> Self {
        self.cpu = cpu.max(1);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn with_feature_lookup(mut self, lookup: FeatureLookup) -> Self {
        self.feature_lookup = lookup;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Fresh cache; one per job
    fn cache(&self) -> Arc<ReferenceCache> {
        Arc::new(ReferenceCache::new(self.store.clone()))
    }

    fn engine(&self, cpu: Option<usize>) -> IngestionEngine {
        IngestionEngine::new(cpu.unwrap_or(self.cpu)).with_progress(self.show_progress)
    }

    fn feature_options(&self) -> FeatureLoaderOptions {
        FeatureLoaderOptions {
            lookup: self.feature_lookup,
            ..Default::default()
        }
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("ledger", &self.ledger)
            .field("cpu", &self.cpu)
            .field("feature_lookup", &self.feature_lookup)
            .finish_non_exhaustive()
    }
}

/// Outcome of one job as recorded in the ledger
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: i64,
    pub command: String,
    pub status: JobStatus,
    pub description: String,
    /// Unresolved feature names, for runs that collect them
    pub not_found: Vec<String>,
    pub conflicts: Vec<String>,
    pub stats: crate::engine::EngineStats,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

fn describe(report: &EngineReport) -> String {
    let stats = &report.stats;
    let mut description = format!(
        "Done: {} created, {} updated, {} skipped",
        stats.created, stats.updated, stats.skipped
    );
    if !report.not_found.is_empty() {
        description.push_str(&format!(", {} not found", report.not_found.len()));
    }
    if !report.conflicts.is_empty() {
        description.push_str(&format!(", {} conflicts", report.conflicts.len()));
    }
    description
}

/// Bracket `work` with ledger start and finish
async fn run_job<P, F>(ctx: &JobContext, command: &str, params: &P, work: F) -> Result<JobReport>
where
    P: Serialize,
    F: Future<Output = Result<EngineReport>>,
{
    let params = serde_json::to_value(params)?;
    let handle = ctx.ledger.start(command, params).await?;
    let job_id = handle.id();

    match work.await {
        Ok(report) => {
            let description = describe(&report);
            ctx.ledger.success(handle, &description).await?;
            Ok(JobReport {
                job_id,
                command: command.to_string(),
                status: JobStatus::Success,
                description,
                not_found: report.not_found,
                conflicts: report.conflicts,
                stats: report.stats,
            })
        },
        Err(err) => {
            let description = err.to_string();
            ctx.ledger.failure(handle, &description).await?;
            Ok(JobReport {
                job_id,
                command: command.to_string(),
                status: JobStatus::Failure,
                description,
                not_found: Vec::new(),
                conflicts: Vec::new(),
                stats: Default::default(),
            })
        },
    }
}

/// Validate, then read the whole file
async fn read_input(path: &Path) -> Result<String> {
    validator::validate(path)?;
    let md5 = compute_file_md5(path)?;
    let content = tokio::fs::read_to_string(path).await?;
    debug!(file = %path.display(), bytes = content.len(), md5 = %md5, "Input read");
    Ok(content)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ============================================================================
// Job parameters
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FastaJob {
    pub file: PathBuf,
    pub organism: String,
    pub soterm: String,
    pub nosequence: bool,
    pub description: Option<String>,
    pub url: Option<String>,
    pub doi: Option<String>,
    pub cpu: Option<usize>,
}

impl FastaJob {
    pub fn new(file: impl Into<PathBuf>, organism: impl Into<String>, soterm: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            organism: organism.into(),
            soterm: soterm.into(),
            ..Default::default()
        }
    }
}

/// Two-column `feature<TAB>value` file against features of one organism
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureFileJob {
    pub file: PathBuf,
    pub organism: String,
    /// Type of the features named in the first column
    pub soterm: String,
    pub cpu: Option<usize>,
    pub not_found: NotFoundPolicy,
}

impl FeatureFileJob {
    pub fn new(file: impl Into<PathBuf>, organism: impl Into<String>, soterm: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            organism: organism.into(),
            soterm: soterm.into(),
            ..Default::default()
        }
    }

    pub fn ignore_not_found(mut self, ignore: bool) -> Self {
        self.not_found = NotFoundPolicy::from_ignore_flag(ignore);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnnotationJob {
    #[serde(flatten)]
    pub target: FeatureFileJob,
    /// Property type, e.g. `display` or `note`
    pub cvterm: String,
    pub doi: Option<String>,
    pub property_policy: PropertyPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationshipJob {
    #[serde(flatten)]
    pub target: FeatureFileJob,
    /// Term of the `relationship` vocabulary, e.g. `part_of`
    pub relationship: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GffJob {
    pub file: PathBuf,
    pub organism: String,
    /// Feature types to leave out
    pub ignore: Vec<String>,
    pub doi: Option<String>,
    pub cpu: Option<usize>,
    pub not_found: NotFoundPolicy,
}

impl GffJob {
    pub fn new(file: impl Into<PathBuf>, organism: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            organism: organism.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OntologyJob {
    pub file: PathBuf,
    pub vocabulary: String,
    /// Store terms under their `namespace` tag instead of `vocabulary`
    pub use_namespaces: bool,
    pub cpu: Option<usize>,
}

impl OntologyJob {
    pub fn new(file: impl Into<PathBuf>, vocabulary: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            vocabulary: vocabulary.into(),
            ..Default::default()
        }
    }

    /// Relations Ontology, stored as the `relationship` vocabulary
    pub fn relations(file: impl Into<PathBuf>) -> Self {
        Self::new(file, RELATIONSHIP_CV)
    }

    /// Sequence Ontology
    pub fn sequence(file: impl Into<PathBuf>) -> Self {
        Self::new(file, crate::loaders::sequence::SEQUENCE_CV)
    }

    /// Gene Ontology, one vocabulary per namespace
    pub fn gene(file: impl Into<PathBuf>) -> Self {
        Self {
            use_namespaces: true,
            ..Self::new(file, "gene_ontology")
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublicationJob {
    pub file: PathBuf,
    pub cpu: Option<usize>,
}

// ============================================================================
// Jobs
// ============================================================================

#[instrument(skip_all, fields(file = %job.file.display(), organism = %job.organism))]
pub async fn load_fasta(ctx: &JobContext, job: FastaJob) -> Result<JobReport> {
    run_job(ctx, "load_fasta", &job, async {
        let content = read_input(&job.file).await?;
        let cache = ctx.cache();
        let organism = cache.resolve_organism(&job.organism).await?;
        let records = fasta::parse(&content)?;

        let loader = SequenceLoader::new(
            cache,
            organism,
            SequenceLoaderOptions {
                filename: file_name(&job.file),
                soterm: job.soterm.clone(),
                nosequence: job.nosequence,
                description: job.description.clone(),
                url: job.url.clone(),
                doi: job.doi.clone(),
            },
        )
        .await?;

        ctx.engine(job.cpu)
            .run(Arc::new(loader), records, "Loading sequences")
            .drive(NotFoundPolicy::Fail)
            .await
    })
    .await
}

/// Parse a two-column file into feature records
fn tab_records(content: &str, build: impl Fn(TabRow) -> Result<FeatureRecord>) -> Result<Vec<FeatureRecord>> {
    tabular::parse(content)?.into_iter().map(build).collect()
}

/// Build the feature loader of a tab-file job; the soterm must exist
async fn feature_loader(
    ctx: &JobContext,
    target: &FeatureFileJob,
    options: FeatureLoaderOptions,
) -> Result<Arc<FeatureLoader>> {
    let cache = ctx.cache();
    let organism = cache.resolve_organism(&target.organism).await?;
    let loader = FeatureLoader::new(cache, organism, options).await?;
    if !target.soterm.is_empty() {
        loader.sequence_term(&target.soterm).await?;
    }
    Ok(Arc::new(loader))
}

#[instrument(skip_all, fields(file = %job.target.file.display(), organism = %job.target.organism))]
pub async fn load_feature_annotation(ctx: &JobContext, job: AnnotationJob) -> Result<JobReport> {
    run_job(ctx, "load_feature_annotation", &job, async {
        let target = &job.target;
        let content = read_input(&target.file).await?;
        let loader = feature_loader(
            ctx,
            target,
            FeatureLoaderOptions {
                property_policy: job.property_policy,
                doi: job.doi.clone(),
                ..ctx.feature_options()
            },
        )
        .await?;

        let records = tab_records(&content, |row| {
            Ok(FeatureRecord::Annotation {
                feature: row.name,
                type_term: target.soterm.clone(),
                property_term: job.cvterm.clone(),
                value: row.value,
            })
        })?;

        ctx.engine(target.cpu)
            .run(loader, records, "Loading feature annotation")
            .drive(target.not_found)
            .await
    })
    .await
}

#[instrument(skip_all, fields(file = %job.file.display(), organism = %job.organism))]
pub async fn load_feature_dbxrefs(ctx: &JobContext, job: FeatureFileJob) -> Result<JobReport> {
    run_job(ctx, "load_feature_dbxrefs", &job, async {
        let content = read_input(&job.file).await?;
        let loader = feature_loader(ctx, &job, ctx.feature_options()).await?;

        let records = tab_records(&content, |row| {
            let dbxref = DbxrefRef::parse(&row.value).ok_or_else(|| {
                IngestError::parse("TSV", row.line, format!("expected db:accession, got '{}'", row.value))
            })?;
            Ok(FeatureRecord::Dbxref {
                feature: row.name,
                type_term: job.soterm.clone(),
                dbxref,
            })
        })?;

        ctx.engine(job.cpu)
            .run(loader, records, "Loading feature dbxrefs")
            .drive(job.not_found)
            .await
    })
    .await
}

/// Residues for existing features from a FASTA file
#[instrument(skip_all, fields(file = %job.file.display(), organism = %job.organism))]
pub async fn load_feature_sequence(ctx: &JobContext, job: FeatureFileJob) -> Result<JobReport> {
    run_job(ctx, "load_feature_sequence", &job, async {
        let content = read_input(&job.file).await?;
        let loader = feature_loader(ctx, &job, ctx.feature_options()).await?;

        let records: Vec<_> = fasta::parse(&content)?
            .into_iter()
            .map(|record| FeatureRecord::Sequence {
                feature: record.id,
                type_term: job.soterm.clone(),
                residues: record.sequence,
            })
            .collect();

        ctx.engine(job.cpu)
            .run(loader, records, "Loading feature sequences")
            .drive(job.not_found)
            .await
    })
    .await
}

/// `feature<TAB>doi` links; every DOI must already be loaded
#[instrument(skip_all, fields(file = %job.file.display(), organism = %job.organism))]
pub async fn load_feature_publication(ctx: &JobContext, job: FeatureFileJob) -> Result<JobReport> {
    run_job(ctx, "load_feature_publication", &job, async {
        let content = read_input(&job.file).await?;
        let loader = feature_loader(ctx, &job, ctx.feature_options()).await?;

        let records = tab_records(&content, |row| {
            Ok(FeatureRecord::Publication {
                feature: row.name,
                doi: row.value,
            })
        })?;

        ctx.engine(job.cpu)
            .run(loader, records, "Loading feature publications")
            .drive(job.not_found)
            .await
    })
    .await
}

/// `subject<TAB>object` pairs, both of the job's soterm
#[instrument(skip_all, fields(file = %job.target.file.display(), relationship = %job.relationship))]
pub async fn load_feature_relationships(ctx: &JobContext, job: RelationshipJob) -> Result<JobReport> {
    run_job(ctx, "load_feature_relationships", &job, async {
        let target = &job.target;
        let content = read_input(&target.file).await?;
        let loader = feature_loader(ctx, target, ctx.feature_options()).await?;
        ctx.cache()
            .resolve_ontology_term(RELATIONSHIP_CV, &job.relationship)
            .await?;

        let records = tab_records(&content, |row| {
            Ok(FeatureRecord::Relationship {
                subject: row.name,
                object: row.value,
                type_term: target.soterm.clone(),
                relationship_term: job.relationship.clone(),
            })
        })?;

        ctx.engine(target.cpu)
            .run(loader, records, "Loading feature relationships")
            .drive(target.not_found)
            .await
    })
    .await
}

#[instrument(skip_all, fields(file = %job.file.display(), organism = %job.organism))]
pub async fn load_gff(ctx: &JobContext, job: GffJob) -> Result<JobReport> {
    run_job(ctx, "load_gff", &job, async {
        let content = read_input(&job.file).await?;
        let cache = ctx.cache();
        let organism = cache.resolve_organism(&job.organism).await?;
        let groups = gff3::group(gff3::parse(&content)?)?;

        let loader = FeatureLoader::new(
            cache,
            organism,
            FeatureLoaderOptions {
                source: GFF_SOURCE_DB.to_string(),
                filename: Some(file_name(&job.file)),
                ignore_types: job.ignore.clone(),
                doi: job.doi.clone(),
                ..ctx.feature_options()
            },
        )
        .await?;

        // every type must be known before any feature is written
        let mut types: Vec<&str> = groups
            .iter()
            .map(|g| g.feature_type.as_str())
            .filter(|t| !loader.is_ignored(t))
            .collect();
        types.sort_unstable();
        types.dedup();
        for feature_type in types {
            loader.sequence_term(feature_type).await?;
        }

        let loader = Arc::new(loader);
        let relationships = loader.gff_relationships(&groups);
        let engine = ctx.engine(job.cpu);

        let mut report = engine
            .run(
                loader.clone(),
                groups.into_iter().map(FeatureRecord::GffFeature),
                "Loading GFF3 features",
            )
            .drive(job.not_found)
            .await?;
        report.merge(
            engine
                .run(loader, relationships, "Loading GFF3 relationships")
                .drive(job.not_found)
                .await?,
        );
        Ok(report)
    })
    .await
}

/// Typedefs, terms, then edges; every pass completes before the next
#[instrument(skip_all, fields(file = %job.file.display(), vocabulary = %job.vocabulary))]
pub async fn load_ontology(ctx: &JobContext, job: OntologyJob) -> Result<JobReport> {
    run_job(ctx, "load_ontology", &job, async {
        let content = read_input(&job.file).await?;
        let doc = obo::parse(&content)?;

        let loader = Arc::new(OntologyLoader::new(ctx.cache(), &job.vocabulary, &doc, job.use_namespaces).await?);
        let passes = OboPasses::from_document(doc);
        let engine = ctx.engine(job.cpu);

        let mut report = EngineReport::default();
        for (records, message) in [
            (passes.typedefs, "Loading typedefs"),
            (passes.terms, "Loading terms"),
            (passes.edges, "Loading relationships"),
        ] {
            report.merge(
                engine
                    .run(loader.clone(), records, message)
                    .drive(NotFoundPolicy::Fail)
                    .await?,
            );
        }
        Ok(report)
    })
    .await
}

#[instrument(skip_all, fields(file = %job.file.display()))]
pub async fn load_publication(ctx: &JobContext, job: PublicationJob) -> Result<JobReport> {
    run_job(ctx, "load_publication", &job, async {
        let content = read_input(&job.file).await?;
        let entries = bibtex::parse(&content)?;
        let loader = PublicationLoader::new(ctx.cache()).await?;

        ctx.engine(job.cpu)
            .run(Arc::new(loader), entries, "Loading publications")
            .drive(NotFoundPolicy::Fail)
            .await
    })
    .await
}

/// Register an organism; an existing one is reported as skipped
#[instrument(skip_all, fields(genus = %request.genus, species = %request.species))]
pub async fn insert_organism(ctx: &JobContext, request: OrganismRequest) -> Result<JobReport> {
    run_job(ctx, "insert_organism", &request, async {
        let (_, created) = organism::insert_organism(ctx.store.as_ref(), &request).await?;
        let mut report = EngineReport::default();
        report.stats.submitted = 1;
        if created {
            report.stats.created = 1;
        } else {
            report.stats.skipped = 1;
        }
        Ok(report)
    })
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::io::Write;

    fn staged(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_missing_file_is_recorded_as_failure() {
        let store = Arc::new(MemoryStore::new());
        let ctx = JobContext::new(store.clone(), "tester");

        let report = load_fasta(&ctx, FastaJob::new("/nonexistent/genome.fa", "Homo sapiens", "chromosome"))
            .await
            .unwrap();
        assert_eq!(report.status, JobStatus::Failure);
        assert!(report.description.contains("/nonexistent/genome.fa"));

        let tables = store.snapshot().await;
        assert_eq!(tables.history.len(), 1);
        assert_eq!(tables.history[0].status, JobStatus::Failure);
        assert_eq!(tables.history[0].params["organism"], "Homo sapiens");
    }

    #[tokio::test]
    async fn test_unserializable_params_are_an_error() {
        let store = Arc::new(MemoryStore::new());
        let ctx = JobContext::new(store.clone(), "tester");
        // JSON object keys must be strings
        let params: std::collections::HashMap<(i32, i32), i32> = [((1, 2), 3)].into_iter().collect();

        let err = run_job(&ctx, "load_fasta", &params, async { Ok(EngineReport::default()) })
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Serialization(_)));
        assert!(store.snapshot().await.history.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_organism_fails_before_loading() {
        let store = Arc::new(MemoryStore::new());
        let ctx = JobContext::new(store.clone(), "tester");
        let file = staged(">chr1\nACGT\n");

        let report = load_fasta(&ctx, FastaJob::new(file.path(), "Mus musculus", "chromosome"))
            .await
            .unwrap();
        assert_eq!(report.description, "organism not found: Mus musculus");
        assert!(store.snapshot().await.features.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_dbxref_line_aborts_before_writes() {
        let store = Arc::new(MemoryStore::new());
        let ctx = JobContext::new(store.clone(), "tester");
        insert_organism(&ctx, OrganismRequest::new("Homo", "sapiens"))
            .await
            .unwrap();
        ctx.cache().ensure_term("sequence", "gene").await.unwrap();
        let file = staged("BRCA1\tHGNC:1100\nBRCA2\tnocolon\n");

        let report = load_feature_dbxrefs(&ctx, FeatureFileJob::new(file.path(), "Homo sapiens", "gene"))
            .await
            .unwrap();
        assert!(!report.is_success());
        assert!(report.description.contains("line 2"));
        assert!(store.snapshot().await.feature_dbxrefs.is_empty());
    }

    #[tokio::test]
    async fn test_insert_organism_twice() {
        let ctx = JobContext::new(Arc::new(MemoryStore::new()), "tester");
        let first = insert_organism(&ctx, OrganismRequest::new("Homo", "sapiens"))
            .await
            .unwrap();
        let second = insert_organism(&ctx, OrganismRequest::new("homo", "sapiens"))
            .await
            .unwrap();
        assert_eq!(first.stats.created, 1);
        assert_eq!(second.stats.skipped, 1);
        assert_ne!(first.job_id, second.job_id);
    }
}
