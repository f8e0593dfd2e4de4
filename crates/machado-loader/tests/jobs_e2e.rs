//! End-to-end tests for loader jobs
//!
//! Every test drives the public job functions against a `MemoryStore`:
//! - organism registration
//! - ontology loading and reloading
//! - FASTA and GFF3 feature loading
//! - tab-delimited annotation with and without `ignorenotfound`
//! - job history on failure

#![allow(clippy::unwrap_used, clippy::expect_used)]

use machado_loader::jobs::{
    self, AnnotationJob, FastaJob, FeatureFileJob, GffJob, JobContext, OntologyJob, PublicationJob,
};
use machado_loader::loaders::organism::OrganismRequest;
use machado_loader::models::JobStatus;
use machado_loader::store::MemoryStore;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const SEQUENCE_ONTOLOGY: &str = "format-version: 1.2
ontology: so

[Term]
id: SO:0000340
name: chromosome

[Term]
id: SO:0000704
name: gene

[Term]
id: SO:0000234
name: mRNA
relationship: part_of SO:0000704

[Term]
id: SO:0000001
name: region

[Typedef]
id: part_of
name: part_of
xref: BFO:0000050
";

/// Store, context and staging directory with `Homo sapiens` and a small
/// Sequence Ontology already loaded
struct Fixture {
    store: Arc<MemoryStore>,
    ctx: JobContext,
    dir: TempDir,
}

impl Fixture {
    async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let ctx = JobContext::new(store.clone(), "tester");
        let fixture = Self {
            store,
            ctx,
            dir: tempfile::tempdir().unwrap(),
        };

        let organism = jobs::insert_organism(&fixture.ctx, OrganismRequest::new("Homo", "sapiens"))
            .await
            .unwrap();
        assert!(organism.is_success(), "{}", organism.description);

        let so = fixture.stage("so.obo", SEQUENCE_ONTOLOGY);
        let ontology = jobs::load_ontology(&fixture.ctx, OntologyJob::sequence(so))
            .await
            .unwrap();
        assert!(ontology.is_success(), "{}", ontology.description);

        fixture
    }

    fn stage(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    async fn load_genes(&self, fasta: &str) {
        let file = self.stage("genes.fasta", fasta);
        let report = jobs::load_fasta(&self.ctx, FastaJob::new(file, "Homo sapiens", "gene"))
            .await
            .unwrap();
        assert!(report.is_success(), "{}", report.description);
    }
}

fn annotation(file: PathBuf, ignore_not_found: bool) -> AnnotationJob {
    AnnotationJob {
        target: FeatureFileJob {
            cpu: Some(1),
            ..FeatureFileJob::new(file, "Homo sapiens", "gene")
        }
        .ignore_not_found(ignore_not_found),
        cvterm: "note".into(),
        ..Default::default()
    }
}

// ============================================================================
// Organisms and ontologies
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_insert_organism_is_idempotent() {
    let fixture = Fixture::new().await;

    let again = jobs::insert_organism(&fixture.ctx, OrganismRequest::new("Homo", "sapiens"))
        .await
        .unwrap();
    assert!(again.is_success());
    assert_eq!(again.stats.skipped, 1);

    let tables = fixture.store.snapshot().await;
    assert_eq!(tables.organisms.len(), 1);
    assert_eq!(tables.history.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ontology_reload_writes_nothing() {
    let fixture = Fixture::new().await;
    let before = fixture.store.snapshot().await;

    let so = fixture.stage("so-again.obo", SEQUENCE_ONTOLOGY);
    let report = jobs::load_ontology(
        &fixture.ctx,
        OntologyJob {
            cpu: Some(4),
            ..OntologyJob::sequence(so)
        },
    )
    .await
    .unwrap();

    assert!(report.is_success(), "{}", report.description);
    assert_eq!(report.stats.created, 0);
    assert_eq!(report.stats.skipped, 6);

    let after = fixture.store.snapshot().await;
    assert_eq!(after.cvterms.len(), before.cvterms.len());
    assert_eq!(after.cvterm_relationships.len(), before.cvterm_relationships.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_declared_is_a_links_terms_in_one_vocabulary() {
    let fixture = Fixture::new().await;
    let file = fixture.stage(
        "test.obo",
        "[Term]\nid: T:A\nname: A\nis_a: T:B\n\n[Term]\nid: T:B\nname: B\n\n[Typedef]\nid: is_a\nname: is_a\n",
    );

    let report = jobs::load_ontology(&fixture.ctx, OntologyJob::new(file, "test"))
        .await
        .unwrap();
    assert!(report.is_success(), "{}", report.description);

    let tables = fixture.store.snapshot().await;
    let terms = tables.cvterms_in("test");
    assert_eq!(terms.len(), 3);
    let id_of = |name: &str| terms.iter().find(|t| t.name == name).unwrap().cvterm_id;

    let edges: Vec<_> = tables
        .cvterm_relationships
        .iter()
        .filter(|(_, subject, _)| *subject == id_of("A"))
        .collect();
    assert_eq!(edges, vec![&(id_of("is_a"), id_of("A"), id_of("B"))]);
    assert!(tables.cvterm(id_of("is_a")).unwrap().is_relationshiptype);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_undeclared_relation_fails_the_job() {
    let fixture = Fixture::new().await;
    let file = fixture.stage("bad.obo", "[Term]\nid: T:A\nname: A\nrelationship: regulates T:B\n");

    let report = jobs::load_ontology(&fixture.ctx, OntologyJob::new(file, "test"))
        .await
        .unwrap();
    assert_eq!(report.status, JobStatus::Failure);
    assert_eq!(report.description, "relationship type not found: regulates");
}

// ============================================================================
// Sequences and GFF3
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_fasta_with_two_workers() {
    let fixture = Fixture::new().await;
    let file = fixture.stage("genome.fasta", ">chr1 first\nACGT\nACGT\n>chr2\nGGCC\n");

    let report = jobs::load_fasta(
        &fixture.ctx,
        FastaJob {
            cpu: Some(2),
            ..FastaJob::new(file, "Homo sapiens", "chromosome")
        },
    )
    .await
    .unwrap();
    assert!(report.is_success(), "{}", report.description);
    assert_eq!(report.description, "Done: 2 created, 0 updated, 0 skipped");

    let tables = fixture.store.snapshot().await;
    let chr1 = tables.feature("chr1").unwrap();
    assert_eq!(chr1.residues.as_deref(), Some("ACGTACGT"));
    assert_eq!(chr1.seqlen, Some(8));
    assert_eq!(chr1.name.as_deref(), Some("first"));
    assert_eq!(tables.feature("chr2").unwrap().residues.as_deref(), Some("GGCC"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gff_coordinates_strands_and_parents() {
    let fixture = Fixture::new().await;
    let genome = fixture.stage("genome.fasta", ">chr1\nACGT\n");
    jobs::load_fasta(&fixture.ctx, FastaJob::new(genome, "Homo sapiens", "chromosome"))
        .await
        .unwrap();

    let gff = fixture.stage(
        "genes.gff3",
        "##gff-version 3\n\
         chr1\t.\tgene\t1000\t9000\t.\t+\t.\tID=gene1;Name=EDEN;Note=kinase\n\
         chr1\t.\tmRNA\t1050\t9000\t.\t-\t.\tID=mRNA1;Parent=gene1\n\
         chr1\t.\tregion\t1\t20\t.\t.\t.\t.\n",
    );
    let report = jobs::load_gff(
        &fixture.ctx,
        GffJob {
            cpu: Some(2),
            ..GffJob::new(gff, "Homo sapiens")
        },
    )
    .await
    .unwrap();
    assert!(report.is_success(), "{}", report.description);

    let tables = fixture.store.snapshot().await;
    let chr1 = tables.feature("chr1").unwrap().feature_id;
    let location = |uniquename: &str| {
        let id = tables.feature(uniquename).unwrap().feature_id;
        let loc = tables.featurelocs.iter().find(|l| l.feature_id == id).unwrap();
        assert_eq!(loc.srcfeature_id, Some(chr1));
        (loc.fmin, loc.fmax, loc.strand)
    };
    assert_eq!(location("gene1"), (999, 9000, 1));
    assert_eq!(location("mRNA1"), (1049, 9000, -1));
    assert_eq!(location("region:chr1:1..20"), (0, 20, 0));

    let gene = tables.feature("gene1").unwrap();
    assert_eq!(gene.name.as_deref(), Some("EDEN"));
    let notes = tables.featureprops_of(gene.feature_id);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].value.as_deref(), Some("kinase"));

    assert_eq!(tables.feature_relationships.len(), 1);
    let link = &tables.feature_relationships[0];
    assert_eq!(link.subject_id, tables.feature("mRNA1").unwrap().feature_id);
    assert_eq!(link.object_id, gene.feature_id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gff_ignored_parent_type_leaves_children_unlinked() {
    let fixture = Fixture::new().await;
    let genome = fixture.stage("genome.fasta", ">chr1\nACGT\n");
    jobs::load_fasta(&fixture.ctx, FastaJob::new(genome, "Homo sapiens", "chromosome"))
        .await
        .unwrap();

    let gff = fixture.stage(
        "genes.gff3",
        "chr1\t.\tgene\t1\t4\t.\t+\t.\tID=gene1\nchr1\t.\tmRNA\t1\t4\t.\t+\t.\tID=mRNA1;Parent=gene1\n",
    );
    let report = jobs::load_gff(
        &fixture.ctx,
        GffJob {
            ignore: vec!["gene".into()],
            ..GffJob::new(gff, "Homo sapiens")
        },
    )
    .await
    .unwrap();
    assert!(report.is_success(), "{}", report.description);

    let tables = fixture.store.snapshot().await;
    assert!(tables.feature("gene1").is_none());
    assert!(tables.feature("mRNA1").is_some());
    assert!(tables.feature_relationships.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_gff_unknown_type_fails_before_any_feature() {
    let fixture = Fixture::new().await;
    let genome = fixture.stage("genome.fasta", ">chr1\nACGT\n");
    jobs::load_fasta(&fixture.ctx, FastaJob::new(genome, "Homo sapiens", "chromosome"))
        .await
        .unwrap();

    let gff = fixture.stage(
        "odd.gff3",
        "chr1\t.\tgene\t1\t4\t.\t+\t.\tID=g1\nchr1\t.\tpseudoexon\t1\t2\t.\t+\t.\tID=p1\n",
    );
    let report = jobs::load_gff(&fixture.ctx, GffJob::new(gff, "Homo sapiens"))
        .await
        .unwrap();
    assert_eq!(report.status, JobStatus::Failure);
    assert!(report.description.contains("pseudoexon"));
    assert!(fixture.store.snapshot().await.feature("g1").is_none());
}

// ============================================================================
// Tab-delimited annotation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_feature_stops_the_job() {
    let fixture = Fixture::new().await;
    fixture.load_genes(">g1\nAC\n>g3\nGT\n").await;
    let file = fixture.stage("notes.tsv", "g1\tfirst\nmissing\tsecond\ng3\tthird\n");

    let report = jobs::load_feature_annotation(&fixture.ctx, annotation(file, false))
        .await
        .unwrap();
    assert_eq!(report.status, JobStatus::Failure);
    assert_eq!(report.description, "feature not found: missing");

    let tables = fixture.store.snapshot().await;
    assert_eq!(tables.featureprops.len(), 1);
    assert_eq!(tables.featureprops[0].value.as_deref(), Some("first"));
    assert_eq!(tables.history.last().unwrap().status, JobStatus::Failure);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ignore_not_found_lists_missing_features() {
    let fixture = Fixture::new().await;
    fixture.load_genes(">g1\nAC\n>g3\nGT\n").await;
    let file = fixture.stage(
        "notes.tsv",
        "g1\tfirst\nmissing\tsecond\ng3\tthird\nmissing\tagain\nabsent\tfifth\n",
    );

    let report = jobs::load_feature_annotation(&fixture.ctx, annotation(file, true))
        .await
        .unwrap();
    assert!(report.is_success(), "{}", report.description);
    assert_eq!(report.not_found, vec!["missing", "absent"]);
    assert_eq!(report.description, "Done: 2 created, 0 updated, 0 skipped, 2 not found");

    let tables = fixture.store.snapshot().await;
    for name in ["g1", "g3"] {
        let id = tables.feature(name).unwrap().feature_id;
        assert_eq!(tables.featureprops_of(id).len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ambiguous_name_fails_even_when_ignoring_not_found() {
    let fixture = Fixture::new().await;
    fixture.load_genes(">a1 dup\nAC\n>a2 dup\nGT\n").await;
    let file = fixture.stage("notes.tsv", "dup\tnote\n");

    let report = jobs::load_feature_annotation(&fixture.ctx, annotation(file, true))
        .await
        .unwrap();
    assert_eq!(report.status, JobStatus::Failure);
    assert_eq!(
        report.description,
        "Ambiguous feature reference 'dup': 2 candidates match"
    );
    assert!(fixture.store.snapshot().await.featureprops.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_publication_links_by_doi() {
    let fixture = Fixture::new().await;
    fixture.load_genes(">g1\nAC\n").await;
    let bib = fixture.stage(
        "refs.bib",
        "@article{Mudado2019,\n  title = {machado},\n  author = {Mudado, M. and Cruz, A.},\n  journal = {Database},\n  year = {2019},\n  doi = {https://doi.org/10.1093/database/baz032}\n}\n",
    );
    let report = jobs::load_publication(&fixture.ctx, PublicationJob { file: bib, cpu: None })
        .await
        .unwrap();
    assert!(report.is_success(), "{}", report.description);

    let links = fixture.stage("links.tsv", "g1\t10.1093/database/baz032\n");
    let report = jobs::load_feature_publication(
        &fixture.ctx,
        FeatureFileJob::new(links, "Homo sapiens", "").ignore_not_found(true),
    )
    .await
    .unwrap();
    assert!(report.is_success(), "{}", report.description);
    assert!(report.not_found.is_empty());

    let tables = fixture.store.snapshot().await;
    assert_eq!(tables.feature_pubs.len(), 1);
    assert_eq!(tables.pubs[0].uniquename, "10.1093/database/baz032");
    assert_eq!(tables.pubauthors.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_doi_fails_even_when_ignoring_not_found() {
    let fixture = Fixture::new().await;
    fixture.load_genes(">g1\nAC\n").await;

    let links = fixture.stage("links.tsv", "g1\t10.1000/unknown\n");
    let report = jobs::load_feature_publication(
        &fixture.ctx,
        FeatureFileJob::new(links, "Homo sapiens", "").ignore_not_found(true),
    )
    .await
    .unwrap();
    assert!(!report.is_success());
    assert_eq!(report.description, "publication not found: 10.1000/unknown");
    assert!(report.not_found.is_empty());
    assert!(fixture.store.snapshot().await.feature_pubs.is_empty());
}

// ============================================================================
// Job history
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_empty_file_is_recorded_as_failure() {
    let fixture = Fixture::new().await;
    let file = fixture.stage("empty.bib", "");

    let report = jobs::load_publication(&fixture.ctx, PublicationJob { file, cpu: None })
        .await
        .unwrap();
    assert_eq!(report.status, JobStatus::Failure);
    assert!(report.description.starts_with("Validation error:"));

    let tables = fixture.store.snapshot().await;
    let last = tables.history.last().unwrap();
    assert_eq!(last.command, "load_publication");
    assert_eq!(last.status, JobStatus::Failure);
    assert_eq!(last.description.as_deref(), Some(report.description.as_str()));
    assert!(last.finished_at.is_some());
}
