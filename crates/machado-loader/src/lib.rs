//! machado loader
//!
//! Ingestion subsystem that writes FASTA, GFF3, OBO, BibTeX and tab-delimited
//! annotation files into a Chado-style relational schema.
//!
//! # Architecture
//!
//! ```text
//! jobs (one fn per job kind)
//!   ├── ledger      start / success / failure history record
//!   ├── validator   preflight file check
//!   ├── cache       per-job organism / term memo
//!   ├── loaders     RecordLoader impls (ontology, sequence, feature, publication)
//!   └── engine      bounded worker pool, results as a stream
//! store             Store trait: PgStore (sqlx) and MemoryStore
//! ```
//!
//! # Example
//!
//! ```no_run
//! use machado_loader::jobs::{self, FastaJob, JobContext};
//! use machado_loader::store::MemoryStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let ctx = JobContext::new(Arc::new(MemoryStore::new()), "admin");
//! let report = jobs::load_fasta(
//!     &ctx,
//!     FastaJob::new("genome.fasta", "Homo sapiens", "chromosome"),
//! )
//! .await?;
//! println!("{}: {}", report.status, report.description);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod loaders;
pub mod models;
pub mod parser;
pub mod store;
pub mod validator;

pub use error::{IngestError, Result, StoreError};
