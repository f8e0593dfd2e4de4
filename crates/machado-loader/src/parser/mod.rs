//! Input format parsers
//!
//! Every parser takes the whole file content and returns typed records, or a
//! `Parse` error naming the offending line. Jobs parse before they write, so
//! a malformed file never leaves partial rows behind.

pub mod bibtex;
pub mod fasta;
pub mod gff3;
pub mod obo;
pub mod tabular;

pub use bibtex::BibEntry;
pub use fasta::FastaRecord;
pub use gff3::{GffFeature, GffLine};
pub use obo::{OboDocument, OboEdge, OboStanza};
pub use tabular::TabRow;
