//! machado Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the machado loader workspace.
//!
//! # Overview
//!
//! - **Error Handling**: common error type and result alias
//! - **Logging**: `tracing` subscriber configuration shared by every binary
//! - **Checksums**: MD5 digests of residues and staged files
//!
//! # Example
//!
//! ```no_run
//! use machado_common::checksum::residues_md5;
//!
//! let digest = residues_md5("ACGT");
//! assert_eq!(digest.len(), 32);
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};
