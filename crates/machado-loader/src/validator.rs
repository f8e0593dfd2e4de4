//! Preflight check of a staged input file

use crate::error::{IngestError, Result};
use std::path::Path;

/// Fail with `Validation` unless `path` is a readable, non-empty regular file.
pub fn validate(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();

    let metadata = std::fs::metadata(path).map_err(|e| {
        IngestError::Validation(format!("{}: {}", path.display(), e))
    })?;

    if !metadata.is_file() {
        return Err(IngestError::Validation(format!(
            "{} is not a regular file",
            path.display()
        )));
    }

    if metadata.len() == 0 {
        return Err(IngestError::Validation(format!("{} is empty", path.display())));
    }

    // metadata succeeds on files we may not open
    std::fs::File::open(path).map_err(|e| {
        IngestError::Validation(format!("{} is not readable: {}", path.display(), e))
    })?;

    Ok(())
}
