//! MD5 checksum utilities
//!
//! Chado stores `feature.md5checksum` as the lowercase hex MD5 of the
//! residues, which is what `residues_md5` produces.

use crate::error::Result;
use std::io::Read;
use std::path::Path;

/// Compute MD5 checksum of bytes
pub fn compute_md5(data: &[u8]) -> String {
    let digest = md5::compute(data);
    format!("{:x}", digest)
}

/// MD5 of a residue string, case-folded to upper case first
pub fn residues_md5(residues: &str) -> String {
    compute_md5(residues.to_ascii_uppercase().as_bytes())
}

/// Compute MD5 checksum of a file, streaming it in 8 KiB blocks
pub fn compute_file_md5(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", context.compute()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_compute_md5() {
        assert_eq!(compute_md5(b"Hello, world!"), "6cd3556deb0da54bca060b4c39479839");
    }

    #[test]
    fn test_residues_md5_ignores_case() {
        assert_eq!(residues_md5("acgt"), residues_md5("ACGT"));
        assert_eq!(residues_md5("test"), compute_md5(b"TEST"));
    }

    #[test]
    fn test_file_md5_matches_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"test data").unwrap();

        let digest = compute_file_md5(file.path()).unwrap();
        assert_eq!(digest, "eb733a00c0c9d336e65691a37ab54293");
        assert!(compute_file_md5("/nonexistent/input.fasta").is_err());
    }
}
