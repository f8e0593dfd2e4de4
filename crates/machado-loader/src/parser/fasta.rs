//! FASTA parser over [`noodles::fasta`]

use crate::error::{IngestError, Result};
use noodles::fasta;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastaRecord {
    /// First word of the header line
    pub id: String,
    /// Rest of the header line, if any
    pub description: Option<String>,
    /// Residues with whitespace removed
    pub sequence: String,
}

/// Parse every record of a FASTA file.
///
/// Residue lines before the first header, headers without an identifier and
/// repeated identifiers are parse errors reported at the line where the
/// offending record starts.
pub fn parse(content: &str) -> Result<Vec<FastaRecord>> {
    let mut reader = fasta::Reader::new(content.as_bytes());
    let mut records: Vec<FastaRecord> = Vec::new();
    let mut seen = HashSet::new();

    for result in reader.records() {
        let index = records.len();
        let record = result.map_err(|e| IngestError::parse("FASTA", record_line(content, index), e.to_string()))?;

        let definition = record.definition();
        let id = String::from_utf8_lossy(definition.name()).into_owned();
        if id.is_empty() {
            return Err(IngestError::parse(
                "FASTA",
                record_line(content, index),
                "header without identifier",
            ));
        }
        if !seen.insert(id.clone()) {
            return Err(IngestError::parse(
                "FASTA",
                record_line(content, index),
                format!("duplicate identifier '{}'", id),
            ));
        }

        let description = definition
            .description()
            .map(|d| String::from_utf8_lossy(d).trim().to_string())
            .filter(|d| !d.is_empty());
        let sequence = record
            .sequence()
            .as_ref()
            .iter()
            .filter(|b| !b.is_ascii_whitespace())
            .map(|&b| char::from(b))
            .collect();

        records.push(FastaRecord {
            id,
            description,
            sequence,
        });
    }

    debug!(records = records.len(), "Parsed FASTA");
    Ok(records)
}

/// 1-based line where record `index` starts; the first record owns the top
/// of the file
fn record_line(content: &str, index: usize) -> usize {
    if index == 0 {
        return 1;
    }
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| line.starts_with('>'))
        .nth(index)
        .map_or(1, |(number, _)| number + 1)
}
