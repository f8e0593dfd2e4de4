//! Two-column tab-delimited files: `name<TAB>value`

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabRow {
    pub line: usize,
    /// Feature name in the first column
    pub name: String,
    /// Everything after the first tab, trimmed
    pub value: String,
}

/// Parse `name\tvalue` rows, skipping blank and `#` lines.
///
/// The value keeps any further tabs so free-text annotations survive intact.
pub fn parse(content: &str) -> Result<Vec<TabRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .comment(Some(b'#'))
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| {
            let line = e.position().map_or(0, |p| p.line() as usize);
            IngestError::parse("TSV", line, e.to_string())
        })?;
        let line_no = record.position().map_or(0, |p| p.line() as usize);

        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        if record.len() < 2 {
            return Err(IngestError::parse("TSV", line_no, "expected two tab-separated columns"));
        }

        let name = record.get(0).unwrap_or_default().trim();
        let value = record.iter().skip(1).collect::<Vec<_>>().join("\t");
        let value = value.trim();
        if name.is_empty() || value.is_empty() {
            return Err(IngestError::parse("TSV", line_no, "empty column"));
        }

        rows.push(TabRow {
            line: line_no,
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    Ok(rows)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rows() {
        let rows = parse("# feature\tnote\nAT1G01010\tNAC domain\tprotein\nAT1G01020\tGO:0005634\n").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[0].name, "AT1G01010");
        assert_eq!(rows[0].value, "NAC domain\tprotein");
        assert_eq!(rows[1].value, "GO:0005634");
    }

    #[test]
    fn test_quotes_are_kept_verbatim() {
        let rows = parse("g1\t\"zinc finger\" protein\n").unwrap();
        assert_eq!(rows[0].value, "\"zinc finger\" protein");
    }

    #[test]
    fn test_missing_column_is_rejected() {
        let err = parse("AT1G01010\n").unwrap_err();
        assert!(matches!(err, IngestError::Parse { line: 1, .. }));
        assert!(parse("AT1G01010\t \n").is_err());
    }
}
