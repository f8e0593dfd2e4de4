//! GFF3 parser over [`noodles::gff`]
//!
//! noodles parses each line into a record and decodes the RFC 3986 percent
//! escapes of column 9. Lines sharing an `ID` describe one feature with
//! several locations (e.g. a CDS split across exons).

use crate::error::{IngestError, Result};
use noodles::gff;
use noodles::gff::record::attributes::field::Value;
use noodles::gff::record::{Phase, Strand};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct GffLine {
    pub seqid: String,
    pub source: String,
    pub feature_type: String,
    /// 1-based, inclusive
    pub start: i64,
    /// 1-based, inclusive
    pub end: i64,
    pub score: Option<f64>,
    /// +1, -1 or 0
    pub strand: i16,
    pub phase: Option<i16>,
    pub attributes: Vec<(String, Vec<String>)>,
    pub line: usize,
}

impl GffLine {
    /// Interbase start (0-based)
    pub fn fmin(&self) -> i64 {
        self.start - 1
    }

    /// Interbase end (exclusive)
    pub fn fmax(&self) -> i64 {
        self.end
    }

    pub fn values(&self, key: &str) -> &[String] {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn first(&self, key: &str) -> Option<&str> {
        self.values(key).first().map(String::as_str)
    }
}

/// One feature: all lines sharing an ID, in file order
#[derive(Debug, Clone, PartialEq)]
pub struct GffFeature {
    pub uniquename: String,
    pub feature_type: String,
    pub lines: Vec<GffLine>,
}

impl GffFeature {
    pub fn first_line(&self) -> &GffLine {
        // groups are never built empty
        &self.lines[0]
    }

    /// `Parent` ids across every line, without repeats
    pub fn parents(&self) -> Vec<&str> {
        let mut parents: Vec<&str> = Vec::new();
        for line in &self.lines {
            for parent in line.values("Parent") {
                if !parents.contains(&parent.as_str()) {
                    parents.push(parent);
                }
            }
        }
        parents
    }
}

/// Parse GFF3 lines up to `##FASTA` or end of input
pub fn parse(content: &str) -> Result<Vec<GffLine>> {
    let mut lines = Vec::new();

    for (number, raw) in content.lines().enumerate() {
        let line_no = number + 1;
        let line = raw.trim_end_matches(['\r', '\n']);

        if line == "##FASTA" {
            break;
        }
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        lines.push(parse_line(line, line_no)?);
    }

    debug!(lines = lines.len(), "Parsed GFF3");
    Ok(lines)
}

fn parse_line(line: &str, line_no: usize) -> Result<GffLine> {
    let record = line
        .parse::<gff::Record>()
        .map_err(|e| IngestError::parse("GFF3", line_no, e.to_string()))?;

    let start = usize::from(record.start()) as i64;
    let end = usize::from(record.end()) as i64;
    if end < start {
        return Err(IngestError::parse(
            "GFF3",
            line_no,
            format!("invalid interval {}..{}", start, end),
        ));
    }

    let strand = match record.strand() {
        Strand::Forward => 1,
        Strand::Reverse => -1,
        Strand::None | Strand::Unknown => 0,
    };

    let phase = record.phase().map(|phase| match phase {
        Phase::Zero => 0,
        Phase::One => 1,
        Phase::Two => 2,
    });

    let attributes = record
        .attributes()
        .iter()
        .map(|(key, value)| {
            let values = match value {
                Value::String(value) => vec![value.clone()],
                Value::Array(values) => values.clone(),
            };
            let values = values.into_iter().filter(|v| !v.trim().is_empty()).collect();
            (key.clone(), values)
        })
        .collect();

    Ok(GffLine {
        seqid: record.reference_sequence_name().to_string(),
        source: record.source().to_string(),
        feature_type: record.ty().to_string(),
        start,
        end,
        score: record.score().map(f64::from),
        strand,
        phase,
        attributes,
        line: line_no,
    })
}

/// Group lines into features by `ID`.
///
/// Lines without an `ID` become single-line features named
/// `<type>:<seqid>:<start>..<end>`. Lines sharing an ID must share a type.
pub fn group(lines: Vec<GffLine>) -> Result<Vec<GffFeature>> {
    let mut features: Vec<GffFeature> = Vec::new();
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for line in lines {
        let Some(id) = line.first("ID").map(str::to_string) else {
            features.push(GffFeature {
                uniquename: format!(
                    "{}:{}:{}..{}",
                    line.feature_type, line.seqid, line.start, line.end
                ),
                feature_type: line.feature_type.clone(),
                lines: vec![line],
            });
            continue;
        };

        match by_id.get(&id) {
            Some(&index) => {
                let feature = &mut features[index];
                if feature.feature_type != line.feature_type {
                    return Err(IngestError::parse(
                        "GFF3",
                        line.line,
                        format!(
                            "ID '{}' used for types '{}' and '{}'",
                            id, feature.feature_type, line.feature_type
                        ),
                    ));
                }
                feature.lines.push(line);
            },
            None => {
                by_id.insert(id.clone(), features.len());
                features.push(GffFeature {
                    uniquename: id,
                    feature_type: line.feature_type.clone(),
                    lines: vec![line],
                });
            },
        }
    }

    Ok(features)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = "##gff-version 3\n\
chr1\tRefSeq\tgene\t1000\t9000\t.\t+\t.\tID=gene1;Name=EDEN;Note=protein%20kinase\n\
chr1\tRefSeq\tmRNA\t1050\t9000\t.\t+\t.\tID=mRNA1;Parent=gene1;Dbxref=GenBank:NM_1,GO:0004672\n\
chr1\tRefSeq\tCDS\t1201\t1500\t.\t+\t0\tID=cds1;Parent=mRNA1\n\
chr1\tRefSeq\tCDS\t3000\t3902\t.\t+\t2\tID=cds1;Parent=mRNA1\n\
chr1\tRefSeq\tregion\t1\t20\t.\t?\t.\t.\n\
##FASTA\n\
>chr1\n\
ACGT\n";

    #[test]
    fn test_coordinates_and_strand() {
        let lines = parse(SAMPLE).unwrap();
        assert_eq!(lines.len(), 5);

        let gene = &lines[0];
        assert_eq!((gene.fmin(), gene.fmax()), (999, 9000));
        assert_eq!(gene.strand, 1);
        assert_eq!(gene.first("Note"), Some("protein kinase"));

        assert_eq!(lines[3].phase, Some(2));
        assert_eq!(lines[4].strand, 0);
        assert!(lines[4].attributes.is_empty());
        assert_eq!(
            lines[1].values("Dbxref"),
            &["GenBank:NM_1".to_string(), "GO:0004672".to_string()]
        );
    }

    #[test]
    fn test_group_by_id() {
        let features = group(parse(SAMPLE).unwrap()).unwrap();
        assert_eq!(features.len(), 4);

        let cds = &features[2];
        assert_eq!(cds.uniquename, "cds1");
        assert_eq!(cds.lines.len(), 2);
        assert_eq!(cds.parents(), vec!["mRNA1"]);

        assert_eq!(features[3].uniquename, "region:chr1:1..20");
    }

    #[test]
    fn test_minus_strand_and_bad_strand() {
        let line = parse("c\ts\texon\t5\t10\t.\t-\t.\tID=e1\n").unwrap();
        assert_eq!(line[0].strand, -1);
        assert_eq!((line[0].fmin(), line[0].fmax()), (4, 10));

        let err = parse("c\ts\texon\t5\t10\t.\tx\t.\tID=e1\n").unwrap_err();
        assert!(matches!(err, IngestError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_wrong_column_count_and_interval() {
        assert!(parse("c\ts\texon\t5\t10\n").is_err());
        assert!(parse("c\ts\texon\t10\t5\t.\t+\t.\tID=e1\n").is_err());
    }

    #[test]
    fn test_shared_id_with_different_types_is_rejected() {
        let content = "c\ts\tgene\t1\t10\t.\t+\t.\tID=x\nc\ts\tmRNA\t1\t10\t.\t+\t.\tID=x\n";
        assert!(group(parse(content).unwrap()).is_err());
    }

    #[test]
    fn test_escaped_separators_stay_in_one_value() {
        let lines = parse("c\ts\tgene\t1\t10\t.\t+\t.\tID=g1;Note=a%3Bb%2Cc\n").unwrap();
        assert_eq!(lines[0].values("Note"), &["a;b,c".to_string()]);
    }
}
