//! OBO 1.2/1.4 parser ([Term] and [Typedef] stanzas)

use crate::error::{IngestError, Result};
use std::collections::HashSet;
use tracing::{debug, info};

/// Typed edge declared inside a stanza (`is_a` or `relationship`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OboEdge {
    /// `is_a`, or the relation id/name of a `relationship` tag
    pub relation: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OboStanza {
    pub id: String,
    pub name: Option<String>,
    pub namespace: Option<String>,
    pub definition: Option<String>,
    pub comment: Option<String>,
    pub is_obsolete: bool,
    pub xrefs: Vec<String>,
    pub edges: Vec<OboEdge>,
    /// Line of the stanza header, for error messages
    pub line: usize,
}

impl OboStanza {
    /// Name to store the term under; falls back to the id
    pub fn term_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OboDocument {
    pub ontology: Option<String>,
    pub default_namespace: Option<String>,
    pub typedefs: Vec<OboStanza>,
    pub terms: Vec<OboStanza>,
}

impl OboDocument {
    pub fn edge_count(&self) -> usize {
        self.typedefs
            .iter()
            .chain(self.terms.iter())
            .map(|s| s.edges.len())
            .sum()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Header,
    Term,
    Typedef,
    Ignored,
}

/// Parse an OBO file
pub fn parse(content: &str) -> Result<OboDocument> {
    let mut doc = OboDocument::default();
    let mut section = Section::Header;
    let mut current: Option<OboStanza> = None;
    let mut term_ids = HashSet::new();
    let mut typedef_ids = HashSet::new();

    for (number, raw) in content.lines().enumerate() {
        let line_no = number + 1;
        let line = raw.trim();

        if line.is_empty() || line.starts_with('!') {
            continue;
        }

        if line.starts_with('[') {
            finish_stanza(&mut doc, section, current.take(), &mut term_ids, &mut typedef_ids)?;
            section = match line {
                "[Term]" => Section::Term,
                "[Typedef]" => Section::Typedef,
                _ => Section::Ignored,
            };
            if section != Section::Ignored {
                current = Some(OboStanza {
                    line: line_no,
                    ..Default::default()
                });
            }
            continue;
        }

        let (tag, value) = line
            .split_once(':')
            .map(|(t, v)| (t.trim(), v.trim()))
            .ok_or_else(|| IngestError::parse("OBO", line_no, format!("expected 'tag: value', got '{}'", line)))?;

        match section {
            Section::Header => match tag {
                "ontology" => doc.ontology = Some(value.to_string()),
                "default-namespace" => doc.default_namespace = Some(value.to_string()),
                _ => {},
            },
            Section::Ignored => {},
            Section::Term | Section::Typedef => {
                if let Some(stanza) = current.as_mut() {
                    apply_tag(stanza, tag, value, line_no)?;
                }
            },
        }
    }

    finish_stanza(&mut doc, section, current.take(), &mut term_ids, &mut typedef_ids)?;

    info!(
        typedefs = doc.typedefs.len(),
        terms = doc.terms.len(),
        edges = doc.edge_count(),
        "Parsed OBO"
    );
    Ok(doc)
}

fn finish_stanza(
    doc: &mut OboDocument,
    section: Section,
    stanza: Option<OboStanza>,
    term_ids: &mut HashSet<String>,
    typedef_ids: &mut HashSet<String>,
) -> Result<()> {
    let Some(stanza) = stanza else {
        return Ok(());
    };
    if stanza.id.is_empty() {
        return Err(IngestError::parse("OBO", stanza.line, "stanza without id"));
    }

    let (ids, target) = match section {
        Section::Term => (term_ids, &mut doc.terms),
        Section::Typedef => (typedef_ids, &mut doc.typedefs),
        Section::Header | Section::Ignored => return Ok(()),
    };
    if !ids.insert(stanza.id.clone()) {
        return Err(IngestError::parse(
            "OBO",
            stanza.line,
            format!("duplicate stanza id '{}'", stanza.id),
        ));
    }
    target.push(stanza);
    Ok(())
}

fn apply_tag(stanza: &mut OboStanza, tag: &str, value: &str, line_no: usize) -> Result<()> {
    match tag {
        "id" => stanza.id = value.to_string(),
        "name" => stanza.name = Some(value.to_string()),
        "namespace" => stanza.namespace = Some(value.to_string()),
        "def" => stanza.definition = Some(extract_quoted_text(value)),
        "comment" => stanza.comment = Some(value.to_string()),
        "is_obsolete" => stanza.is_obsolete = value == "true",
        "xref" => {
            if let Some(xref) = strip_trailing_comment(value).split_whitespace().next() {
                stanza.xrefs.push(xref.to_string());
            }
        },
        "is_a" => {
            let target = strip_trailing_comment(value)
                .split_whitespace()
                .next()
                .ok_or_else(|| IngestError::parse("OBO", line_no, "is_a without target"))?;
            stanza.edges.push(OboEdge {
                relation: "is_a".to_string(),
                target: target.to_string(),
            });
        },
        "relationship" => {
            // part_of GO:0008150 ! biological_process
            let mut parts = strip_trailing_comment(value).split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(relation), Some(target)) => stanza.edges.push(OboEdge {
                    relation: relation.to_string(),
                    target: target.to_string(),
                }),
                _ => {
                    return Err(IngestError::parse(
                        "OBO",
                        line_no,
                        format!("relationship needs a type and a target: '{}'", value),
                    ))
                },
            }
        },
        other => debug!(tag = other, line = line_no, "Ignoring OBO tag"),
    }
    Ok(())
}

/// `"text" [refs]` -> `text`, honouring `\"` escapes
fn extract_quoted_text(text: &str) -> String {
    let Some(rest) = text.strip_prefix('"') else {
        return text.to_string();
    };
    let mut out = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            },
            '"' => return out,
            c => out.push(c),
        }
    }
    out
}

fn strip_trailing_comment(value: &str) -> &str {
    match value.find(" !") {
        Some(pos) => value[..pos].trim(),
        None => value.trim(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"format-version: 1.2
ontology: ro
default-namespace: relationship

[Typedef]
id: part_of
name: part of
xref: BFO:0000050
is_transitive: true

[Term]
id: SO:0000704
name: gene
def: "A region \"of\" DNA." [SO:ke]
is_a: SO:0001411 ! biological_region
relationship: part_of SO:0000001 ! region

[Term]
id: SO:0001411
name: biological_region
is_obsolete: false

[Instance]
id: ignored
"#;

    #[test]
    fn test_parse_typedefs_terms_and_edges() {
        let doc = parse(SAMPLE).unwrap();

        assert_eq!(doc.ontology.as_deref(), Some("ro"));
        assert_eq!(doc.default_namespace.as_deref(), Some("relationship"));
        assert_eq!(doc.typedefs.len(), 1);
        assert_eq!(doc.typedefs[0].xrefs, vec!["BFO:0000050"]);

        let gene = &doc.terms[0];
        assert_eq!(gene.term_name(), "gene");
        assert_eq!(gene.definition.as_deref(), Some("A region \"of\" DNA."));
        assert_eq!(
            gene.edges,
            vec![
                OboEdge {
                    relation: "is_a".into(),
                    target: "SO:0001411".into()
                },
                OboEdge {
                    relation: "part_of".into(),
                    target: "SO:0000001".into()
                },
            ]
        );
        assert_eq!(doc.terms.len(), 2);
        assert_eq!(doc.edge_count(), 2);
    }

    #[test]
    fn test_stanza_without_id_is_rejected() {
        let err = parse("[Term]\nname: nameless\n").unwrap_err();
        assert!(matches!(err, IngestError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_malformed_tag_line_is_rejected() {
        let err = parse("[Term]\nid: A\nthis is not a tag\n").unwrap_err();
        assert!(matches!(err, IngestError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_relationship_without_target_is_rejected() {
        assert!(parse("[Term]\nid: A\nrelationship: part_of\n").is_err());
    }

    #[test]
    fn test_duplicate_term_ids_are_rejected() {
        assert!(parse("[Term]\nid: A\n\n[Term]\nid: A\n").is_err());
    }
}
