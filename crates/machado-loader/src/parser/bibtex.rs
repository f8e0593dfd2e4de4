//! BibTeX parser, enough of it for publication records
//!
//! Handles `@type{key, field = {braced}, field = "quoted", field = 1999}`;
//! `@comment`, `@preamble` and `@string` blocks are skipped.

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibEntry {
    /// Lower-cased entry type (`article`, `book`, ...)
    pub entry_type: String,
    pub key: String,
    /// Lower-cased field names with brace-stripped values
    pub fields: Vec<(String, String)>,
    pub line: usize,
}

impl BibEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// DOI without any `https://doi.org/` prefix
    pub fn doi(&self) -> Option<&str> {
        self.field("doi").map(|doi| {
            doi.trim_start_matches("https://doi.org/")
                .trim_start_matches("http://dx.doi.org/")
                .trim_start_matches("doi:")
        })
    }

    /// (surname, given names) in author order
    pub fn authors(&self) -> Vec<(String, Option<String>)> {
        let Some(authors) = self.field("author") else {
            return Vec::new();
        };
        authors
            .split(" and ")
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(split_author)
            .collect()
    }
}

fn split_author(author: &str) -> (String, Option<String>) {
    if let Some((surname, given)) = author.split_once(',') {
        let given = given.trim();
        return (
            surname.trim().to_string(),
            (!given.is_empty()).then(|| given.to_string()),
        );
    }
    match author.rsplit_once(' ') {
        Some((given, surname)) => (surname.to_string(), Some(given.trim().to_string())),
        None => (author.to_string(), None),
    }
}

struct Cursor<'a> {
    content: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.content[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn line(&self) -> usize {
        self.content[..self.pos].matches('\n').count() + 1
    }

    fn error(&self, message: impl Into<String>) -> IngestError {
        IngestError::parse("BibTeX", self.line(), message)
    }

    fn expect(&mut self, wanted: char) -> Result<()> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == wanted => Ok(()),
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", wanted, c))),
            None => Err(self.error(format!("expected '{}', found end of input", wanted))),
        }
    }

    /// Identifier characters up to the first delimiter
    fn take_until(&mut self, stop: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(|c| !stop(c)) {
            self.bump();
        }
        &self.content[start..self.pos]
    }

    /// Body of a `{...}` group, the opening brace already consumed
    fn braced(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let mut depth = 1usize;
        loop {
            match self.bump() {
                Some('{') => depth += 1,
                Some('}') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(&self.content[start..self.pos - 1]);
                    }
                },
                Some('\\') => {
                    self.bump();
                },
                Some(_) => {},
                None => return Err(self.error("unbalanced braces")),
            }
        }
    }

    fn quoted(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let mut depth = 0usize;
        loop {
            match self.bump() {
                Some('{') => depth += 1,
                Some('}') => depth = depth.saturating_sub(1),
                Some('\\') => {
                    self.bump();
                },
                Some('"') if depth == 0 => return Ok(&self.content[start..self.pos - 1]),
                Some(_) => {},
                None => return Err(self.error("unterminated quoted value")),
            }
        }
    }

    fn value(&mut self) -> Result<String> {
        self.skip_ws();
        let raw = match self.peek() {
            Some('{') => {
                self.bump();
                self.braced()?
            },
            Some('"') => {
                self.bump();
                self.quoted()?
            },
            Some(_) => self.take_until(|c| c == ',' || c == '}' || c.is_whitespace()),
            None => return Err(self.error("missing field value")),
        };
        Ok(clean_value(raw))
    }
}

fn clean_value(raw: &str) -> String {
    raw.replace(['{', '}'], "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse all entries of a `.bib` file
pub fn parse(content: &str) -> Result<Vec<BibEntry>> {
    let mut cursor = Cursor { content, pos: 0 };
    let mut entries = Vec::new();
    let mut keys = std::collections::HashSet::new();

    loop {
        cursor.take_until(|c| c == '@');
        if cursor.bump().is_none() {
            break;
        }
        let line = cursor.line();
        let entry_type = cursor
            .take_until(|c| c == '{' || c == '(' || c.is_whitespace())
            .to_lowercase();
        cursor.expect('{')?;

        if matches!(entry_type.as_str(), "comment" | "preamble" | "string") {
            cursor.braced()?;
            continue;
        }

        cursor.skip_ws();
        let key = cursor.take_until(|c| c == ',' || c == '}').trim().to_string();
        if key.is_empty() {
            return Err(cursor.error("entry without citation key"));
        }
        if !keys.insert(key.clone()) {
            return Err(cursor.error(format!("duplicate citation key '{}'", key)));
        }

        let mut fields = Vec::new();
        loop {
            cursor.skip_ws();
            match cursor.bump() {
                Some('}') => break,
                Some(',') => {
                    cursor.skip_ws();
                    if cursor.peek() == Some('}') {
                        cursor.bump();
                        break;
                    }
                    let name = cursor
                        .take_until(|c| c == '=' || c.is_whitespace())
                        .trim()
                        .to_lowercase();
                    if name.is_empty() {
                        return Err(cursor.error("field without name"));
                    }
                    cursor.expect('=')?;
                    let value = cursor.value()?;
                    fields.push((name, value));
                },
                Some(c) => return Err(cursor.error(format!("unexpected '{}' in entry '{}'", c, key))),
                None => return Err(cursor.error(format!("unterminated entry '{}'", key))),
            }
        }

        entries.push(BibEntry {
            entry_type,
            key,
            fields,
            line,
        });
    }

    Ok(entries)
}
