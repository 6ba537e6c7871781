//! SQL text split at `$n` placeholders.

use core::fmt;

use super::ParameterList;

/// A statement's SQL with the positions of its numbered placeholders.
///
/// Placeholders inside quoted literals, quoted identifiers, comments and
/// dollar-quoted bodies are left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    sql: String,
    // (byte range of `$n`, n)
    placeholders: Vec<(core::ops::Range<usize>, usize)>,
    parameter_count: usize,
}

impl Query {
    /// Scan `sql` for placeholders.
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let placeholders = scan(sql.as_bytes());
        let parameter_count = placeholders.iter().map(|(_, n)| *n).max().unwrap_or(0);
        Self {
            sql,
            placeholders,
            parameter_count,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Highest placeholder number.
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// An unset list sized for this query.
    pub fn create_parameter_list(&self) -> ParameterList {
        ParameterList::new(self.parameter_count)
    }

    /// The SQL with each placeholder replaced by its rendered value.
    pub fn render(&self, params: &ParameterList, standard_conforming_strings: bool) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut last = 0;
        for (range, n) in &self.placeholders {
            out.push_str(&self.sql[last..range.start]);
            match params.render(*n, standard_conforming_strings) {
                Ok(text) => out.push_str(&text),
                Err(_) => out.push_str(&self.sql[range.clone()]),
            }
            last = range.end;
        }
        out.push_str(&self.sql[last..]);
        out
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

fn scan(sql: &[u8]) -> Vec<(core::ops::Range<usize>, usize)> {
    let mut found = Vec::new();
    let mut i = 0;
    while i < sql.len() {
        match sql[i] {
            b'\'' | b'"' => i = skip_quoted(sql, i),
            b'-' if sql.get(i + 1) == Some(&b'-') => {
                i = memchr::memchr(b'\n', &sql[i..]).map_or(sql.len(), |p| i + p + 1);
            }
            b'/' if sql.get(i + 1) == Some(&b'*') => i = skip_block_comment(sql, i),
            b'$' => {
                let digits = sql[i + 1..]
                    .iter()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                if digits > 0 {
                    let end = i + 1 + digits;
                    let number = core::str::from_utf8(&sql[i + 1..end])
                        .ok()
                        .and_then(|s| s.parse::<usize>().ok());
                    if let Some(n) = number
                        && n > 0
                    {
                        found.push((i..end, n));
                    }
                    i = end;
                } else {
                    i = skip_dollar_quoted(sql, i);
                }
            }
            _ => i += 1,
        }
    }
    found
}

// `start` is at the opening `/*`. Block comments nest.
fn skip_block_comment(sql: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < sql.len() {
        match (sql[i], sql[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    sql.len()
}

// `start` is at the opening quote. Doubled quotes escape.
fn skip_quoted(sql: &[u8], start: usize) -> usize {
    let quote = sql[start];
    let mut i = start + 1;
    while i < sql.len() {
        if sql[i] == quote {
            if sql.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    sql.len()
}

// `start` is at a `$` not followed by a digit.
fn skip_dollar_quoted(sql: &[u8], start: usize) -> usize {
    let tag_len = sql[start + 1..]
        .iter()
        .take_while(|b| b.is_ascii_alphanumeric() || **b == b'_')
        .count();
    let tag_end = start + 1 + tag_len;
    if sql.get(tag_end) != Some(&b'$') {
        return start + 1;
    }
    let tag = &sql[start..=tag_end];
    match memchr::memmem::find(&sql[tag_end + 1..], tag) {
        Some(p) => tag_end + 1 + p + tag.len(),
        None => sql.len(),
    }
}
