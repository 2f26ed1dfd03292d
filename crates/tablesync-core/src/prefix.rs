//! Table-prefix rewriting.
//!
//! Structure definitions and hand-written SQL refer to tables through a
//! placeholder prefix (conventionally `#__`) that is swapped for the real
//! deployment prefix right before the text reaches the database. The swap
//! has to leave string literals alone, except for the quoted sequence names
//! handed to `nextval(...)` and `currval(...)`, which are object names in
//! disguise and must be prefixed like any table.
//!
//! Two strategies are provided:
//!
//! - [`rewrite`] scans the text once and tracks whether it is inside a
//!   literal. Literals follow PostgreSQL's default string rules: inside a
//!   plain `'...'` literal a backslash is an ordinary character, so `'C:\'`
//!   is complete; only in an escape string (`E'...'`) does an odd run of
//!   backslashes keep the next quote from closing it.
//! - [`rewrite_legacy`] reproduces the historic split-on-quote heuristic,
//!   including its blind spots: everything after a `currval(` or `nextval(`
//!   is rewritten (even unrelated literals further along), and an escaped
//!   quote shifts the inside/outside parity of every later fragment.

use serde::{Deserialize, Serialize};

const SEQUENCE_FUNCTIONS: [&str; 2] = ["currval(", "nextval("];

/// How literals are detected while rewriting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RewriteMode {
    /// Single pass with explicit literal tracking.
    #[default]
    Scanner,
    /// Split-on-quote parity heuristic, kept for compatibility testing.
    LegacySplit,
}

/// Placeholder and real prefix, carried explicitly through every call that
/// needs them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRewriter {
    /// Logical prefix used in definitions (e.g. `#__`).
    pub placeholder: String,
    /// Real table prefix of the deployment (e.g. `jos_`).
    pub prefix: String,
    /// Literal detection strategy.
    pub mode: RewriteMode,
}

impl PrefixRewriter {
    /// Creates a rewriter using the default [`RewriteMode::Scanner`].
    #[must_use]
    pub fn new(placeholder: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            placeholder: placeholder.into(),
            prefix: prefix.into(),
            mode: RewriteMode::Scanner,
        }
    }

    /// Sets the literal detection strategy.
    #[must_use]
    pub const fn with_mode(mut self, mode: RewriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Rewrites a SQL statement.
    #[must_use]
    pub fn rewrite(&self, sql: &str) -> String {
        match self.mode {
            RewriteMode::Scanner => rewrite(sql, &self.placeholder, &self.prefix),
            RewriteMode::LegacySplit => rewrite_legacy(sql, &self.placeholder, &self.prefix),
        }
    }

    /// Resolves a table name that may start with the placeholder.
    #[must_use]
    pub fn table_name(&self, name: &str) -> String {
        real_table_name(name, &self.placeholder, &self.prefix)
    }
}

/// Replaces `placeholder` with `prefix` everywhere except inside string
/// literals that are not the argument of a sequence function.
#[must_use]
pub fn rewrite(sql: &str, placeholder: &str, prefix: &str) -> String {
    if placeholder.is_empty() || !sql.contains(placeholder) {
        return sql.to_string();
    }

    let mut out = String::with_capacity(sql.len());
    let mut in_literal = false;
    let mut escape_string = false;
    let mut sequence_argument = false;
    let mut rest = sql;

    while let Some(ch) = rest.chars().next() {
        if (!in_literal || sequence_argument) && rest.starts_with(placeholder) {
            out.push_str(prefix);
            rest = &rest[placeholder.len()..];
            continue;
        }

        if ch == '\'' && !(in_literal && escape_string && escaped_by_backslash(&out)) {
            if !in_literal && !out.ends_with('\'') {
                // A literal reopened right after closing ('') continues the
                // previous one, so only a fresh literal is classified.
                escape_string = opens_escape_string(&out);
                let head = if escape_string {
                    &out[..out.len() - 1]
                } else {
                    out.as_str()
                };
                sequence_argument = opens_sequence_argument(head);
            }
            in_literal = !in_literal;
        }

        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }

    out
}

/// Whether the text written so far ends with `nextval(` or `currval(`,
/// ignoring trailing whitespace.
fn opens_sequence_argument(written: &str) -> bool {
    let head = written.trim_end();
    SEQUENCE_FUNCTIONS.iter().any(|func| {
        head.len() >= func.len()
            && head.is_char_boundary(head.len() - func.len())
            && head[head.len() - func.len()..].eq_ignore_ascii_case(func)
    })
}

/// Whether a quote following `written` opens an escape string (`E'...'`).
fn opens_escape_string(written: &str) -> bool {
    let mut tail = written.chars().rev();
    matches!(tail.next(), Some('E' | 'e'))
        && tail
            .next()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_' || c == '$'))
}

/// Whether `written` ends with an odd run of backslashes.
fn escaped_by_backslash(written: &str) -> bool {
    written.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

/// Split-on-quote rewriting, reproduced step by step from the historic
/// implementation.
#[must_use]
pub fn rewrite_legacy(sql: &str, placeholder: &str, prefix: &str) -> String {
    if placeholder.is_empty() {
        return sql.to_string();
    }

    let mut text = sql.to_string();

    for func in SEQUENCE_FUNCTIONS {
        if text.contains(func) {
            text = text
                .split(func)
                .enumerate()
                .map(|(i, fragment)| {
                    if i == 0 {
                        fragment.to_string()
                    } else {
                        fragment.replace(placeholder, prefix)
                    }
                })
                .collect::<Vec<_>>()
                .join(func);
        }
    }

    if !text.contains('\'') {
        return text.replace(placeholder, prefix);
    }

    text.split('\'')
        .enumerate()
        .map(|(i, fragment)| {
            if i % 2 == 0 {
                fragment.replace(placeholder, prefix)
            } else {
                fragment.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("'")
}

/// Replaces a leading placeholder in a table name.
#[must_use]
pub fn real_table_name(name: &str, placeholder: &str, prefix: &str) -> String {
    if placeholder.is_empty() {
        return name.to_string();
    }
    name.strip_prefix(placeholder)
        .map_or_else(|| name.to_string(), |rest| format!("{prefix}{rest}"))
}
