//! Query policy: decides whether raw SQL text may run.
//!
//! The check is pattern based and runs over the upper-cased, trimmed text.
//! Rules apply in a fixed order and the first failing rule decides:
//!
//! 1. blocked keyword as a whole word
//! 2. statement must begin with `SELECT` or `WITH`
//! 3. suspicious injection patterns (comments, stacked mutations, ...)
//! 4. every table item of a `FROM` clause (comma lists, joins, parenthesized
//!    joins) must be allow-listed or a CTE name
//!
//! A query that passes is wrapped in [`ValidatedQuery`], the only input the
//! execution engine accepts.

use crate::domain::config::{ConfigError, PolicyConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

static STATEMENT_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(SELECT|WITH)\b").unwrap());

static TABLE_CLAUSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(FROM|JOIN)\b").unwrap());

static CTE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?:\bWITH(?:\s+RECURSIVE)?|,)\s*"?([A-Z_][A-Z0-9_$]*)"?\s*(?:\([^)]*\)\s*)?AS\s*(?:NOT\s+)?(?:MATERIALIZED\s*)?\("#,
    )
    .unwrap()
});

static SUSPICIOUS: Lazy<Vec<(SuspiciousPattern, Regex)>> = Lazy::new(|| {
    [
        (
            SuspiciousPattern::StackedMutation,
            r";\s*(DROP|DELETE|UPDATE|INSERT|ALTER|CREATE|TRUNCATE|GRANT|REVOKE|COPY)\b",
        ),
        (
            SuspiciousPattern::SchemaProbe,
            r"(?s)UNION.*SELECT.*FROM.*INFORMATION_SCHEMA",
        ),
        (SuspiciousPattern::BlockComment, r"/\*"),
        (SuspiciousPattern::LineComment, r"--"),
        (SuspiciousPattern::XpCmdshell, r"XP_CMDSHELL"),
        (SuspiciousPattern::SpExecutesql, r"SP_EXECUTESQL"),
        (SuspiciousPattern::Exec, r"\bEXEC\s*\("),
        (SuspiciousPattern::Execute, r"\bEXECUTE\s*\("),
    ]
    .into_iter()
    .map(|(pattern, re)| (pattern, Regex::new(re).unwrap()))
    .collect()
});

/// Functions whose argument syntax uses `FROM` without naming a table.
const FROM_ARGUMENT_FUNCTIONS: &[&str] = &["EXTRACT", "SUBSTRING", "TRIM", "OVERLAY", "POSITION"];

/// Known injection shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspiciousPattern {
    StackedMutation,
    SchemaProbe,
    BlockComment,
    LineComment,
    XpCmdshell,
    SpExecutesql,
    Exec,
    Execute,
}

impl fmt::Display for SuspiciousPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::StackedMutation => "statement separator followed by a mutating keyword",
            Self::SchemaProbe => "UNION probe of INFORMATION_SCHEMA",
            Self::BlockComment => "block comment",
            Self::LineComment => "line comment",
            Self::XpCmdshell => "xp_cmdshell",
            Self::SpExecutesql => "sp_executesql",
            Self::Exec => "EXEC(",
            Self::Execute => "EXECUTE(",
        };
        f.write_str(label)
    }
}

/// Why a query was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    BlockedKeyword(String),
    InvalidStatementType(String),
    SuspiciousPattern(SuspiciousPattern),
    TableNotAllowed(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BlockedKeyword(kw) => write!(f, "blocked keyword detected: {kw}"),
            Self::InvalidStatementType(prefix) => write!(f, "invalid query type: {prefix}"),
            Self::SuspiciousPattern(p) => write!(f, "suspicious pattern detected: {p}"),
            Self::TableNotAllowed(t) => write!(f, "table not allowed: {t}"),
        }
    }
}

/// Outcome of a policy check. A reason exists exactly when the query is refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationVerdict {
    Allowed,
    Rejected(Rejection),
}

impl ValidationVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn reason(&self) -> Option<&Rejection> {
        match self {
            Self::Allowed => None,
            Self::Rejected(r) => Some(r),
        }
    }
}

/// Query text that passed the policy check, trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery(String);

impl ValidatedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn assume_valid(sql: &str) -> Self {
        Self(sql.trim().to_string())
    }
}

/// Stateless policy check, built once from configuration
#[derive(Debug, Clone)]
pub struct QueryValidator {
    blocked: Option<Regex>,
    allowed_tables: HashSet<String>,
}

impl QueryValidator {
    pub fn new(policy: &PolicyConfig) -> Result<Self, ConfigError> {
        let keywords: Vec<String> = policy
            .blocked_keywords
            .iter()
            .map(|kw| regex::escape(&kw.trim().to_uppercase()))
            .filter(|kw| !kw.is_empty())
            .collect();

        let blocked = if keywords.is_empty() {
            None
        } else {
            let pattern = format!(r"\b({})\b", keywords.join("|"));
            Some(Regex::new(&pattern).map_err(|e| ConfigError::InvalidPolicy(e.to_string()))?)
        };

        Ok(Self {
            blocked,
            allowed_tables: policy
                .allowed_tables
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
        })
    }

    /// Check `query` against the policy. Rejections are logged on the audit target.
    pub fn validate(&self, query: &str) -> ValidationVerdict {
        match self.evaluate(query) {
            None => ValidationVerdict::Allowed,
            Some(rejection) => {
                audit(&rejection);
                ValidationVerdict::Rejected(rejection)
            }
        }
    }

    /// Check `query` and, on success, hand back the trimmed text as a [`ValidatedQuery`].
    pub fn admit(&self, query: &str) -> Result<ValidatedQuery, Rejection> {
        match self.validate(query) {
            ValidationVerdict::Allowed => Ok(ValidatedQuery(query.trim().to_string())),
            ValidationVerdict::Rejected(rejection) => Err(rejection),
        }
    }

    pub fn is_table_allowed(&self, name: &str) -> bool {
        self.allowed_tables.contains(&name.to_lowercase())
    }

    fn evaluate(&self, query: &str) -> Option<Rejection> {
        let upper = query.trim().to_uppercase();

        if let Some(caps) = self.blocked.as_ref().and_then(|re| re.captures(&upper)) {
            return Some(Rejection::BlockedKeyword(caps[1].to_string()));
        }

        if !STATEMENT_START.is_match(&upper) {
            let prefix: String = query.trim().chars().take(20).collect();
            return Some(Rejection::InvalidStatementType(prefix));
        }

        if let Some((pattern, _)) = SUSPICIOUS.iter().find(|(_, re)| re.is_match(&upper)) {
            return Some(Rejection::SuspiciousPattern(*pattern));
        }

        let ctes: HashSet<String> = CTE_NAME
            .captures_iter(&upper)
            .map(|caps| caps[1].to_lowercase())
            .collect();

        referenced_tables(&upper)
            .into_iter()
            .map(|t| t.to_lowercase())
            .find(|t| !self.allowed_tables.contains(t) && !ctes.contains(t))
            .map(Rejection::TableNotAllowed)
    }
}

fn audit(rejection: &Rejection) {
    match rejection {
        Rejection::BlockedKeyword(keyword) => {
            warn!(target: "query_gateway::audit", keyword = %keyword, "Blocked keyword detected")
        }
        Rejection::InvalidStatementType(prefix) => {
            warn!(target: "query_gateway::audit", prefix = %prefix, "Invalid query type")
        }
        Rejection::SuspiciousPattern(pattern) => {
            warn!(target: "query_gateway::audit", pattern = %pattern, "Suspicious pattern detected")
        }
        Rejection::TableNotAllowed(table) => {
            warn!(target: "query_gateway::audit", table = %table, "Table not in allow-list")
        }
    }
}

/// Table names named anywhere in a `FROM` clause: comma-separated items,
/// `JOIN` targets and the members of parenthesized joins.
fn referenced_tables(upper: &str) -> Vec<String> {
    let mut tables = Vec::new();

    for m in TABLE_CLAUSE.find_iter(upper) {
        if in_string_literal(upper, m.start()) {
            continue;
        }
        if m.as_str() == "FROM" && from_is_function_argument(upper, m.start()) {
            debug!(offset = m.start(), "Skipping FROM inside function arguments");
            continue;
        }
        tables.extend(clause_tables(&tokenize(&upper[m.end()..])));
    }

    tables
}

/// True when the `FROM` at `offset` belongs to `IS DISTINCT FROM` or sits
/// directly inside `EXTRACT(...)`-style argument lists.
fn from_is_function_argument(upper: &str, offset: usize) -> bool {
    let before = &upper[..offset];
    if before.trim_end().ends_with("DISTINCT") {
        return true;
    }

    let mut open: Vec<usize> = Vec::new();
    for (idx, ch) in before.char_indices() {
        match ch {
            '(' => open.push(idx),
            ')' => {
                open.pop();
            }
            _ => {}
        }
    }

    let Some(&paren) = open.last() else {
        return false;
    };
    let callee: String = before[..paren]
        .trim_end()
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    FROM_ARGUMENT_FUNCTIONS.contains(&callee.as_str())
}

fn in_string_literal(upper: &str, offset: usize) -> bool {
    upper[..offset].bytes().filter(|b| *b == b'\'').count() % 2 == 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
    Open,
    Close,
    Comma,
    Dot,
    End,
    Other,
}

fn tokenize(s: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = s;

    while let Some(ch) = rest.chars().next() {
        let (token, len) = match ch {
            c if c.is_whitespace() => (None, c.len_utf8()),
            '(' => (Some(Token::Open), 1),
            ')' => (Some(Token::Close), 1),
            ',' => (Some(Token::Comma), 1),
            '.' => (Some(Token::Dot), 1),
            ';' => (Some(Token::End), 1),
            '\'' => (Some(Token::Other), literal_len(rest)),
            '"' => match rest[1..].find('"') {
                Some(end) => (Some(Token::Quoted(&rest[1..end + 1])), end + 2),
                None => (Some(Token::Other), rest.len()),
            },
            c if c.is_alphabetic() || c == '_' => {
                let len = rest
                    .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
                    .unwrap_or(rest.len());
                (Some(Token::Word(&rest[..len])), len)
            }
            c => (Some(Token::Other), c.len_utf8()),
        };
        tokens.extend(token);
        rest = &rest[len..];
    }

    tokens
}

/// Byte length of the string literal at the start of `s`; `''` is an escaped quote.
fn literal_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        if bytes[i] == b'\'' {
            if bytes.get(i + 1) == Some(&b'\'') {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    s.len()
}

/// Walk one `FROM`/`JOIN` clause and collect every table item in it.
///
/// A table is expected after the clause keyword, after `,`, after `JOIN` and
/// after the `(` of a parenthesized join. Parentheses anywhere else (join
/// conditions, `USING` lists, subqueries, function arguments) are skipped;
/// subqueries are checked through their own `FROM`. The walk ends at the
/// next clause keyword or at the `)` closing an enclosing subquery.
fn clause_tables(tokens: &[Token<'_>]) -> Vec<String> {
    const CLAUSE_END: &[&str] = &[
        "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET", "UNION", "INTERSECT", "EXCEPT",
        "WINDOW", "FETCH", "FOR", "RETURNING",
    ];
    const SUBQUERY_START: &[&str] = &["SELECT", "WITH", "VALUES"];

    let mut tables = Vec::new();
    let mut expect_table = true;
    let mut groups = 0usize;
    let mut i = 0;

    while let Some(&token) = tokens.get(i) {
        i += 1;
        match token {
            Token::Word("LATERAL" | "ONLY") if expect_table => {}
            Token::Word(_) | Token::Quoted(_) if expect_table => {
                let (name, next) = dotted_name(tokens, i - 1);
                tables.push(name);
                i = next;
                if tokens.get(i) == Some(&Token::Open) {
                    i = skip_group(tokens, i);
                }
                expect_table = false;
            }
            Token::Word("JOIN") => expect_table = true,
            Token::Word(word) if groups == 0 && CLAUSE_END.contains(&word) => break,
            Token::Open if expect_table => match tokens.get(i) {
                Some(Token::Word(word)) if SUBQUERY_START.contains(word) => {
                    i = skip_group(tokens, i - 1);
                    expect_table = false;
                }
                _ => groups += 1,
            },
            Token::Open => i = skip_group(tokens, i - 1),
            Token::Close if groups > 0 => groups -= 1,
            Token::Close | Token::End => break,
            Token::Comma => expect_table = true,
            _ => {}
        }
    }

    tables
}

fn dotted_name(tokens: &[Token<'_>], start: usize) -> (String, usize) {
    let mut name = String::new();
    let mut i = start;

    while let Some(Token::Word(part) | Token::Quoted(part)) = tokens.get(i) {
        name.push_str(part);
        i += 1;
        let continues = tokens.get(i) == Some(&Token::Dot)
            && matches!(tokens.get(i + 1), Some(Token::Word(_) | Token::Quoted(_)));
        if !continues {
            break;
        }
        name.push('.');
        i += 1;
    }

    (name, i)
}

/// Index just past the `)` matching the `(` at `open`.
fn skip_group(tokens: &[Token<'_>], open: usize) -> usize {
    let mut depth = 0usize;
    for (idx, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::Open => depth += 1,
            Token::Close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return idx + 1;
                }
            }
            _ => {}
        }
    }
    tokens.len()
}
