//! Query string parser and field binding.
//!
//! Syntax: whitespace is AND, `OR` or `|` is OR, `-word` or `NOT word`
//! negates, parentheses group, `"..."` is a phrase and a trailing `*` makes
//! a prefix. Input that does not parse degrades to an AND of its literal
//! words; parsing never fails.
//!
//! Field policy: phrase and prefix searches hit only the content field.
//! Plain searches hit the content field OR the n-gram field, so a partial
//! word like `shi` still finds `shield`.

use tracing::debug;

use crate::content::schema::{FIELD_CONTENT, FIELD_QUICK};
use crate::content::Schema;
use crate::error::SearchError;
use crate::query::request::SearchQuery;
use crate::utils::{Analyzer, truncate_chars};

/// Field-bound query tree
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Term { field: String, text: String },
    /// Terms at consecutive positions
    Phrase { field: String, terms: Vec<String> },
    /// Any term starting with the prefix
    Prefix { field: String, prefix: String },
    And(Vec<QueryNode>),
    Or(Vec<QueryNode>),
    Not(Box<QueryNode>),
    Empty,
}

impl QueryNode {
    pub fn is_empty(&self) -> bool {
        matches!(self, QueryNode::Empty)
    }

    /// Positive leaves as (field, term) pairs, repeated per occurrence
    pub fn leaf_terms(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<(String, String)>) {
        match self {
            QueryNode::Term { field, text } => out.push((field.clone(), text.clone())),
            QueryNode::Phrase { field, terms } => {
                out.extend(terms.iter().map(|t| (field.clone(), t.clone())));
            }
            QueryNode::Prefix { field, prefix } => out.push((field.clone(), prefix.clone())),
            QueryNode::And(nodes) | QueryNode::Or(nodes) => {
                for node in nodes {
                    node.collect_leaves(out);
                }
            }
            QueryNode::Not(_) | QueryNode::Empty => {}
        }
    }
}

/// Result of parsing and binding a search term
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub root: QueryNode,
    pub phrase: bool,
    pub prefix: bool,
    /// Lowercased positive words for highlighting
    pub highlight_terms: Vec<String>,
}

/// Syntax tree before field binding
#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Word(String),
    Phrase(String),
    Prefix(String),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Empty,
}

/// Parse and bind a query against a schema
pub fn parse_query(query: &SearchQuery, schema: &Schema) -> ParsedQuery {
    let analyzer = Analyzer::new(&schema.stop_words);
    let phrase = query.is_phrase_search();
    let prefix = query.is_prefix_search();
    let binder = Binder {
        schema,
        analyzer: &analyzer,
        content_only: phrase || prefix,
    };

    let (root, highlight_terms) = match parse_expr(&query.term) {
        Ok(expr) => {
            let mut terms = Vec::new();
            collect_words(&expr, &analyzer, &mut terms, false);
            (binder.bind(&expr), terms)
        }
        Err(e) => {
            debug!(term = %query.term, error = %e, "query degraded to literal terms");
            let words = analyzer.words(&query.term);
            let nodes = words
                .iter()
                .map(|w| QueryNode::Term {
                    field: FIELD_CONTENT.to_string(),
                    text: w.clone(),
                })
                .collect();
            (simplify_and(nodes), words)
        }
    };

    let mut highlight_terms = highlight_terms;
    highlight_terms.dedup();

    ParsedQuery {
        root,
        phrase,
        prefix,
        highlight_terms,
    }
}

fn collect_words(expr: &Expr, analyzer: &Analyzer, out: &mut Vec<String>, negated: bool) {
    match expr {
        Expr::Word(w) | Expr::Phrase(w) | Expr::Prefix(w) if !negated => {
            out.extend(analyzer.words(w));
        }
        Expr::And(nodes) | Expr::Or(nodes) => {
            for node in nodes {
                collect_words(node, analyzer, out, negated);
            }
        }
        Expr::Not(inner) => collect_words(inner, analyzer, out, true),
        _ => {}
    }
}

struct Binder<'a> {
    schema: &'a Schema,
    analyzer: &'a Analyzer,
    content_only: bool,
}

impl Binder<'_> {
    fn bind(&self, expr: &Expr) -> QueryNode {
        match expr {
            Expr::Word(word) => {
                let nodes = self
                    .analyzer
                    .words(word)
                    .into_iter()
                    .map(|w| self.bind_word(w))
                    .collect();
                simplify_and(nodes)
            }
            Expr::Phrase(text) => {
                let mut terms = self.analyzer.words(text);
                match terms.len() {
                    0 => QueryNode::Empty,
                    1 => QueryNode::Term {
                        field: FIELD_CONTENT.to_string(),
                        text: terms.remove(0),
                    },
                    _ => QueryNode::Phrase {
                        field: FIELD_CONTENT.to_string(),
                        terms,
                    },
                }
            }
            Expr::Prefix(text) => {
                let mut words = self.analyzer.words(text);
                // Short prefixes ("a*") fall below the analyzer's minimum length
                if words.is_empty() {
                    let raw = text.trim().to_lowercase();
                    if raw.chars().all(|c| c.is_alphanumeric()) && !raw.is_empty() {
                        words.push(raw);
                    }
                }
                let Some(last) = words.pop() else {
                    return QueryNode::Empty;
                };
                let mut nodes: Vec<QueryNode> = words
                    .into_iter()
                    .map(|w| QueryNode::Term {
                        field: FIELD_CONTENT.to_string(),
                        text: w,
                    })
                    .collect();
                nodes.push(QueryNode::Prefix {
                    field: FIELD_CONTENT.to_string(),
                    prefix: last,
                });
                simplify_and(nodes)
            }
            Expr::And(nodes) => simplify_and(nodes.iter().map(|n| self.bind(n)).collect()),
            Expr::Or(nodes) => simplify_or(nodes.iter().map(|n| self.bind(n)).collect()),
            Expr::Not(inner) => match self.bind(inner) {
                QueryNode::Empty => QueryNode::Empty,
                node => QueryNode::Not(Box::new(node)),
            },
            Expr::Empty => QueryNode::Empty,
        }
    }

    fn bind_word(&self, word: String) -> QueryNode {
        let content = QueryNode::Term {
            field: FIELD_CONTENT.to_string(),
            text: word.clone(),
        };
        if self.content_only || !self.schema.has_field(FIELD_QUICK) {
            return content;
        }

        let ngram = if word.chars().count() < self.schema.ngram_min {
            QueryNode::Empty
        } else {
            QueryNode::Term {
                field: FIELD_QUICK.to_string(),
                text: truncate_chars(&word, self.schema.ngram_max).to_string(),
            }
        };
        simplify_or(vec![content, ngram])
    }
}

fn simplify_and(nodes: Vec<QueryNode>) -> QueryNode {
    let mut nodes: Vec<QueryNode> = nodes.into_iter().filter(|n| !n.is_empty()).collect();
    match nodes.len() {
        0 => QueryNode::Empty,
        1 => nodes.remove(0),
        _ => QueryNode::And(nodes),
    }
}

fn simplify_or(nodes: Vec<QueryNode>) -> QueryNode {
    let mut nodes: Vec<QueryNode> = nodes.into_iter().filter(|n| !n.is_empty()).collect();
    match nodes.len() {
        0 => QueryNode::Empty,
        1 => nodes.remove(0),
        _ => QueryNode::Or(nodes),
    }
}

/// Strict parse of the term syntax
fn parse_expr(input: &str) -> Result<Expr, SearchError> {
    let mut parser = QueryParser::new(input);
    let expr = parser.parse_or()?;
    parser.skip_whitespace();
    if !parser.is_eof() {
        return Err(parser.fail("unexpected ')'"));
    }
    Ok(expr)
}

struct QueryParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> QueryParser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn fail(&self, what: &str) -> SearchError {
        SearchError::QueryParseFailure(format!("{} at {} in '{}'", what, self.pos, self.input))
    }

    fn parse_or(&mut self) -> Result<Expr, SearchError> {
        let mut nodes = vec![self.parse_and()?];

        loop {
            self.skip_whitespace();
            if !(self.consume_char('|') || self.consume_keyword("OR")) {
                break;
            }
            let next = self.parse_and()?;
            if next == Expr::Empty {
                return Err(self.fail("dangling OR"));
            }
            nodes.push(next);
        }

        if nodes.len() > 1 && nodes[0] == Expr::Empty {
            return Err(self.fail("OR without left operand"));
        }

        Ok(match nodes.len() {
            1 => nodes.remove(0),
            _ => Expr::Or(nodes),
        })
    }

    fn parse_and(&mut self) -> Result<Expr, SearchError> {
        let mut nodes = Vec::new();

        loop {
            self.skip_whitespace();
            if self.is_eof()
                || self.peek_char() == Some(')')
                || self.peek_char() == Some('|')
                || self.at_keyword("OR")
            {
                break;
            }
            nodes.push(self.parse_unary()?);
        }

        Ok(match nodes.len() {
            0 => Expr::Empty,
            1 => nodes.remove(0),
            _ => Expr::And(nodes),
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, SearchError> {
        self.skip_whitespace();

        if self.consume_char('-') || self.consume_keyword("NOT") {
            self.skip_whitespace();
            if self.is_eof() || matches!(self.peek_char(), Some(')') | Some('|')) {
                return Err(self.fail("dangling negation"));
            }
            let inner = self.parse_primary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, SearchError> {
        self.skip_whitespace();

        if self.consume_char('(') {
            let node = self.parse_or()?;
            self.skip_whitespace();
            if !self.consume_char(')') {
                return Err(self.fail("unclosed parenthesis"));
            }
            return Ok(node);
        }

        if self.consume_char('"') {
            let start = self.pos;
            while !self.is_eof() && self.peek_char() != Some('"') {
                self.advance();
            }
            if self.is_eof() {
                return Err(self.fail("unclosed quote"));
            }
            let phrase = self.input[start..self.pos].to_string();
            self.consume_char('"');
            return Ok(Expr::Phrase(phrase));
        }

        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() || matches!(c, '(' | ')' | '"' | '|') {
                break;
            }
            self.advance();
        }
        let word = &self.input[start..self.pos];
        if word.is_empty() {
            return Err(self.fail("unexpected character"));
        }

        Ok(match word.strip_suffix('*') {
            Some(stem) if !stem.is_empty() => Expr::Prefix(stem.trim_end_matches('*').to_string()),
            Some(_) => Expr::Empty,
            None => Expr::Word(word.to_string()),
        })
    }

    fn remaining(&self) -> &str {
        &self.input[self.pos..]
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
        }
    }

    fn consume_char(&mut self, c: char) -> bool {
        if self.peek_char() == Some(c) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Keyword followed by whitespace, an opening delimiter or the end
    fn at_keyword(&self, keyword: &str) -> bool {
        let rest = self.remaining();
        rest.starts_with(keyword)
            && rest[keyword.len()..]
                .chars()
                .next()
                .is_none_or(|c| c.is_whitespace() || c == '(' || c == '"')
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }
}
