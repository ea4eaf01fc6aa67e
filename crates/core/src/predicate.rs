//! Store-native predicates
//!
//! A `Predicate` is what a compiled filter expression becomes: a tree of
//! column-versus-literal tests the store evaluates while scanning. Column
//! references are by name; literals are typed so the store can compare them
//! against the column's own type.

use crate::geometry::Rect;
use crate::relation::{quote_ident, quote_literal};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// SQL spelling
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Operator with operands swapped (`a < b` ⇔ `b > a`)
    pub fn flipped(&self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            other => *other,
        }
    }

    /// Apply to an ordering
    pub fn test(&self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ord == Equal,
            CompareOp::Ne => ord != Equal,
            CompareOp::Lt => ord == Less,
            CompareOp::Le => ord != Greater,
            CompareOp::Gt => ord == Greater,
            CompareOp::Ge => ord != Less,
        }
    }
}

/// Typed literal operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// Text
    Text(String),
    /// Boolean
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(i) => write!(f, "{}", i),
            Literal::Float(v) => write!(f, "{}", v),
            Literal::Text(s) => write!(f, "{}", quote_literal(s)),
            Literal::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

/// Predicate tree evaluated by the store with SQL three-valued logic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// `column op literal`
    Compare {
        /// Column name
        column: String,
        /// Operator
        op: CompareOp,
        /// Right operand
        literal: Literal,
    },
    /// `column IS [NOT] NULL`
    IsNull {
        /// Column name
        column: String,
        /// `IS NOT NULL` when true
        negated: bool,
    },
    /// `column [NOT] IN (...)`
    In {
        /// Column name
        column: String,
        /// Candidate values
        values: Vec<Literal>,
        /// `NOT IN` when true
        negated: bool,
    },
    /// `column [NOT] LIKE|ILIKE pattern`
    Like {
        /// Column name
        column: String,
        /// Pattern with `%` and `_` wildcards
        pattern: String,
        /// ILIKE when true
        case_insensitive: bool,
        /// NOT LIKE when true
        negated: bool,
    },
    /// Conjunction
    And(Vec<Predicate>),
    /// Disjunction
    Or(Vec<Predicate>),
    /// Negation
    Not(Box<Predicate>),
    /// Geometry envelope intersects a rectangle
    BboxIntersects {
        /// Geometry column name
        column: String,
        /// Filter rectangle
        rect: Rect,
    },
}

impl Predicate {
    /// `column = literal`
    pub fn eq(column: impl Into<String>, literal: Literal) -> Self {
        Predicate::Compare {
            column: column.into(),
            op: CompareOp::Eq,
            literal,
        }
    }

    /// Conjunction that flattens nested `And`s and drops the wrapper for a
    /// single term
    pub fn and(terms: Vec<Predicate>) -> Self {
        let mut flat = Vec::with_capacity(terms.len());
        for t in terms {
            match t {
                Predicate::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.remove(0)
        } else {
            Predicate::And(flat)
        }
    }

    /// Render as a SQL `WHERE` fragment (for logging and diagnostics)
    pub fn to_sql(&self) -> String {
        match self {
            Predicate::Compare {
                column,
                op,
                literal,
            } => format!("{} {} {}", quote_ident(column), op.as_sql(), literal),
            Predicate::IsNull { column, negated } => format!(
                "{} IS {}NULL",
                quote_ident(column),
                if *negated { "NOT " } else { "" }
            ),
            Predicate::In {
                column,
                values,
                negated,
            } => format!(
                "{} {}IN ({})",
                quote_ident(column),
                if *negated { "NOT " } else { "" },
                values
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            Predicate::Like {
                column,
                pattern,
                case_insensitive,
                negated,
            } => format!(
                "{} {}{} {}",
                quote_ident(column),
                if *negated { "NOT " } else { "" },
                if *case_insensitive { "ILIKE" } else { "LIKE" },
                quote_literal(pattern)
            ),
            Predicate::And(terms) => join(terms, " AND "),
            Predicate::Or(terms) => join(terms, " OR "),
            Predicate::Not(inner) => format!("NOT ({})", inner.to_sql()),
            Predicate::BboxIntersects { column, rect } => format!(
                "{} && ST_MakeEnvelope({},{},{},{})",
                quote_ident(column),
                rect.xmin,
                rect.ymin,
                rect.xmax,
                rect.ymax
            ),
        }
    }

    /// Names of all columns the predicate reads
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Compare { column, .. }
            | Predicate::IsNull { column, .. }
            | Predicate::In { column, .. }
            | Predicate::Like { column, .. }
            | Predicate::BboxIntersects { column, .. } => out.push(column),
            Predicate::And(terms) | Predicate::Or(terms) => {
                for t in terms {
                    t.collect_columns(out);
                }
            }
            Predicate::Not(inner) => inner.collect_columns(out),
        }
    }
}

fn join(terms: &[Predicate], sep: &str) -> String {
    if terms.is_empty() {
        return "TRUE".to_string();
    }
    terms
        .iter()
        .map(|t| format!("({})", t.to_sql()))
        .collect::<Vec<_>>()
        .join(sep)
}

/// SQL LIKE matching with `%` and `_` wildcards and `\` escapes
pub fn like_match(text: &str, pattern: &str, case_insensitive: bool) -> bool {
    let (t, p): (Vec<char>, Vec<char>) = if case_insensitive {
        (
            text.to_lowercase().chars().collect(),
            pattern.to_lowercase().chars().collect(),
        )
    } else {
        (text.chars().collect(), pattern.chars().collect())
    };
    like_rec(&t, &p)
}

fn like_rec(t: &[char], p: &[char]) -> bool {
    match p.first() {
        None => t.is_empty(),
        Some('%') => (0..=t.len()).any(|i| like_rec(&t[i..], &p[1..])),
        Some('_') => !t.is_empty() && like_rec(&t[1..], &p[1..]),
        Some('\\') if p.len() > 1 => t.first() == Some(&p[1]) && like_rec(&t[1..], &p[2..]),
        Some(c) => t.first() == Some(c) && like_rec(&t[1..], &p[1..]),
    }
}
