//! Query expression tree
//!
//! The parser produces an [`Expression`] and the [`QueryBuilder`](crate::QueryBuilder)
//! consumes it. Leaves only carry the raw column and value text; resolution
//! against a project configuration happens during compilation.

use crate::error::{Error, Result};
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;

/// Comparison operators supported by the query language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ComparisonOperator {
    #[serde(rename = "=")]
    Equals,
    #[serde(rename = "<>")]
    NotEquals,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<=")]
    LessThanEqual,
    #[serde(rename = ">=")]
    GreaterThanEqual,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::NotEquals => "<>",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::LessThanEqual => "<=",
            Self::GreaterThanEqual => ">=",
        }
    }

    pub fn from_op(op: &str) -> Result<Self> {
        match op {
            "=" => Ok(Self::Equals),
            "<>" => Ok(Self::NotEquals),
            "<" => Ok(Self::LessThan),
            ">" => Ok(Self::GreaterThan),
            "<=" => Ok(Self::LessThanEqual),
            ">=" => Ok(Self::GreaterThanEqual),
            _ => Err(Error::InvalidQuery(format!(
                "unknown comparison operator '{}'",
                op
            ))),
        }
    }

    /// Equality operators compare the raw text value and never need a cast.
    pub fn is_equality(&self) -> bool {
        matches!(self, Self::Equals | Self::NotEquals)
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed query expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Expression {
    /// Matches every record of the query entity.
    All,
    /// Nothing to query.
    Empty,
    Comparison {
        column: String,
        term: String,
        operator: ComparisonOperator,
    },
    /// Full text search, optionally scoped to a single column.
    Fts {
        column: Option<String>,
        term: String,
    },
    Like {
        column: String,
        term: String,
    },
    /// `range` keeps the raw bracket notation, e.g. `[1 TO 10}`.
    Range {
        column: String,
        range: String,
    },
    /// Comma separated list of columns that must be present.
    Exists {
        columns: String,
    },
    /// Comma separated list of expedition codes.
    Expedition {
        expeditions: String,
    },
    Project {
        projects: Vec<i32>,
    },
    /// Comma separated list of entities to include in the result.
    Select {
        entities: String,
        expression: Box<Expression>,
    },
    Group {
        expression: Box<Expression>,
    },
    Not {
        expression: Box<Expression>,
    },
    Logical {
        operator: LogicalOperator,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn comparison(
        column: impl Into<String>,
        term: impl Into<String>,
        operator: ComparisonOperator,
    ) -> Self {
        Expression::Comparison {
            column: column.into(),
            term: term.into(),
            operator,
        }
    }

    pub fn fts(column: Option<&str>, term: impl Into<String>) -> Self {
        Expression::Fts {
            column: column.map(str::to_string),
            term: term.into(),
        }
    }

    pub fn like(column: impl Into<String>, term: impl Into<String>) -> Self {
        Expression::Like {
            column: column.into(),
            term: term.into(),
        }
    }

    pub fn range(column: impl Into<String>, range: impl Into<String>) -> Self {
        Expression::Range {
            column: column.into(),
            range: range.into(),
        }
    }

    pub fn exists(columns: impl Into<String>) -> Self {
        Expression::Exists {
            columns: columns.into(),
        }
    }

    pub fn expedition(expeditions: impl Into<String>) -> Self {
        Expression::Expedition {
            expeditions: expeditions.into(),
        }
    }

    pub fn project(projects: Vec<i32>) -> Self {
        Expression::Project { projects }
    }

    pub fn select(entities: impl Into<String>, expression: Expression) -> Self {
        Expression::Select {
            entities: entities.into(),
            expression: Box::new(expression),
        }
    }

    pub fn group(expression: Expression) -> Self {
        Expression::Group {
            expression: Box::new(expression),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expression: Expression) -> Self {
        Expression::Not {
            expression: Box::new(expression),
        }
    }

    pub fn logical(operator: LogicalOperator, left: Expression, right: Expression) -> Self {
        Expression::Logical {
            operator,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Self::logical(LogicalOperator::And, left, right)
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Self::logical(LogicalOperator::Or, left, right)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Expression::Empty)
    }

    /// Human readable variant name, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Expression::All => "all",
            Expression::Empty => "empty",
            Expression::Comparison { .. } => "comparison",
            Expression::Fts { .. } => "fts",
            Expression::Like { .. } => "like",
            Expression::Range { .. } => "range",
            Expression::Exists { .. } => "exists",
            Expression::Expedition { .. } => "expedition",
            Expression::Project { .. } => "project",
            Expression::Select { .. } => "select",
            Expression::Group { .. } => "group",
            Expression::Not { .. } => "not",
            Expression::Logical { .. } => "logical",
        }
    }
}

/// Splits a `a, b ,c` style list, dropping blank entries.
pub fn split_list(spec: &str) -> Vec<&str> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

const RESERVED: &[char] = &[
    ':', '(', ')', '"', '[', ']', '{', '}', '=', '<', '>', '\\', ',',
];

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || value.starts_with(['+', '-', '*'])
        || value
            .chars()
            .any(|c| c.is_whitespace() || RESERVED.contains(&c))
        || ["and", "or", "not"]
            .iter()
            .any(|kw| value.eq_ignore_ascii_case(kw))
}

fn write_phrase(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    write!(f, "\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    if needs_quoting(value) {
        write_phrase(f, value)
    } else {
        f.write_str(value)
    }
}

/// `entity."last segment"` when only the last segment needs quoting,
/// otherwise every character is escaped.
fn write_column(f: &mut fmt::Formatter<'_>, column: &str) -> fmt::Result {
    if !needs_quoting(column) {
        return f.write_str(column);
    }
    match column.rsplit_once('.') {
        Some((entity, last)) if !needs_quoting(entity) => {
            write!(f, "{}.", entity)?;
            write_phrase(f, last)
        }
        _ => {
            for (i, c) in column.char_indices() {
                if i == 0 || c.is_whitespace() || RESERVED.contains(&c) {
                    f.write_str("\\")?;
                }
                write!(f, "{}", c)?;
            }
            Ok(())
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, prefix: &str, spec: &str) -> fmt::Result {
    let items = split_list(spec);
    if items.len() == 1 {
        write!(f, "{}:{}", prefix, items[0])
    } else {
        write!(f, "{}:[{}]", prefix, items.join(", "))
    }
}

/// Full text columns directly below a group, not looking into nested groups.
fn text_columns<'e>(expr: &'e Expression, out: &mut Vec<Option<&'e str>>) {
    match expr {
        Expression::Fts { column, .. } => out.push(column.as_deref()),
        Expression::Not { expression } => text_columns(expression, out),
        Expression::Logical { left, right, .. } => {
            text_columns(left, out);
            text_columns(right, out);
        }
        _ => {}
    }
}

/// Column of a group written as `column:( ... )`.
fn group_scope(inner: &Expression) -> Option<&str> {
    let mut columns = Vec::new();
    text_columns(inner, &mut columns);
    match columns.split_first() {
        Some((Some(first), rest)) if rest.iter().all(|c| *c == Some(*first)) => Some(first),
        _ => None,
    }
}

impl Expression {
    /// Inside `scope:( ... )` full text searches on `scope` are written as bare terms.
    fn render(&self, f: &mut fmt::Formatter<'_>, scope: Option<&str>) -> fmt::Result {
        match self {
            Expression::All => f.write_str("*"),
            Expression::Empty => Ok(()),
            Expression::Comparison {
                column,
                term,
                operator,
            } => {
                write_column(f, column)?;
                write!(f, " {} ", operator)?;
                write_value(f, term)
            }
            Expression::Fts { column: None, term } => write_value(f, term),
            Expression::Fts {
                column: Some(column),
                term,
            } => {
                if scope == Some(column.as_str()) {
                    return write_value(f, term);
                }
                write_column(f, column)?;
                f.write_str(":(")?;
                write_value(f, term)?;
                f.write_str(")")
            }
            Expression::Like { column, term } => {
                write_column(f, column)?;
                f.write_str("::")?;
                write_phrase(f, term)
            }
            Expression::Range { column, range } => {
                write_column(f, column)?;
                write!(f, ":{}", range)
            }
            Expression::Exists { columns } => write_list(f, "_exists_", columns),
            Expression::Expedition { expeditions } => write_list(f, "_expeditions_", expeditions),
            Expression::Project { projects } => {
                let ids: Vec<String> = projects.iter().map(i32::to_string).collect();
                write_list(f, "_projects_", &ids.join(","))
            }
            Expression::Select {
                entities,
                expression,
            } => {
                write_list(f, "_select_", entities)?;
                match expression.as_ref() {
                    Expression::All | Expression::Empty => Ok(()),
                    inner => {
                        f.write_str(" ")?;
                        inner.render(f, None)
                    }
                }
            }
            Expression::Group { expression } => match group_scope(expression) {
                Some(column) => {
                    write_column(f, column)?;
                    f.write_str(":(")?;
                    expression.render(f, Some(column))?;
                    f.write_str(")")
                }
                None => {
                    f.write_str("(")?;
                    expression.render(f, None)?;
                    f.write_str(")")
                }
            },
            Expression::Not { expression } => match expression.as_ref() {
                Expression::Logical { .. } => {
                    f.write_str("NOT (")?;
                    expression.render(f, scope)?;
                    f.write_str(")")
                }
                inner => {
                    f.write_str("NOT ")?;
                    inner.render(f, scope)
                }
            },
            Expression::Logical {
                operator,
                left,
                right,
            } => {
                left.render(f, scope)?;
                write!(f, " {} ", operator)?;
                right.render(f, scope)
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, None)
    }
}

/// One side of a range, e.g. `>= 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeBound {
    pub operator: ComparisonOperator,
    pub value: String,
}

/// Bounds of a range expression.
///
/// `[` / `]` are inclusive, `{` / `}` exclusive and `*` leaves a side unbounded:
///
/// ```text
/// [1 TO 10]   ->  >= 1 AND <= 10
/// {1 TO 10]   ->  >  1 AND <= 10
/// {* TO 100]  ->  <= 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRange {
    pub lower: Option<RangeBound>,
    pub upper: Option<RangeBound>,
}

impl ParsedRange {
    pub fn parse(range: &str) -> Result<Self> {
        static RANGE_RE: OnceLock<Regex> = OnceLock::new();
        let re = RANGE_RE.get_or_init(|| {
            Regex::new(r"^(?P<open>[\[{])\s*(?P<lower>.+?)\s*TO\s*(?P<upper>.+?)\s*(?P<close>[\]}])$")
                .expect("range regex must compile")
        });

        let invalid = || Error::InvalidQuery(format!("invalid range {}", range));
        let caps = re.captures(range.trim()).ok_or_else(invalid)?;

        let lower = match &caps["lower"] {
            "*" => None,
            value => Some(RangeBound {
                operator: if &caps["open"] == "[" {
                    ComparisonOperator::GreaterThanEqual
                } else {
                    ComparisonOperator::GreaterThan
                },
                value: value.to_string(),
            }),
        };

        let upper = match &caps["upper"] {
            "*" => None,
            value => Some(RangeBound {
                operator: if &caps["close"] == "]" {
                    ComparisonOperator::LessThanEqual
                } else {
                    ComparisonOperator::LessThan
                },
                value: value.to_string(),
            }),
        };

        if lower.is_none() && upper.is_none() {
            return Err(invalid());
        }

        Ok(ParsedRange { lower, upper })
    }
}
