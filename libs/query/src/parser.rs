//! Query string parser
//!
//! ```text
//! query    := or_expr?
//! or_expr  := and_expr ("OR" and_expr)*
//! and_expr := clauses ("AND" clauses)*
//! clauses  := (("+" | "-")? unary)+
//! unary    := "NOT" unary | primary
//! primary  := "(" or_expr ")" | "*" | special | phrase | column filter | term
//! filter   := column ":" (value | phrase | range | "(" or_expr ")")
//!           | column "::" value
//!           | column op value
//! ```
//!
//! Clauses written next to each other without an operator combine like a
//! boolean query: `+x` must match, `-x` must not match and the remaining
//! clauses are alternatives. Consecutive bare terms are a single full text
//! search. `_select_:` clauses outside of parentheses are lifted into one
//! [`Expression::Select`] wrapping the rest of the query.

use crate::error::{Error, Result};
use crate::expression::{split_list, ComparisonOperator, Expression, LogicalOperator, ParsedRange};

const EXISTS: &str = "_exists_:";
const EXPEDITIONS: &[&str] = &["_expeditions_:", "_expedition_:"];
const PROJECTS: &str = "_projects_:";
const SELECT: &str = "_select_:";

const RESERVED: &[char] = &[':', '(', ')', '"', '[', ']', '{', '}', '=', '<', '>'];

/// Parse a query string. Blank input yields [`Expression::Empty`].
pub fn parse(input: &str) -> Result<Expression> {
    let mut p = Parser::new(input);
    let expr = p.parse_or()?;
    p.skip_ws();
    if !p.is_eof() {
        return Err(p.error("unexpected input"));
    }

    if let Some(expr) = &expr {
        if !matches!(expr, Expression::All) && contains_all(expr) {
            return Err(Error::invalid_query(
                "'*' can not be combined with other expressions",
            ));
        }
    }

    if p.selects.is_empty() {
        return Ok(expr.unwrap_or(Expression::Empty));
    }

    Ok(Expression::select(
        p.selects.join(", "),
        expr.unwrap_or(Expression::All),
    ))
}

fn contains_all(expr: &Expression) -> bool {
    match expr {
        Expression::All => true,
        Expression::Select { expression, .. }
        | Expression::Group { expression }
        | Expression::Not { expression } => contains_all(expression),
        Expression::Logical { left, right, .. } => contains_all(left) || contains_all(right),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occur {
    Should,
    Must,
    MustNot,
}

struct Clause {
    occur: Occur,
    expr: Expression,
    /// Bare term, merged with neighbouring bare terms.
    term: bool,
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
    /// Open parentheses around the cursor.
    depth: usize,
    /// Column of the enclosing `column:( ... )` group.
    scope: Option<String>,
    selects: Vec<String>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            depth: 0,
            scope: None,
            selects: Vec::new(),
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn consume_char(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek_char(), Some(c) if c.is_whitespace()) {
            self.consume_char();
        }
    }

    fn error(&self, msg: &str) -> Error {
        let near: String = self.remaining().chars().take(24).collect();
        if near.is_empty() {
            Error::InvalidQuery(format!("{} at end of query", msg))
        } else {
            Error::InvalidQuery(format!("{} near '{}'", msg, near))
        }
    }

    /// Keywords are case-insensitive and must end at whitespace, `(`, `"` or end of input.
    fn at_keyword(&self, kw: &str) -> bool {
        let rest = self.remaining();
        if rest.len() < kw.len()
            || !rest.is_char_boundary(kw.len())
            || !rest[..kw.len()].eq_ignore_ascii_case(kw)
        {
            return false;
        }
        match rest[kw.len()..].chars().next() {
            None => true,
            Some(c) => c.is_whitespace() || c == '(' || c == '"',
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        let save = self.pos;
        self.skip_ws();
        if self.at_keyword(kw) {
            self.pos += kw.len();
            true
        } else {
            self.pos = save;
            false
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<()> {
        self.skip_ws();
        match self.peek_char() {
            Some(c) if c == expected => {
                self.consume_char();
                Ok(())
            }
            _ => Err(self.error(&format!("expected '{}'", expected))),
        }
    }

    fn parse_or(&mut self) -> Result<Option<Expression>> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let l = left.ok_or_else(|| Error::invalid_query("missing expression before OR"))?;
            let r = self
                .parse_and()?
                .ok_or_else(|| self.error("missing expression after OR"))?;
            left = Some(Expression::or(l, r));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Option<Expression>> {
        let mut left = self.parse_clauses()?;
        while self.eat_keyword("and") {
            let l = left.ok_or_else(|| Error::invalid_query("missing expression before AND"))?;
            let r = self
                .parse_clauses()?
                .ok_or_else(|| self.error("missing expression after AND"))?;
            left = Some(Expression::and(and_operand(l), and_operand(r)));
        }
        Ok(left)
    }

    fn parse_clauses(&mut self) -> Result<Option<Expression>> {
        let mut clauses = Vec::new();
        loop {
            self.skip_ws();
            if self.is_eof()
                || self.peek_char() == Some(')')
                || self.at_keyword("and")
                || self.at_keyword("or")
            {
                break;
            }

            if self.remaining().starts_with(SELECT) {
                if self.depth > 0 {
                    return Err(self.error("_select_ must be a top level clause"));
                }
                self.pos += SELECT.len();
                let entities = self.parse_list_value("_select_")?;
                self.selects.extend(entities);
                continue;
            }

            clauses.push(self.parse_clause()?);
        }
        Ok(combine(clauses))
    }

    fn parse_clause(&mut self) -> Result<Clause> {
        let occur = match self.peek_char() {
            Some('+') => Occur::Must,
            Some('-') => Occur::MustNot,
            _ => Occur::Should,
        };
        if occur != Occur::Should {
            self.consume_char();
            self.skip_ws();
        }

        let (expr, term) = self.parse_unary()?;
        Ok(Clause {
            occur,
            expr,
            term: term && occur == Occur::Should,
        })
    }

    fn parse_unary(&mut self) -> Result<(Expression, bool)> {
        if self.eat_keyword("not") {
            self.skip_ws();
            let (inner, _) = self.parse_unary()?;
            return Ok((Expression::not(inner), false));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<(Expression, bool)> {
        self.skip_ws();
        let rest = self.remaining();

        let Some(c) = self.peek_char() else {
            return Err(self.error("expected expression"));
        };

        match c {
            '(' => {
                self.consume_char();
                let inner = self.parse_group_body()?;
                Ok((Expression::group(inner), false))
            }
            '"' => {
                let phrase = self.parse_phrase()?;
                Ok((Expression::fts(self.scope.as_deref(), phrase), false))
            }
            '[' | '{' => Err(self.error("range requires a column")),
            ')' | ']' | '}' | ':' | '=' | '<' | '>' => Err(self.error("unexpected character")),
            '*' if self.scope.is_none() && is_standalone(&rest[1..]) => {
                self.consume_char();
                Ok((Expression::All, false))
            }
            _ if rest.starts_with(SELECT) => Err(self.error("_select_ must be a top level clause")),
            _ if rest.starts_with(EXISTS) => {
                self.pos += EXISTS.len();
                let columns = self.parse_list_value("_exists_")?;
                Ok((Expression::exists(columns.join(", ")), false))
            }
            _ if rest.starts_with(PROJECTS) => {
                self.pos += PROJECTS.len();
                let projects = self
                    .parse_list_value("_projects_")?
                    .iter()
                    .map(|id| {
                        id.parse::<i32>().map_err(|_| {
                            Error::InvalidQuery(format!("invalid project id '{}'", id))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok((Expression::project(projects), false))
            }
            _ => {
                if let Some(prefix) = EXPEDITIONS.iter().find(|p| rest.starts_with(**p)) {
                    self.pos += prefix.len();
                    let codes = self.parse_list_value("_expeditions_")?;
                    return Ok((Expression::expedition(codes.join(", ")), false));
                }
                self.parse_column_led()
            }
        }
    }

    /// Body of a parenthesized group, cursor just past `(`.
    fn parse_group_body(&mut self) -> Result<Expression> {
        self.depth += 1;
        let inner = self.parse_or()?;
        self.expect_char(')')?;
        self.depth -= 1;
        inner.ok_or_else(|| Error::invalid_query("empty group '()'"))
    }

    fn parse_column_led(&mut self) -> Result<(Expression, bool)> {
        let column = self.parse_column()?;

        if self.peek_char() == Some(':') {
            return Ok((self.parse_filter(column)?, false));
        }

        let save = self.pos;
        self.skip_ws();
        if let Some(operator) = self.try_comparison_operator()? {
            self.skip_ws();
            let value = self.parse_value()?;
            return Ok((Expression::comparison(column, value, operator), false));
        }
        self.pos = save;

        Ok((Expression::fts(self.scope.as_deref(), column), true))
    }

    /// Cursor sits on the `:` following `column`.
    fn parse_filter(&mut self, column: String) -> Result<Expression> {
        self.consume_char();

        if self.peek_char() == Some(':') {
            self.consume_char();
            let pattern = self.parse_value()?;
            return Ok(Expression::like(column, pattern));
        }

        match self.peek_char() {
            None => Err(self.error(&format!("expected value after '{}:'", column))),
            Some(c) if c.is_whitespace() => {
                Err(self.error(&format!("expected value after '{}:'", column)))
            }
            Some('(') => {
                self.consume_char();
                let outer = self.scope.replace(column);
                let inner = self.parse_group_body();
                self.scope = outer;
                Ok(Expression::group(inner?))
            }
            Some('"') => {
                let phrase = self.parse_phrase()?;
                Ok(Expression::like(column, format!("%{}%", phrase)))
            }
            Some('[') | Some('{') => {
                let range = self.parse_range()?;
                ParsedRange::parse(&range)?;
                Ok(Expression::range(column, range))
            }
            Some(_) => {
                let value = self.parse_chars()?;
                if value.is_empty() {
                    return Err(self.error(&format!("expected value after '{}:'", column)));
                }
                if value.contains(['*', '%']) {
                    Ok(Expression::like(column, value.replace('*', "%")))
                } else {
                    Ok(Expression::comparison(
                        column,
                        value,
                        ComparisonOperator::Equals,
                    ))
                }
            }
        }
    }

    fn try_comparison_operator(&mut self) -> Result<Option<ComparisonOperator>> {
        let rest = self.remaining();
        let token = ["<=", ">=", "<>", "=", "<", ">"]
            .into_iter()
            .find(|op| rest.starts_with(op));
        match token {
            Some(op) => {
                self.pos += op.len();
                ComparisonOperator::from_op(op).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Column name with an optional quoted last segment, e.g. `sample."col name"`.
    fn parse_column(&mut self) -> Result<String> {
        let mut column = self.parse_chars()?;
        if column.ends_with('.') && self.peek_char() == Some('"') {
            column.push_str(&self.parse_phrase()?);
        }
        if column.is_empty() {
            return Err(self.error("expected column or term"));
        }
        Ok(column)
    }

    /// Phrase or bare value.
    fn parse_value(&mut self) -> Result<String> {
        if self.peek_char() == Some('"') {
            return self.parse_phrase();
        }
        let value = self.parse_chars()?;
        if value.is_empty() {
            return Err(self.error("expected value"));
        }
        Ok(value)
    }

    /// Run of non reserved, non whitespace characters. `\` escapes the next character.
    fn parse_chars(&mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(c) = self.peek_char() {
            if c == '\\' {
                self.consume_char();
                match self.consume_char() {
                    Some(escaped) => out.push(escaped),
                    None => return Err(self.error("dangling escape character")),
                }
                continue;
            }
            if c.is_whitespace() || RESERVED.contains(&c) {
                break;
            }
            out.push(c);
            self.consume_char();
        }
        Ok(out)
    }

    fn parse_phrase(&mut self) -> Result<String> {
        let start = self.pos;
        if self.consume_char() != Some('"') {
            return Err(self.error("expected '\"'"));
        }

        let mut out = String::new();
        let mut escaped = false;
        while let Some(c) = self.consume_char() {
            if escaped {
                out.push(c);
                escaped = false;
                continue;
            }
            match c {
                '\\' => escaped = true,
                '"' => return Ok(out),
                _ => out.push(c),
            }
        }

        Err(Error::InvalidQuery(format!(
            "unterminated phrase {}",
            &self.input[start..]
        )))
    }

    /// Raw range text including its brackets.
    fn parse_range(&mut self) -> Result<String> {
        let start = self.pos;
        self.consume_char();
        while let Some(c) = self.consume_char() {
            if c == ']' || c == '}' {
                return Ok(self.input[start..self.pos].to_string());
            }
        }
        Err(Error::InvalidQuery(format!(
            "invalid range {}",
            &self.input[start..]
        )))
    }

    /// `value` or `[a, b, ...]`.
    fn parse_list_value(&mut self, name: &str) -> Result<Vec<String>> {
        let items: Vec<String> = if self.peek_char() == Some('[') {
            let start = self.pos;
            self.consume_char();
            let Some(len) = self.remaining().find(']') else {
                return Err(Error::InvalidQuery(format!(
                    "unterminated list {}",
                    &self.input[start..]
                )));
            };
            let body = &self.remaining()[..len];
            self.pos += len + 1;
            split_list(body).into_iter().map(str::to_string).collect()
        } else {
            split_list(&self.parse_chars()?)
                .into_iter()
                .map(str::to_string)
                .collect()
        };

        if items.is_empty() {
            return Err(self.error(&format!("{} requires at least one value", name)));
        }
        Ok(items)
    }
}

/// Wraps an OR so it stays a single operand of AND.
fn and_operand(expr: Expression) -> Expression {
    match expr {
        Expression::Logical {
            operator: LogicalOperator::Or,
            ..
        } => Expression::group(expr),
        expr => expr,
    }
}

fn is_standalone(rest: &str) -> bool {
    match rest.chars().next() {
        None => true,
        Some(c) => c.is_whitespace() || c == ')',
    }
}

/// Fold adjacent clauses, keeping source order: musts and must-nots are AND-ed,
/// alternatives collapse into one OR at the position of the first one.
fn combine(clauses: Vec<Clause>) -> Option<Expression> {
    let mut operands: Vec<Expression> = Vec::new();
    let mut shoulds: Vec<Expression> = Vec::new();
    let mut should_slot = None;
    let mut term_idx = None;

    for clause in clauses {
        match clause.occur {
            Occur::Must => operands.push(clause.expr),
            Occur::MustNot => operands.push(Expression::not(clause.expr)),
            Occur::Should => {
                should_slot.get_or_insert(operands.len());
                if !clause.term {
                    shoulds.push(clause.expr);
                    continue;
                }
                let Expression::Fts { column, term: next } = clause.expr else {
                    shoulds.push(clause.expr);
                    continue;
                };
                match term_idx.and_then(|i| shoulds.get_mut(i)) {
                    Some(Expression::Fts { term, .. }) => {
                        term.push(' ');
                        term.push_str(&next);
                    }
                    _ => {
                        term_idx = Some(shoulds.len());
                        shoulds.push(Expression::Fts { column, term: next });
                    }
                }
            }
        }
    }

    if let Some(slot) = should_slot {
        let should = shoulds.into_iter().reduce(Expression::or)?;
        if operands.is_empty() {
            return Some(should);
        }
        operands.insert(slot, and_operand(should));
    }

    operands.into_iter().reduce(Expression::and)
}
