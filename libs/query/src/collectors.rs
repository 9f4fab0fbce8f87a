//! Read-only walks collecting what an expression references.
//!
//! Callers use these to authorize expedition and project access before a
//! query is executed, and to decide which entities to project.

use crate::expression::{split_list, Expression};
use crate::resolver::EXPEDITION_ALIAS;

/// Calls `f` on `expr` and every expression nested below it, parents first.
pub fn walk<'e>(expr: &'e Expression, f: &mut impl FnMut(&'e Expression)) {
    f(expr);
    match expr {
        Expression::Select { expression, .. }
        | Expression::Group { expression }
        | Expression::Not { expression } => walk(expression, f),
        Expression::Logical { left, right, .. } => {
            walk(left, f);
            walk(right, f);
        }
        _ => {}
    }
}

fn push_unique(out: &mut Vec<String>, value: &str) {
    if !out.iter().any(|v| v == value) {
        out.push(value.to_string());
    }
}

/// Expedition codes named by `_expeditions_:` clauses, in first-seen order.
pub fn expeditions(expr: &Expression) -> Vec<String> {
    let mut out = Vec::new();
    walk(expr, &mut |e| {
        if let Expression::Expedition { expeditions } = e {
            for code in split_list(expeditions) {
                push_unique(&mut out, code);
            }
        }
    });
    out
}

/// Project ids named by `_projects_:` clauses, in first-seen order.
pub fn projects(expr: &Expression) -> Vec<i32> {
    let mut out: Vec<i32> = Vec::new();
    walk(expr, &mut |e| {
        if let Expression::Project { projects } = e {
            for id in projects {
                if !out.contains(id) {
                    out.push(*id);
                }
            }
        }
    });
    out
}

/// Entities requested through `_select_:`.
pub fn select_entities(expr: &Expression) -> Vec<String> {
    let mut out = Vec::new();
    walk(expr, &mut |e| {
        if let Expression::Select { entities, .. } = e {
            for alias in split_list(entities) {
                push_unique(&mut out, alias);
            }
        }
    });
    out
}

/// Every entity alias the expression mentions, through `_select_:` or an
/// `entity.column` path. Expedition metadata paths are not entities.
pub fn entities(expr: &Expression) -> Vec<String> {
    let mut out = Vec::new();
    walk(expr, &mut |e| match e {
        Expression::Select { entities, .. } => {
            for alias in split_list(entities) {
                push_unique(&mut out, alias);
            }
        }
        Expression::Comparison { column, .. }
        | Expression::Like { column, .. }
        | Expression::Range { column, .. } => push_column_entity(&mut out, column),
        Expression::Fts {
            column: Some(column),
            ..
        } => push_column_entity(&mut out, column),
        Expression::Exists { columns } => {
            for column in split_list(columns) {
                push_column_entity(&mut out, column);
            }
        }
        _ => {}
    });
    out
}

fn push_column_entity(out: &mut Vec<String>, column: &str) {
    if let Some((alias, _)) = column.split_once('.') {
        if !alias.eq_ignore_ascii_case(EXPEDITION_ALIAS) {
            push_unique(out, alias);
        }
    }
}
