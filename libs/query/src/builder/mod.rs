//! PostgreSQL query builder for project records.
//!
//! Compiles [`Expression`] trees into a single `SELECT` over the project's
//! entity tables:
//! - WHERE predicates over the `data` JSON column, cast per attribute data type
//! - joins to related entities, expeditions and root identifiers
//! - public expedition scoping
//! - ordering and paging

use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::project::{Entity, ProjectConfig};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use tracing::debug;

mod bind;
mod clauses;
mod joins;

use joins::JoinBuilder;

/// Values bound to `:n` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BindValue {
    Text(String),
    Int(i32),
}

impl From<&str> for BindValue {
    fn from(value: &str) -> Self {
        BindValue::Text(value.to_string())
    }
}

impl From<i32> for BindValue {
    fn from(value: i32) -> Self {
        BindValue::Int(value)
    }
}

/// SQL text plus the values for its `:1`, `:2`, ... placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParametrizedQuery {
    pub sql: String,
    /// `params[i]` binds placeholder `:{i + 1}`.
    pub params: Vec<BindValue>,
}

impl ParametrizedQuery {
    pub fn new(sql: impl Into<String>, params: Vec<BindValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Value bound to placeholder `key` (`"1"`, `"2"`, ...).
    pub fn param(&self, key: &str) -> Option<&BindValue> {
        let index: usize = key.parse().ok()?;
        self.params.get(index.checked_sub(1)?)
    }

    /// Placeholder keys paired with their values, in placeholder order.
    pub fn named_params(&self) -> impl Iterator<Item = (String, &BindValue)> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, v)| ((i + 1).to_string(), v))
    }
}

struct NamedParams<'a>(&'a ParametrizedQuery);

impl Serialize for NamedParams<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.params.len()))?;
        for (key, value) in self.0.named_params() {
            map.serialize_entry(&key, value)?;
        }
        map.end()
    }
}

impl Serialize for ParametrizedQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ParametrizedQuery", 2)?;
        state.serialize_field("sql", &self.sql)?;
        state.serialize_field("params", &NamedParams(self))?;
        state.end()
    }
}

/// Accumulates WHERE clauses and joins for one query entity.
///
/// A builder compiles a single query. Each [`visit`](Self::visit) adds one
/// top-level predicate, multiple predicates are AND-ed.
#[derive(Debug, Clone)]
pub struct QueryBuilder<'a> {
    project: &'a ProjectConfig,
    entity: &'a Entity,
    joins: JoinBuilder<'a>,
    bind_params: Vec<BindValue>,
    clauses: Vec<String>,
    all_query: bool,
    page: Option<u32>,
    limit: Option<u32>,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(project: &'a ProjectConfig, entity_alias: &str) -> Result<Self> {
        let entity = project
            .entity(entity_alias)
            .ok_or_else(|| Error::UnknownEntity(entity_alias.to_string()))?;

        Ok(Self {
            project,
            entity,
            joins: JoinBuilder::new(project, entity),
            bind_params: Vec::new(),
            clauses: Vec::new(),
            all_query: false,
            page: None,
            limit: None,
        })
    }

    /// `page` is 0 based and only applies together with `limit`.
    pub fn with_paging(mut self, page: Option<u32>, limit: Option<u32>) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    pub fn entity(&self) -> &'a Entity {
        self.entity
    }

    pub fn project(&self) -> &'a ProjectConfig {
        self.project
    }

    /// Entities requested through `_select_`, in request order.
    pub fn select_entities(&self) -> Vec<&'a Entity> {
        self.joins.selects().to_vec()
    }

    /// `project_<id>.<alias> AS <alias>` of the query entity.
    pub fn query_table(&self) -> String {
        self.project.entity_table(&self.entity.concept_alias)
    }

    /// Add `expression` as a top-level predicate.
    ///
    /// On error the builder is left as it was before the call.
    pub fn visit(&mut self, expression: &Expression) -> Result<()> {
        let params = self.bind_params.len();
        let joins = self.joins.clone();
        let all_query = self.all_query;

        match self.build_clause(expression) {
            Ok(Some(clause)) => {
                self.clauses.push(clause);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                self.bind_params.truncate(params);
                self.joins = joins;
                self.all_query = all_query;
                Err(e)
            }
        }
    }

    pub fn parameterized_query(&self, only_public_expeditions: bool) -> Result<ParametrizedQuery> {
        if !self.all_query && self.clauses.is_empty() {
            return Err(Error::invalid_query("query must not be empty"));
        }
        if self.all_query && !self.clauses.is_empty() {
            return Err(Error::invalid_query(
                "'*' can not be combined with other expressions",
            ));
        }

        let alias = &self.entity.concept_alias;
        let join_expeditions = self.joins.expeditions_joined() || only_public_expeditions;

        let mut where_clause = self.clauses.join(" AND ");
        if only_public_expeditions {
            where_clause = if where_clause.is_empty() {
                "expeditions.public = true".to_string()
            } else {
                format!("({}) AND expeditions.public = true", where_clause)
            };
        }

        let mut sql = format!(
            "{} FROM {}{}",
            self.build_select(join_expeditions),
            self.query_table(),
            self.joins.build(join_expeditions)
        );

        if !where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_clause);
        }

        sql.push_str(&format!(
            " ORDER BY {a}.local_identifier, {a}.expedition_id",
            a = alias
        ));

        if let Some(limit) = self.limit {
            if let Some(page) = self.page {
                sql.push_str(&format!(" OFFSET {}", u64::from(page) * u64::from(limit)));
            }
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        debug!(
            entity = %alias,
            params = self.bind_params.len(),
            public = only_public_expeditions,
            "compiled query"
        );

        Ok(ParametrizedQuery::new(sql, self.bind_params.clone()))
    }

    fn build_select(&self, join_expeditions: bool) -> String {
        let mut select = format!(
            "SELECT {a}.data AS \"{a}_data\", {a}_entity_identifiers.identifier AS \"{a}_rootIdentifier\"",
            a = self.entity.concept_alias
        );

        if join_expeditions {
            select.push_str(
                ", expeditions.expedition_code AS \"expeditionCode\", expeditions.project_id AS \"projectId\"",
            );
        }

        for entity in self.joins.selects() {
            select.push_str(&format!(
                ", {a}.data AS \"{a}_data\", {a}_entity_identifiers.identifier AS \"{a}_rootIdentifier\"",
                a = entity.concept_alias
            ));
        }

        select
    }
}
