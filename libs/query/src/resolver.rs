//! Column resolution against a project configuration

use crate::error::{Error, Result};
use crate::project::{Attribute, DataType, Entity, ProjectConfig};

/// Pseudo entity alias addressing expedition metadata, e.g. `expedition.country`.
pub const EXPEDITION_ALIAS: &str = "expedition";

/// A column reference resolved to the SQL it reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryColumn<'a> {
    Attribute {
        entity: &'a Entity,
        attribute: &'a Attribute,
    },
    /// Property stored in the `metadata` JSON of the `expeditions` table.
    ExpeditionProperty { name: String },
}

impl<'a> QueryColumn<'a> {
    pub fn table(&self) -> &'a str {
        match self {
            QueryColumn::Attribute { entity, .. } => &entity.concept_alias,
            QueryColumn::ExpeditionProperty { .. } => "expeditions",
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            QueryColumn::Attribute { .. } => "data",
            QueryColumn::ExpeditionProperty { .. } => "metadata",
        }
    }

    /// JSON key read from [`column`](Self::column).
    pub fn property(&self) -> &str {
        match self {
            QueryColumn::Attribute { attribute, .. } => &attribute.uri,
            QueryColumn::ExpeditionProperty { name } => name,
        }
    }

    /// Expedition metadata is always compared as text.
    pub fn data_type(&self) -> DataType {
        match self {
            QueryColumn::Attribute { attribute, .. } => attribute.data_type,
            QueryColumn::ExpeditionProperty { .. } => DataType::String,
        }
    }

    pub fn entity(&self) -> Option<&'a Entity> {
        match self {
            QueryColumn::Attribute { entity, .. } => Some(entity),
            QueryColumn::ExpeditionProperty { .. } => None,
        }
    }

    /// `<table>.<column>->>'<property>'`
    pub fn sql(&self) -> String {
        format!(
            "{}.{}->>'{}'",
            self.table(),
            self.column(),
            escape_literal(self.property())
        )
    }
}

/// Doubles single quotes so a value can sit inside a SQL string literal.
pub(crate) fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Resolve `column_spec` to the entity and attribute it names.
///
/// `entity.column` addresses another entity, which must share an ancestor
/// chain with `current`. A bare column is only looked up on `current`, except
/// in single entity projects where the only entity is used.
pub fn resolve_column<'a>(
    project: &'a ProjectConfig,
    current: &str,
    column_spec: &str,
) -> Result<(&'a Entity, &'a Attribute)> {
    let home = current_entity(project, current)?;
    let (entity, column) = match column_spec.split_once('.') {
        Some((alias, column)) => {
            let entity = project
                .entity(alias)
                .ok_or_else(|| Error::UnknownEntity(column_spec.to_string()))?;
            (entity, column)
        }
        None => (home, column_spec),
    };

    if entity.concept_alias != home.concept_alias
        && !project.are_related(&home.concept_alias, &entity.concept_alias)
    {
        return Err(Error::UnrelatedEntities {
            entity: entity.concept_alias.clone(),
            query_entity: home.concept_alias.clone(),
        });
    }

    let attribute = entity
        .attribute(column)
        .ok_or_else(|| Error::UnknownColumn(column_spec.to_string()))?;

    Ok((entity, attribute))
}

/// Like [`resolve_column`], additionally accepting `expedition.<property>`.
pub fn resolve_query_column<'a>(
    project: &'a ProjectConfig,
    current: &str,
    column_spec: &str,
) -> Result<QueryColumn<'a>> {
    if let Some((alias, name)) = column_spec.split_once('.') {
        if alias.eq_ignore_ascii_case(EXPEDITION_ALIAS) && project.entity(alias).is_none() {
            return resolve_expedition_property(project, column_spec, name);
        }
    }

    let (entity, attribute) = resolve_column(project, current, column_spec)?;
    Ok(QueryColumn::Attribute { entity, attribute })
}

fn resolve_expedition_property<'a>(
    project: &ProjectConfig,
    column_spec: &str,
    name: &str,
) -> Result<QueryColumn<'a>> {
    if name.is_empty() {
        return Err(Error::UnknownColumn(column_spec.to_string()));
    }
    // Undeclared properties are only rejected once a project declares any.
    if !project.expedition_metadata_properties.is_empty()
        && project.expedition_metadata_property(name).is_none()
    {
        return Err(Error::UnknownColumn(column_spec.to_string()));
    }
    Ok(QueryColumn::ExpeditionProperty {
        name: name.to_string(),
    })
}

fn current_entity<'a>(project: &'a ProjectConfig, current: &str) -> Result<&'a Entity> {
    if let [only] = project.entities.as_slice() {
        return Ok(only);
    }
    project
        .entity(current)
        .ok_or_else(|| Error::UnknownEntity(current.to_string()))
}
