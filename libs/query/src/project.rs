//! Project configuration consumed by the query compiler
//!
//! A project declares a forest of entities. Each entity maps spreadsheet
//! columns to attribute URIs, which are the keys of the `data` JSON stored per
//! record, and may name a parent entity.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Declared type of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    #[default]
    String,
    Integer,
    Float,
    Date,
    Datetime,
    Time,
}

impl DataType {
    /// SQL function converting the stored text to a comparable value.
    pub fn cast_function(&self) -> Option<&'static str> {
        match self {
            DataType::String => None,
            DataType::Integer => Some("convert_to_int"),
            DataType::Float => Some("convert_to_float"),
            DataType::Date => Some("convert_to_date"),
            DataType::Datetime => Some("convert_to_datetime"),
            DataType::Time => Some("convert_to_time"),
        }
    }

    /// PostgreSQL type a bound parameter is cast to.
    pub fn sql_type(&self) -> Option<&'static str> {
        match self {
            DataType::String => None,
            DataType::Integer => Some("int"),
            DataType::Float => Some("float"),
            DataType::Date => Some("date"),
            DataType::Datetime => Some("timestamp"),
            DataType::Time => Some("time"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attribute {
    pub column: String,
    pub uri: String,
    #[serde(default)]
    pub data_type: DataType,
}

impl Attribute {
    pub fn new(column: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::typed(column, uri, DataType::String)
    }

    pub fn typed(column: impl Into<String>, uri: impl Into<String>, data_type: DataType) -> Self {
        Self {
            column: column.into(),
            uri: uri.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub concept_alias: String,
    #[serde(default)]
    pub unique_key: Option<String>,
    #[serde(default)]
    pub parent_entity: Option<String>,
    #[serde(default)]
    pub worksheet: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Entity {
    pub fn new(concept_alias: impl Into<String>) -> Self {
        Self {
            concept_alias: concept_alias.into(),
            unique_key: None,
            parent_entity: None,
            worksheet: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_unique_key(mut self, column: impl Into<String>) -> Self {
        self.unique_key = Some(column.into());
        self
    }

    pub fn with_parent(mut self, concept_alias: impl Into<String>) -> Self {
        self.parent_entity = Some(concept_alias.into());
        self
    }

    pub fn with_worksheet(mut self, worksheet: impl Into<String>) -> Self {
        self.worksheet = Some(worksheet.into());
        self
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn is_child_entity(&self) -> bool {
        self.parent_entity.is_some()
    }

    /// Exact, case-sensitive column lookup.
    pub fn attribute(&self, column: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.column == column)
    }

    pub fn attribute_by_uri(&self, uri: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.uri == uri)
    }

    pub fn unique_key_uri(&self) -> Option<&str> {
        let key = self.unique_key.as_deref()?;
        self.attribute(key).map(|a| a.uri.as_str())
    }
}

/// Value kind of an expedition metadata property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetadataType {
    #[default]
    String,
    List,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpeditionMetadataProperty {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "type")]
    pub kind: MetadataType,
}

/// One hop of the join path between two entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStep<'a> {
    /// Walk from `child` up to its parent entity.
    Parent {
        child: &'a Entity,
        parent: &'a Entity,
    },
    /// Walk from `parent` down to one of its child entities.
    Child {
        parent: &'a Entity,
        child: &'a Entity,
    },
}

impl<'a> JoinStep<'a> {
    /// The entity this step joins in.
    pub fn target(&self) -> &'a Entity {
        match self {
            JoinStep::Parent { parent, .. } => parent,
            JoinStep::Child { child, .. } => child,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub project_id: i32,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub expedition_metadata_properties: Vec<ExpeditionMetadataProperty>,
}

impl ProjectConfig {
    pub fn new(project_id: i32, entities: Vec<Entity>) -> Self {
        Self {
            project_id,
            entities,
            expedition_metadata_properties: Vec::new(),
        }
    }

    /// Deserialize and validate a project configuration document.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: ProjectConfig = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidConfig(format!("malformed project config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entity in &self.entities {
            if !seen.insert(entity.concept_alias.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate entity '{}'",
                    entity.concept_alias
                )));
            }
        }

        for entity in &self.entities {
            if let Some(parent) = &entity.parent_entity {
                if self.entity(parent).is_none() {
                    return Err(Error::InvalidConfig(format!(
                        "entity '{}' references unknown parent '{}'",
                        entity.concept_alias, parent
                    )));
                }
            }

            if let Some(key) = &entity.unique_key {
                if entity.attribute(key).is_none() {
                    return Err(Error::InvalidConfig(format!(
                        "unique key '{}' is not an attribute of entity '{}'",
                        key, entity.concept_alias
                    )));
                }
            }

            let mut visited = HashSet::from([entity.concept_alias.as_str()]);
            let mut current = entity;
            while let Some(parent) = current.parent_entity.as_deref() {
                if !visited.insert(parent) {
                    return Err(Error::InvalidConfig(format!(
                        "entity '{}' has a cyclic parent chain",
                        entity.concept_alias
                    )));
                }
                match self.entity(parent) {
                    Some(p) => current = p,
                    None => break,
                }
            }
        }

        Ok(())
    }

    pub fn entity(&self, concept_alias: &str) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| e.concept_alias == concept_alias)
    }

    pub fn expedition_metadata_property(&self, name: &str) -> Option<&ExpeditionMetadataProperty> {
        self.expedition_metadata_properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// `project_<id>.<alias> AS <alias>`
    pub fn entity_table(&self, concept_alias: &str) -> String {
        format!(
            "project_{}.{} AS {}",
            self.project_id, concept_alias, concept_alias
        )
    }

    /// Ancestors ordered parent, grandparent, ...
    ///
    /// The walk is bounded by the number of entities so a cyclic configuration
    /// that skipped [`validate`](Self::validate) still terminates.
    pub fn parent_entities(&self, concept_alias: &str) -> Vec<&Entity> {
        let mut parents = Vec::new();
        let Some(mut entity) = self.entity(concept_alias) else {
            return parents;
        };

        while let Some(parent) = entity.parent_entity.as_deref().and_then(|p| self.entity(p)) {
            if parents.len() >= self.entities.len() {
                break;
            }
            parents.push(parent);
            entity = parent;
        }

        parents
    }

    /// Distinct entities are related when they share an ancestor chain.
    pub fn are_related(&self, alias1: &str, alias2: &str) -> bool {
        alias1 != alias2
            && self.entity(alias1).is_some()
            && self.entity(alias2).is_some()
            && self.common_ancestor(alias1, alias2).is_some()
    }

    /// Lowest entity present in both lineages, each lineage including the entity itself.
    fn common_ancestor(&self, alias1: &str, alias2: &str) -> Option<&Entity> {
        let lineage2 = self.lineage(alias2);
        self.lineage(alias1)
            .into_iter()
            .find(|e| lineage2.iter().any(|o| o.concept_alias == e.concept_alias))
    }

    fn lineage(&self, concept_alias: &str) -> Vec<&Entity> {
        match self.entity(concept_alias) {
            Some(entity) => std::iter::once(entity)
                .chain(self.parent_entities(concept_alias))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Hops needed to reach `to` starting at `from`: up to the lowest common
    /// ancestor, then down to `to`. Empty when the entities are unrelated or equal.
    pub fn entity_relations(&self, from: &str, to: &str) -> Vec<JoinStep<'_>> {
        if !self.are_related(from, to) {
            return Vec::new();
        }
        let Some(ancestor) = self.common_ancestor(from, to) else {
            return Vec::new();
        };

        let mut steps = Vec::new();

        let up = self.lineage(from);
        for pair in up.windows(2) {
            if pair[0].concept_alias == ancestor.concept_alias {
                break;
            }
            steps.push(JoinStep::Parent {
                child: pair[0],
                parent: pair[1],
            });
        }

        let down: Vec<&Entity> = self
            .lineage(to)
            .into_iter()
            .take_while(|e| e.concept_alias != ancestor.concept_alias)
            .collect();
        let mut parent = ancestor;
        for child in down.into_iter().rev() {
            steps.push(JoinStep::Child { parent, child });
            parent = child;
        }

        steps
    }
}
