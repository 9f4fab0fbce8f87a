//! Projection of raw records into column-keyed maps.

use crate::error::{Error, Result};
use crate::project::Entity;
use serde_json::Value;
use std::collections::BTreeMap;

pub const BCID: &str = "bcid";
pub const EXPEDITION_CODE: &str = "expeditionCode";
pub const PROJECT_ID: &str = "projectId";

/// One stored resource: attribute URI to raw value, plus the identifiers the
/// query joined in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    properties: BTreeMap<String, String>,
    root_identifier: Option<String>,
    expedition_code: Option<String>,
    project_id: Option<i32>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the columns selected for `alias` from a result row.
    ///
    /// Non-string JSON values are kept in their JSON text form, nulls are
    /// dropped.
    pub fn from_json(row: &Value, alias: &str) -> Self {
        let mut record = Record::new();

        if let Some(Value::Object(data)) = row.get(format!("{}_data", alias)) {
            for (uri, value) in data {
                match value {
                    Value::Null => {}
                    Value::String(s) => record.set(uri.clone(), s.clone()),
                    other => record.set(uri.clone(), other.to_string()),
                }
            }
        }

        record.root_identifier = row
            .get(format!("{}_rootIdentifier", alias))
            .and_then(Value::as_str)
            .map(str::to_string);
        record.expedition_code = row
            .get(EXPEDITION_CODE)
            .and_then(Value::as_str)
            .map(str::to_string);
        record.project_id = row
            .get(PROJECT_ID)
            .and_then(Value::as_i64)
            .and_then(|id| i32::try_from(id).ok());

        record
    }

    pub fn set(&mut self, uri: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(uri.into(), value.into());
    }

    pub fn with(mut self, uri: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(uri, value);
        self
    }

    pub fn with_root_identifier(mut self, root_identifier: impl Into<String>) -> Self {
        self.root_identifier = Some(root_identifier.into());
        self
    }

    pub fn with_expedition(mut self, expedition_code: impl Into<String>, project_id: i32) -> Self {
        self.expedition_code = Some(expedition_code.into());
        self.project_id = Some(project_id);
        self
    }

    pub fn get(&self, uri: &str) -> Option<&str> {
        self.properties.get(uri).map(String::as_str)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn root_identifier(&self) -> Option<&str> {
        self.root_identifier.as_deref()
    }

    pub fn expedition_code(&self) -> Option<&str> {
        self.expedition_code.as_deref()
    }

    pub fn project_id(&self) -> Option<i32> {
        self.project_id
    }
}

/// Records of one entity, optionally merged with the columns of its parent.
#[derive(Debug, Clone)]
pub struct QueryResult<'a> {
    records: Vec<Record>,
    entity: &'a Entity,
    parent: Option<&'a Entity>,
}

impl<'a> QueryResult<'a> {
    pub fn new(records: Vec<Record>, entity: &'a Entity) -> Self {
        Self {
            records,
            entity,
            parent: None,
        }
    }

    /// Parent columns are projected too, and bcids of child records carry the
    /// parent's unique key value.
    pub fn with_parent(records: Vec<Record>, entity: &'a Entity, parent: &'a Entity) -> Self {
        Self {
            records,
            entity,
            parent: Some(parent),
        }
    }

    pub fn entity(&self) -> &'a Entity {
        self.entity
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fails with `NO_RESOURCES` when the query matched nothing.
    pub fn ensure_records(&self) -> Result<()> {
        if self.records.is_empty() {
            return Err(Error::NoResources(self.entity.concept_alias.clone()));
        }
        Ok(())
    }

    pub fn get(&self, include_bcid: bool) -> Vec<BTreeMap<String, String>> {
        self.get_with_source(include_bcid, &[])
    }

    /// Like [`get`](Self::get), keeping only the columns named in `source`.
    /// An empty `source` keeps everything.
    pub fn get_with_source(
        &self,
        include_bcid: bool,
        source: &[String],
    ) -> Vec<BTreeMap<String, String>> {
        let keep = |column: &str| source.is_empty() || source.iter().any(|s| s == column);

        let entities: Vec<&Entity> = std::iter::once(self.entity).chain(self.parent).collect();
        let is_attribute = |uri: &str| entities.iter().any(|e| e.attribute_by_uri(uri).is_some());

        let emit_bcid = include_bcid
            && keep(BCID)
            && entities.iter().all(|e| e.attribute(BCID).is_none());

        self.records
            .iter()
            .map(|record| {
                let mut row = BTreeMap::new();

                for (uri, value) in record.properties() {
                    if !is_attribute(uri.as_str()) && keep(uri.as_str()) {
                        row.insert(uri.clone(), value.clone());
                    }
                }
                // A column declared by several entities takes the later entity's value.
                for entity in &entities {
                    for attribute in &entity.attributes {
                        if !keep(attribute.column.as_str()) {
                            continue;
                        }
                        match record.get(&attribute.uri) {
                            Some(value) => {
                                row.insert(attribute.column.clone(), value.to_string());
                            }
                            None => {
                                row.entry(attribute.column.clone()).or_default();
                            }
                        }
                    }
                }

                if let Some(code) = record.expedition_code() {
                    if keep(EXPEDITION_CODE) {
                        row.insert(EXPEDITION_CODE.to_string(), code.to_string());
                    }
                }
                if let Some(id) = record.project_id() {
                    if keep(PROJECT_ID) {
                        row.insert(PROJECT_ID.to_string(), id.to_string());
                    }
                }

                if emit_bcid {
                    row.insert(BCID.to_string(), self.bcid(record));
                }
                row
            })
            .collect()
    }

    /// `rootIdentifier` + unique key value, the unique value prefixed with
    /// `<parent unique value>_` when the result carries a parent entity.
    fn bcid(&self, record: &Record) -> String {
        let unique = |entity: &Entity| {
            entity
                .unique_key_uri()
                .and_then(|uri| record.get(uri))
                .unwrap_or_default()
                .to_string()
        };

        let suffix = match self.parent {
            Some(parent) => format!("{}_{}", unique(parent), unique(self.entity)),
            None => unique(self.entity),
        };
        format!("{}{}", record.root_identifier().unwrap_or_default(), suffix)
    }
}
