//! JOIN clause assembly for a query entity and the entities it reaches.

use crate::error::{Error, Result};
use crate::project::{Entity, JoinStep, ProjectConfig};
use tracing::trace;

/// Collects the joins a query needs.
///
/// Entities are joined along their relationship path from the query entity,
/// intermediate entities included, in the order they are first referenced.
#[derive(Debug, Clone)]
pub(crate) struct JoinBuilder<'a> {
    project: &'a ProjectConfig,
    query_entity: &'a Entity,
    expeditions: bool,
    /// (alias, clause) in emission order.
    joins: Vec<(&'a str, String)>,
    selects: Vec<&'a Entity>,
}

impl<'a> JoinBuilder<'a> {
    pub(crate) fn new(project: &'a ProjectConfig, query_entity: &'a Entity) -> Self {
        Self {
            project,
            query_entity,
            expeditions: false,
            joins: Vec::new(),
            selects: Vec::new(),
        }
    }

    pub(crate) fn join_expeditions(&mut self) {
        self.expeditions = true;
    }

    pub(crate) fn expeditions_joined(&self) -> bool {
        self.expeditions
    }

    pub(crate) fn selects(&self) -> &[&'a Entity] {
        &self.selects
    }

    fn already_joined(&self, alias: &str) -> bool {
        alias == self.query_entity.concept_alias || self.joins.iter().any(|(a, _)| *a == alias)
    }

    pub(crate) fn add(&mut self, entity: &'a Entity) -> Result<()> {
        if entity.concept_alias == self.query_entity.concept_alias {
            return Ok(());
        }
        if !self
            .project
            .are_related(&self.query_entity.concept_alias, &entity.concept_alias)
        {
            return Err(Error::UnrelatedEntities {
                entity: entity.concept_alias.clone(),
                query_entity: self.query_entity.concept_alias.clone(),
            });
        }

        let project = self.project;
        for step in project.entity_relations(&self.query_entity.concept_alias, &entity.concept_alias) {
            let target = step.target();
            if self.already_joined(&target.concept_alias) {
                continue;
            }
            let clause = match step {
                JoinStep::Parent { child, parent } => format!(
                    " JOIN {} ON {p}.local_identifier = {c}.parent_identifier and {p}.expedition_id = {c}.expedition_id",
                    project.entity_table(&parent.concept_alias),
                    p = parent.concept_alias,
                    c = child.concept_alias,
                ),
                JoinStep::Child { parent, child } => format!(
                    " LEFT JOIN {} ON {c}.parent_identifier = {p}.local_identifier and {c}.expedition_id = {p}.expedition_id",
                    project.entity_table(&child.concept_alias),
                    p = parent.concept_alias,
                    c = child.concept_alias,
                ),
            };
            trace!(entity = %target.concept_alias, "adding join");
            self.joins.push((&target.concept_alias, clause));
        }

        Ok(())
    }

    /// Join `entity` and include it in the selected columns.
    pub(crate) fn add_select(&mut self, entity: &'a Entity) -> Result<()> {
        if entity.concept_alias == self.query_entity.concept_alias {
            return Ok(());
        }
        self.add(entity)?;
        if !self
            .selects
            .iter()
            .any(|e| e.concept_alias == entity.concept_alias)
        {
            self.selects.push(entity);
        }
        Ok(())
    }

    pub(crate) fn build(&self, join_expeditions: bool) -> String {
        let mut sql = String::new();

        if join_expeditions {
            sql.push_str(&format!(
                " JOIN expeditions ON expeditions.id = {}.expedition_id",
                self.query_entity.concept_alias
            ));
        }

        for (_, clause) in &self.joins {
            sql.push_str(clause);
        }

        for entity in std::iter::once(self.query_entity).chain(self.selects.iter().copied()) {
            sql.push_str(&format!(
                " LEFT JOIN entity_identifiers AS {a}_entity_identifiers ON {a}_entity_identifiers.expedition_id = {a}.expedition_id and {a}_entity_identifiers.concept_alias = '{a}'",
                a = entity.concept_alias
            ));
        }

        sql
    }
}
