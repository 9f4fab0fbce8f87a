use crate::builder::{ParametrizedQuery, QueryBuilder};
use crate::collectors;
use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::parser::parse;
use crate::project::{Entity, ProjectConfig};
use tracing::debug;

/// A parsed query bound to a project and its query entity.
#[derive(Debug, Clone)]
pub struct Query<'a> {
    project: &'a ProjectConfig,
    entity: &'a Entity,
    expression: Expression,
    page: Option<u32>,
    limit: Option<u32>,
}

impl<'a> Query<'a> {
    /// Parse `input` as a query against `entity_alias`.
    pub fn new(project: &'a ProjectConfig, entity_alias: &str, input: &str) -> Result<Self> {
        let expression = parse(input)?;
        debug!(input, entity = entity_alias, kind = expression.kind(), "parsed query");
        Self::from_expression(project, entity_alias, expression)
    }

    pub fn from_expression(
        project: &'a ProjectConfig,
        entity_alias: &str,
        expression: Expression,
    ) -> Result<Self> {
        let entity = project
            .entity(entity_alias)
            .ok_or_else(|| Error::UnknownEntity(entity_alias.to_string()))?;
        Ok(Self {
            project,
            entity,
            expression,
            page: None,
            limit: None,
        })
    }

    pub fn with_paging(mut self, page: Option<u32>, limit: Option<u32>) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    pub fn expression(&self) -> &Expression {
        &self.expression
    }

    pub fn entity(&self) -> &'a Entity {
        self.entity
    }

    pub fn expeditions(&self) -> Vec<String> {
        collectors::expeditions(&self.expression)
    }

    pub fn projects(&self) -> Vec<i32> {
        collectors::projects(&self.expression)
    }

    /// The query entity followed by every entity the expression references.
    pub fn entities(&self) -> Vec<String> {
        let mut aliases = vec![self.entity.concept_alias.clone()];
        for alias in collectors::entities(&self.expression) {
            if !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        aliases
    }

    /// Entities whose records the compiled query returns.
    pub fn select_entities(&self) -> Vec<String> {
        collectors::select_entities(&self.expression)
    }

    pub fn parameterized_query(&self, only_public_expeditions: bool) -> Result<ParametrizedQuery> {
        let mut builder = QueryBuilder::new(self.project, &self.entity.concept_alias)?
            .with_paging(self.page, self.limit);
        builder.visit(&self.expression)?;
        builder.parameterized_query(only_public_expeditions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Attribute;

    fn project() -> ProjectConfig {
        ProjectConfig::new(
            1,
            vec![
                Entity::new("event").with_attribute(Attribute::new("col2", "urn:col2")),
                Entity::new("sample")
                    .with_parent("event")
                    .with_attribute(Attribute::new("col1", "urn:col1")),
            ],
        )
    }

    #[test]
    fn unknown_query_entity() {
        let project = project();
        assert_eq!(
            Query::new(&project, "tissue", "*").unwrap_err(),
            Error::UnknownEntity("tissue".to_string())
        );
    }

    #[test]
    fn collects_referenced_entities() {
        let project = project();
        let query = Query::new(&project, "event", "_expeditions_:[A, B] sample.col1:x").unwrap();
        assert_eq!(query.entities(), vec!["event", "sample"]);
        assert_eq!(query.expeditions(), vec!["A", "B"]);
        assert!(query.projects().is_empty());
    }

    #[test]
    fn blank_query_does_not_compile() {
        let project = project();
        let query = Query::new(&project, "event", "   ").unwrap();
        assert!(query.expression().is_empty());
        assert!(matches!(
            query.parameterized_query(false),
            Err(Error::InvalidQuery(_))
        ));
    }

    #[test]
    fn paging() {
        let project = project();
        let query = Query::new(&project, "event", "*")
            .unwrap()
            .with_paging(Some(2), Some(50));
        let sql = query.parameterized_query(false).unwrap().sql;
        assert!(sql.ends_with(" OFFSET 100 LIMIT 50"), "{}", sql);
    }
}
