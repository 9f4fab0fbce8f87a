#![allow(dead_code)]

use fims_query::project::ExpeditionMetadataProperty;
use fims_query::{
    parse, Attribute, DataType, Entity, ParametrizedQuery, ProjectConfig, QueryBuilder, Result,
};

/// `event <- sample <- tissue` plus an unrelated `non_linked` entity.
pub fn project() -> ProjectConfig {
    ProjectConfig::new(
        1,
        vec![
            event(),
            sample(),
            Entity::new("tissue")
                .with_parent("sample")
                .with_unique_key("tissueId")
                .with_attribute(Attribute::new("tissueId", "urn:tissueId"))
                .with_attribute(Attribute::new("sampleId", "urn:sampleId"))
                .with_attribute(Attribute::new("col4", "urn:col4")),
            Entity::new("non_linked")
                .with_unique_key("id")
                .with_attribute(Attribute::new("id", "urn:id")),
        ],
    )
}

/// A project with only the `event` entity.
pub fn single_entity_project() -> ProjectConfig {
    ProjectConfig::new(1, vec![event()])
}

pub fn project_with_expedition_metadata() -> ProjectConfig {
    let mut project = project();
    project
        .expedition_metadata_properties
        .push(ExpeditionMetadataProperty {
            name: "country".to_string(),
            required: true,
            kind: Default::default(),
        });
    project
}

pub fn event() -> Entity {
    Entity::new("event")
        .with_unique_key("eventId")
        .with_worksheet("Events")
        .with_attribute(Attribute::new("eventId", "eventId"))
        .with_attribute(Attribute::new("col2", "urn:col2"))
        .with_attribute(Attribute::new("col3", "urn:col3"))
        .with_attribute(Attribute::typed("col4", "urn:col4", DataType::Integer))
        .with_attribute(Attribute::typed("col5", "urn:col5", DataType::Float))
        .with_attribute(Attribute::typed("col6", "urn:col6", DataType::Date))
        .with_attribute(Attribute::typed("col7", "urn:col7", DataType::Datetime))
        .with_attribute(Attribute::typed("col8", "urn:col8", DataType::Time))
}

pub fn sample() -> Entity {
    Entity::new("sample")
        .with_parent("event")
        .with_unique_key("sampleId")
        .with_worksheet("Samples")
        .with_attribute(Attribute::new("sampleId", "urn:sampleId"))
        .with_attribute(Attribute::new("eventId", "urn:eventId"))
        .with_attribute(Attribute::new("col1", "urn:col1"))
        .with_attribute(Attribute::new("col3", "urn:col3"))
}

/// Parse `query`, visit it on `entity` and compile.
pub fn compile(
    project: &ProjectConfig,
    entity: &str,
    query: &str,
    only_public: bool,
) -> Result<ParametrizedQuery> {
    let expression = parse(query)?;
    let mut builder = QueryBuilder::new(project, entity)?;
    builder.visit(&expression)?;
    builder.parameterized_query(only_public)
}

/// Column list selected for the main `event` entity without expeditions.
pub const EVENT_SELECT: &str =
    "SELECT event.data AS \"event_data\", event_entity_identifiers.identifier AS \"event_rootIdentifier\"";

pub const EVENT_IDENTIFIERS: &str = " LEFT JOIN entity_identifiers AS event_entity_identifiers ON event_entity_identifiers.expedition_id = event.expedition_id and event_entity_identifiers.concept_alias = 'event'";

pub const EVENT_ORDER: &str = " ORDER BY event.local_identifier, event.expedition_id";

/// Full SQL for a query on `event` that only touches the event table.
pub fn event_sql(where_clause: &str) -> String {
    format!(
        "{} FROM project_1.event AS event{} WHERE {}{}",
        EVENT_SELECT, EVENT_IDENTIFIERS, where_clause, EVENT_ORDER
    )
}

pub fn text_params(values: &[&str]) -> Vec<fims_query::BindValue> {
    values.iter().map(|v| (*v).into()).collect()
}
