//! SQL generation tests for QueryBuilder

use fims_query::{
    parse, BindValue, ComparisonOperator, Error, Expression, ParametrizedQuery, QueryBuilder,
};

mod test_support;
use test_support::{
    compile, event_sql, project, project_with_expedition_metadata, single_entity_project,
    text_params, EVENT_IDENTIFIERS, EVENT_ORDER, EVENT_SELECT,
};

const EXPEDITION_SELECT: &str =
    ", expeditions.expedition_code AS \"expeditionCode\", expeditions.project_id AS \"projectId\"";
const EXPEDITION_JOIN: &str = " JOIN expeditions ON expeditions.id = event.expedition_id";
const SAMPLE_JOIN: &str = " LEFT JOIN project_1.sample AS sample ON sample.parent_identifier = event.local_identifier and sample.expedition_id = event.expedition_id";

fn expedition_sql(where_clause: &str) -> String {
    format!(
        "{}{} FROM project_1.event AS event{}{} WHERE {}{}",
        EVENT_SELECT, EXPEDITION_SELECT, EXPEDITION_JOIN, EVENT_IDENTIFIERS, where_clause, EVENT_ORDER
    )
}

fn sample_join_sql(where_clause: &str) -> String {
    format!(
        "{} FROM project_1.event AS event{}{} WHERE {}{}",
        EVENT_SELECT, SAMPLE_JOIN, EVENT_IDENTIFIERS, where_clause, EVENT_ORDER
    )
}

#[test]
fn column_filter_on_single_entity_project() {
    let query = compile(&single_entity_project(), "event", "col2:value", false).unwrap();
    assert_eq!(query.sql, event_sql("event.data->>'urn:col2' = :1"));
    assert_eq!(query.params, text_params(&["value"]));
    assert_eq!(query.param("1"), Some(&BindValue::from("value")));
}

#[test]
fn expedition_filter_joins_expeditions() {
    let query = compile(&project(), "event", "_expedition_:TEST", false).unwrap();
    assert_eq!(query.sql, expedition_sql("expeditions.expedition_code = :1"));
    assert_eq!(
        serde_json::to_value(&query).unwrap()["params"],
        serde_json::json!({"1": "TEST"})
    );
}

#[test]
fn multiple_expeditions_use_in() {
    let query = compile(&project(), "event", "_expeditions_:[TEST, TEST2]", false).unwrap();
    assert_eq!(
        query.sql,
        expedition_sql("expeditions.expedition_code IN (:1, :2)")
    );
    assert_eq!(query.params, text_params(&["TEST", "TEST2"]));
}

#[test]
fn exists_binds_attribute_uris() {
    let query = compile(&single_entity_project(), "event", "_exists_:[col2, col3]", false).unwrap();
    assert_eq!(query.sql, event_sql("event.data ??& array[:1, :2]"));
    assert_eq!(query.params, text_params(&["urn:col2", "urn:col3"]));

    let query = compile(&single_entity_project(), "event", "_exists_:col3", false).unwrap();
    assert_eq!(query.sql, event_sql("event.data ?? :1"));
    assert_eq!(query.params, text_params(&["urn:col3"]));
}

#[test]
fn exists_across_entities_is_grouped_per_table() {
    let query = compile(&project(), "event", "_exists_:[col2, sample.col1, col3]", false).unwrap();
    assert_eq!(
        query.sql,
        sample_join_sql("(event.data ??& array[:1, :2] AND sample.data ?? :3)")
    );
    assert_eq!(
        query.params,
        text_params(&["urn:col2", "urn:col3", "urn:col1"])
    );
}

#[test]
fn group_and_exists_with_second_visit() {
    let project = single_entity_project();
    let mut builder = QueryBuilder::new(&project, "event").unwrap();
    builder
        .visit(&parse("(col2:1 OR col2:4) AND _exists_:col3").unwrap())
        .unwrap();
    builder.visit(&parse("eventId<=100").unwrap()).unwrap();

    let query = builder.parameterized_query(false).unwrap();
    assert_eq!(
        query.sql,
        event_sql(
            "(event.data->>'urn:col2' = :1 OR event.data->>'urn:col2' = :2) AND event.data ?? :3 AND event.data->>'eventId' <= :4"
        )
    );
    assert_eq!(query.params, text_params(&["1", "4", "urn:col3", "100"]));
}

#[test]
fn mixed_bound_range() {
    let project = single_entity_project();
    let mut builder = QueryBuilder::new(&project, "event").unwrap();
    builder
        .visit(&Expression::range("col2", "{1 TO 10]"))
        .unwrap();
    let query = builder.parameterized_query(false).unwrap();
    assert_eq!(
        query.sql,
        event_sql("(event.data->>'urn:col2' > :1 AND event.data->>'urn:col2' <= :2)")
    );
    assert_eq!(query.params, text_params(&["1", "10"]));
}

#[test]
fn unbounded_range_side_is_omitted() {
    let query = compile(&single_entity_project(), "event", "col4:[* TO 10]", false).unwrap();
    assert_eq!(
        query.sql,
        event_sql("(convert_to_int(event.data->>'urn:col4') <= :1::int)")
    );
    assert_eq!(query.params, text_params(&["10"]));
}

#[test]
fn malformed_range_is_invalid() {
    assert!(matches!(
        compile(&single_entity_project(), "event", "col2:[1 TO 10", false),
        Err(Error::InvalidQuery(_))
    ));
    assert!(matches!(
        compile(&single_entity_project(), "event", "col2:[* TO *]", false),
        Err(Error::InvalidQuery(_))
    ));
}

#[test]
fn typed_comparisons_cast_both_sides() {
    let project = single_entity_project();
    let cases = [
        ("col4 > 5", "convert_to_int(event.data->>'urn:col4') > :1::int"),
        ("col5 < 1.5", "convert_to_float(event.data->>'urn:col5') < :1::float"),
        ("col6 >= 2017-01-01", "convert_to_date(event.data->>'urn:col6') >= :1::date"),
        (
            "col7 <= \"2017-01-01 10:00\"",
            "convert_to_datetime(event.data->>'urn:col7') <= :1::timestamp",
        ),
        ("col8 > 10\\:00", "convert_to_time(event.data->>'urn:col8') > :1::time"),
    ];
    for (input, expected) in cases {
        let query = compile(&project, "event", input, false).unwrap();
        assert_eq!(query.sql, event_sql(expected), "query: {}", input);
    }
}

#[test]
fn typed_equality_is_not_cast() {
    let project = single_entity_project();
    let query = compile(&project, "event", "col4 = 5", false).unwrap();
    assert_eq!(query.sql, event_sql("event.data->>'urn:col4' = :1"));
    let query = compile(&project, "event", "col4 <> 5", false).unwrap();
    assert_eq!(query.sql, event_sql("event.data->>'urn:col4' <> :1"));
}

#[test]
fn string_comparison_is_not_cast() {
    let query = compile(&single_entity_project(), "event", "col2 > b", false).unwrap();
    assert_eq!(query.sql, event_sql("event.data->>'urn:col2' > :1"));
}

#[test]
fn full_text_search() {
    let project = single_entity_project();
    let query = compile(&project, "event", "value", false).unwrap();
    assert_eq!(query.sql, event_sql("event.tsv @@ to_tsquery(:1)"));
    assert_eq!(query.params, text_params(&["value"]));

    let query = compile(&project, "event", "col2:(big fish)", false).unwrap();
    assert_eq!(
        query.sql,
        event_sql(
            "((to_tsvector(event.data->>'urn:col2') @@ to_tsquery(:1) AND event.tsv @@ to_tsquery(:1)))"
        )
    );
    assert_eq!(query.params, text_params(&["big & fish"]));
}

#[test]
fn like_patterns() {
    let project = single_entity_project();
    let cases = [
        ("col2::\"%val\"", "%val"),
        ("col2:\"some phrase\"", "%some phrase%"),
        ("col2:val*", "val%"),
    ];
    for (input, pattern) in cases {
        let query = compile(&project, "event", input, false).unwrap();
        assert_eq!(query.sql, event_sql("event.data->>'urn:col2' ILIKE :1"));
        assert_eq!(query.params, text_params(&[pattern]), "query: {}", input);
    }
}

#[test]
fn not_and_must_not() {
    let project = single_entity_project();
    let query = compile(&project, "event", "NOT col2:1", false).unwrap();
    assert_eq!(query.sql, event_sql("not event.data->>'urn:col2' = :1"));

    let query = compile(&project, "event", "-col2:1 col3:2", false).unwrap();
    assert_eq!(
        query.sql,
        event_sql("not event.data->>'urn:col2' = :1 AND event.data->>'urn:col3' = :2")
    );
}

#[test]
fn adjacent_alternatives_keep_precedence_under_and() {
    let project = single_entity_project();
    let query = compile(&project, "event", "col2:1 col3:2 AND col4:3", false).unwrap();
    assert_eq!(
        query.sql,
        event_sql(
            "(event.data->>'urn:col2' = :1 OR event.data->>'urn:col3' = :2) AND event.data->>'urn:col4' = :3"
        )
    );
    assert_eq!(query.params, text_params(&["1", "2", "3"]));

    let query = compile(&project, "event", "col4:3 AND col2:1 col3:2", false).unwrap();
    assert_eq!(
        query.sql,
        event_sql(
            "event.data->>'urn:col4' = :1 AND (event.data->>'urn:col2' = :2 OR event.data->>'urn:col3' = :3)"
        )
    );

    let query = compile(&project, "event", "+col4:3 col2:1 col3:2", false).unwrap();
    assert_eq!(
        query.sql,
        event_sql(
            "event.data->>'urn:col4' = :1 AND (event.data->>'urn:col2' = :2 OR event.data->>'urn:col3' = :3)"
        )
    );
}

#[test]
fn projects_bind_integers() {
    let query = compile(&project(), "event", "_projects_:[1, 2]", false).unwrap();
    assert_eq!(query.sql, expedition_sql("expeditions.project_id IN (:1, :2)"));
    assert_eq!(query.params, vec![BindValue::Int(1), BindValue::Int(2)]);
    assert_eq!(
        serde_json::to_value(&query).unwrap()["params"],
        serde_json::json!({"1": 1, "2": 2})
    );
}

#[test]
fn expedition_metadata_column() {
    let project = project_with_expedition_metadata();
    let query = compile(&project, "event", "expedition.country:USA", false).unwrap();
    assert_eq!(query.sql, expedition_sql("expeditions.metadata->>'country' = :1"));

    assert_eq!(
        compile(&project, "event", "expedition.habitat:x", false).unwrap_err(),
        Error::UnknownColumn("expedition.habitat".to_string())
    );
}

#[test]
fn related_entities_are_joined_child_before_grandchild() {
    let query = compile(&project(), "event", "tissue.col4:x AND sample.col1:y", false).unwrap();
    let expected = format!(
        "{} FROM project_1.event AS event{}{}{} WHERE tissue.data->>'urn:col4' = :1 AND sample.data->>'urn:col1' = :2{}",
        EVENT_SELECT,
        SAMPLE_JOIN,
        " LEFT JOIN project_1.tissue AS tissue ON tissue.parent_identifier = sample.local_identifier and tissue.expedition_id = sample.expedition_id",
        EVENT_IDENTIFIERS,
        EVENT_ORDER
    );
    assert_eq!(query.sql, expected);
}

#[test]
fn parent_entities_are_inner_joined() {
    let query = compile(&project(), "tissue", "event.col2:x", false).unwrap();
    assert!(query.sql.contains(
        " FROM project_1.tissue AS tissue JOIN project_1.sample AS sample ON sample.local_identifier = tissue.parent_identifier and sample.expedition_id = tissue.expedition_id JOIN project_1.event AS event ON event.local_identifier = sample.parent_identifier and event.expedition_id = sample.expedition_id LEFT JOIN entity_identifiers AS tissue_entity_identifiers"
    ), "{}", query.sql);
    assert!(query.sql.ends_with(
        " WHERE event.data->>'urn:col2' = :1 ORDER BY tissue.local_identifier, tissue.expedition_id"
    ));
}

#[test]
fn resolution_errors() {
    let project = project();
    assert_eq!(
        compile(&project, "event", "non_linked.id:1", false).unwrap_err(),
        Error::UnrelatedEntities {
            entity: "non_linked".to_string(),
            query_entity: "event".to_string(),
        }
    );
    assert_eq!(
        compile(&project, "event", "col9:1", false).unwrap_err(),
        Error::UnknownColumn("col9".to_string())
    );
    assert_eq!(
        compile(&project, "event", "foo.col:1", false).unwrap_err(),
        Error::UnknownEntity("foo.col".to_string())
    );
    assert_eq!(
        compile(&project, "event", "col1:1", false).unwrap_err(),
        Error::UnknownColumn("col1".to_string())
    );
}

#[test]
fn select_adds_projection_and_join() {
    let query = compile(&project(), "event", "_select_:sample col2:1", false).unwrap();
    let expected = format!(
        "{}, sample.data AS \"sample_data\", sample_entity_identifiers.identifier AS \"sample_rootIdentifier\" FROM project_1.event AS event{}{}{} WHERE event.data->>'urn:col2' = :1{}",
        EVENT_SELECT,
        SAMPLE_JOIN,
        EVENT_IDENTIFIERS,
        " LEFT JOIN entity_identifiers AS sample_entity_identifiers ON sample_entity_identifiers.expedition_id = sample.expedition_id and sample_entity_identifiers.concept_alias = 'sample'",
        EVENT_ORDER
    );
    assert_eq!(query.sql, expected);
}

#[test]
fn select_requires_related_known_entities() {
    let project = project();
    assert!(matches!(
        compile(&project, "event", "_select_:non_linked *", false),
        Err(Error::UnrelatedEntities { .. })
    ));
    assert_eq!(
        compile(&project, "event", "_select_:nope *", false).unwrap_err(),
        Error::UnknownEntity("nope".to_string())
    );
}

#[test]
fn all_query_has_no_where_clause() {
    let query = compile(&single_entity_project(), "event", "*", false).unwrap();
    assert_eq!(
        query.sql,
        format!(
            "{} FROM project_1.event AS event{}{}",
            EVENT_SELECT, EVENT_IDENTIFIERS, EVENT_ORDER
        )
    );
    assert!(query.params.is_empty());
}

#[test]
fn public_restriction() {
    let project = single_entity_project();
    let query = compile(&project, "event", "*", true).unwrap();
    assert_eq!(query.sql, expedition_sql("expeditions.public = true"));

    let query = compile(&project, "event", "col2:1 OR col3:2", true).unwrap();
    assert_eq!(
        query.sql,
        expedition_sql(
            "(event.data->>'urn:col2' = :1 OR event.data->>'urn:col3' = :2) AND expeditions.public = true"
        )
    );
}

#[test]
fn empty_and_all_combinations_are_invalid() {
    let project = single_entity_project();
    let builder = QueryBuilder::new(&project, "event").unwrap();
    assert!(matches!(
        builder.parameterized_query(false),
        Err(Error::InvalidQuery(_))
    ));

    let mut builder = QueryBuilder::new(&project, "event").unwrap();
    assert!(matches!(
        builder.visit(&Expression::Empty),
        Err(Error::InvalidQuery(_))
    ));

    let mut builder = QueryBuilder::new(&project, "event").unwrap();
    builder.visit(&Expression::All).unwrap();
    builder
        .visit(&Expression::comparison("col2", "1", ComparisonOperator::Equals))
        .unwrap();
    assert!(matches!(
        builder.parameterized_query(false),
        Err(Error::InvalidQuery(_))
    ));

    let mut builder = QueryBuilder::new(&project, "event").unwrap();
    assert!(matches!(
        builder.visit(&Expression::and(
            Expression::All,
            Expression::comparison("col2", "1", ComparisonOperator::Equals)
        )),
        Err(Error::InvalidQuery(_))
    ));
}

#[test]
fn failed_visit_leaves_builder_untouched() {
    let project = project();
    let mut builder = QueryBuilder::new(&project, "event").unwrap();
    builder.visit(&parse("col2:1").unwrap()).unwrap();
    assert!(builder
        .visit(&parse("sample.col1:2 AND col9:3").unwrap())
        .is_err());

    let query = builder.parameterized_query(false).unwrap();
    assert_eq!(query.sql, event_sql("event.data->>'urn:col2' = :1"));
    assert_eq!(query.params.len(), 1);
}

#[test]
fn paging_appends_offset_and_limit() {
    let project = single_entity_project();
    let mut builder = QueryBuilder::new(&project, "event")
        .unwrap()
        .with_paging(Some(0), Some(10));
    builder.visit(&Expression::All).unwrap();
    let ParametrizedQuery { sql, .. } = builder.parameterized_query(false).unwrap();
    assert!(sql.ends_with(" ORDER BY event.local_identifier, event.expedition_id OFFSET 0 LIMIT 10"));
}

#[test]
fn unknown_query_entity() {
    assert_eq!(
        QueryBuilder::new(&project(), "nope").unwrap_err(),
        Error::UnknownEntity("nope".to_string())
    );
}
