use super::bind::{placeholder_list, push_int, push_text};
use super::QueryBuilder;
use crate::error::{Error, Result};
use crate::expression::{split_list, ComparisonOperator, Expression, ParsedRange};
use crate::resolver::{resolve_query_column, QueryColumn};

impl<'a> QueryBuilder<'a> {
    /// SQL for `expr`, `None` when it matches everything.
    pub(super) fn build_clause(&mut self, expr: &Expression) -> Result<Option<String>> {
        let clause = match expr {
            Expression::All => {
                self.all_query = true;
                return Ok(None);
            }
            Expression::Empty => return Err(Error::invalid_query("query must not be empty")),
            Expression::Comparison {
                column,
                term,
                operator,
            } => {
                let column = self.query_column(column)?;
                self.comparison(&column, *operator, term)
            }
            Expression::Fts { column, term } => self.full_text(column.as_deref(), term)?,
            Expression::Like { column, term } => {
                let column = self.query_column(column)?;
                let idx = push_text(&mut self.bind_params, term.clone());
                format!("{} ILIKE :{}", column.sql(), idx)
            }
            Expression::Range { column, range } => self.range(column, range)?,
            Expression::Exists { columns } => self.exists(columns)?,
            Expression::Expedition { expeditions } => self.expeditions(expeditions)?,
            Expression::Project { projects } => self.projects(projects)?,
            Expression::Select {
                entities,
                expression,
            } => {
                self.select(entities)?;
                return self.build_clause(expression);
            }
            Expression::Group { expression } => format!("({})", self.required_clause(expression)?),
            Expression::Not { expression } => {
                let inner = self.required_clause(expression)?;
                if matches!(expression.as_ref(), Expression::Logical { .. }) {
                    format!("not ({})", inner)
                } else {
                    format!("not {}", inner)
                }
            }
            Expression::Logical {
                operator,
                left,
                right,
            } => {
                let left = self.required_clause(left)?;
                let right = self.required_clause(right)?;
                format!("{} {} {}", left, operator, right)
            }
        };
        Ok(Some(clause))
    }

    /// Operand of a compound expression, which can not be `*`.
    fn required_clause(&mut self, expr: &Expression) -> Result<String> {
        self.build_clause(expr)?.ok_or_else(|| {
            Error::InvalidQuery(format!(
                "'{}' can not be combined with other expressions",
                expr
            ))
        })
    }

    /// Resolve a column and register the joins it needs.
    fn query_column(&mut self, spec: &str) -> Result<QueryColumn<'a>> {
        let column = resolve_query_column(self.project, &self.entity.concept_alias, spec)?;
        match column.entity() {
            Some(entity) => self.joins.add(entity)?,
            None => self.joins.join_expeditions(),
        }
        Ok(column)
    }

    /// Typed attributes are cast on both sides, except for `=` and `<>`.
    fn comparison(
        &mut self,
        column: &QueryColumn<'a>,
        operator: ComparisonOperator,
        value: &str,
    ) -> String {
        let data_type = column.data_type();
        let cast = if operator.is_equality() {
            None
        } else {
            data_type.cast_function().zip(data_type.sql_type())
        };

        let idx = push_text(&mut self.bind_params, value.to_string());
        match cast {
            Some((function, sql_type)) => format!(
                "{}({}) {} :{}::{}",
                function,
                column.sql(),
                operator,
                idx,
                sql_type
            ),
            None => format!("{} {} :{}", column.sql(), operator, idx),
        }
    }

    fn full_text(&mut self, column: Option<&str>, term: &str) -> Result<String> {
        let column = match column {
            Some(spec) => Some(self.query_column(spec)?),
            None => None,
        };
        let tsquery = term.split_whitespace().collect::<Vec<_>>().join(" & ");
        if tsquery.is_empty() {
            return Err(Error::invalid_query("full text search term must not be blank"));
        }

        match column {
            None => {
                let idx = push_text(&mut self.bind_params, tsquery);
                Ok(format!(
                    "{}.tsv @@ to_tsquery(:{})",
                    self.entity.concept_alias, idx
                ))
            }
            Some(column) => {
                if column.entity().is_none() {
                    return Err(Error::InvalidQuery(format!(
                        "full text search is not supported on expedition property '{}'",
                        column.property()
                    )));
                }
                let idx = push_text(&mut self.bind_params, tsquery);
                Ok(format!(
                    "(to_tsvector({}) @@ to_tsquery(:{idx}) AND {}.tsv @@ to_tsquery(:{idx}))",
                    column.sql(),
                    column.table(),
                    idx = idx
                ))
            }
        }
    }

    fn range(&mut self, column: &str, range: &str) -> Result<String> {
        let parsed = ParsedRange::parse(range)?;
        let column = self.query_column(column)?;

        let mut sides = Vec::new();
        for bound in [parsed.lower, parsed.upper].into_iter().flatten() {
            sides.push(self.comparison(&column, bound.operator, &bound.value));
        }
        Ok(format!("({})", sides.join(" AND ")))
    }

    /// Key-exists checks, grouped by the JSON column that holds the keys.
    fn exists(&mut self, columns: &str) -> Result<String> {
        let specs = split_list(columns);
        if specs.is_empty() {
            return Err(Error::invalid_query("_exists_ requires at least one column"));
        }

        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for spec in specs {
            let column = self.query_column(spec)?;
            let target = format!("{}.{}", column.table(), column.column());
            let property = column.property().to_string();
            match groups.iter_mut().find(|(t, _)| *t == target) {
                Some((_, properties)) => properties.push(property),
                None => groups.push((target, vec![property])),
            }
        }

        let mut clauses = Vec::with_capacity(groups.len());
        for (target, properties) in groups {
            let clause = if let [property] = properties.as_slice() {
                let idx = push_text(&mut self.bind_params, property.clone());
                format!("{} ?? :{}", target, idx)
            } else {
                let indexes: Vec<usize> = properties
                    .into_iter()
                    .map(|p| push_text(&mut self.bind_params, p))
                    .collect();
                format!("{} ??& array[{}]", target, placeholder_list(&indexes))
            };
            clauses.push(clause);
        }

        if clauses.len() == 1 {
            Ok(clauses.remove(0))
        } else {
            Ok(format!("({})", clauses.join(" AND ")))
        }
    }

    fn expeditions(&mut self, spec: &str) -> Result<String> {
        let codes = split_list(spec);
        if codes.is_empty() {
            return Err(Error::invalid_query(
                "_expeditions_ requires at least one expedition code",
            ));
        }
        self.joins.join_expeditions();

        if let [code] = codes.as_slice() {
            let idx = push_text(&mut self.bind_params, code.to_string());
            return Ok(format!("expeditions.expedition_code = :{}", idx));
        }

        let indexes: Vec<usize> = codes
            .into_iter()
            .map(|c| push_text(&mut self.bind_params, c.to_string()))
            .collect();
        Ok(format!(
            "expeditions.expedition_code IN ({})",
            placeholder_list(&indexes)
        ))
    }

    fn projects(&mut self, projects: &[i32]) -> Result<String> {
        if projects.is_empty() {
            return Err(Error::invalid_query(
                "_projects_ requires at least one project",
            ));
        }
        self.joins.join_expeditions();

        if let [project] = projects {
            let idx = push_int(&mut self.bind_params, *project);
            return Ok(format!("expeditions.project_id = :{}", idx));
        }

        let indexes: Vec<usize> = projects
            .iter()
            .map(|p| push_int(&mut self.bind_params, *p))
            .collect();
        Ok(format!(
            "expeditions.project_id IN ({})",
            placeholder_list(&indexes)
        ))
    }

    fn select(&mut self, entities: &str) -> Result<()> {
        let aliases = split_list(entities);
        if aliases.is_empty() {
            return Err(Error::invalid_query("_select_ requires at least one entity"));
        }
        for alias in aliases {
            let entity = self
                .project
                .entity(alias)
                .ok_or_else(|| Error::UnknownEntity(alias.to_string()))?;
            self.joins.add_select(entity)?;
        }
        Ok(())
    }
}
