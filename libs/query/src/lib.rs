//! FIMS query language compiler
//!
//! Turns search strings over a project's records into parameterized
//! PostgreSQL:
//! 1. **Parser** → [`Expression`] tree
//! 2. **Resolver** → column specs bound to entity attributes
//! 3. **Builder** → SQL with `:n` placeholders and joins across the entity tree
//!
//! ```text
//! "sample.col1 > 10 AND _expeditions_:[A, B]"
//!      |
//!   parse() -> Expression
//!      |
//! QueryBuilder::visit (ProjectConfig, query entity)
//!      |
//! ParametrizedQuery { sql, params }
//! ```
//!
//! Rows returned by the database are projected back into column-keyed maps
//! with [`QueryResult`].

pub mod builder;
pub mod collectors;
pub mod error;
pub mod expression;
pub mod parser;
pub mod project;
pub mod query;
pub mod resolver;
pub mod result;

// Re-export main types
pub use builder::{BindValue, ParametrizedQuery, QueryBuilder};
pub use error::{Error, QueryCode, Result};
pub use expression::{ComparisonOperator, Expression, LogicalOperator, ParsedRange};
pub use parser::parse;
pub use project::{Attribute, DataType, Entity, ProjectConfig};
pub use query::Query;
pub use resolver::{resolve_column, resolve_query_column, QueryColumn};
pub use result::{QueryResult, Record};
