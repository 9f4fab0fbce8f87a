//! Error types for query parsing, compilation and projection

use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Machine readable error codes surfaced to API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryCode {
    InvalidQuery,
    UnknownColumn,
    UnknownEntity,
    UnrelatedEntities,
    NoResources,
    InvalidConfig,
}

impl QueryCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidQuery => "INVALID_QUERY",
            Self::UnknownColumn => "UNKNOWN_COLUMN",
            Self::UnknownEntity => "UNKNOWN_ENTITY",
            Self::UnrelatedEntities => "UNRELATED_ENTITIES",
            Self::NoResources => "NO_RESOURCES",
            Self::InvalidConfig => "INVALID_CONFIG",
        }
    }
}

impl std::fmt::Display for QueryCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Entity '{entity}' is not related to query entity '{query_entity}'")]
    UnrelatedEntities {
        entity: String,
        query_entity: String,
    },

    #[error("No resources found: {0}")]
    NoResources(String),

    #[error("Invalid project configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Error::InvalidQuery(msg.into())
    }

    pub fn code(&self) -> QueryCode {
        match self {
            Error::InvalidQuery(_) => QueryCode::InvalidQuery,
            Error::UnknownColumn(_) => QueryCode::UnknownColumn,
            Error::UnknownEntity(_) => QueryCode::UnknownEntity,
            Error::UnrelatedEntities { .. } => QueryCode::UnrelatedEntities,
            Error::NoResources(_) => QueryCode::NoResources,
            Error::InvalidConfig(_) => QueryCode::InvalidConfig,
        }
    }

    /// HTTP status an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NoResources(_) => 204,
            Error::InvalidConfig(_) => 500,
            _ => 400,
        }
    }

    /// Structured error body, e.g. `{"code": "UNKNOWN_COLUMN", "message": "...", "context": ["col9"]}`.
    pub fn payload(&self) -> serde_json::Value {
        let context: Vec<&str> = match self {
            Error::InvalidQuery(s)
            | Error::UnknownColumn(s)
            | Error::UnknownEntity(s)
            | Error::NoResources(s)
            | Error::InvalidConfig(s) => vec![s.as_str()],
            Error::UnrelatedEntities {
                entity,
                query_entity,
            } => vec![entity.as_str(), query_entity.as_str()],
        };

        json!({
            "code": self.code(),
            "httpStatus": self.http_status(),
            "message": self.to_string(),
            "context": context,
        })
    }
}
