//! Schema context provider
//!
//! Supplies the static schema descriptions that ground both generation and
//! grading. Loading happens once per invocation; the catalog is read-only
//! afterwards and safe to share across both target pipelines.

use crate::error::{QueryForgeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Which query dialect / database a pipeline is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryTarget {
    Relational,
    Graph,
}

impl QueryTarget {
    pub fn dialect_name(&self) -> &'static str {
        match self {
            QueryTarget::Relational => "SQL",
            QueryTarget::Graph => "Cypher",
        }
    }
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTarget::Relational => write!(f, "relational"),
            QueryTarget::Graph => write!(f, "graph"),
        }
    }
}

/// A schema description as handed to the LLM: the raw DDL (relational) or
/// node/relationship listing (graph), plus the target it belongs to.
#[derive(Debug, Clone)]
pub struct SchemaDescription {
    pub target: QueryTarget,
    pub text: String,
}

/// Holds one schema description per target.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    relational: SchemaDescription,
    graph: SchemaDescription,
}

impl SchemaCatalog {
    /// Catalog over the built-in course-platform schemas.
    pub fn builtin() -> Self {
        Self {
            relational: SchemaDescription {
                target: QueryTarget::Relational,
                text: DEFAULT_SQL_DDL.to_string(),
            },
            graph: SchemaDescription {
                target: QueryTarget::Graph,
                text: DEFAULT_GRAPH_SCHEMA.to_string(),
            },
        }
    }

    /// Catalog with per-target file overrides; a missing or unreadable file
    /// is fatal before any generation begins.
    pub fn load(
        relational_path: Option<&Path>,
        graph_path: Option<&Path>,
    ) -> Result<Self> {
        let mut catalog = Self::builtin();
        if let Some(path) = relational_path {
            catalog.relational.text = read_schema_file(path)?;
        }
        if let Some(path) = graph_path {
            catalog.graph.text = read_schema_file(path)?;
        }
        Ok(catalog)
    }

    pub fn get(&self, target: QueryTarget) -> &SchemaDescription {
        match target {
            QueryTarget::Relational => &self.relational,
            QueryTarget::Graph => &self.graph,
        }
    }
}

fn read_schema_file(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| QueryForgeError::Schema(format!("cannot read {}: {}", path.display(), e)))?;
    if text.trim().is_empty() {
        return Err(QueryForgeError::Schema(format!(
            "schema file {} is empty",
            path.display()
        )));
    }
    Ok(text)
}

/// Built-in relational schema (course platform).
pub const DEFAULT_SQL_DDL: &str = r#"CREATE TABLE users (
    user_id SERIAL PRIMARY KEY,
    username VARCHAR(50) UNIQUE NOT NULL,
    email VARCHAR(100) UNIQUE NOT NULL,
    password_hash VARCHAR(100) NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE courses (
    course_id SERIAL PRIMARY KEY,
    title VARCHAR(100) NOT NULL,
    description TEXT,
    price DECIMAL(10, 2),
    level VARCHAR(20) CHECK (level IN ('Beginner', 'Intermediate', 'Advanced')),
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE instructors (
    instructor_id SERIAL PRIMARY KEY,
    name VARCHAR(100) NOT NULL,
    bio TEXT,
    email VARCHAR(100) UNIQUE NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE enrollments (
    enrollment_id SERIAL PRIMARY KEY,
    user_id INTEGER REFERENCES users(user_id),
    course_id INTEGER REFERENCES courses(course_id),
    enrolled_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    completed BOOLEAN DEFAULT FALSE,
    UNIQUE(user_id, course_id)
);

CREATE TABLE reviews (
    review_id SERIAL PRIMARY KEY,
    user_id INTEGER REFERENCES users(user_id),
    course_id INTEGER REFERENCES courses(course_id),
    rating INTEGER CHECK (rating BETWEEN 1 AND 5),
    comment TEXT,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(user_id, course_id)
);

CREATE TABLE course_instructors (
    course_id INTEGER REFERENCES courses(course_id),
    instructor_id INTEGER REFERENCES instructors(instructor_id),
    PRIMARY KEY (course_id, instructor_id)
);"#;

/// Built-in property-graph schema (course platform).
pub const DEFAULT_GRAPH_SCHEMA: &str = r#"Node properties:
- User: {user_id: INTEGER, username: STRING, email: STRING}
- Course: {course_id: INTEGER, title: STRING, description: STRING, price: FLOAT, level: STRING}
- Instructor: {instructor_id: INTEGER, name: STRING, bio: STRING, email: STRING}

Relationships:
- (User)-[:ENROLLED_IN]->(Course)
- (User)-[:REVIEWED]->(Course) {rating: INTEGER, comment: STRING}
- (Instructor)-[:TEACHES]->(Course)"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_covers_both_targets() {
        let catalog = SchemaCatalog::builtin();
        assert!(catalog
            .get(QueryTarget::Relational)
            .text
            .contains("CREATE TABLE courses"));
        assert!(catalog.get(QueryTarget::Graph).text.contains(":TEACHES"));
        assert_eq!(catalog.get(QueryTarget::Graph).target, QueryTarget::Graph);
    }

    #[test]
    fn missing_override_file_is_fatal() {
        let err = SchemaCatalog::load(Some(Path::new("/nonexistent/schema.sql")), None)
            .expect_err("missing file must abort");
        assert!(matches!(err, QueryForgeError::Schema(_)));
    }
}
