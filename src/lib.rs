//! queryforge: self-correcting natural-language-to-query workflow.
//!
//! One question goes in; a SQL query against Postgres and a Cypher query
//! against Neo4j come out, each graded against its schema before execution
//! and regenerated with the rejection reason until it passes or the retry
//! budget runs out.

pub mod config;
pub mod error;
pub mod executor;
pub mod generator;
pub mod grader;
pub mod llm;
pub mod schema;
pub mod workflow;
