//! Query generation and regeneration
//!
//! Thin adapters over the completion model: build the prompt for the target
//! dialect, make exactly one external call, and parse the raw text into a
//! [`Query`]. Retrying is the controller's job, never this layer's.

use crate::error::{QueryForgeError, Result};
use crate::llm::{clean_completion, CompletionModel};
use crate::schema::{QueryTarget, SchemaDescription};
use crate::workflow::state::Query;
use std::sync::Arc;
use tracing::debug;

pub struct QueryGenerator {
    model: Arc<dyn CompletionModel>,
    target: QueryTarget,
}

impl QueryGenerator {
    pub fn new(model: Arc<dyn CompletionModel>, target: QueryTarget) -> Self {
        Self { model, target }
    }

    /// First-shot generation from the question and schema alone.
    pub async fn generate(&self, question: &str, schema: &SchemaDescription) -> Result<Query> {
        let prompt = self.generation_prompt(question, schema);
        let raw = self.model.complete(&prompt).await?;
        self.parse_candidate(raw)
    }

    /// Corrected generation: the rejected candidate and the rejection reason
    /// are supplied as extra grounding to bias the model away from the known
    /// failure. `reason` may be empty when the grader omitted one.
    pub async fn regenerate(
        &self,
        question: &str,
        prior: &Query,
        reason: &str,
        schema: &SchemaDescription,
    ) -> Result<Query> {
        let prompt = self.regeneration_prompt(question, prior, reason, schema);
        let raw = self.model.complete(&prompt).await?;
        self.parse_candidate(raw)
    }

    fn generation_prompt(&self, question: &str, schema: &SchemaDescription) -> String {
        match self.target {
            QueryTarget::Relational => format!(
                r#"You are a SQL expert. Given the following SQL DDL schema and a question, generate a SQL query that answers the question. Return only the query, no explanation.

SQL DDL Schema:
{}

Question: {}

SQL Query:"#,
                schema.text, question
            ),
            QueryTarget::Graph => format!(
                r#"You are a Neo4j Cypher expert. Given the following Neo4j schema and a question, generate a Cypher query that answers the question. Return only the query, no explanation.

Neo4j Schema:
{}

Question: {}

Cypher Query:"#,
                schema.text, question
            ),
        }
    }

    fn regeneration_prompt(
        &self,
        question: &str,
        prior: &Query,
        reason: &str,
        schema: &SchemaDescription,
    ) -> String {
        let dialect = self.target.dialect_name();
        let reason_line = if reason.is_empty() {
            "It was rejected by schema validation (no reason given).".to_string()
        } else {
            format!("It was rejected by schema validation: {}", reason)
        };
        format!(
            r#"RETRY: Your previous {dialect} query failed schema validation.

Previous query:
{prior}

{reason_line}

Schema:
{schema}

Question: {question}

Generate a corrected {dialect} query that answers the question and only references tables, columns, labels, relationships, and properties that exist in the schema above. Return only the query, no explanation.

Corrected {dialect} Query:"#,
            dialect = dialect,
            prior = prior.text,
            reason_line = reason_line,
            schema = schema.text,
            question = question,
        )
    }

    fn parse_candidate(&self, raw: String) -> Result<Query> {
        let text = clean_completion(&raw);
        if raw.trim().is_empty() {
            // A blank completion means the service response was unusable, as
            // opposed to a non-empty but wrong query, which the grader owns.
            return Err(QueryForgeError::Generation(format!(
                "{} generation returned an empty response",
                self.target
            )));
        }
        debug!(pipeline = %self.target, query = %text, "parsed candidate");
        Ok(Query::new(text, self.target))
    }
}
