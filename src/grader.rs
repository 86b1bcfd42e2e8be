//! Query grading
//!
//! Schema-compatibility check for a candidate query. Two layers:
//! a local pre-check that rejects degenerate candidates without spending an
//! external call (empty text, SQL that does not even parse), then the
//! external grading service for the actual schema-compatibility verdict.
//!
//! An `invalid` verdict is a data outcome, not an error. The only `Err` this
//! module returns is a grading-service transport/parse failure, which the
//! controller maps to an invalid verdict with reason "validator unavailable"
//! so the state machine needs no extra transitions.

use crate::error::{QueryForgeError, Result};
use crate::llm::CompletionModel;
use crate::schema::{QueryTarget, SchemaDescription};
use crate::workflow::state::{Query, Verdict};
use serde::Deserialize;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct RawVerdict {
    valid: bool,
    #[serde(default)]
    reason: Option<String>,
}

pub struct QueryGrader {
    model: Arc<dyn CompletionModel>,
    target: QueryTarget,
}

impl QueryGrader {
    pub fn new(model: Arc<dyn CompletionModel>, target: QueryTarget) -> Self {
        Self { model, target }
    }

    pub async fn grade(&self, candidate: &Query, schema: &SchemaDescription) -> Result<Verdict> {
        if let Some(verdict) = self.precheck(candidate) {
            debug!(pipeline = %self.target, reason = verdict.reason_or_empty(), "candidate rejected locally");
            return Ok(verdict);
        }

        let prompt = self.grading_prompt(candidate, schema);
        let raw = self.model.complete(&prompt).await?;
        let verdict = parse_verdict(&raw)?;
        debug!(pipeline = %self.target, ok = verdict.ok, "graded candidate");
        Ok(verdict)
    }

    /// Local rejection of candidates no grading service needs to see.
    fn precheck(&self, candidate: &Query) -> Option<Verdict> {
        let text = candidate.text.trim();
        if text.is_empty() {
            return Some(Verdict::reject("empty query"));
        }
        if self.target == QueryTarget::Relational {
            if let Err(e) = Parser::parse_sql(&PostgreSqlDialect {}, text) {
                return Some(Verdict::reject(format!("SQL does not parse: {}", e)));
            }
        }
        None
    }

    fn grading_prompt(&self, candidate: &Query, schema: &SchemaDescription) -> String {
        let dialect = self.target.dialect_name();
        format!(
            r#"You are a strict {dialect} schema reviewer. Decide whether the query below is compatible with the schema: every table, column, label, relationship type, and property it references must exist in the schema.

Schema:
{schema}

{dialect} Query:
{query}

Return JSON only: {{"valid": true|false, "reason": "short explanation when invalid" | null}}"#,
            dialect = dialect,
            schema = schema.text,
            query = candidate.text,
        )
    }
}

/// Parse the grading service's raw response into a [`Verdict`]. Tolerates
/// markdown fences around the JSON body.
pub fn parse_verdict(raw: &str) -> Result<Verdict> {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let parsed: RawVerdict = serde_json::from_str(cleaned).map_err(|e| {
        QueryForgeError::Validation(format!(
            "Failed to parse grading response: {}. Response: {}",
            e, cleaned
        ))
    })?;

    Ok(Verdict {
        ok: parsed.valid,
        reason: parsed.reason.filter(|r| !r.trim().is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedModel(String);

    #[async_trait]
    impl CompletionModel for FixedModel {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.clone())
        }
    }

    fn schema_for(target: QueryTarget) -> SchemaDescription {
        crate::schema::SchemaCatalog::builtin().get(target).clone()
    }

    #[test]
    fn parse_accepting_verdict() {
        let verdict = parse_verdict(r#"{"valid": true, "reason": null}"#).unwrap();
        assert!(verdict.ok);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn parse_rejecting_verdict_with_fences() {
        let verdict =
            parse_verdict("```json\n{\"valid\": false, \"reason\": \"unknown column x\"}\n```")
                .unwrap();
        assert!(!verdict.ok);
        assert_eq!(verdict.reason.as_deref(), Some("unknown column x"));
    }

    #[test]
    fn parse_garbage_is_a_validation_error() {
        let err = parse_verdict("sure, looks fine!").expect_err("prose is not a verdict");
        assert!(matches!(err, QueryForgeError::Validation(_)));
    }

    #[tokio::test]
    async fn empty_candidate_is_rejected_without_an_external_call() {
        struct PanicModel;
        #[async_trait]
        impl CompletionModel for PanicModel {
            async fn complete(&self, _prompt: &str) -> Result<String> {
                panic!("grading service must not be called for an empty candidate");
            }
        }
        let grader = QueryGrader::new(Arc::new(PanicModel), QueryTarget::Graph);
        let candidate = Query::new("   ", QueryTarget::Graph);
        let verdict = grader
            .grade(&candidate, &schema_for(QueryTarget::Graph))
            .await
            .unwrap();
        assert!(!verdict.ok);
        assert_eq!(verdict.reason.as_deref(), Some("empty query"));
    }

    #[tokio::test]
    async fn unparseable_sql_is_rejected_locally() {
        let grader = QueryGrader::new(
            Arc::new(FixedModel(r#"{"valid": true}"#.to_string())),
            QueryTarget::Relational,
        );
        let candidate = Query::new("SELEKT frum WHERE", QueryTarget::Relational);
        let verdict = grader
            .grade(&candidate, &schema_for(QueryTarget::Relational))
            .await
            .unwrap();
        assert!(!verdict.ok);
        assert!(verdict.reason_or_empty().contains("does not parse"));
    }

    #[tokio::test]
    async fn well_formed_sql_reaches_the_grading_service() {
        let grader = QueryGrader::new(
            Arc::new(FixedModel(
                r#"{"valid": false, "reason": "unknown table lectures"}"#.to_string(),
            )),
            QueryTarget::Relational,
        );
        let candidate = Query::new("SELECT * FROM lectures", QueryTarget::Relational);
        let verdict = grader
            .grade(&candidate, &schema_for(QueryTarget::Relational))
            .await
            .unwrap();
        assert!(!verdict.ok);
        assert_eq!(verdict.reason.as_deref(), Some("unknown table lectures"));
    }
}
