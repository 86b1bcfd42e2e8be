//! Workflow controller
//!
//! The bounded-retry state machine. Per target the pipeline moves through
//! GENERATING -> VALIDATING -> (EXECUTING | REGENERATING) -> VALIDATING -> ...
//! until DONE or FAILED. The relational and graph pipelines are driven
//! concurrently and never touch each other's state; the controller only
//! merges their terminal outcomes into one response.

use crate::config::WorkflowConfig;
use crate::error::{QueryForgeError, Result};
use crate::executor::{CypherExecutor, QueryExecutor, SqlExecutor};
use crate::generator::QueryGenerator;
use crate::grader::QueryGrader;
use crate::llm::{CompletionModel, LlmClient};
use crate::schema::{QueryTarget, SchemaCatalog, SchemaDescription};
use crate::workflow::state::{
    FailureDescriptor, PipelineStage, TargetOutcome, TargetState, Verdict, WorkflowRequest,
    WorkflowResponse, WorkflowState,
};
use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Everything one target pipeline needs: its generator, grader, and
/// executor. Both pipelines carry their own copy; nothing is shared except
/// the read-only schema catalog.
pub struct TargetPipeline {
    pub generator: QueryGenerator,
    pub grader: QueryGrader,
    pub executor: Arc<dyn QueryExecutor>,
}

impl TargetPipeline {
    pub fn new(
        model: Arc<dyn CompletionModel>,
        target: QueryTarget,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            generator: QueryGenerator::new(Arc::clone(&model), target),
            grader: QueryGrader::new(model, target),
            executor,
        }
    }
}

pub struct WorkflowController {
    catalog: SchemaCatalog,
    relational: TargetPipeline,
    graph: TargetPipeline,
    max_attempts: u8,
    call_timeout: Duration,
}

impl WorkflowController {
    pub fn new(
        catalog: SchemaCatalog,
        relational: TargetPipeline,
        graph: TargetPipeline,
        max_attempts: u8,
        call_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            relational,
            graph,
            max_attempts,
            call_timeout,
        }
    }

    /// Wire up the real adapters from configuration. Schema loading and the
    /// Postgres connection happen here, before any generation: a failure
    /// aborts the whole invocation.
    pub async fn from_config(config: &WorkflowConfig) -> Result<Self> {
        let catalog = SchemaCatalog::load(
            config.relational_schema_path.as_deref(),
            config.graph_schema_path.as_deref(),
        )?;

        let model: Arc<dyn CompletionModel> = Arc::new(LlmClient::new(
            config.llm.api_key.clone(),
            config.llm.model.clone(),
            config.llm.base_url.clone(),
        ));

        let sql_executor: Arc<dyn QueryExecutor> =
            Arc::new(SqlExecutor::connect(&config.database_url).await?);
        let cypher_executor: Arc<dyn QueryExecutor> = Arc::new(CypherExecutor::new(
            config.neo4j.http_url.clone(),
            config.neo4j.username.clone(),
            config.neo4j.password.clone(),
        ));

        Ok(Self::new(
            catalog,
            TargetPipeline::new(Arc::clone(&model), QueryTarget::Relational, sql_executor),
            TargetPipeline::new(model, QueryTarget::Graph, cypher_executor),
            config.max_attempts,
            config.call_timeout,
        ))
    }

    /// Run both target pipelines to their terminal states and merge the
    /// outcomes. Always completes; one target failing never blocks or
    /// corrupts the other.
    pub async fn run(&self, request: WorkflowRequest) -> WorkflowResponse {
        let mut state = WorkflowState::new(request.question_relational, request.question_graph);
        info!(invocation = %state.invocation_id, "starting workflow");

        let (result_relational, result_graph) = tokio::join!(
            self.run_pipeline(&self.relational, &mut state.relational),
            self.run_pipeline(&self.graph, &mut state.graph),
        );

        info!(
            invocation = %state.invocation_id,
            relational_done = result_relational.is_done(),
            graph_done = result_graph.is_done(),
            "workflow finished"
        );

        WorkflowResponse {
            invocation_id: state.invocation_id,
            started_at: state.started_at,
            finished_at: Utc::now(),
            result_relational,
            result_graph,
        }
    }

    /// Drive one target from GENERATING to a terminal state.
    async fn run_pipeline(
        &self,
        pipeline: &TargetPipeline,
        state: &mut TargetState,
    ) -> TargetOutcome {
        let target = state.target;
        let schema = self.catalog.get(target);

        // GENERATING
        let candidate = match self
            .bounded(target, PipelineStage::Generating, pipeline.generator.generate(&state.question, schema))
            .await
        {
            Ok(query) => query,
            Err(e) => return self.fail(state, PipelineStage::Generating, e.to_string()),
        };
        state.set_candidate(candidate);

        loop {
            // VALIDATING
            let verdict = self.grade_current(pipeline, state, schema).await;
            state.set_verdict(verdict.clone());

            if verdict.ok {
                // EXECUTING: the candidate being executed is exactly the one
                // this verdict was produced for; a new candidate would have
                // cleared it.
                let candidate = state
                    .candidate
                    .clone()
                    .expect("accepting verdict implies a current candidate");
                return match self
                    .bounded(target, PipelineStage::Executing, pipeline.executor.execute(&candidate))
                    .await
                {
                    Ok(rows) => {
                        info!(pipeline = %target, attempts = state.attempts, rows = rows.len(), "pipeline done");
                        TargetOutcome::Done {
                            query: candidate,
                            rows,
                            attempts: state.attempts,
                        }
                    }
                    Err(e) => self.fail(state, PipelineStage::Executing, e.to_string()),
                };
            }

            let reason = verdict.reason_or_empty().to_string();
            if state.attempts >= self.max_attempts {
                let exhausted = QueryForgeError::RegenerationExhausted {
                    attempts: state.attempts,
                    reason: reason.clone(),
                };
                warn!(pipeline = %target, "{}", exhausted);
                // Scenario-C convention: exhaustion is attributed to the
                // validation step that spent the last attempt, with the last
                // rejection reason as the cause.
                return self.fail(state, PipelineStage::Validating, reason);
            }
            state.attempts += 1;

            // REGENERATING
            let prior = state
                .candidate
                .clone()
                .expect("rejecting verdict implies a current candidate");
            match self
                .bounded(
                    target,
                    PipelineStage::Regenerating,
                    pipeline
                        .generator
                        .regenerate(&state.question, &prior, &reason, schema),
                )
                .await
            {
                Ok(query) => state.set_candidate(query),
                Err(e) => return self.fail(state, PipelineStage::Regenerating, e.to_string()),
            }
        }
    }

    /// Grade the current candidate. A grading-service failure (transport,
    /// unparseable verdict, timeout) is recovered into a rejecting verdict so
    /// the normal retry path handles it; it is never treated as validity.
    async fn grade_current(
        &self,
        pipeline: &TargetPipeline,
        state: &TargetState,
        schema: &SchemaDescription,
    ) -> Verdict {
        let candidate = state
            .candidate
            .as_ref()
            .expect("VALIDATING entered without a candidate");
        match self
            .bounded(state.target, PipelineStage::Validating, pipeline.grader.grade(candidate, schema))
            .await
        {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(pipeline = %state.target, "grading unavailable: {}", e);
                Verdict::reject(format!("validator unavailable: {}", e))
            }
        }
    }

    /// Apply the per-call timeout; a timeout is reported as the same failure
    /// class as the wrapped call so the transition table stays uniform.
    async fn bounded<T>(
        &self,
        target: QueryTarget,
        stage: PipelineStage,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                let message = format!(
                    "{} call timed out after {:?} for {} target",
                    stage_name(stage),
                    self.call_timeout,
                    target
                );
                Err(match stage {
                    PipelineStage::Generating | PipelineStage::Regenerating => {
                        QueryForgeError::Generation(message)
                    }
                    PipelineStage::Validating => QueryForgeError::Validation(message),
                    PipelineStage::Executing => QueryForgeError::Execution(message),
                })
            }
        }
    }

    fn fail(
        &self,
        state: &TargetState,
        stage: PipelineStage,
        reason: String,
    ) -> TargetOutcome {
        warn!(pipeline = %state.target, stage = stage_name(stage), reason = %reason, "pipeline failed");
        TargetOutcome::Failed {
            failure: FailureDescriptor { stage, reason },
            attempts: state.attempts,
            last_query: state.candidate.clone(),
        }
    }
}

fn stage_name(stage: PipelineStage) -> &'static str {
    match stage {
        PipelineStage::Generating => "generation",
        PipelineStage::Validating => "validation",
        PipelineStage::Regenerating => "regeneration",
        PipelineStage::Executing => "execution",
    }
}
