//! Query execution
//!
//! Executors only ever see a candidate whose most recent verdict was
//! accepting; they issue the query and hand back rows. Database-level
//! rejections are terminal `Execution` errors for that target, never fed
//! back into regeneration.

use crate::error::{QueryForgeError, Result};
use crate::workflow::state::{Query, ResultSet, Row};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo};
use std::time::Duration;
use tracing::{debug, info};

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &Query) -> Result<ResultSet>;
}

/// Relational executor over a sqlx Postgres pool. Connections are acquired
/// per call from the pool and released on every exit path.
pub struct SqlExecutor {
    pool: PgPool,
}

impl SqlExecutor {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| QueryForgeError::Execution(format!("Postgres connect failed: {}", e)))?;

        // Test the connection
        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| QueryForgeError::Execution(format!("Postgres ping failed: {}", e)))?;

        info!("connected to Postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryExecutor for SqlExecutor {
    async fn execute(&self, query: &Query) -> Result<ResultSet> {
        debug!(sql = %query.text, "executing relational query");
        let rows = sqlx::query(&query.text)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| QueryForgeError::Execution(format!("SQL execution failed: {}", e)))?;

        rows.iter().map(pg_row_to_row).collect()
    }
}

fn pg_row_to_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let name = column.name().to_string();
        let idx = column.ordinal();
        let value = match column.type_info().name() {
            "BOOL" => json_opt(row.try_get::<Option<bool>, _>(idx)),
            "INT2" => json_opt(row.try_get::<Option<i16>, _>(idx)),
            "INT4" => json_opt(row.try_get::<Option<i32>, _>(idx)),
            "INT8" => json_opt(row.try_get::<Option<i64>, _>(idx)),
            "FLOAT4" => json_opt(row.try_get::<Option<f32>, _>(idx)),
            "FLOAT8" => json_opt(row.try_get::<Option<f64>, _>(idx)),
            "UUID" => row
                .try_get::<Option<uuid::Uuid>, _>(idx)
                .ok()
                .flatten()
                .map(|u| serde_json::Value::String(u.to_string())),
            "JSON" | "JSONB" => row
                .try_get::<Option<serde_json::Value>, _>(idx)
                .ok()
                .flatten(),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
                .ok()
                .flatten()
                .map(|t| serde_json::Value::String(t.to_string())),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
                .ok()
                .flatten()
                .map(|t| serde_json::Value::String(t.to_rfc3339())),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(idx)
                .ok()
                .flatten()
                .map(|d| serde_json::Value::String(d.to_string())),
            // TEXT, VARCHAR, NUMERIC-as-text and anything else stringly
            _ => row
                .try_get::<Option<String>, _>(idx)
                .ok()
                .flatten()
                .map(serde_json::Value::String),
        };
        out.insert(name, value.unwrap_or(serde_json::Value::Null));
    }
    Ok(out)
}

fn json_opt<T: Into<serde_json::Value>>(
    value: std::result::Result<Option<T>, sqlx::Error>,
) -> Option<serde_json::Value> {
    value.ok().flatten().map(Into::into)
}

/// Graph executor over the Neo4j HTTP transactional endpoint. Kept on
/// reqwest rather than a bolt driver so the whole external surface of the
/// crate speaks HTTP.
pub struct CypherExecutor {
    http_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CypherEnvelope {
    #[serde(default)]
    results: Vec<CypherResult>,
    #[serde(default)]
    errors: Vec<CypherError>,
}

#[derive(Debug, Deserialize)]
struct CypherResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<CypherRow>,
}

#[derive(Debug, Deserialize)]
struct CypherRow {
    row: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CypherError {
    code: String,
    message: String,
}

impl CypherExecutor {
    pub fn new(http_url: String, username: String, password: String) -> Self {
        Self {
            http_url,
            username,
            password,
            client: reqwest::Client::new(),
        }
    }

    fn commit_endpoint(&self) -> String {
        format!(
            "{}/db/neo4j/tx/commit",
            self.http_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl QueryExecutor for CypherExecutor {
    async fn execute(&self, query: &Query) -> Result<ResultSet> {
        debug!(cypher = %query.text, "executing graph query");
        let body = serde_json::json!({
            "statements": [{ "statement": query.text }]
        });

        let response = self
            .client
            .post(self.commit_endpoint())
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| QueryForgeError::Execution(format!("Neo4j request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(QueryForgeError::Execution(format!(
                "Neo4j HTTP error ({}): {}",
                status, text
            )));
        }

        let envelope: CypherEnvelope = response
            .json()
            .await
            .map_err(|e| QueryForgeError::Execution(format!("Neo4j response parse failed: {}", e)))?;

        flatten_cypher_envelope(envelope)
    }
}

fn flatten_cypher_envelope(envelope: CypherEnvelope) -> Result<ResultSet> {
    if let Some(error) = envelope.errors.first() {
        return Err(QueryForgeError::Execution(format!(
            "Cypher execution failed ({}): {}",
            error.code, error.message
        )));
    }

    let mut rows = ResultSet::new();
    for result in envelope.results {
        for data in result.data {
            let mut row = Row::new();
            for (column, value) in result.columns.iter().zip(data.row.into_iter()) {
                row.insert(column.clone(), value);
            }
            rows.push(row);
        }
    }
    Ok(rows)
}
