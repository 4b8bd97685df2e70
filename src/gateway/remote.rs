use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{DiffGateway, DiffOptions, DiffStats, GatewayError, SchemaSnapshot, TableRef};
use crate::migration::executor::{ExecError, SqlExecutor};

/// Client for an external diff service
#[derive(Debug, Clone)]
pub struct RemoteGateway {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct TableRequest<'a> {
    table: &'a TableRef,
}

#[derive(Debug, Serialize)]
struct DiffRequest<'a> {
    table_a: &'a TableRef,
    table_b: &'a TableRef,
    #[serde(flatten)]
    options: &'a DiffOptions,
}

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    database: &'a str,
    sql: &'a str,
}

#[derive(Debug, Deserialize)]
struct RowCountResponse {
    count: u64,
}

impl RemoteGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, GatewayError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED
        {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Permission(error_text));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::TableNotFound(error_text));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Remote(format!("{}: {}", status, error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl DiffGateway for RemoteGateway {
    async fn row_count(&self, table: &TableRef) -> Result<u64, GatewayError> {
        let response: RowCountResponse = self.post("/row-count", &TableRequest { table }).await?;
        Ok(response.count)
    }

    async fn diff_keyed(
        &self,
        table_a: &TableRef,
        table_b: &TableRef,
        options: &DiffOptions,
    ) -> Result<DiffStats, GatewayError> {
        self.post(
            "/diff",
            &DiffRequest {
                table_a,
                table_b,
                options,
            },
        )
        .await
    }

    async fn schema_snapshot(&self, table: &TableRef) -> Result<SchemaSnapshot, GatewayError> {
        self.post("/schema", &TableRequest { table }).await
    }
}

#[async_trait]
impl SqlExecutor for RemoteGateway {
    async fn execute(&self, database: &str, sql: &str) -> Result<(), ExecError> {
        let _: serde_json::Value = self
            .post("/execute", &ExecuteRequest { database, sql })
            .await
            .map_err(|e| match e {
                GatewayError::Unreachable(msg) => ExecError::Connection(msg),
                other => ExecError::Statement(other.to_string()),
            })?;
        Ok(())
    }
}
