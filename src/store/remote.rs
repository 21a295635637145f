//! Remote store reached through a libSQL-style HTTP pipeline endpoint

use crate::error::StoreError;
use crate::store::sql::{SqlRow, SqlValue, Statement};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// HTTP client for `POST {base}/v2/pipeline`
#[derive(Debug, Clone)]
pub struct RemoteStore {
    client: Client,
    pipeline_url: String,
    auth_token: Option<String>,
}

impl RemoteStore {
    pub fn new(database_url: &str, auth_token: Option<String>) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent("land-registry-ingest/0.1")
            .build()?;

        Ok(Self {
            client,
            pipeline_url: format!("{}/v2/pipeline", base_url(database_url)),
            auth_token,
        })
    }

    pub async fn execute(&self, statement: &Statement) -> Result<u64, StoreError> {
        let result = self.send(statement).await?;
        Ok(result.affected_row_count)
    }

    pub async fn fetch(&self, statement: &Statement) -> Result<Vec<SqlRow>, StoreError> {
        let result = self.send(statement).await?;
        result
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(SqlValue::try_from).collect())
            .collect()
    }

    async fn send(&self, statement: &Statement) -> Result<ExecuteResult, StoreError> {
        let body = PipelineRequest {
            requests: vec![
                StreamRequest::Execute {
                    stmt: WireStatement {
                        sql: &statement.sql,
                        args: statement.args.iter().map(WireValue::from).collect(),
                    },
                },
                StreamRequest::Close,
            ],
        };

        debug!("Remote statement with {} argument(s)", statement.args.len());

        let mut request = self.client.post(&self.pipeline_url).json(&body);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::Unavailable(format!("HTTP {}: {}", status, text)));
        }

        let pipeline: PipelineResponse = response.json().await?;
        let first = pipeline
            .results
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::Decode("empty pipeline response".to_string()))?;

        match first {
            StreamResult::Ok { response } => match response {
                StreamResponse::Execute { result } => Ok(result),
                StreamResponse::Close {} => {
                    Err(StoreError::Decode("missing execute response".to_string()))
                }
            },
            StreamResult::Error { error } => Err(StoreError::Query(error.message)),
        }
    }

    pub async fn close(&self) {}
}

/// `libsql://host` becomes `https://host`; trailing slashes dropped
fn base_url(url: &str) -> String {
    let url = match url.strip_prefix("libsql://") {
        Some(rest) => format!("https://{}", rest),
        None => url.to_string(),
    };
    url.trim_end_matches('/').to_string()
}

#[derive(Serialize)]
struct PipelineRequest<'a> {
    requests: Vec<StreamRequest<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamRequest<'a> {
    Execute { stmt: WireStatement<'a> },
    Close,
}

#[derive(Serialize)]
struct WireStatement<'a> {
    sql: &'a str,
    args: Vec<WireValue>,
}

/// Typed value as carried on the wire; integers travel as strings
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireValue {
    Null,
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
    Blob { base64: String },
}

impl From<&SqlValue> for WireValue {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null => WireValue::Null,
            SqlValue::Integer(i) => WireValue::Integer {
                value: i.to_string(),
            },
            SqlValue::Real(r) => WireValue::Float { value: *r },
            SqlValue::Text(s) => WireValue::Text { value: s.clone() },
        }
    }
}

impl TryFrom<WireValue> for SqlValue {
    type Error = StoreError;

    fn try_from(value: WireValue) -> Result<Self, Self::Error> {
        match value {
            WireValue::Null => Ok(SqlValue::Null),
            WireValue::Integer { value } => value
                .parse()
                .map(SqlValue::Integer)
                .map_err(|_| StoreError::Decode(format!("bad integer {}", value))),
            WireValue::Float { value } => Ok(SqlValue::Real(value)),
            WireValue::Text { value } => Ok(SqlValue::Text(value)),
            WireValue::Blob { .. } => Err(StoreError::Decode("unexpected blob column".to_string())),
        }
    }
}

#[derive(Deserialize)]
struct PipelineResponse {
    #[serde(default)]
    results: Vec<StreamResult>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamResult {
    Ok { response: StreamResponse },
    Error { error: WireError },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum StreamResponse {
    Execute { result: ExecuteResult },
    Close {},
}

#[derive(Deserialize)]
struct ExecuteResult {
    #[serde(default)]
    rows: Vec<Vec<WireValue>>,
    #[serde(default)]
    affected_row_count: u64,
}

#[derive(Deserialize)]
struct WireError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_base_url_rewrites_libsql_scheme() {
        assert_eq!(base_url("libsql://db-user.turso.io"), "https://db-user.turso.io");
        assert_eq!(base_url("http://localhost:8080/"), "http://localhost:8080");
    }

    #[test]
    fn test_wire_values_serialize_with_type_tags() {
        let args: Vec<WireValue> = [
            SqlValue::Integer(42),
            SqlValue::Text("SW1A 1AA".to_string()),
            SqlValue::Null,
        ]
        .iter()
        .map(WireValue::from)
        .collect();

        assert_eq!(
            serde_json::to_value(&args).unwrap(),
            json!([
                {"type": "integer", "value": "42"},
                {"type": "text", "value": "SW1A 1AA"},
                {"type": "null"}
            ])
        );
    }

    #[tokio::test]
    async fn test_fetch_decodes_rows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/pipeline"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "baton": null,
                "base_url": null,
                "results": [
                    {"type": "ok", "response": {"type": "execute", "result": {
                        "cols": [{"name": "year"}, {"name": "avg"}],
                        "rows": [[{"type": "text", "value": "2021"}, {"type": "float", "value": 110000.0}]],
                        "affected_row_count": 0
                    }}},
                    {"type": "ok", "response": {"type": "close"}}
                ]
            })))
            .mount(&server)
            .await;

        let store = RemoteStore::new(&server.uri(), Some("secret".to_string())).unwrap();
        let rows = store
            .fetch(&Statement::new("SELECT year, avg FROM t"))
            .await
            .unwrap();

        assert_eq!(
            rows,
            vec![vec![SqlValue::Text("2021".to_string()), SqlValue::Real(110000.0)]]
        );
    }

    #[tokio::test]
    async fn test_statement_error_is_query_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"type": "error", "error": {"message": "no such table: prices"}}]
            })))
            .mount(&server)
            .await;

        let store = RemoteStore::new(&server.uri(), None).unwrap();
        let err = store.execute(&Statement::new("SELECT 1 FROM prices")).await.unwrap_err();
        match err {
            StoreError::Query(message) => assert!(message.contains("no such table")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_failure_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let store = RemoteStore::new(&server.uri(), None).unwrap();
        let err = store.execute(&Statement::new("SELECT 1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
