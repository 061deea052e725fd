use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{OrderDraft, RemoteError, RemoteResult, RemoteStore};
use crate::config::SyncConfig;
use crate::error::AppError;
use crate::filter::Filter;
use crate::local_db_model::{Record, Table};
use crate::mutation::Mutation;

/// Postgres SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

/// PostgREST-style HTTP client for the remote store.
#[derive(Clone)]
pub struct RestRemote {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

impl RestRemote {
    pub fn new(config: &SyncConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Config(format!("Cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.remote_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.api_key {
            Some(key) => builder.header("apikey", key).bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> RemoteResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }
        Err(rejection(response).await)
    }

    async fn write(&self, table: Table, mutation: &Mutation, idempotency_key: Option<Uuid>) -> RemoteResult<()> {
        let url = self.table_url(table);
        let builder = match mutation {
            Mutation::Insert { row } => self
                .request(Method::POST, &url)
                .header("Prefer", "return=minimal")
                .json(row),
            Mutation::Update { key, patch } => self
                .request(Method::PATCH, &url)
                .query(&[("id", format!("eq.{key}"))])
                .header("Prefer", "return=minimal")
                .json(patch),
            Mutation::Upsert { row } => self
                .request(Method::POST, &url)
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(row),
            Mutation::Delete { key } => self
                .request(Method::DELETE, &url)
                .query(&[("id", format!("eq.{key}"))]),
        };
        let builder = match idempotency_key {
            Some(token) => builder.header("Idempotency-Key", token.to_string()),
            None => builder,
        };

        debug!("{} {} ({})", mutation.kind(), url, mutation.target_key().unwrap_or("-"));
        self.send(builder).await.map(|_| ())
    }
}

async fn rejection(response: Response) -> RemoteError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    classify_rejection(status, &text)
}

/// SQLSTATE 23505, or a 409 with no code, is a duplicate key. Every other
/// failure, other 409 conflicts included, is a plain rejection.
fn classify_rejection(status: u16, text: &str) -> RemoteError {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or_default();
    let message = body.message.unwrap_or_else(|| text.to_string());

    if body.code.as_deref() == Some(UNIQUE_VIOLATION) || (status == 409 && body.code.is_none()) {
        return RemoteError::Duplicate(message);
    }

    warn!("Remote rejected request with status {status}: {message}");
    RemoteError::Rejected {
        status,
        code: body.code,
        message,
    }
}

/// The procedure may answer with a bare id or an object carrying one.
fn order_id_from(value: JsonValue) -> RemoteResult<String> {
    match value {
        JsonValue::String(id) => Ok(id),
        JsonValue::Number(n) => Ok(n.to_string()),
        JsonValue::Object(map) => map
            .get("order_id")
            .or_else(|| map.get("id"))
            .cloned()
            .ok_or_else(|| RemoteError::Decode("order id missing from response".to_string()))
            .and_then(order_id_from),
        other => Err(RemoteError::Decode(format!("unexpected order id: {other}"))),
    }
}

#[async_trait]
impl RemoteStore for RestRemote {
    async fn select(&self, table: Table, filter: &Filter) -> RemoteResult<Vec<Record>> {
        let mut query = vec![("select".to_string(), "*".to_string())];
        query.extend(filter.to_query_pairs());

        let response = self
            .send(self.request(Method::GET, &self.table_url(table)).query(&query))
            .await?;
        response
            .json::<Vec<Record>>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn insert(&self, table: Table, row: &Record) -> RemoteResult<()> {
        self.write(table, &Mutation::Insert { row: row.clone() }, None).await
    }

    async fn update(&self, table: Table, patch: &Record, key: &str) -> RemoteResult<()> {
        let mutation = Mutation::Update {
            key: key.to_string(),
            patch: patch.clone(),
        };
        self.write(table, &mutation, None).await
    }

    async fn upsert(&self, table: Table, row: &Record) -> RemoteResult<()> {
        self.write(table, &Mutation::Upsert { row: row.clone() }, None).await
    }

    async fn delete(&self, table: Table, key: &str) -> RemoteResult<()> {
        self.write(table, &Mutation::Delete { key: key.to_string() }, None).await
    }

    async fn create_order_with_items(&self, order: &OrderDraft) -> RemoteResult<String> {
        let url = format!("{}/rest/v1/rpc/create_order_with_items", self.base_url);
        let response = self.send(self.request(Method::POST, &url).json(order)).await?;
        let value = response
            .json::<JsonValue>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        order_id_from(value)
    }

    async fn apply(&self, table: Table, mutation: &Mutation, idempotency_key: Uuid) -> RemoteResult<()> {
        self.write(table, mutation, Some(idempotency_key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn order_id_accepts_bare_and_wrapped_ids() {
        assert_eq!(order_id_from(json!("o-1")).unwrap(), "o-1");
        assert_eq!(order_id_from(json!(42)).unwrap(), "42");
        assert_eq!(order_id_from(json!({"order_id": "o-2"})).unwrap(), "o-2");
        assert!(matches!(order_id_from(json!(null)), Err(RemoteError::Decode(_))));
    }

    #[test]
    fn table_urls_use_wire_names() {
        let config = SyncConfig {
            remote_url: "https://remote.example/".to_string(),
            ..SyncConfig::default()
        };
        let remote = RestRemote::new(&config).unwrap();
        assert_eq!(remote.table_url(Table::OrderItems), "https://remote.example/rest/v1/order_items");
    }

    fn http_response(status: u16, body: &'static str) -> Response {
        Response::from(http::Response::builder().status(status).body(body).unwrap())
    }

    #[tokio::test]
    async fn unique_violation_is_duplicate() {
        let response = http_response(409, r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#);
        match rejection(response).await {
            RemoteError::Duplicate(message) => assert!(message.contains("duplicate key")),
            other => panic!("expected Duplicate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn foreign_key_conflict_stays_rejected() {
        let response = http_response(409, r#"{"code":"23503","message":"violates foreign key constraint"}"#);
        let err = rejection(response).await;
        assert!(!err.is_duplicate());
        assert_eq!(
            err,
            RemoteError::Rejected {
                status: 409,
                code: Some("23503".to_string()),
                message: "violates foreign key constraint".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn plain_text_conflict_is_duplicate() {
        let err = rejection(http_response(409, "Conflict")).await;
        assert_eq!(err, RemoteError::Duplicate("Conflict".to_string()));
    }

    #[test]
    fn unique_violation_outside_conflict_status_is_duplicate() {
        assert!(classify_rejection(400, r#"{"code":"23505"}"#).is_duplicate());
        assert!(!classify_rejection(400, r#"{"code":"23502"}"#).is_duplicate());
        assert!(!classify_rejection(500, "boom").is_duplicate());
    }
}
