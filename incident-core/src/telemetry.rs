use crate::error::TelemetryError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// Range queries against a metrics backend.
pub trait TelemetryRangeQuery: Send + Sync {
    fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_seconds: u64,
    ) -> Result<Vec<serde_json::Value>, TelemetryError>;
}

/// Prometheus HTTP API client (`/api/v1/query_range`).
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    data: Option<QueryRangeData>,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    #[serde(default)]
    result: Vec<serde_json::Value>,
}

impl PrometheusClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TelemetryError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TelemetryError::Client(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

impl TelemetryRangeQuery for PrometheusClient {
    #[instrument(skip(self), fields(backend = "prometheus"))]
    fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step_seconds: u64,
    ) -> Result<Vec<serde_json::Value>, TelemetryError> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let start = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = end.to_rfc3339_opts(SecondsFormat::Secs, true);
        let step = step_seconds.to_string();

        let body: QueryRangeResponse = self
            .http
            .get(&url)
            .query(&[
                ("query", query),
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("step", step.as_str()),
            ])
            .send()?
            .error_for_status()?
            .json()?;

        if body.status != "success" {
            debug!(status = %body.status, "query_range returned non-success status");
            return Ok(Vec::new());
        }
        Ok(body.data.map(|d| d.result).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server;
    use axum::{
        Json, Router,
        extract::{Query, State},
        http::StatusCode,
        routing::get,
    };
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

    async fn query_range(
        State(seen): State<Seen>,
        Query(params): Query<HashMap<String, String>>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        let query = params.get("query").cloned().unwrap_or_default();
        seen.lock().expect("lock").push(params);
        match query.as_str() {
            r#"up{job="api"}"# => (
                StatusCode::OK,
                Json(json!({
                    "status": "success",
                    "data": {
                        "resultType": "matrix",
                        "result": [
                            {"metric": {"instance": "h1"}, "values": [[1714557600, "1"]]},
                            {"metric": {"instance": "h2"}, "values": [[1714557600, "0"]]}
                        ]
                    }
                })),
            ),
            r#"up{job="broken"}"# => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error"})),
            ),
            _ => (
                StatusCode::OK,
                Json(json!({"status": "error", "errorType": "bad_data"})),
            ),
        }
    }

    fn prometheus() -> (PrometheusClient, Seen) {
        let seen = Seen::default();
        let router = Router::new()
            .route("/api/v1/query_range", get(query_range))
            .with_state(Arc::clone(&seen));
        let base = test_server::serve(router);
        let client = PrometheusClient::new(&format!("{base}/"), Duration::from_secs(5)).expect("client");
        (client, seen)
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let start = DateTime::from_timestamp(1_714_557_600, 0).expect("start");
        (start, start + chrono::Duration::minutes(30))
    }

    #[test]
    fn sends_range_parameters_and_counts_series() {
        let (client, seen) = prometheus();
        let (start, end) = window();

        let series = client
            .query_range(r#"up{job="api"}"#, start, end, 60)
            .expect("query");
        assert_eq!(series.len(), 2);

        let seen = seen.lock().expect("lock");
        assert_eq!(seen[0]["query"], r#"up{job="api"}"#);
        assert_eq!(seen[0]["start"], "2024-05-01T10:00:00Z");
        assert_eq!(seen[0]["end"], "2024-05-01T10:30:00Z");
        assert_eq!(seen[0]["step"], "60");
    }

    #[test]
    fn non_success_body_is_an_empty_result() {
        let (client, _) = prometheus();
        let (start, end) = window();
        let series = client
            .query_range(r#"up{job="db"}"#, start, end, 60)
            .expect("query");
        assert!(series.is_empty());
    }

    #[test]
    fn error_status_is_reported() {
        let (client, _) = prometheus();
        let (start, end) = window();
        assert!(matches!(
            client.query_range(r#"up{job="broken"}"#, start, end, 60),
            Err(TelemetryError::Status(500))
        ));
    }
}
