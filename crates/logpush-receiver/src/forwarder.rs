// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::DateTime;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::decoder::LogRecord;
use crate::http_utils::build_client;

/// Logpush field holding the edge-side request start time, when the job is
/// configured to include it.
const TIMESTAMP_FIELD: &str = "EdgeStartTimestamp";
/// Logpush field holding the requested hostname, used as a stream label so
/// batches can be queried per zone.
const HOST_FIELD: &str = "ClientRequestHost";
const SOURCE_LABEL: &str = "logpush";

/// Outcome classification for a failed push, decided from the transport
/// result and the downstream status code.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Loki was unreachable, timed out, rate-limited, or answered 5xx for
    /// every attempt. The shipper should re-deliver.
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// Loki rejected the batch outright (4xx other than 429). Retrying the
    /// same payload cannot succeed.
    #[error("downstream store rejected the batch: {0}")]
    Permanent(String),
}

/// Seam between the HTTP surface and the downstream store, so the surface can
/// be exercised against a mock in tests.
#[async_trait]
pub trait LogForwarder {
    /// Delivers one batch. The batch is atomic: either the whole sequence is
    /// accepted downstream or an error is returned. Empty batches are a
    /// successful no-op and must not produce a downstream call.
    async fn forward(&self, records: Vec<LogRecord>) -> Result<usize, ForwardError>;
}

/// Wire format of `POST /loki/api/v1/push`.
#[derive(Serialize)]
struct PushRequest {
    streams: Vec<PushStream>,
}

#[derive(Serialize)]
struct PushStream {
    stream: Map<String, Value>,
    /// `[nanosecond-timestamp, line]` pairs, in record order.
    values: Vec<(String, String)>,
}

pub struct LokiForwarder {
    config: Arc<Config>,
    client: reqwest::Client,
}

impl LokiForwarder {
    pub fn new(config: Arc<Config>) -> Self {
        let client = build_client(Duration::from_secs(config.forward_timeout_secs))
            .unwrap_or_else(|e| {
                error!("Unable to build the Loki HTTP client: {e}, using defaults");
                reqwest::Client::new()
            });
        LokiForwarder { config, client }
    }

    fn stream_labels(&self, records: &[LogRecord]) -> Map<String, Value> {
        let mut labels = Map::new();
        labels.insert("job".to_string(), Value::from(self.config.job_label.clone()));
        labels.insert("source".to_string(), Value::from(SOURCE_LABEL));
        if let Some(host) = records
            .first()
            .and_then(|record| record.get(HOST_FIELD))
            .and_then(Value::as_str)
        {
            labels.insert("host".to_string(), Value::from(host));
        }
        labels
    }

    /// Builds the Loki push body: one stream, one `[timestamp, line]` pair
    /// per record, in input order. The receipt-time clock is read once for
    /// the whole batch; records carrying their own edge timestamp keep it.
    fn build_push_payload(&self, records: Vec<LogRecord>) -> PushRequest {
        let received_ns = unix_nanos_now();
        let stream = self.stream_labels(&records);
        let values = records
            .into_iter()
            .map(|record| {
                let ts = record_timestamp_nanos(&record).unwrap_or(received_ns);
                (ts.to_string(), Value::Object(record).to_string())
            })
            .collect();
        PushRequest {
            streams: vec![PushStream { stream, values }],
        }
    }
}

#[async_trait]
impl LogForwarder for LokiForwarder {
    async fn forward(&self, records: Vec<LogRecord>) -> Result<usize, ForwardError> {
        if records.is_empty() {
            return Ok(0);
        }
        let count = records.len();
        let payload = self.build_push_payload(records);

        let mut attempts = 0;
        loop {
            attempts += 1;
            let time = Instant::now();
            let response = self
                .client
                .post(&self.config.loki_push_url)
                .json(&payload)
                .send()
                .await;
            let elapsed = time.elapsed();

            match response {
                Ok(r) => {
                    let status = r.status();
                    if status.is_success() {
                        debug!(
                            "Pushed {count} log records to Loki in {} ms",
                            elapsed.as_millis()
                        );
                        return Ok(count);
                    }
                    if is_permanent(status) {
                        let body = r.text().await.unwrap_or_default();
                        error!("Loki rejected a batch of {count} records with {status}: {body}");
                        return Err(ForwardError::Permanent(format!("status {status}")));
                    }
                    warn!("Push attempt {attempts} failed with status {status}");
                    if attempts >= self.config.forward_max_retries {
                        return Err(ForwardError::Transient(format!(
                            "status {status} after {attempts} attempts"
                        )));
                    }
                }
                Err(e) => {
                    warn!("Network error on push attempt {attempts}: {e:?}");
                    if attempts >= self.config.forward_max_retries {
                        return Err(ForwardError::Transient(format!(
                            "{e} after {attempts} attempts"
                        )));
                    }
                }
            }

            // Exponential backoff
            let backoff_ms =
                self.config.forward_retry_backoff_base_ms * (2_u64.pow(attempts - 1));
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        }
    }
}

fn is_permanent(status: reqwest::StatusCode) -> bool {
    status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS
}

fn unix_nanos_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_nanos()).ok())
        .unwrap_or_default()
}

fn record_timestamp_nanos(record: &LogRecord) -> Option<i64> {
    match record.get(TIMESTAMP_FIELD)? {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .and_then(|ts| ts.timestamp_nanos_opt()),
        Value::Number(raw) => raw.as_i64().and_then(normalize_epoch_nanos),
        _ => None,
    }
}

/// Logpush jobs can be configured with `unix` (seconds) or `unixnano`
/// timestamps; values below this cutoff are taken as seconds.
fn normalize_epoch_nanos(value: i64) -> Option<i64> {
    const SECONDS_CUTOFF: i64 = 100_000_000_000;
    if value <= 0 {
        return None;
    }
    if value < SECONDS_CUTOFF {
        value.checked_mul(1_000_000_000)
    } else {
        Some(value)
    }
}
