// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;

const DEFAULT_LOKI_URL: &str = "http://loki:3100";
const DEFAULT_RECEIVER_PORT: u16 = 8088;
const DEFAULT_JOB_LABEL: &str = "cloudflare";
const LOKI_PUSH_PATH: &str = "/loki/api/v1/push";

#[derive(Debug)]
pub struct Config {
    /// Shared secret expected in the `Authorization: Bearer` header of
    /// inbound deliveries. `None` disables authentication entirely.
    pub auth_token: Option<String>,
    /// Fully-qualified Loki push endpoint (base URL + push path).
    pub loki_push_url: String,
    /// Value of the `job` stream label attached to every forwarded batch.
    pub job_label: String,
    pub receiver_port: u16,
    pub max_request_content_length: usize,
    /// end-to-end deadline for one ingestion request, in seconds
    pub request_timeout_secs: u64,
    /// timeout for each push attempt against Loki, in seconds
    pub forward_timeout_secs: u64,
    /// Maximum number of attempts for a failed push
    pub forward_max_retries: u32,
    /// Base backoff duration between push attempts, in milliseconds
    pub forward_retry_backoff_base_ms: u64,
}

impl Config {
    pub fn new() -> Result<Config, Box<dyn std::error::Error>> {
        let loki_base = env::var("LOKI_URL").unwrap_or_else(|_| DEFAULT_LOKI_URL.to_string());
        let loki_base = loki_base.trim_end_matches('/').to_string();

        let uri = hyper::Uri::from_str(&loki_base)
            .map_err(|e| anyhow::anyhow!("LOKI_URL is not a valid URL: {e}"))?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(anyhow::anyhow!("LOKI_URL must be an absolute http(s) URL").into());
        }

        // An empty AUTH_TOKEN is the same as an unset one: authentication is
        // disabled and every delivery is accepted.
        let auth_token = env::var("AUTH_TOKEN").ok().filter(|t| !t.is_empty());

        let receiver_port: u16 = env::var("RECEIVER_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(DEFAULT_RECEIVER_PORT);

        let job_label =
            env::var("STREAM_JOB_LABEL").unwrap_or_else(|_| DEFAULT_JOB_LABEL.to_string());

        Ok(Config {
            auth_token,
            loki_push_url: format!("{loki_base}{LOKI_PUSH_PATH}"),
            job_label,
            receiver_port,
            max_request_content_length: 10 * 1024 * 1024, // 10MB in Bytes
            request_timeout_secs: 60,
            forward_timeout_secs: 30,
            forward_max_retries: 3,
            forward_retry_backoff_base_ms: 100,
        })
    }
}
