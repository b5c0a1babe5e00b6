// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::Read;

use flate2::read::GzDecoder;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

/// One decoded Logpush line: an ordered mapping of field name to value.
/// Logpush field sets are operator-configurable, so no schema is enforced.
pub type LogRecord = Map<String, Value>;

/// Body of the `test.txt.gz` object Cloudflare uploads when validating a new
/// Logpush HTTP destination. It must be acknowledged but never forwarded.
const VALIDATION_PAYLOAD: &str = r#"{"content":"tests"}"#;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Batch-level decode failures. Anything below the batch level (a single
/// malformed line) is skipped and counted instead.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to decompress gzip body: {0}")]
    Gzip(#[from] std::io::Error),
    #[error("request body is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Default)]
pub struct DecodedPayload {
    /// Records in input order.
    pub records: Vec<LogRecord>,
    /// Lines that were not valid JSON objects and were dropped.
    pub skipped_lines: usize,
    /// True if the body was the Logpush destination-validation upload.
    pub validation_ping: bool,
}

/// Turns a raw request body into an ordered sequence of [`LogRecord`].
///
/// Bodies are gzip-decompressed when the `Content-Encoding` header says so or
/// when the body starts with the gzip magic number (Logpush uploads the
/// validation object without declaring an encoding). The decompressed text is
/// parsed as newline-delimited JSON objects; a single JSON object body is
/// simply a one-line batch. Blank lines are ignored. Lines that fail to parse
/// as a JSON object are skipped and counted, never merged into a neighbor.
pub fn decode_payload(
    body: &[u8],
    content_encoding: Option<&str>,
) -> Result<DecodedPayload, DecodeError> {
    if body.is_empty() {
        return Ok(DecodedPayload::default());
    }

    let text = if is_gzip_encoded(content_encoding) || body.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(body);
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        String::from_utf8(decompressed)?
    } else {
        String::from_utf8(body.to_vec())?
    };

    if text.trim() == VALIDATION_PAYLOAD {
        return Ok(DecodedPayload {
            validation_ping: true,
            ..DecodedPayload::default()
        });
    }

    let mut records = Vec::new();
    let mut skipped_lines = 0;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(record)) => records.push(record),
            Ok(_) => {
                warn!("Dropping log line that is valid JSON but not an object");
                skipped_lines += 1;
            }
            Err(e) => {
                warn!("Dropping unparseable log line: {e}");
                skipped_lines += 1;
            }
        }
    }

    Ok(DecodedPayload {
        records,
        skipped_lines,
        validation_ping: false,
    })
}

fn is_gzip_encoded(content_encoding: Option<&str>) -> bool {
    content_encoding.is_some_and(|value| value.to_ascii_lowercase().contains("gzip"))
}
