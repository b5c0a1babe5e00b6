// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::io::Write;
use std::time::Duration;
use tokio::time::timeout;

/// Send an HTTP request over TCP and return the response
pub async fn send_request(
    port: u16,
    uri: &str,
    method: &str,
    headers: &[(&str, &str)],
    body: Option<Vec<u8>>,
) -> Result<Response<hyper::body::Incoming>, Box<dyn std::error::Error>> {
    let stream = timeout(
        Duration::from_secs(2),
        tokio::net::TcpStream::connect(format!("127.0.0.1:{port}")),
    )
    .await??;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut request_builder = Request::builder()
        .uri(uri)
        .method(method)
        .header("Host", format!("127.0.0.1:{port}"));
    for (name, value) in headers {
        request_builder = request_builder.header(*name, *value);
    }

    let response = if let Some(body_data) = body {
        request_builder =
            request_builder.header("Content-Length", body_data.len().to_string());
        let request = request_builder.body(Full::<Bytes>::from(Bytes::from(body_data)))?;
        timeout(Duration::from_secs(5), sender.send_request(request)).await??
    } else {
        let request = request_builder.body(Full::<Bytes>::from(Bytes::new()))?;
        timeout(Duration::from_secs(5), sender.send_request(request)).await??
    };

    Ok(response)
}

/// Collect a response body into a string
pub async fn response_body_to_string(
    response: Response<hyper::body::Incoming>,
) -> Result<String, Box<dyn std::error::Error>> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Gzip-compress a payload the way Logpush does before delivery
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("gzip write failed");
    encoder.finish().expect("gzip finish failed")
}
