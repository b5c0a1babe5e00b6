// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP receiver for Cloudflare Logpush deliveries that relays decoded log
//! records to a Loki push endpoint.

pub mod auth;
pub mod config;
pub mod decoder;
pub mod forwarder;
pub mod http_utils;
pub mod receiver;
