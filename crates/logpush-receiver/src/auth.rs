// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use hyper::header;
use hyper::http::HeaderMap;

const BEARER_PREFIX: &str = "Bearer ";

/// Decides whether an inbound delivery is allowed, based on the request
/// headers and the configured shared secret.
///
/// With no secret configured every request is allowed. Otherwise the
/// `Authorization` header must be present, use the `Bearer` scheme, and carry
/// a byte-for-byte match of the secret. Callers must not distinguish between
/// a missing header, a wrong scheme, and a wrong token in their response.
pub fn authorize(headers: &HeaderMap, expected_token: Option<&str>) -> bool {
    let Some(expected) = expected_token else {
        return true;
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX));
    match provided {
        Some(token) => token.as_bytes() == expected.as_bytes(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use hyper::header;
    use hyper::http::HeaderMap;

    use super::authorize;

    fn headers_with_authorization(val: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert(header::AUTHORIZATION, val.parse().unwrap());
        map
    }

    #[test]
    fn test_allows_everything_when_no_token_configured() {
        assert!(authorize(&HeaderMap::new(), None));
        assert!(authorize(
            &headers_with_authorization("Bearer anything"),
            None
        ));
    }

    #[test]
    fn test_allows_matching_token() {
        assert!(authorize(
            &headers_with_authorization("Bearer s3cret"),
            Some("s3cret")
        ));
    }

    #[test]
    fn test_denies_missing_header() {
        assert!(!authorize(&HeaderMap::new(), Some("s3cret")));
    }

    #[test]
    fn test_denies_wrong_token() {
        assert!(!authorize(
            &headers_with_authorization("Bearer nope"),
            Some("s3cret")
        ));
    }

    #[test]
    fn test_denies_wrong_scheme() {
        assert!(!authorize(
            &headers_with_authorization("Basic s3cret"),
            Some("s3cret")
        ));
        assert!(!authorize(
            &headers_with_authorization("s3cret"),
            Some("s3cret")
        ));
    }

    #[test]
    fn test_denies_token_with_extra_bytes() {
        assert!(!authorize(
            &headers_with_authorization("Bearer s3cret "),
            Some("s3cret")
        ));
        assert!(!authorize(
            &headers_with_authorization("Bearer s3cretx"),
            Some("s3cret")
        ));
    }
}
