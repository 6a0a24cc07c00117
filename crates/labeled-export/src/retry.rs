// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Retry policies with URL-based classification.
//!
//! Every platform call is a `POST` to `<server>/public/api/v3/<method>`, but
//! the methods fall into two groups with different failure characteristics:
//!
//! - **PlatformApi**: metadata calls (`projects.info`, `datasets.list`,
//!   `images.annotations.bulk.info`, ...). Authentication failures (401/403)
//!   are final and must surface immediately.
//! - **FileIO**: media transfers (`images.download`, `point-clouds.images.
//!   download`, `file-storage.bulk.upload`) and any URL outside the API
//!   prefix. These run concurrently and retry on conflict and lock statuses
//!   as well.
//!
//! Both scopes share the same retry count (`SLY_MAX_RETRIES`, default 3).
//!
//! ```rust
//! use labeled_export::{RetryScope, classify_url};
//!
//! assert_eq!(
//!     classify_url("https://app.supervisely.com/public/api/v3/projects.info"),
//!     RetryScope::PlatformApi
//! );
//! assert_eq!(
//!     classify_url("https://app.supervisely.com/public/api/v3/images.download"),
//!     RetryScope::FileIO
//! );
//! ```

use url::Url;

/// Retry scope of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryScope {
    /// Metadata calls under `/public/api/`. Never retried on 401/403.
    PlatformApi,

    /// Media downloads, team files uploads and foreign URLs.
    FileIO,
}

const API_PREFIX: &str = "/public/api/";

fn is_transfer_method(method: &str) -> bool {
    method.ends_with(".download") || method.starts_with("file-storage.bulk.upload")
}

/// Classifies a URL to determine which retry policy to apply.
///
/// Only HTTP/HTTPS URLs whose path starts with `/public/api/` are API calls;
/// among those, transfer methods are classified as file I/O.
///
/// ```rust
/// use labeled_export::{RetryScope, classify_url};
///
/// assert_eq!(
///     classify_url("http://localhost:8080/public/api/v3/datasets.list"),
///     RetryScope::PlatformApi
/// );
/// assert_eq!(
///     classify_url("http://localhost:8080/public/api/v3/file-storage.bulk.upload?teamId=4"),
///     RetryScope::FileIO
/// );
/// assert_eq!(
///     classify_url("https://cdn.example.com/public/data.bin"),
///     RetryScope::FileIO
/// );
/// ```
pub fn classify_url(url: &str) -> RetryScope {
    if let Ok(parsed) = Url::parse(url) {
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return RetryScope::FileIO;
        }

        if let Some(rest) = parsed.path().strip_prefix(API_PREFIX) {
            let method = rest.rsplit('/').next().unwrap_or(rest);
            if !is_transfer_method(method) {
                return RetryScope::PlatformApi;
            }
        }
    }

    RetryScope::FileIO
}

/// Maximum retries per request from `SLY_MAX_RETRIES` (default 3).
pub fn max_retries() -> u32 {
    std::env::var("SLY_MAX_RETRIES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(3)
}

/// Creates a retry policy with URL-based classification.
///
/// | Scope       | Retried statuses                 | Never retried |
/// |-------------|----------------------------------|---------------|
/// | PlatformApi | 408, 429, 5xx, transport errors  | 401, 403      |
/// | FileIO      | 408, 409, 423, 429, 5xx, transport errors | |
pub fn create_retry_policy() -> reqwest::retry::Builder {
    reqwest::retry::for_host("*")
        .max_retries_per_request(max_retries())
        .classify_fn(|req_rep| {
            let url = req_rep.uri().to_string();

            match classify_url(&url) {
                RetryScope::PlatformApi => match req_rep.status() {
                    Some(status) => match status.as_u16() {
                        401 | 403 => req_rep.success(),
                        429 | 408 | 500..=599 => req_rep.retryable(),
                        _ => req_rep.success(),
                    },
                    None if req_rep.error().is_some() => req_rep.retryable(),
                    None => req_rep.success(),
                },
                RetryScope::FileIO => match req_rep.status() {
                    Some(status) => match status.as_u16() {
                        429 | 408 | 500..=599 | 409 | 423 => req_rep.retryable(),
                        _ => req_rep.success(),
                    },
                    None if req_rep.error().is_some() => req_rep.retryable(),
                    None => req_rep.success(),
                },
            }
        })
}

pub fn log_retry_configuration() {
    let timeout = std::env::var("SLY_TIMEOUT").unwrap_or_else(|_| "60".to_string());
    log::debug!(
        "Retry configuration - max_retries={}, timeout={}s",
        max_retries(),
        timeout
    );
}
