// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::{Error, ProgressReporter};
use futures::{StreamExt as _, TryStreamExt as _};
use std::{future::Future, str::FromStr};

/// Default request concurrency from `MAX_TASKS`, otherwise half the number
/// of CPUs clamped to 2..=8.
pub fn max_tasks() -> usize {
    std::env::var("MAX_TASKS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|n| *n > 0)
        .unwrap_or_else(|| {
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4);
            (cpus / 2).clamp(2, 8)
        })
}

/// How chunked remote fetches are executed. Results are identical for both
/// strategies; only the request pattern differs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Up to `concurrency` chunks in flight, reassembled in request order.
    Bulk { concurrency: usize },
    /// One chunk at a time.
    Batched,
}

impl Default for FetchStrategy {
    fn default() -> Self {
        FetchStrategy::Bulk {
            concurrency: max_tasks(),
        }
    }
}

impl FromStr for FetchStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bulk" => Ok(FetchStrategy::default()),
            "batched" | "sync" => Ok(FetchStrategy::Batched),
            other => Err(Error::InvalidParameters(format!(
                "unknown fetch strategy {:?}, expected bulk or batched",
                other
            ))),
        }
    }
}

impl std::fmt::Display for FetchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchStrategy::Bulk { concurrency } => write!(f, "bulk({})", concurrency),
            FetchStrategy::Batched => write!(f, "batched"),
        }
    }
}

/// Fetches `items` in chunks of `chunk_size` and concatenates the results
/// in input order.
///
/// Every chunk must yield exactly one result per input; a short or long
/// answer is an [`Error::InvalidResponse`]. The first failing chunk aborts
/// the whole fetch. `progress` advances by the chunk length as chunks
/// complete.
pub async fn fetch_chunked<T, R, F, Fut>(
    items: &[T],
    chunk_size: usize,
    strategy: FetchStrategy,
    progress: &dyn ProgressReporter,
    fetch: F,
) -> Result<Vec<R>, Error>
where
    T: Clone,
    F: Fn(Vec<T>) -> Fut,
    Fut: Future<Output = Result<Vec<R>, Error>>,
{
    let chunk_size = chunk_size.max(1);
    let checked = |chunk: Vec<T>| {
        let expected = chunk.len();
        let fut = fetch(chunk);
        async move {
            let results = fut.await?;
            if results.len() != expected {
                log::error!(
                    "chunk fetch returned {} results for {} items",
                    results.len(),
                    expected
                );
                return Err(Error::InvalidResponse);
            }
            progress.report(expected as u64);
            Ok(results)
        }
    };

    // Owned chunks keep the streamed futures free of borrowed slices.
    let chunks: Vec<Vec<T>> = items.chunks(chunk_size).map(<[T]>::to_vec).collect();
    let mut out = Vec::with_capacity(items.len());
    match strategy {
        FetchStrategy::Batched => {
            for chunk in chunks {
                out.extend(checked(chunk).await?);
            }
        }
        FetchStrategy::Bulk { concurrency } => {
            let chunks: Vec<Vec<R>> = futures::stream::iter(chunks)
                .map(checked)
                .buffered(concurrency.max(1))
                .try_collect()
                .await?;
            out.extend(chunks.into_iter().flatten());
        }
    }
    Ok(out)
}
