// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! # Labeled Items Export
//!
//! Exports only the labeled items of an annotation platform project (images,
//! videos or point clouds) into a local project directory, then uploads the
//! result to team files, archived and split when it is large.
//!
//! ## Pipeline
//!
//! - **List**: the datasets of the project are walked in tree order and
//!   their items listed.
//! - **Fetch**: annotations are fetched in chunks, either concurrently
//!   ([`FetchStrategy::Bulk`]) or one chunk at a time
//!   ([`FetchStrategy::Batched`]).
//! - **Classify**: an item is labeled when its annotation has objects or
//!   tags (videos: or frames, point clouds: or figures).
//! - **Materialize**: labeled items are written with their media and, for
//!   point clouds, their related images.
//! - **Package**: the result is uploaded as a directory below the size
//!   limit, as a split `tar.gz` archive above it, and registered as the task
//!   output.
//!
//! The platform is reached through the [`Remote`] and [`OutputSink`] traits,
//! implemented by [`Client`] and [`TeamFiles`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use labeled_export::{Client, Error, ExportConfig, LogProgress, TeamFiles, config::Overrides};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let config = ExportConfig::load(None, &Overrides::default())?;
//!     let client = Client::from_config(&config)?;
//!     let team_id = config
//!         .team_id()
//!         .ok_or_else(|| Error::MissingConfig("TEAM_ID".to_string()))?;
//!     let sink = TeamFiles::new(client.clone(), team_id, config.task_id());
//!
//!     let (summary, artifact) =
//!         labeled_export::run(&client, &sink, &config, &LogProgress::new()).await?;
//!     println!("{} labeled items exported to {}", summary.labeled(), artifact.remote_dir());
//!     Ok(())
//! }
//! ```

mod api;
mod client;
mod error;
mod export;
mod key_id_map;
mod progress;
mod remote;
mod retry;
mod writer;

pub mod annotation;
pub mod bulk;
pub mod config;
pub mod modality;
pub mod package;

pub use crate::{
    annotation::{Annotation, DecodeError, ProjectMeta},
    api::{
        DatasetID, DatasetInfo, FileId, FileInfo, ItemId, ItemInfo, ItemType, ProjectID,
        ProjectInfo, RelatedImageId, RelatedImageInfo, TaskID, TeamID, WorkspaceID, dataset_tree,
    },
    bulk::{FetchStrategy, fetch_chunked},
    client::{Client, TeamFiles},
    config::ExportConfig,
    error::Error,
    export::{DatasetReport, ExportSummary, export_project, run},
    key_id_map::{KeyConflict, KeyIdMap, KeyKind},
    package::OutputArtifact,
    progress::{LogProgress, NoProgress, ProgressReporter},
    remote::{OutputSink, Remote},
    retry::{RetryScope, classify_url},
    writer::{DatasetWriter, ProjectWriter},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[ctor::ctor]
    fn init() {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    #[test]
    fn test_error_display() {
        let err = Error::ProjectNotFound(ProjectID::from(12));
        assert_eq!(err.to_string(), "Project with the given ID 12 not found");

        let err: Error = DecodeError::UnknownTag("x".to_string()).into();
        assert!(err.to_string().contains("tag \"x\""));
        assert!(std::error::Error::source(&err).is_some());
    }
}
