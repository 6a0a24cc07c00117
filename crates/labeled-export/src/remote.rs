// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Collaborator seams of the export pipeline.
//!
//! [`Remote`] is the read side (project, datasets, items, annotations and
//! media), [`OutputSink`] the write side (team files upload and task output
//! registration). Both record their end of the task workflow: the project
//! read and the file produced. [`Client`](crate::Client) and [`TeamFiles`](crate::TeamFiles)
//! implement them against the platform HTTP API.

use crate::{
    DatasetID, DatasetInfo, Error, FileInfo, ItemId, ItemInfo, ItemType, ProgressReporter,
    ProjectID, ProjectInfo, RelatedImageId, RelatedImageInfo, TaskID,
};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

#[async_trait]
pub trait Remote: Send + Sync {
    /// Project info, or `None` when the project does not exist.
    async fn project_info(&self, id: ProjectID) -> Result<Option<ProjectInfo>, Error>;

    /// Raw project meta (`classes`, `tags`).
    async fn project_meta(&self, id: ProjectID) -> Result<Value, Error>;

    /// Datasets of the project in depth-first order, each paired with the
    /// names of its ancestors.
    async fn dataset_tree(&self, id: ProjectID) -> Result<Vec<(Vec<String>, DatasetInfo)>, Error>;

    async fn list_items(&self, kind: ItemType, dataset: DatasetID) -> Result<Vec<ItemInfo>, Error>;

    /// Raw annotations, index-aligned with `ids`.
    async fn download_annotations(
        &self,
        kind: ItemType,
        dataset: DatasetID,
        ids: &[ItemId],
    ) -> Result<Vec<Value>, Error>;

    async fn download_item_bytes(&self, kind: ItemType, id: ItemId) -> Result<Vec<u8>, Error>;

    /// Streams the item payload into `path`.
    async fn download_item_to_path(
        &self,
        kind: ItemType,
        id: ItemId,
        path: &Path,
    ) -> Result<(), Error>;

    /// Images bound to a point cloud. Possibly empty.
    async fn related_images(&self, pointcloud: ItemId) -> Result<Vec<RelatedImageInfo>, Error>;

    async fn download_related_image(&self, id: RelatedImageId, path: &Path) -> Result<(), Error>;

    /// Records `project` as a workflow input of `task`.
    async fn register_workflow_input(&self, task: TaskID, project: ProjectID) -> Result<(), Error>;
}

#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Uploads every file below `local` to `remote_dir`, keeping the relative
    /// layout. Returns the remote directory actually used. Progress is
    /// reported in bytes.
    async fn upload_directory(
        &self,
        local: &Path,
        remote_dir: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<String, Error>;

    async fn file_info(&self, remote_path: &str) -> Result<Option<FileInfo>, Error>;

    /// Registers `file` as the output of the running task, displayed as
    /// `directory`. A no-op outside of a task.
    async fn register_output(&self, file: &FileInfo, directory: &str) -> Result<(), Error>;

    /// Records `file` as a workflow output of the running task. A no-op
    /// outside of a task.
    async fn register_workflow_output(&self, file: &FileInfo) -> Result<(), Error>;
}
