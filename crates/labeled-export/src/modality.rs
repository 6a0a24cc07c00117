// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Per item type behavior of the export.
//!
//! A [`Modality`] is selected once per project with [`for_item_type`]. The
//! listing, annotation fetch and emptiness test are shared; how a labeled
//! item is materialized differs:
//!
//! - images are fetched as bytes and written with their raw annotation,
//! - videos are streamed to disk and written with the decoded annotation,
//! - point clouds behave like videos and additionally carry their related
//!   images.
//!
//! Without media download every modality writes the raw annotation only.

use crate::{
    Annotation, DatasetInfo, DatasetWriter, DecodeError, Error, FetchStrategy, ItemId, ItemInfo,
    ItemType, KeyIdMap, ProgressReporter, ProjectMeta, Remote, annotation,
    bulk::fetch_chunked,
    writer::{sanitize_path_component, unique_name},
};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::{collections::HashSet, path::PathBuf};

/// A labeled item ready to be materialized.
#[derive(Debug, Clone)]
pub struct LabeledItem {
    pub info: ItemInfo,
    pub raw: Value,
    pub annotation: Annotation,
}

/// Outcome of materializing the labeled items of one dataset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MaterializeReport {
    pub written: usize,
    pub failed: usize,
}

/// Shared state for materialization.
pub struct MaterializeContext<'a> {
    pub remote: &'a dyn Remote,
    pub strategy: FetchStrategy,
    pub download_items: bool,
    pub progress: &'a dyn ProgressReporter,
}

impl MaterializeContext<'_> {
    /// Number of media downloads in flight at once.
    fn media_chunk(&self, item_type: ItemType) -> usize {
        match self.strategy {
            FetchStrategy::Bulk { concurrency } => concurrency.max(1),
            FetchStrategy::Batched => item_type.batch_size(),
        }
    }
}

#[async_trait]
pub trait Modality: Send + Sync {
    fn item_type(&self) -> ItemType;

    async fn list_items(
        &self,
        remote: &dyn Remote,
        dataset: &DatasetInfo,
    ) -> Result<Vec<ItemInfo>, Error> {
        remote.list_items(self.item_type(), dataset.id()).await
    }

    /// Raw annotations, index-aligned with `items`.
    async fn fetch_annotations(
        &self,
        remote: &dyn Remote,
        dataset: &DatasetInfo,
        items: &[ItemInfo],
        strategy: FetchStrategy,
        progress: &dyn ProgressReporter,
    ) -> Result<Vec<Value>, Error> {
        let kind = self.item_type();
        let dataset_id = dataset.id();
        let ids: Vec<ItemId> = items.iter().map(|item| item.id()).collect();
        fetch_chunked(&ids, kind.batch_size(), strategy, progress, |chunk| async move {
            remote.download_annotations(kind, dataset_id, &chunk).await
        })
        .await
    }

    fn is_empty(&self, raw: &Value) -> bool {
        annotation::is_empty(self.item_type(), raw)
    }

    /// Classifies one item. Returns `None` for an unlabeled item and the
    /// decoded annotation otherwise.
    fn classify(
        &self,
        item: &ItemInfo,
        raw: &Value,
        meta: &ProjectMeta,
        key_id_map: &mut KeyIdMap,
    ) -> Result<Option<Annotation>, DecodeError> {
        if self.is_empty(raw) {
            return Ok(None);
        }
        Annotation::decode(self.item_type(), raw, meta, key_id_map, Some(item.id())).map(Some)
    }

    /// Writes one downloaded item under its reserved `local_name`.
    async fn write_item(
        &self,
        ctx: &MaterializeContext<'_>,
        writer: &DatasetWriter,
        item: &LabeledItem,
        local_name: &str,
        media: Media,
    ) -> Result<(), Error>;

    /// Fetches the media of one item.
    async fn fetch_media(
        &self,
        ctx: &MaterializeContext<'_>,
        writer: &DatasetWriter,
        item: &ItemInfo,
        local_name: &str,
    ) -> Result<Media, Error> {
        let path = writer.generate_item_path(local_name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        ctx.remote
            .download_item_to_path(self.item_type(), item.id(), &path)
            .await?;
        Ok(Media::File(path))
    }

    /// Writes the labeled items of a dataset. Item failures are logged and
    /// counted, never propagated.
    async fn materialize(
        &self,
        ctx: &MaterializeContext<'_>,
        writer: &mut DatasetWriter,
        items: &[LabeledItem],
    ) -> MaterializeReport {
        let mut report = MaterializeReport::default();

        if !ctx.download_items {
            for item in items {
                let local_name = writer.reserve_item_name(item.info.name());
                match writer.write_annotation_only(&local_name, &item.raw).await {
                    Ok(()) => report.written += 1,
                    Err(err) => {
                        warn_item_failed(writer, &item.info, &err);
                        report.failed += 1;
                    }
                }
                ctx.progress.report(1);
            }
            return report;
        }

        for chunk in items.chunks(ctx.media_chunk(self.item_type())) {
            let local_names: Vec<String> = chunk
                .iter()
                .map(|item| writer.reserve_item_name(item.info.name()))
                .collect();

            let shared: &DatasetWriter = writer;
            let media = join_all(chunk.iter().zip(&local_names).map(|(item, local_name)| {
                self.fetch_media(ctx, shared, &item.info, local_name)
            }))
            .await;

            for ((item, local_name), media) in chunk.iter().zip(&local_names).zip(media) {
                let result = match media {
                    Ok(media) => self.write_item(ctx, writer, item, local_name, media).await,
                    Err(err) => Err(err),
                };
                match result {
                    Ok(()) => report.written += 1,
                    Err(err) => {
                        warn_item_failed(writer, &item.info, &err);
                        writer.discard_item(local_name).await;
                        report.failed += 1;
                    }
                }
                ctx.progress.report(1);
            }
        }

        report
    }
}

/// Media of a downloaded item.
#[derive(Debug)]
pub enum Media {
    Bytes(Vec<u8>),
    /// Already stored at its canonical path.
    File(PathBuf),
}

fn warn_item_failed(writer: &DatasetWriter, item: &ItemInfo, err: &Error) {
    log::warn!(
        "Failed to export item {} from dataset {}: {}. Skipping.",
        item.name(),
        writer.name(),
        err
    );
}

pub struct ImageModality;

#[async_trait]
impl Modality for ImageModality {
    fn item_type(&self) -> ItemType {
        ItemType::Image
    }

    async fn fetch_media(
        &self,
        ctx: &MaterializeContext<'_>,
        _writer: &DatasetWriter,
        item: &ItemInfo,
        _local_name: &str,
    ) -> Result<Media, Error> {
        let data = ctx
            .remote
            .download_item_bytes(ItemType::Image, item.id())
            .await?;
        Ok(Media::Bytes(data))
    }

    async fn write_item(
        &self,
        _ctx: &MaterializeContext<'_>,
        writer: &DatasetWriter,
        item: &LabeledItem,
        local_name: &str,
        media: Media,
    ) -> Result<(), Error> {
        let Media::Bytes(data) = media else {
            return Err(Error::InvalidParameters(format!(
                "image {} must be fetched as bytes",
                item.info.name()
            )));
        };
        writer.add_item_raw_bytes(local_name, &data, &item.raw).await?;
        Ok(())
    }
}

pub struct VideoModality;

#[async_trait]
impl Modality for VideoModality {
    fn item_type(&self) -> ItemType {
        ItemType::Video
    }

    async fn write_item(
        &self,
        _ctx: &MaterializeContext<'_>,
        writer: &DatasetWriter,
        item: &LabeledItem,
        local_name: &str,
        _media: Media,
    ) -> Result<(), Error> {
        writer
            .add_item_file(local_name, &item.annotation.to_json()?)
            .await
    }
}

pub struct PointcloudModality;

#[async_trait]
impl Modality for PointcloudModality {
    fn item_type(&self) -> ItemType {
        ItemType::Pointcloud
    }

    async fn write_item(
        &self,
        ctx: &MaterializeContext<'_>,
        writer: &DatasetWriter,
        item: &LabeledItem,
        local_name: &str,
        _media: Media,
    ) -> Result<(), Error> {
        writer
            .add_item_file(local_name, &item.annotation.to_json()?)
            .await?;

        let related = ctx.remote.related_images(item.info.id()).await?;
        let mut image_names: HashSet<String> = HashSet::new();
        for image in &related {
            let image_name = unique_name(&sanitize_path_component(image.name()), |name| {
                image_names.contains(name)
            });
            image_names.insert(image_name.clone());
            let path = writer
                .add_related_image_meta(local_name, &image_name, image.record())
                .await?;
            ctx.remote.download_related_image(image.id(), &path).await?;
        }
        if !related.is_empty() {
            log::debug!(
                "{} related images written for {}",
                related.len(),
                item.info.name()
            );
        }
        Ok(())
    }
}

/// Selects the modality of a project.
pub fn for_item_type(item_type: ItemType) -> Box<dyn Modality> {
    match item_type {
        ItemType::Image => Box::new(ImageModality),
        ItemType::Video => Box::new(VideoModality),
        ItemType::Pointcloud => Box::new(PointcloudModality),
    }
}
