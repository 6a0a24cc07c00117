// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Local project layout.
//!
//! ```text
//! <project>/
//!   meta.json
//!   key_id_map.json                  (videos, point clouds)
//!   <dataset>/
//!     ann/<item>.json
//!     img|video|pointcloud/<item>
//!     related_images/<item_with_dots_replaced>/<image>{,.json}
//!     datasets/<child dataset>/...
//! ```
//!
//! All JSON is written pretty-printed from `serde_json` values so repeated
//! exports of the same remote state produce identical files.

use crate::{Error, ItemType, KeyIdMap};
use serde_json::Value;
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};
use tokio::fs;

/// Turns a remote name into a single path component. Only separators and
/// NUL are rewritten; `.`, `..` and blank names become `unnamed`.
pub(crate) fn sanitize_path_component(name: &str) -> String {
    if name.trim().is_empty() {
        return "unnamed".to_string();
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            _ => c,
        })
        .collect();

    if sanitized == "." || sanitized == ".." {
        "unnamed".to_string()
    } else {
        sanitized
    }
}

/// First of `name`, `<stem>_1.<ext>`, `<stem>_2.<ext>`, ... that `is_taken`
/// rejects.
pub(crate) fn unique_name(name: &str, is_taken: impl Fn(&str) -> bool) -> String {
    if !is_taken(name) {
        return name.to_owned();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    (1..)
        .map(|n| format!("{}_{}{}", stem, n, ext))
        .find(|candidate| !is_taken(candidate))
        .unwrap_or_else(|| name.to_owned())
}

async fn write_json(path: &Path, value: &Value) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut data = serde_json::to_vec_pretty(value)?;
    data.push(b'\n');
    fs::write(path, data).await?;
    Ok(())
}

/// Writer for the local project directory.
#[derive(Debug)]
pub struct ProjectWriter {
    dir: PathBuf,
    item_type: ItemType,
}

impl ProjectWriter {
    /// Creates an empty project directory, removing anything previously
    /// stored at `dir`.
    pub async fn create(dir: &Path, item_type: ItemType) -> Result<Self, Error> {
        if fs::try_exists(dir).await? {
            log::debug!("removing previous export at {:?}", dir);
            fs::remove_dir_all(dir).await?;
        }
        fs::create_dir_all(dir).await?;
        Ok(ProjectWriter {
            dir: dir.to_path_buf(),
            item_type,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join("meta.json")
    }

    pub async fn set_meta(&self, meta: &Value) -> Result<(), Error> {
        write_json(&self.meta_path(), meta).await
    }

    pub async fn set_key_id_map(&self, map: &KeyIdMap) -> Result<(), Error> {
        write_json(&self.dir.join("key_id_map.json"), &map.to_json()).await
    }

    /// Creates the directory of a dataset. Nested datasets live below
    /// `<parent>/datasets/`.
    pub async fn create_dataset(
        &self,
        name: &str,
        parents: &[String],
    ) -> Result<DatasetWriter, Error> {
        let mut dir = self.dir.clone();
        for (depth, parent) in parents.iter().enumerate() {
            if depth > 0 {
                dir.push("datasets");
            }
            dir.push(sanitize_path_component(parent));
        }
        if !parents.is_empty() {
            dir.push("datasets");
        }
        dir.push(sanitize_path_component(name));

        fs::create_dir_all(&dir).await?;
        Ok(DatasetWriter {
            name: name.to_owned(),
            dir,
            item_type: self.item_type,
            used: HashSet::new(),
        })
    }
}

/// Writer for one dataset directory.
///
/// Item files are addressed by a local name obtained from
/// [`reserve_item_name`](Self::reserve_item_name), unique within the dataset.
#[derive(Debug, Clone)]
pub struct DatasetWriter {
    name: String,
    dir: PathBuf,
    item_type: ItemType,
    used: HashSet<String>,
}

impl DatasetWriter {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserves the local name of an item. Distinct remote names that map
    /// to the same file (`a/b.png`, `a_b.png`) get a numbered suffix.
    pub fn reserve_item_name(&mut self, item_name: &str) -> String {
        let sanitized = sanitize_path_component(item_name);
        let local = unique_name(&sanitized, |candidate| self.is_used(candidate));
        if local != sanitized {
            log::warn!(
                "Item {} collides with an item already in dataset {}, writing it as {}",
                item_name,
                self.name,
                local
            );
        }
        let related_key = self.related_key(&local);
        self.used.insert(related_key);
        self.used.insert(local.clone());
        local
    }

    fn is_used(&self, local: &str) -> bool {
        self.used.contains(local) || self.used.contains(&self.related_key(local))
    }

    /// Point clouds also claim their related images directory, which folds
    /// dots into underscores.
    fn related_key(&self, local: &str) -> String {
        match self.item_type {
            ItemType::Pointcloud => format!("related_images/{}", local.replace('.', "_")),
            _ => local.to_owned(),
        }
    }

    /// Canonical media path of an item.
    pub fn generate_item_path(&self, item_name: &str) -> PathBuf {
        self.dir
            .join(self.item_type.item_dir())
            .join(sanitize_path_component(item_name))
    }

    pub fn annotation_path(&self, item_name: &str) -> PathBuf {
        self.dir
            .join("ann")
            .join(format!("{}.json", sanitize_path_component(item_name)))
    }

    /// Directory for the images related to a point cloud.
    pub fn related_images_path(&self, item_name: &str) -> PathBuf {
        self.dir
            .join("related_images")
            .join(sanitize_path_component(item_name).replace('.', "_"))
    }

    /// Writes media bytes and the annotation of an item.
    pub async fn add_item_raw_bytes(
        &self,
        item_name: &str,
        data: &[u8],
        annotation: &Value,
    ) -> Result<PathBuf, Error> {
        let path = self.generate_item_path(item_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        write_json(&self.annotation_path(item_name), annotation).await?;
        Ok(path)
    }

    /// Registers an item whose media was already written to
    /// [`generate_item_path`](Self::generate_item_path).
    pub async fn add_item_file(&self, item_name: &str, annotation: &Value) -> Result<(), Error> {
        let path = self.generate_item_path(item_name);
        if !fs::try_exists(&path).await? {
            return Err(Error::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("item media missing at {:?}", path),
            )));
        }
        write_json(&self.annotation_path(item_name), annotation).await
    }

    /// Writes only the annotation of an item.
    pub async fn write_annotation_only(
        &self,
        item_name: &str,
        annotation: &Value,
    ) -> Result<(), Error> {
        write_json(&self.annotation_path(item_name), annotation).await
    }

    /// Writes the metadata record of a related image and returns the path
    /// the image itself must be stored at.
    pub async fn add_related_image_meta(
        &self,
        item_name: &str,
        image_name: &str,
        record: &Value,
    ) -> Result<PathBuf, Error> {
        let dir = self.related_images_path(item_name);
        let image = sanitize_path_component(image_name);
        write_json(&dir.join(format!("{}.json", image)), record).await?;
        Ok(dir.join(image))
    }

    /// Removes whatever was written for an item that failed midway and
    /// releases its local name.
    pub(crate) async fn discard_item(&mut self, item_name: &str) {
        let paths = [
            self.generate_item_path(item_name),
            self.annotation_path(item_name),
        ];
        for path in paths {
            if let Err(err) = fs::remove_file(&path).await
                && err.kind() != std::io::ErrorKind::NotFound
            {
                log::debug!("could not remove {:?}: {}", path, err);
            }
        }
        let related = self.related_images_path(item_name);
        if fs::try_exists(&related).await.unwrap_or(false)
            && let Err(err) = fs::remove_dir_all(&related).await
        {
            log::debug!("could not remove {:?}: {}", related, err);
        }
        let related_key = self.related_key(item_name);
        self.used.remove(&related_key);
        self.used.remove(item_name);
    }
}
