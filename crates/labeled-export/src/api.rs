// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// Declares a numeric identifier newtype for a platform entity.
///
/// The platform addresses every entity by a plain unsigned integer, so all
/// identifiers share the same representation: transparent serde, decimal
/// display and parsing, and lossless conversion from and to `u64`.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                $name(id)
            }
        }

        impl From<$name> for u64 {
            fn from(val: $name) -> Self {
                val.0
            }
        }

        impl $name {
            pub fn value(&self) -> u64 {
                self.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(Error::InvalidParameters(format!(
                        "{} ID must not be empty",
                        $label
                    )));
                }
                Ok($name(trimmed.parse()?))
            }
        }

        impl TryFrom<&str> for $name {
            type Error = Error;

            fn try_from(s: &str) -> Result<Self, Self::Error> {
                $name::from_str(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                $name::from_str(&s)
            }
        }
    };
}

entity_id!(
    /// Identifier of a team; team files and tasks are scoped by team.
    TeamID,
    "Team"
);
entity_id!(
    /// Identifier of a workspace within a team.
    WorkspaceID,
    "Workspace"
);
entity_id!(
    /// Identifier of a project.
    ///
    /// ```rust
    /// use labeled_export::ProjectID;
    /// use std::str::FromStr;
    ///
    /// let id = ProjectID::from_str("4242").unwrap();
    /// assert_eq!(id.value(), 4242);
    /// assert_eq!(id.to_string(), "4242");
    /// ```
    ProjectID,
    "Project"
);
entity_id!(
    /// Identifier of a dataset.
    DatasetID,
    "Dataset"
);
entity_id!(
    /// Identifier of an image, video or point cloud.
    ItemId,
    "Item"
);
entity_id!(
    /// Identifier of an image bound to a point cloud.
    RelatedImageId,
    "Related image"
);
entity_id!(
    /// Identifier of the running task the export reports its output to.
    TaskID,
    "Task"
);
entity_id!(
    /// Identifier of a file in team files.
    FileId,
    "File"
);

/// The modality of a project and of every item it contains.
///
/// The platform reports it as the project `type` string (`images`, `videos`,
/// `point_clouds`); any other project type is rejected.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ItemType {
    Image,
    Video,
    Pointcloud,
}

impl ItemType {
    /// Project type string reported by the platform.
    pub fn project_type(&self) -> &'static str {
        match self {
            ItemType::Image => "images",
            ItemType::Video => "videos",
            ItemType::Pointcloud => "point_clouds",
        }
    }

    /// API namespace for item level methods (`<namespace>.list`, ...).
    pub(crate) fn api_namespace(&self) -> &'static str {
        match self {
            ItemType::Image => "images",
            ItemType::Video => "videos",
            ItemType::Pointcloud => "point-clouds",
        }
    }

    /// Name of the per-dataset directory holding the media files.
    pub fn item_dir(&self) -> &'static str {
        match self {
            ItemType::Image => "img",
            ItemType::Video => "video",
            ItemType::Pointcloud => "pointcloud",
        }
    }

    /// Request size used by the batched fetch strategy.
    pub fn batch_size(&self) -> usize {
        match self {
            ItemType::Image | ItemType::Video => 10,
            ItemType::Pointcloud => 1,
        }
    }

    /// Whether annotations of this modality carry key/id references that
    /// must be tracked in a project-wide `KeyIdMap`.
    pub fn uses_key_id_map(&self) -> bool {
        matches!(self, ItemType::Video | ItemType::Pointcloud)
    }
}

impl Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            ItemType::Image => "image",
            ItemType::Video => "video",
            ItemType::Pointcloud => "point cloud",
        };
        write!(f, "{}", value)
    }
}

impl TryFrom<&str> for ItemType {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "images" => Ok(ItemType::Image),
            "videos" => Ok(ItemType::Video),
            "point_clouds" => Ok(ItemType::Pointcloud),
            other => Err(Error::UnsupportedProjectType(other.to_string())),
        }
    }
}

/// Project information as returned by `projects.info`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProjectInfo {
    id: ProjectID,
    name: String,
    #[serde(rename = "type")]
    project_type: String,
    #[serde(rename = "teamId", default)]
    team_id: Option<TeamID>,
    #[serde(rename = "workspaceId", default)]
    workspace_id: Option<WorkspaceID>,
    #[serde(rename = "itemsCount", default)]
    items_count: Option<u64>,
}

impl Display for ProjectInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {} [{}]", self.id, self.name, self.project_type)
    }
}

impl ProjectInfo {
    pub fn new(id: ProjectID, name: &str, project_type: &str) -> Self {
        ProjectInfo {
            id,
            name: name.to_owned(),
            project_type: project_type.to_owned(),
            team_id: None,
            workspace_id: None,
            items_count: None,
        }
    }

    pub fn id(&self) -> ProjectID {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn project_type(&self) -> &str {
        &self.project_type
    }

    /// Resolves the project type string into an [`ItemType`].
    pub fn item_type(&self) -> Result<ItemType, Error> {
        ItemType::try_from(self.project_type.as_str())
    }

    pub fn team_id(&self) -> Option<TeamID> {
        self.team_id
    }

    pub fn workspace_id(&self) -> Option<WorkspaceID> {
        self.workspace_id
    }

    pub fn items_count(&self) -> Option<u64> {
        self.items_count
    }
}

/// Dataset information as returned by `datasets.list`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DatasetInfo {
    id: DatasetID,
    name: String,
    #[serde(rename = "parentId", default)]
    parent_id: Option<DatasetID>,
    #[serde(rename = "itemsCount", default)]
    items_count: Option<u64>,
}

impl Display for DatasetInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.id, self.name)
    }
}

impl DatasetInfo {
    pub fn new(id: DatasetID, name: &str, parent_id: Option<DatasetID>) -> Self {
        DatasetInfo {
            id,
            name: name.to_owned(),
            parent_id,
            items_count: None,
        }
    }

    pub fn id(&self) -> DatasetID {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent_id(&self) -> Option<DatasetID> {
        self.parent_id
    }

    pub fn items_count(&self) -> Option<u64> {
        self.items_count
    }
}

/// Arranges a flat dataset listing into depth-first order, pairing every
/// dataset with the names of its ancestors (outermost first).
///
/// Siblings keep the order of the listing. Datasets whose parent is not part
/// of the listing are treated as roots.
pub fn dataset_tree(datasets: Vec<DatasetInfo>) -> Vec<(Vec<String>, DatasetInfo)> {
    use std::collections::HashSet;

    let known: HashSet<DatasetID> = datasets.iter().map(|d| d.id).collect();
    let mut ordered = Vec::with_capacity(datasets.len());
    let mut stack: Vec<(Vec<String>, &DatasetInfo)> = datasets
        .iter()
        .rev()
        .filter(|d| d.parent_id.is_none_or(|p| !known.contains(&p)))
        .map(|d| (Vec::new(), d))
        .collect();

    while let Some((parents, dataset)) = stack.pop() {
        let mut child_parents = parents.clone();
        child_parents.push(dataset.name.clone());
        stack.extend(
            datasets
                .iter()
                .rev()
                .filter(|d| d.parent_id == Some(dataset.id))
                .map(|d| (child_parents.clone(), d)),
        );
        ordered.push((parents, dataset.clone()));
    }

    ordered
}

/// Item (image, video or point cloud) information from a listing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ItemInfo {
    id: ItemId,
    name: String,
}

impl Display for ItemInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.id, self.name)
    }
}

impl ItemInfo {
    pub fn new(id: ItemId, name: &str) -> Self {
        ItemInfo {
            id,
            name: name.to_owned(),
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An image bound to a point cloud.
///
/// The full record returned by the platform is kept verbatim because it is
/// written next to the downloaded image as its metadata file.
#[derive(Clone, Debug, PartialEq)]
pub struct RelatedImageInfo {
    id: RelatedImageId,
    name: String,
    record: serde_json::Value,
}

impl RelatedImageInfo {
    /// Builds the info from the raw record, which must carry `id` and
    /// `name`.
    pub fn from_record(record: serde_json::Value) -> Result<Self, Error> {
        let id = record
            .get("id")
            .and_then(|v| v.as_u64())
            .ok_or(Error::InvalidResponse)?;
        let name = record
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or(Error::InvalidResponse)?
            .to_owned();
        Ok(RelatedImageInfo {
            id: id.into(),
            name,
            record,
        })
    }

    pub fn id(&self) -> RelatedImageId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self) -> &serde_json::Value {
        &self.record
    }
}

/// A file stored in team files.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FileInfo {
    id: FileId,
    #[serde(default)]
    name: String,
    path: String,
    #[serde(rename = "sizeb", default)]
    size: Option<u64>,
}

impl Display for FileInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {}", self.id, self.path)
    }
}

impl FileInfo {
    pub fn new(id: FileId, path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_owned();
        FileInfo {
            id,
            name,
            path: path.to_owned(),
            size: None,
        }
    }

    pub fn id(&self) -> FileId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }
}

/// One page of a paginated listing.
#[derive(Deserialize, Debug)]
pub(crate) struct Page<T> {
    #[serde(default)]
    pub total: u64,
    #[serde(rename = "pagesCount", default)]
    pub pages_count: u64,
    pub entities: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_id_from_str_valid() {
        let id = ProjectID::from_str("4242").unwrap();
        assert_eq!(id.value(), 4242);
        assert_eq!(format!("{}", id), "4242");
    }

    #[test]
    fn test_project_id_from_str_trims_whitespace() {
        let id = ProjectID::try_from(" 17\n").unwrap();
        assert_eq!(u64::from(id), 17);
    }

    #[test]
    fn test_project_id_from_str_empty() {
        match ProjectID::from_str("  ") {
            Err(Error::InvalidParameters(msg)) => assert!(msg.contains("Project ID")),
            other => panic!("Expected InvalidParameters error, got {:?}", other),
        }
    }

    #[test]
    fn test_dataset_id_from_str_invalid_number() {
        assert!(matches!(
            DatasetID::try_from("ds-12".to_string()),
            Err(Error::ParseIntError(_))
        ));
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&ItemId::from(9)).unwrap();
        assert_eq!(json, "9");
        let id: TaskID = serde_json::from_str("31").unwrap();
        assert_eq!(id.value(), 31);
    }

    #[test]
    fn test_item_type_from_project_type() {
        assert_eq!(ItemType::try_from("images").unwrap(), ItemType::Image);
        assert_eq!(ItemType::try_from("videos").unwrap(), ItemType::Video);
        assert_eq!(
            ItemType::try_from("point_clouds").unwrap(),
            ItemType::Pointcloud
        );
        assert!(matches!(
            ItemType::try_from("volumes"),
            Err(Error::UnsupportedProjectType(t)) if t == "volumes"
        ));
    }

    #[test]
    fn test_item_type_batch_sizes() {
        assert_eq!(ItemType::Image.batch_size(), 10);
        assert_eq!(ItemType::Video.batch_size(), 10);
        assert_eq!(ItemType::Pointcloud.batch_size(), 1);
        assert!(!ItemType::Image.uses_key_id_map());
        assert!(ItemType::Pointcloud.uses_key_id_map());
    }

    #[test]
    fn test_project_info_deserialize() {
        let info: ProjectInfo = serde_json::from_str(
            r#"{"id": 5, "name": "Cars", "type": "videos", "teamId": 2, "workspaceId": 3}"#,
        )
        .unwrap();
        assert_eq!(info.id().value(), 5);
        assert_eq!(info.item_type().unwrap(), ItemType::Video);
        assert_eq!(info.team_id(), Some(TeamID::from(2)));
        assert_eq!(info.items_count(), None);
    }

    #[test]
    fn test_related_image_from_record() {
        let record = serde_json::json!({"id": 11, "name": "cam0.png", "entityId": 4});
        let info = RelatedImageInfo::from_record(record.clone()).unwrap();
        assert_eq!(info.id().value(), 11);
        assert_eq!(info.name(), "cam0.png");
        assert_eq!(info.record(), &record);

        let missing = serde_json::json!({"id": 11});
        assert!(RelatedImageInfo::from_record(missing).is_err());
    }

    #[test]
    fn test_file_info_name_from_path() {
        let info = FileInfo::new(FileId::from(3), "/tmp/export/1_cars.tar.gz");
        assert_eq!(info.name(), "1_cars.tar.gz");
    }

    #[test]
    fn test_dataset_tree_depth_first() {
        let datasets = vec![
            DatasetInfo::new(1.into(), "root", None),
            DatasetInfo::new(2.into(), "other", None),
            DatasetInfo::new(3.into(), "child", Some(1.into())),
            DatasetInfo::new(4.into(), "grandchild", Some(3.into())),
            DatasetInfo::new(5.into(), "orphan", Some(99.into())),
        ];
        let tree = dataset_tree(datasets);
        let names: Vec<(Vec<String>, &str)> = tree
            .iter()
            .map(|(parents, d)| (parents.clone(), d.name()))
            .collect();
        assert_eq!(
            names,
            vec![
                (vec![], "root"),
                (vec!["root".to_string()], "child"),
                (vec!["root".to_string(), "child".to_string()], "grandchild"),
                (vec![], "other"),
                (vec![], "orphan"),
            ]
        );
    }
}
