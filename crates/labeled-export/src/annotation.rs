// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Project metadata, annotation decoding and the emptiness classifier.
//!
//! Annotations arrive from the platform as JSON documents whose shape
//! depends on the item type:
//!
//! | Item type   | Lists checked for emptiness        |
//! |-------------|------------------------------------|
//! | image       | `objects`, `tags`                  |
//! | video       | `objects`, `tags`, `frames`        |
//! | point cloud | `objects`, `tags`, `figures`       |
//!
//! [`is_empty`] classifies the raw document directly. [`Annotation::decode`]
//! additionally validates the document against the [`ProjectMeta`] and, for
//! videos and point clouds, binds keys and ids in the project [`KeyIdMap`].
//! Geometry is carried through untouched.

use crate::{
    ItemId, ItemType,
    key_id_map::{KeyConflict, KeyIdMap, KeyKind},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Reason an annotation document was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The document does not have the expected structure.
    Schema(String),
    /// An object references a class missing from the project meta.
    UnknownClass(String),
    /// A tag references a tag meta missing from the project meta.
    UnknownTag(String),
    /// A figure references an object that is not part of the annotation.
    UnknownObject(String),
    /// A key is not a valid UUID.
    InvalidKey(String),
    /// A key/id pair contradicts the project key/id map.
    KeyConflict(KeyConflict),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::Schema(msg) => write!(f, "invalid annotation structure: {}", msg),
            DecodeError::UnknownClass(name) => {
                write!(f, "object class {:?} is not defined in project meta", name)
            }
            DecodeError::UnknownTag(name) => {
                write!(f, "tag {:?} is not defined in project meta", name)
            }
            DecodeError::UnknownObject(reference) => {
                write!(f, "figure references unknown object {}", reference)
            }
            DecodeError::InvalidKey(key) => write!(f, "invalid key {:?}", key),
            DecodeError::KeyConflict(conflict) => write!(f, "{}", conflict),
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<KeyConflict> for DecodeError {
    fn from(err: KeyConflict) -> Self {
        DecodeError::KeyConflict(err)
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::Schema(err.to_string())
    }
}

/// Object class definition from the project meta.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjClass {
    title: String,
    #[serde(default)]
    shape: String,
}

impl ObjClass {
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn shape(&self) -> &str {
        &self.shape
    }
}

/// Tag definition from the project meta.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TagMeta {
    name: String,
    #[serde(default)]
    value_type: String,
}

impl TagMeta {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> &str {
        &self.value_type
    }
}

/// Project metadata: object classes and tag definitions.
///
/// Loaded once per export and shared by every decode. The original JSON is
/// kept so that `meta.json` is written exactly as the platform returned it.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectMeta {
    classes: Vec<ObjClass>,
    tag_metas: Vec<TagMeta>,
    class_titles: HashSet<String>,
    tag_names: HashSet<String>,
    raw: Value,
}

#[derive(Deserialize)]
struct ProjectMetaJson {
    #[serde(default)]
    classes: Vec<ObjClass>,
    #[serde(default)]
    tags: Vec<TagMeta>,
}

impl ProjectMeta {
    pub fn from_json(raw: &Value) -> Result<Self, DecodeError> {
        let parsed: ProjectMetaJson = serde_json::from_value(raw.clone())?;
        Ok(ProjectMeta {
            class_titles: parsed.classes.iter().map(|c| c.title.clone()).collect(),
            tag_names: parsed.tags.iter().map(|t| t.name.clone()).collect(),
            classes: parsed.classes,
            tag_metas: parsed.tags,
            raw: raw.clone(),
        })
    }

    pub fn classes(&self) -> &[ObjClass] {
        &self.classes
    }

    pub fn tag_metas(&self) -> &[TagMeta] {
        &self.tag_metas
    }

    /// True when the project defines neither object classes nor tags, in
    /// which case no item can be labeled.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.tag_metas.is_empty()
    }

    pub fn has_class(&self, title: &str) -> bool {
        self.class_titles.contains(title)
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tag_names.contains(name)
    }

    pub fn to_json(&self) -> &Value {
        &self.raw
    }
}

fn list_is_empty(raw: &Value, field: &str) -> bool {
    raw.get(field)
        .and_then(Value::as_array)
        .is_none_or(|list| list.is_empty())
}

/// Classifies a raw annotation document as empty (unlabeled).
///
/// Missing fields count as empty lists.
///
/// ```rust
/// use labeled_export::{ItemType, annotation::is_empty};
/// use serde_json::json;
///
/// assert!(is_empty(ItemType::Image, &json!({"objects": [], "tags": []})));
/// assert!(!is_empty(ItemType::Image, &json!({"objects": [], "tags": [{"name": "ok"}]})));
/// assert!(!is_empty(ItemType::Video, &json!({"objects": [], "tags": [], "frames": [{"index": 0, "figures": []}]})));
/// ```
pub fn is_empty(item_type: ItemType, raw: &Value) -> bool {
    let common = list_is_empty(raw, "objects") && list_is_empty(raw, "tags");
    match item_type {
        ItemType::Image => common,
        ItemType::Video => common && list_is_empty(raw, "frames"),
        ItemType::Pointcloud => common && list_is_empty(raw, "figures"),
    }
}

/// Tag attached to an item, an object or (for videos) a frame range.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Tag {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing)]
    id: Option<u64>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Tag {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

/// Labeled object. Image objects hold their geometry in `extra`; video and
/// point cloud objects are keyed and their geometry lives in figures.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct LabelObject {
    #[serde(rename = "classTitle")]
    class_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing)]
    id: Option<u64>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl LabelObject {
    pub fn class_title(&self) -> &str {
        &self.class_title
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }
}

/// Geometry bound to an object (one frame of a video, or a point cloud).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Figure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default, skip_serializing)]
    id: Option<u64>,
    #[serde(rename = "objectKey", default, skip_serializing_if = "Option::is_none")]
    object_key: Option<String>,
    #[serde(rename = "objectId", default, skip_serializing)]
    object_id: Option<u64>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl Figure {
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn object_key(&self) -> Option<&str> {
        self.object_key.as_deref()
    }
}

/// Figures of a single video frame.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Frame {
    index: u64,
    #[serde(default)]
    figures: Vec<Figure>,
}

impl Frame {
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn figures(&self) -> &[Figure] {
        &self.figures
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ImageAnnotation {
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    objects: Vec<LabelObject>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl ImageAnnotation {
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn objects(&self) -> &[LabelObject] {
        &self.objects
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.tags.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VideoAnnotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    objects: Vec<LabelObject>,
    #[serde(default)]
    frames: Vec<Frame>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl VideoAnnotation {
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn objects(&self) -> &[LabelObject] {
        &self.objects
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.tags.is_empty() && self.frames.is_empty()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PointcloudAnnotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<String>,
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    objects: Vec<LabelObject>,
    #[serde(default)]
    figures: Vec<Figure>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl PointcloudAnnotation {
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn objects(&self) -> &[LabelObject] {
        &self.objects
    }

    pub fn figures(&self) -> &[Figure] {
        &self.figures
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.tags.is_empty() && self.figures.is_empty()
    }
}

/// Decoded annotation of any modality.
#[derive(Clone, Debug, PartialEq)]
pub enum Annotation {
    Image(ImageAnnotation),
    Video(VideoAnnotation),
    Pointcloud(PointcloudAnnotation),
}

impl Annotation {
    /// Decodes and validates a raw annotation document.
    ///
    /// Every object class and tag must be defined in `meta`; every figure
    /// must reference an object of the same annotation. For videos and point
    /// clouds the keys of the annotation, its tags, objects and figures are
    /// normalized (entities without a key receive one derived from their id,
    /// or from `item_id` and their position when they have no id either).
    /// Key/id pairs are recorded in `key_id_map` only when the whole document
    /// decodes. `item_id` is bound to the annotation key when given.
    pub fn decode(
        item_type: ItemType,
        raw: &Value,
        meta: &ProjectMeta,
        key_id_map: &mut KeyIdMap,
        item_id: Option<ItemId>,
    ) -> Result<Annotation, DecodeError> {
        if !raw.is_object() {
            return Err(DecodeError::Schema(
                "annotation must be a JSON object".to_string(),
            ));
        }

        match item_type {
            ItemType::Image => {
                let ann: ImageAnnotation = parse(raw)?;
                validate_tags(&ann.tags, meta)?;
                validate_objects(&ann.objects, meta)?;
                Ok(Annotation::Image(ann))
            }
            ItemType::Video => {
                let mut ann: VideoAnnotation = parse(raw)?;
                validate_tags(&ann.tags, meta)?;
                validate_objects(&ann.objects, meta)?;

                let mut keys = Keyer::new(key_id_map, item_id);
                ann.key = Some(keys.item(ann.key.as_deref())?);
                keys.tags(&mut ann.tags)?;
                let objects = keys.objects(&mut ann.objects)?;
                for frame in &mut ann.frames {
                    keys.figures(&mut frame.figures, &objects)?;
                }
                keys.commit()?;
                Ok(Annotation::Video(ann))
            }
            ItemType::Pointcloud => {
                let mut ann: PointcloudAnnotation = parse(raw)?;
                validate_tags(&ann.tags, meta)?;
                validate_objects(&ann.objects, meta)?;

                let mut keys = Keyer::new(key_id_map, item_id);
                ann.key = Some(keys.item(ann.key.as_deref())?);
                keys.tags(&mut ann.tags)?;
                let objects = keys.objects(&mut ann.objects)?;
                keys.figures(&mut ann.figures, &objects)?;
                keys.commit()?;
                Ok(Annotation::Pointcloud(ann))
            }
        }
    }

    pub fn item_type(&self) -> ItemType {
        match self {
            Annotation::Image(_) => ItemType::Image,
            Annotation::Video(_) => ItemType::Video,
            Annotation::Pointcloud(_) => ItemType::Pointcloud,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Annotation::Image(ann) => ann.is_empty(),
            Annotation::Video(ann) => ann.is_empty(),
            Annotation::Pointcloud(ann) => ann.is_empty(),
        }
    }

    /// Serializes the decoded annotation in its key-based form, ids dropped.
    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        match self {
            Annotation::Image(ann) => serde_json::to_value(ann),
            Annotation::Video(ann) => serde_json::to_value(ann),
            Annotation::Pointcloud(ann) => serde_json::to_value(ann),
        }
    }
}

fn parse<T: DeserializeOwned>(raw: &Value) -> Result<T, DecodeError> {
    Ok(T::deserialize(raw)?)
}

fn validate_tags(tags: &[Tag], meta: &ProjectMeta) -> Result<(), DecodeError> {
    match tags.iter().find(|t| !meta.has_tag(&t.name)) {
        Some(tag) => Err(DecodeError::UnknownTag(tag.name.clone())),
        None => Ok(()),
    }
}

fn validate_objects(objects: &[LabelObject], meta: &ProjectMeta) -> Result<(), DecodeError> {
    for object in objects {
        if !meta.has_class(&object.class_title) {
            return Err(DecodeError::UnknownClass(object.class_title.clone()));
        }
        validate_tags(&object.tags, meta)?;
    }
    Ok(())
}

/// Assigns normalized keys during one decode. Key/id pairs are staged and
/// only reach the project map through [`commit`](Self::commit).
struct Keyer<'a> {
    map: &'a mut KeyIdMap,
    staged: KeyIdMap,
    item_id: Option<u64>,
    position: u64,
}

impl<'a> Keyer<'a> {
    fn new(map: &'a mut KeyIdMap, item_id: Option<ItemId>) -> Self {
        Keyer {
            map,
            staged: KeyIdMap::new(),
            item_id: item_id.map(u64::from),
            position: 0,
        }
    }

    /// Key of the annotated item itself.
    fn item(&mut self, key: Option<&str>) -> Result<String, DecodeError> {
        self.entity(KeyKind::Video, key, self.item_id)
    }

    fn entity(
        &mut self,
        kind: KeyKind,
        key: Option<&str>,
        id: Option<u64>,
    ) -> Result<String, DecodeError> {
        let position = self.position;
        self.position += 1;

        let key = match (key, id) {
            (Some(key), _) => {
                Uuid::parse_str(key).map_err(|_| DecodeError::InvalidKey(key.to_string()))?
            }
            (None, Some(id)) => self
                .staged
                .get_key(kind, id)
                .or_else(|| self.map.get_key(kind, id))
                .unwrap_or_else(|| kind.key_for_id(id)),
            (None, None) => kind.key_for_position(self.item_id, position),
        };
        if let Some(id) = id {
            if let Some(existing) = self.map.get_id(kind, &key)
                && existing != id
            {
                return Err(KeyConflict {
                    kind,
                    key,
                    id,
                    existing,
                }
                .into());
            }
            self.staged.add(kind, key, id)?;
        }
        Ok(key.simple().to_string())
    }

    /// Records the staged pairs in the project map.
    fn commit(self) -> Result<(), DecodeError> {
        self.map.merge(&self.staged)?;
        Ok(())
    }

    fn tags(&mut self, tags: &mut [Tag]) -> Result<(), DecodeError> {
        for tag in tags {
            tag.key = Some(self.entity(KeyKind::Tag, tag.key.as_deref(), tag.id)?);
        }
        Ok(())
    }

    /// Keys every object and returns a lookup from object id to key.
    fn objects(&mut self, objects: &mut [LabelObject]) -> Result<ObjectIndex, DecodeError> {
        let mut index = ObjectIndex::default();
        for object in objects {
            let key = self.entity(KeyKind::Object, object.key.as_deref(), object.id)?;
            if let Some(id) = object.id {
                index.by_id.insert(id, key.clone());
            }
            index.keys.insert(key.clone());
            object.key = Some(key);
            self.tags(&mut object.tags)?;
        }
        Ok(index)
    }

    fn figures(&mut self, figures: &mut [Figure], objects: &ObjectIndex) -> Result<(), DecodeError> {
        for figure in figures {
            let object_key = match (figure.object_key.as_deref(), figure.object_id) {
                (Some(key), _) => Uuid::parse_str(key)
                    .map(|k| k.simple().to_string())
                    .map_err(|_| DecodeError::InvalidKey(key.to_string()))?,
                (None, Some(id)) => objects
                    .by_id
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| DecodeError::UnknownObject(format!("id {}", id)))?,
                (None, None) => {
                    return Err(DecodeError::Schema(
                        "figure has neither objectKey nor objectId".to_string(),
                    ));
                }
            };
            if !objects.keys.contains(&object_key) {
                return Err(DecodeError::UnknownObject(format!("key {}", object_key)));
            }
            figure.object_key = Some(object_key);
            figure.key = Some(self.entity(KeyKind::Figure, figure.key.as_deref(), figure.id)?);
        }
        Ok(())
    }
}

#[derive(Default)]
struct ObjectIndex {
    by_id: HashMap<u64, String>,
    keys: HashSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta() -> ProjectMeta {
        ProjectMeta::from_json(&json!({
            "classes": [
                {"title": "car", "shape": "rectangle"},
                {"title": "cuboid", "shape": "cuboid_3d"}
            ],
            "tags": [{"name": "reviewed", "value_type": "none"}]
        }))
        .unwrap()
    }

    #[test]
    fn test_is_empty_image() {
        assert!(is_empty(ItemType::Image, &json!({"objects": [], "tags": []})));
        assert!(is_empty(ItemType::Image, &json!({"size": {"width": 4, "height": 4}})));
        assert!(!is_empty(
            ItemType::Image,
            &json!({"objects": [{"classTitle": "car"}], "tags": []})
        ));
        assert!(!is_empty(
            ItemType::Image,
            &json!({"objects": [], "tags": [{"name": "reviewed"}]})
        ));
    }

    #[test]
    fn test_is_empty_video_checks_frames() {
        let empty = json!({"objects": [], "tags": [], "frames": []});
        assert!(is_empty(ItemType::Video, &empty));
        let with_frame = json!({"objects": [], "tags": [], "frames": [{"index": 3, "figures": []}]});
        assert!(!is_empty(ItemType::Video, &with_frame));
        // Frames are not considered for images.
        assert!(is_empty(ItemType::Image, &with_frame));
    }

    #[test]
    fn test_is_empty_pointcloud_checks_figures() {
        let empty = json!({"objects": [], "tags": [], "figures": []});
        assert!(is_empty(ItemType::Pointcloud, &empty));
        let with_figure = json!({"objects": [], "tags": [], "figures": [{"objectKey": "x"}]});
        assert!(!is_empty(ItemType::Pointcloud, &with_figure));
    }

    #[test]
    fn test_meta_empty() {
        let meta = ProjectMeta::from_json(&json!({"classes": [], "tags": []})).unwrap();
        assert!(meta.is_empty());
        assert!(!self::meta().is_empty());
    }

    #[test]
    fn test_meta_rejects_bad_schema() {
        assert!(ProjectMeta::from_json(&json!({"classes": "car"})).is_err());
    }

    #[test]
    fn test_decode_image_keeps_geometry() {
        let raw = json!({
            "size": {"width": 640, "height": 480},
            "tags": [],
            "objects": [{
                "classTitle": "car",
                "geometryType": "rectangle",
                "points": {"exterior": [[1, 2], [3, 4]], "interior": []},
                "tags": [{"name": "reviewed", "value": null}]
            }]
        });
        let mut map = KeyIdMap::new();
        let ann = Annotation::decode(ItemType::Image, &raw, &meta(), &mut map, None).unwrap();
        assert!(!ann.is_empty());
        assert!(map.is_empty());

        let json = ann.to_json().unwrap();
        assert_eq!(json["objects"][0]["points"]["exterior"][1], json!([3, 4]));
        assert_eq!(json["size"]["width"], 640);
    }

    #[test]
    fn test_decode_rejects_unknown_class_and_tag() {
        let mut map = KeyIdMap::new();
        let raw = json!({"objects": [{"classTitle": "bus"}], "tags": []});
        assert_eq!(
            Annotation::decode(ItemType::Image, &raw, &meta(), &mut map, None),
            Err(DecodeError::UnknownClass("bus".to_string()))
        );

        let raw = json!({"objects": [], "tags": [{"name": "unknown"}]});
        assert_eq!(
            Annotation::decode(ItemType::Image, &raw, &meta(), &mut map, None),
            Err(DecodeError::UnknownTag("unknown".to_string()))
        );
    }

    #[test]
    fn test_decode_rejects_non_object_and_bad_lists() {
        let mut map = KeyIdMap::new();
        assert!(matches!(
            Annotation::decode(ItemType::Image, &json!([1, 2]), &meta(), &mut map, None),
            Err(DecodeError::Schema(_))
        ));
        assert!(matches!(
            Annotation::decode(ItemType::Video, &json!({"frames": 5}), &meta(), &mut map, None),
            Err(DecodeError::Schema(_))
        ));
    }

    #[test]
    fn test_decode_video_binds_ids_to_keys() {
        let object_key = Uuid::new_v4().simple().to_string();
        let raw = json!({
            "key": Uuid::new_v4().simple().to_string(),
            "framesCount": 10,
            "tags": [{"name": "reviewed", "id": 400, "frameRange": [0, 3]}],
            "objects": [{"classTitle": "car", "key": object_key, "id": 500, "tags": []}],
            "frames": [{"index": 2, "figures": [{"id": 600, "objectId": 500, "geometryType": "rectangle"}]}]
        });
        let mut map = KeyIdMap::new();
        let ann =
            Annotation::decode(ItemType::Video, &raw, &meta(), &mut map, Some(ItemId::from(9)))
                .unwrap();

        assert_eq!(map.count(KeyKind::Video), 1);
        assert_eq!(map.count(KeyKind::Tag), 1);
        assert_eq!(
            map.get_key(KeyKind::Object, 500).map(|k| k.simple().to_string()),
            Some(object_key.clone())
        );
        assert_eq!(
            map.get_key(KeyKind::Figure, 600),
            Some(KeyKind::Figure.key_for_id(600))
        );

        let Annotation::Video(video) = &ann else {
            panic!("expected video annotation");
        };
        let figure = &video.frames()[0].figures()[0];
        assert_eq!(figure.object_key(), Some(object_key.as_str()));

        let json = ann.to_json().unwrap();
        assert!(json["objects"][0].get("id").is_none());
        assert!(json["frames"][0]["figures"][0].get("objectId").is_none());
        assert_eq!(json["tags"][0]["frameRange"], json!([0, 3]));
        assert_eq!(json["framesCount"], 10);
    }

    #[test]
    fn test_decode_is_deterministic_without_keys() {
        let raw = json!({
            "tags": [],
            "objects": [{"classTitle": "cuboid", "id": 1}],
            "figures": [{"id": 2, "objectId": 1, "geometryType": "cuboid_3d"}]
        });
        let first = Annotation::decode(ItemType::Pointcloud, &raw, &meta(), &mut KeyIdMap::new(), Some(3.into()))
            .unwrap();
        let second = Annotation::decode(ItemType::Pointcloud, &raw, &meta(), &mut KeyIdMap::new(), Some(3.into()))
            .unwrap();
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[test]
    fn test_decode_pointcloud_rejects_dangling_figure() {
        let raw = json!({
            "tags": [],
            "objects": [{"classTitle": "cuboid", "id": 1}],
            "figures": [{"id": 2, "objectId": 99}]
        });
        let mut map = KeyIdMap::new();
        assert!(matches!(
            Annotation::decode(ItemType::Pointcloud, &raw, &meta(), &mut map, None),
            Err(DecodeError::UnknownObject(_))
        ));
    }

    #[test]
    fn test_decode_rejects_conflicting_ids() {
        let key = Uuid::new_v4().simple().to_string();
        let mut map = KeyIdMap::new();
        let first = json!({"objects": [{"classTitle": "car", "key": key, "id": 1}], "tags": [], "frames": []});
        let second = json!({"objects": [{"classTitle": "car", "key": key, "id": 2}], "tags": [], "frames": []});
        Annotation::decode(ItemType::Video, &first, &meta(), &mut map, None).unwrap();
        assert!(matches!(
            Annotation::decode(ItemType::Video, &second, &meta(), &mut map, None),
            Err(DecodeError::KeyConflict(_))
        ));
    }

    #[test]
    fn test_failed_decode_leaves_map_untouched() {
        let mut map = KeyIdMap::new();
        let dangling = json!({
            "tags": [{"name": "reviewed", "id": 40}],
            "objects": [{"classTitle": "car", "id": 50}],
            "frames": [{"index": 0, "figures": [{"id": 60, "objectId": 99}]}]
        });
        assert!(matches!(
            Annotation::decode(ItemType::Video, &dangling, &meta(), &mut map, Some(7.into())),
            Err(DecodeError::UnknownObject(_))
        ));
        assert!(map.is_empty());

        let key = Uuid::new_v4().simple().to_string();
        let first = json!({"objects": [{"classTitle": "car", "key": key, "id": 1}], "tags": [], "frames": []});
        Annotation::decode(ItemType::Video, &first, &meta(), &mut map, Some(8.into())).unwrap();
        let before = map.clone();

        // The conflict comes after a new object has been keyed.
        let second = json!({
            "objects": [
                {"classTitle": "car", "id": 3},
                {"classTitle": "car", "key": key, "id": 2}
            ],
            "tags": [],
            "frames": []
        });
        assert!(matches!(
            Annotation::decode(ItemType::Video, &second, &meta(), &mut map, Some(9.into())),
            Err(DecodeError::KeyConflict(_))
        ));
        assert_eq!(map, before);
    }

    #[test]
    fn test_keyless_entities_get_stable_keys() {
        let raw = json!({
            "tags": [{"name": "reviewed"}],
            "objects": [{"classTitle": "car"}, {"classTitle": "car"}],
            "frames": []
        });
        for item_id in [Some(ItemId::from(4)), None] {
            let mut map = KeyIdMap::new();
            let first =
                Annotation::decode(ItemType::Video, &raw, &meta(), &mut map, item_id).unwrap();
            let second =
                Annotation::decode(ItemType::Video, &raw, &meta(), &mut map, item_id).unwrap();
            let json = first.to_json().unwrap();
            assert_eq!(json, second.to_json().unwrap());
            assert_ne!(json["objects"][0]["key"], json["objects"][1]["key"]);
        }

        let other = Annotation::decode(
            ItemType::Video,
            &raw,
            &meta(),
            &mut KeyIdMap::new(),
            Some(ItemId::from(5)),
        )
        .unwrap()
        .to_json()
        .unwrap();
        let mine = Annotation::decode(
            ItemType::Video,
            &raw,
            &meta(),
            &mut KeyIdMap::new(),
            Some(ItemId::from(4)),
        )
        .unwrap()
        .to_json()
        .unwrap();
        assert_ne!(other["objects"][0]["key"], mine["objects"][0]["key"]);
    }

    #[test]
    fn test_decoded_emptiness_matches_raw() {
        let payloads = [
            json!({"objects": [], "tags": [], "frames": []}),
            json!({"objects": [{"classTitle": "car", "id": 1}], "tags": [], "frames": []}),
            json!({"objects": [], "tags": [{"name": "reviewed"}], "frames": []}),
            json!({"objects": [], "tags": [], "frames": [{"index": 0, "figures": []}]}),
        ];
        for raw in payloads {
            let ann =
                Annotation::decode(ItemType::Video, &raw, &meta(), &mut KeyIdMap::new(), None)
                    .unwrap();
            assert_eq!(ann.is_empty(), is_empty(ItemType::Video, &raw), "{}", raw);
        }
    }
}
