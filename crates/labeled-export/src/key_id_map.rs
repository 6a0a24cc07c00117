// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

//! Project-wide table between annotation keys and platform ids.
//!
//! Video and point cloud annotations reference each other by key (a figure
//! points at its object, a tag may be shared by several frames). The platform
//! hands out numeric ids instead, so every decode records the pairs it sees
//! here. The map only grows: one instance lives for the whole project export
//! and is written once as `key_id_map.json` next to `meta.json`.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};
use uuid::Uuid;

/// Entity kinds tracked by the map.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Tag,
    Object,
    Figure,
    Video,
}

impl KeyKind {
    fn tag(&self) -> u64 {
        match self {
            KeyKind::Tag => 1,
            KeyKind::Object => 2,
            KeyKind::Figure => 3,
            KeyKind::Video => 4,
        }
    }

    /// Key derived from a platform id, stable across runs.
    ///
    /// Used when the platform returns an entity without a key so that two
    /// exports of the same project produce identical files.
    pub fn key_for_id(&self, id: u64) -> Uuid {
        Uuid::from_u64_pair(self.tag(), id)
    }

    /// Key of an entity that has neither key nor id, derived from the item it
    /// belongs to and its position in that item's annotation. Never equal to
    /// a [`key_for_id`](Self::key_for_id) key.
    pub fn key_for_position(&self, item: Option<u64>, position: u64) -> Uuid {
        let high = ((0x8000 | self.tag()) << 48) | (position & 0xffff_ffff_ffff);
        Uuid::from_u64_pair(high, item.unwrap_or(u64::MAX))
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            KeyKind::Tag => "tag",
            KeyKind::Object => "object",
            KeyKind::Figure => "figure",
            KeyKind::Video => "video",
        };
        write!(f, "{}", value)
    }
}

/// Key/id pair that contradicts a pair already in the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyConflict {
    pub kind: KeyKind,
    pub key: Uuid,
    pub id: u64,
    pub existing: u64,
}

impl std::fmt::Display for KeyConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} key {} is bound to id {} but was seen with id {}",
            self.kind,
            self.key.simple(),
            self.existing,
            self.id
        )
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
struct Table {
    by_key: BTreeMap<Uuid, u64>,
    by_id: HashMap<u64, Uuid>,
}

impl Table {
    fn insert(&mut self, kind: KeyKind, key: Uuid, id: u64) -> Result<(), KeyConflict> {
        if let Some(&existing) = self.by_key.get(&key) {
            if existing != id {
                return Err(KeyConflict {
                    kind,
                    key,
                    id,
                    existing,
                });
            }
            return Ok(());
        }
        if let Some(&other) = self.by_id.get(&id)
            && other != key
        {
            // Same id seen under a new key: keep the first binding.
            return Ok(());
        }
        self.by_key.insert(key, id);
        self.by_id.insert(id, key);
        Ok(())
    }

    fn to_json(&self) -> BTreeMap<String, u64> {
        self.by_key
            .iter()
            .map(|(key, id)| (key.simple().to_string(), *id))
            .collect()
    }

    fn from_json(kind: KeyKind, entries: BTreeMap<String, u64>) -> Result<Self, Error> {
        let mut table = Table::default();
        for (key, id) in entries {
            let key = Uuid::parse_str(&key).map_err(|e| {
                Error::InvalidParameters(format!("invalid {} key {}: {}", kind, key, e))
            })?;
            table
                .insert(kind, key, id)
                .map_err(|e| Error::InvalidParameters(e.to_string()))?;
        }
        Ok(table)
    }
}

#[derive(Serialize, Deserialize, Default)]
struct KeyIdMapFile {
    #[serde(default)]
    tags: BTreeMap<String, u64>,
    #[serde(default)]
    objects: BTreeMap<String, u64>,
    #[serde(default)]
    figures: BTreeMap<String, u64>,
    #[serde(default)]
    videos: BTreeMap<String, u64>,
}

/// Bidirectional key ↔ id table for tags, objects, figures and videos.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct KeyIdMap {
    tags: Table,
    objects: Table,
    figures: Table,
    videos: Table,
}

impl KeyIdMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, kind: KeyKind) -> &Table {
        match kind {
            KeyKind::Tag => &self.tags,
            KeyKind::Object => &self.objects,
            KeyKind::Figure => &self.figures,
            KeyKind::Video => &self.videos,
        }
    }

    fn table_mut(&mut self, kind: KeyKind) -> &mut Table {
        match kind {
            KeyKind::Tag => &mut self.tags,
            KeyKind::Object => &mut self.objects,
            KeyKind::Figure => &mut self.figures,
            KeyKind::Video => &mut self.videos,
        }
    }

    /// Records a key/id pair. Re-adding a known pair is a no-op; binding a
    /// known key to another id is a conflict.
    pub fn add(&mut self, kind: KeyKind, key: Uuid, id: u64) -> Result<(), KeyConflict> {
        self.table_mut(kind).insert(kind, key, id)
    }

    /// Adds every pair of `other`. Stops at the first conflict.
    pub fn merge(&mut self, other: &KeyIdMap) -> Result<(), KeyConflict> {
        for kind in [KeyKind::Tag, KeyKind::Object, KeyKind::Figure, KeyKind::Video] {
            for (key, id) in &other.table(kind).by_key {
                self.add(kind, *key, *id)?;
            }
        }
        Ok(())
    }

    pub fn get_id(&self, kind: KeyKind, key: &Uuid) -> Option<u64> {
        self.table(kind).by_key.get(key).copied()
    }

    pub fn get_key(&self, kind: KeyKind, id: u64) -> Option<Uuid> {
        self.table(kind).by_id.get(&id).copied()
    }

    /// Number of pairs recorded for `kind`.
    pub fn count(&self, kind: KeyKind) -> usize {
        self.table(kind).by_key.len()
    }

    pub fn len(&self) -> usize {
        [KeyKind::Tag, KeyKind::Object, KeyKind::Figure, KeyKind::Video]
            .iter()
            .map(|k| self.count(*k))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> serde_json::Value {
        let file = KeyIdMapFile {
            tags: self.tags.to_json(),
            objects: self.objects.to_json(),
            figures: self.figures.to_json(),
            videos: self.videos.to_json(),
        };
        serde_json::to_value(file).unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let file: KeyIdMapFile = serde_json::from_slice(&std::fs::read(path)?)?;
        Ok(KeyIdMap {
            tags: Table::from_json(KeyKind::Tag, file.tags)?,
            objects: Table::from_json(KeyKind::Object, file.objects)?,
            figures: Table::from_json(KeyKind::Figure, file.figures)?,
            videos: Table::from_json(KeyKind::Video, file.videos)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_add_and_lookup_both_directions() {
        let mut map = KeyIdMap::new();
        let key = Uuid::new_v4();
        map.add(KeyKind::Object, key, 77).unwrap();

        assert_eq!(map.get_id(KeyKind::Object, &key), Some(77));
        assert_eq!(map.get_key(KeyKind::Object, 77), Some(key));
        assert_eq!(map.get_key(KeyKind::Figure, 77), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_readding_same_pair_is_noop() {
        let mut map = KeyIdMap::new();
        let key = Uuid::new_v4();
        map.add(KeyKind::Tag, key, 1).unwrap();
        map.add(KeyKind::Tag, key, 1).unwrap();
        assert_eq!(map.count(KeyKind::Tag), 1);
    }

    #[test]
    fn test_conflicting_id_is_rejected() {
        let mut map = KeyIdMap::new();
        let key = Uuid::new_v4();
        map.add(KeyKind::Figure, key, 1).unwrap();
        let err = map.add(KeyKind::Figure, key, 2).unwrap_err();
        assert_eq!(err.existing, 1);
        assert_eq!(err.id, 2);
        assert_eq!(map.get_id(KeyKind::Figure, &key), Some(1));
    }

    #[test]
    fn test_key_for_id_is_stable_and_kind_specific() {
        assert_eq!(KeyKind::Object.key_for_id(5), KeyKind::Object.key_for_id(5));
        assert_ne!(KeyKind::Object.key_for_id(5), KeyKind::Figure.key_for_id(5));
    }

    #[test]
    fn test_key_for_position() {
        let key = KeyKind::Tag.key_for_position(Some(3), 0);
        assert_eq!(key, KeyKind::Tag.key_for_position(Some(3), 0));
        assert_ne!(key, KeyKind::Tag.key_for_position(Some(3), 1));
        assert_ne!(key, KeyKind::Tag.key_for_position(Some(4), 0));
        assert_ne!(key, KeyKind::Object.key_for_position(Some(3), 0));
        assert_ne!(key, KeyKind::Tag.key_for_id(3));
    }

    #[test]
    fn test_merge() {
        let mut map = KeyIdMap::new();
        map.add(KeyKind::Object, KeyKind::Object.key_for_id(1), 1)
            .unwrap();

        let mut staged = KeyIdMap::new();
        staged
            .add(KeyKind::Object, KeyKind::Object.key_for_id(1), 1)
            .unwrap();
        staged
            .add(KeyKind::Figure, KeyKind::Figure.key_for_id(2), 2)
            .unwrap();
        map.merge(&staged).unwrap();
        assert_eq!(map.count(KeyKind::Object), 1);
        assert_eq!(map.count(KeyKind::Figure), 1);

        let mut conflicting = KeyIdMap::new();
        conflicting
            .add(KeyKind::Object, KeyKind::Object.key_for_id(1), 9)
            .unwrap();
        assert!(map.merge(&conflicting).is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("key_id_map.json");

        let mut map = KeyIdMap::new();
        map.add(KeyKind::Video, KeyKind::Video.key_for_id(10), 10)
            .unwrap();
        map.add(KeyKind::Object, Uuid::new_v4(), 11).unwrap();
        map.save(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["videos"].as_object().unwrap().len(), 1);
        assert!(json["tags"].as_object().unwrap().is_empty());

        let loaded = KeyIdMap::load(&path).unwrap();
        assert_eq!(loaded, map);
    }
}
