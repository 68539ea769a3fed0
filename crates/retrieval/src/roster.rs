//! Entity roster sources.
//!
//! - [`StaticRoster`]: fixed records, for tests and embedding callers
//! - [`JsonFileRoster`]: a JSON document with `characters`, `places` and
//!   `factions` arrays, each section parsed independently

use async_trait::async_trait;
use lorekeeper_core::entity::{CharacterRecord, FactionRecord, PlaceRecord, RosterSource};
use lorekeeper_core::error::RosterError;
use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// A roster held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticRoster {
    pub characters: Vec<CharacterRecord>,
    pub places: Vec<PlaceRecord>,
    pub factions: Vec<FactionRecord>,
}

impl StaticRoster {
    pub fn new(
        characters: Vec<CharacterRecord>,
        places: Vec<PlaceRecord>,
        factions: Vec<FactionRecord>,
    ) -> Self {
        Self {
            characters,
            places,
            factions,
        }
    }
}

#[async_trait]
impl RosterSource for StaticRoster {
    fn name(&self) -> &str {
        "static"
    }

    async fn characters(&self) -> Result<Vec<CharacterRecord>, RosterError> {
        Ok(self.characters.clone())
    }

    async fn places(&self) -> Result<Vec<PlaceRecord>, RosterError> {
        Ok(self.places.clone())
    }

    async fn factions(&self) -> Result<Vec<FactionRecord>, RosterError> {
        Ok(self.factions.clone())
    }
}

/// A roster read from a JSON file on every bulk read.
///
/// A malformed section fails alone; the other sections still load. A
/// missing section reads as empty.
#[derive(Debug, Clone)]
pub struct JsonFileRoster {
    path: PathBuf,
}

impl JsonFileRoster {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn section<T: DeserializeOwned>(&self, section: &str) -> Result<Vec<T>, RosterError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| RosterError::Read {
                section: section.to_string(),
                reason: format!("{}: {e}", self.path.display()),
            })?;
        let mut doc: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| RosterError::Parse {
                section: section.to_string(),
                reason: e.to_string(),
            })?;
        match doc.get_mut(section).map(serde_json::Value::take) {
            None | Some(serde_json::Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value).map_err(|e| RosterError::Parse {
                section: section.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl RosterSource for JsonFileRoster {
    fn name(&self) -> &str {
        "json_file"
    }

    async fn characters(&self) -> Result<Vec<CharacterRecord>, RosterError> {
        self.section("characters").await
    }

    async fn places(&self) -> Result<Vec<PlaceRecord>, RosterError> {
        self.section("places").await
    }

    async fn factions(&self) -> Result<Vec<FactionRecord>, RosterError> {
        self.section("factions").await
    }
}
