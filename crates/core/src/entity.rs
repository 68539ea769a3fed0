//! Entity roster types — characters, places and factions.
//!
//! The roster is the authoritative list of known entities and their
//! aliases. It is read in bulk (never per turn) to build the detector's
//! lookup tables.

use crate::error::RosterError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Entity identifier, unique within one entity kind.
pub type EntityId = u64;

/// A known character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub id: EntityId,
    pub name: String,
    /// Character type (e.g. "protagonist", "npc")
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// A known place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceRecord {
    pub id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// A known faction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactionRecord {
    pub id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Entities mentioned in a piece of text.
///
/// Each set is ordered by id and holds an id at most once, no matter how
/// many aliases of that entity matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub characters: Vec<CharacterRecord>,
    pub places: Vec<PlaceRecord>,
    pub factions: Vec<FactionRecord>,
}

impl EntityMatch {
    pub fn is_empty(&self) -> bool {
        self.characters.is_empty() && self.places.is_empty() && self.factions.is_empty()
    }

    /// Total number of matched entities across all kinds.
    pub fn len(&self) -> usize {
        self.characters.len() + self.places.len() + self.factions.len()
    }

    /// Canonical names of every matched entity, characters first.
    pub fn names(&self) -> Vec<&str> {
        self.characters
            .iter()
            .map(|c| c.name.as_str())
            .chain(self.places.iter().map(|p| p.name.as_str()))
            .chain(self.factions.iter().map(|f| f.name.as_str()))
            .collect()
    }
}

/// Bulk read access to the entity roster.
///
/// Each section is read independently so a failure in one does not
/// prevent the others from loading.
#[async_trait]
pub trait RosterSource: Send + Sync {
    /// A human-readable name for this source (e.g., "json_file").
    fn name(&self) -> &str;

    async fn characters(&self) -> std::result::Result<Vec<CharacterRecord>, RosterError>;

    async fn places(&self) -> std::result::Result<Vec<PlaceRecord>, RosterError>;

    async fn factions(&self) -> std::result::Result<Vec<FactionRecord>, RosterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn character_type_field_maps_to_kind() {
        let record: CharacterRecord = serde_json::from_value(serde_json::json!({
            "id": 7,
            "name": "Sullivan",
            "type": "npc",
            "aliases": ["Sully"]
        }))
        .unwrap();
        assert_eq!(record.kind.as_deref(), Some("npc"));
        assert_eq!(record.aliases, vec!["Sully".to_string()]);
        assert!(record.summary.is_none());
    }

    #[test]
    fn entity_match_names_and_len() {
        let m = EntityMatch {
            characters: vec![CharacterRecord {
                id: 1,
                name: "Alex".into(),
                kind: None,
                aliases: vec![],
                summary: None,
            }],
            places: vec![PlaceRecord {
                id: 3,
                name: "The Neon Docks".into(),
                aliases: vec![],
                summary: None,
            }],
            factions: vec![],
        };
        assert_eq!(m.len(), 2);
        assert!(!m.is_empty());
        assert_eq!(m.names(), vec!["Alex", "The Neon Docks"]);
    }
}
