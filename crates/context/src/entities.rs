//! Entity detection — exact, whole-word lookup of known roster entities.
//!
//! Every display name and alias maps (case-insensitively) to a canonical
//! record. A name matches only when bounded by non-word characters or the
//! string edges, so "Alex" never matches inside "Alexander". There are no
//! fuzzy heuristics: a missed mention costs less than a false one.
//!
//! The lookup table is built off-lock and swapped in whole, so detection
//! running during a reload sees either the old table or the new one.

use lorekeeper_core::entity::{
    CharacterRecord, EntityId, EntityMatch, FactionRecord, PlaceRecord, RosterSource,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Immutable lookup tables built from one roster read.
#[derive(Debug, Default)]
pub struct EntityTable {
    characters: Lookup<CharacterRecord>,
    places: Lookup<PlaceRecord>,
    factions: Lookup<FactionRecord>,
    load_errors: Vec<String>,
}

#[derive(Debug)]
struct Lookup<T> {
    records: BTreeMap<EntityId, T>,
    /// lowercased name or alias -> entity id
    names: HashMap<String, EntityId>,
}

impl<T> Default for Lookup<T> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            names: HashMap::new(),
        }
    }
}

impl<T: Clone> Lookup<T> {
    fn build(
        records: Vec<T>,
        id: impl Fn(&T) -> EntityId,
        names: impl Fn(&T) -> Vec<&str>,
    ) -> Self {
        let mut lookup = Self::default();
        for record in records {
            let entity_id = id(&record);
            for name in names(&record) {
                let key = normalize(name);
                if key.is_empty() {
                    continue;
                }
                // First writer wins when two entities share an alias
                lookup.names.entry(key).or_insert(entity_id);
            }
            lookup.records.insert(entity_id, record);
        }
        lookup
    }

    /// Records whose name or alias occurs as a whole word, ordered by id.
    fn scan(&self, haystack: &str) -> Vec<T> {
        let mut hits: BTreeMap<EntityId, &T> = BTreeMap::new();
        for (name, entity_id) in &self.names {
            if hits.contains_key(entity_id) {
                continue;
            }
            if contains_whole_word(haystack, name) {
                if let Some(record) = self.records.get(entity_id) {
                    hits.insert(*entity_id, record);
                }
            }
        }
        hits.into_values().cloned().collect()
    }

    fn any_match(&self, haystack: &str) -> bool {
        self.names
            .keys()
            .any(|name| contains_whole_word(haystack, name))
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

impl EntityTable {
    pub fn new(
        characters: Vec<CharacterRecord>,
        places: Vec<PlaceRecord>,
        factions: Vec<FactionRecord>,
    ) -> Self {
        Self {
            characters: Lookup::build(characters, |c| c.id, |c| aliases(&c.name, &c.aliases)),
            places: Lookup::build(places, |p| p.id, |p| aliases(&p.name, &p.aliases)),
            factions: Lookup::build(factions, |f| f.id, |f| aliases(&f.name, &f.aliases)),
            load_errors: Vec::new(),
        }
    }

    pub fn character_count(&self) -> usize {
        self.characters.len()
    }

    pub fn place_count(&self) -> usize {
        self.places.len()
    }

    pub fn faction_count(&self) -> usize {
        self.factions.len()
    }

    pub fn load_errors(&self) -> &[String] {
        &self.load_errors
    }

    fn detect(&self, text: &str) -> EntityMatch {
        let haystack = normalize(text);
        EntityMatch {
            characters: self.characters.scan(&haystack),
            places: self.places.scan(&haystack),
            factions: self.factions.scan(&haystack),
        }
    }
}

fn aliases<'a>(name: &'a str, aliases: &'a [String]) -> Vec<&'a str> {
    std::iter::once(name)
        .chain(aliases.iter().map(String::as_str))
        .collect()
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// True when `needle` occurs in `haystack` bounded by non-word characters.
/// Both arguments must already be lowercased.
pub(crate) fn contains_whole_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !is_word_char(c));
        let after_ok = haystack[end..].chars().next().is_none_or(|c| !is_word_char(c));
        before_ok && after_ok
    })
}

/// Outcome of a roster (re)load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub characters: usize,
    pub places: usize,
    pub factions: usize,
    pub errors: Vec<String>,
}

impl LoadReport {
    pub fn is_degraded(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Detects known entities in free text.
pub struct EntityDetector {
    table: RwLock<Arc<EntityTable>>,
}

impl EntityDetector {
    /// A detector with an empty table; call [`load`](Self::load) to fill it.
    pub fn new() -> Self {
        Self::from_table(EntityTable::default())
    }

    pub fn from_table(table: EntityTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// Rebuild the lookup table from a roster source.
    ///
    /// Each section is read independently; a failing section is logged and
    /// skipped and the detector keeps whatever did load.
    pub async fn load(&self, source: &dyn RosterSource) -> LoadReport {
        let mut errors = Vec::new();

        let characters = source.characters().await.unwrap_or_else(|e| {
            warn!(source = source.name(), error = %e, "Character roster failed to load");
            errors.push(e.to_string());
            Vec::new()
        });
        let places = source.places().await.unwrap_or_else(|e| {
            warn!(source = source.name(), error = %e, "Place roster failed to load");
            errors.push(e.to_string());
            Vec::new()
        });
        let factions = source.factions().await.unwrap_or_else(|e| {
            warn!(source = source.name(), error = %e, "Faction roster failed to load");
            errors.push(e.to_string());
            Vec::new()
        });

        let mut table = EntityTable::new(characters, places, factions);
        table.load_errors = errors.clone();
        let report = LoadReport {
            characters: table.character_count(),
            places: table.place_count(),
            factions: table.faction_count(),
            errors,
        };

        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);

        info!(
            source = source.name(),
            characters = report.characters,
            places = report.places,
            factions = report.factions,
            errors = report.errors.len(),
            "Entity roster loaded"
        );
        report
    }

    /// A snapshot of the current table.
    pub fn table(&self) -> Arc<EntityTable> {
        self.table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entities mentioned in `text`. Never fails.
    pub fn detect(&self, text: &str) -> EntityMatch {
        self.table().detect(text)
    }

    /// Whether `text` names any known character (by name or alias).
    pub fn mentions_character(&self, text: &str) -> bool {
        self.table().characters.any_match(&normalize(text))
    }

    /// Whether the last load hit any errors.
    pub fn is_degraded(&self) -> bool {
        !self.table().load_errors.is_empty()
    }

    pub fn load_errors(&self) -> Vec<String> {
        self.table().load_errors.clone()
    }
}

impl Default for EntityDetector {
    fn default() -> Self {
        Self::new()
    }
}
