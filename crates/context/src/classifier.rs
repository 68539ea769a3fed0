//! Query classification — rule-based categorization of user input.
//!
//! Rules are data: an ordered list of layers, each tied to one category.
//! The lowercased input is tested layer by layer and the first layer with
//! any matching rule decides the category. Nothing after it is evaluated.
//!
//! Default order:
//!
//! | # | Category | Rules |
//! |---|----------|-------|
//! | 1 | character | cue phrases ("who is", personality, backstory...) |
//! | 2 | relationship | "feel about", trust, "between X and Y"... |
//! | 3 | character | the input names a known character |
//! | 4 | event | "what happened", "when did"... |
//! | 5 | location | "where", places, travel verbs |
//! | 6 | theme | meaning, motifs, tone |
//! | - | general | nothing matched |
//!
//! A bare character name is a weak signal, so it only decides the category
//! after the explicit relationship cues have had their chance.

use crate::entities::EntityDetector;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// The semantic type of a user query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryClassification {
    Character,
    Location,
    Event,
    Relationship,
    Theme,
    #[default]
    General,
}

impl QueryClassification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Location => "location",
            Self::Event => "event",
            Self::Relationship => "relationship",
            Self::Theme => "theme",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for QueryClassification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classifier layer as data, before compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub category: QueryClassification,
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Also match when the input names a known character
    #[serde(default)]
    pub match_character_names: bool,
}

impl LayerSpec {
    pub fn patterns(category: QueryClassification, patterns: &[&str]) -> Self {
        Self {
            category,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            match_character_names: false,
        }
    }

    pub fn character_names() -> Self {
        Self {
            category: QueryClassification::Character,
            patterns: Vec::new(),
            match_character_names: true,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("Invalid {category} pattern `{pattern}`: {reason}")]
    InvalidPattern {
        category: QueryClassification,
        pattern: String,
        reason: String,
    },
}

const CHARACTER_CUES: &[&str] = &[
    r"\bwho (is|was|are|were)\b",
    r"\bwhat (is|was) \w+ like\b",
    r"\b(personality|backstory|appearance|motivations?|temperament)\b",
    r"\b(his|her|their) (past|childhood|family|history)\b",
    r"\bdescribe (him|her|them)\b",
];

const RELATIONSHIP_CUES: &[&str] = &[
    r"\bfeels? (about|towards?)\b",
    r"\brelationships?\b",
    r"\b(trust|trusts|distrust|betray\w*|loyal\w*|rival\w*|allies|alliance)\b",
    r"\b(enemy|enemies|friends?|lovers?)\b",
    r"\bbetween \w+ and \w+\b",
    r"\bget along\b",
    r"\bthinks? of\b",
];

const EVENT_CUES: &[&str] = &[
    r"\bwhat happened\b",
    r"\bwhen did\b",
    r"\b(happen|happened|happens|occurred)\b",
    r"\b(event|incident|battle|fight|heist|attack|ambush|meeting|funeral|wedding)\b",
    r"\b(remember|recall) (when|the)\b",
    r"\blast time\b",
];

const LOCATION_CUES: &[&str] = &[
    r"\bwhere\b",
    r"\b(place|location|city|district|neighborhood|building|room|street|bar|docks?)\b",
    r"\b(go|goes|going|travel|head|walk|drive) to\b",
];

const THEME_CUES: &[&str] = &[
    r"\b(theme|themes|meaning|symbol\w*|motifs?|tone|mood|atmosphere)\b",
    r"\b(moral|morality|redemption|corruption|guilt|justice)\b",
    r"\bwhat does .+ (mean|represent)\b",
];

/// The built-in layer list.
pub fn default_layers() -> Vec<LayerSpec> {
    vec![
        LayerSpec::patterns(QueryClassification::Character, CHARACTER_CUES),
        LayerSpec::patterns(QueryClassification::Relationship, RELATIONSHIP_CUES),
        LayerSpec::character_names(),
        LayerSpec::patterns(QueryClassification::Event, EVENT_CUES),
        LayerSpec::patterns(QueryClassification::Location, LOCATION_CUES),
        LayerSpec::patterns(QueryClassification::Theme, THEME_CUES),
    ]
}

struct Layer {
    category: QueryClassification,
    patterns: Vec<Regex>,
    match_character_names: bool,
}

/// Assigns a [`QueryClassification`] to user input.
pub struct QueryClassifier {
    layers: Vec<Layer>,
    entities: Option<Arc<EntityDetector>>,
}

impl QueryClassifier {
    /// Compile a layer list. Invalid patterns are rejected up front.
    pub fn with_layers(specs: Vec<LayerSpec>) -> Result<Self, ClassifierError> {
        let layers = specs
            .into_iter()
            .map(|spec| {
                let patterns = spec
                    .patterns
                    .iter()
                    .map(|p| {
                        Regex::new(p).map_err(|e| ClassifierError::InvalidPattern {
                            category: spec.category,
                            pattern: p.clone(),
                            reason: e.to_string(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Layer {
                    category: spec.category,
                    patterns,
                    match_character_names: spec.match_character_names,
                })
            })
            .collect::<Result<Vec<_>, ClassifierError>>()?;

        Ok(Self {
            layers,
            entities: None,
        })
    }

    /// The default layers, consulting `entities` for character names.
    pub fn new(entities: Arc<EntityDetector>) -> Self {
        Self {
            layers: Self::compile_defaults(),
            entities: Some(entities),
        }
    }

    /// The default layers with no roster; the name layer never matches.
    pub fn without_entities() -> Self {
        Self {
            layers: Self::compile_defaults(),
            entities: None,
        }
    }

    pub fn with_entities(mut self, entities: Arc<EntityDetector>) -> Self {
        self.entities = Some(entities);
        self
    }

    fn compile_defaults() -> Vec<Layer> {
        // Built-in patterns are tested below; a failure here is a programming error
        match Self::with_layers(default_layers()) {
            Ok(classifier) => classifier.layers,
            Err(e) => unreachable!("built-in classifier pattern failed to compile: {e}"),
        }
    }

    /// Classify `text`. Never fails; unmatched input is `General`.
    pub fn classify(&self, text: &str) -> QueryClassification {
        let lowered = text.to_lowercase();
        for (index, layer) in self.layers.iter().enumerate() {
            if self.layer_matches(layer, text, &lowered) {
                debug!(category = %layer.category, layer = index, "Query classified");
                return layer.category;
            }
        }
        QueryClassification::General
    }

    fn layer_matches(&self, layer: &Layer, text: &str, lowered: &str) -> bool {
        if layer.patterns.iter().any(|re| re.is_match(lowered)) {
            return true;
        }
        layer.match_character_names
            && self
                .entities
                .as_ref()
                .is_some_and(|entities| entities.mentions_character(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::sample_roster;

    async fn with_roster() -> QueryClassifier {
        let detector = Arc::new(EntityDetector::new());
        detector.load(&sample_roster()).await;
        QueryClassifier::new(detector)
    }

    #[test]
    fn defaults_compile() {
        assert!(QueryClassifier::with_layers(default_layers()).is_ok());
    }

    #[tokio::test]
    async fn who_is_is_character() {
        let c = with_roster().await;
        assert_eq!(c.classify("Who is Sullivan?"), QueryClassification::Character);
    }

    #[tokio::test]
    async fn relationship_beats_character_name() {
        let c = with_roster().await;
        assert_eq!(
            c.classify("How does Alex feel about the Syndicate?"),
            QueryClassification::Relationship
        );
    }

    #[tokio::test]
    async fn character_name_beats_location() {
        let c = with_roster().await;
        assert_eq!(c.classify("Where does Alex live?"), QueryClassification::Character);
    }

    #[test]
    fn without_roster_where_is_location() {
        let c = QueryClassifier::without_entities();
        assert_eq!(c.classify("Where does Alex live?"), QueryClassification::Location);
    }

    #[test]
    fn category_cues() {
        let c = QueryClassifier::without_entities();
        assert_eq!(c.classify("What happened at the heist?"), QueryClassification::Event);
        assert_eq!(
            c.classify("Can I trust the informant?"),
            QueryClassification::Relationship
        );
        assert_eq!(
            c.classify("What does the rain symbolize?"),
            QueryClassification::Theme
        );
        assert_eq!(c.classify("Let's head to the bar"), QueryClassification::Location);
        assert_eq!(c.classify("I open the door."), QueryClassification::General);
        assert_eq!(c.classify(""), QueryClassification::General);
    }

    #[test]
    fn case_insensitive() {
        let c = QueryClassifier::without_entities();
        assert_eq!(c.classify("WHO WAS THE STRANGER"), QueryClassification::Character);
    }

    #[test]
    fn custom_order_is_respected() {
        let c = QueryClassifier::with_layers(vec![
            LayerSpec::patterns(QueryClassification::Location, &[r"\bwhere\b"]),
            LayerSpec::patterns(QueryClassification::Character, &[r"\bwho\b"]),
        ])
        .unwrap();
        assert_eq!(c.classify("who knows where"), QueryClassification::Location);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = QueryClassifier::with_layers(vec![LayerSpec::patterns(
            QueryClassification::Theme,
            &["(unclosed"],
        )])
        .err()
        .unwrap();
        assert!(matches!(err, ClassifierError::InvalidPattern { .. }));
    }

    #[test]
    fn serializes_lowercase() {
        let json = serde_json::to_string(&QueryClassification::Relationship).unwrap();
        assert_eq!(json, "\"relationship\"");
    }
}
