//! The (family, indicator_type) taxonomy, temporal aggregations, and
//! heat-map orientations, loaded as data rather than hard-coded enum arms.
//!
//! Stage code that only needs to check *membership* in these sets goes
//! through [`Taxonomy`]. Code that encodes actual override business logic
//! (the deterministic rules in specialist and orientation stages) stays as
//! Rust `match`/regex, because that logic is not mere enumeration.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Bundled default taxonomy, embedded so the binary is self-contained.
pub const DEFAULT_TAXONOMY_TOML: &str = include_str!("../../resources/taxonomy.toml");

#[derive(Debug, Deserialize)]
struct RawTaxonomy {
    families: Vec<RawFamily>,
    temporal_aggregations: Vec<String>,
    heat_map_orientations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawFamily {
    name: String,
    indicator_types: Vec<String>,
}

/// In-memory taxonomy tables.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    families: HashSet<String>,
    indicator_types_by_family: HashMap<String, HashSet<String>>,
    temporal_aggregations: HashSet<String>,
    heat_map_orientations: HashSet<String>,
}

impl Taxonomy {
    /// Load the bundled default taxonomy.
    pub fn load_default() -> Result<Self> {
        Self::parse(DEFAULT_TAXONOMY_TOML)
    }

    /// Parse a taxonomy document from TOML text.
    pub fn parse(toml_text: &str) -> Result<Self> {
        let raw: RawTaxonomy = toml::from_str(toml_text)
            .map_err(|e| Error::Config(format!("invalid taxonomy data: {e}")))?;

        let mut families = HashSet::new();
        let mut indicator_types_by_family = HashMap::new();
        for family in raw.families {
            indicator_types_by_family
                .insert(family.name.clone(), family.indicator_types.into_iter().collect());
            families.insert(family.name);
        }

        Ok(Self {
            families,
            indicator_types_by_family,
            temporal_aggregations: raw.temporal_aggregations.into_iter().collect(),
            heat_map_orientations: raw.heat_map_orientations.into_iter().collect(),
        })
    }

    pub fn is_valid_family(&self, family: &str) -> bool {
        self.families.contains(family)
    }

    /// True if `indicator_type` is a member of `family`'s declared type set.
    pub fn is_valid_combination(&self, family: &str, indicator_type: &str) -> bool {
        self.indicator_types_by_family
            .get(family)
            .map(|types| types.contains(indicator_type))
            .unwrap_or(false)
    }

    pub fn is_valid_temporal_aggregation(&self, value: &str) -> bool {
        self.temporal_aggregations.contains(value)
    }

    pub fn is_valid_orientation(&self, value: &str) -> bool {
        self.heat_map_orientations.contains(value)
    }

    /// The generic, least-specific indicator_type for a family, used as a
    /// placeholder when a Specialist fails irrecoverably for an item.
    pub fn generic_indicator_type(&self, family: &str) -> Option<&str> {
        self.indicator_types_by_family
            .get(family)
            .and_then(|types| types.iter().min())
            .map(|s| s.as_str())
    }

    pub fn families(&self) -> impl Iterator<Item = &str> {
        self.families.iter().map(|s| s.as_str())
    }

    /// All declared `indicator_type`s for `family`, sorted for stable
    /// prompt/schema rendering.
    pub fn indicator_types(&self, family: &str) -> Vec<String> {
        let mut types: Vec<String> = self
            .indicator_types_by_family
            .get(family)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_default_taxonomy() {
        let tax = Taxonomy::load_default().unwrap();
        assert!(tax.is_valid_family("physical-fundamental"));
        assert!(tax.is_valid_combination("physical-fundamental", "stock"));
        assert!(!tax.is_valid_combination("physical-fundamental", "price"));
        assert!(tax.is_valid_temporal_aggregation("not-applicable"));
        assert!(tax.is_valid_orientation("neutral"));
        assert!(!tax.is_valid_family("not-a-family"));
    }

    #[test]
    fn rejects_malformed_document() {
        assert!(Taxonomy::parse("not valid toml {{{").is_err());
    }
}
