pub mod normalizer;
pub mod patterns;

pub use patterns::{EntityPattern, PatternSet, RegexPattern};

use tracing::debug;

/// Candidates outside this length window (in characters) are discarded.
pub const MIN_ENTITY_CHARS: usize = 3;
pub const MAX_ENTITY_CHARS: usize = 50;

/// Harvests entity strings from free text using a set of independent patterns.
pub struct EntityHarvester {
    patterns: PatternSet,
    min_chars: usize,
    max_chars: usize,
}

impl EntityHarvester {
    pub fn new(patterns: PatternSet) -> Self {
        Self {
            patterns,
            min_chars: MIN_ENTITY_CHARS,
            max_chars: MAX_ENTITY_CHARS,
        }
    }

    /// Apply every pattern, deduplicate, then drop candidates outside the length window.
    pub fn harvest(&self, text: &str) -> Vec<String> {
        let raw = self
            .patterns
            .iter()
            .flat_map(|pattern| pattern.candidates(text))
            .map(|c| normalizer::clean_candidate(&c));

        let entities: Vec<String> = normalizer::dedup(raw)
            .into_iter()
            .filter(|c| {
                let len = c.chars().count();
                len >= self.min_chars && len <= self.max_chars
            })
            .collect();

        debug!(count = entities.len(), "Harvested entities");
        entities
    }

    /// Harvest across several texts, deduplicating over the whole set.
    pub fn harvest_all<'a>(&self, texts: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        normalizer::dedup(texts.into_iter().flat_map(|t| self.harvest(t)))
    }
}

impl Default for EntityHarvester {
    fn default() -> Self {
        Self::new(PatternSet::latin())
    }
}
