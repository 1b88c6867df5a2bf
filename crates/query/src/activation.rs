use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ActivationMode {
    /// The caller's explicit toggle decides.
    Manual,
    #[default]
    Automatic,
    /// Retrieve whenever documents exist.
    Always,
}

/// Phrases that imply a chain of relations, which plain similarity search
/// tends to answer badly.
static MULTI_HOP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bconnected (to|with)\b",
        r"\blinked (to|with)\b",
        r"\bin relation to\b",
        r"\b(relationship|relation|link|connection)s? between\b",
        r"\brelated to\b",
        r"\b(who|which|what) (manages|leads|owns|runs|works on|reports to) the \w+ (that|which|who)\b",
        r"\b(manager|owner|lead|head|member)s? of the \w+ (that|which|who)\b",
        r"\bhow (is|are|does|do) .+ (connect|relate|depend)",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){}", p)).expect("multi-hop pattern is valid"))
    .collect()
});

pub fn has_multi_hop_indicator(text: &str) -> bool {
    MULTI_HOP_PATTERNS.iter().any(|re| re.is_match(text))
}

/// Process-wide "is any document indexed" flag, shared by every query.
#[derive(Debug, Clone, Default)]
pub struct CorpusAvailability(Arc<AtomicBool>);

impl CorpusAvailability {
    pub fn new(available: bool) -> Self {
        Self(Arc::new(AtomicBool::new(available)))
    }

    /// Record the current corpus size. Returns true when availability changed.
    pub fn set_document_count(&self, count: u64) -> bool {
        let available = count > 0;
        let previous = self.0.swap(available, Ordering::AcqRel);
        if previous != available {
            info!(available, documents = count, "Corpus availability changed");
        }
        previous != available
    }

    pub fn is_available(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Decides whether a query gets retrieval context. Built once per request.
#[derive(Debug, Clone, Copy)]
pub struct ActivationPolicy {
    mode: ActivationMode,
    manual_flag: bool,
}

impl ActivationPolicy {
    pub fn new(mode: ActivationMode, manual_flag: bool) -> Self {
        Self { mode, manual_flag }
    }

    pub fn mode(&self) -> ActivationMode {
        self.mode
    }

    pub fn should_activate(&self, text: &str, known_entities: usize, corpus: &CorpusAvailability) -> bool {
        if !corpus.is_available() {
            debug!("No documents indexed, skipping retrieval");
            return false;
        }

        let activate = match self.mode {
            ActivationMode::Always => true,
            ActivationMode::Manual => self.manual_flag,
            ActivationMode::Automatic => {
                !text.trim().is_empty() && (known_entities > 1 || has_multi_hop_indicator(text))
            }
        };

        debug!(mode = ?self.mode, known_entities, activate, "Activation decision");
        activate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn available() -> CorpusAvailability {
        CorpusAvailability::new(true)
    }

    #[test]
    fn test_automatic_multi_hop_phrases() {
        let policy = ActivationPolicy::new(ActivationMode::Automatic, false);
        let corpus = available();

        assert!(policy.should_activate("How is billing connected to payroll?", 0, &corpus));
        assert!(policy.should_activate("Who manages the project that ships invoices?", 0, &corpus));
        assert!(policy.should_activate("Explain auth in relation to SSO", 0, &corpus));
        assert!(!policy.should_activate("What is the capital of France?", 0, &corpus));
    }

    #[test]
    fn test_automatic_entity_count() {
        let policy = ActivationPolicy::new(ActivationMode::Automatic, false);
        let corpus = available();

        assert!(!policy.should_activate("Tell me about it", 1, &corpus));
        assert!(policy.should_activate("Tell me about it", 2, &corpus));
        assert!(!policy.should_activate("   ", 5, &corpus));
    }

    #[test]
    fn test_manual_and_always() {
        let corpus = available();
        assert!(ActivationPolicy::new(ActivationMode::Manual, true).should_activate("hi", 0, &corpus));
        assert!(!ActivationPolicy::new(ActivationMode::Manual, false).should_activate(
            "How is A connected to B?",
            3,
            &corpus
        ));
        assert!(ActivationPolicy::new(ActivationMode::Always, false).should_activate("", 0, &corpus));
    }

    #[test]
    fn test_empty_corpus_overrides_every_mode() {
        let corpus = CorpusAvailability::default();
        for mode in [ActivationMode::Manual, ActivationMode::Automatic, ActivationMode::Always] {
            let policy = ActivationPolicy::new(mode, true);
            assert!(!policy.should_activate("How is A connected to B?", 3, &corpus));
        }
    }

    #[test]
    fn test_decision_is_repeatable() {
        let policy = ActivationPolicy::new(ActivationMode::Automatic, false);
        let corpus = available();
        let text = "Which team is linked to the outage?";
        let first = policy.should_activate(text, 1, &corpus);
        assert_eq!(first, policy.should_activate(text, 1, &corpus));
    }

    #[test]
    fn test_availability_transitions() {
        let corpus = CorpusAvailability::default();
        let shared = corpus.clone();

        assert!(corpus.set_document_count(3));
        assert!(shared.is_available());
        assert!(!corpus.set_document_count(7));
        assert!(corpus.set_document_count(0));
        assert!(!shared.is_available());
    }
}
