use regex::Regex;

/// A text matcher that proposes entity candidates.
///
/// Locales that do not mark proper nouns with capitals can plug in their own
/// matchers without touching the harvesting or refinement logic.
pub trait EntityPattern: Send + Sync {
    fn name(&self) -> &str;

    fn candidates(&self, text: &str) -> Vec<String>;
}

/// Regex-backed pattern. Uses capture group 1 when the regex has one,
/// otherwise the whole match.
pub struct RegexPattern {
    name: String,
    regex: Regex,
}

impl RegexPattern {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            regex: Regex::new(pattern)?,
        })
    }

    /// Two or more consecutive capitalized words ("Project Alpha", "Ada Lovelace").
    pub fn capitalized_runs() -> Self {
        Self::from_literal(
            "capitalized_run",
            r"\b\p{Lu}[\p{L}\p{N}]*(?:[ \t]+\p{Lu}[\p{L}\p{N}]*)+\b",
        )
    }

    /// Text between straight or curly double quotes.
    pub fn quoted_phrases() -> Self {
        Self::from_literal("quoted", r#"["\u{201C}]([^"\u{201C}\u{201D}\n]+)["\u{201D}]"#)
    }

    /// Text between backticks, typically technical terms.
    pub fn inline_code() -> Self {
        Self::from_literal("inline_code", r"`([^`\n]+)`")
    }

    fn from_literal(name: &str, pattern: &str) -> Self {
        // built-in literals are covered by tests
        Self::new(name, pattern).expect("built-in entity pattern must compile")
    }
}

impl EntityPattern for RegexPattern {
    fn name(&self) -> &str {
        &self.name
    }

    fn candidates(&self, text: &str) -> Vec<String> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

/// An ordered collection of patterns applied independently to the same text.
pub struct PatternSet {
    patterns: Vec<Box<dyn EntityPattern>>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self { patterns: Vec::new() }
    }

    /// Capitalized runs, quoted phrases and inline code.
    pub fn latin() -> Self {
        Self::new()
            .with(RegexPattern::capitalized_runs())
            .with(RegexPattern::quoted_phrases())
            .with(RegexPattern::inline_code())
    }

    pub fn with(mut self, pattern: impl EntityPattern + 'static) -> Self {
        self.patterns.push(Box::new(pattern));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn EntityPattern> {
        self.patterns.iter().map(|p| p.as_ref())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self::latin()
    }
}
