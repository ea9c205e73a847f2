//! Review complexity analysis.
//!
//! The complexity module scores a review on four independent dimensions and
//! combines them with fixed weights into a single value in `[0, 1]` that the
//! [`TierRouter`](crate::router::TierRouter) maps to a model tier:
//! - Technical density (category lexicon matches per word)
//! - Sentiment difficulty (polarity, contrast markers, emphasis)
//! - Length (saturating in word count)
//! - Domain signals (category indicators, questions, comparisons)
//!
//! Scoring is a pure function of `(text, category)`; the analyzer holds only
//! immutable compiled patterns and can be shared across workers freely.

use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::error::{Error, Result};
use crate::router::{TierConfig, TierRouter};

/// Weight of the technical sub-score.
pub const TECHNICAL_WEIGHT: f64 = 0.35;
/// Weight of the sentiment sub-score.
pub const SENTIMENT_WEIGHT: f64 = 0.25;
/// Weight of the length sub-score.
pub const LENGTH_WEIGHT: f64 = 0.20;
/// Weight of the domain sub-score.
pub const DOMAIN_WEIGHT: f64 = 0.20;

/// Word count at which the length sub-score saturates.
pub const LENGTH_SATURATION_WORDS: f64 = 150.0;

/// Technical score used for categories without a registered lexicon.
const UNKNOWN_CATEGORY_TECHNICAL: f64 = 0.1;

/// Weighted complexity of a single review.
///
/// Only constructible from the four sub-scores, so `final_score` is always
/// the weighted sum of the values it is stored with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComplexityScore {
    technical: f64,
    sentiment: f64,
    length: f64,
    domain: f64,
    #[serde(rename = "final")]
    final_score: f64,
}

impl ComplexityScore {
    /// Build a score from its sub-scores; each is clamped to `[0, 1]`.
    pub fn from_parts(technical: f64, sentiment: f64, length: f64, domain: f64) -> Self {
        let technical = clamp_unit(technical);
        let sentiment = clamp_unit(sentiment);
        let length = clamp_unit(length);
        let domain = clamp_unit(domain);

        // Fixed summation order keeps recomputation bit-for-bit stable.
        let final_score = clamp_unit(
            TECHNICAL_WEIGHT * technical
                + SENTIMENT_WEIGHT * sentiment
                + LENGTH_WEIGHT * length
                + DOMAIN_WEIGHT * domain,
        );

        Self {
            technical,
            sentiment,
            length,
            domain,
            final_score,
        }
    }

    /// Score of empty or degenerate text.
    pub fn zero() -> Self {
        Self::from_parts(0.0, 0.0, 0.0, 0.0)
    }

    pub fn technical(&self) -> f64 {
        self.technical
    }

    pub fn sentiment(&self) -> f64 {
        self.sentiment
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn domain(&self) -> f64 {
        self.domain
    }

    /// Weighted final score in `[0, 1]`.
    pub fn final_score(&self) -> f64 {
        self.final_score
    }

    /// Tier this score falls into under the given router.
    pub fn tier<'a>(&self, router: &'a TierRouter) -> &'a TierConfig {
        router.route(self.final_score)
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Compiled term sets for one product category.
#[derive(Debug, Clone)]
pub struct CategoryLexicon {
    technical: Option<Regex>,
    indicators: Option<Regex>,
}

impl CategoryLexicon {
    /// Compile a lexicon from technical terms and secondary domain indicators.
    ///
    /// Terms match case-insensitively on word boundaries; multi-word phrases
    /// are allowed.
    pub fn new<S: AsRef<str>>(technical: &[S], indicators: &[S]) -> Result<Self> {
        Ok(Self {
            technical: term_pattern(technical)?,
            indicators: term_pattern(indicators)?,
        })
    }

    fn technical_matches(&self, text: &str) -> usize {
        count_matches(self.technical.as_ref(), text)
    }

    fn indicator_matches(&self, text: &str) -> usize {
        count_matches(self.indicators.as_ref(), text)
    }
}

fn term_pattern<S: AsRef<str>>(terms: &[S]) -> Result<Option<Regex>> {
    let mut escaped: Vec<String> = terms
        .iter()
        .map(|t| t.as_ref().trim())
        .filter(|t| !t.is_empty())
        .map(regex::escape)
        .collect();

    if escaped.is_empty() {
        return Ok(None);
    }

    // Longest first so phrases win over their prefixes
    escaped.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    escaped.dedup();

    let pattern = format!(r"(?i)\b(?:{})\b", escaped.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| Error::config(format!("invalid lexicon pattern: {}", e)))
}

fn count_matches(pattern: Option<&Regex>, text: &str) -> usize {
    pattern.map_or(0, |re| re.find_iter(text).count())
}

fn normalize_category(category: &str) -> String {
    category.trim().to_lowercase()
}

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}]+(?:'[\p{L}]+)?").expect("invalid regex"));

static POLARITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:love|loved|hate|hated|amazing|terrible|fantastic|awful|excellent|horrible|perfect|worst|best|disappointed|disappointing)\b",
    )
    .expect("invalid regex")
});

static NUANCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:however|although|despite|nevertheless|on the other hand|mixed feelings|somewhat|partially|mostly|generally)\b",
    )
    .expect("invalid regex")
});

static INTENSIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:very|extremely|absolutely|incredibly|totally|utterly|really)\b")
        .expect("invalid regex")
});

static REPEATED_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[!?]{2,}").expect("invalid regex"));

static SHOUTED_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\p{Lu}{4,}\b").expect("invalid regex"));

static COMPARISON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:better|worse|compared to|versus|vs|than)\b").expect("invalid regex")
});

static BUILTIN_LEXICONS: LazyLock<HashMap<String, CategoryLexicon>> = LazyLock::new(|| {
    let mut lexicons = HashMap::new();

    lexicons.insert(
        normalize_category("Electronics"),
        CategoryLexicon::new(
            &[
                "processor", "cpu", "gpu", "ram", "memory", "storage", "ssd", "hdd", "display",
                "resolution", "refresh rate", "brightness", "contrast", "battery", "mah", "watt",
                "voltage", "amperage", "usb", "hdmi", "bluetooth", "wifi", "connectivity",
                "ports", "interface", "firmware", "latency", "throughput",
            ],
            &["specs", "specifications", "performance", "benchmark", "benchmarks"],
        )
        .expect("built-in lexicon"),
    );

    lexicons.insert(
        normalize_category("Books"),
        CategoryLexicon::new(
            &[
                "plot", "character", "characters", "narrative", "prose", "style", "genre",
                "chapter", "storyline", "protagonist", "antagonist", "theme", "development",
                "pacing", "dialogue", "setting", "climax",
            ],
            &["author", "writing style", "literary", "narrative"],
        )
        .expect("built-in lexicon"),
    );

    lexicons.insert(
        normalize_category("Home_and_Garden"),
        CategoryLexicon::new(
            &[
                "material", "durability", "weather resistant", "assembly", "installation",
                "maintenance", "quality", "construction", "design", "functionality",
                "ergonomic", "efficiency",
            ],
            &["installation", "assembly", "durability", "weather"],
        )
        .expect("built-in lexicon"),
    );

    lexicons
});

/// Keyword and length based complexity scorer.
#[derive(Debug, Clone)]
pub struct ComplexityAnalyzer {
    lexicons: HashMap<String, CategoryLexicon>,
}

impl Default for ComplexityAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplexityAnalyzer {
    /// Create an analyzer with the built-in category lexicons.
    pub fn new() -> Self {
        Self {
            lexicons: BUILTIN_LEXICONS.clone(),
        }
    }

    /// Create an analyzer with no category lexicons.
    pub fn without_lexicons() -> Self {
        Self {
            lexicons: HashMap::new(),
        }
    }

    /// Register (or replace) the lexicon for a category.
    pub fn with_lexicon(mut self, category: &str, lexicon: CategoryLexicon) -> Self {
        self.lexicons.insert(normalize_category(category), lexicon);
        self
    }

    /// Whether a lexicon is registered for the category.
    pub fn knows_category(&self, category: &str) -> bool {
        self.lexicons.contains_key(&normalize_category(category))
    }

    /// Score a review. Never fails; degenerate text scores zero everywhere.
    pub fn score(&self, text: &str, category: &str) -> ComplexityScore {
        let words = WORD.find_iter(text).count();
        if words == 0 {
            return ComplexityScore::zero();
        }

        let lexicon = self.lexicons.get(&normalize_category(category));

        ComplexityScore::from_parts(
            technical_score(text, words, lexicon),
            sentiment_score(text),
            length_score(words),
            domain_score(text, lexicon),
        )
    }
}

fn technical_score(text: &str, words: usize, lexicon: Option<&CategoryLexicon>) -> f64 {
    let Some(lexicon) = lexicon else {
        return UNKNOWN_CATEGORY_TECHNICAL;
    };

    let density = lexicon.technical_matches(text) as f64 / words as f64;
    (density * 10.0).min(1.0)
}

fn sentiment_score(text: &str) -> f64 {
    let polarity = POLARITY.find_iter(text).count() as f64;
    let nuance = NUANCE.find_iter(text).count() as f64;
    let sentences = text
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count() as f64;
    let emphasis = (INTENSIFIER.find_iter(text).count()
        + REPEATED_PUNCTUATION.find_iter(text).count()
        + SHOUTED_WORD.find_iter(text).count()) as f64;

    let score = 0.1
        + (polarity * 0.1).min(0.4)
        + (nuance * 0.2).min(0.3)
        + (sentences * 0.05).min(0.3)
        + (emphasis * 0.05).min(0.2);
    score.min(1.0)
}

fn length_score(words: usize) -> f64 {
    (words as f64 / LENGTH_SATURATION_WORDS).min(1.0)
}

fn domain_score(text: &str, lexicon: Option<&CategoryLexicon>) -> f64 {
    let indicators = lexicon.map_or(0, |l| l.indicator_matches(text)) as f64;
    let questions = text.matches('?').count() as f64;
    let comparisons = COMPARISON.find_iter(text).count() as f64;

    let score = 0.1
        + (indicators * 0.15).min(0.4)
        + (questions * 0.1).min(0.2)
        + (comparisons * 0.1).min(0.3);
    score.min(1.0)
}
