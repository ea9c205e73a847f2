//! Review analysis prompt and reply parsing.
//!
//! The model is asked for a fixed four-line reply:
//!
//! ```text
//! SENTIMENT: positive
//! QUALITY: good
//! RECOMMENDATION: buy
//! INSIGHTS: Battery life is the main selling point
//! ```
//!
//! Parsing is tolerant: missing or unrecognised fields fall back to their
//! neutral defaults rather than failing.

use serde::{Deserialize, Serialize};

/// System prompt sent with every analysis request.
pub const SYSTEM_PROMPT: &str = "You are an expert product review analyzer.";

const DEFAULT_INSIGHT: &str = "Standard review";

/// Build the user prompt for one review.
pub fn analysis_prompt(text: &str, category: &str) -> String {
    format!(
        r#"Analyze this {category} product review:

Review: "{text}"

Provide analysis in this format:
SENTIMENT: [positive/negative/neutral]
QUALITY: [excellent/good/average/poor]
RECOMMENDATION: [buy/maybe/avoid]
INSIGHTS: [1-2 key points about the product]

Keep the analysis concise and focused."#,
        category = category.trim().replace('_', " "),
        text = text.trim(),
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    #[default]
    Neutral,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Excellent,
    Good,
    #[default]
    Average,
    Poor,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Buy,
    #[default]
    Maybe,
    Avoid,
}

/// Structured reading of a model's analysis reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewAnalysis {
    pub sentiment: Sentiment,
    pub quality: Quality,
    pub recommendation: Recommendation,
    pub insights: Vec<String>,
}

impl Default for ReviewAnalysis {
    fn default() -> Self {
        Self {
            sentiment: Sentiment::default(),
            quality: Quality::default(),
            recommendation: Recommendation::default(),
            insights: vec![DEFAULT_INSIGHT.to_string()],
        }
    }
}

/// Lowercased label with surrounding brackets and punctuation removed.
fn label(value: &str) -> String {
    value
        .trim()
        .trim_matches(|c: char| c == '[' || c == ']' || c == '*' || c == '.')
        .trim()
        .to_lowercase()
}

impl ReviewAnalysis {
    /// Parse a reply, keeping defaults for anything missing.
    pub fn parse(reply: &str) -> Self {
        let mut analysis = Self::default();

        for line in reply.lines() {
            let line = line.trim().trim_start_matches(['-', '*', ' ']);
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };

            match key.trim().trim_matches('*').to_ascii_uppercase().as_str() {
                "SENTIMENT" => {
                    analysis.sentiment = match label(value).as_str() {
                        "positive" => Sentiment::Positive,
                        "negative" => Sentiment::Negative,
                        _ => Sentiment::Neutral,
                    }
                }
                "QUALITY" => {
                    analysis.quality = match label(value).as_str() {
                        "excellent" => Quality::Excellent,
                        "good" => Quality::Good,
                        "poor" => Quality::Poor,
                        _ => Quality::Average,
                    }
                }
                "RECOMMENDATION" => {
                    analysis.recommendation = match label(value).as_str() {
                        "buy" => Recommendation::Buy,
                        "avoid" => Recommendation::Avoid,
                        _ => Recommendation::Maybe,
                    }
                }
                "INSIGHTS" => {
                    let insights: Vec<String> = value
                        .trim()
                        .trim_matches(|c| c == '[' || c == ']')
                        .split(';')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                    if !insights.is_empty() {
                        analysis.insights = insights;
                    }
                }
                _ => {}
            }
        }

        analysis
    }
}
