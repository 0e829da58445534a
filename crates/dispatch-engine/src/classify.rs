//! Question difficulty scoring.
//!
//! The classifier is a plain trait so a statistical model can replace the
//! keyword scorer without touching the pipeline. The default scorer is
//! deterministic: the same question always lands on the same tier.

use std::fmt;

use serde::{Deserialize, Serialize};

use dispatch_core::ModelTier;

/// Analytics label recorded on every usage event.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Greeting,
    Lookup,
    Status,
    Analysis,
    Comparison,
    Forecast,
    General,
    ForcedDeep,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Lookup => "lookup",
            Self::Status => "status",
            Self::Analysis => "analysis",
            Self::Comparison => "comparison",
            Self::Forecast => "forecast",
            Self::General => "general",
            Self::ForcedDeep => "forced_deep",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub tier: ModelTier,
    pub query_type: QueryType,
}

impl Classification {
    pub fn forced_deep() -> Self {
        Self {
            tier: ModelTier::Deep,
            query_type: QueryType::ForcedDeep,
        }
    }
}

pub trait QueryClassifier: Send + Sync {
    fn classify(&self, question: &str) -> Classification;
}

/// Apply the caller's override before consulting `classifier`.
pub fn classify_query(
    classifier: &dyn QueryClassifier,
    question: &str,
    force_deep: bool,
) -> Classification {
    if force_deep {
        Classification::forced_deep()
    } else {
        classifier.classify(question)
    }
}

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "thanks", "thank you", "good morning", "good afternoon", "ok", "okay",
];
const LOOKUP: &[&str] = &[
    "what is", "what are", "how many", "how much", "when is", "when was", "where is", "who is",
    "which", "list", "show",
];
const STATUS: &[&str] = &[
    "status", "overdue", "open", "pending", "current", "latest", "today", "this week", "update",
];
const ANALYSIS: &[&str] = &[
    "why", "explain", "analyze", "analyse", "analysis", "assess", "evaluate", "root cause",
    "impact", "implications", "risk", "recommend", "should we", "strategy",
];
const COMPARISON: &[&str] = &[
    "compare", "comparison", "versus", "vs", "difference between", "relative to", "better than",
    "worse than",
];
const FORECAST: &[&str] = &[
    "forecast", "predict", "projection", "project out", "trend", "next year", "next quarter",
    "next month", "outlook", "scenario", "what if",
];

/// Score thresholds for the upper tiers.
const DEEP_SCORE: u32 = 4;
const MID_SCORE: u32 = 2;

/// Keyword, length and structure scoring.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    fn score(words: &Words, query_type: QueryType) -> u32 {
        let mut score = match query_type {
            QueryType::Greeting | QueryType::Lookup => 0,
            QueryType::Status | QueryType::General => 1,
            QueryType::Comparison | QueryType::Forecast => 2,
            QueryType::Analysis => 3,
            QueryType::ForcedDeep => return DEEP_SCORE,
        };
        // Independent signals stack.
        score += [
            words.hits(ANALYSIS) > 1,
            words.hits(ANALYSIS) > 0 && query_type != QueryType::Analysis,
            words.hits(COMPARISON) > 0 && query_type != QueryType::Comparison,
            words.hits(FORECAST) > 0 && query_type != QueryType::Forecast,
        ]
        .iter()
        .filter(|hit| **hit)
        .count() as u32;

        if words.len() > 40 {
            score += 2;
        } else if words.len() > 20 {
            score += 1;
        }
        if words.question_marks > 1 || words.has(" and also ") {
            score += 1;
        }
        score
    }

    fn query_type(words: &Words) -> QueryType {
        if words.len() <= 4 && words.hits(GREETINGS) > 0 && words.question_marks == 0 {
            return QueryType::Greeting;
        }
        if words.hits(FORECAST) > 0 {
            return QueryType::Forecast;
        }
        if words.hits(COMPARISON) > 0 {
            return QueryType::Comparison;
        }
        if words.hits(ANALYSIS) > 0 {
            return QueryType::Analysis;
        }
        if words.hits(STATUS) > 0 {
            return QueryType::Status;
        }
        if words.hits(LOOKUP) > 0 {
            return QueryType::Lookup;
        }
        QueryType::General
    }
}

impl QueryClassifier for KeywordClassifier {
    fn classify(&self, question: &str) -> Classification {
        let words = Words::new(question);
        let query_type = Self::query_type(&words);
        let score = Self::score(&words, query_type);
        let tier = if score >= DEEP_SCORE {
            ModelTier::Deep
        } else if score >= MID_SCORE {
            ModelTier::Mid
        } else {
            ModelTier::Cheap
        };
        Classification { tier, query_type }
    }
}

struct Words {
    padded: String,
    count: usize,
    question_marks: usize,
}

impl Words {
    fn new(raw: &str) -> Self {
        let lowered = raw.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .collect();
        Self {
            padded: format!(" {} ", words.join(" ")),
            count: words.len(),
            question_marks: raw.matches('?').count(),
        }
    }

    fn len(&self) -> usize {
        self.count
    }

    fn has(&self, padded_phrase: &str) -> bool {
        self.padded.contains(padded_phrase)
    }

    fn hits(&self, phrases: &[&str]) -> usize {
        phrases
            .iter()
            .filter(|p| self.padded.contains(&format!(" {p} ")))
            .count()
    }
}
