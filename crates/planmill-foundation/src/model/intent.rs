//! Intent classification types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized category of a free-text refactoring request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    Refactor,
    Edit,
    Explain,
    TestGen,
    DocGen,
    Migration,
    Optimize,
    Debug,
    Analyze,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 10] = [
        Intent::Refactor,
        Intent::Edit,
        Intent::Explain,
        Intent::TestGen,
        Intent::DocGen,
        Intent::Migration,
        Intent::Optimize,
        Intent::Debug,
        Intent::Analyze,
        Intent::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Refactor => "refactor",
            Intent::Edit => "edit",
            Intent::Explain => "explain",
            Intent::TestGen => "test-gen",
            Intent::DocGen => "doc-gen",
            Intent::Migration => "migration",
            Intent::Optimize => "optimize",
            Intent::Debug => "debug",
            Intent::Analyze => "analyze",
            Intent::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimated size of the work an intent implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Complexity {
    /// Time multiplier applied to an intent's base estimate
    pub fn time_multiplier(&self) -> f64 {
        match self {
            Complexity::Low => 0.5,
            Complexity::Medium => 1.0,
            Complexity::High => 2.0,
        }
    }
}

/// Risk ordering is `Low < Medium < High`, so `max` picks the riskier level.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        })
    }
}

/// Structured result of classifying one request.
///
/// Created fresh per request and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentClassification {
    pub intent: Intent,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_intents: Option<Vec<String>>,
    pub complexity: Complexity,
    /// Estimated time in minutes
    pub estimated_time: f64,
    pub required_tools: Vec<String>,
    pub risk_level: RiskLevel,
}

impl IntentClassification {
    pub fn is_unknown(&self) -> bool {
        self.intent == Intent::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert_eq!(RiskLevel::Low.max(RiskLevel::High), RiskLevel::High);
    }

    #[test]
    fn test_intent_serializes_kebab_case() {
        let json = serde_json::to_string(&Intent::TestGen).unwrap();
        assert_eq!(json, "\"test-gen\"");
        for intent in Intent::ALL {
            let json = serde_json::to_value(intent).unwrap();
            assert_eq!(json.as_str().unwrap(), intent.as_str());
        }
    }
}
