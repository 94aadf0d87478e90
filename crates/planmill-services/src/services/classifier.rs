//! Intent classification for free-text refactoring requests.
//!
//! The default classifier is a pure phrase-table matcher: no network or
//! filesystem access, and the same input always yields the same result.

use planmill_foundation::model::{
    tool_names, Complexity, Intent, IntentClassification, RequestContext, RiskLevel,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Which derived fields the classifier should compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifyOptions {
    pub extract_sub_intents: bool,
    /// Scan for magnitude words; otherwise the per-intent default is used
    pub derive_complexity: bool,
    pub estimate_time: bool,
    /// Combine intent and complexity risk; otherwise only the intent's risk is used
    pub assess_risk: bool,
    pub suggest_tools: bool,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            extract_sub_intents: true,
            derive_complexity: true,
            estimate_time: true,
            assess_risk: true,
            suggest_tools: true,
        }
    }
}

/// Defines the contract for a service that can classify requests.
pub trait IntentClassifier: Send + Sync {
    fn classify(
        &self,
        input: &str,
        context: &RequestContext,
        options: &ClassifyOptions,
    ) -> IntentClassification;
}

/// Exact phrase matches score 1.0, single-keyword matches 0.8
const EXACT_CONFIDENCE: f64 = 1.0;
const TOKEN_CONFIDENCE: f64 = 0.8;

const PHRASES: &[(&str, Intent)] = &[
    ("write tests", Intent::TestGen),
    ("generate tests", Intent::TestGen),
    ("add tests", Intent::TestGen),
    ("unit test", Intent::TestGen),
    ("test coverage", Intent::TestGen),
    ("add documentation", Intent::DocGen),
    ("document", Intent::DocGen),
    ("docstring", Intent::DocGen),
    ("readme", Intent::DocGen),
    ("migrate", Intent::Migration),
    ("migration", Intent::Migration),
    ("upgrade", Intent::Migration),
    ("port to", Intent::Migration),
    ("optimize", Intent::Optimize),
    ("optimise", Intent::Optimize),
    ("speed up", Intent::Optimize),
    ("performance", Intent::Optimize),
    ("faster", Intent::Optimize),
    ("debug", Intent::Debug),
    ("fix the bug", Intent::Debug),
    ("fix bug", Intent::Debug),
    ("crash", Intent::Debug),
    ("why does", Intent::Debug),
    ("explain", Intent::Explain),
    ("what does", Intent::Explain),
    ("how does", Intent::Explain),
    ("analyze", Intent::Analyze),
    ("analyse", Intent::Analyze),
    ("review", Intent::Analyze),
    ("audit", Intent::Analyze),
    ("refactor", Intent::Refactor),
    ("restructure", Intent::Refactor),
    ("clean up", Intent::Refactor),
    ("extract", Intent::Refactor),
    ("rename", Intent::Refactor),
    ("inline", Intent::Refactor),
    ("edit", Intent::Edit),
    ("change", Intent::Edit),
    ("modify", Intent::Edit),
    ("update", Intent::Edit),
    ("replace", Intent::Edit),
];

/// Phrase words too generic to identify an intent on their own
const STOPWORDS: &[&str] = &[
    "a", "add", "clean", "does", "fix", "generate", "how", "port", "speed", "the", "to", "up",
    "what", "why", "write",
];

const HIGH_COMPLEXITY_WORDS: &[&str] = &[
    "complex",
    "comprehensive",
    "entire",
    "whole",
    "large",
    "everywhere",
    "all files",
];

const LOW_COMPLEXITY_WORDS: &[&str] = &["simple", "trivial", "quick", "small", "minor", "tiny"];

fn sub_intent_keywords(intent: Intent) -> &'static [(&'static str, &'static str)] {
    match intent {
        Intent::Refactor => &[
            ("extract", "extract-function"),
            ("rename", "rename-symbol"),
            ("inline", "inline-function"),
            ("move", "move-module"),
            ("split", "split-module"),
            ("simplify", "simplify-logic"),
        ],
        Intent::Edit => &[
            ("add", "add-code"),
            ("remove", "remove-code"),
            ("delete", "remove-code"),
            ("replace", "replace-code"),
        ],
        Intent::TestGen => &[
            ("unit", "unit-tests"),
            ("integration", "integration-tests"),
            ("coverage", "coverage"),
        ],
        Intent::DocGen => &[
            ("readme", "readme"),
            ("comment", "inline-comments"),
            ("api", "api-docs"),
        ],
        Intent::Migration => &[
            ("upgrade", "dependency-upgrade"),
            ("framework", "framework-migration"),
            ("version", "version-bump"),
        ],
        Intent::Optimize => &[
            ("memory", "memory"),
            ("speed", "speed"),
            ("fast", "speed"),
            ("query", "query"),
        ],
        Intent::Debug => &[
            ("crash", "crash"),
            ("error", "error-trace"),
            ("leak", "leak"),
        ],
        Intent::Analyze => &[
            ("complexity", "complexity"),
            ("dependenc", "dependency-analysis"),
            ("security", "security"),
        ],
        Intent::Explain | Intent::Unknown => &[],
    }
}

fn default_complexity(intent: Intent) -> Complexity {
    match intent {
        Intent::Migration => Complexity::High,
        Intent::Refactor | Intent::TestGen | Intent::Optimize | Intent::Debug => {
            Complexity::Medium
        }
        Intent::Edit | Intent::Explain | Intent::DocGen | Intent::Analyze | Intent::Unknown => {
            Complexity::Low
        }
    }
}

/// Base estimate in minutes at medium complexity
fn base_time(intent: Intent) -> f64 {
    match intent {
        Intent::Refactor => 30.0,
        Intent::Edit => 10.0,
        Intent::Explain => 5.0,
        Intent::TestGen => 20.0,
        Intent::DocGen => 15.0,
        Intent::Migration => 120.0,
        Intent::Optimize => 45.0,
        Intent::Debug => 30.0,
        Intent::Analyze => 15.0,
        Intent::Unknown => 5.0,
    }
}

fn intent_risk(intent: Intent) -> RiskLevel {
    match intent {
        Intent::Migration => RiskLevel::High,
        Intent::Refactor | Intent::Optimize => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

fn complexity_risk(complexity: Complexity) -> RiskLevel {
    match complexity {
        Complexity::Low => RiskLevel::Low,
        Complexity::Medium => RiskLevel::Medium,
        Complexity::High => RiskLevel::High,
    }
}

fn default_tools(intent: Intent) -> &'static [&'static str] {
    use tool_names::*;
    match intent {
        Intent::Refactor | Intent::Migration => &[SEARCH, READ, EDIT, TYPECHECK, TEST_RUNNER],
        Intent::Edit | Intent::DocGen => &[READ, EDIT, FORMAT],
        Intent::TestGen | Intent::Optimize => &[SEARCH, READ, EDIT, TEST_RUNNER],
        Intent::Debug => &[SEARCH, READ, TEST_RUNNER],
        Intent::Explain | Intent::Analyze => &[SEARCH, READ],
        Intent::Unknown => &[],
    }
}

/// True when `needle` occurs in `haystack` at the start of a word
fn contains_word_prefix(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(idx, _)| {
        haystack[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

fn tokenize(input: &str) -> Vec<&str> {
    input
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|t| !t.is_empty())
        .collect()
}

fn singular(word: &str) -> &str {
    word.strip_suffix('s').filter(|w| w.len() > 2).unwrap_or(word)
}

/// Phrase-table classifier
#[derive(Debug, Clone, Default)]
pub struct KeywordIntentClassifier;

impl KeywordIntentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Longest phrase occurring verbatim; earlier table entries win ties
    fn exact_match(normalized: &str) -> Option<(&'static str, Intent)> {
        PHRASES
            .iter()
            .filter(|(phrase, _)| contains_word_prefix(normalized, phrase))
            .fold(None, |best: Option<(&'static str, Intent)>, &(phrase, intent)| match best {
                Some((b, _)) if b.len() >= phrase.len() => best,
                _ => Some((phrase, intent)),
            })
    }

    /// First phrase sharing a non-stopword keyword with the input
    fn token_match(normalized: &str) -> Option<(&'static str, Intent)> {
        let tokens: Vec<&str> = tokenize(normalized).into_iter().map(singular).collect();
        PHRASES.iter().copied().find(|(phrase, _)| {
            phrase
                .split_whitespace()
                .filter(|word| !STOPWORDS.contains(word))
                .any(|word| tokens.contains(&singular(word)))
        })
    }

    fn extract_sub_intents(intent: Intent, normalized: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for (keyword, sub_intent) in sub_intent_keywords(intent) {
            if contains_word_prefix(normalized, keyword) && !found.iter().any(|s| s == sub_intent) {
                found.push(sub_intent.to_string());
            }
        }
        found
    }

    fn derive_complexity(intent: Intent, normalized: &str) -> Complexity {
        if HIGH_COMPLEXITY_WORDS
            .iter()
            .any(|w| contains_word_prefix(normalized, w))
        {
            Complexity::High
        } else if LOW_COMPLEXITY_WORDS
            .iter()
            .any(|w| contains_word_prefix(normalized, w))
        {
            Complexity::Low
        } else {
            default_complexity(intent)
        }
    }

    fn required_tools(intent: Intent, complexity: Complexity) -> Vec<String> {
        let mut tools: Vec<String> = default_tools(intent).iter().map(|t| t.to_string()).collect();
        if complexity == Complexity::High && intent != Intent::Unknown {
            for extra in [tool_names::SAFETY_CHECK, tool_names::ROLLBACK] {
                if !tools.iter().any(|t| t == extra) {
                    tools.push(extra.to_string());
                }
            }
        }
        tools
    }
}

impl IntentClassifier for KeywordIntentClassifier {
    fn classify(
        &self,
        input: &str,
        context: &RequestContext,
        options: &ClassifyOptions,
    ) -> IntentClassification {
        let normalized = input.trim().to_lowercase();

        let (intent, confidence, reasoning) = if let Some((phrase, intent)) =
            Self::exact_match(&normalized)
        {
            (
                intent,
                EXACT_CONFIDENCE,
                format!("Matched phrase '{}' for intent '{}'", phrase, intent),
            )
        } else if let Some((phrase, intent)) = Self::token_match(&normalized) {
            (
                intent,
                TOKEN_CONFIDENCE,
                format!("Matched keyword of '{}' for intent '{}'", phrase, intent),
            )
        } else {
            (
                Intent::Unknown,
                0.0,
                "No known phrase or keyword matched the request".to_string(),
            )
        };

        let reasoning = match &context.current_file {
            Some(file) => format!("{} (current file: {})", reasoning, file),
            None => reasoning,
        };

        let sub_intents = options
            .extract_sub_intents
            .then(|| Self::extract_sub_intents(intent, &normalized))
            .filter(|subs| !subs.is_empty());

        let complexity = if options.derive_complexity {
            Self::derive_complexity(intent, &normalized)
        } else {
            default_complexity(intent)
        };

        let estimated_time = if options.estimate_time {
            base_time(intent) * complexity.time_multiplier()
        } else {
            0.0
        };

        let risk_level = if options.assess_risk {
            intent_risk(intent).max(complexity_risk(complexity))
        } else {
            intent_risk(intent)
        };

        let required_tools = if options.suggest_tools {
            Self::required_tools(intent, complexity)
        } else {
            Vec::new()
        };

        debug!(
            intent = %intent,
            confidence,
            complexity = ?complexity,
            risk = %risk_level,
            tools = required_tools.len(),
            "Classified request"
        );

        IntentClassification {
            intent,
            confidence,
            reasoning,
            sub_intents,
            complexity,
            estimated_time,
            required_tools,
            risk_level,
        }
    }
}
