//! Rule-based prompt classifier.
//!
//! Scores the *user* prompt against weighted signals and maps the sum to a
//! tier. The system prompt is never scanned for lexical cues: tool
//! boilerplate in a system prompt must not lift every query's tier. Token
//! thresholds likewise consider the user prompt only.

use std::sync::LazyLock;

use regex::Regex;

use crate::decision::{Tier, estimate_tokens};

/// Every cutoff and dimension weight is configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringConfig {
    pub reasoning_cue_weight: f64,
    pub short_prompt_weight: f64,
    pub long_prompt_weight: f64,
    pub medium_token_weight: f64,
    pub structured_output_weight: f64,
    pub interrogative_weight: f64,
    pub greeting_weight: f64,
    pub code_weight: f64,
    /// Structural hook for system-prompt presence. Zero by default; must
    /// never be positive or system prompts could escalate tiers.
    pub system_presence_weight: f64,

    pub short_prompt_chars: usize,
    pub long_prompt_chars: usize,
    pub medium_token_threshold: u64,
    pub complex_token_threshold: u64,

    pub medium_cutoff: f64,
    pub complex_cutoff: f64,
    pub reasoning_cutoff: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            reasoning_cue_weight: 8.0,
            short_prompt_weight: -2.0,
            long_prompt_weight: 1.0,
            medium_token_weight: 2.0,
            structured_output_weight: 3.0,
            interrogative_weight: -1.0,
            greeting_weight: -4.0,
            code_weight: 3.0,
            system_presence_weight: 0.0,
            short_prompt_chars: 80,
            long_prompt_chars: 400,
            medium_token_threshold: 4_000,
            complex_token_threshold: 100_000,
            medium_cutoff: 2.0,
            complex_cutoff: 4.0,
            reasoning_cutoff: 6.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub name: &'static str,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub tier: Tier,
    pub score: f64,
    pub signals: Vec<Signal>,
}

/// Explicit reasoning cues, multilingual. Latin-script phrases are matched
/// case-insensitively; CJK and Cyrillic phrases match as written.
static REASONING_CUES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)step[ \-]by[ \-]step|chain[ \-]of[ \-]thought|show your work|think carefully|",
        r"\bprove\b|\bproof\b|\bderive\b|\bderivation\b|\btheorem\b|",
        r"schritt f(?:ü|u)r schritt|\bbeweise?n?\b|\bherleiten\b|",
        r"шаг за шагом|докажи|доказательств|выведи|",
        r"一步一步|逐步|证明|推导|",
        r"段階的に|証明|",
        r"단계별로|증명"
    ))
    .expect("reasoning cue pattern")
});

/// Code fences, inline code, or regex-looking fragments.
static CODE_SHAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"```|`[^`\n]+`|",
        r"\bfn\s+\w+\s*\(|\bdef\s+\w+\s*\(|\bclass\s+\w+|#include\s*<|",
        r"=>\s*\{|\);\s*$|",
        r"\\[dwsb][+*]|\(\?[:i<=!]"
    ))
    .expect("code shape pattern")
});

/// Literal structured-output requests.
const STRUCTURED_NEEDLES: &[&str] = &["json", "yaml", "schema", "respond in "];

/// Leading interrogatives, with translations.
const INTERROGATIVE_LEADS: &[&str] = &[
    "who", "what", "when", "where", "why", "how", "which", "wer", "was", "wann", "warum", "wie",
    "кто", "что", "когда", "почему", "как",
];

const INTERROGATIVE_CJK: &[&str] = &["谁", "什么", "为什么", "怎么", "なぜ", "何", "누가", "무엇"];

/// Score a user prompt. The result is purely a function of the inputs.
///
/// Both token thresholds are evaluated against the user prompt alone:
/// counting the whole budget would let tool boilerplate in a system
/// prompt drag every query upward.
pub fn classify(
    user_prompt: &str,
    system_prompt: Option<&str>,
    _total_tokens: u64,
    cfg: &ScoringConfig,
) -> Classification {
    let trimmed = user_prompt.trim();
    let user_tokens = estimate_tokens(trimmed);
    let mut signals = Vec::new();

    if REASONING_CUES.is_match(trimmed) {
        signals.push(Signal {
            name: "reasoning_cue",
            weight: cfg.reasoning_cue_weight,
        });
    }

    let chars = trimmed.chars().count();
    if chars <= cfg.short_prompt_chars {
        signals.push(Signal {
            name: "short_prompt",
            weight: cfg.short_prompt_weight,
        });
    } else if chars > cfg.long_prompt_chars {
        signals.push(Signal {
            name: "long_prompt",
            weight: cfg.long_prompt_weight,
        });
    }

    if user_tokens > cfg.medium_token_threshold {
        signals.push(Signal {
            name: "token_budget",
            weight: cfg.medium_token_weight,
        });
    }

    let structured = {
        let lower = trimmed.to_lowercase();
        STRUCTURED_NEEDLES.iter().any(|needle| lower.contains(needle))
    };
    if structured {
        signals.push(Signal {
            name: "structured_output",
            weight: cfg.structured_output_weight,
        });
    }

    if is_interrogative(trimmed) {
        signals.push(Signal {
            name: "interrogative",
            weight: cfg.interrogative_weight,
        });
    }

    if is_greeting_shaped(trimmed) {
        signals.push(Signal {
            name: "greeting",
            weight: cfg.greeting_weight,
        });
    }

    if CODE_SHAPES.is_match(trimmed) {
        signals.push(Signal {
            name: "code_shape",
            weight: cfg.code_weight,
        });
    }

    if system_prompt.is_some_and(|s| !s.trim().is_empty()) {
        signals.push(Signal {
            name: "system_prompt",
            weight: cfg.system_presence_weight.min(0.0),
        });
    }

    let score: f64 = signals.iter().map(|signal| signal.weight).sum();
    let mut tier = tier_for_score(score, cfg);

    // Structured-output requests floor at MEDIUM.
    if structured && tier < Tier::Medium {
        tier = Tier::Medium;
    }

    // Hard pin: a user prompt past the complex threshold is at least
    // COMPLEX; a reasoning-grade score still wins (capability bias).
    if user_tokens > cfg.complex_token_threshold && tier < Tier::Complex {
        tier = Tier::Complex;
    }

    Classification {
        tier,
        score,
        signals,
    }
}

/// Map a score to a tier. When two adjacent cutoffs are configured equal
/// and the score lands exactly on them, the cheaper tier wins.
fn tier_for_score(score: f64, cfg: &ScoringConfig) -> Tier {
    if score >= cfg.reasoning_cutoff && cfg.reasoning_cutoff > cfg.complex_cutoff {
        Tier::Reasoning
    } else if score >= cfg.complex_cutoff && cfg.complex_cutoff > cfg.medium_cutoff {
        Tier::Complex
    } else if score >= cfg.medium_cutoff {
        Tier::Medium
    } else {
        Tier::Simple
    }
}

fn is_interrogative(prompt: &str) -> bool {
    if prompt.trim_end().ends_with('?') || prompt.trim_end().ends_with('？') {
        return true;
    }
    if let Some(first) = prompt.split_whitespace().next() {
        let first = first
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if INTERROGATIVE_LEADS.contains(&first.as_str()) {
            return true;
        }
    }
    INTERROGATIVE_CJK
        .iter()
        .any(|lead| prompt.starts_with(lead))
}

/// At most three whitespace tokens and no punctuation beyond `?!.`.
fn is_greeting_shaped(prompt: &str) -> bool {
    let tokens = prompt.split_whitespace().count();
    if tokens == 0 || tokens > 3 {
        return false;
    }
    prompt
        .chars()
        .all(|c| c.is_alphanumeric() || c.is_whitespace() || matches!(c, '?' | '!' | '.' | '\''))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ScoringConfig {
        ScoringConfig::default()
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let a = classify("Explain monads simply", None, 50, &cfg());
        let b = classify("Explain monads simply", None, 50, &cfg());
        assert_eq!(a.tier, b.tier);
        assert_eq!(a.score, b.score);
        assert_eq!(a.signals, b.signals);
    }

    #[test]
    fn greeting_lands_simple() {
        let result = classify("hi there!", None, 3, &cfg());
        assert_eq!(result.tier, Tier::Simple);
        assert!(result.signals.iter().any(|s| s.name == "greeting"));
    }

    #[test]
    fn factual_question_lands_simple() {
        let result = classify("What is the capital of France?", None, 10, &cfg());
        assert_eq!(result.tier, Tier::Simple);
        assert!(result.signals.iter().any(|s| s.name == "interrogative"));
    }

    #[test]
    fn proof_request_lands_reasoning() {
        let prompt = "Prove that sqrt(2) is irrational step by step using proof by contradiction";
        let result = classify(prompt, None, 20, &cfg());
        assert_eq!(result.tier, Tier::Reasoning);
    }

    #[test]
    fn multilingual_cues_register() {
        for prompt in [
            "Beweise die Aussage Schritt für Schritt und erkläre jede Umformung ausführlich.",
            "докажи теорему шаг за шагом и поясни каждый переход в рассуждении подробно",
            "请一步一步证明这个定理，并且详细解释每一步的推导过程和所用的引理",
        ] {
            let result = classify(prompt, None, 50, &cfg());
            assert!(
                result.signals.iter().any(|s| s.name == "reasoning_cue"),
                "no cue for: {prompt}"
            );
        }
    }

    #[test]
    fn system_prompt_never_raises_tier() {
        let prompt = "Summarize the attached report in two sentences for an executive audience.";
        let bare = classify(prompt, None, 100, &cfg());
        let boiler = "x".repeat(50_000);
        let with_sys = classify(prompt, Some(&boiler), 100 + 12_500, &cfg());
        assert!(with_sys.tier <= bare.tier);
    }

    #[test]
    fn hard_complex_pin_is_user_only() {
        let huge_sys = "tool definitions ".repeat(40_000);
        let result = classify("What is 2+2?", Some(&huge_sys), 200_000, &cfg());
        assert!(result.tier < Tier::Complex);
    }

    #[test]
    fn huge_user_prompt_pins_complex() {
        let prompt = "a".repeat(500_000);
        let result = classify(&prompt, None, 125_000, &cfg());
        assert_eq!(result.tier, Tier::Complex);
    }

    #[test]
    fn huge_user_prompt_with_reasoning_cue_stays_reasoning() {
        let mut prompt = "Prove this step by step with a full chain of thought: ".to_string();
        prompt.push_str(&"data ".repeat(100_000));
        let result = classify(&prompt, None, 125_000, &cfg());
        assert_eq!(result.tier, Tier::Reasoning);
    }

    #[test]
    fn adding_reasoning_keyword_never_lowers_tier() {
        let base = "Tell me about the weather in Paris today please";
        let baseline = classify(base, None, 12, &cfg());
        let escalated = format!("{base} and prove your answer step by step");
        let result = classify(&escalated, None, 20, &cfg());
        assert!(result.tier >= baseline.tier);
    }

    #[test]
    fn structured_output_floors_at_medium() {
        let result = classify("give me the list as JSON", None, 8, &cfg());
        assert!(result.tier >= Tier::Medium);
    }

    #[test]
    fn equal_cutoffs_collapse_to_cheaper_tier() {
        let mut config = cfg();
        config.medium_cutoff = 4.0;
        config.complex_cutoff = 4.0;
        config.reasoning_cutoff = 4.0;
        // Long prose plus a code fence scores exactly long(+1) + code(+3).
        let filler = "please review the following change carefully and leave detailed notes on \
                      naming, structure, error paths, and anything that looks fragile "
            .repeat(4);
        let prompt = format!("{filler}\n```rust\nlet x = compute();\n```");
        let result = classify(&prompt, None, 200, &config);
        assert_eq!(result.score, 4.0);
        assert_eq!(result.tier, Tier::Medium);
    }

    #[test]
    fn code_block_scores_up() {
        let prompt = "Refactor this:\n```rust\nfn main() { println!(\"hi\"); }\n```";
        let result = classify(prompt, None, 20, &cfg());
        assert!(result.signals.iter().any(|s| s.name == "code_shape"));
    }
}
