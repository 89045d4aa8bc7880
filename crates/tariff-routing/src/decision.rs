use serde::{Deserialize, Serialize};

use crate::registry::Model;

/// Capability/cost band, ordered cheapest-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    Simple,
    Medium,
    Complex,
    Reasoning,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Simple, Tier::Medium, Tier::Complex, Tier::Reasoning];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Simple => "SIMPLE",
            Tier::Medium => "MEDIUM",
            Tier::Complex => "COMPLEX",
            Tier::Reasoning => "REASONING",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produced for every non-pinned `auto` request.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub tier: Tier,
    pub model: String,
    pub cost_estimate: f64,
    pub baseline_cost: f64,
    pub savings: f64,
    pub reasoning: String,
    pub notes: Vec<String>,
}

impl RoutingDecision {
    pub fn push_note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }
}

/// Cheap token estimate shared by the classifier, the context-window
/// filter, and the cost projection. Roughly four characters per token.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Projected request cost in USD for a token split.
pub fn projected_cost(model: &Model, input_tokens: u64, output_tokens: u64) -> f64 {
    (input_tokens as f64 / 1_000_000.0) * model.input_price
        + (output_tokens as f64 / 1_000_000.0) * model.output_price
}

/// Build a decision from the chosen model and the tier's full candidate
/// set. Baseline is the most expensive tier-appropriate candidate, so
/// `savings` lands in `[0, 1]` and `cost_estimate <= baseline_cost`.
pub fn build_decision(
    tier: Tier,
    chosen: &Model,
    candidates: &[&Model],
    input_tokens: u64,
    output_tokens: u64,
    reasoning: String,
) -> RoutingDecision {
    let cost_estimate = projected_cost(chosen, input_tokens, output_tokens);
    let baseline_cost = candidates
        .iter()
        .map(|model| projected_cost(model, input_tokens, output_tokens))
        .fold(cost_estimate, f64::max);
    let savings = if baseline_cost > 0.0 {
        ((baseline_cost - cost_estimate) / baseline_cost).clamp(0.0, 1.0)
    } else {
        0.0
    };
    RoutingDecision {
        tier,
        model: chosen.id.clone(),
        cost_estimate,
        baseline_cost,
        savings,
        reasoning,
        notes: Vec::new(),
    }
}
