//! Tier-to-model selection: the default and agentic tier tables, and the
//! widening order used when a tier has no resolvable model.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::decision::Tier;
use crate::registry::ModelRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub primary: String,
    #[serde(default)]
    pub fallback: Vec<String>,
}

impl TierConfig {
    fn new(primary: &str, fallback: &[&str]) -> Self {
        Self {
            primary: primary.to_string(),
            fallback: fallback.iter().map(|id| id.to_string()).collect(),
        }
    }

    /// Primary followed by fallbacks, in order. Never empty.
    pub fn chain(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(1 + self.fallback.len());
        out.push(self.primary.clone());
        out.extend(self.fallback.iter().cloned());
        out
    }
}

#[derive(Debug, Clone)]
pub struct TierTables {
    tiers: HashMap<Tier, TierConfig>,
    agentic_tiers: HashMap<Tier, TierConfig>,
}

impl TierTables {
    pub fn builtin() -> Self {
        let tiers = HashMap::from([
            (
                Tier::Simple,
                TierConfig::new(
                    "google/gemini-2.0-flash",
                    &["openai/gpt-4o-mini", "anthropic/claude-3-5-haiku"],
                ),
            ),
            (
                Tier::Medium,
                TierConfig::new(
                    "deepseek/deepseek-chat",
                    &["openai/gpt-4o-mini", "google/gemini-2.5-pro"],
                ),
            ),
            (
                Tier::Complex,
                TierConfig::new(
                    "anthropic/claude-sonnet-4",
                    &["google/gemini-2.5-pro", "openai/gpt-4o"],
                ),
            ),
            (
                Tier::Reasoning,
                TierConfig::new(
                    "deepseek/deepseek-reasoner",
                    &["openai/o3-mini", "anthropic/claude-opus-4"],
                ),
            ),
        ]);
        let agentic_tiers = HashMap::from([
            (
                Tier::Simple,
                TierConfig::new("openai/gpt-4o-mini", &["google/gemini-2.5-pro"]),
            ),
            (
                Tier::Medium,
                TierConfig::new("openai/gpt-4o", &["anthropic/claude-sonnet-4"]),
            ),
            (
                Tier::Complex,
                TierConfig::new(
                    "anthropic/claude-sonnet-4",
                    &["openai/gpt-4o", "google/gemini-2.5-pro"],
                ),
            ),
            (
                Tier::Reasoning,
                TierConfig::new("anthropic/claude-opus-4", &["openai/gpt-4o"]),
            ),
        ]);
        Self {
            tiers,
            agentic_tiers,
        }
    }

    /// An agentic hint picks the agentic table; otherwise the default one.
    pub fn select(&self, tier: Tier, agentic: bool) -> &TierConfig {
        let table = if agentic {
            &self.agentic_tiers
        } else {
            &self.tiers
        };
        table
            .get(&tier)
            .or_else(|| self.tiers.get(&tier))
            .expect("tier tables cover every tier")
    }

    /// Every id in both tables must exist in the registry.
    pub fn validate(&self, registry: &ModelRegistry) -> Result<(), String> {
        for table in [&self.tiers, &self.agentic_tiers] {
            for config in table.values() {
                for id in config.chain() {
                    if !registry.contains(&id) {
                        return Err(format!("tier table references unknown model: {id}"));
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for TierTables {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Order in which tiers are tried when the selected tier has no resolvable
/// model: the tier itself, then alternately one up, one down.
pub fn widened_tiers(tier: Tier) -> Vec<Tier> {
    let position = Tier::ALL.iter().position(|t| *t == tier).unwrap_or(0);
    let mut out = vec![tier];
    for step in 1..Tier::ALL.len() {
        if let Some(up) = Tier::ALL.get(position + step) {
            out.push(*up);
        }
        if step <= position {
            out.push(Tier::ALL[position - step]);
        }
    }
    out
}
