//! The routing brain: model catalog, prompt classifier, tier selector,
//! and the cost arithmetic behind a routing decision.

pub mod classifier;
pub mod decision;
pub mod registry;
pub mod selector;

pub use classifier::{Classification, ScoringConfig, Signal, classify};
pub use decision::{RoutingDecision, Tier, build_decision, estimate_tokens, projected_cost};
pub use registry::{GATEWAY_PROVIDER, Model, ModelRegistry, native_dialect, provider_base_url};
pub use selector::{TierConfig, TierTables, widened_tiers};

/// The reserved model id that hands routing to the brain.
pub const AUTO_MODEL: &str = "auto";

/// Aliases the proxy accepts for `auto`.
pub fn is_auto_model(model: &str) -> bool {
    matches!(model, AUTO_MODEL | "tariff/auto")
}
