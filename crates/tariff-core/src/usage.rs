//! Usage recording and stats: the seams to the external collaborators.
//! Neither may ever block or fail a request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{Value as JsonValue, json};
use tariff_routing::Tier;
use time::OffsetDateTime;
use tracing::info;

#[derive(Debug, Clone)]
pub struct UsageEntry {
    pub model: String,
    pub tier: Option<Tier>,
    pub cost: f64,
    pub baseline: f64,
    pub savings: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub latency_ms: u64,
    pub at: OffsetDateTime,
}

pub trait UsageSink: Send + Sync {
    fn record(&self, entry: UsageEntry);
}

pub trait StatsSource: Send + Sync {
    fn aggregate(&self, days: u32) -> JsonValue;
}

pub type SharedUsageSink = Arc<dyn UsageSink>;
pub type SharedStatsSource = Arc<dyn StatsSource>;

pub struct NoopUsageSink;

impl UsageSink for NoopUsageSink {
    fn record(&self, _entry: UsageEntry) {}
}

#[derive(Debug, Default, Clone)]
struct ModelCounters {
    requests: u64,
    prompt_tokens: u64,
    completion_tokens: u64,
    cost: f64,
    baseline: f64,
}

/// In-process collector: logs each entry and keeps per-model counters
/// for `/stats`. Stands in for the external stats store.
#[derive(Default)]
pub struct MemoryUsageLog {
    started_at: Option<OffsetDateTime>,
    counters: Mutex<HashMap<String, ModelCounters>>,
}

impl MemoryUsageLog {
    pub fn new() -> Self {
        Self {
            started_at: Some(OffsetDateTime::now_utc()),
            counters: Mutex::new(HashMap::new()),
        }
    }
}

impl UsageSink for MemoryUsageLog {
    fn record(&self, entry: UsageEntry) {
        info!(
            event = "usage",
            model = %entry.model,
            tier = entry.tier.map(|t| t.as_str()),
            cost = entry.cost,
            baseline = entry.baseline,
            savings = entry.savings,
            prompt_tokens = entry.prompt_tokens,
            completion_tokens = entry.completion_tokens,
            latency_ms = entry.latency_ms,
        );
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let slot = counters.entry(entry.model).or_default();
        slot.requests += 1;
        slot.prompt_tokens += entry.prompt_tokens;
        slot.completion_tokens += entry.completion_tokens;
        slot.cost += entry.cost;
        slot.baseline += entry.baseline;
    }
}

impl StatsSource for MemoryUsageLog {
    fn aggregate(&self, days: u32) -> JsonValue {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        let mut models = serde_json::Map::new();
        let mut total_cost = 0.0;
        let mut total_baseline = 0.0;
        let mut total_requests = 0u64;
        for (model, slot) in counters.iter() {
            total_cost += slot.cost;
            total_baseline += slot.baseline;
            total_requests += slot.requests;
            models.insert(
                model.clone(),
                json!({
                    "requests": slot.requests,
                    "promptTokens": slot.prompt_tokens,
                    "completionTokens": slot.completion_tokens,
                    "cost": slot.cost,
                }),
            );
        }
        let saved = (total_baseline - total_cost).max(0.0);
        json!({
            "days": days,
            "since": self.started_at.map(|t| t.to_string()),
            "totalRequests": total_requests,
            "totalCost": total_cost,
            "totalSaved": saved,
            "models": JsonValue::Object(models),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_model() {
        let log = MemoryUsageLog::new();
        for _ in 0..2 {
            log.record(UsageEntry {
                model: "openai/gpt-4o-mini".to_string(),
                tier: Some(Tier::Simple),
                cost: 0.001,
                baseline: 0.01,
                savings: 0.9,
                prompt_tokens: 100,
                completion_tokens: 20,
                latency_ms: 250,
                at: OffsetDateTime::now_utc(),
            });
        }
        let stats = log.aggregate(7);
        assert_eq!(stats["totalRequests"], 2);
        assert_eq!(stats["models"]["openai/gpt-4o-mini"]["requests"], 2);
        assert!(stats["totalSaved"].as_f64().unwrap() > 0.0);
    }
}
