//! Per-model cooldown marks (C8). A 429 parks the model for a cooldown;
//! lookups expire marks lazily; `prioritize` pushes recently-throttled
//! models to the back of a fallback chain without reordering inside the
//! partitions.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct RateLimitMap {
    marks: Mutex<HashMap<String, Instant>>,
    cooldown: Duration,
}

impl RateLimitMap {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            marks: Mutex::new(HashMap::new()),
            cooldown,
        }
    }

    pub fn mark(&self, model: &str) {
        let mut marks = self.marks.lock().unwrap_or_else(|e| e.into_inner());
        marks.insert(model.to_string(), Instant::now());
    }

    pub fn is_limited(&self, model: &str) -> bool {
        let mut marks = self.marks.lock().unwrap_or_else(|e| e.into_inner());
        match marks.get(model) {
            Some(hit_at) if hit_at.elapsed() < self.cooldown => true,
            Some(_) => {
                marks.remove(model);
                false
            }
            None => false,
        }
    }

    /// Stable partition: unlimited models first, then limited ones ordered
    /// least-recently-throttled first.
    pub fn prioritize(&self, models: &[String]) -> Vec<String> {
        let marks = self.marks.lock().unwrap_or_else(|e| e.into_inner());
        let mut free = Vec::new();
        let mut limited: Vec<(String, Instant)> = Vec::new();
        for model in models {
            match marks.get(model) {
                Some(hit_at) if hit_at.elapsed() < self.cooldown => {
                    limited.push((model.clone(), *hit_at));
                }
                _ => free.push(model.clone()),
            }
        }
        limited.sort_by_key(|(_, hit_at)| *hit_at);
        free.extend(limited.into_iter().map(|(model, _)| model));
        free
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_expires_after_cooldown() {
        let map = RateLimitMap::new(Duration::from_millis(20));
        map.mark("openai/gpt-4o");
        assert!(map.is_limited("openai/gpt-4o"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!map.is_limited("openai/gpt-4o"));
    }

    #[test]
    fn prioritize_preserves_order_within_partitions() {
        let map = RateLimitMap::new(Duration::from_secs(60));
        map.mark("b");
        std::thread::sleep(Duration::from_millis(2));
        map.mark("d");
        let chain: Vec<String> = ["a", "b", "c", "d"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let out = map.prioritize(&chain);
        assert_eq!(out, vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn all_limited_keeps_least_recent_first() {
        let map = RateLimitMap::new(Duration::from_secs(60));
        map.mark("y");
        std::thread::sleep(Duration::from_millis(2));
        map.mark("x");
        let chain: Vec<String> = ["x", "y"].iter().map(|s| s.to_string()).collect();
        assert_eq!(map.prioritize(&chain), vec!["y", "x"]);
    }
}
