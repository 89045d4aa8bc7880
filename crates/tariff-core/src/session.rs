//! Session pinning (C7): once the brain picked a model for a session id,
//! later `auto` requests in that session reuse it until the TTL lapses.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use http::HeaderMap;
use tariff_routing::Tier;

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session_id: String,
    pub model: String,
    pub tier: Tier,
    pub first_seen: Instant,
    pub last_seen: Instant,
}

pub struct SessionStore {
    entries: Mutex<HashMap<String, SessionEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl SessionStore {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let entry = entries.get_mut(session_id)?;
        if entry.last_seen.elapsed() > self.ttl {
            entries.remove(session_id);
            return None;
        }
        entry.last_seen = Instant::now();
        Some(entry.clone())
    }

    pub fn set(&self, session_id: &str, model: &str, tier: Tier) {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(session_id.to_string())
            .and_modify(|entry| {
                entry.model = model.to_string();
                entry.tier = tier;
                entry.last_seen = now;
            })
            .or_insert_with(|| SessionEntry {
                session_id: session_id.to_string(),
                model: model.to_string(),
                tier,
                first_seen: now,
                last_seen: now,
            });
        self.sweep_locked(&mut entries);
    }

    pub fn touch(&self, session_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(session_id) {
            entry.last_seen = Instant::now();
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep_locked(&self, entries: &mut HashMap<String, SessionEntry>) {
        entries.retain(|_, entry| entry.last_seen.elapsed() <= self.ttl);
        while entries.len() > self.max_entries {
            let stalest = entries
                .values()
                .min_by_key(|entry| entry.last_seen)
                .map(|entry| entry.session_id.clone());
            match stalest {
                Some(id) => {
                    entries.remove(&id);
                }
                None => break,
            }
        }
    }
}

/// First of `X-Session-Id`, `X-Request-Session`, or a `session` cookie.
pub fn session_id_from_headers(headers: &HeaderMap) -> Option<String> {
    for name in ["x-session-id", "x-request-session"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    let cookies = headers.get("cookie").and_then(|v| v.to_str().ok())?;
    for pair in cookies.split(';') {
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        if name.trim() == "session" {
            let value = value.trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
