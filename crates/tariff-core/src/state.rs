//! Explicitly-owned shared state, created once at proxy start and handed
//! to every request task. No module-level singletons.

use std::sync::Arc;

use tariff_common::GlobalConfig;
use tariff_routing::{ModelRegistry, ScoringConfig, TierTables};

use crate::dedup::DedupStore;
use crate::gateway::GatewayCatalog;
use crate::keys::KeyResolver;
use crate::ratelimit::RateLimitMap;
use crate::session::SessionStore;
use crate::upstream::UpstreamClient;
use crate::usage::{MemoryUsageLog, SharedStatsSource, SharedUsageSink};

pub struct AppState {
    pub config: GlobalConfig,
    pub registry: ModelRegistry,
    pub scoring: ScoringConfig,
    pub tiers: TierTables,
    pub keys: KeyResolver,
    pub dedup: DedupStore,
    pub sessions: SessionStore,
    pub rate_limits: RateLimitMap,
    pub catalog: Arc<GatewayCatalog>,
    pub client: Arc<dyn UpstreamClient>,
    pub usage: SharedUsageSink,
    pub stats: SharedStatsSource,
}

impl AppState {
    pub fn new(config: GlobalConfig, keys: KeyResolver, client: Arc<dyn UpstreamClient>) -> Self {
        let usage_log = Arc::new(MemoryUsageLog::new());
        Self {
            registry: ModelRegistry::builtin(),
            scoring: ScoringConfig::default(),
            tiers: TierTables::builtin(),
            keys,
            dedup: DedupStore::new(config.dedup_ttl, config.dedup_max_entries),
            sessions: SessionStore::new(config.session_ttl, config.session_max_entries),
            rate_limits: RateLimitMap::new(config.rate_limit_cooldown),
            catalog: Arc::new(GatewayCatalog::new()),
            client,
            usage: usage_log.clone(),
            stats: usage_log,
            config,
        }
    }

    /// Model ids the catalog refresher should try to map.
    pub fn local_model_ids(&self) -> Vec<String> {
        self.registry.iter().map(|model| model.id.clone()).collect()
    }
}
