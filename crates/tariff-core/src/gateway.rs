//! Gateway catalog (C10): maps local model ids onto the aggregator
//! gateway's ids. Refreshed on first use and every `catalog_ttl`; readers
//! always see a consistent map via pointer swap and keep the old one for
//! the request they are in.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::upstream::{HttpMethod, UpstreamClient, UpstreamRequest};

#[derive(Debug, Deserialize)]
struct GatewayModelList {
    #[serde(default)]
    data: Vec<GatewayModelEntry>,
}

#[derive(Debug, Deserialize)]
struct GatewayModelEntry {
    id: String,
}

pub struct GatewayCatalog {
    map: ArcSwap<HashMap<String, String>>,
}

impl GatewayCatalog {
    pub fn new() -> Self {
        Self {
            map: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Gateway-side id for a local id. Unmapped ids pass through
    /// unchanged; the gateway's 4xx then drives normal fallback.
    pub fn gateway_id(&self, local_id: &str) -> String {
        self.map
            .load()
            .get(local_id)
            .cloned()
            .unwrap_or_else(|| local_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.map.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.load().is_empty()
    }

    pub fn apply(&self, local_ids: &[String], gateway_ids: Vec<String>) {
        self.map.store(Arc::new(build_map(local_ids, gateway_ids)));
    }

    /// Fetch the gateway's model list once and rebuild the map.
    pub async fn refresh(
        &self,
        client: &dyn UpstreamClient,
        base_url: &str,
        api_key: &str,
        local_ids: &[String],
    ) {
        let req = UpstreamRequest {
            method: HttpMethod::Get,
            url: format!("{base_url}/models"),
            headers: vec![("authorization".to_string(), format!("Bearer {api_key}"))],
            body: None,
            is_stream: false,
        };
        let resp = match client.send(req).await {
            Ok(resp) => resp,
            Err(err) => {
                warn!(event = "catalog_refresh_failed", error = %err);
                return;
            }
        };
        if !resp.is_success() {
            warn!(event = "catalog_refresh_failed", status = resp.status);
            return;
        }
        let Some(bytes) = resp.body_bytes() else {
            return;
        };
        match serde_json::from_slice::<GatewayModelList>(&bytes) {
            Ok(list) => {
                let ids: Vec<String> = list.data.into_iter().map(|entry| entry.id).collect();
                debug!(event = "catalog_refreshed", gateway_models = ids.len());
                self.apply(local_ids, ids);
            }
            Err(err) => warn!(event = "catalog_decode_failed", error = %err),
        }
    }
}

impl Default for GatewayCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// (a) exact id match, else (b) name-suffix match with the local provider
/// prefix stripped.
fn build_map(local_ids: &[String], gateway_ids: Vec<String>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for local in local_ids {
        if gateway_ids.iter().any(|id| id == local) {
            map.insert(local.clone(), local.clone());
            continue;
        }
        let name = local.split_once('/').map(|(_, n)| n).unwrap_or(local);
        if let Some(found) = gateway_ids.iter().find(|id| {
            id.split_once('/')
                .map(|(_, candidate)| candidate == name)
                .unwrap_or(**id == *name)
        }) {
            map.insert(local.clone(), found.clone());
        }
    }
    map
}

/// Periodic refresher, spawned at proxy start when a gateway key exists.
pub fn spawn_refresher(
    catalog: Arc<GatewayCatalog>,
    client: Arc<dyn UpstreamClient>,
    base_url: String,
    api_key: String,
    local_ids: Vec<String>,
    ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(ttl);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            catalog
                .refresh(client.as_ref(), &base_url, &api_key, &local_ids)
                .await;
        }
    })
}
