//! Key resolution (C2): for a model id, decide which credentials and base
//! URL reach it, and in which dialect the conversation happens.

use tariff_common::ApiKeysConfig;
use tariff_protocol::Dialect;
use tariff_routing::{GATEWAY_PROVIDER, native_dialect, provider_base_url};

use crate::upstream::Headers;

/// How a chosen model will actually be reached.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAccess {
    /// Provider the request is sent to (the gateway when `via_gateway`).
    pub provider: String,
    pub api_key: String,
    pub base_url: String,
    /// Wire dialect spoken on this connection.
    pub dialect: Dialect,
    pub via_gateway: bool,
}

#[derive(Debug, Clone)]
pub struct KeyResolver {
    keys: ApiKeysConfig,
}

impl KeyResolver {
    pub fn new(keys: ApiKeysConfig) -> Self {
        Self { keys }
    }

    pub fn has_gateway(&self) -> bool {
        self.keys.get(GATEWAY_PROVIDER).is_some()
    }

    pub fn configured_providers(&self) -> Vec<String> {
        self.keys.configured_providers()
    }

    /// Resolution order:
    /// 1. provider needs dialect translation and a gateway key exists -> gateway;
    /// 2. direct key exists and the provider speaks dialect A natively -> direct;
    /// 3. gateway key exists -> gateway (universal fallback);
    /// 4. unreachable.
    pub fn resolve(&self, provider: &str) -> Option<ResolvedAccess> {
        let dialect = native_dialect(provider)?;
        let direct = self.keys.get(provider);
        let gateway = self.keys.get(GATEWAY_PROVIDER);

        if dialect != Dialect::OpenAiChat
            && direct.is_none()
            && let Some(entry) = gateway
        {
            return Some(self.gateway_access(entry.api_key.clone(), entry.base_url.clone()));
        }

        if let Some(entry) = direct {
            return Some(ResolvedAccess {
                provider: provider.to_string(),
                api_key: entry.api_key.clone(),
                base_url: entry
                    .base_url
                    .clone()
                    .or_else(|| provider_base_url(provider).map(str::to_string))?,
                dialect,
                via_gateway: false,
            });
        }

        gateway.map(|entry| self.gateway_access(entry.api_key.clone(), entry.base_url.clone()))
    }

    /// Whether any route to the provider exists.
    pub fn is_reachable(&self, provider: &str) -> bool {
        self.resolve(provider).is_some()
    }

    /// Providers that resolve to something, given the current keys.
    pub fn accessible_providers(&self, providers: &[&str]) -> Vec<String> {
        providers
            .iter()
            .filter(|provider| self.is_reachable(provider))
            .map(|provider| provider.to_string())
            .collect()
    }

    fn gateway_access(&self, api_key: String, base_url: Option<String>) -> ResolvedAccess {
        ResolvedAccess {
            provider: GATEWAY_PROVIDER.to_string(),
            api_key,
            base_url: base_url
                .unwrap_or_else(|| provider_base_url(GATEWAY_PROVIDER).unwrap_or("").to_string()),
            dialect: Dialect::OpenAiChat,
            via_gateway: true,
        }
    }
}

/// Authorization headers per dialect and route.
pub fn auth_headers(access: &ResolvedAccess) -> Headers {
    let mut headers: Headers = vec![("content-type".to_string(), "application/json".to_string())];
    if access.via_gateway {
        headers.push((
            "authorization".to_string(),
            format!("Bearer {}", access.api_key),
        ));
        headers.push(("x-title".to_string(), "tariff".to_string()));
        return headers;
    }
    match access.dialect {
        Dialect::OpenAiChat => headers.push((
            "authorization".to_string(),
            format!("Bearer {}", access.api_key),
        )),
        Dialect::Messages => {
            headers.push(("x-api-key".to_string(), access.api_key.clone()));
            headers.push((
                tariff_protocol::anthropic::VERSION_HEADER.to_string(),
                tariff_protocol::anthropic::VERSION_VALUE.to_string(),
            ));
        }
        Dialect::GenerateContent => {
            headers.push(("x-goog-api-key".to_string(), access.api_key.clone()));
        }
    }
    headers
}
