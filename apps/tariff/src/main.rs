use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use tariff_core::engine::ProxyEngine;
use tariff_core::gateway;
use tariff_core::keys::KeyResolver;
use tariff_core::state::AppState;
use tariff_core::upstream::{UpstreamClient, UpstreamClientConfig, WreqUpstreamClient};
use tariff_routing::GATEWAY_PROVIDER;

mod cli;

const PROVIDERS: &[&str] = &["openai", "anthropic", "google", "deepseek", "openrouter"];
const BIND_RETRIES: u32 = 5;
const BIND_RETRY_DELAY: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(4);

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    if args.version {
        println!("tariff {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if tariff_common::is_disabled() {
        info!("TARIFF_DISABLED is set; not starting");
        return Ok(());
    }

    let mut config = tariff_common::GlobalConfig::from_env();
    config.host = args.host;
    if let Some(port) = args.port {
        config.port = port;
    }

    let keys = tariff_common::discover_keys(PROVIDERS);
    if keys.is_empty() {
        bail!(
            "no provider keys configured; set one of OPENAI_API_KEY, ANTHROPIC_API_KEY, \
             GEMINI_API_KEY, DEEPSEEK_API_KEY, OPENROUTER_API_KEY or write \
             ~/.tariff/tariff/config.json"
        );
    }
    let resolver = KeyResolver::new(keys.clone());

    let client: Arc<dyn UpstreamClient> = Arc::new(
        WreqUpstreamClient::new(UpstreamClientConfig {
            request_timeout: config.request_timeout,
            stream_idle_timeout: config.stream_idle_timeout,
            ..UpstreamClientConfig::default()
        })
        .context("building upstream client")?,
    );

    let state = Arc::new(AppState::new(config.clone(), resolver, client.clone()));

    if let Some(entry) = keys.get(GATEWAY_PROVIDER) {
        let base_url = entry
            .base_url
            .clone()
            .or_else(|| tariff_routing::provider_base_url(GATEWAY_PROVIDER).map(str::to_string))
            .unwrap_or_default();
        let _refresher = gateway::spawn_refresher(
            state.catalog.clone(),
            client.clone(),
            base_url,
            entry.api_key.clone(),
            state.local_model_ids(),
            config.catalog_ttl,
        );
    }

    let engine = ProxyEngine::new(state);
    let app = tariff_core::server::router(engine);

    let bind = format!("{}:{}", config.host, config.port);
    let Some(listener) = bind_listener(&bind).await? else {
        // A healthy instance already owns the port; nothing to do.
        return Ok(());
    };
    info!(event = "listening", addr = %bind);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let graceful = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            let _ = shutdown_tx.send(());
        })
        .into_future();
    let mut serve = std::pin::pin!(graceful);

    tokio::select! {
        result = &mut serve => result.context("server error")?,
        _ = shutdown_rx => {
            info!(event = "shutting_down");
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut serve).await.is_err() {
                warn!(event = "shutdown_grace_elapsed");
            }
        }
    }
    Ok(())
}

/// Bind, handling the port-already-in-use case: if the occupant answers
/// `/health` with `{"status":"ok"}` it is another tariff instance and we
/// defer to it; otherwise retry a few times before giving up.
async fn bind_listener(bind: &str) -> Result<Option<tokio::net::TcpListener>> {
    let mut attempt = 0;
    loop {
        match tokio::net::TcpListener::bind(bind).await {
            Ok(listener) => return Ok(Some(listener)),
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                if probe_health(bind).await {
                    info!(event = "already_running", addr = %bind);
                    return Ok(None);
                }
                attempt += 1;
                if attempt >= BIND_RETRIES {
                    bail!("{bind} is taken by something that is not a healthy tariff instance");
                }
                warn!(event = "bind_retry", addr = %bind, attempt);
                tokio::time::sleep(BIND_RETRY_DELAY).await;
            }
            Err(err) => return Err(err).context(format!("binding {bind}")),
        }
    }
}

async fn probe_health(bind: &str) -> bool {
    let Ok(client) = wreq::Client::builder()
        .connect_timeout(Duration::from_millis(500))
        .timeout(Duration::from_secs(2))
        .build()
    else {
        return false;
    };
    let Ok(resp) = client.get(format!("http://{bind}/health")).send().await else {
        return false;
    };
    let Ok(body) = resp.bytes().await else {
        return false;
    };
    serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|value| {
            value
                .get("status")
                .and_then(|status| status.as_str())
                .map(|status| status == "ok")
        })
        .unwrap_or(false)
}
