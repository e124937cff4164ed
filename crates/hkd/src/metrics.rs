//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  Prometheus text format
//!   GET /healthz  liveness check, 200 while the process runs

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};
use std::sync::Arc;

type Labels = Vec<(String, String)>;

fn label(key: &str, value: &str) -> Labels {
    vec![(key.to_string(), value.to_string())]
}

/// Counters updated from the main loop and transfer tasks.
#[derive(Clone, Default)]
pub struct DaemonMetrics {
    transfers: Family<Labels, Counter>,
    fragments_received: Counter,
    payloads_received: Family<Labels, Counter>,
    backup_verdicts: Family<Labels, Counter>,
    connected_peers: Gauge,
}

impl DaemonMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let m = Self::default();
        registry.register(
            "hearthkeep_transfers",
            "Outbound fragmented transfers by outcome",
            m.transfers.clone(),
        );
        registry.register(
            "hearthkeep_fragments_received",
            "Inbound fragments accepted for reassembly",
            m.fragments_received.clone(),
        );
        registry.register(
            "hearthkeep_payloads_received",
            "Reassembled uploads by event",
            m.payloads_received.clone(),
        );
        registry.register(
            "hearthkeep_backup_verdicts",
            "Emergency backup offers by verdict",
            m.backup_verdicts.clone(),
        );
        registry.register(
            "hearthkeep_connected_peers",
            "Peers with an open session",
            m.connected_peers.clone(),
        );
        m
    }

    pub fn transfer(&self, outcome: &str) {
        self.transfers.get_or_create(&label("outcome", outcome)).inc();
    }

    pub fn fragment_received(&self) {
        self.fragments_received.inc();
    }

    pub fn payload_received(&self, event: &str) {
        self.payloads_received.get_or_create(&label("event", event)).inc();
    }

    pub fn backup_verdict(&self, verdict: &str) {
        self.backup_verdicts.get_or_create(&label("verdict", verdict)).inc();
    }

    pub fn set_connected(&self, n: usize) {
        self.connected_peers.set(n as i64);
    }
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9100")
pub async fn serve(addr: String, registry: Arc<Registry>) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(registry);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness check: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
