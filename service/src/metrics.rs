//! # Prometheus Metrics
//!
//! Operational metrics for the service, scraped at `/metrics` on the
//! configured metrics port.
//!
//! All metrics live in a dedicated [`prometheus::Registry`] so they never
//! collide with a default global registry consumer.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the service.
///
/// Clone-friendly (prometheus handles wrap `Arc` internally) so it can be
/// shared across request handlers.
#[derive(Clone)]
pub struct GateMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Total challenge nonces issued.
    pub nonces_issued_total: IntCounter,
    /// Total successful wallet sign-ins.
    pub auth_success_total: IntCounter,
    /// Total rejected sign-in attempts (any client-visible failure).
    pub auth_failure_total: IntCounter,
    /// Total wallets linked to an identity.
    pub links_total: IntCounter,
    /// Total link attempts refused because the wallet belonged elsewhere.
    pub link_conflicts_total: IntCounter,
    /// Total credits debited across all identities.
    pub credits_debited_total: IntCounter,
    /// Total debits refused for insufficient balance.
    pub insufficient_credit_rejections_total: IntCounter,
    /// Histogram of sign-in handling latency in seconds.
    pub auth_latency_seconds: Histogram,
}

impl GateMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("walletgate".into()), None)
            .expect("failed to create prometheus registry");

        let nonces_issued_total =
            IntCounter::new("nonces_issued_total", "Total challenge nonces issued")
                .expect("metric creation");
        registry
            .register(Box::new(nonces_issued_total.clone()))
            .expect("metric registration");

        let auth_success_total =
            IntCounter::new("auth_success_total", "Total successful wallet sign-ins")
                .expect("metric creation");
        registry
            .register(Box::new(auth_success_total.clone()))
            .expect("metric registration");

        let auth_failure_total =
            IntCounter::new("auth_failure_total", "Total rejected sign-in attempts")
                .expect("metric creation");
        registry
            .register(Box::new(auth_failure_total.clone()))
            .expect("metric registration");

        let links_total = IntCounter::new("links_total", "Total wallets linked to an identity")
            .expect("metric creation");
        registry
            .register(Box::new(links_total.clone()))
            .expect("metric registration");

        let link_conflicts_total = IntCounter::new(
            "link_conflicts_total",
            "Total link attempts refused because the wallet was bound elsewhere",
        )
        .expect("metric creation");
        registry
            .register(Box::new(link_conflicts_total.clone()))
            .expect("metric registration");

        let credits_debited_total = IntCounter::new(
            "credits_debited_total",
            "Total credits debited across all identities",
        )
        .expect("metric creation");
        registry
            .register(Box::new(credits_debited_total.clone()))
            .expect("metric registration");

        let insufficient_credit_rejections_total = IntCounter::new(
            "insufficient_credit_rejections_total",
            "Total debits refused for insufficient balance",
        )
        .expect("metric creation");
        registry
            .register(Box::new(insufficient_credit_rejections_total.clone()))
            .expect("metric registration");

        let auth_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "auth_latency_seconds",
                "End-to-end sign-in handling latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(auth_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            nonces_issued_total,
            auth_success_total,
            auth_failure_total,
            links_total,
            link_conflicts_total,
            credits_debited_total,
            insufficient_credit_rejections_total,
            auth_latency_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<GateMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
