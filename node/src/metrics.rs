//! # Prometheus Metrics
//!
//! Exposes operational metrics for the registry node. Scraped by Prometheus
//! at the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

use crate::host::{ContractHost, HostError, Receipt};
use crate::transaction::Call;

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    registry: Registry,
    /// Submitted transactions by outcome (`success`, `reverted`, `rejected`).
    pub transactions_total: IntCounterVec,
    /// Reverted transactions by contract error kind.
    pub reverts_total: IntCounterVec,
    /// Addresses currently registered, owner included.
    pub registered_users: IntGauge,
    /// File records written by successful `addHash` calls.
    pub files_stored_total: IntCounter,
    /// Height of the last committed transaction.
    pub block_height: IntGauge,
    /// Time to verify, execute and persist one transaction.
    pub transaction_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("ipfs_storage".into()), None)
            .expect("failed to create prometheus registry");

        let transactions_total = IntCounterVec::new(
            Opts::new("transactions_total", "Submitted transactions by outcome"),
            &["outcome"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(transactions_total.clone()))
            .expect("metric registration");

        let reverts_total = IntCounterVec::new(
            Opts::new("reverts_total", "Reverted transactions by contract error"),
            &["reason"],
        )
        .expect("metric creation");
        registry
            .register(Box::new(reverts_total.clone()))
            .expect("metric registration");

        let registered_users =
            IntGauge::new("registered_users", "Number of registered addresses")
                .expect("metric creation");
        registry
            .register(Box::new(registered_users.clone()))
            .expect("metric registration");

        let files_stored_total =
            IntCounter::new("files_stored_total", "Total file records written")
                .expect("metric creation");
        registry
            .register(Box::new(files_stored_total.clone()))
            .expect("metric registration");

        let block_height = IntGauge::new("block_height", "Height of the last committed transaction")
            .expect("metric creation");
        registry
            .register(Box::new(block_height.clone()))
            .expect("metric registration");

        let transaction_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "transaction_latency_seconds",
                "Transaction verify/execute/persist latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(transaction_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            transactions_total,
            reverts_total,
            registered_users,
            files_stored_total,
            block_height,
            transaction_latency_seconds,
        }
    }

    /// Seeds the gauges from the host's current state.
    pub fn sync_from(&self, host: &ContractHost) {
        self.registered_users.set(host.registered_count() as i64);
        self.block_height.set(host.height() as i64);
    }

    /// Records the outcome of one submission.
    pub fn observe_submission(
        &self,
        host: &ContractHost,
        result: &Result<Receipt, HostError>,
        elapsed: Duration,
    ) {
        self.transaction_latency_seconds
            .observe(elapsed.as_secs_f64());
        match result {
            Ok(receipt) => {
                self.transactions_total
                    .with_label_values(&["success"])
                    .inc();
                if matches!(receipt.call, Call::AddHash { .. }) {
                    self.files_stored_total.inc();
                }
            }
            Err(HostError::Reverted { reason, .. }) => {
                self.transactions_total
                    .with_label_values(&["reverted"])
                    .inc();
                self.reverts_total
                    .with_label_values(&[reason.kind()])
                    .inc();
            }
            Err(_) => {
                self.transactions_total
                    .with_label_values(&["rejected"])
                    .inc();
            }
        }
        self.sync_from(host);
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl Default for NodeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<NodeMetrics>;

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;
    use crate::store::ChainStore;
    use crate::transaction::Transaction;
    use crate::wallet::Wallet;
    use std::time::Instant;

    #[test]
    fn encode_contains_prefixed_names() {
        let metrics = NodeMetrics::new();
        metrics.files_stored_total.inc();
        metrics.transactions_total.with_label_values(&["success"]).inc();
        let text = metrics.encode().unwrap();
        assert!(text.contains("ipfs_storage_files_stored_total 1"));
        assert!(text.contains("ipfs_storage_transactions_total{outcome=\"success\"} 1"));
    }

    #[test]
    fn submission_outcomes_are_counted() {
        let owner = Wallet::from_seed(&[1u8; 32]);
        let stranger = Wallet::from_seed(&[2u8; 32]);
        let host = ContractHost::deploy(
            ChainStore::open_temporary().unwrap(),
            Network::Devnet,
            owner.address(),
            chrono::Utc::now(),
        )
        .unwrap();
        let metrics = NodeMetrics::new();
        metrics.sync_from(&host);
        assert_eq!(metrics.registered_users.get(), 1);

        let call = Call::AddHash {
            ipfs_hash: "QmA".into(),
            file_name: "a".into(),
        };
        let ok = Transaction::new(33, 1, owner.address(), call.clone())
            .sign(&owner)
            .unwrap();
        let started = Instant::now();
        let result = host.submit(&ok);
        metrics.observe_submission(&host, &result, started.elapsed());

        let bad = Transaction::new(33, 0, stranger.address(), call)
            .sign(&stranger)
            .unwrap();
        let result = host.submit(&bad);
        metrics.observe_submission(&host, &result, started.elapsed());

        assert_eq!(metrics.files_stored_total.get(), 1);
        assert_eq!(
            metrics.transactions_total.with_label_values(&["reverted"]).get(),
            1
        );
        assert_eq!(
            metrics.reverts_total.with_label_values(&["not_registered"]).get(),
            1
        );
        assert_eq!(metrics.block_height.get(), 2);
    }
}
