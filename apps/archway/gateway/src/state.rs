use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use archway_core::{
    BroadcastRelay, BroadcastReport, CloseCause, ConnectionId, ConnectionRegistry,
};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::proxy::UpstreamClient;

/// Shared by every route: the relay (and through it the registry), the
/// upstream AI client, and process-wide counters for `/debug/stats`.
pub struct AppState {
    relay: BroadcastRelay,
    upstream: UpstreamClient,
    outbound_buffer: usize,
    metrics: Option<PrometheusHandle>,
    connections_accepted: AtomicU64,
    messages_relayed: AtomicU64,
    bytes_relayed: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub active_connections: usize,
    pub total_connections: u64,
    pub total_messages_relayed: u64,
    pub total_bytes_relayed: u64,
    pub connections: Vec<ConnectionStatsEntry>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionStatsEntry {
    pub id: ConnectionId,
    pub registered_seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<SocketAddr>,
}

impl AppState {
    pub fn new(
        upstream: UpstreamClient,
        outbound_buffer: usize,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            relay: BroadcastRelay::new(ConnectionRegistry::new()),
            upstream,
            outbound_buffer,
            metrics,
            connections_accepted: AtomicU64::new(0),
            messages_relayed: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
        }
    }

    pub fn relay(&self) -> &BroadcastRelay {
        &self.relay
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        self.relay.registry()
    }

    pub fn upstream(&self) -> &UpstreamClient {
        &self.upstream
    }

    pub fn outbound_buffer(&self) -> usize {
        self.outbound_buffer
    }

    pub fn on_connection_added(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        counter!("archway_connections_total", 1);
        gauge!("archway_connections_active", self.registry().len() as f64);
    }

    pub fn on_connection_removed(&self, cause: &CloseCause) {
        counter!(
            "archway_connections_closed_total",
            1,
            "cause" => cause.metric_label()
        );
        gauge!("archway_connections_active", self.registry().len() as f64);
    }

    pub fn record_relay(&self, report: &BroadcastReport) {
        if report.delivered == 0 {
            return;
        }

        self.messages_relayed
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.bytes_relayed
            .fetch_add(report.bytes as u64, Ordering::Relaxed);
        counter!("archway_messages_relayed_total", report.delivered as u64);
        if report.bytes > 0 {
            counter!("archway_bytes_relayed_total", report.bytes as u64);
            histogram!(
                "archway_message_size_bytes",
                report.bytes as f64 / report.delivered as f64
            );
        }
    }

    pub fn stats(&self) -> StatsResponse {
        let snapshot = self.registry().snapshot();
        let connections = snapshot
            .entries()
            .iter()
            .map(|entry| ConnectionStatsEntry {
                id: entry.connection().id(),
                registered_seq: entry.registered_seq(),
                remote_addr: entry.connection().remote_addr(),
            })
            .collect();

        StatsResponse {
            active_connections: snapshot.len(),
            total_connections: self.connections_accepted.load(Ordering::Relaxed),
            total_messages_relayed: self.messages_relayed.load(Ordering::Relaxed),
            total_bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            connections,
        }
    }

    pub fn render_metrics(&self) -> String {
        self.metrics
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }
}
