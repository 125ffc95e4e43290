//! Server metrics
//!
//! Counters and gauges go through the `metrics` recorder; `/metrics`
//! renders the Prometheus exposition from the exporter handle. The route
//! only exists when a metrics token is configured and answers 404 to bad
//! credentials so the endpoint stays invisible to probes.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

const ACTIVE_CONTROL: &str = "eosrift_active_control_connections";
const ACTIVE_HTTP: &str = "eosrift_active_http_tunnels";
const ACTIVE_TCP: &str = "eosrift_active_tcp_tunnels";
const TOTAL_HTTP: &str = "eosrift_http_tunnels_total";
const TOTAL_TCP: &str = "eosrift_tcp_tunnels_total";
const UPTIME: &str = "eosrift_uptime_seconds";

pub struct ServerMetrics {
    started_at: Instant,
    handle: Option<PrometheusHandle>,
}

impl ServerMetrics {
    /// Install the Prometheus recorder. The recorder is process-global; if
    /// one is already installed (second server in one process, tests) the
    /// new instance records through it but cannot render.
    pub fn install() -> Arc<Self> {
        let handle = match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("prometheus recorder not installed: {err}");
                None
            }
        };

        Arc::new(Self {
            started_at: Instant::now(),
            handle,
        })
    }

    pub fn track_control_conn(&self) -> GaugeGuard {
        gauge!(ACTIVE_CONTROL).increment(1.0);
        GaugeGuard { name: ACTIVE_CONTROL }
    }

    pub fn track_http_tunnel(&self) -> GaugeGuard {
        counter!(TOTAL_HTTP).increment(1);
        gauge!(ACTIVE_HTTP).increment(1.0);
        GaugeGuard { name: ACTIVE_HTTP }
    }

    pub fn track_tcp_tunnel(&self) -> GaugeGuard {
        counter!(TOTAL_TCP).increment(1);
        gauge!(ACTIVE_TCP).increment(1.0);
        GaugeGuard { name: ACTIVE_TCP }
    }

    /// Render the Prometheus exposition.
    pub fn render(&self) -> String {
        gauge!(UPTIME).set(self.started_at.elapsed().as_secs_f64());
        match &self.handle {
            Some(handle) => handle.render(),
            None => String::new(),
        }
    }
}

/// Decrements its gauge when dropped.
pub struct GaugeGuard {
    name: &'static str,
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        gauge!(self.name).decrement(1.0);
    }
}
