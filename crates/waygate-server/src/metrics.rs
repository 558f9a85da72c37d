//! Prometheus metrics recorder and metric-name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

// Metric name constants to avoid typos across modules.

/// OAuth flow outcomes (counter, labels: status, flow_type).
pub const OAUTH_FLOWS_TOTAL: &str = "oauth_flows_total";
/// Bearer tokens issued (counter).
pub const TOKENS_ISSUED_TOTAL: &str = "tokens_issued_total";
/// Bearer tokens revoked (counter).
pub const TOKENS_REVOKED_TOTAL: &str = "tokens_revoked_total";
/// Requests rejected by a rate limiter (counter, labels: scope).
pub const RATE_LIMITED_TOTAL: &str = "rate_limited_total";
/// Authenticated RPC requests (counter, labels: transport).
pub const RPC_REQUESTS_TOTAL: &str = "rpc_requests_total";
/// SSE connections opened (counter).
pub const SSE_CONNECTIONS_TOTAL: &str = "sse_connections_total";
/// Live SSE connections (gauge).
pub const SSE_CONNECTIONS_ACTIVE: &str = "sse_connections_active";
/// SSE connections evicted by the per-user cap (counter).
pub const SSE_EVICTIONS_TOTAL: &str = "sse_evictions_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        // Build a recorder + handle (no global install to avoid test
        // conflicts).
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            OAUTH_FLOWS_TOTAL,
            TOKENS_ISSUED_TOTAL,
            TOKENS_REVOKED_TOTAL,
            RATE_LIMITED_TOTAL,
            RPC_REQUESTS_TOTAL,
            SSE_CONNECTIONS_TOTAL,
            SSE_CONNECTIONS_ACTIVE,
            SSE_EVICTIONS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
