//! Prometheus recorder for the correlation counters
//!
//! The library emits `implicit_auth_*` counters through the `metrics` facade;
//! this installs the recorder that collects them so `--metrics` can print the
//! text exposition when a command finishes.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("failed to install Prometheus recorder")
}
