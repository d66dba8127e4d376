//! Prometheus request counters

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Per-server metric registry. Not the process-global default, so several
/// routers can coexist.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    requests: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let requests = IntCounterVec::new(
            Opts::new("unpkg_requests_total", "Count of requested packages"),
            &["package"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        Ok(Self { registry, requests })
    }

    pub fn record_request(&self, package: &str) {
        self.requests.with_label_values(&[package]).inc();
    }

    /// Text exposition format.
    pub fn render(&self) -> prometheus::Result<(String, String)> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok((
            encoder.format_type().to_string(),
            String::from_utf8_lossy(&buf).into_owned(),
        ))
    }
}
