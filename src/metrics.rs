//! Prometheus metrics for the HTTP surface and the agent runtime.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

use crate::error::{AttacheError, Result};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub http_requests: IntCounterVec,
    pub http_duration: HistogramVec,
    pub agent_requests: IntCounterVec,
    pub agent_errors: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("attache_http_requests_total", "HTTP requests served"),
            &["method", "endpoint", "status"],
        )
        .map_err(into_config_error)?;

        let http_duration = HistogramVec::new(
            HistogramOpts::new(
                "attache_http_request_duration_seconds",
                "HTTP request latency",
            ),
            &["method", "endpoint"],
        )
        .map_err(into_config_error)?;

        let agent_requests = IntCounterVec::new(
            Opts::new("attache_agent_requests_total", "Agent invocations"),
            &["status"],
        )
        .map_err(into_config_error)?;

        let agent_errors = IntCounterVec::new(
            Opts::new("attache_agent_errors_total", "Agent invocation errors"),
            &["error_type"],
        )
        .map_err(into_config_error)?;

        for collector in [&http_requests, &agent_requests, &agent_errors] {
            registry
                .register(Box::new(collector.clone()))
                .map_err(into_config_error)?;
        }
        registry
            .register(Box::new(http_duration.clone()))
            .map_err(into_config_error)?;

        Ok(Self {
            registry,
            http_requests,
            http_duration,
            agent_requests,
            agent_errors,
        })
    }

    /// Text exposition for the scrape endpoint.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(into_config_error)?;
        String::from_utf8(buffer)
            .map_err(|err| AttacheError::Configuration(format!("metrics encoding: {err}")))
    }
}

fn into_config_error(err: prometheus::Error) -> AttacheError {
    AttacheError::Configuration(format!("metrics registry: {err}"))
}
