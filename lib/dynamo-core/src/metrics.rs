//! Prometheus metrics for the registry and the balancer

use anyhow::Result;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Counters shared by the event loop, the sweeper and the load balancer.
///
/// Clones share the same underlying metrics and registry.
#[derive(Clone)]
pub struct DynamoMetrics {
    /// Events applied to the registry, by kind
    pub events_applied_total: IntCounterVec,
    /// Payloads or events dropped before reaching the registry, by reason
    pub events_rejected_total: IntCounterVec,
    /// Backends removed by the expiry sweep
    pub backends_expired_total: IntCounter,
    /// Backends currently registered
    pub registered_backends: IntGauge,
    /// Selection calls, by group and outcome
    pub selections_total: IntCounterVec,
    /// Prometheus registry for metrics
    pub registry: Arc<Registry>,
}

impl DynamoMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let events_applied_total = IntCounterVec::new(
            Opts::new("dynamo_events_applied_total", "Lifecycle events applied to the registry"),
            &["kind"],
        )?;

        let events_rejected_total = IntCounterVec::new(
            Opts::new(
                "dynamo_events_rejected_total",
                "Lifecycle payloads dropped before reaching the registry",
            ),
            &["reason"],
        )?;

        let backends_expired_total = IntCounter::new(
            "dynamo_backends_expired_total",
            "Backends removed by the expiry sweep",
        )?;

        let registered_backends = IntGauge::new(
            "dynamo_registered_backends",
            "Backends currently registered",
        )?;

        let selections_total = IntCounterVec::new(
            Opts::new("dynamo_selections_total", "Backend selections by outcome"),
            &["group", "outcome"],
        )?;

        registry.register(Box::new(events_applied_total.clone()))?;
        registry.register(Box::new(events_rejected_total.clone()))?;
        registry.register(Box::new(backends_expired_total.clone()))?;
        registry.register(Box::new(registered_backends.clone()))?;
        registry.register(Box::new(selections_total.clone()))?;

        Ok(Self {
            events_applied_total,
            events_rejected_total,
            backends_expired_total,
            registered_backends,
            selections_total,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
