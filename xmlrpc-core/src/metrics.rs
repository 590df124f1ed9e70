//! Prometheus instrumentation for the engine.
//!
//! Metrics are opt-in: construct the [`Server`](crate::server::Server) with
//! a registry and every serviced request is counted by method and outcome.

use dashmap::DashMap;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

pub struct EngineMetrics {
    requests_total: IntCounterVec,
    faults_total: IntCounterVec,
    request_bytes: IntCounter,
    response_bytes: IntCounter,
    fault_labels: FaultLabelCache,
}

impl EngineMetrics {
    pub fn new(registry: &Registry) -> Self {
        let requests_total = IntCounterVec::new(
            Opts::new(
                "xmlrpc_requests_total",
                "Requests serviced, by method and outcome",
            ),
            &["method", "outcome"],
        )
        .unwrap();
        registry.register(Box::new(requests_total.clone())).unwrap();

        let faults_total = IntCounterVec::new(
            Opts::new("xmlrpc_faults_total", "Fault responses, by fault code"),
            &["code"],
        )
        .unwrap();
        registry.register(Box::new(faults_total.clone())).unwrap();

        let request_bytes =
            IntCounter::new("xmlrpc_request_bytes_total", "Request body bytes received").unwrap();
        registry.register(Box::new(request_bytes.clone())).unwrap();

        let response_bytes =
            IntCounter::new("xmlrpc_response_bytes_total", "Response body bytes emitted").unwrap();
        registry.register(Box::new(response_bytes.clone())).unwrap();

        EngineMetrics {
            requests_total,
            faults_total,
            request_bytes,
            response_bytes,
            fault_labels: FaultLabelCache::new(),
        }
    }

    pub(crate) fn record_request(
        &self,
        method: &str,
        outcome: &str,
        request_bytes: usize,
        response_bytes: usize,
    ) {
        self.requests_total
            .with_label_values(&[method, outcome])
            .inc();
        self.request_bytes.inc_by(request_bytes as u64);
        self.response_bytes.inc_by(response_bytes as u64);
    }

    pub(crate) fn record_fault(&self, code: i32) {
        let label = self.fault_labels.get_or_insert(code);
        self.faults_total.with_label_values(&[label.as_ref()]).inc();
    }
}

/// Caches fault-code label strings so the hot path does not re-format them.
struct FaultLabelCache {
    cache: DashMap<i32, Arc<str>>,
}

impl FaultLabelCache {
    fn new() -> Self {
        FaultLabelCache {
            cache: DashMap::new(),
        }
    }

    fn get_or_insert(&self, code: i32) -> Arc<str> {
        self.cache
            .entry(code)
            .or_insert_with(|| Arc::from(code.to_string()))
            .clone()
    }
}
