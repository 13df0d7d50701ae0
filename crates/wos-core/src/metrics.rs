/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Metrics Module
//!
//! Prometheus metrics for the scheduler: work order status transitions,
//! dispatcher attempt outcomes, QA verdicts, and accumulated cost. Exposed
//! as a text encoder at `GET /metrics`, same idiom as the
//! teacher's HTTP/database metric vectors.

use once_cell::sync::Lazy;
use prometheus::{CounterVec, Encoder, Histogram, HistogramOpts, IntGauge, Opts, Registry, TextEncoder};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Count of status transitions, by destination status and tier.
/// Labels: tier, status
pub static WORK_ORDER_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "wos_work_order_transitions_total",
        "Total work order status transitions by tier and destination status",
    );
    let counter = CounterVec::new(opts, &["tier", "status"])
        .expect("failed to create work order transitions counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("failed to register work order transitions counter");
    counter
});

/// Count of dispatcher model/equipment attempts, by tier and outcome.
/// Labels: tier, outcome ("success" | "transient" | "permanent")
pub static DISPATCH_ATTEMPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new(
        "wos_dispatch_attempts_total",
        "Total dispatcher attempts by tier and outcome",
    );
    let counter = CounterVec::new(opts, &["tier", "outcome"])
        .expect("failed to create dispatch attempts counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("failed to register dispatch attempts counter");
    counter
});

/// Count of QA verdicts, by pass/fail.
/// Labels: result ("pass" | "fail")
pub static QA_VERDICTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    let opts = Opts::new("wos_qa_verdicts_total", "Total QA verdicts by result");
    let counter =
        CounterVec::new(opts, &["result"]).expect("failed to create QA verdicts counter");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("failed to register QA verdicts counter");
    counter
});

/// Accumulated cost in USD across all recorded agent attempts.
pub static COST_USD_TOTAL: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "wos_attempt_cost_usd",
        "Cost in USD of each recorded agent attempt",
    )
    .buckets(vec![0.0, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]);
    let histogram = Histogram::with_opts(opts).expect("failed to create cost histogram");
    REGISTRY
        .register(Box::new(histogram.clone()))
        .expect("failed to register cost histogram");
    histogram
});

/// Depth of the dispatcher's queue at the moment of the last sample.
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    let opts = Opts::new("wos_queue_depth", "Approximate number of undelivered queue entries");
    let gauge = IntGauge::with_opts(opts).expect("failed to create queue depth gauge");
    REGISTRY
        .register(Box::new(gauge.clone()))
        .expect("failed to register queue depth gauge");
    gauge
});

/// Records a status transition for observability.
pub fn record_status_transition(tier: &str, status: &str) {
    WORK_ORDER_TRANSITIONS_TOTAL
        .with_label_values(&[tier, status])
        .inc();
}

/// Records a dispatcher attempt outcome.
pub fn record_dispatch_attempt(tier: &str, outcome: &str) {
    DISPATCH_ATTEMPTS_TOTAL.with_label_values(&[tier, outcome]).inc();
}

/// Records a QA verdict and the cost of the attempt that produced it.
pub fn record_qa_verdict(passed: bool, cost_usd: f64) {
    let result = if passed { "pass" } else { "fail" };
    QA_VERDICTS_TOTAL.with_label_values(&[result]).inc();
    COST_USD_TOTAL.observe(cost_usd);
}

pub fn set_queue_depth(depth: i64) {
    QUEUE_DEPTH.set(depth);
}

/// Encodes all registered metrics in Prometheus text exposition format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder
        .encode(&metric_families, &mut buffer)
        .expect("failed to encode metrics");
    String::from_utf8(buffer).expect("failed to convert metrics to UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_encode_roundtrip() {
        record_status_transition("intern", "completed");
        record_dispatch_attempt("intern", "success");
        record_qa_verdict(true, 0.002);
        set_queue_depth(3);
        let text = encode_metrics();
        assert!(text.contains("wos_work_order_transitions_total"));
        assert!(text.contains("wos_dispatch_attempts_total"));
        assert!(text.contains("wos_qa_verdicts_total"));
        assert!(text.contains("wos_queue_depth"));
    }
}
