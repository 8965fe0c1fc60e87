//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Cache Metrics
    pub static ref CACHE_READS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("feedsync_cache_reads_total", "Total number of cache reads"),
        &["cache_name", "result"]
    ).expect("metric can be created");
    pub static ref CACHE_WRITES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("feedsync_cache_writes_total", "Total number of cache writes"),
        &["cache_name", "status"]
    ).expect("metric can be created");

    // Feed Metrics
    pub static ref FEED_LOADS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("feedsync_feed_loads_total", "Total number of feed page loads"),
        &["kind", "outcome"]
    ).expect("metric can be created");
    pub static ref FEED_SIZE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("feedsync_feed_size", "Current number of entries in a feed"),
        &["kind"]
    ).expect("metric can be created");
    pub static ref RECONCILIATION_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("feedsync_reconciliation_misses_total", "Mutations whose target entry was not found"),
        &["intent"]
    ).expect("metric can be created");

    // Store Metrics
    pub static ref STORE_LOADS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("feedsync_store_loads_total", "Total number of persistent store loads"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref STORE_SAVES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("feedsync_store_saves_total", "Total number of session saves"),
        &["session"]
    ).expect("metric can be created");
}

/// Initialize metrics registry.
pub fn init_metrics() {
    REGISTRY
        .register(Box::new(CACHE_READS_TOTAL.clone()))
        .expect("CACHE_READS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(CACHE_WRITES_TOTAL.clone()))
        .expect("CACHE_WRITES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(FEED_LOADS_TOTAL.clone()))
        .expect("FEED_LOADS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(FEED_SIZE.clone()))
        .expect("FEED_SIZE can be registered");
    REGISTRY
        .register(Box::new(RECONCILIATION_MISSES_TOTAL.clone()))
        .expect("RECONCILIATION_MISSES_TOTAL can be registered");
    REGISTRY
        .register(Box::new(STORE_LOADS_TOTAL.clone()))
        .expect("STORE_LOADS_TOTAL can be registered");
    REGISTRY
        .register(Box::new(STORE_SAVES_TOTAL.clone()))
        .expect("STORE_SAVES_TOTAL can be registered");

    tracing::info!("Metrics registry initialized");
}

/// Render the registry in the Prometheus text exposition format.
pub fn gather_text() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(error) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!(%error, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
