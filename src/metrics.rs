//! Prometheus metrics registry and instruments.
//!
//! Framework-agnostic; used from the HTTP layer, the marker pipeline, and
//! the scheduler.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arportal_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");
    pub static ref HTTP_REQUEST_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "arportal_http_request_duration_seconds",
            "HTTP request duration in seconds"
        ).buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        &["method", "endpoint"]
    ).expect("metric can be created");

    // Database
    pub static ref DB_QUERIES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arportal_db_queries_total", "Total number of database queries"),
        &["operation", "table"]
    ).expect("metric can be created");

    // Marker pipeline (C4)
    pub static ref MARKER_JOBS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arportal_marker_jobs_total", "Total marker-generation jobs by outcome"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref MARKER_JOB_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "arportal_marker_job_duration_seconds",
            "Marker-generation job duration in seconds"
        ).buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0]),
        &["outcome"]
    ).expect("metric can be created");

    // Scheduler (C5)
    pub static ref ROTATION_TICKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arportal_rotation_ticks_total", "Video rotation ticks processed"),
        &["rotation_type"]
    ).expect("metric can be created");
    pub static ref EXPIRY_DEACTIVATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arportal_expiry_deactivations_total", "Projects deactivated on expiry"),
        &["result"]
    ).expect("metric can be created");
    pub static ref NOTIFICATIONS_SENT_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arportal_notifications_sent_total", "Notifications appended by kind"),
        &["kind"]
    ).expect("metric can be created");

    // Storage (C1)
    pub static ref STORAGE_OPERATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arportal_storage_operations_total", "Storage provider operations"),
        &["provider", "operation", "result"]
    ).expect("metric can be created");

    // Credentials (C2)
    pub static ref CREDENTIAL_REFRESHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arportal_credential_refreshes_total", "OAuth token refresh attempts"),
        &["result"]
    ).expect("metric can be created");

    pub static ref JOB_QUEUE_DEPTH: IntGauge = IntGauge::new(
        "arportal_job_queue_depth",
        "Current number of pending jobs across all queues"
    ).expect("metric can be created");

    // Errors
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("arportal_errors_total", "Total number of errors by kind"),
        &["kind"]
    ).expect("metric can be created");
}

/// Initialize metrics registry. Must be called once at startup before
/// `/metrics` is scraped.
pub fn init_metrics() {
    REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone())).expect("register metric");
    REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone())).expect("register metric");
    REGISTRY.register(Box::new(DB_QUERIES_TOTAL.clone())).expect("register metric");
    REGISTRY.register(Box::new(MARKER_JOBS_TOTAL.clone())).expect("register metric");
    REGISTRY.register(Box::new(MARKER_JOB_DURATION_SECONDS.clone())).expect("register metric");
    REGISTRY.register(Box::new(ROTATION_TICKS_TOTAL.clone())).expect("register metric");
    REGISTRY.register(Box::new(EXPIRY_DEACTIVATIONS_TOTAL.clone())).expect("register metric");
    REGISTRY.register(Box::new(NOTIFICATIONS_SENT_TOTAL.clone())).expect("register metric");
    REGISTRY.register(Box::new(STORAGE_OPERATIONS_TOTAL.clone())).expect("register metric");
    REGISTRY.register(Box::new(CREDENTIAL_REFRESHES_TOTAL.clone())).expect("register metric");
    REGISTRY.register(Box::new(JOB_QUEUE_DEPTH.clone())).expect("register metric");
    REGISTRY.register(Box::new(ERRORS_TOTAL.clone())).expect("register metric");

    tracing::info!("Metrics registry initialized");
}
