// src/metrics.rs

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Gauge, HistogramVec, TextEncoder,
};
use std::time::Instant;

use crate::vfs::ChangeKind;

// 定义指标
static HTTP_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap()
});

static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap()
});

static WATCHDOG_CONNECTIONS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "watchdog_connections_active",
        "Number of active watchdog WebSocket connections"
    )
    .unwrap()
});

static CHANGE_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "content_change_events_total",
        "Total number of content change events broadcast",
        &["kind"]
    )
    .unwrap()
});

static DOWNLOAD_TOKENS_ISSUED: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "download_tokens_issued_total",
        "Total number of one-shot download tokens issued"
    )
    .unwrap()
});

/// 初始化指标（确保所有指标都被注册）
pub fn init_metrics() {
    Lazy::force(&HTTP_REQUESTS_TOTAL);
    Lazy::force(&HTTP_REQUEST_DURATION);
    Lazy::force(&WATCHDOG_CONNECTIONS);
    Lazy::force(&CHANGE_EVENTS_TOTAL);
    Lazy::force(&DOWNLOAD_TOKENS_ISSUED);
}

pub fn watchdog_connected() {
    WATCHDOG_CONNECTIONS.inc();
}

pub fn watchdog_disconnected() {
    WATCHDOG_CONNECTIONS.dec();
}

pub fn observe_change_event(kind: ChangeKind) {
    CHANGE_EVENTS_TOTAL
        .with_label_values(&[&kind.to_string()])
        .inc();
}

pub fn observe_token_issued() {
    DOWNLOAD_TOKENS_ISSUED.inc();
}

/// 指标中间件
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path])
        .observe(start.elapsed().as_secs_f64());

    response
}

/// GET /metrics
pub async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    encoder
        .encode_to_string(&prometheus::gather())
        .unwrap_or_default()
}
