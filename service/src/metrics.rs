use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use prometheus::{HistogramVec, IntCounterVec, register_histogram_vec, register_int_counter_vec};
use std::sync::LazyLock;

const UNMATCHED_ENDPOINT: &str = "unmatched";

pub static HTTP_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "http_requests_total",
        "Total HTTP requests by method, endpoint and status",
        &["method", "endpoint", "http_status"]
    )
    .expect("register http_requests_total")
});

pub static HTTP_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "http_request_duration_seconds",
        "Histogram of request handling latency by endpoint",
        &["endpoint"],
        vec![
            // static routes
            0.001, 0.0025, 0.005, 0.01, 0.025,
            // readiness round trips
            0.05, 0.1, 0.25, 0.5,
            // slow datastore and probe timeouts
            1.0, 2.5, 5.0, 10.0,
        ]
    )
    .expect("register http_request_duration_seconds")
});

/// Counts and times every request; `endpoint` is the route template, not the raw path.
pub(crate) async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_ENDPOINT.to_owned(), |path| path.as_str().to_owned());
    let method = request.method().to_string();

    let timer = HTTP_REQUEST_DURATION
        .with_label_values(&[&endpoint])
        .start_timer();
    let response = next.run(request).await;
    timer.observe_duration();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &endpoint, response.status().as_str()])
        .inc();
    response
}
