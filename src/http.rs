//! Cross-cutting HTTP layers: request ids, tracing, timeouts, body limit, CORS

use axum::Router;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, HeaderName};
use axum::http::{HeaderValue, Method, StatusCode};
use std::time::Duration;
use tower_http::LatencyUnit;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::constants::{MAX_BODY_SIZE, REQUEST_TIMEOUT_SECS};
use crate::services::cache::{
    CACHE_BYPASS_HEADER, CACHE_EXPIRES_HEADER, CACHE_STATUS_HEADER, RESPONSE_TIME_HEADER,
};

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let allow_origin = match origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        Some(origin) => AllowOrigin::exact(origin),
        None => AllowOrigin::any(),
    };

    let layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static(CACHE_BYPASS_HEADER),
        ])
        .expose_headers([
            REQUEST_ID_HEADER,
            CACHE_STATUS_HEADER,
            RESPONSE_TIME_HEADER,
            CACHE_EXPIRES_HEADER,
        ]);

    // Cookies only flow to an explicit origin
    if origin.is_some() {
        layer.allow_credentials(true)
    } else {
        layer
    }
}

pub fn apply_standard_layers<S>(
    router: Router<S>,
    service_name: &'static str,
    cors_origin: Option<&str>,
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let trace = TraceLayer::new_for_http()
        .make_span_with(move |request: &axum::http::Request<axum::body::Body>| {
            let request_id = request
                .headers()
                .get(&REQUEST_ID_HEADER)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "http.request",
                service = service_name,
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id
            )
        })
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    router
        .layer(trace)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(cors_layer(cors_origin))
        .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
}
