use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::{Query, State},
    http::{HeaderMap, Method},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
};
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{KeyValue, global};
use opentelemetry_semantic_conventions::attribute::{ERROR_TYPE, HTTP_RESPONSE_STATUS_CODE};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::audit_log::headers_to_map;
use crate::auth::extract_token;
use crate::error::AppError;
use crate::events::GatewayEvent;
use crate::models::{ModelsQuery, ModelsResponse};
use crate::relay::{apply_gateway_headers, preflight, relay_outcome};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/embeddings", any(handle_embeddings))
        .route("/embeddings", any(handle_embeddings))
        .route_layer(middleware::map_response(apply_gateway_headers))
        .route("/v1/models", get(get_models))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn handle_embeddings(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Response {
    if method == Method::OPTIONS {
        return preflight();
    }

    let request_id = next_request_id();
    let start = Instant::now();
    let mut span = global::tracer("embeddings-gateway").start("embeddings.gateway.request");
    span.set_attribute(KeyValue::new("request.id", request_id.clone()));

    let result = if method == Method::POST {
        forward_embeddings(&state, &request_id, &headers, body).await
    } else {
        Err(AppError::MethodNotAllowed)
    };

    let latency_ms = start.elapsed().as_millis();
    let response = match result {
        Ok((model, response)) => {
            span.set_attribute(KeyValue::new("model", model.clone()));
            state.sink.emit(&GatewayEvent::RequestCompleted {
                request_id,
                model,
                status: response.status().as_u16(),
                latency_ms,
            });
            response
        }
        Err(err) => {
            span.set_attribute(KeyValue::new(ERROR_TYPE, err.error_type()));
            state.sink.emit(&GatewayEvent::RequestFailed {
                request_id,
                status: err.status().as_u16(),
                error_type: err.error_type().to_string(),
                message: err.to_string(),
                detail: err.detail(),
            });
            err.into_response()
        }
    };
    span.set_attribute(KeyValue::new(
        HTTP_RESPONSE_STATUS_CODE,
        i64::from(response.status().as_u16()),
    ));
    span.end();
    response
}

/// Credential check, admission, body read, validation, upstream call, relay.
/// Returns the model that was actually used alongside the response.
async fn forward_embeddings(
    state: &AppState,
    request_id: &str,
    headers: &HeaderMap,
    body: Body,
) -> Result<(String, Response), AppError> {
    let token = extract_token(headers).ok_or(AppError::Unauthorized)?;
    let _inflight = state.admission.acquire().await.ok_or(AppError::Overloaded)?;

    let bytes = to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| AppError::internal(format!("request body read failed: {}", e)))?;
    state.sink.emit(&GatewayEvent::RequestReceived {
        request_id: request_id.to_string(),
        headers: headers_to_map(headers),
        body: String::from_utf8_lossy(&bytes).into_owned(),
    });

    let doc: Value = serde_json::from_slice(&bytes).map_err(AppError::MalformedJson)?;
    let params = state.validator.validate(request_id, &doc)?;
    state
        .metrics
        .requests
        .add(1, &[KeyValue::new("model", params.model.clone())]);

    let upstream_start = Instant::now();
    let outcome = state.upstream.invoke(&params, &token).await?;
    state.sink.emit(&GatewayEvent::UpstreamResponse {
        request_id: request_id.to_string(),
        model: params.model.clone(),
        status: outcome.status,
        latency_ms: upstream_start.elapsed().as_millis(),
        body: outcome.body_text(),
    });

    let response = relay_outcome(outcome)?;
    Ok((params.model, response))
}

pub async fn get_models(
    State(state): State<AppState>,
    Query(query): Query<ModelsQuery>,
) -> impl IntoResponse {
    Json(ModelsResponse {
        object: "list",
        data: state.catalog.by_type(query.capability_type.as_deref()),
    })
    .into_response()
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok"
    }))
}

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_request_id() -> String {
    let seq = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("req-{}-{}", ts, seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::testing::RecordingSink;
    use crate::metrics::init_metrics_noop;
    use axum::http::{Request, StatusCode, header};
    use axum::routing::post;
    use http_body_util::BodyExt;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    #[derive(Clone, Default)]
    struct Upstream {
        seen: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
    }

    impl Upstream {
        fn calls(&self) -> Vec<(HeaderMap, Value)> {
            self.seen.lock().unwrap().clone()
        }
    }

    async fn spawn_upstream(status: u16, body: &'static str, delay: Duration) -> (String, Upstream) {
        let upstream = Upstream::default();
        let app = Router::new()
            .route(
                "/embeddings",
                post(
                    move |State(up): State<Upstream>, headers: HeaderMap, Json(payload): Json<Value>| async move {
                        up.seen.lock().unwrap().push((headers, payload));
                        tokio::time::sleep(delay).await;
                        (StatusCode::from_u16(status).unwrap(), body)
                    },
                ),
            )
            .with_state(upstream.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/embeddings", addr), upstream)
    }

    fn gateway(url: String, sink: Arc<RecordingSink>, tweak: impl FnOnce(&mut Config)) -> AppState {
        let mut config = Config::default();
        config.upstream.embeddings_url = url;
        tweak(&mut config);
        AppState::new(&config, sink, init_metrics_noop(Arc::default()), Arc::default())
            .expect("state")
    }

    fn post_json(body: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/v1/embeddings")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(state: AppState, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn success_body_is_relayed_verbatim() {
        let raw = r#"{"data":[{"object":"embedding","embedding":[0.5],"index":0}],"model":"text-embedding-3-small"}"#;
        let (url, upstream) = spawn_upstream(200, raw, Duration::ZERO).await;
        let state = gateway(url, Arc::default(), |_| {});
        let (status, headers, body) =
            send(state, post_json(r#"{"input":"hello"}"#, Some("tok-1"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, raw);
        assert_eq!(headers[header::CONTENT_TYPE], "application/json; charset=utf-8");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let calls = upstream.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0[header::AUTHORIZATION], "Bearer tok-1");
        assert_eq!(
            calls[0].1,
            json!({"model": "text-embedding-3-small", "input": ["hello"]})
        );
    }

    #[tokio::test]
    async fn array_input_and_user_are_forwarded() {
        let (url, upstream) = spawn_upstream(200, "{}", Duration::ZERO).await;
        let state = gateway(url, Arc::default(), |_| {});
        let (status, _, _) = send(
            state,
            post_json(
                r#"{"model":"text-embedding-ada-002","input":["b","a","c"],"user":"alice"}"#,
                Some("tok-1"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            upstream.calls()[0].1,
            json!({"model": "text-embedding-ada-002", "input": ["b", "a", "c"], "user": "alice"})
        );
    }

    #[tokio::test]
    async fn unknown_model_falls_back_to_default() {
        let (url, upstream) = spawn_upstream(200, "{}", Duration::ZERO).await;
        let sink = Arc::new(RecordingSink::default());
        let state = gateway(url, sink.clone(), |_| {});
        let (status, _, _) = send(
            state,
            post_json(r#"{"model":"gpt-4o","input":"x","user":""}"#, Some("tok-1")),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let payload = &upstream.calls()[0].1;
        assert_eq!(payload["model"], "text-embedding-3-small");
        assert!(payload.get("user").is_none());
        assert!(sink.events().iter().any(|e| matches!(
            e,
            GatewayEvent::ModelFallback { requested, .. } if requested == "gpt-4o"
        )));
    }

    #[tokio::test]
    async fn missing_token_is_401_without_upstream_call() {
        let (url, upstream) = spawn_upstream(200, "{}", Duration::ZERO).await;
        let state = gateway(url, Arc::default(), |_| {});
        let (status, _, body) = send(state, post_json(r#"{"input":"x"}"#, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, r#"{"error":"Token is invalid."}"#);
        assert!(upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_400() {
        let (url, upstream) = spawn_upstream(200, "{}", Duration::ZERO).await;
        let state = gateway(url, Arc::default(), |_| {});
        let (status, _, body) = send(state, post_json("{not json", Some("tok-1"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["error"], "Invalid JSON format");
        assert!(upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn invalid_input_shapes_never_reach_upstream() {
        let (url, upstream) = spawn_upstream(200, "{}", Duration::ZERO).await;
        for (payload, message) in [
            (r#"{"input":42}"#, "Invalid input format"),
            (r#"{"input":{"a":1}}"#, "Invalid input format"),
            (r#"{"input":null}"#, "Invalid input format"),
            (r#"{"model":"text-embedding-3-small"}"#, "Invalid input format"),
            (r#"{"input":[]}"#, "Input cannot be empty."),
        ] {
            let state = gateway(url.clone(), Arc::default(), |_| {});
            let (status, _, body) = send(state, post_json(payload, Some("tok-1"))).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{}", payload);
            let body: Value = serde_json::from_str(&body).unwrap();
            assert_eq!(body["error"], message, "{}", payload);
        }
        assert!(upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn upstream_error_status_is_propagated() {
        let (url, _) = spawn_upstream(503, r#"{"detail":"rate limited"}"#, Duration::ZERO).await;
        let state = gateway(url, Arc::default(), |_| {});
        let (status, headers, body) =
            send(state, post_json(r#"{"input":"x"}"#, Some("tok-1"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            body["error"],
            r#"Failed to get embeddings from Copilot API: {"detail":"rate limited"}"#
        );
        assert_eq!(body["code"], 503);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_generic_500() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let sink = Arc::new(RecordingSink::default());
        let state = gateway(format!("http://{}/embeddings", addr), sink.clone(), |_| {});
        let (status, _, body) = send(state, post_json(r#"{"input":"x"}"#, Some("tok-1"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["error"], "Internal server error");

        let failure = sink
            .events()
            .into_iter()
            .find_map(|e| match e {
                GatewayEvent::RequestFailed { detail, .. } => detail,
                _ => None,
            })
            .expect("detail recorded");
        assert!(failure.contains("upstream request failed"));
    }

    #[tokio::test]
    async fn silent_upstream_past_read_timeout_is_a_generic_500() {
        let (url, upstream) = spawn_upstream(200, "{}", Duration::from_secs(2)).await;
        let sink = Arc::new(RecordingSink::default());
        let state = gateway(url, sink.clone(), |config| {
            config.upstream.read_timeout_ms = 200;
        });
        let (status, headers, body) =
            send(state, post_json(r#"{"input":"x"}"#, Some("tok-1"))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(body, r#"{"error":"Internal server error","code":500}"#);
        assert_eq!(upstream.calls().len(), 1);
        assert!(sink.events().iter().any(|e| matches!(
            e,
            GatewayEvent::RequestFailed { status: 500, .. }
        )));
    }

    #[tokio::test]
    async fn options_is_204_with_cors_headers() {
        let state = gateway("http://127.0.0.1:9/embeddings".to_string(), Arc::default(), |_| {});
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/v1/embeddings")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(state, request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type, Authorization"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[tokio::test]
    async fn other_methods_are_405() {
        let state = gateway("http://127.0.0.1:9/embeddings".to_string(), Arc::default(), |_| {});
        let request = Request::builder()
            .method(Method::GET)
            .uri("/embeddings")
            .body(Body::empty())
            .unwrap();
        let (status, headers, body) = send(state, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(body, r#"{"error":"Method Not Allowed","code":405}"#);
    }

    #[tokio::test]
    async fn saturated_gateway_rejects_with_429() {
        let (url, upstream) = spawn_upstream(200, "{}", Duration::ZERO).await;
        let state = gateway(url, Arc::default(), |config| {
            config.limits.max_inflight = 1;
            config.limits.max_queued = 0;
        });
        let _held = state.admission.acquire().await.expect("slot");
        let (status, _, body) =
            send(state.clone(), post_json(r#"{"input":"x"}"#, Some("tok-1"))).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["error"], "Too many requests in flight");
        assert!(upstream.calls().is_empty());
    }

    #[tokio::test]
    async fn queued_request_runs_once_a_slot_frees() {
        let (url, upstream) = spawn_upstream(200, "{}", Duration::ZERO).await;
        let state = gateway(url, Arc::default(), |config| {
            config.limits.max_inflight = 1;
            config.limits.max_queued = 4;
        });
        let held = state.admission.acquire().await.expect("slot");
        let pending = tokio::spawn(send(
            state.clone(),
            post_json(r#"{"input":"x"}"#, Some("tok-1")),
        ));
        while state.admission.queued() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(upstream.calls().is_empty());
        drop(held);
        let (status, _, _) = pending.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(upstream.calls().len(), 1);
    }

    #[tokio::test]
    async fn models_endpoint_filters_by_type() {
        let state = gateway("http://127.0.0.1:9/embeddings".to_string(), Arc::default(), |_| {});
        let request = Request::builder()
            .uri("/v1/models?type=embeddings")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(state, request).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_str(&body).unwrap();
        let ids: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&"text-embedding-3-small"));
        assert!(!ids.contains(&"gpt-4o"));
    }

    #[tokio::test]
    async fn health_is_ok() {
        let state = gateway("http://127.0.0.1:9/embeddings".to_string(), Arc::default(), |_| {});
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, _, body) = send(state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"status":"ok"}"#);
    }
}
