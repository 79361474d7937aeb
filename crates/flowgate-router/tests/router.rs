use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use bytes::Bytes;
use flowgate_common::{AuthType, GatewayConfigPatch};
use flowgate_core::GatewayService;
use flowgate_provider_core::{
    Credential, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse,
};
use flowgate_provider_impl::{ConversationContext, IflowProvider};
use flowgate_router::{MAX_BODY_BYTES, gateway_router};
use serde_json::{Value, json};
use tower::ServiceExt;

/// Every chat call gets the same canned reply; telemetry gets `{}`.
struct CannedUpstream {
    status: u16,
    content_type: &'static str,
    body: &'static str,
    chats: Mutex<usize>,
}

impl UpstreamClient for CannedUpstream {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        Box::pin(async move {
            let (status, content_type, body) = if req.url.ends_with("/chat/completions") {
                *self.chats.lock().unwrap() += 1;
                (self.status, self.content_type, self.body)
            } else {
                (200, "application/json", "{}")
            };
            Ok(UpstreamHttpResponse {
                status,
                headers: vec![("content-type".into(), content_type.into())],
                body: UpstreamBody::Bytes(Bytes::from_static(body.as_bytes())),
            })
        })
    }
}

const COMPLETION: &str = r#"{"id":"r1","object":"chat.completion","created":1,"model":"glm-5","choices":[{"index":0,"message":{"role":"assistant","content":"pong"},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#;

fn upstream(status: u16, content_type: &'static str, body: &'static str) -> Arc<CannedUpstream> {
    Arc::new(CannedUpstream {
        status,
        content_type,
        body,
        chats: Mutex::new(0),
    })
}

fn app_with(upstream: Arc<CannedUpstream>, custom_key: Option<&str>, api_key: &str) -> axum::Router {
    let config = GatewayConfigPatch {
        settings_path: Some("/tmp/flowgate-router-settings.json".into()),
        custom_api_key: custom_key.map(str::to_string),
        ..Default::default()
    }
    .into_config()
    .unwrap();
    let provider = IflowProvider::new(
        upstream,
        "https://apis.iflow.cn/v1",
        Arc::new(ConversationContext::new(api_key)),
    );
    let credential = Credential {
        api_key: api_key.to_string(),
        access_token: None,
        refresh_token: None,
        auth_type: Some(AuthType::ApiKey),
        expires_at: None,
    };
    gateway_router(Arc::new(GatewayService::new(config, provider, credential)))
}

fn app(upstream: Arc<CannedUpstream>) -> axum::Router {
    app_with(upstream, None, "sk-test")
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body.into())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_of(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn chat_body() -> String {
    json!({"model": "glm-5", "messages": [{"role": "user", "content": "ping"}]}).to_string()
}

#[tokio::test]
async fn chat_aliases_reach_the_openai_dialect() {
    for path in [
        "/v1/chat/completions",
        "/chat/completions/",
        "/api/v1/chat/completions",
        "/",
        "/v1/",
    ] {
        let response = app(upstream(200, "application/json", COMPLETION))
            .oneshot(post(path, chat_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{path}");
        let value = json_of(response).await;
        assert_eq!(value["choices"][0]["message"]["content"], "pong", "{path}");
    }
}

#[tokio::test]
async fn messages_dialect_answers_in_claude_shape() {
    let body = json!({
        "model": "claude-sonnet-4",
        "max_tokens": 64,
        "messages": [{"role": "user", "content": "ping"}]
    });
    let response = app(upstream(200, "application/json", COMPLETION))
        .oneshot(post("/v1/messages/", body.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let value = json_of(response).await;
    assert_eq!(value["type"], "message");
    assert_eq!(value["content"][0]["text"], "pong");
    assert_eq!(value["stop_reason"], "end_turn");
}

#[tokio::test]
async fn client_errors_use_each_dialect_envelope() {
    let response = app(upstream(200, "application/json", COMPLETION))
        .oneshot(post("/v1/chat/completions", r#"{"model":"glm-5"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let value = json_of(response).await;
    assert_eq!(value["error"]["type"], "invalid_request_error");
    assert_eq!(value["error"]["code"], "422");
    assert!(value["error"]["param"].is_null());

    let response = app(upstream(200, "application/json", COMPLETION))
        .oneshot(post("/v1/messages", "{oops"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let value = json_of(response).await;
    assert_eq!(value["type"], "error");
    assert_eq!(value["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn upstream_rejection_is_relayed_per_dialect() {
    let limited = r#"{"msg":"slow down"}"#;
    let response = app(upstream(429, "application/json", limited))
        .oneshot(post("/v1/chat/completions", chat_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let value = json_of(response).await;
    assert_eq!(value["error"]["message"], "slow down");

    let response = app(upstream(429, "application/json", limited))
        .oneshot(post("/v1/messages", chat_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(json_of(response).await["error"]["type"], "rate_limit_error");

    let response = app(upstream(502, "text/plain", "bad gateway"))
        .oneshot(post("/v1/messages", chat_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_of(response).await["error"]["type"], "api_error");
}

#[tokio::test]
async fn zero_choice_reply_is_a_server_error() {
    let response = app(upstream(200, "application/json", r#"{"choices":[]}"#))
        .oneshot(post("/v1/chat/completions", chat_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn streaming_reply_carries_sse_headers() {
    let sse = "data: {\"id\":\"c\",\"object\":\"chat.completion.chunk\",\"created\":1,\"model\":\"glm-5\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"pong\"},\"finish_reason\":\"stop\"}]}\n\ndata: [DONE]\n\n";
    let body = json!({"model": "glm-5", "stream": true, "messages": [{"role": "user", "content": "ping"}]});
    let response = app(upstream(200, "text/event-stream", sse))
        .oneshot(post("/v1/chat/completions", body.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("pong"));
    assert!(text.contains("data: [DONE]"));
}

#[tokio::test]
async fn oversized_body_is_rejected_before_dispatch() {
    let fake = upstream(200, "application/json", COMPLETION);
    let body = vec![b' '; MAX_BODY_BYTES + 1];
    let response = app(fake.clone())
        .oneshot(post("/v1/chat/completions", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let value = json_of(response).await;
    assert_eq!(value["error"]["message"], "Request body too large");
    assert_eq!(value["error"]["type"], "invalid_request_error");
    assert_eq!(*fake.chats.lock().unwrap(), 0);
}

#[tokio::test]
async fn custom_key_guards_everything_but_health() {
    let fake = upstream(200, "application/json", COMPLETION);
    let app = app_with(fake, Some("gate-key"), "sk-test");

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/v1/models")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let value = json_of(response).await;
    assert_eq!(value["error"]["message"], "Missing Authorization header");
    assert_eq!(value["error"]["code"], "missing_api_key");

    let mut wrong = post("/v1/chat/completions", chat_body());
    wrong
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer nope".parse().unwrap());
    let response = app.clone().oneshot(wrong).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_of(response).await["error"]["code"], "invalid_api_key");

    let mut right = post("/v1/chat/completions", chat_body());
    right
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer gate-key".parse().unwrap());
    let response = app.oneshot(right).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_reports_degraded_without_credential() {
    let response = app_with(upstream(200, "application/json", COMPLETION), None, "")
        .oneshot(get("/health"))
        .await
        .unwrap();
    let value = json_of(response).await;
    assert_eq!(value["status"], "degraded");
    assert_eq!(value["logged_in"], false);

    let value = json_of(app(upstream(200, "application/json", COMPLETION)).oneshot(get("/health")).await.unwrap()).await;
    assert_eq!(value["status"], "healthy");
}

#[tokio::test]
async fn catalogue_token_count_and_compat_routes() {
    let fake = upstream(200, "application/json", COMPLETION);
    let app = app(fake.clone());

    for path in ["/v1/models", "/models", "/api/v1/models"] {
        let value = json_of(app.clone().oneshot(get(path)).await.unwrap()).await;
        assert_eq!(value["object"], "list");
        let ids: Vec<&str> = value["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|model| model["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&"glm-5"));
        assert_eq!(value["data"][0]["owned_by"], "iflow");
    }

    let value = json_of(app.clone().oneshot(get("/v1/vision-models")).await.unwrap()).await;
    assert_eq!(
        value,
        json!({"object": "list", "data": [{
            "id": "qwen-vl-max",
            "object": "model",
            "owned_by": "alibaba",
            "supports_vision": true,
            "max_images": 10
        }]})
    );

    let response = app
        .clone()
        .oneshot(post("/v1/messages/count_tokens", "not json"))
        .await
        .unwrap();
    assert_eq!(json_of(response).await["input_tokens"], 100);

    let response = app
        .clone()
        .oneshot(post("/api/event_logging/batch", "[]"))
        .await
        .unwrap();
    assert_eq!(json_of(response).await, json!({"status": "ok", "logged": true}));

    let value = json_of(app.clone().oneshot(get("/")).await.unwrap()).await;
    assert_eq!(value["name"], "flowgate");

    let value = json_of(app.oneshot(get("/admin/stats")).await.unwrap()).await;
    assert_eq!(value["requests_total"], 0);
    assert_eq!(value["gate_capacity"], 1);
    assert_eq!(*fake.chats.lock().unwrap(), 0);
}
