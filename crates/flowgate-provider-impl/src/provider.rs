use std::sync::Arc;
use std::time::Duration;

use flowgate_provider_core::{
    Credential, UpstreamClient, UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse,
};
use flowgate_transform::ChatRequest;
use flowgate_transform::ModelRules;
use flowgate_transform::body::build_upstream_body;
use flowgate_transform::encode::UpstreamOptions;
use tracing::{info, warn};

use crate::fingerprint::{
    ChatHeaderInput, ConversationContext, TraceContext, chat_headers, now_millis,
};
use crate::telemetry::Telemetry;

/// Generation can be slow; the read side gets minutes.
pub const CHAT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("failed to encode upstream body: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Upstream(#[from] UpstreamFailure),
}

/// Telemetry handle for one dispatched call.
#[derive(Clone)]
pub struct CallContext {
    telemetry: Telemetry,
    model: String,
    trace: TraceContext,
    observation_id: String,
}

impl CallContext {
    pub fn trace(&self) -> &TraceContext {
        &self.trace
    }

    /// The upstream model name the call was sent with.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn observation_id(&self) -> &str {
        &self.observation_id
    }

    /// Fires `run_error` for this call.
    pub fn report_error(&self, message: &str) {
        self.telemetry
            .run_error(&self.model, &self.trace, &self.observation_id, message);
    }
}

/// A 2xx upstream response and its call context.
pub struct ChatDispatch {
    pub response: UpstreamHttpResponse,
    pub call: CallContext,
}

/// The upstream chat endpoint, called the way the official client calls it.
#[derive(Clone)]
pub struct IflowProvider {
    client: Arc<dyn UpstreamClient>,
    base_url: String,
    context: Arc<ConversationContext>,
    telemetry: Telemetry,
    rules: Arc<ModelRules>,
}

impl IflowProvider {
    pub fn new(
        client: Arc<dyn UpstreamClient>,
        base_url: impl Into<String>,
        context: Arc<ConversationContext>,
    ) -> Self {
        Self {
            telemetry: Telemetry::new(client.clone(), context.clone()),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            context,
            rules: Arc::new(ModelRules::default()),
        }
    }

    pub fn with_rules(mut self, rules: ModelRules) -> Self {
        self.rules = Arc::new(rules);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Signed request for `request`, whose model must already be resolved.
    pub fn build_chat_request(
        &self,
        credential: &Credential,
        request: &ChatRequest,
        options: UpstreamOptions,
        stream: bool,
        trace: &TraceContext,
    ) -> Result<UpstreamHttpRequest, serde_json::Error> {
        let body = build_upstream_body(request, &self.rules, options, stream)?;
        let headers = chat_headers(ChatHeaderInput {
            base_url: &self.base_url,
            api_key: &credential.api_key,
            context: &self.context,
            trace,
            timestamp_ms: now_millis(),
            content_length: body.len(),
        });
        Ok(UpstreamHttpRequest::post(self.chat_url(), headers, body)
            .streaming(stream)
            .with_timeout(CHAT_TIMEOUT))
    }

    /// Sends one chat call. Non-2xx responses come back as
    /// [`UpstreamFailure::Http`]; every failure also fires `run_error`.
    pub async fn chat(
        &self,
        credential: &Credential,
        request: &ChatRequest,
        options: UpstreamOptions,
        stream: bool,
    ) -> Result<ChatDispatch, ProviderError> {
        let trace = TraceContext::generate();
        let http = self.build_chat_request(credential, request, options, stream, &trace)?;
        let observation_id = self.telemetry.run_started(&request.model, &trace);
        let call = CallContext {
            telemetry: self.telemetry.clone(),
            model: request.model.clone(),
            trace,
            observation_id,
        };
        info!(
            model = %request.model,
            stream,
            messages = request.messages.len(),
            "dispatching chat call"
        );

        let response = match self.client.send(http).await {
            Ok(response) => response,
            Err(failure) => {
                warn!(error = %failure, "upstream chat call failed");
                call.report_error(&failure.message());
                return Err(failure.into());
            }
        };
        if response.is_success() {
            return Ok(ChatDispatch { response, call });
        }
        let status = response.status;
        let headers = response.headers.clone();
        let body = response.into_bytes().await;
        let failure = UpstreamFailure::Http {
            status,
            headers,
            body,
        };
        warn!(status, error = %failure, "upstream chat call rejected");
        call.report_error(&failure.message());
        Err(failure.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeUpstream, json_response};
    use flowgate_common::AuthType;
    use flowgate_provider_core::header_get;
    use flowgate_transform::{CanonicalMessage, Dialect, Role};
    use serde_json::Value;

    fn credential() -> Credential {
        Credential {
            api_key: "sk-test".into(),
            access_token: None,
            refresh_token: None,
            auth_type: Some(AuthType::ApiKey),
            expires_at: None,
        }
    }

    fn request() -> ChatRequest {
        let mut request = ChatRequest::new(Dialect::OpenAi, "kimi-k2");
        request
            .messages
            .push(CanonicalMessage::text(Role::User, "hi"));
        request
    }

    fn provider(fake: &Arc<FakeUpstream>) -> IflowProvider {
        IflowProvider::new(
            fake.clone(),
            "https://apis.iflow.cn/v1/",
            Arc::new(ConversationContext::new("sk-test")),
        )
    }

    #[tokio::test]
    async fn chat_call_is_signed_and_traced() {
        let fake = FakeUpstream::new(|req| {
            if req.url.ends_with("/chat/completions") {
                Ok(json_response(200, r#"{"choices":[]}"#))
            } else {
                Ok(json_response(200, "{}"))
            }
        });
        let provider = provider(&fake);
        let dispatch = provider
            .chat(&credential(), &request(), UpstreamOptions::default(), true)
            .await
            .unwrap();
        assert_eq!(dispatch.response.status, 200);

        let requests = fake.requests.lock().unwrap().clone();
        let chat = requests
            .iter()
            .find(|req| req.url == "https://apis.iflow.cn/v1/chat/completions")
            .unwrap();
        assert!(chat.is_stream);
        assert_eq!(chat.timeout, Some(CHAT_TIMEOUT));
        assert_eq!(header_get(&chat.headers, "authorization"), Some("Bearer sk-test"));
        assert_eq!(
            header_get(&chat.headers, "traceparent"),
            Some(dispatch.call.trace().traceparent().as_str())
        );
        assert_eq!(
            header_get(&chat.headers, "content-length"),
            Some(chat.body.as_ref().unwrap().len().to_string().as_str())
        );
        let body: Value = serde_json::from_slice(chat.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_new_tokens"], 8192);

        let gm = fake.next_request().await;
        let gm = if gm.url.contains("run_started") {
            gm
        } else {
            fake.next_request().await
        };
        let gm_body = String::from_utf8(gm.body.unwrap().to_vec()).unwrap();
        assert!(gm_body.contains(&dispatch.call.trace().trace_id));
    }

    #[tokio::test]
    async fn rejected_call_reports_error() {
        let fake = FakeUpstream::new(|req| {
            if req.url.ends_with("/chat/completions") {
                Ok(json_response(429, r#"{"msg":"rate limited"}"#))
            } else {
                Ok(json_response(200, "{}"))
            }
        });
        let err = provider(&fake)
            .chat(&credential(), &request(), UpstreamOptions::default(), false)
            .await
            .err()
            .unwrap();
        let ProviderError::Upstream(failure) = err else {
            panic!("expected upstream failure");
        };
        assert_eq!(failure.status(), Some(429));
        assert_eq!(failure.message(), "rate limited");

        let mut saw_run_error = false;
        for _ in 0..4 {
            let request = fake.next_request().await;
            if request.url.contains("run_error") {
                let body = String::from_utf8(request.body.unwrap().to_vec()).unwrap();
                assert!(body.contains("error_msg=rate%20limited"));
                saw_run_error = true;
                break;
            }
        }
        assert!(saw_run_error);
    }
}
