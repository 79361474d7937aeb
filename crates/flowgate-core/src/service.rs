use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use flowgate_common::{CATALOGUE_MODELS, GatewayConfig, ReasoningPolicy, VISION_CATALOGUE};
use flowgate_protocol::openai::models::{
    ListModelsResponse, ListVisionModelsResponse, Model, VisionModel,
};
use flowgate_provider_core::{
    ConcurrencyGate, Credential, GatePermit, ProxyResponse, UpstreamBody, upstream_error_message,
};
use flowgate_provider_impl::{ChatDispatch, CredentialRefresher, IflowProvider, RefreshStatus};
use flowgate_transform::decode::{decode_claude, decode_openai};
use flowgate_transform::encode::UpstreamOptions;
use flowgate_transform::response::claude::to_claude_message;
use flowgate_transform::response::openai::{normalize_openai_response, parse_upstream_response};
use flowgate_transform::stream::{ClaudeStreamTranscoder, OpenAiStreamReencoder};
use flowgate_transform::{ChatRequest, ModelCatalogue, count_tokens};
use http::StatusCode;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::stream::{Reencode, api_error_stream, reencode_stream};

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    streaming: AtomicU64,
    upstream_errors: AtomicU64,
}

/// Snapshot for the admin stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub requests_total: u64,
    pub streaming_total: u64,
    pub upstream_errors: u64,
    pub in_flight: usize,
    pub gate_capacity: usize,
    pub logged_in: bool,
    pub refresher: Option<RefreshStatus>,
}

/// The running gateway: built once at startup and shared by every handler.
///
/// The credential is swapped whole whenever the refresher publishes a new
/// one, so a request always signs with one consistent value.
pub struct GatewayService {
    config: GatewayConfig,
    provider: IflowProvider,
    catalogue: ModelCatalogue,
    gate: ConcurrencyGate,
    credential: ArcSwap<Credential>,
    refresher: Option<Arc<CredentialRefresher>>,
    counters: Counters,
}

impl GatewayService {
    pub fn new(config: GatewayConfig, provider: IflowProvider, credential: Credential) -> Self {
        if config.api_concurrency > 1 {
            warn!(
                api_concurrency = config.api_concurrency,
                "upstream may reject overlapping calls above concurrency 1"
            );
        }
        Self {
            catalogue: ModelCatalogue::new(
                config.known_models.clone(),
                config.default_model.clone(),
            ),
            gate: ConcurrencyGate::new(config.api_concurrency),
            credential: ArcSwap::from_pointee(credential),
            refresher: None,
            counters: Counters::default(),
            provider,
            config,
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<CredentialRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Applies every credential the refresher publishes.
    pub fn watch_credentials(
        self: &Arc<Self>,
        mut updates: mpsc::Receiver<Arc<Credential>>,
    ) -> JoinHandle<()> {
        let service = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(credential) = updates.recv().await {
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.replace_credential(credential);
            }
        })
    }

    pub fn replace_credential(&self, credential: Arc<Credential>) {
        info!(
            api_key = %flowgate_common::mask_secret(&credential.api_key),
            "credential updated"
        );
        self.credential.store(credential);
    }

    pub fn credential(&self) -> Arc<Credential> {
        self.credential.load_full()
    }

    pub fn is_logged_in(&self) -> bool {
        self.credential.load().is_usable()
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub fn catalogue(&self) -> &ModelCatalogue {
        &self.catalogue
    }

    fn policy(&self) -> ReasoningPolicy {
        self.config.reasoning_policy
    }

    pub fn vision_models(&self) -> ListVisionModelsResponse {
        ListVisionModelsResponse::new(
            VISION_CATALOGUE
                .iter()
                .map(|info| VisionModel {
                    id: info.id.to_string(),
                    object: "model".to_string(),
                    owned_by: info.provider.to_string(),
                    supports_vision: true,
                    max_images: info.max_images,
                })
                .collect(),
        )
    }

    pub fn models(&self) -> ListModelsResponse {
        let created = time::OffsetDateTime::now_utc().unix_timestamp();
        ListModelsResponse::new(
            CATALOGUE_MODELS
                .iter()
                .map(|id| Model::new(*id, "iflow", created))
                .collect(),
        )
    }

    pub fn count_tokens(&self, body: &[u8]) -> u64 {
        count_tokens::count_request_tokens(body)
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            requests_total: self.counters.requests.load(Ordering::Relaxed),
            streaming_total: self.counters.streaming.load(Ordering::Relaxed),
            upstream_errors: self.counters.upstream_errors.load(Ordering::Relaxed),
            in_flight: self.gate.in_flight(),
            gate_capacity: self.gate.capacity(),
            logged_in: self.is_logged_in(),
            refresher: self.refresher.as_ref().map(|refresher| refresher.status()),
        }
    }

    /// OpenAI chat-completions call.
    pub async fn chat_completions(&self, body: &[u8]) -> Result<ProxyResponse, GatewayError> {
        let request = decode_openai(body)?;
        let stream = request.stream;
        let (dispatch, permit) = self.dispatch(request).await?;
        let policy = self.policy();
        if stream {
            let model = dispatch.call.model().to_string();
            return Ok(self
                .stream_response(dispatch, permit, OpenAiStreamReencoder::new(policy, &model))
                .await);
        }

        let ChatDispatch { response, call } = dispatch;
        let bytes = response.into_bytes().await;
        drop(permit);
        let mut parsed = match parse_upstream_response(&bytes) {
            Ok(parsed) if !parsed.choices.is_empty() => parsed,
            Ok(_) => {
                let message = no_choices_message(&bytes);
                call.report_error(&message);
                self.count_upstream_error();
                return Err(GatewayError::InvalidUpstream(message));
            }
            Err(err) => {
                warn!(error = %err, "upstream response is not a chat completion");
                let message = upstream_error_message(200, &bytes);
                call.report_error(&message);
                self.count_upstream_error();
                return Err(GatewayError::InvalidUpstream(message));
            }
        };
        normalize_openai_response(&mut parsed, policy);
        let out = serde_json::to_vec(&parsed).map_err(internal)?;
        Ok(ProxyResponse::json(StatusCode::OK, out))
    }

    /// Anthropic messages call.
    pub async fn messages(&self, body: &[u8]) -> Result<ProxyResponse, GatewayError> {
        let request = decode_claude(body)?;
        let stream = request.stream;
        let (dispatch, permit) = self.dispatch(request).await?;
        let policy = self.policy();
        let model = dispatch.call.model().to_string();
        if stream {
            return Ok(self
                .stream_response(dispatch, permit, ClaudeStreamTranscoder::new(policy, &model))
                .await);
        }

        let ChatDispatch { response, call } = dispatch;
        let bytes = response.into_bytes().await;
        drop(permit);
        let parsed = match parse_upstream_response(&bytes) {
            Ok(parsed) => parsed,
            Err(err) => {
                warn!(error = %err, "upstream response is not a chat completion");
                let message = upstream_error_message(200, &bytes);
                call.report_error(&message);
                self.count_upstream_error();
                return Err(GatewayError::InvalidUpstream(message));
            }
        };
        if parsed.choices.is_empty() {
            call.report_error(&no_choices_message(&bytes));
        }
        let message = to_claude_message(&parsed, &model, policy);
        let out = serde_json::to_vec(&message).map_err(internal)?;
        Ok(ProxyResponse::json(StatusCode::OK, out))
    }

    /// Resolves the model, waits for the gate and sends the call. The permit
    /// comes back with the dispatch so streamed calls can hold it.
    async fn dispatch(
        &self,
        mut request: ChatRequest,
    ) -> Result<(ChatDispatch, GatePermit), GatewayError> {
        request.model = self.catalogue.resolve(&request.model);
        self.counters.requests.fetch_add(1, Ordering::Relaxed);
        if request.stream {
            self.counters.streaming.fetch_add(1, Ordering::Relaxed);
        }

        let permit = self.gate.acquire().await.map_err(|_| GatewayError::GateClosed)?;
        debug!(in_flight = self.gate.in_flight(), "gate acquired");
        let credential = self.credential();
        let options = UpstreamOptions::for_dialect(request.dialect);
        match self
            .provider
            .chat(&credential, &request, options, request.stream)
            .await
        {
            Ok(dispatch) => Ok((dispatch, permit)),
            Err(err) => {
                self.count_upstream_error();
                Err(err.into())
            }
        }
    }

    async fn stream_response<R: Reencode>(
        &self,
        dispatch: ChatDispatch,
        permit: GatePermit,
        reencoder: R,
    ) -> ProxyResponse {
        let ChatDispatch { response, call } = dispatch;
        let is_event_stream = response
            .content_type()
            .is_some_and(|value| value.to_ascii_lowercase().contains("text/event-stream"));
        let body = match response.body {
            UpstreamBody::Stream(rx) if is_event_stream => {
                let body = reencode_stream(rx, reencoder, call, permit);
                return ProxyResponse::Stream {
                    status: StatusCode::OK,
                    body,
                };
            }
            UpstreamBody::Stream(mut rx) => {
                let mut buf = Vec::new();
                while let Some(Ok(chunk)) = rx.recv().await {
                    buf.extend_from_slice(&chunk);
                }
                buf
            }
            UpstreamBody::Bytes(bytes) => bytes.to_vec(),
        };
        drop(permit);

        let message = upstream_error_message(response.status, &body);
        warn!(message = %message, "streaming call answered without an event stream");
        call.report_error(&message);
        self.count_upstream_error();
        ProxyResponse::Stream {
            status: StatusCode::OK,
            body: api_error_stream(reencoder, call.model(), &message),
        }
    }

    fn count_upstream_error(&self) {
        self.counters.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }
}

fn internal(err: serde_json::Error) -> GatewayError {
    GatewayError::Internal(err.to_string())
}

fn no_choices_message(bytes: &[u8]) -> String {
    let extracted = upstream_error_message(200, bytes);
    let is_vendor_message = serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .is_some_and(|value| value.get("msg").is_some());
    if is_vendor_message {
        extracted
    } else {
        "upstream returned no choices".to_string()
    }
}
