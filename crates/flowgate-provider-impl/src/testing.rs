use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use flowgate_common::{ConfigError, IflowSettings};
use flowgate_provider_core::{
    Credential, CredentialStore, UpstreamBody, UpstreamClient, UpstreamFailure,
    UpstreamHttpRequest, UpstreamHttpResponse,
};
use tokio::sync::mpsc;

type Responder =
    Box<dyn Fn(&UpstreamHttpRequest) -> Result<UpstreamHttpResponse, UpstreamFailure> + Send + Sync>;

/// Records every request and answers from a closure.
pub(crate) struct FakeUpstream {
    responder: Responder,
    seen_tx: mpsc::UnboundedSender<UpstreamHttpRequest>,
    seen_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<UpstreamHttpRequest>>,
    pub(crate) requests: Mutex<Vec<UpstreamHttpRequest>>,
    pub(crate) sent_at: Mutex<Vec<tokio::time::Instant>>,
}

pub(crate) fn json_response(status: u16, body: &str) -> UpstreamHttpResponse {
    UpstreamHttpResponse {
        status,
        headers: vec![("content-type".into(), "application/json".into())],
        body: UpstreamBody::Bytes(Bytes::copy_from_slice(body.as_bytes())),
    }
}

impl FakeUpstream {
    pub(crate) fn new(
        responder: impl Fn(&UpstreamHttpRequest) -> Result<UpstreamHttpResponse, UpstreamFailure>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            responder: Box::new(responder),
            seen_tx,
            seen_rx: tokio::sync::Mutex::new(seen_rx),
            requests: Mutex::new(Vec::new()),
            sent_at: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn ok(body: &'static str) -> Arc<Self> {
        Self::new(move |_| Ok(json_response(200, body)))
    }

    pub(crate) fn failing(failure: UpstreamFailure) -> Arc<Self> {
        Self::new(move |_| Err(failure.clone()))
    }

    pub(crate) async fn next_request(&self) -> UpstreamHttpRequest {
        tokio::time::timeout(Duration::from_secs(5), self.seen_rx.lock().await.recv())
            .await
            .unwrap()
            .unwrap()
    }
}

impl UpstreamClient for FakeUpstream {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        let result = (self.responder)(&req);
        self.requests.lock().unwrap().push(req.clone());
        self.sent_at.lock().unwrap().push(tokio::time::Instant::now());
        let _ = self.seen_tx.send(req);
        Box::pin(async move { result })
    }
}

/// In-memory settings collaborator.
pub(crate) struct MemoryStore {
    pub(crate) credential: Mutex<Credential>,
    pub(crate) saves: Mutex<Vec<Credential>>,
}

impl MemoryStore {
    pub(crate) fn new(credential: Credential) -> Arc<Self> {
        Arc::new(Self {
            credential: Mutex::new(credential),
            saves: Mutex::new(Vec::new()),
        })
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self) -> Result<(Credential, IflowSettings), ConfigError> {
        let credential = self.credential.lock().unwrap().clone();
        let mut settings = IflowSettings::from_map(serde_json::Map::new());
        credential.apply_to(&mut settings);
        Ok((credential, settings))
    }

    fn save(&self, credential: &Credential) -> Result<(), ConfigError> {
        *self.credential.lock().unwrap() = credential.clone();
        self.saves.lock().unwrap().push(credential.clone());
        Ok(())
    }
}
