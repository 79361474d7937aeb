use std::sync::Arc;
use std::time::Duration;

use flowgate_provider_core::{UpstreamClient, UpstreamHttpRequest};
use serde_json::json;
use tracing::debug;

use crate::constants::{
    IFLOW_CLI_VERSION, MMSTAT_GM_BASE, MMSTAT_VGIF_URL, NODE_VERSION, RUN_ERROR_PATH,
    RUN_STARTED_PATH,
};
use crate::fingerprint::{
    ConversationContext, TraceContext, observation_id, telemetry_headers, vgif_headers,
};

pub const TELEMETRY_TIMEOUT: Duration = Duration::from_secs(10);

/// `urllib`-style quoting: `/` stays literal.
fn quote(value: &str) -> String {
    urlencoding::encode(value).replace("%2F", "/")
}

fn platform_system() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "Darwin",
        "windows" => "Windows",
        other => other,
    }
}

fn platform_short() -> String {
    let system = platform_system().to_ascii_lowercase();
    if system.starts_with("win") {
        "win".to_string()
    } else {
        system
    }
}

/// Best-effort side-channel events the official client sends around each
/// chat call. Every send is a detached task; nothing here can fail a caller.
#[derive(Clone)]
pub struct Telemetry {
    client: Arc<dyn UpstreamClient>,
    context: Arc<ConversationContext>,
}

impl Telemetry {
    pub fn new(client: Arc<dyn UpstreamClient>, context: Arc<ConversationContext>) -> Self {
        Self { client, context }
    }

    /// Sends `run_started` and the page beacon. Returns the observation id
    /// that a later `run_error` names as its parent.
    pub fn run_started(&self, model: &str, trace: &TraceContext) -> String {
        let observation = observation_id();
        let gokey = self.run_started_gokey(model, trace, &observation);
        let gm = self.gm_request(RUN_STARTED_PATH, &gokey);
        let vgif = self.vgif_request();
        let client = self.client.clone();
        spawn_detached(async move {
            for request in [gm, vgif] {
                send_quietly(client.as_ref(), request).await;
            }
        });
        observation
    }

    pub fn run_error(&self, model: &str, trace: &TraceContext, parent: &str, message: &str) {
        let gokey = self.run_error_gokey(model, trace, parent, message);
        let request = self.gm_request(RUN_ERROR_PATH, &gokey);
        let client = self.client.clone();
        spawn_detached(async move {
            send_quietly(client.as_ref(), request).await;
        });
    }

    fn run_started_gokey(&self, model: &str, trace: &TraceContext, observation: &str) -> String {
        let ctx = &self.context;
        format!(
            "pid=iflow&sam=iflow.cli.{conversation}.{trace}&trace_id={trace}\
             &session_id={session}&conversation_id={conversation}\
             &observation_id={observation}&model={model}&tool=&user_id={user}",
            conversation = ctx.conversation_id,
            trace = trace.trace_id,
            session = ctx.session_id,
            model = quote(model),
            user = ctx.user_id,
        )
    }

    fn run_error_gokey(
        &self,
        model: &str,
        trace: &TraceContext,
        parent: &str,
        message: &str,
    ) -> String {
        let ctx = &self.context;
        let arch = std::env::consts::ARCH;
        format!(
            "pid=iflow&sam=iflow.cli.{conversation}.{trace}&trace_id={trace}\
             &observation_id={observation}&parent_observation_id={parent}\
             &session_id={session}&conversation_id={conversation}&user_id={user}\
             &error_msg={error}&model={model}&tool=&toolName=&toolArgs=\
             &cliVer={IFLOW_CLI_VERSION}&platform={platform}&arch={arch}\
             &nodeVersion={node}&osVersion={os_version}",
            conversation = ctx.conversation_id,
            trace = trace.trace_id,
            observation = observation_id(),
            session = ctx.session_id,
            user = ctx.user_id,
            error = quote(message),
            model = quote(model),
            platform = quote(&platform_system().to_ascii_lowercase()),
            node = quote(NODE_VERSION),
            os_version = quote(&format!("{}-{arch}", platform_system())),
        )
    }

    fn gm_request(&self, path: &str, gokey: &str) -> UpstreamHttpRequest {
        let url = format!("{MMSTAT_GM_BASE}{path}");
        let body = json!({"gmkey": "AI", "gokey": gokey}).to_string();
        UpstreamHttpRequest::post(url.clone(), telemetry_headers(&url, body.len()), body)
            .with_timeout(TELEMETRY_TIMEOUT)
    }

    fn vgif_request(&self) -> UpstreamHttpRequest {
        let system = platform_system();
        let fields = [
            ("logtype", "1".to_string()),
            ("title", "iFlow-CLI".to_string()),
            ("pre", "-".to_string()),
            ("platformType", "pc".to_string()),
            ("device_model", system.to_string()),
            ("os", system.to_string()),
            ("o", platform_short()),
            ("node_version", NODE_VERSION.to_string()),
            ("language", "zh_CN.UTF-8".to_string()),
            ("interactive", "0".to_string()),
            ("iFlowEnv", String::new()),
            ("_g_encode", "utf-8".to_string()),
            ("pid", "iflow".to_string()),
            ("_user_id", self.context.user_id.clone()),
        ];
        let body = serde_urlencoded::to_string(fields).unwrap_or_default();
        UpstreamHttpRequest::post(
            MMSTAT_VGIF_URL,
            vgif_headers(MMSTAT_VGIF_URL, body.len()),
            body,
        )
        .with_timeout(TELEMETRY_TIMEOUT)
    }
}

/// Events raised outside a runtime, such as a response body dropped after
/// shutdown, are skipped.
fn spawn_detached<F>(task: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => debug!("no runtime; telemetry event skipped"),
    }
}

async fn send_quietly(client: &dyn UpstreamClient, request: UpstreamHttpRequest) {
    let url = request.url.clone();
    match client.send(request).await {
        Ok(response) if !response.is_success() => {
            debug!(%url, status = response.status, "telemetry rejected");
        }
        Ok(_) => {}
        Err(err) => debug!(%url, error = %err, "telemetry failed"),
    }
}
