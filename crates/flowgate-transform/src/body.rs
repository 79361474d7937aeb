use serde_json::{Map, Value};

use crate::canonical::ChatRequest;
use crate::encode::{UpstreamOptions, encode_upstream};
use crate::model_rules::ModelRules;

/// Keys the official client writes first, in this order.
pub const CHAT_BODY_FIELD_ORDER: [&str; 7] = [
    "model",
    "messages",
    "temperature",
    "top_p",
    "max_new_tokens",
    "tools",
    "stream",
];

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_TOP_P: f64 = 0.95;
pub const DEFAULT_MAX_NEW_TOKENS: u64 = 8192;

/// Builds the compact upstream chat body for a canonical request whose model
/// has already been resolved.
pub fn build_upstream_body(
    request: &ChatRequest,
    rules: &ModelRules,
    options: UpstreamOptions,
    stream: bool,
) -> Result<Vec<u8>, serde_json::Error> {
    let mut body = match serde_json::to_value(encode_upstream(request, options))? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    rules.apply(&request.model, &mut body);
    apply_defaults(&mut body, stream);
    serde_json::to_vec(&Value::Object(order_fields(body)))
}

/// `stream` is only ever sent as `true`; the sampling defaults and an empty
/// tool list are filled in where absent.
pub fn apply_defaults(body: &mut Map<String, Value>, stream: bool) {
    body.retain(|key, _| key != "stream");
    if stream {
        body.insert("stream".to_string(), Value::Bool(true));
    }
    body.entry("temperature")
        .or_insert_with(|| Value::from(DEFAULT_TEMPERATURE));
    body.entry("top_p").or_insert_with(|| Value::from(DEFAULT_TOP_P));
    body.entry("max_new_tokens")
        .or_insert_with(|| Value::from(DEFAULT_MAX_NEW_TOKENS));
    body.entry("tools").or_insert_with(|| Value::Array(Vec::new()));
}

/// Known keys first in [`CHAT_BODY_FIELD_ORDER`], everything else after them
/// in its existing order.
pub fn order_fields(body: Map<String, Value>) -> Map<String, Value> {
    let mut ordered = Map::new();
    for key in CHAT_BODY_FIELD_ORDER {
        if let Some(value) = body.get(key) {
            ordered.insert(key.to_string(), value.clone());
        }
    }
    for (key, value) in body {
        if !ordered.contains_key(&key) {
            ordered.insert(key, value);
        }
    }
    ordered
}
