use serde_json::{Map, Value};

pub type JsonObject = Map<String, Value>;

/// Which public dialect a request arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Claude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url(String),
}

impl ImageSource {
    /// `data:` URL for base64 images, the plain URL otherwise.
    pub fn to_url(&self) -> String {
        match self {
            ImageSource::Base64 { media_type, data } => format!("data:{media_type};base64,{data}"),
            ImageSource::Url(url) => url.clone(),
        }
    }

    /// Splits a `data:` URL into its media type and payload. Anything else is
    /// kept as a plain URL.
    pub fn from_url(url: &str) -> Self {
        let Some(rest) = url.strip_prefix("data:") else {
            return ImageSource::Url(url.to_string());
        };
        let Some((meta, data)) = rest.split_once(',') else {
            return ImageSource::Url(url.to_string());
        };
        let media_type = meta.replace(";base64", "");
        let media_type = if media_type.is_empty() {
            "image/png".to_string()
        } else {
            media_type
        };
        ImageSource::Base64 {
            media_type,
            data: data.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Thinking {
        text: String,
        signature: Option<String>,
    },
    Image {
        source: ImageSource,
        detail: Option<String>,
    },
    /// `input` is the parsed argument object. Arguments that were not valid
    /// JSON are kept as a `Value::String` holding the raw text.
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        output: String,
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl CanonicalMessage {
    pub fn new(role: Role, parts: Vec<ContentPart>) -> Self {
        Self { role, parts }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentPart::Text(text.into())])
    }

    /// Text parts joined with `sep`; other parts are skipped.
    pub fn joined_text(&self, sep: &str) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(sep)
    }

    pub fn has_image(&self) -> bool {
        self.parts
            .iter()
            .any(|part| matches!(part, ContentPart::Image { .. }))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sampling {
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
    pub stop: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDef {
    pub name: String,
    pub description: Option<String>,
    /// JSON schema of the arguments.
    pub parameters: Option<Value>,
    pub strict: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    Auto,
    None,
    /// Any tool must be called ("required" upstream).
    Any,
    Named(String),
}

/// A chat request in dialect-neutral form.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub dialect: Dialect,
    pub model: String,
    pub messages: Vec<CanonicalMessage>,
    pub sampling: Sampling,
    pub tools: Vec<ToolDef>,
    pub tool_choice: Option<ToolChoice>,
    pub stream: bool,
    /// Caller fields with no canonical meaning, forwarded upstream in order.
    pub extra: JsonObject,
}

impl ChatRequest {
    pub fn new(dialect: Dialect, model: impl Into<String>) -> Self {
        Self {
            dialect,
            model: model.into(),
            messages: Vec::new(),
            sampling: Sampling::default(),
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
            extra: JsonObject::new(),
        }
    }
}
