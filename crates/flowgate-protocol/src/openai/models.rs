use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListModelsResponse {
    pub object: String,
    pub data: Vec<Model>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub object: String,
    /// Unix seconds.
    pub created: i64,
    pub owned_by: String,
    #[serde(default)]
    pub permission: Vec<serde_json::Value>,
    pub root: String,
    pub parent: Option<String>,
}

impl Model {
    pub fn new(id: impl Into<String>, owned_by: impl Into<String>, created: i64) -> Self {
        let id = id.into();
        Self {
            root: id.clone(),
            id,
            object: "model".to_string(),
            created,
            owned_by: owned_by.into(),
            permission: Vec::new(),
            parent: None,
        }
    }
}

impl ListModelsResponse {
    pub fn new(data: Vec<Model>) -> Self {
        Self {
            object: "list".to_string(),
            data,
        }
    }
}

/// An entry of the image-capable model list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisionModel {
    pub id: String,
    pub object: String,
    pub owned_by: String,
    pub supports_vision: bool,
    pub max_images: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListVisionModelsResponse {
    pub object: String,
    pub data: Vec<VisionModel>,
}

impl ListVisionModelsResponse {
    pub fn new(data: Vec<VisionModel>) -> Self {
        Self {
            object: "list".to_string(),
            data,
        }
    }
}
