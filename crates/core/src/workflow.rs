//! Job definition templates.
//!
//! A template is an engine node graph (`node id -> { class_type, inputs }`).
//! The only thing this crate does with it is point its image-input nodes at
//! an uploaded asset; every other node is passed through untouched.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;
use crate::types::UploadedAssetRef;

/// Node type whose `image` input receives the uploaded asset name.
pub const IMAGE_INPUT_CLASS: &str = "LoadImage";

/// Input key rewritten on [`IMAGE_INPUT_CLASS`] nodes.
pub const IMAGE_INPUT_KEY: &str = "image";

const DEFAULT_TEMPLATE: &str = include_str!("../workflows/bg_remove.json");

/// Node graph submitted to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobDefinition(IndexMap<String, Value>);

impl JobDefinition {
    /// The bundled background-removal graph.
    pub fn default_template() -> Self {
        Self::from_json_str(DEFAULT_TEMPLATE).expect("bundled job template must be valid")
    }

    /// Parse a template, requiring every node to be a JSON object.
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let nodes: IndexMap<String, Value> = serde_json::from_str(json)
            .map_err(|e| CoreError::Validation(format!("Invalid job template: {e}")))?;

        if let Some((id, _)) = nodes.iter().find(|(_, node)| !node.is_object()) {
            return Err(CoreError::Validation(format!(
                "Invalid job template: node '{id}' is not an object"
            )));
        }

        Ok(Self(nodes))
    }

    /// Load a template from a JSON file on disk.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Internal(format!("Failed to read job template {}: {e}", path.display()))
        })?;
        Self::from_json_str(&text)
    }

    /// Number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Node by id, if present.
    pub fn node(&self, id: &str) -> Option<&Value> {
        self.0.get(id)
    }

    /// Point every image-input node at `asset`, consuming it.
    ///
    /// Returns the number of nodes rewritten. A template without any
    /// image-input node cannot process an upload and is rejected.
    pub fn bind_input_image(&mut self, asset: UploadedAssetRef) -> Result<usize, CoreError> {
        let mut bound = 0;

        for node in self.0.values_mut() {
            let Some(obj) = node.as_object_mut() else {
                continue;
            };
            if obj.get("class_type").and_then(Value::as_str) != Some(IMAGE_INPUT_CLASS) {
                continue;
            }

            let inputs = obj
                .entry("inputs")
                .or_insert_with(|| Value::Object(Default::default()));
            if !inputs.is_object() {
                *inputs = Value::Object(Default::default());
            }
            if let Some(inputs) = inputs.as_object_mut() {
                inputs.insert(IMAGE_INPUT_KEY.to_string(), Value::String(asset.name.clone()));
                bound += 1;
            }
        }

        if bound == 0 {
            return Err(CoreError::Validation(format!(
                "Job template has no {IMAGE_INPUT_CLASS} node to receive the uploaded image"
            )));
        }
        Ok(bound)
    }
}
