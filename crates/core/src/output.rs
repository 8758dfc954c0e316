//! Job history records and output artifact references.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Default artifact kind when the engine omits `type`.
pub const DEFAULT_OUTPUT_KIND: &str = "output";

/// One retrievable artifact produced by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutputRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
}

fn default_kind() -> String {
    DEFAULT_OUTPUT_KIND.to_string()
}

impl JobOutputRef {
    pub fn new(
        filename: impl Into<String>,
        subfolder: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            subfolder: subfolder.into(),
            kind: kind.into(),
        }
    }

    /// Query string for the `/view` endpoint.
    pub fn view_query(&self) -> String {
        let kind = if self.kind.is_empty() {
            DEFAULT_OUTPUT_KIND
        } else {
            self.kind.as_str()
        };
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("filename", &self.filename)
            .append_pair("subfolder", &self.subfolder)
            .append_pair("type", kind)
            .finish()
    }

    /// Proxy-relative locator, e.g. `/view?filename=out.png&subfolder=&type=output`.
    pub fn view_path(&self) -> String {
        format!("/view?{}", self.view_query())
    }
}

/// Outputs reported for a single node.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<JobOutputRef>,
}

/// The engine's history entry for one job.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobRecord {
    /// Per-node outputs, in the order the engine listed them.
    #[serde(default)]
    pub outputs: IndexMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<JobStatus>,
}

/// Execution status block attached to a history entry.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub status_str: Option<String>,
}

impl JobRecord {
    /// First artifact of the first output-bearing node, if any.
    pub fn first_output(&self) -> Option<&JobOutputRef> {
        self.outputs
            .values()
            .find_map(|node| node.images.first())
    }

    /// Whether the engine recorded the job as failed.
    pub fn failed(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.status_str.as_deref())
            == Some("error")
    }
}

/// Body of `GET /history/{id}`: a map keyed by job id.
pub type HistoryResponse = IndexMap<String, JobRecord>;
