use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlation id for one orchestrator lifetime.
///
/// Sent as `client_id` on submission and as `clientId` on the real-time
/// channel so the engine routes progress messages back to this session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned identifier of a submitted job (the engine's `prompt_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name the engine assigned to an uploaded asset.
///
/// Deliberately not `Clone`: it is moved into exactly one
/// [`JobDefinition`](crate::workflow::JobDefinition).
#[derive(Debug, PartialEq, Eq)]
pub struct UploadedAssetRef {
    pub name: String,
}

impl UploadedAssetRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}
