//! Wire types of the relay's admission callback.

use serde::{Deserialize, Serialize};

use crate::identity::NodeIdentity;

/// Body of `POST /validate`, sent by the relay for each connecting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmitRequest {
    #[serde(rename = "NodePublic")]
    pub node_public: NodeIdentity,
    /// Client address as seen by the relay. Only logged, never parsed.
    #[serde(rename = "Source", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmitResponse {
    #[serde(rename = "Allow")]
    pub allow: bool,
}
