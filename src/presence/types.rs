use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Connected,
}

/// The presence record stored at `clients/{id}`.
///
/// There is no `Disconnected` state on the wire: a disconnected client has
/// no record at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientSession {
    pub id: String,
    pub status: ClientStatus,
    /// Store timestamp (ms) of the last registration or task submission.
    #[serde(default)]
    pub last_activity: Option<u64>,
}
