//! Wire Records
//!
//! The records clients and servers exchange through the store:
//! a `Task` written under `queue/tasks/{key}` and a `ResultEnvelope` appended
//! under `results/{client}`. The task's own push key doubles as the
//! correlation key copied into its result.

use crate::error::RpcError;
use crate::store::types::server_timestamp;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A queued request to run a named handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Session id of the submitting client.
    pub client: String,
    /// Name of the registered handler.
    pub task: String,
    #[serde(default = "empty_object")]
    pub data: Value,
    /// Correlation key: the push key of this task's queue entry.
    pub key: String,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTask,
    Handler,
}

/// Structured failure carried in `ResultEnvelope.error`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// The `error` field as found on the wire.
///
/// Producers outside this crate may write a bare message string.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RemoteError {
    Structured(TaskFailure),
    Message(String),
}

impl From<&RpcError> for RemoteError {
    fn from(error: &RpcError) -> Self {
        let (kind, message) = match error {
            RpcError::UnknownTask(name) => (FailureKind::UnknownTask, name.clone()),
            RpcError::Handler(message) => (FailureKind::Handler, message.clone()),
            other => (FailureKind::Handler, other.to_string()),
        };
        RemoteError::Structured(TaskFailure { kind, message })
    }
}

impl From<RemoteError> for RpcError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Structured(TaskFailure {
                kind: FailureKind::UnknownTask,
                message,
            }) => RpcError::UnknownTask(message),
            RemoteError::Structured(TaskFailure { message, .. }) | RemoteError::Message(message) => {
                RpcError::Handler(message)
            }
        }
    }
}

/// The outcome of one task, addressed to the client that submitted it.
///
/// Exactly one of `data` and `error` is set by the constructors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub client: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
    /// Store timestamp (ms) of the write; used to expire unread results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
}

impl ResultEnvelope {
    pub fn success(task: &Task, data: Value) -> Self {
        Self {
            client: task.client.clone(),
            key: task.key.clone(),
            data: Some(data),
            error: None,
            created_at: None,
        }
    }

    pub fn failure(task: &Task, error: &RpcError) -> Self {
        Self {
            client: task.client.clone(),
            key: task.key.clone(),
            data: None,
            error: Some(RemoteError::from(error)),
            created_at: None,
        }
    }

    /// The record to append, with `createdAt` left for the store to stamp.
    pub fn to_record(&self) -> Result<Value, serde_json::Error> {
        let mut record = serde_json::to_value(self)?;
        if let Some(fields) = record.as_object_mut() {
            fields.insert("createdAt".to_string(), server_timestamp());
        }
        Ok(record)
    }

    /// Error takes precedence; a missing `data` reads as `null`.
    pub fn into_result(self) -> Result<Value, RpcError> {
        match self.error {
            Some(error) => Err(error.into()),
            None => Ok(self.data.unwrap_or(Value::Null)),
        }
    }
}
