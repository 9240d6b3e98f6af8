//! Job envelope: the serialized unit of work.
//!
//! An envelope is created by the producer, moved between lists by the worker,
//! and never edited by handlers — handlers return new data, the worker attaches
//! it as `context` exactly once.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Envelope metadata, written once by the producer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Meta {
    /// Globally unique, monotonically increasing id from the store's counter.
    pub id: i64,

    /// Unprefixed name of the originating queue, kept for provenance.
    pub queue: String,

    /// Selects which handler pair processes this job.
    #[serde(rename = "jobName")]
    pub job_name: String,

    /// Creation timestamp: UTC, second precision, no offset suffix.
    /// Held as a string so the serialized envelope is byte-stable for
    /// value-match removal from the in-flight list.
    pub datetime: String,
}

/// A unit of work flowing through the queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobEnvelope {
    pub meta: Meta,

    /// Producer-supplied payload. Opaque to the queue.
    #[serde(default)]
    pub job: serde_json::Value,

    /// Absent until processing completes; then the work handler's return
    /// value, or an [`ErrorRecord`] if the handler failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl JobEnvelope {
    pub fn encode(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> crate::error::Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Current UTC time in the envelope's datetime format.
pub(crate) fn now_stamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Structured error context recorded on a failed job's envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub code: i64,
    pub message: String,
    pub location: String,
}

impl From<HandlerError> for ErrorRecord {
    fn from(err: HandlerError) -> Self {
        Self {
            kind: err.kind,
            code: err.code,
            message: err.message,
            location: err.location,
        }
    }
}

/// Failure returned by a work handler.
///
/// The constructors capture the caller's `file:line` so the envelope's error
/// record points at the handler that failed, the way a raised exception would.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub kind: String,
    pub code: i64,
    pub message: String,
    pub location: String,
}

impl HandlerError {
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let caller = std::panic::Location::caller();
        Self {
            kind: "error".to_string(),
            code: 0,
            message: message.into(),
            location: format!("{}:{}", caller.file(), caller.line()),
        }
    }

    /// Wrap any displayable error.
    #[track_caller]
    pub fn from_err(err: impl std::fmt::Display) -> Self {
        Self::new(err.to_string())
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn code(mut self, code: i64) -> Self {
        self.code = code;
        self
    }
}
